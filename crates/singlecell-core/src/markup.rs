//! HTML escaping and ANSI traceback colorizing.

/// Maps ANSI-coded text to styled markup.
pub trait Colorizer: Send + Sync {
    fn colorize(&self, text: &str) -> String;
}

/// Converts `ESC[<bold>;<color>m` runs into colored `<span>`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiColorizer;

fn color_name(code: &str) -> Option<&'static str> {
    Some(match code {
        "30" => "black",
        "31" => "red",
        "32" => "green",
        "33" => "goldenrod",
        "34" => "blue",
        "35" => "purple",
        "36" => "darkcyan",
        "37" => "gray",
        _ => return None,
    })
}

impl Colorizer for AnsiColorizer {
    fn colorize(&self, text: &str) -> String {
        let mut segments = text.split("\u{1b}[");
        let mut result = segments.next().unwrap_or_default().to_string();

        for segment in segments {
            let Some(end) = segment.find('m') else {
                result.push_str(segment);
                continue;
            };
            let body = &segment[end + 1..];
            if body.is_empty() {
                continue;
            }
            let codes: Vec<&str> = segment[..end].split(';').collect();
            match codes.as_slice() {
                [weight, color] => {
                    let color = color_name(color).unwrap_or("inherit");
                    result.push_str("<span style=\"color:");
                    result.push_str(color);
                    if *weight == "1" {
                        result.push_str("; font-weight:bold");
                    }
                    result.push_str("\">");
                    result.push_str(body);
                    result.push_str("</span>");
                }
                _ => result.push_str(body),
            }
        }

        result
    }
}

/// Escape text for HTML element content.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape text for a quoted HTML attribute value.
pub fn escape_attr(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
