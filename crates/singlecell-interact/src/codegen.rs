//! Control value serializers and remote-call code generation.
//!
//! Each control type has exactly one serializer turning its current value into
//! the string handed to the remote function. The call builder then quotes or
//! passes through each string according to the control's `raw` flag.

use crate::control::{Control, ControlKind, ControlType, ControlValue, SliderKind};

/// Current control values in declaration order, keyed by control name.
pub type Changes = Vec<(String, String)>;

type Serializer = fn(&ControlKind, &ControlValue) -> Option<String>;

const SERIALIZERS: [(ControlType, Serializer); 6] = [
    (ControlType::Html, encode_html),
    (ControlType::Checkbox, encode_checkbox),
    (ControlType::InputBox, encode_input_box),
    (ControlType::InputGrid, encode_input_grid),
    (ControlType::Selector, encode_selector),
    (ControlType::Slider, encode_slider),
];

pub fn serializer_for(control_type: ControlType) -> Serializer {
    SERIALIZERS
        .iter()
        .find(|(ty, _)| *ty == control_type)
        .map(|(_, f)| *f)
        .unwrap_or(encode_input_box)
}

fn encode_html(kind: &ControlKind, _value: &ControlValue) -> Option<String> {
    match kind {
        ControlKind::Html { default, .. } => Some(default.clone()),
        _ => None,
    }
}

fn encode_checkbox(_kind: &ControlKind, value: &ControlValue) -> Option<String> {
    match value {
        ControlValue::Bool(true) => Some("True".into()),
        ControlValue::Bool(false) => Some("False".into()),
        _ => None,
    }
}

fn encode_input_box(_kind: &ControlKind, value: &ControlValue) -> Option<String> {
    match value {
        ControlValue::Text(text) => Some(text.clone()),
        _ => None,
    }
}

fn encode_input_grid(_kind: &ControlKind, value: &ControlValue) -> Option<String> {
    match value {
        ControlValue::Grid(rows) => {
            let rows: Vec<String> = rows.iter().map(|row| format!("[{}]", row.join(","))).collect();
            Some(format!("[{}]", rows.join(",")))
        }
        _ => None,
    }
}

fn encode_selector(kind: &ControlKind, value: &ControlValue) -> Option<String> {
    match (kind, value) {
        (ControlKind::Selector { values, .. }, ControlValue::Index(i)) => values.get(*i).cloned(),
        _ => None,
    }
}

fn encode_slider(kind: &ControlKind, value: &ControlValue) -> Option<String> {
    match (kind, value) {
        (ControlKind::Slider(SliderKind::Value { labels, .. }), ControlValue::Index(i)) => {
            labels.get(*i).cloned()
        }
        (ControlKind::Slider(SliderKind::Continuous { .. }), ControlValue::Number(n)) => {
            Some(n.to_string())
        }
        _ => None,
    }
}

/// Encode one control's value; a value that doesn't fit falls back to the declared default.
pub fn encode(control: &Control, value: &ControlValue) -> String {
    let serialize = serializer_for(control.control_type());
    serialize(&control.kind, value)
        .or_else(|| serialize(&control.kind, &control.default_value()))
        .unwrap_or_default()
}

/// Escape single quotes for a single-quoted literal.
pub fn quote_escape(text: &str) -> String {
    text.replace('\'', "\\'")
}

/// Build `<function>(name='value',name=raw,)` from encoded values in declaration order.
pub fn build_call(function: &str, controls: &[Control], changes: &Changes) -> String {
    let mut code = format!("{function}(");
    for (name, value) in changes {
        let raw = controls
            .iter()
            .find(|c| &c.name == name)
            .is_some_and(|c| c.raw);
        if raw {
            code.push_str(&format!("{name}={value},"));
        } else {
            code.push_str(&format!("{name}='{}',", quote_escape(value)));
        }
    }
    code.push(')');
    code
}
