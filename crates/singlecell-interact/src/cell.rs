//! A live interact cell bound to one originating request.

use serde_json::Value;
use tracing::{debug, warn};

use singlecell_core::error::{Result, SingleCellError};
use singlecell_core::ids::{InteractId, MsgId};
use singlecell_core::markup::{escape_attr, escape_html};

use crate::codegen::{self, Changes};
use crate::control::{Control, ControlKind, ControlValue, EventKind, SliderKind};

/// A rendered control fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedControl {
    pub name: String,
    pub html: String,
}

/// Code to resubmit after a control change, under the cell's original request id.
#[derive(Debug, Clone, PartialEq)]
pub struct Resubmit {
    pub code: String,
    pub msg_id: MsgId,
}

#[derive(Debug, Clone)]
pub struct InteractCell {
    interact_id: InteractId,
    msg_id: MsgId,
    function: String,
    controls: Vec<Control>,
    values: Vec<ControlValue>,
}

impl InteractCell {
    /// `function_template` names the remote function; `{id}` becomes the interact id.
    pub fn new(
        interact_id: InteractId,
        msg_id: MsgId,
        controls: Vec<Control>,
        function_template: &str,
    ) -> Self {
        let function = function_template.replace("{id}", interact_id.as_str());
        let values = controls.iter().map(Control::default_value).collect();
        Self {
            interact_id,
            msg_id,
            function,
            controls,
            values,
        }
    }

    /// Build a cell from an `interact_prepare` payload (`{controls, layout}`).
    ///
    /// Declaration order follows `layout`; controls it omits are appended in
    /// key order. Only controls with a missing or unknown `control_type` are skipped.
    pub fn from_prepare(
        interact_id: InteractId,
        msg_id: MsgId,
        payload: &Value,
        function_template: &str,
    ) -> Self {
        let declared = payload.get("controls").and_then(Value::as_object);
        let mut names: Vec<String> = payload
            .get("layout")
            .and_then(Value::as_array)
            .map(|layout| {
                layout
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|name| declared.is_some_and(|d| d.contains_key(*name)))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if let Some(declared) = declared {
            for name in declared.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }

        let controls = names
            .iter()
            .filter_map(|name| {
                let decl = declared.and_then(|d| d.get(name))?;
                match Control::from_declaration(name, decl) {
                    Ok(control) => Some(control),
                    Err(e) => {
                        warn!(interact_id = %interact_id, control = %name, %e, "Skipping control");
                        None
                    }
                }
            })
            .collect();

        Self::new(interact_id, msg_id, controls, function_template)
    }

    pub fn interact_id(&self) -> &InteractId {
        &self.interact_id
    }

    pub fn msg_id(&self) -> &MsgId {
        &self.msg_id
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    /// DOM id/class prefix shared by all of this cell's widgets.
    pub fn dom_id(&self) -> String {
        format!("urn_uuid_{}", self.interact_id)
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.controls
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| SingleCellError::UnknownControl {
                interact_id: self.interact_id.to_string(),
                control: name.to_string(),
            })
    }

    pub fn value(&self, name: &str) -> Option<&ControlValue> {
        self.index_of(name).ok().map(|i| &self.values[i])
    }

    /// Record a user edit. Rejected edits leave the previous value in place.
    pub fn set_value(&mut self, name: &str, value: ControlValue) -> Result<()> {
        let index = self.index_of(name)?;
        self.controls[index].validate(&value)?;
        self.values[index] = value;
        Ok(())
    }

    /// Events each control resubmits on, in declaration order.
    pub fn subscriptions(&self) -> Vec<(String, EventKind)> {
        self.controls
            .iter()
            .map(|c| (c.name.clone(), c.trigger()))
            .collect()
    }

    /// Every control's current value, encoded per type, in declaration order.
    pub fn get_changes(&self) -> Changes {
        self.controls
            .iter()
            .zip(&self.values)
            .map(|(control, value)| (control.name.clone(), codegen::encode(control, value)))
            .collect()
    }

    /// The remote call for the current values.
    pub fn generate_code(&self) -> String {
        codegen::build_call(&self.function, &self.controls, &self.get_changes())
    }

    /// Apply an optional new value and, if `event` is the control's trigger,
    /// produce the code to resubmit.
    pub fn handle_event(
        &mut self,
        name: &str,
        event: EventKind,
        value: Option<ControlValue>,
    ) -> Result<Option<Resubmit>> {
        if let Some(value) = value {
            self.set_value(name, value)?;
        }
        let index = self.index_of(name)?;
        if self.controls[index].trigger() != event {
            debug!(interact_id = %self.interact_id, control = name, ?event, "Event not subscribed");
            return Ok(None);
        }
        Ok(Some(Resubmit {
            code: self.generate_code(),
            msg_id: self.msg_id.clone(),
        }))
    }

    /// One fragment per control, in declaration order, reflecting current values.
    pub fn render(&self) -> Vec<RenderedControl> {
        let dom = self.dom_id();
        self.controls
            .iter()
            .zip(&self.values)
            .map(|(control, value)| RenderedControl {
                name: control.name.clone(),
                html: render_control(&dom, control, value),
            })
            .collect()
    }

    /// All fragments wrapped in the cell's container.
    pub fn render_html(&self) -> String {
        let mut html = format!("<div class=\"interact\" id=\"{}\">", escape_attr(&self.dom_id()));
        for fragment in self.render() {
            html.push_str(&fragment.html);
        }
        html.push_str("</div>");
        html
    }
}

fn render_control(dom: &str, control: &Control, value: &ControlValue) -> String {
    let class = escape_attr(dom);
    let id = escape_attr(&format!("{dom}-{}", control.name));
    let mut html = String::new();
    if let Some(label) = &control.label {
        html.push_str(&format!("<label for=\"{id}\">{}</label>", escape_html(label)));
    }

    match (&control.kind, value) {
        (ControlKind::Html { template, default }, _) => {
            html.push_str(
                &template
                    .replace(&format!("${}$", control.name), default)
                    .replace("$id$", dom),
            );
        }
        (ControlKind::Checkbox { .. }, ControlValue::Bool(checked)) => {
            let checked = if *checked { " checked" } else { "" };
            html.push_str(&format!(
                "<input type=\"checkbox\" class=\"{class}\" id=\"{id}\"{checked}>"
            ));
        }
        (ControlKind::InputBox { width, .. }, ControlValue::Text(text)) => {
            let size = width.map(|w| format!(" size=\"{w}\"")).unwrap_or_default();
            html.push_str(&format!(
                "<input type=\"text\" class=\"{class}\" id=\"{id}\" value=\"{}\"{size}>",
                escape_attr(text)
            ));
        }
        (ControlKind::InputGrid { width, .. }, ControlValue::Grid(rows)) => {
            let size = width.map(|w| format!(" size=\"{w}\"")).unwrap_or_default();
            html.push_str(&format!("<table class=\"{class}\" id=\"{id}\">"));
            for (r, row) in rows.iter().enumerate() {
                html.push_str("<tr>");
                for (c, cell) in row.iter().enumerate() {
                    html.push_str(&format!(
                        "<td><input type=\"text\" id=\"{id}-{r}-{c}\" value=\"{}\"{size}></td>",
                        escape_attr(cell)
                    ));
                }
                html.push_str("</tr>");
            }
            html.push_str("</table>");
        }
        (
            ControlKind::Selector {
                labels,
                buttons: None,
                ..
            },
            ControlValue::Index(selected),
        ) => {
            html.push_str(&format!("<select class=\"{class}\" id=\"{id}\">"));
            for (i, label) in labels.iter().enumerate() {
                let sel = if i == *selected { " selected" } else { "" };
                html.push_str(&format!(
                    "<option value=\"{i}\"{sel}>{}</option>",
                    escape_html(label)
                ));
            }
            html.push_str("</select>");
        }
        (
            ControlKind::Selector {
                labels,
                buttons: Some((_, ncols)),
                width,
                ..
            },
            ControlValue::Index(selected),
        ) => {
            let style = width
                .as_ref()
                .map(|w| format!(" style=\"width:{}\"", escape_attr(w)))
                .unwrap_or_default();
            html.push_str(&format!("<div class=\"{class} selector-buttons\" id=\"{id}\">"));
            for (i, label) in labels.iter().enumerate() {
                if i > 0 && i % ncols == 0 {
                    html.push_str("<br>");
                }
                let sel = if i == *selected { " selected" } else { "" };
                html.push_str(&format!(
                    "<button type=\"button\" class=\"{class}{sel}\" data-index=\"{i}\"{style}>{}</button>",
                    escape_html(label)
                ));
            }
            html.push_str("</div>");
        }
        (ControlKind::Slider(SliderKind::Value { labels, .. }), ControlValue::Index(selected)) => {
            html.push_str(&format!(
                "<input type=\"range\" class=\"{class}\" id=\"{id}\" min=\"0\" max=\"{}\" step=\"1\" value=\"{selected}\">",
                labels.len().saturating_sub(1)
            ));
            if let Some(label) = labels.get(*selected) {
                html.push_str(&format!(
                    "<span class=\"slider-label\" id=\"{id}-label\">{}</span>",
                    escape_html(label)
                ));
            }
        }
        (
            ControlKind::Slider(SliderKind::Continuous { min, max, step, .. }),
            ControlValue::Number(n),
        ) => {
            html.push_str(&format!(
                "<input type=\"range\" class=\"{class}\" id=\"{id}\" min=\"{min}\" max=\"{max}\" step=\"{step}\" value=\"{n}\">"
            ));
        }
        _ => {}
    }

    html
}
