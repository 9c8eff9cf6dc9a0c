//! Control declarations and their current values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use singlecell_core::error::{Result, SingleCellError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlType {
    Html,
    Checkbox,
    InputBox,
    InputGrid,
    Selector,
    Slider,
}

impl ControlType {
    fn parse(tag: &str) -> Option<Self> {
        Some(match tag {
            "html" => Self::Html,
            "checkbox" => Self::Checkbox,
            "input_box" => Self::InputBox,
            "input_grid" => Self::InputGrid,
            "selector" => Self::Selector,
            "slider" => Self::Slider,
            _ => return None,
        })
    }

    /// Whether values are interpolated unquoted when the declaration doesn't say.
    pub fn default_raw(self) -> bool {
        matches!(self, Self::Checkbox | Self::InputGrid | Self::Slider)
    }
}

/// UI event a control subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Change,
    /// End of a drag gesture; continuous sliders only fire on release.
    DragEnd,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SliderKind {
    /// Discrete index into `values`; the reported value is the label at that index.
    Value {
        values: Vec<String>,
        labels: Vec<String>,
        default: usize,
    },
    Continuous {
        min: f64,
        max: f64,
        step: f64,
        default: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlKind {
    Html {
        template: String,
        default: String,
    },
    Checkbox {
        default: bool,
    },
    InputBox {
        default: String,
        width: Option<u64>,
    },
    InputGrid {
        nrows: usize,
        ncols: usize,
        default: Vec<Vec<String>>,
        width: Option<u64>,
    },
    Selector {
        values: Vec<String>,
        labels: Vec<String>,
        default: usize,
        /// Button-grid layout as `(nrows, ncols)`; `None` renders a dropdown.
        buttons: Option<(usize, usize)>,
        width: Option<String>,
    },
    Slider(SliderKind),
}

/// One declared input widget.
#[derive(Debug, Clone, PartialEq)]
pub struct Control {
    pub name: String,
    pub label: Option<String>,
    pub raw: bool,
    pub kind: ControlKind,
}

/// The current value of a control, as edited by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ControlValue {
    Bool(bool),
    Text(String),
    Grid(Vec<Vec<String>>),
    Index(usize),
    Number(f64),
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn text_list(value: Option<&Value>) -> Option<Vec<String>> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().map(value_text).collect())
}

fn positive(value: Option<&Value>) -> Option<usize> {
    value
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n > 0)
}

/// Resolve the `(nrows, ncols)` of a button grid from whatever the declaration provides.
fn button_grid(len: usize, nrows: Option<usize>, ncols: Option<usize>) -> (usize, usize) {
    let len = len.max(1);
    let nrows = match (nrows, ncols) {
        (Some(r), _) => r,
        (None, Some(c)) => len.div_ceil(c),
        (None, None) => 1,
    };
    let ncols = ncols.unwrap_or_else(|| len.div_ceil(nrows));
    (nrows, ncols)
}

fn invalid(control: &str, reason: impl Into<String>) -> SingleCellError {
    SingleCellError::InvalidValue {
        control: control.to_string(),
        reason: reason.into(),
    }
}

impl Control {
    /// Decode one entry of an `interact_prepare` `controls` object.
    pub fn from_declaration(name: &str, decl: &Value) -> Result<Self> {
        let tag = decl
            .get("control_type")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(name, "missing control_type"))?;
        let control_type = ControlType::parse(tag)
            .ok_or_else(|| invalid(name, format!("unknown control_type '{tag}'")))?;

        let default = decl.get("default");
        let width = decl.get("width").and_then(Value::as_u64);

        let kind = match control_type {
            ControlType::Html => ControlKind::Html {
                template: decl
                    .get("html")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                default: default.map(value_text).unwrap_or_default(),
            },
            ControlType::Checkbox => ControlKind::Checkbox {
                default: default.and_then(Value::as_bool).unwrap_or(true),
            },
            ControlType::InputBox => ControlKind::InputBox {
                default: default.map(value_text).unwrap_or_default(),
                width,
            },
            ControlType::InputGrid => {
                let nrows = positive(decl.get("nrows")).unwrap_or(1);
                let ncols = positive(decl.get("ncols")).unwrap_or(1);
                let mut default: Vec<Vec<String>> = match default {
                    Some(Value::Array(rows)) => rows
                        .iter()
                        .map(|row| text_list(Some(row)).unwrap_or_default())
                        .collect(),
                    Some(scalar) => vec![vec![value_text(scalar); ncols]; nrows],
                    None => vec![vec!["0".to_string(); ncols]; nrows],
                };
                if default.len() != nrows || default.iter().any(|row| row.len() != ncols) {
                    warn!(
                        control = name,
                        nrows,
                        ncols,
                        "Grid default has the wrong shape, padding"
                    );
                    default.resize(nrows, Vec::new());
                    for row in &mut default {
                        row.resize(ncols, "0".to_string());
                    }
                }
                ControlKind::InputGrid {
                    nrows,
                    ncols,
                    default,
                    width,
                }
            }
            ControlType::Selector => {
                let labels = text_list(decl.get("value_labels"));
                let values = text_list(decl.get("values"))
                    .or_else(|| {
                        labels
                            .as_ref()
                            .map(|l| (0..l.len()).map(|i| i.to_string()).collect())
                    })
                    .unwrap_or_default();
                if values.is_empty() {
                    warn!(control = name, "Selector declares no values");
                }
                let labels = labels
                    .filter(|l| l.len() == values.len())
                    .unwrap_or_else(|| values.clone());
                let index = default
                    .and_then(Value::as_u64)
                    .and_then(|d| usize::try_from(d).ok())
                    .filter(|d| *d < values.len())
                    .unwrap_or(0);
                let buttons = decl
                    .get("buttons")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                    .then(|| {
                        button_grid(
                            values.len(),
                            positive(decl.get("nrows")),
                            positive(decl.get("ncols")),
                        )
                    });
                ControlKind::Selector {
                    values,
                    labels,
                    default: index,
                    buttons,
                    width: decl
                        .get("width")
                        .map(value_text)
                        .filter(|w| !w.is_empty()),
                }
            }
            ControlType::Slider => ControlKind::Slider(Self::decode_slider(name, decl)),
        };

        Ok(Self {
            name: name.to_string(),
            label: decl
                .get("label")
                .and_then(Value::as_str)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
            raw: decl
                .get("raw")
                .and_then(Value::as_bool)
                .unwrap_or_else(|| control_type.default_raw()),
            kind,
        })
    }

    /// Decode a slider. Anything other than `"value"` is treated as continuous.
    fn decode_slider(name: &str, decl: &Value) -> SliderKind {
        let subtype = decl.get("subtype").and_then(Value::as_str).unwrap_or("continuous");
        match subtype {
            "value" => {
                let values = text_list(decl.get("values")).unwrap_or_default();
                if values.is_empty() {
                    warn!(control = name, "Value slider declares no values");
                }
                let labels = text_list(decl.get("value_labels"))
                    .filter(|l| l.len() == values.len())
                    .unwrap_or_else(|| values.clone());
                let default = decl
                    .get("default")
                    .and_then(Value::as_u64)
                    .and_then(|d| usize::try_from(d).ok())
                    .filter(|d| *d < values.len())
                    .unwrap_or(0);
                SliderKind::Value {
                    values,
                    labels,
                    default,
                }
            }
            subtype => {
                if subtype != "continuous" {
                    warn!(control = name, subtype, "Unknown slider subtype, using continuous");
                }
                let range = decl.get("range").and_then(Value::as_array);
                let bound = |i: usize, fallback: f64| {
                    range
                        .and_then(|r| r.get(i))
                        .and_then(Value::as_f64)
                        .unwrap_or(fallback)
                };
                let (mut min, mut max) = (bound(0, 0.0), bound(1, 100.0));
                if min > max {
                    warn!(control = name, min, max, "Slider range is reversed");
                    std::mem::swap(&mut min, &mut max);
                }
                let step = decl
                    .get("step")
                    .and_then(Value::as_f64)
                    .filter(|s| *s > 0.0)
                    .unwrap_or(1.0);
                let default = decl
                    .get("default")
                    .and_then(Value::as_f64)
                    .unwrap_or(min)
                    .clamp(min, max);
                SliderKind::Continuous {
                    min,
                    max,
                    step,
                    default,
                }
            }
        }
    }

    pub fn control_type(&self) -> ControlType {
        match &self.kind {
            ControlKind::Html { .. } => ControlType::Html,
            ControlKind::Checkbox { .. } => ControlType::Checkbox,
            ControlKind::InputBox { .. } => ControlType::InputBox,
            ControlKind::InputGrid { .. } => ControlType::InputGrid,
            ControlKind::Selector { .. } => ControlType::Selector,
            ControlKind::Slider(_) => ControlType::Slider,
        }
    }

    /// The event that makes this control resubmit.
    pub fn trigger(&self) -> EventKind {
        match &self.kind {
            ControlKind::Slider(SliderKind::Continuous { .. }) => EventKind::DragEnd,
            _ => EventKind::Change,
        }
    }

    pub fn default_value(&self) -> ControlValue {
        match &self.kind {
            ControlKind::Html { default, .. } => ControlValue::Text(default.clone()),
            ControlKind::Checkbox { default } => ControlValue::Bool(*default),
            ControlKind::InputBox { default, .. } => ControlValue::Text(default.clone()),
            ControlKind::InputGrid { default, .. } => ControlValue::Grid(default.clone()),
            ControlKind::Selector { default, .. } => ControlValue::Index(*default),
            ControlKind::Slider(SliderKind::Value { default, .. }) => ControlValue::Index(*default),
            ControlKind::Slider(SliderKind::Continuous { default, .. }) => {
                ControlValue::Number(*default)
            }
        }
    }

    /// Check that `value` is something this control can hold.
    pub fn validate(&self, value: &ControlValue) -> Result<()> {
        match (&self.kind, value) {
            (ControlKind::Html { .. }, _) => Err(invalid(&self.name, "html controls are static")),
            (ControlKind::Checkbox { .. }, ControlValue::Bool(_)) => Ok(()),
            (ControlKind::InputBox { .. }, ControlValue::Text(_)) => Ok(()),
            (ControlKind::InputGrid { nrows, ncols, .. }, ControlValue::Grid(rows)) => {
                if rows.len() == *nrows && rows.iter().all(|r| r.len() == *ncols) {
                    Ok(())
                } else {
                    Err(invalid(&self.name, format!("expected a {nrows}x{ncols} grid")))
                }
            }
            (ControlKind::Selector { values, .. }, ControlValue::Index(i))
            | (ControlKind::Slider(SliderKind::Value { values, .. }), ControlValue::Index(i)) => {
                if *i < values.len() {
                    Ok(())
                } else {
                    Err(invalid(&self.name, format!("index {i} out of range")))
                }
            }
            (
                ControlKind::Slider(SliderKind::Continuous { min, max, .. }),
                ControlValue::Number(n),
            ) => {
                if n.is_finite() && (*min..=*max).contains(n) {
                    Ok(())
                } else {
                    Err(invalid(&self.name, format!("{n} outside [{min}, {max}]")))
                }
            }
            (_, other) => Err(invalid(
                &self.name,
                format!("{other:?} does not fit a {:?} control", self.control_type()),
            )),
        }
    }
}
