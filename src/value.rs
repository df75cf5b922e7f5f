//! Typed register values and their SCPI text representation.

use core::fmt;

use serde::{Deserialize, Serialize};

/// How a register's value is represented on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    /// `0`/`1`, also accepts `ON`/`OFF` in replies.
    Bool,
    /// Integer text.
    IntDecimal,
    /// Fixed-point text with the given number of decimals.
    Float(u8),
    /// Free keyword, upper-cased. An empty choice list accepts any keyword.
    EnumString(&'static [&'static str]),
    /// One of a fixed group of choices, e.g. the `5`/`30` A current ranges.
    RadioGroup(&'static [&'static str]),
}

/// A cached register value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypedValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl TypedValue {
    /// Numeric view of the value. Text is parsed, e.g. a `"30"` range choice.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            TypedValue::Int(i) => Some(*i as f64),
            TypedValue::Float(f) => Some(*f),
            TypedValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Bool(b) => Some(*b),
            TypedValue::Text(s) => parse_bool(s),
            other => other.as_f64().map(|v| v != 0.0),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TypedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the value is on the non-zero side of the zero boundary.
    pub fn is_nonzero(&self) -> bool {
        match self {
            TypedValue::Text(s) => !s.is_empty() && s.trim().parse::<f64>().map_or(true, |v| v != 0.0),
            other => other.as_f64().is_some_and(|v| v != 0.0),
        }
    }

    /// Case-insensitive comparison against a keyword; booleans match `1`/`ON`.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        match self {
            TypedValue::Text(s) => s.eq_ignore_ascii_case(keyword),
            TypedValue::Bool(b) => parse_bool(keyword) == Some(*b),
            other => other.as_f64() == keyword.parse().ok(),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Bool(b) => write!(f, "{}", b),
            TypedValue::Int(i) => write!(f, "{}", i),
            TypedValue::Float(v) => write!(f, "{}", v),
            TypedValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for TypedValue {
    fn from(value: bool) -> Self {
        TypedValue::Bool(value)
    }
}

impl From<i64> for TypedValue {
    fn from(value: i64) -> Self {
        TypedValue::Int(value)
    }
}

impl From<f64> for TypedValue {
    fn from(value: f64) -> Self {
        TypedValue::Float(value)
    }
}

impl From<&str> for TypedValue {
    fn from(value: &str) -> Self {
        TypedValue::Text(value.to_owned())
    }
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: u8) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round() / scale
}

fn parse_bool(text: &str) -> Option<bool> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("ON") || text.eq_ignore_ascii_case("TRUE") {
        Some(true)
    } else if text.eq_ignore_ascii_case("OFF") || text.eq_ignore_ascii_case("FALSE") {
        Some(false)
    } else {
        text.parse::<f64>().ok().map(|v| v != 0.0)
    }
}

/// Find the declared choice matching `text`, comparing numerically when both parse as numbers.
fn canonical_choice(choices: &'static [&'static str], text: &str) -> Option<&'static str> {
    let text = text.trim();
    choices.iter().copied().find(|choice| {
        choice.eq_ignore_ascii_case(text)
            || matches!(
                (choice.parse::<f64>(), text.parse::<f64>()),
                (Ok(a), Ok(b)) if a == b
            )
    })
}

impl ValueKind {
    /// Interpret a query reply. Returns `None` if the reply doesn't fit this kind.
    pub fn parse(self, reply: &str) -> Option<TypedValue> {
        let reply = reply.trim();
        match self {
            ValueKind::Bool => parse_bool(reply).map(TypedValue::Bool),
            ValueKind::IntDecimal => reply
                .parse::<f64>()
                .ok()
                .map(|v| TypedValue::Int(v.round() as i64)),
            ValueKind::Float(decimals) => reply
                .parse::<f64>()
                .ok()
                .map(|v| TypedValue::Float(round_to(v, decimals))),
            ValueKind::EnumString(_) => Some(TypedValue::Text(reply.to_ascii_uppercase())),
            ValueKind::RadioGroup(choices) => Some(TypedValue::Text(
                canonical_choice(choices, reply)
                    .map(str::to_owned)
                    .unwrap_or_else(|| reply.to_ascii_uppercase()),
            )),
        }
    }

    /// Convert a caller-supplied value into this kind.
    ///
    /// Returns `None` if no sensible conversion exists, e.g. text for a float register or a
    /// keyword outside the declared choices.
    pub fn coerce(self, value: &TypedValue) -> Option<TypedValue> {
        match self {
            ValueKind::Bool => value.as_bool().map(TypedValue::Bool),
            ValueKind::IntDecimal => match value {
                TypedValue::Text(_) => None,
                other => other.as_f64().map(|v| TypedValue::Int(v.round() as i64)),
            },
            ValueKind::Float(decimals) => match value {
                TypedValue::Text(_) => None,
                other => other
                    .as_f64()
                    .filter(|v| v.is_finite())
                    .map(|v| TypedValue::Float(round_to(v, decimals))),
            },
            ValueKind::EnumString(choices) => {
                let text = value.to_string().to_ascii_uppercase();
                if choices.is_empty() {
                    Some(TypedValue::Text(text))
                } else {
                    canonical_choice(choices, &text).map(|c| TypedValue::Text(c.to_owned()))
                }
            }
            ValueKind::RadioGroup(choices) => {
                let text = match value {
                    TypedValue::Text(s) => s.clone(),
                    other => other.to_string(),
                };
                canonical_choice(choices, &text).map(|c| TypedValue::Text(c.to_owned()))
            }
        }
    }

    /// Render a value as the argument of a SCPI write.
    pub fn format(self, value: &TypedValue) -> String {
        match self {
            ValueKind::Bool => {
                if value.as_bool().unwrap_or(false) {
                    "1".to_owned()
                } else {
                    "0".to_owned()
                }
            }
            ValueKind::IntDecimal => format!("{}", value.as_f64().unwrap_or(0.0).round() as i64),
            ValueKind::Float(decimals) => {
                let rounded = round_to(value.as_f64().unwrap_or(0.0), decimals);
                format!("{:.*}", decimals as usize, rounded)
            }
            ValueKind::EnumString(_) | ValueKind::RadioGroup(_) => {
                value.to_string().to_ascii_uppercase()
            }
        }
    }

    /// Whether two values would be written identically, i.e. are equal within declared precision.
    pub fn same_on_wire(self, a: &TypedValue, b: &TypedValue) -> bool {
        self.format(a) == self.format(b)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ValueKind::IntDecimal | ValueKind::Float(_))
    }
}
