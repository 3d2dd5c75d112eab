//! Declared stage parameters and their constraints.

use serde_json::Value;
use std::fmt;

/// The type constraint of a stage parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    /// Any string.
    String,
    /// A boolean (`true/false`, `yes/no`, `on/off`, `1/0`).
    Bool,
    /// A signed integer.
    Integer,
    /// A floating point number.
    Float,
    /// One of a fixed set of strings.
    Choice(Vec<String>),
    /// Arbitrary JSON; unparsable text is kept as a string.
    Json,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Bool => write!(f, "bool"),
            Self::Integer => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Choice(choices) => write!(f, "one of {{{}}}", choices.join(", ")),
            Self::Json => write!(f, "json"),
        }
    }
}

/// A parameter accepted by a stage constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    /// The keyword.
    pub key: String,
    /// Help text shown by `--pipeline-help`.
    pub help: String,
    /// The type constraint.
    pub kind: ParamKind,
    /// Whether the parameter must be supplied.
    pub required: bool,
    /// Value used when an optional parameter is omitted.
    pub default: Option<Value>,
}

impl ParamSpec {
    /// Creates a required parameter.
    #[must_use]
    pub fn required(key: impl Into<String>, help: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            key: key.into(),
            help: help.into(),
            kind,
            required: true,
            default: None,
        }
    }

    /// Creates an optional parameter without default.
    #[must_use]
    pub fn optional(key: impl Into<String>, help: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            required: false,
            ..Self::required(key, help, kind)
        }
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Converts a command line string into a typed value.
    ///
    /// # Errors
    ///
    /// Returns a description of the violated constraint.
    pub fn evaluate(&self, raw: &str) -> Result<Value, String> {
        match &self.kind {
            ParamKind::String => Ok(Value::String(raw.to_string())),
            ParamKind::Bool => parse_bool(raw)
                .map(Value::Bool)
                .ok_or_else(|| format!("'{raw}' is not a boolean")),
            ParamKind::Integer => raw
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("'{raw}' is not an integer")),
            ParamKind::Float => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("'{raw}' is not a number")),
            ParamKind::Choice(choices) => {
                if choices.iter().any(|choice| choice == raw) {
                    Ok(Value::String(raw.to_string()))
                } else {
                    Err(format!("'{raw}' is not one of {{{}}}", choices.join(", ")))
                }
            }
            ParamKind::Json => {
                Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
            }
        }
    }

    /// Validates a value supplied in a pipeline specification.
    ///
    /// Strings are evaluated like command line values so that specifications
    /// may quote numbers and booleans.
    ///
    /// # Errors
    ///
    /// Returns a description of the violated constraint.
    pub fn check(&self, value: &Value) -> Result<Value, String> {
        if let Value::String(raw) = value {
            return self.evaluate(raw);
        }
        let accepted = match &self.kind {
            ParamKind::String => value.is_number() || value.is_boolean(),
            ParamKind::Bool => value.is_boolean(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Float => value.is_number(),
            ParamKind::Choice(_) => false,
            ParamKind::Json => true,
        };
        if !accepted {
            return Err(format!("{value} is not a valid {}", self.kind));
        }
        if self.kind == ParamKind::String {
            return Ok(Value::String(value.to_string()));
        }
        Ok(value.clone())
    }

    /// Renders the help entry for element `name`.
    #[must_use]
    pub fn render(&self, name: &str) -> String {
        let optional = if self.required {
            String::new()
        } else {
            let default = self
                .default
                .as_ref()
                .map_or_else(|| "None".to_string(), ToString::to_string);
            format!(" (optional, default: {default})")
        };
        format!(
            "{name}.{key}{optional}\n    [{kind}] {help}",
            key = self.key,
            kind = self.kind,
            help = self.help
        )
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
