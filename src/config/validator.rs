//! Known configuration keys and value validation.

use std::ops::RangeInclusive;

use serde_json::Value;

use super::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Integer,
    Boolean,
}

impl ValueType {
    fn name(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Boolean => "boolean",
        }
    }
}

#[derive(Debug)]
pub struct KeySpec {
    pub key: &'static str,
    pub value_type: ValueType,
    pub default: Option<DefaultValue>,
    pub range: Option<RangeInclusive<i64>>,
    pub choices: &'static [&'static str],
    /// Encrypted at rest and redacted when listed.
    pub sensitive: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum DefaultValue {
    Str(&'static str),
    Int(i64),
    Bool(bool),
}

impl DefaultValue {
    pub fn to_value(self) -> Value {
        match self {
            DefaultValue::Str(s) => Value::from(s),
            DefaultValue::Int(n) => Value::from(n),
            DefaultValue::Bool(b) => Value::from(b),
        }
    }
}

const fn string(key: &'static str, default: &'static str) -> KeySpec {
    KeySpec {
        key,
        value_type: ValueType::String,
        default: Some(DefaultValue::Str(default)),
        range: None,
        choices: &[],
        sensitive: false,
    }
}

const fn choice(key: &'static str, default: &'static str, choices: &'static [&'static str]) -> KeySpec {
    KeySpec {
        choices,
        ..string(key, default)
    }
}

const fn integer(key: &'static str, default: i64, min: i64, max: i64) -> KeySpec {
    KeySpec {
        key,
        value_type: ValueType::Integer,
        default: Some(DefaultValue::Int(default)),
        range: Some(min..=max),
        choices: &[],
        sensitive: false,
    }
}

const fn boolean(key: &'static str, default: bool) -> KeySpec {
    KeySpec {
        key,
        value_type: ValueType::Boolean,
        default: Some(DefaultValue::Bool(default)),
        range: None,
        choices: &[],
        sensitive: false,
    }
}

const fn secret(key: &'static str) -> KeySpec {
    KeySpec {
        key,
        value_type: ValueType::String,
        default: None,
        range: None,
        choices: &[],
        sensitive: true,
    }
}

pub static KNOWN_KEYS: &[KeySpec] = &[
    string("model", "claude-sonnet-4-5-20250929"),
    choice("logLevel", "info", &["trace", "debug", "info", "warn", "error"]),
    choice("sandboxMode", "auto", &["auto", "container", "subprocess"]),
    string("sandboxImage", crate::sandbox::DEFAULT_IMAGE),
    integer("sandboxTimeoutMs", 30_000, 1, 600_000),
    integer("sandboxMemoryLimitMb", 512, 16, 65_536),
    boolean("sandboxNetworkEnabled", false),
    integer("contextMaxTokens", 100_000, 1, 10_000_000),
    integer("sessionMaxAgeDays", 30, 1, 36_500),
    integer("sessionMaxSessions", 100, 1, 1_000_000),
    integer("checkpointMaxOperations", 100, 1, 100_000),
    secret("apiKey"),
    secret("refreshToken"),
];

pub fn key_spec(key: &str) -> ConfigResult<&'static KeySpec> {
    KNOWN_KEYS
        .iter()
        .find(|spec| spec.key == key)
        .ok_or_else(|| ConfigError::UnknownKey {
            key: key.to_string(),
        })
}

impl KeySpec {
    fn invalid(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            key: self.key.to_string(),
            message: message.into(),
        }
    }

    pub fn default_value(&self) -> Option<Value> {
        self.default.map(DefaultValue::to_value)
    }

    /// Checks type, range and allowed values. `Null` passes through and
    /// means "unset".
    pub fn validate(&self, value: Value) -> ConfigResult<Value> {
        if value.is_null() {
            return Ok(value);
        }
        match self.value_type {
            ValueType::String => {
                let Some(s) = value.as_str() else {
                    return Err(self.invalid(format!("expected {}", self.value_type.name())));
                };
                if !self.choices.is_empty() && !self.choices.contains(&s) {
                    return Err(self.invalid(format!(
                        "'{}' is not one of {}",
                        s,
                        self.choices.join(", ")
                    )));
                }
            }
            ValueType::Integer => {
                let Some(n) = value.as_i64() else {
                    return Err(self.invalid(format!("expected {}", self.value_type.name())));
                };
                if let Some(range) = &self.range
                    && !range.contains(&n)
                {
                    return Err(self.invalid(format!(
                        "{} is outside {}..={}",
                        n,
                        range.start(),
                        range.end()
                    )));
                }
            }
            ValueType::Boolean => {
                if !value.is_boolean() {
                    return Err(self.invalid(format!("expected {}", self.value_type.name())));
                }
            }
        }
        Ok(value)
    }

    /// Parses a raw string, as read from the environment, then validates it.
    pub fn parse(&self, raw: &str) -> ConfigResult<Value> {
        let raw = raw.trim();
        let value = match self.value_type {
            ValueType::String => Value::from(raw),
            ValueType::Integer => raw
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| self.invalid(e.to_string()))?,
            ValueType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Value::Bool(true),
                "0" | "false" | "no" | "off" => Value::Bool(false),
                other => return Err(self.invalid(format!("'{}' is not a boolean", other))),
            },
        };
        self.validate(value)
    }
}
