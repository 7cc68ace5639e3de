// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Value matchers used by crash signatures stored in the signature cache.

use std::fmt;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("Error in regular expression: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("Unknown match operator specified: {0}")]
    UnknownOperator(String),

    #[error("Invalid number specified: {0}")]
    InvalidNumber(String),

    #[error("Expected key {0} to be of type string")]
    MissingValue(&'static str),

    #[error("Invalid type {0} in NumberMatch.")]
    InvalidType(String),
}

/// Substring or regular expression match against a string.
#[derive(Clone, Debug)]
pub struct StringMatch {
    value: String,
    pattern: Option<Regex>,
}

impl StringMatch {
    /// Builds a matcher from its JSON form: either a plain string (`/re/`
    /// meaning a regular expression) or `{"value": .., "matchType": ..}`.
    pub fn new(obj: &Value) -> Result<Self, MatcherError> {
        match obj {
            Value::String(value) => Self::from_short_form(value),
            Value::Object(map) => {
                let value = map
                    .get("value")
                    .and_then(Value::as_str)
                    .ok_or(MatcherError::MissingValue("value"))?;

                match map.get("matchType").and_then(Value::as_str) {
                    None => Ok(Self::contains(value)),
                    Some(kind) if kind.eq_ignore_ascii_case("contains") => {
                        Ok(Self::contains(value))
                    }
                    Some(kind) if kind.eq_ignore_ascii_case("pcre") => Self::pcre(value),
                    Some(kind) => Err(MatcherError::UnknownOperator(kind.to_string())),
                }
            }
            _ => Err(MatcherError::MissingValue("value")),
        }
    }

    /// `/re/` is a PCRE matcher, anything else a substring matcher. A lone
    /// `/` both starts and ends with a slash and means the empty PCRE.
    pub fn from_short_form(value: &str) -> Result<Self, MatcherError> {
        if value.starts_with('/') && value.ends_with('/') {
            let inner = value.get(1..value.len() - 1).unwrap_or_default();
            Self::pcre(inner)
        } else {
            Ok(Self::contains(value))
        }
    }

    pub fn contains(value: &str) -> Self {
        Self {
            value: value.to_string(),
            pattern: None,
        }
    }

    pub fn pcre(value: &str) -> Result<Self, MatcherError> {
        Ok(Self {
            value: value.to_string(),
            pattern: Some(Regex::new(value)?),
        })
    }

    pub fn is_pcre(&self) -> bool {
        self.pattern.is_some()
    }

    pub fn matches(&self, val: &str) -> bool {
        match &self.pattern {
            Some(pattern) => pattern.is_match(val),
            None => val.contains(&self.value),
        }
    }
}

impl fmt::Display for StringMatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_pcre() {
            write!(f, "/{}/", self.value)
        } else {
            write!(f, "{}", self.value)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumberMatchType {
    Eq,
    Ge,
    Gt,
    Le,
    Lt,
}

/// Comparison against an (optional) number, e.g. a crash address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NumberMatch {
    match_type: NumberMatchType,
    value: Option<u64>,
}

impl NumberMatch {
    /// Builds a matcher from `"[op] hexnumber"`, an integer, or the empty
    /// string (matching the absence of a value).
    pub fn new(obj: &Value) -> Result<Self, MatcherError> {
        match obj {
            Value::String(expr) => Self::parse(expr),
            Value::Number(number) => {
                let value = number
                    .as_u64()
                    .ok_or_else(|| MatcherError::InvalidNumber(number.to_string()))?;
                Ok(Self {
                    match_type: NumberMatchType::Eq,
                    value: Some(value),
                })
            }
            other => Err(MatcherError::InvalidType(json_type(other).to_string())),
        }
    }

    pub fn parse(expr: &str) -> Result<Self, MatcherError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(Self {
                match_type: NumberMatchType::Eq,
                value: None,
            });
        }

        let (match_type, number) = match expr.split_once(char::is_whitespace) {
            Some((op, number)) => {
                let match_type = match op {
                    "==" => NumberMatchType::Eq,
                    "<" => NumberMatchType::Lt,
                    "<=" => NumberMatchType::Le,
                    ">" => NumberMatchType::Gt,
                    ">=" => NumberMatchType::Ge,
                    _ => return Err(MatcherError::UnknownOperator(op.to_string())),
                };
                (match_type, number.trim())
            }
            None => (NumberMatchType::Eq, expr),
        };

        let digits = number
            .strip_prefix("0x")
            .or_else(|| number.strip_prefix("0X"))
            .unwrap_or(number);
        let value = u64::from_str_radix(digits, 16)
            .map_err(|_| MatcherError::InvalidNumber(number.to_string()))?;

        Ok(Self {
            match_type,
            value: Some(value),
        })
    }

    pub fn matches(&self, value: Option<u64>) -> bool {
        let (value, expected) = match (value, self.value) {
            (Some(value), Some(expected)) => (value, expected),
            (value, expected) => return value.is_none() && expected.is_none(),
        };

        match self.match_type {
            NumberMatchType::Eq => value == expected,
            NumberMatchType::Ge => value >= expected,
            NumberMatchType::Gt => value > expected,
            NumberMatchType::Le => value <= expected,
            NumberMatchType::Lt => value < expected,
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
