//! Field selectors and JSON path extraction.
//!
//! Field selectors constrain objects by the string form of a dotted field
//! path (`status.phase=Running`). The same [`extract`] routine that powers
//! in-process filtering also materializes declared indexed fields into
//! their `field_*` columns at write time.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};
use thiserror::Error;

/// The comparison a [`FieldRequirement`] performs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum FieldOperator {
    /// Field must equal the value
    Equal,
    /// Field must not equal the value
    NotEqual,
}

/// One `path<op>value` term of a field selector
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldRequirement {
    /// Dotted path into the object, e.g. `status.phase` or `metadata.name`
    pub path: String,
    /// Equality or inequality
    pub operator: FieldOperator,
    /// The value compared against the field's string form
    pub value: String,
}

/// A conjunction of field requirements.
///
/// Supports `=`, `==` and `!=`, comma separated: `a=b,c!=d`.
#[derive(Clone, Debug, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct FieldSelector(Vec<FieldRequirement>);

/// A field selector term failed to parse
#[derive(Debug, Error)]
#[error("failed to parse field selector term: {0}")]
pub struct ParseFieldError(pub String);

impl FieldSelector {
    /// Indicates whether this selector matches everything
    pub fn selects_all(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the contained requirements
    pub fn iter(&self) -> impl Iterator<Item = &FieldRequirement> {
        self.0.iter()
    }

    /// Evaluate against the serialized form of an object
    pub fn matches(&self, object: &Value) -> bool {
        self.0.iter().all(|req| {
            let actual = extract(object, &req.path);
            match req.operator {
                FieldOperator::Equal => actual.as_deref() == Some(req.value.as_str()),
                FieldOperator::NotEqual => actual.as_deref() != Some(req.value.as_str()),
            }
        })
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        for req in &self.0 {
            let op = match req.operator {
                FieldOperator::Equal => "=",
                FieldOperator::NotEqual => "!=",
            };
            write!(f, "{sep}{}{op}{}", req.path, req.value)?;
            sep = ",";
        }
        Ok(())
    }
}

impl FromStr for FieldSelector {
    type Err = ParseFieldError;

    fn from_str(selector: &str) -> Result<Self, Self::Err> {
        if selector.trim().is_empty() {
            return Ok(Self::default());
        }
        selector
            .split(',')
            .map(|term| {
                let term = term.trim();
                if let Some((path, value)) = term.split_once("!=") {
                    Ok(FieldRequirement {
                        path: path.trim().into(),
                        operator: FieldOperator::NotEqual,
                        value: value.trim().into(),
                    })
                } else if let Some((path, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
                    Ok(FieldRequirement {
                        path: path.trim().into(),
                        operator: FieldOperator::Equal,
                        value: value.trim().into(),
                    })
                } else {
                    Err(ParseFieldError(term.to_string()))
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(FieldSelector)
    }
}

/// Extract the string form of a dotted path from a serialized object.
///
/// Strings are returned as-is; numbers and booleans via their display form.
/// Missing paths, nulls, and composite values yield `None`.
pub fn extract(object: &Value, path: &str) -> Option<String> {
    let mut cur = object;
    for segment in path.split('.') {
        cur = cur.get(segment)?;
    }
    match cur {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
