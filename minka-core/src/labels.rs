//! Label selectors and their string form.
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    iter::FromIterator,
    str::FromStr,
};
use thiserror::Error;

// local type aliases
type Map = BTreeMap<String, String>;
type Expressions = Vec<Expression>;

/// A selector expression with existing operations
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Expression {
    /// Key must have one of the listed values
    In(String, BTreeSet<String>),
    /// Key must not have any of the listed values
    NotIn(String, BTreeSet<String>),
    /// Key must have this value
    Equal(String, String),
    /// Key must not have this value
    NotEqual(String, String),
    /// Key must exist
    Exists(String),
    /// Key must not exist
    DoesNotExist(String),
}

/// Perform selection on a list of expressions
///
/// Parse one from its Kubernetes string form with [`FromStr`]:
///
/// ```
/// use minka_core::labels::Selector;
/// let sel: Selector = "app=web,tier in (frontend,cache),!legacy".parse().unwrap();
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct Selector(Expressions);

/// A selector term failed to parse
#[derive(Debug, Error)]
#[error("failed to parse selector expression: {0}")]
pub struct ParseExpressionError(pub String);

impl Selector {
    /// Create a selector from a vector of expressions
    fn from_expressions(exprs: Expressions) -> Self {
        Self(exprs)
    }

    /// Create a selector from a map of key=value label matches
    fn from_map(map: Map) -> Self {
        Self(map.into_iter().map(|(k, v)| Expression::Equal(k, v)).collect())
    }

    /// Indicates whether this selector matches everything
    pub fn selects_all(&self) -> bool {
        self.0.is_empty()
    }

    /// Evaluate the selector against a label map
    pub fn matches(&self, labels: &Map) -> bool {
        self.0.iter().all(|expr| expr.matches(labels))
    }

    /// Iterate over the contained expressions
    pub fn iter(&self) -> impl Iterator<Item = &Expression> {
        self.0.iter()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        for expr in &self.0 {
            write!(f, "{sep}{expr}")?;
            sep = ",";
        }
        Ok(())
    }
}

// === Expression ===

impl Expression {
    /// The label key this expression constrains
    pub fn key(&self) -> &str {
        match self {
            Expression::In(key, _)
            | Expression::NotIn(key, _)
            | Expression::Equal(key, _)
            | Expression::NotEqual(key, _)
            | Expression::Exists(key)
            | Expression::DoesNotExist(key) => key,
        }
    }

    fn matches(&self, labels: &Map) -> bool {
        match self {
            Expression::In(key, values) => match labels.get(key) {
                Some(v) => values.contains(v),
                None => false,
            },
            Expression::NotIn(key, values) => match labels.get(key) {
                Some(v) => !values.contains(v),
                None => true,
            },
            Expression::Exists(key) => labels.contains_key(key),
            Expression::DoesNotExist(key) => !labels.contains_key(key),
            Expression::Equal(key, value) => labels.get(key) == Some(value),
            Expression::NotEqual(key, value) => labels.get(key) != Some(value),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::In(key, values) => {
                let vals = values.iter().cloned().collect::<Vec<_>>().join(",");
                write!(f, "{key} in ({vals})")
            }
            Expression::NotIn(key, values) => {
                let vals = values.iter().cloned().collect::<Vec<_>>().join(",");
                write!(f, "{key} notin ({vals})")
            }
            Expression::Equal(key, value) => write!(f, "{key}={value}"),
            Expression::NotEqual(key, value) => write!(f, "{key}!={value}"),
            Expression::Exists(key) => write!(f, "{key}"),
            Expression::DoesNotExist(key) => write!(f, "!{key}"),
        }
    }
}

// === Parsing ===

/// Split on commas that are not inside a parenthesized value set
fn split_terms(selector: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(&selector[start..]);
    terms
}

fn parse_values(key: &str, rest: &str) -> Result<BTreeSet<String>, ParseExpressionError> {
    let inner = rest
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| ParseExpressionError(format!("{key}: expected parenthesized values")))?;
    Ok(inner
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect())
}

impl FromStr for Expression {
    type Err = ParseExpressionError;

    fn from_str(term: &str) -> Result<Self, Self::Err> {
        let term = term.trim();
        if term.is_empty() {
            return Err(ParseExpressionError("empty expression".into()));
        }
        if let Some(key) = term.strip_prefix('!') {
            return Ok(Expression::DoesNotExist(key.trim().to_string()));
        }
        if let Some((key, value)) = term.split_once("!=") {
            return Ok(Expression::NotEqual(key.trim().into(), value.trim().into()));
        }
        if let Some((key, value)) = term.split_once("==") {
            return Ok(Expression::Equal(key.trim().into(), value.trim().into()));
        }
        if let Some((key, value)) = term.split_once('=') {
            return Ok(Expression::Equal(key.trim().into(), value.trim().into()));
        }
        if let Some((key, rest)) = term.split_once(" notin ") {
            let key = key.trim();
            return Ok(Expression::NotIn(key.into(), parse_values(key, rest)?));
        }
        if let Some((key, rest)) = term.split_once(" in ") {
            let key = key.trim();
            return Ok(Expression::In(key.into(), parse_values(key, rest)?));
        }
        if term.contains(char::is_whitespace) {
            return Err(ParseExpressionError(term.to_string()));
        }
        Ok(Expression::Exists(term.to_string()))
    }
}

impl FromStr for Selector {
    type Err = ParseExpressionError;

    fn from_str(selector: &str) -> Result<Self, Self::Err> {
        if selector.trim().is_empty() {
            return Ok(Selector::default());
        }
        split_terms(selector)
            .into_iter()
            .map(Expression::from_str)
            .collect()
    }
}

// convenience conversions

impl FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self::from_expressions(iter.into_iter().collect())
    }
}

impl From<Expression> for Selector {
    fn from(value: Expression) -> Self {
        Self(vec![value])
    }
}
