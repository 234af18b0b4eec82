//! Symbolic values, domains and named variables.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{BayesNetError, ClassVal, Result};

/// A categorical value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

/// Ordered, non-empty list of distinct values.
///
/// A value is addressed by its position in the domain ([`ClassVal`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Domain {
    values: Vec<Value>,
}

impl Domain {
    pub fn new<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Result<Self> {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(BayesNetError::EmptyDomain);
        }
        for (i, v) in values.iter().enumerate() {
            if values[..i].contains(v) {
                return Err(BayesNetError::DuplicateValue(v.to_string()));
            }
        }
        if values.len() > ClassVal::MAX as usize {
            return Err(BayesNetError::InvalidConfig(format!(
                "domain of {} values is too large",
                values.len()
            )));
        }
        Ok(Self { values })
    }
    /// Domain `{false, true}`.
    pub fn boolean() -> Self {
        Self {
            values: vec![Value::Bool(false), Value::Bool(true)],
        }
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    pub fn values(&self) -> &[Value] {
        &self.values
    }
    pub fn value(&self, class: ClassVal) -> Option<&Value> {
        self.values.get(class as usize)
    }
    pub fn index_of(&self, value: &Value) -> Option<ClassVal> {
        self.values
            .iter()
            .position(|v| v == value)
            .map(|i| i as ClassVal)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.values.iter().join(", "))
    }
}

/// A named categorical variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub domain: Domain,
}

impl Variable {
    pub fn new(name: impl Into<String>, domain: Domain) -> Self {
        Self {
            name: name.into(),
            domain,
        }
    }
    pub fn cardinality(&self) -> usize {
        self.domain.len()
    }
    /// Position of `value` in the domain, or a domain error naming this variable.
    pub fn class_of(&self, value: &Value) -> Result<ClassVal> {
        self.domain
            .index_of(value)
            .ok_or_else(|| BayesNetError::Domain {
                value: value.to_string(),
                variable: self.name.clone(),
            })
    }
}
