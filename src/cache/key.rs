//! Structured cache keys.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One element of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
  Null,
  Bool(bool),
  Int(i64),
  Str(String),
}

impl fmt::Display for KeyPart {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      // Null joins as an empty segment.
      Self::Null => Ok(()),
      Self::Bool(b) => write!(f, "{}", b),
      Self::Int(n) => write!(f, "{}", n),
      Self::Str(s) => f.write_str(s),
    }
  }
}

impl From<&str> for KeyPart {
  fn from(s: &str) -> Self {
    Self::Str(s.to_string())
  }
}

impl From<String> for KeyPart {
  fn from(s: String) -> Self {
    Self::Str(s)
  }
}

impl From<&String> for KeyPart {
  fn from(s: &String) -> Self {
    Self::Str(s.clone())
  }
}

impl From<bool> for KeyPart {
  fn from(b: bool) -> Self {
    Self::Bool(b)
  }
}

impl From<i64> for KeyPart {
  fn from(n: i64) -> Self {
    Self::Int(n)
  }
}

impl From<i32> for KeyPart {
  fn from(n: i32) -> Self {
    Self::Int(n.into())
  }
}

impl From<u32> for KeyPart {
  fn from(n: u32) -> Self {
    Self::Int(n.into())
  }
}

impl From<u64> for KeyPart {
  fn from(n: u64) -> Self {
    i64::try_from(n)
      .map(Self::Int)
      .unwrap_or_else(|_| Self::Str(n.to_string()))
  }
}

impl From<NaiveDate> for KeyPart {
  fn from(d: NaiveDate) -> Self {
    Self::Str(d.format("%Y-%m-%d").to_string())
  }
}

impl<T: Into<KeyPart>> From<Option<T>> for KeyPart {
  fn from(v: Option<T>) -> Self {
    v.map(Into::into).unwrap_or(Self::Null)
  }
}

/// Ordered key identifying one cached query result.
///
/// The first part is the endpoint; later parts are filters and pagination.
/// Structurally equal keys address the same cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<KeyPart>);

impl QueryKey {
  pub fn new<I, P>(parts: I) -> Self
  where
    I: IntoIterator<Item = P>,
    P: Into<KeyPart>,
  {
    Self(parts.into_iter().map(Into::into).collect())
  }

  /// Append a part.
  pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
    self.0.push(part.into());
    self
  }

  pub fn parts(&self) -> &[KeyPart] {
    &self.0
  }

  /// Endpoint path: every part joined with `/`.
  pub fn path(&self) -> String {
    self
      .0
      .iter()
      .map(ToString::to_string)
      .collect::<Vec<_>>()
      .join("/")
  }

  /// True when `prefix` matches the leading parts of this key.
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    prefix.0.len() <= self.0.len() && self.0.iter().zip(&prefix.0).all(|(a, b)| a == b)
  }
}

impl From<&str> for QueryKey {
  fn from(endpoint: &str) -> Self {
    Self(vec![endpoint.into()])
  }
}

impl From<String> for QueryKey {
  fn from(endpoint: String) -> Self {
    Self(vec![endpoint.into()])
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let json = serde_json::to_string(&self.0).map_err(|_| fmt::Error)?;
    f.write_str(&json)
  }
}
