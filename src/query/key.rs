//! Structural cache keys.

use std::collections::BTreeMap;
use std::fmt;

/// One element of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
  Str(String),
  Int(i64),
  /// Unsigned values too large for `Int`
  UInt(u64),
  Bool(bool),
  /// Named parameters; ordered so that equality doesn't depend on insertion order
  Params(BTreeMap<String, KeyPart>),
}

impl From<&str> for KeyPart {
  fn from(value: &str) -> Self {
    KeyPart::Str(value.to_string())
  }
}

impl From<String> for KeyPart {
  fn from(value: String) -> Self {
    KeyPart::Str(value)
  }
}

impl From<&String> for KeyPart {
  fn from(value: &String) -> Self {
    KeyPart::Str(value.clone())
  }
}

impl From<bool> for KeyPart {
  fn from(value: bool) -> Self {
    KeyPart::Bool(value)
  }
}

macro_rules! int_key_part {
  ($($t:ty),*) => {
    $(
      impl From<$t> for KeyPart {
        fn from(value: $t) -> Self {
          KeyPart::Int(value as i64)
        }
      }
    )*
  };
}

int_key_part!(i32, i64, u8, u16, u32);

macro_rules! wide_key_part {
  ($($t:ty),*) => {
    $(
      impl From<$t> for KeyPart {
        fn from(value: $t) -> Self {
          match i64::try_from(value) {
            Ok(i) => KeyPart::Int(i),
            Err(_) => KeyPart::UInt(value as u64),
          }
        }
      }
    )*
  };
}

wide_key_part!(u64, usize);

impl From<KeyParams> for KeyPart {
  fn from(value: KeyParams) -> Self {
    KeyPart::Params(value.0)
  }
}

impl fmt::Display for KeyPart {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      KeyPart::Str(s) => write!(f, "{:?}", s),
      KeyPart::Int(i) => write!(f, "{}", i),
      KeyPart::UInt(u) => write!(f, "{}", u),
      KeyPart::Bool(b) => write!(f, "{}", b),
      KeyPart::Params(map) => {
        f.write_str("{")?;
        for (i, (name, value)) in map.iter().enumerate() {
          if i > 0 {
            f.write_str(",")?;
          }
          write!(f, "{:?}:{}", name, value)?;
        }
        f.write_str("}")
      }
    }
  }
}

/// Builder for a `KeyPart::Params` element. Absent optional values are skipped
/// so `{page: 1}` and `{page: 1, filter: None}` are the same key.
#[derive(Debug, Clone, Default)]
pub struct KeyParams(BTreeMap<String, KeyPart>);

impl KeyParams {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(mut self, name: &str, value: impl Into<KeyPart>) -> Self {
    self.0.insert(name.to_string(), value.into());
    self
  }

  pub fn set_opt<V: Into<KeyPart>>(self, name: &str, value: Option<V>) -> Self {
    match value {
      Some(v) => self.set(name, v),
      None => self,
    }
  }
}

/// Identifies one cacheable resource instance.
///
/// The first element is the resource domain (`"documents"`, `"scan-v1"`, ...),
/// the rest narrow it down. Keys compare structurally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<KeyPart>);

impl QueryKey {
  pub fn new(domain: impl Into<KeyPart>) -> Self {
    Self(vec![domain.into()])
  }

  pub fn from_parts(parts: Vec<KeyPart>) -> Self {
    Self(parts)
  }

  pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
    self.0.push(part.into());
    self
  }

  pub fn parts(&self) -> &[KeyPart] {
    &self.0
  }

  /// The resource domain, if the key starts with a string.
  pub fn domain(&self) -> Option<&str> {
    match self.0.first() {
      Some(KeyPart::Str(s)) => Some(s),
      _ => None,
    }
  }

  /// True when `prefix` matches this key element by element.
  ///
  /// `["documents"]` is a prefix of `["documents", {page: 1}]`; every key is a
  /// prefix of itself.
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.0.starts_with(&prefix.0)
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("[")?;
    for (i, part) in self.0.iter().enumerate() {
      if i > 0 {
        f.write_str(",")?;
      }
      write!(f, "{}", part)?;
    }
    f.write_str("]")
  }
}

/// Build a `QueryKey` from a list of values convertible into `KeyPart`.
///
/// ```ignore
/// let key = query_key!["benchmark", "history", 20];
/// ```
#[macro_export]
macro_rules! query_key {
  ($($part:expr),+ $(,)?) => {
    $crate::query::QueryKey::from_parts(vec![$($crate::query::KeyPart::from($part)),+])
  };
}
