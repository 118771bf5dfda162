//! Core types for LeafGuard

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Sentinel label returned when an input is rejected as out-of-distribution
pub const UNKNOWN_LABEL: &str = "UNKNOWN";

/// A fixed-length embedding produced by an encoder for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Wrap a raw vector
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    /// Number of components
    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    /// Borrow the components
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Consume into the underlying vector
    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

impl AsRef<[f32]> for Embedding {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// Outcome label of a prediction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Label {
    /// One of the known disease classes
    Known(String),
    /// Rejected: too weak or too ambiguous to name a class
    Unknown,
}

impl Label {
    /// Label as displayed to callers
    pub fn as_str(&self) -> &str {
        match self {
            Self::Known(name) => name,
            Self::Unknown => UNKNOWN_LABEL,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Label {
    fn from(value: &str) -> Self {
        if value == UNKNOWN_LABEL {
            Self::Unknown
        } else {
            Self::Known(value.to_string())
        }
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Label::from(raw.as_str()))
    }
}
