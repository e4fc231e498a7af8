// ABOUTME: Validated git commit hash.
// ABOUTME: Ensures hashes are hexadecimal and of a plausible length.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommitHashError {
    #[error("commit hash cannot be empty")]
    Empty,

    #[error("commit hash must be between 7 and 64 characters, got {0}")]
    BadLength(usize),

    #[error("invalid character in commit hash: '{0}'")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitHash(String);

impl CommitHash {
    pub fn new(value: &str) -> Result<Self, CommitHashError> {
        if value.is_empty() {
            return Err(CommitHashError::Empty);
        }

        if !(7..=64).contains(&value.len()) {
            return Err(CommitHashError::BadLength(value.len()));
        }

        if let Some(c) = value.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(CommitHashError::InvalidChar(c));
        }

        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, used in revision names and log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for CommitHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CommitHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CommitHash::new(&s).map_err(serde::de::Error::custom)
    }
}
