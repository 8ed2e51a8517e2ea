//! Job identifiers.
//!
//! A [`JobId`] is opaque: callers may supply their own (for example a
//! client-generated token they re-submit on every poll) or let the server
//! generate one. Supplied ids are restricted to a URL- and header-safe
//! alphabet so they can travel in paths, query strings, and headers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Longest accepted caller-supplied job id.
pub const MAX_JOB_ID_LEN: usize = 128;

/// Opaque identifier for a queued job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rejection reason for a malformed caller-supplied job id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidJobId {
    #[error("job id is empty")]
    Empty,
    #[error("job id exceeds {MAX_JOB_ID_LEN} characters")]
    TooLong,
    #[error("job id contains invalid character {0:?}")]
    InvalidChar(char),
}

impl FromStr for JobId {
    type Err = InvalidJobId;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(InvalidJobId::Empty);
        }
        if s.len() > MAX_JOB_ID_LEN {
            return Err(InvalidJobId::TooLong);
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(InvalidJobId::InvalidChar(c));
        }
        Ok(Self(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn generated_ids_parse_back() {
        let id = JobId::generate();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_empty_and_long() {
        assert_eq!("".parse::<JobId>(), Err(InvalidJobId::Empty));
        let long = "a".repeat(MAX_JOB_ID_LEN + 1);
        assert_eq!(long.parse::<JobId>(), Err(InvalidJobId::TooLong));
    }

    #[test]
    fn rejects_unsafe_characters() {
        assert_eq!(
            "job/1".parse::<JobId>(),
            Err(InvalidJobId::InvalidChar('/'))
        );
        assert!("client_job-42".parse::<JobId>().is_ok());
    }

    #[test]
    fn serde_is_transparent() {
        let id: JobId = "abc".parse().unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }
}
