//! Domain Value Objects
//!
//! Immutable value types for the check-in domain.

use chrono::NaiveDate;
use kernel::id::{GroupId, ScheduleId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an occurrence: one meeting of one group on one schedule on
/// one date. Storage enforces uniqueness on exactly these three columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OccurrenceKey {
    pub group_id: GroupId,
    pub occurrence_date: NaiveDate,
    pub schedule_id: ScheduleId,
}

impl OccurrenceKey {
    pub fn new(group_id: GroupId, occurrence_date: NaiveDate, schedule_id: ScheduleId) -> Self {
        Self {
            group_id,
            occurrence_date,
            schedule_id,
        }
    }
}

impl fmt::Display for OccurrenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.group_id, self.occurrence_date, self.schedule_id
        )
    }
}

pub const CODE_MAX_LENGTH: usize = 16;

/// Attendance code text, upper-case ASCII alphanumerics
///
/// Codes are printed on labels and typed back in at pickup, so input is
/// trimmed and upper-cased before comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Code(String);

/// Text that cannot be an attendance code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid attendance code: {0:?}")]
pub struct InvalidCode(pub String);

impl Code {
    /// Normalize user input. `None` if it cannot be a code at all.
    pub fn normalize(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || trimmed.len() > CODE_MAX_LENGTH
            || !trimmed.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return None;
        }
        Some(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Code {
    type Error = InvalidCode;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::normalize(&raw).ok_or(InvalidCode(raw))
    }
}

impl From<Code> for String {
    fn from(code: Code) -> Self {
        code.0
    }
}

impl AsRef<str> for Code {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_normalize() {
        assert_eq!(Code::normalize(" k7qx ").unwrap().as_str(), "K7QX");
        assert!(Code::normalize("").is_none());
        assert!(Code::normalize("   ").is_none());
        assert!(Code::normalize("K7-QX").is_none());
        assert!(Code::normalize("K7%").is_none());
        assert!(Code::normalize(&"A".repeat(CODE_MAX_LENGTH + 1)).is_none());
    }

    #[test]
    fn test_code_deserialize_normalizes() {
        let code: Code = serde_json::from_str("\" k7qx \"").unwrap();
        assert_eq!(code.as_str(), "K7QX");
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"K7QX\"");

        assert!(serde_json::from_str::<Code>("\"K7-QX\"").is_err());
        assert!(serde_json::from_str::<Code>("\"\"").is_err());
    }

    #[test]
    fn test_occurrence_key_display() {
        let key = OccurrenceKey::new(
            GroupId::from_uuid(uuid::Uuid::nil()),
            NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(),
            ScheduleId::from_uuid(uuid::Uuid::nil()),
        );
        assert!(key.to_string().contains("/2025-01-05/"));
    }
}
