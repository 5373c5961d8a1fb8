//! Common ID Types
//!
//! Type-safe ID wrappers for check-in records and the external records
//! (groups, schedules, people) they point at.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Generic typed ID wrapper
///
/// Usage:
/// ```
/// use kernel::id::{Id, markers};
/// type PersonId = Id<markers::Person>;
/// let id = PersonId::new();
/// assert_eq!(id.to_string().len(), 36);
/// ```
pub struct Id<T> {
    value: Uuid,
    _marker: PhantomData<fn() -> T>,
}

/// Returned when a string is not a valid UUID
#[derive(Debug, Error)]
#[error("invalid identifier: {0}")]
pub struct IdParseError(#[from] uuid::Error);

impl<T> Id<T> {
    /// Create a new random ID (UUID v4)
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Create from an existing UUID
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self {
            value: uuid,
            _marker: PhantomData,
        }
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.value
    }

    /// Convert to UUID
    pub fn into_uuid(self) -> Uuid {
        self.value
    }
}

// Manual impls: the marker types carry no data, so no bounds on `T`.
impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.value)
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> FromStr for Id<T> {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_uuid(Uuid::parse_str(s.trim())?))
    }
}

impl<T> From<Uuid> for Id<T> {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl<T> From<Id<T>> for Uuid {
    fn from(id: Id<T>) -> Self {
        id.value
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Uuid::deserialize(deserializer).map(Self::from_uuid)
    }
}

/// Marker types for different entity IDs
pub mod markers {
    /// Marker for Occurrence IDs
    pub struct Occurrence;

    /// Marker for Attendance IDs
    pub struct Attendance;

    /// Marker for AttendanceCode IDs
    pub struct AttendanceCode;

    /// Marker for Group IDs (owned by the group registry)
    pub struct Group;

    /// Marker for Schedule IDs
    pub struct Schedule;

    /// Marker for Location IDs
    pub struct Location;

    /// Marker for Person IDs
    pub struct Person;
}

/// Type aliases for common IDs
pub type OccurrenceId = Id<markers::Occurrence>;
pub type AttendanceId = Id<markers::Attendance>;
pub type AttendanceCodeId = Id<markers::AttendanceCode>;
pub type GroupId = Id<markers::Group>;
pub type ScheduleId = Id<markers::Schedule>;
pub type LocationId = Id<markers::Location>;
pub type PersonId = Id<markers::Person>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_type_safety() {
        let occurrence_id: OccurrenceId = Id::new();
        let attendance_id: AttendanceId = Id::new();

        // These are different types, cannot be mixed
        let _o: Uuid = occurrence_id.into_uuid();
        let _a: Uuid = attendance_id.into_uuid();
    }

    #[test]
    fn test_id_from_uuid() {
        let uuid = Uuid::new_v4();
        let id: GroupId = Id::from_uuid(uuid);
        assert_eq!(id.as_uuid(), &uuid);
    }

    #[test]
    fn test_id_parse() {
        let uuid = Uuid::new_v4();
        let parsed: PersonId = format!(" {uuid} ").parse().unwrap();
        assert_eq!(parsed.into_uuid(), uuid);

        assert!("not-a-uuid".parse::<PersonId>().is_err());
    }

    #[test]
    fn test_id_is_copy_and_hashable() {
        use std::collections::HashSet;

        let id = ScheduleId::new();
        let copy = id;
        let mut set = HashSet::new();
        set.insert(id);
        assert!(set.contains(&copy));
    }

    #[test]
    fn test_id_serializes_as_plain_uuid() {
        let id = LocationId::from_uuid(Uuid::nil());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");

        let back: LocationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
