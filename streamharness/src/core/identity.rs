//! Source identifiers and the per-run role table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque identifier of a stage or subsystem instance.
///
/// Used as a wiring key and embedded inside records. Equality and hashing
/// are by integer value only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub u32);

impl SourceId {
    /// Creates a new source id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw integer value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns the value as written into record bodies.
    #[must_use]
    pub const fn as_wire(self) -> i32 {
        self.0 as i32
    }

    /// Rebuilds an id from a record body field.
    #[must_use]
    pub const fn from_wire(raw: i32) -> Self {
        Self(raw as u32)
    }
}

impl From<u32> for SourceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src#{}", self.0)
    }
}

/// The part a stage plays in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    /// Produces records (e.g. a detector readout).
    Source,
    /// Passes through a subset of records.
    Filter,
    /// Groups records into composite results.
    Aggregator,
    /// Final consumer of results.
    Sink,
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Filter => write!(f, "filter"),
            Self::Aggregator => write!(f, "aggregator"),
            Self::Sink => write!(f, "sink"),
        }
    }
}

/// Per-run mapping from source id to role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRoles {
    roles: BTreeMap<SourceId, StageRole>,
}

impl SourceRoles {
    /// Creates an empty role table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a role assignment.
    #[must_use]
    pub fn with(mut self, id: impl Into<SourceId>, role: StageRole) -> Self {
        self.roles.insert(id.into(), role);
        self
    }

    /// Assigns a role, returning the previous one if present.
    pub fn assign(&mut self, id: SourceId, role: StageRole) -> Option<StageRole> {
        self.roles.insert(id, role)
    }

    /// Looks up the role of a source.
    #[must_use]
    pub fn role_of(&self, id: SourceId) -> Option<StageRole> {
        self.roles.get(&id).copied()
    }

    /// Returns every source id with the given role, in id order.
    #[must_use]
    pub fn sources_with(&self, role: StageRole) -> Vec<SourceId> {
        self.roles
            .iter()
            .filter(|(_, r)| **r == role)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Number of assigned sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Returns true if no roles are assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_source_id_equality_by_value() {
        let mut set = HashSet::new();
        set.insert(SourceId::new(7));
        assert!(set.contains(&SourceId::from(7)));
        assert_eq!(SourceId::new(7).to_string(), "src#7");
    }

    #[test]
    fn test_source_id_wire_round_trip() {
        let id = SourceId::new(0xFFFF_FFFE);
        assert_eq!(SourceId::from_wire(id.as_wire()), id);
    }

    #[test]
    fn test_source_roles() {
        let roles = SourceRoles::new()
            .with(1, StageRole::Source)
            .with(2, StageRole::Source)
            .with(10, StageRole::Aggregator);

        assert_eq!(roles.role_of(SourceId::new(10)), Some(StageRole::Aggregator));
        assert_eq!(roles.role_of(SourceId::new(3)), None);
        assert_eq!(
            roles.sources_with(StageRole::Source),
            vec![SourceId::new(1), SourceId::new(2)]
        );
    }

    #[test]
    fn test_source_roles_serde_as_map() {
        let roles = SourceRoles::new().with(4, StageRole::Sink);
        let json = serde_json::to_string(&roles).unwrap();
        assert_eq!(json, r#"{"4":"sink"}"#);

        let back: SourceRoles = serde_json::from_str(&json).unwrap();
        assert_eq!(back, roles);
    }
}
