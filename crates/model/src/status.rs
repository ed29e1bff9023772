use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coordinator-side step a migration is currently on. Wire values are
/// preserved from the coordinator's integer encoding (see `as_wire`/
/// `from_wire`) so that a single table governs the mapping in both
/// directions instead of scattering numeric literals through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Prep,
    Run,
    Rename,
    Cancel,
    Pause,
}

#[derive(Debug, Error)]
#[error("unknown migration status on the wire: {0}")]
pub struct UnknownStatus(pub i64);

impl Status {
    const TABLE: &'static [(Status, i64)] = &[
        (Status::Prep, 0),
        (Status::Run, 3),
        (Status::Rename, 5),
        (Status::Cancel, 9),
        (Status::Pause, 11),
    ];

    pub fn as_wire(self) -> i64 {
        Self::TABLE
            .iter()
            .find(|(status, _)| *status == self)
            .map(|(_, wire)| *wire)
            .expect("Status::TABLE covers every variant")
    }

    pub fn from_wire(wire: i64) -> Result<Self, UnknownStatus> {
        Self::TABLE
            .iter()
            .find(|(_, w)| *w == wire)
            .map(|(status, _)| *status)
            .ok_or(UnknownStatus(wire))
    }
}

impl Serialize for Status {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = i64::deserialize(deserializer)?;
        Status::from_wire(wire).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trips() {
        for (status, wire) in Status::TABLE.iter().copied() {
            assert_eq!(status.as_wire(), wire);
            assert_eq!(Status::from_wire(wire).unwrap(), status);
        }
    }

    #[test]
    fn unknown_wire_value_is_rejected() {
        assert!(Status::from_wire(42).is_err());
    }
}
