//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

use super::record::{Record, RecordId, RecordKey};

/// An open divergence between the local and remote replica of one record.
///
/// Exists only between detection and resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub collection: String,
    pub record_id: RecordId,
    /// Local version at detection time
    pub local: Record,
    /// Remote version; `base_version` equals its canonical `updated_at`
    pub remote: Record,
    /// Detection timestamp (Unix ms)
    pub detected_at: i64,
}

impl Conflict {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.collection.clone(), self.record_id.clone())
    }

    /// Top-level payload fields whose values differ between the two sides.
    pub fn differing_fields(&self) -> Vec<String> {
        let empty = serde_json::Map::new();
        let local = self.local.payload.as_object().unwrap_or(&empty);
        let remote = self.remote.payload.as_object().unwrap_or(&empty);

        let mut fields = local
            .keys()
            .chain(remote.keys())
            .filter(|key| local.get(*key) != remote.get(*key))
            .cloned()
            .collect::<Vec<_>>();
        fields.sort();
        fields.dedup();
        fields
    }
}

/// A human decision for one open conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Overwrite the remote with the local version on the next push
    KeepLocal,
    /// Discard local changes and adopt the remote version
    KeepRemote,
    /// Adopt the remote version and copy the local version into a new record
    KeepBoth,
}

impl Decision {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
            Self::KeepBoth => "keep_both",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "keep_local" | "keep-local" => Ok(Self::KeepLocal),
            "remote" | "keep_remote" | "keep-remote" => Ok(Self::KeepRemote),
            "both" | "keep_both" | "keep-both" => Ok(Self::KeepBoth),
            other => Err(Error::InvalidInput(format!(
                "Unknown decision '{other}' (expected local, remote or both)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn side(payload: serde_json::Value, updated_at: i64, base_version: i64) -> Record {
        Record {
            id: RecordId::from("A"),
            collection: "jobs".to_string(),
            payload,
            updated_at,
            base_version,
            deleted: false,
            duplicate_of: None,
        }
    }

    #[test]
    fn test_differing_fields() {
        let conflict = Conflict {
            collection: "jobs".to_string(),
            record_id: RecordId::from("A"),
            local: side(json!({"price": 75, "title": "Roof", "notes": "x"}), 110, 100),
            remote: side(json!({"price": 60, "title": "Roof"}), 105, 105),
            detected_at: 120,
        };
        assert_eq!(conflict.differing_fields(), vec!["notes", "price"]);
    }

    #[test]
    fn test_decision_parse() {
        assert_eq!("local".parse::<Decision>().unwrap(), Decision::KeepLocal);
        assert_eq!("keep-remote".parse::<Decision>().unwrap(), Decision::KeepRemote);
        assert_eq!("BOTH".parse::<Decision>().unwrap(), Decision::KeepBoth);
        assert!("skip".parse::<Decision>().is_err());
    }
}
