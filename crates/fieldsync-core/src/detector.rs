//! Conflict detection between the local and remote replica of one record.

use crate::models::{Operation, Record};
use crate::sync::StoredRecord;

/// What to do with an incoming remote version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No local divergence: overwrite local and advance its base version
    Adopt,
    /// Remote has nothing newer than what local is built on
    Skip,
    /// The remote version is our own queued operation coming back.
    /// Queue entries up to and including `through` are acknowledged.
    Echo { through: i64 },
    /// Both sides changed but ended up identical
    Converged,
    /// Both sides changed independently; a human must decide
    Conflict,
}

/// Classify `remote` against the current local state.
///
/// `pending` holds the record's queued operations in FIFO order. Divergence
/// is judged per record; a single differing field is enough to escalate.
pub fn detect(local: Option<&Record>, remote: &StoredRecord, pending: &[Operation]) -> Verdict {
    let Some(local) = local else {
        return Verdict::Adopt;
    };

    if let Some(operation_id) = remote.operation_id {
        if let Some(op) = pending.iter().find(|op| op.operation_id == operation_id) {
            return Verdict::Echo {
                through: op.sequence,
            };
        }
    }

    let remote_changed = remote.updated_at > local.base_version;
    if !local.has_pending_changes() {
        return if remote_changed {
            Verdict::Adopt
        } else {
            Verdict::Skip
        };
    }

    if !remote_changed {
        // Local edits will be replayed on push
        Verdict::Skip
    } else if local.same_content(&remote.payload, remote.deleted) {
        Verdict::Converged
    } else {
        Verdict::Conflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordId;
    use serde_json::{json, Value};

    fn local(price: i64, updated_at: i64, base_version: i64) -> Record {
        Record {
            id: RecordId::from("A"),
            collection: "jobs".to_string(),
            payload: json!({ "price": price }),
            updated_at,
            base_version,
            deleted: false,
            duplicate_of: None,
        }
    }

    fn remote(payload: Value, updated_at: i64) -> StoredRecord {
        StoredRecord {
            collection: "jobs".to_string(),
            id: RecordId::from("A"),
            payload,
            updated_at,
            deleted: false,
            operation_id: None,
        }
    }

    #[test]
    fn concurrent_edits_conflict() {
        let verdict = detect(
            Some(&local(75, 110, 100)),
            &remote(json!({ "price": 60 }), 105),
            &[],
        );
        assert_eq!(verdict, Verdict::Conflict);
    }

    #[test]
    fn unedited_local_adopts_remote() {
        let verdict = detect(
            Some(&local(50, 100, 100)),
            &remote(json!({ "price": 60 }), 105),
            &[],
        );
        assert_eq!(verdict, Verdict::Adopt);
    }

    #[test]
    fn missing_local_adopts_remote() {
        assert_eq!(
            detect(None, &remote(json!({ "price": 60 }), 105), &[]),
            Verdict::Adopt
        );
    }

    #[test]
    fn unchanged_remote_leaves_local_edit_for_push() {
        let verdict = detect(
            Some(&local(75, 110, 100)),
            &remote(json!({ "price": 50 }), 100),
            &[],
        );
        assert_eq!(verdict, Verdict::Skip);

        let stale = detect(
            Some(&local(50, 100, 100)),
            &remote(json!({ "price": 40 }), 90),
            &[],
        );
        assert_eq!(stale, Verdict::Skip);
    }

    #[test]
    fn identical_divergent_edits_converge() {
        let verdict = detect(
            Some(&local(75, 110, 100)),
            &remote(json!({ "price": 75 }), 105),
            &[],
        );
        assert_eq!(verdict, Verdict::Converged);
    }

    #[test]
    fn single_field_difference_escalates() {
        let mut edited = local(75, 110, 100);
        edited.payload = json!({ "price": 75, "status": "open", "notes": "gate code 12" });
        let incoming = remote(
            json!({ "price": 75, "status": "open", "notes": "gate code 21" }),
            105,
        );
        assert_eq!(detect(Some(&edited), &incoming, &[]), Verdict::Conflict);
    }

    #[test]
    fn own_queued_write_is_an_echo() {
        let mut op = Operation::upsert("jobs", RecordId::from("A"), json!({ "price": 75 }));
        op.sequence = 7;
        let mut incoming = remote(json!({ "price": 75 }), 120);
        incoming.operation_id = Some(op.operation_id);

        let verdict = detect(Some(&local(75, 110, 100)), &incoming, &[op]);
        assert_eq!(verdict, Verdict::Echo { through: 7 });
    }
}
