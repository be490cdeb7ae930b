//! Id-keyed merging of execution rows.

use std::collections::{HashMap, HashSet};

use records::{ExecutionRecord, RawExecution};

/// What a merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
}

/// Merge `incoming` into `existing` by execution id.
///
/// New ids are appended. For ids already present only empty enrichment
/// fields are filled in; nothing already set is replaced, and no id ever
/// appears twice.
pub fn merge_by_id(
    existing: &mut Vec<ExecutionRecord>,
    incoming: Vec<ExecutionRecord>,
) -> MergeStats {
    let mut positions: HashMap<String, usize> = existing
        .iter()
        .enumerate()
        .map(|(i, record)| (record.id.clone(), i))
        .collect();
    let mut stats = MergeStats::default();

    for record in incoming {
        match positions.get(&record.id) {
            Some(&i) => {
                if existing[i].absorb(record) {
                    stats.updated += 1;
                }
            }
            None => {
                positions.insert(record.id.clone(), existing.len());
                existing.push(record);
                stats.inserted += 1;
            }
        }
    }
    stats
}

/// Drop repeated raw rows; the first occurrence of an id wins.
pub fn dedup_raw(rows: Vec<RawExecution>) -> Vec<RawExecution> {
    let mut seen = HashSet::with_capacity(rows.len());
    rows.into_iter().filter(|row| seen.insert(row.id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use records::{TriggerInfo, UserRef};
    use serde_json::json;

    fn raw(id: &str) -> RawExecution {
        serde_json::from_value(json!({
            "id": id,
            "createdAt": "2026-10-01T10:00:00Z",
            "updatedAt": "2026-10-01T10:00:00Z",
            "status": "failed",
            "tasksCompleted": 2,
            "workflow": { "id": "wf", "name": "W" },
            "organization": { "id": "org-1" }
        }))
        .unwrap()
    }

    fn record(id: &str) -> ExecutionRecord {
        ExecutionRecord::from(raw(id))
    }

    #[test]
    fn merging_never_duplicates_ids() {
        let mut existing = vec![record("a"), record("b")];
        let stats = merge_by_id(&mut existing, vec![record("b"), record("c"), record("c")]);

        let ids: Vec<_> = existing.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(stats, MergeStats { inserted: 1, updated: 0 });
    }

    #[test]
    fn merging_never_nulls_enriched_fields() {
        let mut enriched = record("a");
        enriched.apply_trigger(TriggerInfo::ManualOrTest);
        enriched.user = Some(UserRef { id: Some("u1".into()), ..Default::default() });
        let mut existing = vec![enriched.clone()];

        let stats = merge_by_id(&mut existing, vec![record("a")]);

        assert_eq!(stats.updated, 0);
        assert_eq!(existing, vec![enriched]);
    }

    #[test]
    fn merging_fills_unresolved_record_only() {
        let mut unresolved = record("a");
        unresolved.mark_unresolved();
        let before = unresolved.clone();
        let mut existing = vec![unresolved];

        let mut resolved = record("a");
        resolved.apply_trigger(TriggerInfo::Webhook { trigger_name: None, method: None });
        let stats = merge_by_id(&mut existing, vec![resolved]);

        assert_eq!(stats.updated, 1);
        let after = &existing[0];
        assert!(after.trigger_info.is_some());
        assert!(!after.retryable);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.status, before.status);
        assert_eq!(after.tasks_used, before.tasks_used);
    }

    #[test]
    fn first_raw_row_wins() {
        let mut second = raw("a");
        second.tasks_completed = 99;
        let rows = dedup_raw(vec![raw("a"), raw("b"), second]);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tasks_completed, 2);
    }
}
