//! SCD2 versioning of a staging batch.
//!
//! The planning step is pure: given the open versions and a normalized
//! batch, it decides which keys open a first version, which close and
//! reopen, and which are left alone. The warehouse applies the plan in
//! one transaction.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use driftmark_types::record::ChangeRecord;
use driftmark_types::scd2::{DimensionVersion, VersionAction};
use driftmark_types::table::TableSpec;
use driftmark_warehouse::Warehouse;

use crate::batch::dedup_latest;
use crate::errors::PipelineError;

/// Decide the dimension mutations for a normalized batch.
///
/// `batch` must carry at most one record per key (see
/// [`dedup_latest`](crate::batch::dedup_latest)); `now` becomes both
/// the `end_at` of closed versions and the `start_at` of their
/// successors, keeping per-key validity intervals contiguous.
///
/// A record whose tracked attributes equal the open version produces
/// no action: history only grows when something actually changed.
#[must_use]
pub fn plan_versions(
    open: &HashMap<String, DimensionVersion>,
    batch: &[ChangeRecord],
    now: DateTime<Utc>,
) -> Vec<VersionAction> {
    let mut actions = Vec::new();
    for record in batch {
        match open.get(&record.key) {
            None => actions.push(VersionAction::Open {
                record: record.clone(),
                start_at: now,
            }),
            Some(current) if current.attributes == record.attributes => {}
            Some(current) => actions.push(VersionAction::CloseAndOpen {
                version_id: current.version_id,
                record: record.clone(),
                at: now,
            }),
        }
    }
    actions
}

/// Version a staging batch into the dimension. Returns the number of
/// versions opened (first-seen keys plus changed keys).
///
/// # Errors
///
/// Returns [`PipelineError`] if the warehouse fails, or a constraint
/// fault if the plan tries to close a version that is no longer open.
pub fn version(
    warehouse: &dyn Warehouse,
    spec: &TableSpec,
    rows: &[ChangeRecord],
    now: DateTime<Utc>,
) -> Result<u64, PipelineError> {
    let batch = dedup_latest(rows);
    let keys: Vec<String> = batch.iter().map(|r| r.key.clone()).collect();
    let open = warehouse.open_versions(spec, &keys)?;
    let actions = plan_versions(&open, &batch, now);
    let opened = warehouse.apply_version_actions(spec, &actions)?;
    tracing::info!(
        dimension = %spec.target,
        staged = rows.len(),
        unchanged = batch.len() - actions.len(),
        opened,
        "Versioned staging batch into dimension"
    );
    Ok(opened)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use driftmark_types::record::AttrValue;
    use driftmark_types::table::{ColumnSpec, DataType, LoadMode};
    use driftmark_warehouse::SqliteWarehouse;
    use std::collections::BTreeMap;

    fn ts(s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, s).unwrap()
    }

    fn spec() -> TableSpec {
        TableSpec {
            source: "src_customers".into(),
            staging: "stg_customers".into(),
            target: "dim_customers".into(),
            key_column: "cust_id".into(),
            created_column: "created_at".into(),
            modified_column: "modified_at".into(),
            columns: vec![ColumnSpec {
                name: "phone_no".into(),
                data_type: DataType::Text,
            }],
        }
    }

    fn record(key: &str, phone: &str, modified: u32) -> ChangeRecord {
        let mut attributes = BTreeMap::new();
        attributes.insert("phone_no".into(), AttrValue::Text(phone.into()));
        ChangeRecord {
            key: key.into(),
            attributes,
            created_at: ts(0),
            modified_at: ts(modified),
        }
    }

    fn open_version(id: i64, key: &str, phone: &str) -> DimensionVersion {
        let mut attributes = BTreeMap::new();
        attributes.insert("phone_no".into(), AttrValue::Text(phone.into()));
        DimensionVersion {
            version_id: id,
            key: key.into(),
            attributes,
            start_at: ts(0),
            end_at: None,
            is_current: true,
        }
    }

    // -----------------------------------------------------------------
    // plan_versions
    // -----------------------------------------------------------------

    #[test]
    fn first_seen_key_opens() {
        let actions = plan_versions(&HashMap::new(), &[record("K1", "555-0001", 1)], ts(1));
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            VersionAction::Open { record, start_at }
                if record.key == "K1" && *start_at == ts(1)
        ));
    }

    #[test]
    fn unchanged_attributes_are_a_no_op() {
        let mut open = HashMap::new();
        open.insert("K1".to_string(), open_version(1, "K1", "555-0001"));

        let actions = plan_versions(&open, &[record("K1", "555-0001", 5)], ts(5));
        assert!(actions.is_empty());
    }

    #[test]
    fn changed_attributes_close_and_reopen() {
        let mut open = HashMap::new();
        open.insert("K1".to_string(), open_version(7, "K1", "555-0001"));

        let actions = plan_versions(&open, &[record("K1", "555-0002", 5)], ts(5));
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            VersionAction::CloseAndOpen { version_id: 7, record, at }
                if record.key == "K1" && *at == ts(5)
        ));
    }

    #[test]
    fn mixed_batch_plans_per_key() {
        let mut open = HashMap::new();
        open.insert("same".to_string(), open_version(1, "same", "x"));
        open.insert("changed".to_string(), open_version(2, "changed", "x"));

        let batch = [
            record("same", "x", 1),
            record("changed", "y", 1),
            record("fresh", "z", 1),
        ];
        let actions = plan_versions(&open, &dedup_latest(&batch), ts(1));
        assert_eq!(actions.len(), 2);
    }

    // -----------------------------------------------------------------
    // version (against the SQLite warehouse)
    // -----------------------------------------------------------------

    fn warehouse() -> SqliteWarehouse {
        let wh = SqliteWarehouse::in_memory().unwrap();
        wh.ensure_tables(&spec(), LoadMode::Scd2).unwrap();
        wh
    }

    fn open_for(wh: &SqliteWarehouse, key: &str) -> Option<DimensionVersion> {
        wh.open_versions(&spec(), &[key.to_string()])
            .unwrap()
            .remove(key)
    }

    #[test]
    fn initial_load_opens_first_versions() {
        let wh = warehouse();
        let opened = version(&wh, &spec(), &[record("K1", "555-0001", 0)], ts(0)).unwrap();
        assert_eq!(opened, 1);

        let v = open_for(&wh, "K1").unwrap();
        assert_eq!(v.start_at, ts(0));
        assert_eq!(v.end_at, None);
        assert!(v.is_current);
    }

    #[test]
    fn change_closes_old_and_opens_new() {
        let wh = warehouse();
        version(&wh, &spec(), &[record("K1", "555-0001", 0)], ts(0)).unwrap();
        version(&wh, &spec(), &[record("K1", "555-0002", 1)], ts(1)).unwrap();

        let history = wh.dimension_rows(&spec()).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].start_at, ts(0));
        assert_eq!(history[0].end_at, Some(ts(1)));
        assert!(!history[0].is_current);
        assert_eq!(history[1].start_at, ts(1));
        assert_eq!(history[1].end_at, None);
        assert!(history[1].is_current);
    }

    #[test]
    fn unchanged_batch_appends_nothing() {
        let wh = warehouse();
        version(&wh, &spec(), &[record("K1", "555-0001", 0)], ts(0)).unwrap();
        let opened = version(&wh, &spec(), &[record("K1", "555-0001", 3)], ts(3)).unwrap();
        assert_eq!(opened, 0);
        assert_eq!(wh.dimension_rows(&spec()).unwrap().len(), 1);
    }

    #[test]
    fn single_current_invariant_across_many_changes() {
        let wh = warehouse();
        for (i, phone) in ["a", "b", "c", "d"].iter().enumerate() {
            let at = u32::try_from(i).unwrap();
            version(&wh, &spec(), &[record("K1", phone, at)], ts(at)).unwrap();
        }

        let history = wh.dimension_rows(&spec()).unwrap();
        assert_eq!(history.len(), 4);
        let current: Vec<_> = history.iter().filter(|v| v.is_current).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(
            current[0].attributes.get("phone_no"),
            Some(&AttrValue::Text("d".into()))
        );

        // Intervals chain with no gap: each close matches the next open.
        for pair in history.windows(2) {
            assert_eq!(pair[0].end_at, Some(pair[1].start_at));
        }
    }

    #[test]
    fn closed_rows_keep_their_attributes() {
        let wh = warehouse();
        version(&wh, &spec(), &[record("K1", "555-0001", 0)], ts(0)).unwrap();
        version(&wh, &spec(), &[record("K1", "555-0002", 1)], ts(1)).unwrap();
        version(&wh, &spec(), &[record("K1", "555-0003", 2)], ts(2)).unwrap();

        let history = wh.dimension_rows(&spec()).unwrap();
        assert_eq!(
            history[0].attributes.get("phone_no"),
            Some(&AttrValue::Text("555-0001".into()))
        );
        assert_eq!(
            history[1].attributes.get("phone_no"),
            Some(&AttrValue::Text("555-0002".into()))
        );
    }

    #[test]
    fn duplicate_keys_in_one_batch_stay_single_chain() {
        let wh = warehouse();
        let opened = version(
            &wh,
            &spec(),
            &[record("K1", "555-0001", 1), record("K1", "555-0002", 2)],
            ts(2),
        )
        .unwrap();
        assert_eq!(opened, 1);

        let history = wh.dimension_rows(&spec()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(
            history[0].attributes.get("phone_no"),
            Some(&AttrValue::Text("555-0002".into()))
        );
        assert!(history[0].is_current);
    }
}
