//! Staging batch normalization.

use std::collections::BTreeMap;

use driftmark_types::record::ChangeRecord;

/// Collapse a batch to the last record per key under the deterministic
/// `(modified_at, key)` order.
///
/// A staging batch is not expected to carry the same key twice, but
/// when it does the latest snapshot wins, keeping both merge flavors
/// single-chain per key.
#[must_use]
pub fn dedup_latest(rows: &[ChangeRecord]) -> Vec<ChangeRecord> {
    let mut sorted = rows.to_vec();
    sorted.sort_by(ChangeRecord::batch_order);

    let mut latest: BTreeMap<String, ChangeRecord> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    for row in sorted {
        if !latest.contains_key(&row.key) {
            order.push(row.key.clone());
        }
        latest.insert(row.key.clone(), row);
    }

    order
        .into_iter()
        .map(|key| latest.remove(&key).expect("key recorded on first sight"))
        .collect()
}
