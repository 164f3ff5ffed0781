use std::collections::HashSet;

use crate::models::{MissingKeyField, Record};

/// Removes from `updates` every record whose business key also appears in
/// `inserts`.
///
/// A "modified since" pull also returns records created after the window,
/// which the "created since" pull already covers. Both lists are checked
/// for the key fields even when one of them is empty, so a malformed
/// record is reported rather than silently passed on. Inputs are left
/// untouched.
pub fn dedupe(
    updates: &[Record],
    inserts: &[Record],
    key: &[&str],
) -> Result<Vec<Record>, MissingKeyField> {
    let inserted = inserts
        .iter()
        .map(|r| r.business_key(key))
        .collect::<Result<HashSet<_>, _>>()?;

    let mut kept = Vec::with_capacity(updates.len());
    for record in updates {
        let record_key = record.business_key(key)?;
        if !inserted.contains(&record_key) {
            kept.push(record.clone());
        }
    }

    if kept.len() < updates.len() {
        tracing::debug!(
            "Dropped {} update(s) already present as inserts",
            updates.len() - kept.len()
        );
    }
    Ok(kept)
}
