use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Watermarks bounding the next delta pull for one table.
///
/// Derived from the store at the start of each table sync. `None` means the
/// table holds no timestamp yet, which is distinct from any real instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncWindow {
    pub last_created_at: Option<DateTime<Utc>>,
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl SyncWindow {
    pub fn new(
        last_created_at: Option<DateTime<Utc>>,
        last_modified_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            last_created_at,
            last_modified_at,
        }
    }

    /// True when the table has never been synced.
    pub fn is_unset(&self) -> bool {
        self.last_created_at.is_none() && self.last_modified_at.is_none()
    }
}

impl fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |ts: Option<DateTime<Utc>>| {
            ts.map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        };
        writeln!(f, "last created:  {}", show(self.last_created_at))?;
        write!(f, "last modified: {}", show(self.last_modified_at))
    }
}
