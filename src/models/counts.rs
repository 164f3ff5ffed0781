use serde::Serialize;

/// Rows written by one table sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub inserted: u64,
    pub updated: u64,
}

impl SyncCounts {
    pub fn new(inserted: u64, updated: u64) -> Self {
        Self { inserted, updated }
    }
}

impl std::ops::AddAssign for SyncCounts {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}
