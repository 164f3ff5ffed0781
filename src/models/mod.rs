mod counts;
mod record;
mod window;

pub use counts::SyncCounts;
pub use record::{BusinessKey, MissingKeyField, Record, RecordSet, TRANSPORT_TAG};
pub use window::SyncWindow;
