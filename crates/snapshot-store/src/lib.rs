mod checkpoint;
mod entry;
mod error;
mod store;
mod synchronizer;

pub use checkpoint::{checkpoint_path_for, Checkpoint, CheckpointStore, Phase};
pub use entry::FileEntry;
pub use error::{Result, SnapshotError};
pub use store::{Snapshot, SnapshotStore, SNAPSHOT_SCHEMA_VERSION};
pub use synchronizer::{DetectedChanges, FileSynchronizer};
