//! Write path: staged loading, merge into history and latest, version deletion.
//!
//! A load stages drafts in `signal_load`, marks staged rows that cannot be the
//! newest issue for their key, then merges the batch. Deletion removes exact
//! versions and rebuilds the latest row for every key whose current version
//! was removed.

mod delete;
mod loader;
mod merge;

pub use delete::{
    delete_versions, read_deletion_file, DeleteReport, DeletionInput, DELETE_CHUNK_ROWS,
    DELETION_FILE_FIELDS,
};
pub use loader::{
    batch_count, load_observations, AffectedRows, LoadOptions, LoadReport, DEFAULT_BATCH_SIZE,
};
pub use merge::{merge_staged, MergeReport};
