//! Stored files: cached downloads revalidated by etag, and file list checks.

mod store;
mod valid;

pub use store::{FileStatus, FileStore};
pub use valid::{file_format, is_valid_file_list, is_valid_file_type, validate_files, ValidatedFiles};
