//! Local side of a sync: which files exist, what their bytes are, and where
//! they land in the remote tree.

mod path_map;
mod reader;

use std::path::PathBuf;

pub use path_map::PathMapper;
pub use reader::{classify, is_regular_file, list_files, read_content};

use crate::error::ReadError;
use crate::host::BlobContent;

/// A local file scheduled for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub absolute_path: PathBuf,
    pub remote_path: String,
}

impl LocalFile {
    /// Read and classify the file. Called at upload time, so a file removed
    /// after enumeration surfaces here.
    pub fn read(&self) -> Result<BlobContent, ReadError> {
        read_content(&self.absolute_path)
    }
}
