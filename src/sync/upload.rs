use rayon::prelude::*;

use crate::content::LocalFile;
use crate::error::SyncErrorKind;
use crate::host::{ObjectId, ObjectStore};

/// A blob created for one local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub remote_path: String,
    pub object_id: ObjectId,
    pub binary: bool,
}

fn upload_one<S: ObjectStore + ?Sized>(
    store: &S,
    file: &LocalFile,
) -> Result<UploadedObject, SyncErrorKind> {
    let content = file.read()?;
    log::debug!(
        "uploading {} ({:?}, {} bytes)",
        file.remote_path,
        content.encoding(),
        content.as_bytes().len()
    );
    let object_id = store.create_blob(&content)?;
    Ok(UploadedObject {
        remote_path: file.remote_path.clone(),
        object_id,
        binary: content.is_binary(),
    })
}

/// Read and upload every file, at most `threads` at a time.
///
/// Blobs have no ordering dependency on each other, so they are created in
/// parallel. The first failure stops the batch and is returned; the result
/// keeps the order of `files`.
pub fn upload_files<S: ObjectStore + ?Sized>(
    store: &S,
    files: &[LocalFile],
    threads: usize,
) -> Result<Vec<UploadedObject>, SyncErrorKind> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("expub-upload-{i}"))
        .build();

    match pool {
        Ok(pool) => pool.install(|| {
            files
                .par_iter()
                .map(|f| upload_one(store, f))
                .collect::<Result<Vec<_>, _>>()
        }),
        Err(e) => {
            log::warn!("upload pool unavailable ({e}), uploading sequentially");
            files.iter().map(|f| upload_one(store, f)).collect()
        }
    }
}
