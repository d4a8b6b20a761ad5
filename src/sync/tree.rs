use std::collections::HashSet;

use super::upload::UploadedObject;
use crate::error::TreeBuildError;
use crate::host::{ObjectId, ObjectStore, TreeEntry};

/// Turn uploads into tree entries, refusing duplicate or malformed paths
/// before anything reaches the host.
pub fn tree_entries(uploads: &[UploadedObject]) -> Result<Vec<TreeEntry>, TreeBuildError> {
    let mut seen = HashSet::with_capacity(uploads.len());
    let mut entries = Vec::with_capacity(uploads.len());
    for u in uploads {
        let p = u.remote_path.as_str();
        let malformed = p.is_empty()
            || p.starts_with('/')
            || p.ends_with('/')
            || p.split('/').any(|s| s.is_empty() || s == "." || s == "..");
        if malformed {
            return Err(TreeBuildError::InvalidPath(p.to_string()));
        }
        if !seen.insert(p) {
            return Err(TreeBuildError::DuplicatePath(p.to_string()));
        }
        entries.push(TreeEntry {
            path: p.to_string(),
            object_id: u.object_id.clone(),
        });
    }
    Ok(entries)
}

/// Create the new tree. With `parent`, every uploaded path is inserted or
/// replaced and all other paths of the parent tree are left as they are;
/// without it the tree holds only the uploads.
pub fn build_tree<S: ObjectStore + ?Sized>(
    store: &S,
    parent: Option<&ObjectId>,
    uploads: &[UploadedObject],
) -> Result<ObjectId, TreeBuildError> {
    let entries = tree_entries(uploads)?;
    store
        .create_tree(parent, &entries)
        .map_err(TreeBuildError::Rejected)
}
