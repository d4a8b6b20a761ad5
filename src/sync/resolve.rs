use crate::error::RemoteError;
use crate::host::{BranchState, ObjectStore};

/// Read the tip commit of `branch` and that commit's root tree.
///
/// Returns `Ok(None)` when the branch does not exist; that is the normal
/// first-publication case, not a failure.
pub fn resolve_branch<S: ObjectStore + ?Sized>(
    store: &S,
    branch: &str,
) -> Result<Option<BranchState>, RemoteError> {
    let Some(tip) = store.get_ref(branch)? else {
        return Ok(None);
    };
    let root_tree = store.commit_tree(&tip)?;
    Ok(Some(BranchState {
        branch: branch.to_string(),
        tip_commit: tip,
        root_tree,
    }))
}

/// Create `branch` at the tip of `default_branch` and return its state.
///
/// The new branch starts out identical to the default branch, so every
/// commit made on it has the default branch as an ancestor.
///
/// # Errors
/// [`RemoteError::NotFound`] if the default branch itself is missing, or
/// any failure of the ref creation.
pub fn bootstrap_branch<S: ObjectStore + ?Sized>(
    store: &S,
    branch: &str,
    default_branch: &str,
) -> Result<BranchState, RemoteError> {
    let base = resolve_branch(store, default_branch)?
        .ok_or_else(|| RemoteError::NotFound(format!("default branch `{default_branch}`")))?;
    log::info!(
        "creating branch {branch} at {} (tip of {default_branch})",
        base.tip_commit
    );
    store.create_ref(branch, &base.tip_commit)?;
    Ok(BranchState {
        branch: branch.to_string(),
        tip_commit: base.tip_commit,
        root_tree: base.root_tree,
    })
}
