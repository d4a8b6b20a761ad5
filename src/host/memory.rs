use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{BlobContent, ObjectId, ObjectStore, TreeEntry};
use crate::error::RemoteError;

/// A commit as recorded by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub message: String,
}

#[derive(Debug, Clone)]
enum Object {
    Blob(Vec<u8>),
    /// Flat mapping of full path to blob id.
    Tree(BTreeMap<String, ObjectId>),
    Commit(CommitRecord),
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<ObjectId, Object>,
    refs: HashMap<String, ObjectId>,
    commit_seq: u64,
}

impl State {
    fn insert_tree(&mut self, entries: BTreeMap<String, ObjectId>) -> ObjectId {
        let mut hasher = Sha256::new();
        hasher.update(b"tree\0");
        for (path, id) in &entries {
            hasher.update(path.as_bytes());
            hasher.update(b"\0");
            hasher.update(id.as_str().as_bytes());
            hasher.update(b"\n");
        }
        let id = ObjectId::new(hex::encode(hasher.finalize()));
        self.objects.insert(id.clone(), Object::Tree(entries));
        id
    }

    /// Commits embed a sequence number, so two commits of the same tree and
    /// parent still get distinct ids, as a timestamped git commit would.
    fn insert_commit(&mut self, record: CommitRecord) -> ObjectId {
        self.commit_seq += 1;
        let mut hasher = Sha256::new();
        hasher.update(b"commit\0");
        hasher.update(record.tree.as_str().as_bytes());
        for p in &record.parents {
            hasher.update(b"\nparent ");
            hasher.update(p.as_str().as_bytes());
        }
        hasher.update(b"\n");
        hasher.update(record.message.as_bytes());
        hasher.update(self.commit_seq.to_be_bytes());
        let id = ObjectId::new(hex::encode(hasher.finalize()));
        self.objects.insert(id.clone(), Object::Commit(record));
        id
    }

    fn tree(&self, id: &ObjectId) -> Option<&BTreeMap<String, ObjectId>> {
        match self.objects.get(id) {
            Some(Object::Tree(t)) => Some(t),
            _ => None,
        }
    }

    fn commit(&self, id: &ObjectId) -> Option<&CommitRecord> {
        match self.objects.get(id) {
            Some(Object::Commit(c)) => Some(c),
            _ => None,
        }
    }

    fn is_ancestor(&self, ancestor: &ObjectId, of: &ObjectId) -> bool {
        let mut stack = vec![of.clone()];
        while let Some(id) = stack.pop() {
            if &id == ancestor {
                return true;
            }
            if let Some(c) = self.commit(&id) {
                stack.extend(c.parents.iter().cloned());
            }
        }
        false
    }
}

/// Content-addressed, in-process implementation of [`ObjectStore`].
///
/// Blob and tree ids are SHA-256 digests of their contents, so identical
/// uploads yield identical ids. Ref updates are refused unless they
/// fast-forward, matching a non-forced update on GitHub.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose `default_branch` holds one empty root commit, the way a
    /// freshly auto-initialized repository looks.
    pub fn initialized(default_branch: &str) -> Self {
        let store = Self::new();
        if let Ok(mut st) = store.state.lock() {
            let tree = st.insert_tree(BTreeMap::new());
            let commit = st.insert_commit(CommitRecord {
                tree,
                parents: Vec::new(),
                message: "Initial commit".to_string(),
            });
            st.refs.insert(default_branch.to_string(), commit);
        }
        store
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, RemoteError> {
        self.state
            .lock()
            .map_err(|_| RemoteError::Rejected("memory store lock poisoned".into()))
    }

    /// Commit `files` on top of `branch` (or as a root commit if the branch
    /// is absent) and point the branch at it. Existing paths are kept.
    pub fn commit_files(
        &self,
        branch: &str,
        files: &[(&str, &[u8])],
        message: &str,
    ) -> Result<ObjectId, RemoteError> {
        let mut st = self.state()?;
        let parent = st.refs.get(branch).cloned();
        let mut entries = match &parent {
            Some(p) => {
                let tree = st
                    .commit(p)
                    .map(|c| c.tree.clone())
                    .ok_or_else(|| RemoteError::NotFound(format!("commit {p}")))?;
                st.tree(&tree).cloned().unwrap_or_default()
            }
            None => BTreeMap::new(),
        };
        for (path, bytes) in files {
            let id = blob_id(bytes);
            st.objects.insert(id.clone(), Object::Blob(bytes.to_vec()));
            entries.insert((*path).to_string(), id);
        }
        let tree = st.insert_tree(entries);
        let commit = st.insert_commit(CommitRecord {
            tree,
            parents: parent.into_iter().collect(),
            message: message.to_string(),
        });
        st.refs.insert(branch.to_string(), commit.clone());
        Ok(commit)
    }

    /// Current tip of `branch`.
    pub fn tip(&self, branch: &str) -> Option<ObjectId> {
        self.state.lock().ok()?.refs.get(branch).cloned()
    }

    pub fn commit(&self, id: &ObjectId) -> Option<CommitRecord> {
        self.state.lock().ok()?.commit(id).cloned()
    }

    /// Path to blob id mapping of a tree.
    pub fn tree_entries(&self, id: &ObjectId) -> Option<BTreeMap<String, ObjectId>> {
        self.state.lock().ok()?.tree(id).cloned()
    }

    pub fn blob(&self, id: &ObjectId) -> Option<Vec<u8>> {
        match self.state.lock().ok()?.objects.get(id) {
            Some(Object::Blob(b)) => Some(b.clone()),
            _ => None,
        }
    }

    /// Bytes stored at `path` in the tree of the tip of `branch`.
    pub fn file_at(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        let tip = self.tip(branch)?;
        let tree = self.commit(&tip)?.tree;
        let id = self.tree_entries(&tree)?.get(path)?.clone();
        self.blob(&id)
    }

    pub fn is_ancestor(&self, ancestor: &ObjectId, of: &ObjectId) -> bool {
        self.state
            .lock()
            .map(|st| st.is_ancestor(ancestor, of))
            .unwrap_or(false)
    }
}

fn blob_id(bytes: &[u8]) -> ObjectId {
    let mut hasher = Sha256::new();
    hasher.update(format!("blob {}\0", bytes.len()).as_bytes());
    hasher.update(bytes);
    ObjectId::new(hex::encode(hasher.finalize()))
}

fn valid_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.ends_with('/')
        && path
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

impl ObjectStore for MemoryStore {
    fn create_blob(&self, content: &BlobContent) -> Result<ObjectId, RemoteError> {
        let bytes = content.as_bytes();
        let id = blob_id(bytes);
        self.state()?
            .objects
            .insert(id.clone(), Object::Blob(bytes.to_vec()));
        Ok(id)
    }

    fn create_tree(
        &self,
        base: Option<&ObjectId>,
        entries: &[TreeEntry],
    ) -> Result<ObjectId, RemoteError> {
        let mut st = self.state()?;
        let mut tree = match base {
            Some(id) => st
                .tree(id)
                .cloned()
                .ok_or_else(|| RemoteError::Rejected(format!("base tree {id} does not exist")))?,
            None => BTreeMap::new(),
        };
        for e in entries {
            if !valid_path(&e.path) {
                return Err(RemoteError::Rejected(format!("invalid path {:?}", e.path)));
            }
            if !matches!(st.objects.get(&e.object_id), Some(Object::Blob(_))) {
                return Err(RemoteError::Rejected(format!(
                    "{} is not a known blob",
                    e.object_id
                )));
            }
            tree.insert(e.path.clone(), e.object_id.clone());
        }
        Ok(st.insert_tree(tree))
    }

    fn create_commit(
        &self,
        tree: &ObjectId,
        parent: &ObjectId,
        message: &str,
    ) -> Result<ObjectId, RemoteError> {
        let mut st = self.state()?;
        if st.tree(tree).is_none() {
            return Err(RemoteError::Rejected(format!("tree {tree} does not exist")));
        }
        if st.commit(parent).is_none() {
            return Err(RemoteError::Rejected(format!(
                "parent commit {parent} does not exist"
            )));
        }
        Ok(st.insert_commit(CommitRecord {
            tree: tree.clone(),
            parents: vec![parent.clone()],
            message: message.to_string(),
        }))
    }

    fn commit_tree(&self, commit: &ObjectId) -> Result<ObjectId, RemoteError> {
        self.state()?
            .commit(commit)
            .map(|c| c.tree.clone())
            .ok_or_else(|| RemoteError::NotFound(format!("commit {commit}")))
    }

    fn get_ref(&self, branch: &str) -> Result<Option<ObjectId>, RemoteError> {
        Ok(self.state()?.refs.get(branch).cloned())
    }

    fn create_ref(&self, branch: &str, commit: &ObjectId) -> Result<(), RemoteError> {
        let mut st = self.state()?;
        if st.refs.contains_key(branch) {
            return Err(RemoteError::Rejected(format!(
                "reference refs/heads/{branch} already exists"
            )));
        }
        if st.commit(commit).is_none() {
            return Err(RemoteError::Rejected(format!("commit {commit} does not exist")));
        }
        st.refs.insert(branch.to_string(), commit.clone());
        Ok(())
    }

    fn update_ref(&self, branch: &str, commit: &ObjectId) -> Result<(), RemoteError> {
        let mut st = self.state()?;
        let current = st
            .refs
            .get(branch)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("refs/heads/{branch}")))?;
        if !st.is_ancestor(&current, commit) {
            return Err(RemoteError::Rejected("update is not a fast forward".into()));
        }
        st.refs.insert(branch.to_string(), commit.clone());
        Ok(())
    }
}
