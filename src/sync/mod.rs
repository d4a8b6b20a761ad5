mod jobs;
mod resolve;
mod tree;
mod upload;

use anyhow::{Context, Result, anyhow, bail};
use indicatif::MultiProgress;

use crate::error::{SyncError, SyncErrorKind, SyncStep};
use crate::host::github::GitHub;
use crate::host::memory::MemoryStore;
use crate::host::{ObjectId, ObjectStore, Provisioner};
use crate::progress;
use crate::settings::{Settings, SyncMode};

pub use jobs::{SHARED_README_PATH, SyncJob, build_jobs};
pub use resolve::{bootstrap_branch, resolve_branch};
pub use tree::{build_tree, tree_entries};
pub use upload::{UploadedObject, upload_files};

/// Per-run parameters of the engine.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Branch new branches are created from.
    pub default_branch: String,
    pub mode: SyncMode,
    pub upload_threads: usize,
}

impl SyncOptions {
    pub fn new(settings: &Settings, default_branch: &str) -> Self {
        Self {
            default_branch: default_branch.to_string(),
            mode: settings.mode,
            upload_threads: settings.upload_threads,
        }
    }
}

/// Outcome of one successful branch synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub branch: String,
    pub commit: ObjectId,
    pub parent: ObjectId,
    /// The branch did not exist and was created from the default branch.
    pub bootstrapped: bool,
    pub files: usize,
}

/// Publish one folder onto one branch.
///
/// Steps, each depending on the previous one:
/// 1. enumerate the folder (nothing remote happens if this fails),
/// 2. resolve the branch tip, or create the branch from the default
///    branch's tip when it does not exist,
/// 3. read and upload every file as a blob,
/// 4. build the tree on top of the parent tree ([`SyncMode::Overlay`]) or
///    from scratch ([`SyncMode::Replace`]),
/// 5. commit it with the resolved tip as the single parent,
/// 6. check the tip has not moved, then advance the branch.
///
/// The ref only moves after the commit exists, so a failure at any step
/// leaves the branch where it was (or, after a bootstrap, at the default
/// branch's tip).
pub fn sync_branch<S: ObjectStore + ?Sized>(
    store: &S,
    job: &SyncJob,
    opts: &SyncOptions,
) -> Result<SyncResult, SyncError> {
    let branch = job.branch.as_str();
    let at = |step: SyncStep| move |kind: SyncErrorKind| SyncError::new(branch, step, kind);

    let files = job.local_files().map_err(at(SyncStep::ReadContent))?;
    log::info!("{branch}: {} files in {}", files.len(), job.folder.display());

    let (state, bootstrapped) = match resolve_branch(store, branch)
        .map_err(|e| SyncError::new(branch, SyncStep::ResolveBranch, e))?
    {
        Some(s) => (s, false),
        None => {
            let s = bootstrap_branch(store, branch, &opts.default_branch)
                .map_err(|e| SyncError::new(branch, SyncStep::Bootstrap, e))?;
            (s, true)
        }
    };

    let uploads = upload_files(store, &files, opts.upload_threads)
        .map_err(at(SyncStep::UploadContent))?;

    let base = match opts.mode {
        SyncMode::Overlay => Some(&state.root_tree),
        SyncMode::Replace => None,
    };
    let tree = build_tree(store, base, &uploads)
        .map_err(|e| SyncError::new(branch, SyncStep::BuildTree, e))?;

    let commit = store
        .create_commit(&tree, &state.tip_commit, &job.message)
        .map_err(|e| SyncError::new(branch, SyncStep::Commit, e))?;

    let current = store
        .get_ref(branch)
        .map_err(|e| SyncError::new(branch, SyncStep::AdvanceRef, e))?;
    if current.as_ref() != Some(&state.tip_commit) {
        return Err(SyncError::new(
            branch,
            SyncStep::AdvanceRef,
            SyncErrorKind::RefConflict {
                expected: state.tip_commit,
                found: current.map_or_else(|| "<deleted>".to_string(), |c| c.to_string()),
            },
        ));
    }
    store
        .update_ref(branch, &commit)
        .map_err(|e| SyncError::new(branch, SyncStep::AdvanceRef, e))?;

    log::info!("{branch}: {} -> {commit}", state.tip_commit);
    Ok(SyncResult {
        branch: job.branch.clone(),
        commit,
        parent: state.tip_commit,
        bootstrapped,
        files: uploads.len(),
    })
}

fn short(id: &ObjectId) -> &str {
    let s = id.as_str();
    &s[..s.len().min(7)]
}

/// Run every job one after another. A failed branch does not stop the next.
pub fn sync_all<S: ObjectStore + ?Sized>(
    store: &S,
    jobs: &[SyncJob],
    opts: &SyncOptions,
    mp: &MultiProgress,
) -> Vec<Result<SyncResult, SyncError>> {
    let mut results = Vec::with_capacity(jobs.len());
    for job in jobs {
        let pb = progress::start(mp, format!("syncing {}", job.branch));
        let res = sync_branch(store, job, opts);
        match &res {
            Ok(r) => {
                let created = if r.bootstrapped { " (new branch)" } else { "" };
                progress::finish_ok(
                    &pb,
                    format!(
                        "{}: {} files -> {}{}",
                        r.branch,
                        r.files,
                        short(&r.commit),
                        created
                    ),
                );
            }
            Err(e) => {
                log::error!("{e}");
                progress::finish_err(&pb, e.to_string());
            }
        }
        results.push(res);
    }
    results
}

/// Collapse per-branch results into one error naming the failed branches.
pub fn summarize(results: Vec<Result<SyncResult, SyncError>>) -> Result<Vec<SyncResult>> {
    let total = results.len();
    let mut ok = Vec::new();
    let mut failed = Vec::new();
    for r in results {
        match r {
            Ok(r) => ok.push(r),
            Err(e) => failed.push(e.branch),
        }
    }
    if failed.is_empty() {
        Ok(ok)
    } else {
        Err(anyhow!(
            "{} of {} branches failed to sync: {}",
            failed.len(),
            total,
            failed.join(", ")
        ))
    }
}

/// Sync against an in-memory store seeded like a freshly created repository
/// and print the tree each branch would get.
pub(crate) fn dry_run(settings: &Settings, mp: &MultiProgress) -> Result<()> {
    const DEFAULT_BRANCH: &str = "main";
    let store = MemoryStore::initialized(DEFAULT_BRANCH);
    let jobs = build_jobs(settings);
    let opts = SyncOptions::new(settings, DEFAULT_BRANCH);

    let results = summarize(sync_all(&store, &jobs, &opts, mp))?;
    for r in &results {
        println!(
            "{} -> commit {} ({} files uploaded):",
            r.branch,
            short(&r.commit),
            r.files
        );
        let tree = store
            .commit(&r.commit)
            .map(|c| c.tree)
            .context("dry-run commit vanished")?;
        for path in store.tree_entries(&tree).unwrap_or_default().keys() {
            println!("  {path}");
        }
    }
    Ok(())
}

/// CLI command: publish the branch folders into an existing repository.
///
/// Unlike `publish`, no repository is created and no settings, issues or
/// permissions are touched.
///
/// # Errors
/// - The repository does not exist or cannot be read.
/// - Any branch failed to sync (the others are still attempted).
pub fn cmd_sync(settings: &Settings) -> Result<()> {
    let mp = MultiProgress::new();
    if settings.dry_run {
        return dry_run(settings, &mp);
    }

    let token = settings
        .token
        .as_deref()
        .context("no GitHub access token")?;
    let gh = GitHub::new(&settings.api_url, token).context("failed to build GitHub client")?;
    let name = &settings.layout.repo_name;

    let pb = progress::start(&mp, format!("looking up {}/{}", settings.owner, name));
    let repo = match gh.find_repository(&settings.owner, name) {
        Ok(Some(r)) => {
            progress::finish_ok(&pb, format!("found {}/{}", r.owner, r.name));
            r
        }
        Ok(None) => {
            progress::finish_err(&pb, format!("{}/{} does not exist", settings.owner, name));
            bail!(
                "repository {}/{} does not exist, run `expub publish` first",
                settings.owner,
                name
            );
        }
        Err(e) => {
            progress::finish_err(&pb, e.to_string());
            return Err(e).context("failed to look up repository");
        }
    };

    let store = gh.repo(&repo.owner, &repo.name);
    let opts = SyncOptions::new(settings, &repo.default_branch);
    summarize(sync_all(&store, &build_jobs(settings), &opts, &mp))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::host::{BlobContent, TreeEntry};
    use indicatif::ProgressDrawTarget;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn opts(mode: SyncMode) -> SyncOptions {
        SyncOptions {
            default_branch: "main".into(),
            mode,
            upload_threads: 4,
        }
    }

    fn job(root: &Path, branch: &str) -> SyncJob {
        let readme = root.join("README.md");
        SyncJob {
            branch: branch.into(),
            folder: root.join(branch),
            readme: readme.is_file().then_some(readme),
            message: format!("sync {branch}"),
        }
    }

    /// Delegates to a [`MemoryStore`] but fails the n-th blob upload.
    struct FlakyStore {
        inner: MemoryStore,
        fail_at: usize,
        blobs: AtomicUsize,
    }

    impl ObjectStore for FlakyStore {
        fn create_blob(&self, content: &BlobContent) -> Result<ObjectId, RemoteError> {
            if self.blobs.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_at {
                return Err(RemoteError::Rejected("simulated upload failure".into()));
            }
            self.inner.create_blob(content)
        }
        fn create_tree(
            &self,
            base: Option<&ObjectId>,
            entries: &[TreeEntry],
        ) -> Result<ObjectId, RemoteError> {
            self.inner.create_tree(base, entries)
        }
        fn create_commit(
            &self,
            tree: &ObjectId,
            parent: &ObjectId,
            message: &str,
        ) -> Result<ObjectId, RemoteError> {
            self.inner.create_commit(tree, parent, message)
        }
        fn commit_tree(&self, commit: &ObjectId) -> Result<ObjectId, RemoteError> {
            self.inner.commit_tree(commit)
        }
        fn get_ref(&self, branch: &str) -> Result<Option<ObjectId>, RemoteError> {
            self.inner.get_ref(branch)
        }
        fn create_ref(&self, branch: &str, commit: &ObjectId) -> Result<(), RemoteError> {
            self.inner.create_ref(branch, commit)
        }
        fn update_ref(&self, branch: &str, commit: &ObjectId) -> Result<(), RemoteError> {
            self.inner.update_ref(branch, commit)
        }
    }

    /// Moves the branch behind the engine's back right after the commit.
    struct RacingStore {
        inner: MemoryStore,
    }

    impl ObjectStore for RacingStore {
        fn create_blob(&self, content: &BlobContent) -> Result<ObjectId, RemoteError> {
            self.inner.create_blob(content)
        }
        fn create_tree(
            &self,
            base: Option<&ObjectId>,
            entries: &[TreeEntry],
        ) -> Result<ObjectId, RemoteError> {
            self.inner.create_tree(base, entries)
        }
        fn create_commit(
            &self,
            tree: &ObjectId,
            parent: &ObjectId,
            message: &str,
        ) -> Result<ObjectId, RemoteError> {
            let id = self.inner.create_commit(tree, parent, message)?;
            self.inner
                .commit_files("main", &[("other.txt", b"concurrent")], "someone else")?;
            Ok(id)
        }
        fn commit_tree(&self, commit: &ObjectId) -> Result<ObjectId, RemoteError> {
            self.inner.commit_tree(commit)
        }
        fn get_ref(&self, branch: &str) -> Result<Option<ObjectId>, RemoteError> {
            self.inner.get_ref(branch)
        }
        fn create_ref(&self, branch: &str, commit: &ObjectId) -> Result<(), RemoteError> {
            self.inner.create_ref(branch, commit)
        }
        fn update_ref(&self, branch: &str, commit: &ObjectId) -> Result<(), RemoteError> {
            self.inner.update_ref(branch, commit)
        }
    }

    fn tree_of(store: &MemoryStore, commit: &ObjectId) -> BTreeMap<String, ObjectId> {
        let tree = store.commit(commit).unwrap().tree;
        store.tree_entries(&tree).unwrap()
    }

    #[test]
    fn resync_without_changes_reuses_blobs_but_not_commits() {
        let td = tempdir().unwrap();
        let root = td.path();
        fs::create_dir_all(root.join("main")).unwrap();
        fs::write(root.join("main/a.txt"), "hello").unwrap();

        let store = MemoryStore::initialized("main");
        let j = job(root, "main");
        let first = sync_branch(&store, &j, &opts(SyncMode::Overlay)).unwrap();
        let second = sync_branch(&store, &j, &opts(SyncMode::Overlay)).unwrap();

        assert_ne!(first.commit, second.commit);
        assert_eq!(second.parent, first.commit);
        assert_eq!(tree_of(&store, &first.commit), tree_of(&store, &second.commit));
        assert_eq!(store.tip("main"), Some(second.commit));
    }

    #[test]
    fn overlay_keeps_files_missing_locally() {
        let td = tempdir().unwrap();
        let root = td.path();
        fs::create_dir_all(root.join("main")).unwrap();
        fs::write(root.join("main/a.txt"), "a v2").unwrap();
        fs::write(root.join("main/c.txt"), "c").unwrap();

        let store = MemoryStore::initialized("main");
        store
            .commit_files("main", &[("a.txt", b"a v1"), ("b.txt", b"b")], "before")
            .unwrap();

        let r = sync_branch(&store, &job(root, "main"), &opts(SyncMode::Overlay)).unwrap();
        let entries = tree_of(&store, &r.commit);
        let paths: Vec<_> = entries.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt", "c.txt"]);
        assert_eq!(store.file_at("main", "a.txt").unwrap(), b"a v2");
        assert_eq!(store.file_at("main", "b.txt").unwrap(), b"b");
        assert_eq!(store.file_at("main", "c.txt").unwrap(), b"c");
    }

    #[test]
    fn replace_mode_drops_files_missing_locally() {
        let td = tempdir().unwrap();
        let root = td.path();
        fs::create_dir_all(root.join("main")).unwrap();
        fs::write(root.join("main/a.txt"), "a").unwrap();

        let store = MemoryStore::initialized("main");
        store
            .commit_files("main", &[("stale.txt", b"old")], "before")
            .unwrap();

        let r = sync_branch(&store, &job(root, "main"), &opts(SyncMode::Replace)).unwrap();
        let paths: Vec<_> = tree_of(&store, &r.commit).into_keys().collect();
        assert_eq!(paths, vec!["a.txt".to_string()]);
    }

    #[test]
    fn new_branch_descends_from_default_branch() {
        let td = tempdir().unwrap();
        let root = td.path();
        fs::create_dir_all(root.join("solution")).unwrap();
        fs::write(root.join("solution/answer.py"), "print(42)\n").unwrap();

        let store = MemoryStore::initialized("main");
        let main_tip = store
            .commit_files("main", &[("LICENSE", b"MIT")], "license")
            .unwrap();

        let r = sync_branch(&store, &job(root, "solution"), &opts(SyncMode::Overlay)).unwrap();
        assert!(r.bootstrapped);
        assert_eq!(r.parent, main_tip);
        assert!(store.is_ancestor(&main_tip, &r.commit));
        assert_eq!(store.tip("solution"), Some(r.commit.clone()));
        // The default branch content is carried over.
        assert_eq!(store.file_at("solution", "LICENSE").unwrap(), b"MIT");
        assert_eq!(store.tip("main"), Some(main_tip));
    }

    #[test]
    fn failed_upload_leaves_branch_untouched() {
        let td = tempdir().unwrap();
        let root = td.path();
        fs::create_dir_all(root.join("main")).unwrap();
        for i in 0..6 {
            fs::write(root.join(format!("main/f{i}.txt")), format!("{i}")).unwrap();
        }

        let store = FlakyStore {
            inner: MemoryStore::initialized("main"),
            fail_at: 4,
            blobs: AtomicUsize::new(0),
        };
        let before = store.inner.tip("main").unwrap();

        let err = sync_branch(&store, &job(root, "main"), &opts(SyncMode::Overlay)).unwrap_err();
        assert_eq!(err.step, SyncStep::UploadContent);
        assert_eq!(err.branch, "main");
        assert_eq!(store.inner.tip("main"), Some(before.clone()));
        // No commit other than the initial one exists on the branch.
        assert!(store.inner.commit(&before).unwrap().parents.is_empty());
    }

    #[test]
    fn moved_tip_is_reported_as_conflict() {
        let td = tempdir().unwrap();
        let root = td.path();
        fs::create_dir_all(root.join("main")).unwrap();
        fs::write(root.join("main/a.txt"), "a").unwrap();

        let store = RacingStore {
            inner: MemoryStore::initialized("main"),
        };
        let err = sync_branch(&store, &job(root, "main"), &opts(SyncMode::Overlay)).unwrap_err();
        assert_eq!(err.step, SyncStep::AdvanceRef);
        assert!(matches!(err.kind, SyncErrorKind::RefConflict { .. }));
        assert!(store.inner.file_at("main", "a.txt").is_none());
    }

    #[test]
    fn text_and_binary_round_trip_exactly() {
        let td = tempdir().unwrap();
        let root = td.path();
        fs::create_dir_all(root.join("main/assets")).unwrap();
        let text = "naïve café ☕\n".as_bytes().to_vec();
        let binary = vec![0x89, b'P', b'N', b'G', 0, 0, 0xff, 0x10];
        fs::write(root.join("main/notes.md"), &text).unwrap();
        fs::write(root.join("main/assets/logo.png"), &binary).unwrap();

        let store = MemoryStore::initialized("main");
        let files = job(root, "main").local_files().unwrap();
        let ups = upload_files(&store, &files, 2).unwrap();
        let by_path = |p: &str| ups.iter().find(|u| u.remote_path == p).unwrap();
        assert!(!by_path("notes.md").binary);
        assert!(by_path("assets/logo.png").binary);

        sync_branch(&store, &job(root, "main"), &opts(SyncMode::Overlay)).unwrap();
        assert_eq!(store.file_at("main", "notes.md").unwrap(), text);
        assert_eq!(store.file_at("main", "assets/logo.png").unwrap(), binary);
    }

    #[test]
    fn nested_files_and_shared_readme_land_where_expected() {
        let td = tempdir().unwrap();
        let root = td.path();
        fs::create_dir_all(root.join("main/sub")).unwrap();
        fs::create_dir_all(root.join("solution/sub")).unwrap();
        fs::write(root.join("main/sub/file.txt"), "todo").unwrap();
        fs::write(root.join("solution/sub/file.txt"), "done").unwrap();
        fs::write(root.join("README.md"), "# Exercise").unwrap();

        let store = MemoryStore::initialized("main");
        let jobs = vec![job(root, "main"), job(root, "solution")];
        let mp = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());
        let results = summarize(sync_all(&store, &jobs, &opts(SyncMode::Overlay), &mp)).unwrap();
        assert_eq!(results.len(), 2);

        for branch in ["main", "solution"] {
            assert_eq!(store.file_at(branch, "README.md").unwrap(), b"# Exercise");
        }
        assert_eq!(store.file_at("main", "sub/file.txt").unwrap(), b"todo");
        assert_eq!(store.file_at("solution", "sub/file.txt").unwrap(), b"done");
        assert!(store.file_at("main", "main/sub/file.txt").is_none());
    }

    #[test]
    fn one_failing_branch_does_not_stop_the_other() {
        let td = tempdir().unwrap();
        let root = td.path();
        fs::create_dir_all(root.join("solution")).unwrap();
        fs::write(root.join("solution/s.txt"), "s").unwrap();

        let store = MemoryStore::initialized("main");
        // `main/` is missing, so the first job fails while reading.
        let jobs = vec![job(root, "main"), job(root, "solution")];
        let mp = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());
        let results = sync_all(&store, &jobs, &opts(SyncMode::Overlay), &mp);

        match &results[0] {
            Err(e) => assert_eq!(e.step, SyncStep::ReadContent),
            Ok(_) => panic!("main should fail"),
        }
        assert!(results[1].is_ok());
        let err = summarize(results).unwrap_err().to_string();
        assert!(err.contains("1 of 2"));
        assert!(err.contains("main"));
    }
}
