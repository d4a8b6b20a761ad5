use std::path::{Component, Path, PathBuf};

/// Maps local file paths to tree-relative remote paths.
///
/// A file at `folder/x/y.ext` maps to `x/y.ext`. Exactly one file living
/// outside the folder may be promoted to a fixed root-level path; this is
/// how one shared readme ends up at `README.md` in every synced branch.
#[derive(Debug, Clone)]
pub struct PathMapper {
    folder: PathBuf,
    promoted: Option<(PathBuf, String)>,
}

impl PathMapper {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            promoted: None,
        }
    }

    /// Designate `source` (outside the folder) to land at `remote` in the tree.
    pub fn promote(mut self, source: impl Into<PathBuf>, remote: &str) -> Self {
        self.promoted = Some((source.into(), remote.trim_start_matches('/').to_string()));
        self
    }

    /// The promoted file and its remote path, if any.
    pub fn promoted(&self) -> Option<(&Path, &str)> {
        self.promoted
            .as_ref()
            .map(|(p, r)| (p.as_path(), r.as_str()))
    }

    /// Remote path for `file`, or `None` when it lies outside the folder
    /// (and is not the promoted file) or is not valid UTF-8.
    pub fn remote_path(&self, file: &Path) -> Option<String> {
        if let Some((src, remote)) = &self.promoted
            && src == file
        {
            return Some(remote.clone());
        }
        let rel = file.strip_prefix(&self.folder).ok()?;
        to_tree_path(rel)
    }
}

/// Join normal components with `/`. `..`, roots and non-UTF-8 names yield `None`.
fn to_tree_path(rel: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for c in rel.components() {
        match c {
            Component::Normal(s) => parts.push(s.to_str()?),
            Component::CurDir => continue,
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_the_folder_prefix() {
        let m = PathMapper::new("/work/ex1/main");
        assert_eq!(
            m.remote_path(Path::new("/work/ex1/main/sub/file.txt")).as_deref(),
            Some("sub/file.txt")
        );
        assert_eq!(
            m.remote_path(Path::new("/work/ex1/main/.env")).as_deref(),
            Some(".env")
        );
    }

    #[test]
    fn outside_files_are_not_mapped() {
        let m = PathMapper::new("/work/ex1/main");
        assert_eq!(m.remote_path(Path::new("/work/ex1/solution/a.txt")), None);
        assert_eq!(m.remote_path(Path::new("/work/ex1/main")), None);
    }

    #[test]
    fn promoted_readme_lands_at_root() {
        let m = PathMapper::new("/work/ex1/solution").promote("/work/ex1/README.md", "README.md");
        assert_eq!(
            m.remote_path(Path::new("/work/ex1/README.md")).as_deref(),
            Some("README.md")
        );
        // Only the designated file is promoted.
        assert_eq!(m.remote_path(Path::new("/work/ex1/NOTES.md")), None);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_names_are_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let m = PathMapper::new("/w/main");
        let p = Path::new("/w/main").join(OsStr::from_bytes(b"bad\xff.txt"));
        assert_eq!(m.remote_path(&p), None);
    }
}
