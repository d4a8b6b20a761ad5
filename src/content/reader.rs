use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::ReadError;
use crate::host::BlobContent;

/// How many leading bytes are inspected for NUL when classifying content.
const SNIFF_LEN: usize = 8000;

/// Enumerate every regular file below `root`, recursively.
///
/// Dotfiles are included. Symlinks are followed only when they point at a
/// regular file; links to directories and dangling links are skipped, which
/// also rules out symlink cycles. The result is sorted for stable output.
///
/// # Errors
/// Returns a [`ReadError`] if `root` or any directory below it cannot be listed.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>, ReadError> {
    let mut out = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let rd = fs::read_dir(&dir).map_err(|e| ReadError::new(&dir, e))?;
        for ent in rd {
            let ent = ent.map_err(|e| ReadError::new(&dir, e))?;
            let path = ent.path();
            let ft = ent.file_type().map_err(|e| ReadError::new(&path, e))?;

            if ft.is_dir() {
                pending.push(path);
            } else if ft.is_file() {
                out.push(path);
            } else if ft.is_symlink() {
                match fs::metadata(&path) {
                    Ok(meta) if meta.is_file() => out.push(path),
                    Ok(_) => log::debug!("skipping non-file symlink {}", path.display()),
                    Err(e) => log::warn!("skipping dangling symlink {}: {}", path.display(), e),
                }
            }
        }
    }

    out.sort();
    Ok(out)
}

/// Read a file and classify it as text or binary by inspecting its bytes.
///
/// # Errors
/// Returns a [`ReadError`] if the file vanished or cannot be read.
pub fn read_content(path: &Path) -> Result<BlobContent, ReadError> {
    let bytes = fs::read(path).map_err(|e| ReadError::new(path, e))?;
    Ok(classify(bytes))
}

/// Text is valid UTF-8 without NUL bytes in the first [`SNIFF_LEN`] bytes.
/// Anything else is kept as raw bytes.
pub fn classify(bytes: Vec<u8>) -> BlobContent {
    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    if head.contains(&0) {
        return BlobContent::Binary(bytes);
    }
    match String::from_utf8(bytes) {
        Ok(s) => BlobContent::Text(s),
        Err(e) => BlobContent::Binary(e.into_bytes()),
    }
}

/// `true` when `path` exists and is a regular file (following symlinks).
pub fn is_regular_file(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(m) => Ok(m.is_file()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lists_nested_files_and_dotfiles() {
        let td = tempdir().unwrap();
        let root = td.path();
        fs::create_dir_all(root.join("sub/deeper")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::write(root.join(".gitignore"), "target\n").unwrap();
        fs::write(root.join("sub/deeper/Makefile"), "all:").unwrap();

        let got: Vec<_> = list_files(root)
            .unwrap()
            .into_iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            got,
            vec![
                PathBuf::from(".gitignore"),
                PathBuf::from("a.txt"),
                PathBuf::from("sub/deeper/Makefile"),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn follows_file_symlinks_but_not_directory_links() {
        use std::os::unix::fs as unix_fs;

        let td = tempdir().unwrap();
        let root = td.path().join("main");
        fs::create_dir_all(root.join("dir")).unwrap();
        fs::write(root.join("dir/real.txt"), "x").unwrap();
        unix_fs::symlink(root.join("dir/real.txt"), root.join("link.txt")).unwrap();
        unix_fs::symlink(root.join("dir"), root.join("loop")).unwrap();
        unix_fs::symlink(root.join("missing"), root.join("broken")).unwrap();

        let got = list_files(&root).unwrap();
        assert_eq!(got, vec![root.join("dir/real.txt"), root.join("link.txt")]);
    }

    #[test]
    fn missing_root_is_a_read_error() {
        let td = tempdir().unwrap();
        let err = list_files(&td.path().join("nope")).unwrap_err();
        assert_eq!(err.source.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn classifies_by_content_not_extension() {
        assert_eq!(
            classify(b"fn main() {}\n".to_vec()),
            BlobContent::Text("fn main() {}\n".into())
        );
        assert!(classify(b"PNG\0\x01\x02".to_vec()).is_binary());
        assert!(classify(vec![0xff, 0xfe, b'a']).is_binary());
        assert_eq!(classify(Vec::new()), BlobContent::Text(String::new()));
    }

    #[test]
    fn read_content_fails_for_vanished_file() {
        let td = tempdir().unwrap();
        let p = td.path().join("gone.txt");
        fs::write(&p, "x").unwrap();
        fs::remove_file(&p).unwrap();
        assert!(read_content(&p).is_err());
    }
}
