use log::warn;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("input path {0} does not exist")]
    Missing(PathBuf),
    #[error("failed to read directory {path}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.starts_with('.'))
}

/// List the input files under `root`, sorted by path.
///
/// A file root yields itself. Directories are descended into only when
/// `recursive` is set; hidden entries are skipped.
pub fn list_input_files(root: &Path, recursive: bool) -> Result<Vec<PathBuf>, EnumerationError> {
    let meta = fs::metadata(root).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => EnumerationError::Missing(root.to_path_buf()),
        _ => EnumerationError::Unreadable {
            path: root.to_path_buf(),
            source: e,
        },
    })?;

    let mut files = Vec::new();
    if meta.is_file() {
        files.push(root.to_path_buf());
    } else {
        collect_dir(root, recursive, &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn collect_dir(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> Result<(), EnumerationError> {
    let unreadable = |source| EnumerationError::Unreadable {
        path: dir.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(dir).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        if is_hidden(&path) {
            continue;
        }
        // Follow symlinks so linked run folders are picked up. An entry that
        // cannot be stat'ed is kept so the reader reports it as a skip.
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("cannot stat {}: {}", path.display(), e);
                out.push(path);
                continue;
            }
        };
        if meta.is_dir() {
            if recursive {
                if let Err(e) = collect_dir(&path, recursive, out) {
                    warn!("skipping subdirectory: {:#}", anyhow::Error::from(e));
                }
            }
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// Split `files` into ordered batches of `batch_size`; the last batch may be
/// shorter.
///
/// # Panics
/// Panics if `batch_size` is zero; the run configuration rejects that value.
pub fn batch_files(files: Vec<PathBuf>, batch_size: usize) -> Vec<Vec<PathBuf>> {
    assert!(batch_size > 0, "batch size must be positive");
    files.chunks(batch_size).map(|c| c.to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn touch(p: &Path) {
        File::create(p).unwrap();
    }

    #[test]
    fn test_list_sorted_and_recursive() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("b.json"));
        touch(&dir.path().join("a.json"));
        touch(&dir.path().join(".hidden"));
        fs::create_dir(dir.path().join("sub")).unwrap();
        touch(&dir.path().join("sub/c.json"));

        let flat = list_input_files(dir.path(), false).unwrap();
        assert_eq!(
            flat,
            vec![dir.path().join("a.json"), dir.path().join("b.json")]
        );

        let deep = list_input_files(dir.path(), true).unwrap();
        assert_eq!(deep.len(), 3);
        assert_eq!(deep[2], dir.path().join("sub/c.json"));
    }

    #[test]
    fn test_missing_root() {
        let dir = tempdir().unwrap();
        let res = list_input_files(&dir.path().join("nope"), true);
        assert!(matches!(res, Err(EnumerationError::Missing(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_listed() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("f1.json"));
        std::os::unix::fs::symlink(dir.path().join("gone.json"), dir.path().join("f2.json")).unwrap();

        let files = list_input_files(dir.path(), true).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("f1.json"), dir.path().join("f2.json")]
        );
    }

    #[test]
    fn test_batching() {
        let files: Vec<PathBuf> = (0..5).map(|i| PathBuf::from(format!("{i}.json"))).collect();
        let batches = batch_files(files, 2);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2], vec![PathBuf::from("4.json")]);
        assert!(batch_files(Vec::new(), 3).is_empty());
    }
}
