use crate::config::types::{Result, TutorError};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Remove a directory tree without following symlinks and without leaving the
/// filesystem the tree root lives on. Programs under test can plant symlinks
/// in their working directory; those are unlinked, never traversed.
pub fn remove_tree_nofollow(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(TutorError::Workspace(format!(
                "stat failed for {}: {}",
                path.display(),
                e
            )))
        }
    };

    if !meta.is_dir() {
        return remove_entry(path, false);
    }

    let root_dev = meta.dev();
    let mut pending = vec![(path.to_path_buf(), false)];

    // Post-order walk with an explicit stack: a directory is pushed back
    // marked `expanded` and removed after its children.
    while let Some((dir, expanded)) = pending.pop() {
        if expanded {
            remove_entry(&dir, true)?;
            continue;
        }
        pending.push((dir.clone(), true));

        let entries = fs::read_dir(&dir).map_err(|e| {
            TutorError::Workspace(format!("read_dir failed for {}: {}", dir.display(), e))
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| {
                TutorError::Workspace(format!("directory entry error in {}: {}", dir.display(), e))
            })?;
            let child = entry.path();
            let child_meta = fs::symlink_metadata(&child).map_err(|e| {
                TutorError::Workspace(format!("stat failed for {}: {}", child.display(), e))
            })?;

            if child_meta.is_dir() {
                if child_meta.dev() != root_dev {
                    return Err(TutorError::Workspace(format!(
                        "refusing to cross filesystem boundary at {}",
                        child.display()
                    )));
                }
                pending.push((child, false));
            } else {
                remove_entry(&child, false)?;
            }
        }
    }

    Ok(())
}

fn remove_entry(path: &Path, is_dir: bool) -> Result<()> {
    let outcome = if is_dir {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    };
    match outcome {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TutorError::Workspace(format!(
            "unlink failed for {}: {}",
            path.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_nested_tree() {
        let root = tempfile::tempdir().unwrap();
        let tree = root.path().join("run");
        fs::create_dir_all(tree.join("a/b")).unwrap();
        fs::write(tree.join("a/b/file.txt"), b"x").unwrap();
        fs::write(tree.join("top.c"), b"int main(){}").unwrap();

        remove_tree_nofollow(&tree).unwrap();
        assert!(!tree.exists());
    }

    #[test]
    fn symlink_targets_survive() {
        let root = tempfile::tempdir().unwrap();
        let outside = root.path().join("outside");
        fs::create_dir(&outside).unwrap();
        fs::write(outside.join("keep.txt"), b"keep").unwrap();

        let tree = root.path().join("run");
        fs::create_dir(&tree).unwrap();
        std::os::unix::fs::symlink(&outside, tree.join("link")).unwrap();

        remove_tree_nofollow(&tree).unwrap();
        assert!(!tree.exists());
        assert!(outside.join("keep.txt").exists());
    }

    #[test]
    fn missing_path_is_not_an_error() {
        let root = tempfile::tempdir().unwrap();
        assert!(remove_tree_nofollow(&root.path().join("absent")).is_ok());
    }
}
