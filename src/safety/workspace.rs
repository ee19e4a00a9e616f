/// Per-request temporary workspaces for sources and build artifacts.
///
/// Every workspace is a uuid-named directory below the configured root,
/// owned by exactly one request and removed on every exit path.
use crate::config::types::{Result, TutorError};
use crate::observability::{audit, metrics};
use crate::safety::removal;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

pub struct TempWorkspace {
    run_id: String,
    run_dir: PathBuf,
    source_file: PathBuf,
    binary_file: Option<PathBuf>,
    released: bool,
}

impl TempWorkspace {
    /// Create a fresh run directory under `root` and write the source into it.
    pub fn acquire(root: &Path, source_text: &str, source_extension: &str) -> Result<Self> {
        let run_id = Uuid::new_v4().to_string();
        let run_dir = root.join(&run_id);

        fs::create_dir_all(&run_dir).map_err(|e| {
            TutorError::Workspace(format!(
                "Failed to create workspace directory {}: {}",
                run_dir.display(),
                e
            ))
        })?;

        let workspace = Self {
            run_id,
            source_file: run_dir.join(format!("source.{}", source_extension)),
            run_dir,
            binary_file: None,
            released: false,
        };

        // On write failure the partially built workspace is dropped and removed.
        fs::write(&workspace.source_file, source_text).map_err(|e| {
            TutorError::Workspace(format!(
                "Failed to write source file {}: {}",
                workspace.source_file.display(),
                e
            ))
        })?;

        log::debug!("Acquired workspace {}", workspace.run_dir.display());
        Ok(workspace)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    /// Reserve the output path of a build step inside this workspace.
    pub fn reserve_binary(&mut self, name: &str) -> PathBuf {
        let path = self.run_dir.join(name);
        self.binary_file = Some(path.clone());
        path
    }

    pub fn binary_file(&self) -> Option<&Path> {
        self.binary_file.as_deref()
    }

    /// Delete everything this workspace created. Safe to call repeatedly.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        match removal::remove_tree_nofollow(&self.run_dir) {
            Ok(()) => {
                log::debug!("Released workspace {}", self.run_dir.display());
                metrics::get_metrics().record_cleanup(true);
                Ok(())
            }
            Err(e) => {
                audit::cleanup_failure(&self.run_id, e.to_string());
                metrics::get_metrics().record_cleanup(false);
                Err(e)
            }
        }
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("Failed to release workspace {}: {}", self.run_dir.display(), e);
        }
    }
}

/// Sweeps workspaces orphaned by crashed processes.
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove run directories whose modification time is older than `max_age`.
    /// Returns the number of directories removed.
    pub fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }

        let entries = fs::read_dir(&self.root).map_err(|e| {
            TutorError::Workspace(format!(
                "Failed to read workspace root {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let now = SystemTime::now();
        let mut removed = 0;

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::warn!("Failed to read directory entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            let modified = match fs::symlink_metadata(&path).and_then(|m| {
                if m.is_dir() {
                    m.modified()
                } else {
                    Err(std::io::Error::new(std::io::ErrorKind::Other, "not a directory"))
                }
            }) {
                Ok(m) => m,
                Err(_) => continue,
            };

            // Timestamps in the future are skipped
            let Ok(age) = now.duration_since(modified) else {
                continue;
            };

            if age >= max_age {
                log::info!("Removing stale workspace {}", path.display());
                match removal::remove_tree_nofollow(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => log::warn!("Failed to remove stale workspace {}: {}", path.display(), e),
                }
            }
        }

        metrics::get_metrics().workspaces_swept.add(removed as u64);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_source_and_release_removes_everything() {
        let root = tempfile::tempdir().unwrap();
        let mut workspace = TempWorkspace::acquire(root.path(), "int main(){}", "c").unwrap();

        let source = workspace.source_file().to_path_buf();
        assert_eq!(fs::read_to_string(&source).unwrap(), "int main(){}");
        assert_eq!(source.extension().unwrap(), "c");

        let binary = workspace.reserve_binary("program");
        fs::write(&binary, b"\x7fELF").unwrap();
        let run_dir = workspace.run_dir().to_path_buf();

        workspace.release().unwrap();
        assert!(!run_dir.exists());
        assert!(!binary.exists());

        // Idempotent
        workspace.release().unwrap();
    }

    #[test]
    fn drop_releases_workspace() {
        let root = tempfile::tempdir().unwrap();
        let run_dir = {
            let workspace = TempWorkspace::acquire(root.path(), "print(1)", "py").unwrap();
            workspace.run_dir().to_path_buf()
        };
        assert!(!run_dir.exists());
    }

    #[test]
    fn drop_releases_workspace_during_panic() {
        let root = tempfile::tempdir().unwrap();
        let root_path = root.path().to_path_buf();
        let outcome = std::panic::catch_unwind(move || {
            let _workspace = TempWorkspace::acquire(&root_path, "x", "js").unwrap();
            panic!("backend failure");
        });
        assert!(outcome.is_err());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn workspaces_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let a = TempWorkspace::acquire(root.path(), "a", "c").unwrap();
        let b = TempWorkspace::acquire(root.path(), "b", "c").unwrap();
        assert_ne!(a.run_dir(), b.run_dir());
        assert_ne!(a.run_id(), b.run_id());
    }

    #[test]
    fn sweep_removes_only_old_directories() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("orphan")).unwrap();
        fs::write(root.path().join("not-a-run"), b"x").unwrap();

        let manager = WorkspaceManager::new(root.path().to_path_buf());
        assert_eq!(manager.sweep_stale(Duration::from_secs(3600)).unwrap(), 0);
        assert!(root.path().join("orphan").exists());

        assert_eq!(manager.sweep_stale(Duration::ZERO).unwrap(), 1);
        assert!(!root.path().join("orphan").exists());
        assert!(root.path().join("not-a-run").exists());
    }

    #[test]
    fn sweep_of_missing_root_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path().join("never-created"));
        assert_eq!(manager.sweep_stale(Duration::ZERO).unwrap(), 0);
    }
}
