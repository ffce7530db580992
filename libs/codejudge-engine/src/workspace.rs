//! Workspace Manager - per-request scratch directories
//!
//! Every native execution gets a fresh `run-<random>` directory under the
//! configured root, backed by [`tempfile::TempDir`]. The directory is
//! removed when the [`Workspace`] is dropped, so early returns, errors and
//! panics all clean up.

use crate::error::{EngineError, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    /// Canonical form of `dir`; programs run with the workspace as cwd.
    path: PathBuf,
}

impl Workspace {
    /// Create a uniquely named directory below `root`.
    pub fn create(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(EngineError::Workspace)?;

        let dir = tempfile::Builder::new()
            .prefix("run-")
            .tempdir_in(root)
            .map_err(EngineError::Workspace)?;
        let path = dir
            .path()
            .canonicalize()
            .unwrap_or_else(|_| dir.path().to_path_buf());

        debug!(workspace = %path.display(), "Workspace created");
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub async fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.file(name);
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    /// Remove the directory now and report failures to the caller.
    pub fn close(self) -> Result<()> {
        let path = self.path;
        self.dir.close().map_err(EngineError::Workspace)?;
        debug!(workspace = %path.display(), "Workspace removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let dir = {
            let ws = Workspace::create(root.path()).unwrap();
            assert!(ws.path().is_dir());
            std::fs::write(ws.file("main.c"), "int main(void){return 0;}").unwrap();
            ws.path().to_path_buf()
        };
        assert!(!dir.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_workspaces_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let a = Workspace::create(root.path()).unwrap();
        let b = Workspace::create(root.path()).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("run-"));
    }

    #[test]
    fn test_close_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path()).unwrap();
        let dir = ws.path().to_path_buf();
        ws.close().unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_write_file() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path()).unwrap();
        let path = ws.write_file("main.cpp", "int main(){}").await.unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "int main(){}");
    }

    #[test]
    fn test_create_fails_under_file() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let err = Workspace::create(&blocker.join("nested")).unwrap_err();
        assert!(matches!(err, EngineError::Workspace(_)));
    }
}
