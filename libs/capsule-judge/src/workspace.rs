//! Ephemeral per-invocation workspace.
//!
//! The directory is named from a fresh execution id and created with
//! `create_dir` (not `create_dir_all`), so an existing directory is an error
//! instead of silent reuse. Removal happens in `Drop`: every exit path of the
//! owning invocation, including `?` returns and panics, deletes it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

pub struct Workspace {
    execution_id: Uuid,
    dir: PathBuf,
}

impl Workspace {
    pub fn create(root: &Path) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let execution_id = Uuid::new_v4();
        let dir = root.join(format!("capsule-{}", execution_id));
        fs::create_dir(&dir)?;
        debug!(execution_id = %execution_id, dir = %dir.display(), "Workspace created");
        Ok(Self { execution_id, dir })
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(execution_id = %self.execution_id, "Workspace removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                execution_id = %self.execution_id,
                dir = %self.dir.display(),
                error = %e,
                "Failed to remove workspace"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let ws = Workspace::create(root.path()).unwrap();
            fs::write(ws.file("main.c"), "int main(){}").unwrap();
            fs::create_dir(ws.file("nested")).unwrap();
            fs::write(ws.file("nested/a.out"), [0u8; 16]).unwrap();
            assert!(ws.path().is_dir());
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_workspaces_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let a = Workspace::create(root.path()).unwrap();
        let b = Workspace::create(root.path()).unwrap();
        assert_ne!(a.path(), b.path());
        assert_ne!(a.execution_id(), b.execution_id());
        assert!(a.path().file_name().unwrap().to_string_lossy().contains(&a.execution_id().to_string()));
    }

    #[test]
    fn test_workspace_removed_on_panic() {
        let root = tempfile::tempdir().unwrap();
        let root_path = root.path().to_path_buf();
        let outcome = std::panic::catch_unwind(move || {
            let ws = Workspace::create(&root_path).unwrap();
            fs::write(ws.file("x"), "y").unwrap();
            panic!("judge bug");
        });
        assert!(outcome.is_err());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
