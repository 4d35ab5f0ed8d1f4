use crate::error::{Error, Result};

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nix::unistd::{self, Gid, Uid};
use tracing::{debug, warn};
use uuid::Uuid;

/// Allocates per-request working directories under a common root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    uid: Uid,
    gid: Gid,
}

/// An exclusively owned working directory. Removed on [`Workspace::destroy`]
/// or, at the latest, on drop.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    root: PathBuf,
    created_at: DateTime<Utc>,
    destroyed: bool,
}

impl WorkspaceManager {
    pub fn new(root: PathBuf, uid: u32, gid: u32) -> Result<Self> {
        if !root.exists() {
            fs::create_dir_all(&root).map_err(Error::workspace(format!(
                "failed to create workspace root: path = {}",
                root.display()
            )))?;
        }
        let root = fs::canonicalize(&root).map_err(Error::workspace(format!(
            "failed to resolve workspace root: path = {}",
            root.display()
        )))?;
        Ok(Self {
            root,
            uid: Uid::from_raw(uid),
            gid: Gid::from_raw(gid),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allocate(&self, id: Uuid) -> Result<Workspace> {
        let path = self.root.join(id.to_string());

        // `create_dir` rather than `create_dir_all`: an existing directory
        // means the id is not fresh.
        fs::create_dir(&path).map_err(Error::workspace(format!(
            "failed to create workspace: path = {}",
            path.display()
        )))?;

        let workspace = Workspace {
            id,
            root: path,
            created_at: Utc::now(),
            destroyed: false,
        };

        self.hand_over(&workspace.root)
            .map_err(Error::workspace("failed to hand over workspace"))?;

        debug!(id = %workspace.id, path = %workspace.root.display(), "workspace allocated");
        Ok(workspace)
    }

    /// Makes the directory writable for the sandbox identity.
    fn hand_over(&self, path: &Path) -> io::Result<()> {
        if unistd::getuid().is_root() {
            unistd::chown(path, Some(self.uid), Some(self.gid)).map_err(io::Error::from)
        } else {
            fs::set_permissions(path, fs::Permissions::from_mode(0o777))
        }
    }
}

impl Workspace {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn write_file(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.file(name);
        fs::write(&path, content).map_err(Error::workspace(format!(
            "failed to write file: path = {}",
            path.display()
        )))?;
        Ok(path)
    }

    /// Removes the directory. Safe to call repeatedly, and when the
    /// directory is already gone.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        match fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(id = %self.id, "workspace destroyed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(id = %self.id, %err, "failed to destroy workspace");
                return;
            }
        }
        self.destroyed = true;
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.destroy()
    }
}
