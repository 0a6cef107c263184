use std::fs;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::judge::TestCase;
use crate::language::{INPUT_FILE_NAME, LanguageProfile};

// The sandboxed user is not necessarily the host user
const WORKSPACE_PERMISSIONS: u32 = 0o777;
// Others may enter a workspace by its unguessable name but not list the root
const ROOT_PERMISSIONS: u32 = 0o711;

/// Hands out one fresh directory per execution attempt under a fixed root
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = std::path::absolute(root.as_ref()).with_context(|| {
            format!("Invalid workspace root {}", root.as_ref().display())
        })?;
        let existed = root.exists();
        fs::DirBuilder::new()
            .recursive(true)
            .mode(ROOT_PERMISSIONS)
            .create(&root)
            .with_context(|| format!("Failed to create workspace root {}", root.display()))?;
        if !existed {
            // Undo the umask
            fs::set_permissions(&root, fs::Permissions::from_mode(ROOT_PERMISSIONS))
                .with_context(|| format!("Failed to restrict workspace root {}", root.display()))?;
        }
        check_root(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a workspace holding the test input and the submitted source
    ///
    /// The directory is removed when the returned handle is dropped, including
    /// when writing one of the files fails here.
    pub fn acquire(
        &self,
        test_case: &TestCase,
        source_code: &str,
        profile: &LanguageProfile,
    ) -> Result<Workspace> {
        let id = Uuid::new_v4();
        let path = self.root.join(id.to_string());
        fs::create_dir(&path)
            .with_context(|| format!("Failed to create workspace {}", path.display()))?;
        let workspace = Workspace { id, path };

        fs::set_permissions(
            &workspace.path,
            fs::Permissions::from_mode(WORKSPACE_PERMISSIONS),
        )?;
        fs::write(workspace.path.join(INPUT_FILE_NAME), &test_case.input)
            .context("Failed to write input file")?;
        fs::write(workspace.path.join(&profile.file_name), source_code)
            .context("Failed to write source file")?;

        log::debug!("Created workspace {}", workspace.path.display());
        Ok(workspace)
    }
}

/// A scoped working directory, deleted recursively on drop
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    path: PathBuf,
}

impl Workspace {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        remove_tree(&self.path);
        log::debug!("Removed workspace {}", self.path.display());
    }
}

/// Refuses a root another user could tamper with
fn check_root(root: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(root)
        .with_context(|| format!("Failed to inspect workspace root {}", root.display()))?;
    if !metadata.is_dir() {
        bail!("Workspace root {} is not a directory", root.display());
    }
    // SAFETY: geteuid has no preconditions and cannot fail
    let uid = unsafe { libc::geteuid() };
    if metadata.uid() != uid {
        bail!(
            "Workspace root {} is owned by uid {}, not {uid}",
            root.display(),
            metadata.uid()
        );
    }
    if metadata.mode() & 0o022 != 0 {
        bail!(
            "Workspace root {} is writable by other users (mode {:o})",
            root.display(),
            metadata.mode() & 0o777
        );
    }
    Ok(())
}

/// Deletes `root` children first, attempting every entry even after failures
fn remove_tree(root: &Path) {
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Failed to walk {}: {e}", root.display());
                continue;
            }
        };

        let path = entry.path();
        let removed = if entry.file_type().is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        };

        if let Err(e) = removed {
            log::warn!("Failed to delete: {} ({e})", path.display());
        }
    }
}
