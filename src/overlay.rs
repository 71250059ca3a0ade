use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::unistd::{chdir, pivot_root};

use crate::config;
use crate::error::{ContainerError, ContainerResult, Context};

/// Per-container overlay filesystem: an image directory as the read-only
/// lower layer, with a writable copy-on-write layer on top.
pub struct OverlayFs {
    root: PathBuf,
}

impl OverlayFs {
    pub fn new(root: PathBuf) -> Self {
        OverlayFs { root }
    }

    /// Creates the four per-container directories. Idempotent: treats an
    /// already-present mount directory as "already set up".
    pub fn create_dirs(&self, name: &str) -> ContainerResult<()> {
        let mnt = config::mnt_dir(&self.root).join(name);
        if mnt.exists() {
            return Ok(());
        }
        for dir in [
            &mnt,
            &config::work_dir(&self.root).join(name),
            &config::cow_dir(&self.root).join(name),
            &config::config_dir(&self.root).join(name),
        ] {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(dir)
                .context("create overlay directory")?;
        }
        Ok(())
    }

    pub fn mnt_dir(&self, name: &str) -> PathBuf {
        config::mnt_dir(&self.root).join(name)
    }

    /// Mounts `overlay` at `<root>/mnt/<name>` with `image_dir` (resolved
    /// to an absolute path) as the lower layer.
    pub fn mount(&self, name: &str, image_dir: &Path) -> ContainerResult<()> {
        let image_dir = fs::canonicalize(image_dir).context("resolve image directory")?;
        let mnt = config::mnt_dir(&self.root).join(name);
        let work = config::work_dir(&self.root).join(name);
        let cow = config::cow_dir(&self.root).join(name);

        let options = format!(
            "lowerdir={},upperdir={},workdir={}",
            image_dir.display(),
            cow.display(),
            work.display(),
        );

        mount(
            Some("overlay"),
            &mnt,
            Some("overlay"),
            MsFlags::empty(),
            Some(options.as_str()),
        )
        .map_err(|e| ContainerError::namespace_op(format!("overlay mount failed: {e}")))
    }

    /// Lazily unmounts the three working directories. Errors are
    /// collected, not fatal: the caller is usually tearing a container
    /// down and wants to remove directories regardless.
    pub fn unmount(&self, name: &str) -> ContainerResult<()> {
        let mut errors = Vec::new();
        for dir in [
            config::mnt_dir(&self.root).join(name),
            config::work_dir(&self.root).join(name),
            config::cow_dir(&self.root).join(name),
        ] {
            if dir.exists() {
                if let Err(e) = umount2(&dir, MntFlags::MNT_DETACH) {
                    errors.push(format!("{}: {e}", dir.display()));
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ContainerError::namespace_op(errors.join("; ")))
        }
    }

    /// Switches the calling process's mount namespace root to
    /// `<root>/mnt/<name>`, leaving the former root reachable at
    /// `/.old`. Must run inside the child after its namespaces exist.
    pub fn pivot_root(&self, name: &str) -> ContainerResult<()> {
        let merged = config::mnt_dir(&self.root).join(name);
        let old_root = merged.join(".old");

        mount(
            None::<&str>,
            "/",
            None::<&str>,
            MsFlags::MS_PRIVATE | MsFlags::MS_REC,
            None::<&str>,
        )
        .map_err(|e| ContainerError::namespace_op(format!("failed to make / private: {e}")))?;

        mount(
            Some(&merged),
            &merged,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None::<&str>,
        )
        .map_err(|e| ContainerError::namespace_op(format!("failed to bind-mount merged dir: {e}")))?;

        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&old_root)
            .context("create pivot_root old-root directory")?;

        pivot_root(&merged, &old_root)
            .map_err(|e| ContainerError::namespace_op(format!("pivot_root failed: {e}")))?;

        chdir("/").map_err(|e| ContainerError::namespace_op(format!("chdir / failed: {e}")))?;

        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create("/proc")
            .context("create /proc mountpoint")?;

        mount(
            Some("proc"),
            "/proc",
            Some("proc"),
            MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
            None::<&str>,
        )
        .map_err(|e| ContainerError::namespace_op(format!("mount /proc failed: {e}")))
    }
}
