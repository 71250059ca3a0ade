use std::path::{Path, PathBuf};

/// Default on-disk root for all runtime state. Overridable via
/// `MINICTR_ROOT` so tests never touch `/root/.mini-container`.
pub const DEFAULT_ROOT: &str = "/root/.mini-container";

pub const PROJECT_NAME: &str = "mini-container";

pub const DEFAULT_BRIDGE_NAME: &str = "mini-ctr0";
pub const DEFAULT_BRIDGE_GATEWAY: &str = "192.172.0.1/24";

pub const CGROUPS_ROOT: &str = "/sys/fs/cgroup";

pub fn root_dir() -> PathBuf {
    std::env::var("MINICTR_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_ROOT))
}

pub fn mnt_dir(root: &Path) -> PathBuf {
    root.join("mnt")
}

pub fn work_dir(root: &Path) -> PathBuf {
    root.join("work")
}

pub fn cow_dir(root: &Path) -> PathBuf {
    root.join("cow")
}

pub fn config_dir(root: &Path) -> PathBuf {
    root.join("config")
}

pub fn ip_pool_path(root: &Path) -> PathBuf {
    root.join("ip-pool.json")
}
