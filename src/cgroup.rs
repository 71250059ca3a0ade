use std::fs;
use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{ContainerError, ContainerResult, Context};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CgroupKind {
    Cpu,
    Memory,
}

impl CgroupKind {
    fn subsystem(self) -> &'static str {
        match self {
            CgroupKind::Cpu => "cpu",
            CgroupKind::Memory => "memory",
        }
    }
}

/// A resource limit to apply to a container's child process: a CPU share
/// in `[1, 100]` percent, or a memory ceiling in MiB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CgroupDescriptor {
    pub kind: CgroupKind,
    pub container_name: String,
    pub value: u64,
}

impl CgroupDescriptor {
    pub fn cpu(container_name: impl Into<String>, percent: u64) -> Self {
        CgroupDescriptor {
            kind: CgroupKind::Cpu,
            container_name: container_name.into(),
            value: percent,
        }
    }

    pub fn memory(container_name: impl Into<String>, limit_mib: u64) -> Self {
        CgroupDescriptor {
            kind: CgroupKind::Memory,
            container_name: container_name.into(),
            value: limit_mib,
        }
    }

    fn path(&self) -> PathBuf {
        PathBuf::from(config::CGROUPS_ROOT)
            .join(self.kind.subsystem())
            .join(config::PROJECT_NAME)
            .join(&self.container_name)
    }

    fn applied_to(&self, child_pid: i32) -> bool {
        let tasks = self.path().join("tasks");
        match fs::read_to_string(tasks) {
            Ok(content) => content
                .lines()
                .any(|l| l.trim().parse::<i32>() == Ok(child_pid)),
            Err(_) => false,
        }
    }

    /// Writes the descriptor's limit into the cgroup hierarchy and joins
    /// `child_pid` to it. A no-op if `child_pid` is already a member.
    pub fn apply(&self, child_pid: i32) -> ContainerResult<()> {
        if self.applied_to(child_pid) {
            return Ok(());
        }

        let path = self.path();
        fs::create_dir_all(&path).context("create cgroup directory")?;
        fs::write(path.join("tasks"), child_pid.to_string()).context("join cgroup tasks")?;

        match self.kind {
            CgroupKind::Cpu => {
                let period = 100_000u64;
                let quota = period * self.value / 100;
                fs::write(path.join("cpu.cfs_period_us"), period.to_string())
                    .context("set cpu.cfs_period_us")?;
                fs::write(path.join("cpu.cfs_quota_us"), quota.to_string())
                    .context("set cpu.cfs_quota_us")?;
            }
            CgroupKind::Memory => {
                let limit_bytes = self.value * 1024 * 1024;
                fs::write(path.join("memory.limit_in_bytes"), limit_bytes.to_string())
                    .context("set memory.limit_in_bytes")?;
            }
        }

        Ok(())
    }

    /// Deletes the cgroup via the `cgdelete` helper, then recursively
    /// removes its directory if anything survives.
    pub fn release(&self) -> ContainerResult<()> {
        let target = format!(
            "{}:{}/{}",
            self.kind.subsystem(),
            config::PROJECT_NAME,
            self.container_name
        );
        let output = Command::new("cgdelete")
            .args(["-r", &target])
            .output()
            .map_err(|e| ContainerError::namespace_op(format!("failed to spawn cgdelete: {e}")))?;
        if !output.status.success() {
            log::warn!(
                "cgdelete {target} failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        let path = self.path();
        if path.exists() {
            fs::remove_dir_all(&path).context("remove cgroup directory")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_quota_is_period_times_percent() {
        let cg = CgroupDescriptor::cpu("demo", 50);
        assert_eq!(cg.value, 50);
        assert!(matches!(cg.kind, CgroupKind::Cpu));
    }

    #[test]
    fn path_is_namespaced_by_project_and_container() {
        let cg = CgroupDescriptor::memory("demo", 256);
        let path = cg.path();
        assert!(path.ends_with("memory/mini-container/demo"));
    }
}
