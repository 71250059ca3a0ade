use serde::{Deserialize, Serialize};

use crate::cgroup::CgroupDescriptor;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Created,
    Running,
    Stopped,
    Unknown,
}

/// Immutable-after-creation definition of a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerConfig {
    pub name: String,
    pub image_dir: String,
    pub child_entry_point: Vec<String>,
    #[serde(default)]
    pub cgroups: Vec<CgroupDescriptor>,
}

/// Mutable runtime record for a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    pub name: String,
    pub union_mounted: bool,
    pub life_cycle: Lifecycle,
    #[serde(rename = "parentPID")]
    pub parent_pid: i32,
    #[serde(rename = "childPID")]
    pub child_pid: i32,
    pub ip_net: Option<String>,
}

impl ContainerState {
    pub fn created(name: &str) -> Self {
        ContainerState {
            name: name.to_string(),
            union_mounted: false,
            life_cycle: Lifecycle::Created,
            parent_pid: 0,
            child_pid: 0,
            ip_net: None,
        }
    }

    /// The lifecycle as last persisted, reconciled against whether
    /// `child_pid` is actually alive (probed with signal 0).
    pub fn observed_lifecycle(&self) -> Lifecycle {
        if self.life_cycle == Lifecycle::Running && !pid_alive(self.child_pid) {
            Lifecycle::Stopped
        } else {
            self.life_cycle
        }
    }
}

fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_state_has_zero_pids_and_no_ip() {
        let state = ContainerState::created("demo");
        assert_eq!(state.life_cycle, Lifecycle::Created);
        assert_eq!(state.child_pid, 0);
        assert!(state.ip_net.is_none());
    }

    #[test]
    fn running_with_dead_child_reconciles_to_stopped() {
        let mut state = ContainerState::created("demo");
        state.life_cycle = Lifecycle::Running;
        // pid 0 is never a live process from this perspective.
        state.child_pid = 0;
        assert_eq!(state.observed_lifecycle(), Lifecycle::Stopped);
    }

    #[test]
    fn running_with_live_child_stays_running() {
        let mut state = ContainerState::created("demo");
        state.life_cycle = Lifecycle::Running;
        state.child_pid = std::process::id() as i32;
        assert_eq!(state.observed_lifecycle(), Lifecycle::Running);
    }

    #[test]
    fn stopped_state_is_not_reconciled() {
        let mut state = ContainerState::created("demo");
        state.life_cycle = Lifecycle::Stopped;
        state.child_pid = 0;
        assert_eq!(state.observed_lifecycle(), Lifecycle::Stopped);
    }
}
