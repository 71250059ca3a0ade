use std::ffi::CString;
use std::fs;
use std::path::{Path, PathBuf};

use nix::sched::{CloneFlags, clone};
use nix::sys::signal::{SigSet, Signal, kill};
use nix::sys::wait::waitpid;
use nix::unistd::{Pid, getppid};

use crate::config;
use crate::container::store::ContainerStore;
use crate::container::types::{ContainerConfig, ContainerState, Lifecycle};
use crate::error::{ContainerError, ContainerResult, Context};
use crate::ipam::IpAllocator;
use crate::network::BridgeFabric;
use crate::overlay::OverlayFs;
use crate::process;

const CLONE_STACK_SIZE: usize = 1024 * 1024;

/// Orchestrates the parent/child launch protocol and the container state
/// machine built on top of it.
pub struct LifecycleEngine {
    root: PathBuf,
}

impl LifecycleEngine {
    pub fn new(root: PathBuf) -> Self {
        LifecycleEngine { root }
    }

    fn store(&self) -> ContainerStore {
        ContainerStore::new(self.root.clone())
    }

    fn overlay(&self) -> OverlayFs {
        OverlayFs::new(self.root.clone())
    }

    fn ip_allocator(&self) -> IpAllocator {
        IpAllocator::new(config::ip_pool_path(&self.root))
    }

    fn ensure_host_prerequisites(&self) -> ContainerResult<()> {
        fs::create_dir_all(&self.root).context("create runtime root")?;
        self.ip_allocator()
            .set_used(config::DEFAULT_BRIDGE_GATEWAY)
            .context("reserve bridge gateway address")?;
        BridgeFabric::ensure_bridge(config::DEFAULT_BRIDGE_NAME, config::DEFAULT_BRIDGE_GATEWAY)
            .context("ensure host bridge")?;
        Ok(())
    }

    /// `run(name, image_dir, entrypoint_argv)`: refuses if `name` exists.
    pub fn run(&self, name: &str, image_dir: &str, entry_point: Vec<String>) -> ContainerResult<()> {
        let store = self.store();
        if store.exists(name) {
            return Err(ContainerError::AlreadyExists { name: name.to_string() });
        }

        self.ensure_host_prerequisites()?;

        let overlay = self.overlay();
        let setup = || -> ContainerResult<()> {
            overlay.create_dirs(name)?;
            overlay.mount(name, Path::new(image_dir))
        };
        if let Err(e) = setup() {
            let _ = overlay.unmount(name);
            return Err(e);
        }

        let config = ContainerConfig {
            name: name.to_string(),
            image_dir: image_dir.to_string(),
            child_entry_point: entry_point,
            cgroups: Vec::new(),
        };
        let mut state = ContainerState::created(name);
        state.union_mounted = true;
        if let Err(e) = store.save(&config, &state) {
            let _ = overlay.unmount(name);
            return Err(e);
        }

        if let Err(e) = self.start_handshake(&config, &mut state) {
            let _ = store.remove(name);
            return Err(e);
        }
        Ok(())
    }

    /// `start(name)`: if Created, reconciles to Stopped first, then
    /// proceeds through the handshake.
    pub fn start(&self, name: &str) -> ContainerResult<()> {
        let store = self.store();
        let (config, mut state) = store.load(name)?;

        if state.life_cycle == Lifecycle::Created {
            state.life_cycle = Lifecycle::Stopped;
            store.save_state(&state)?;
        }

        self.ensure_host_prerequisites()?;
        self.start_handshake(&config, &mut state)
    }

    /// Shared parent-side sequence for `run` and `start`: fork-exec the
    /// child role, wait for its ready signal, wire networking, release it,
    /// then block until it exits.
    fn start_handshake(&self, config: &ContainerConfig, state: &mut ContainerState) -> ContainerResult<()> {
        let store = self.store();

        let mut sigusr2 = SigSet::empty();
        sigusr2.add(Signal::SIGUSR2);
        sigusr2
            .thread_block()
            .map_err(|e| ContainerError::namespace_op(format!("block SIGUSR2 failed: {e}")))?;

        let child_pid = fork_child_role(&config.name)?;

        sigusr2
            .wait()
            .map_err(|e| ContainerError::namespace_op(format!("wait for child ready failed: {e}")))?;

        state.life_cycle = Lifecycle::Running;
        state.parent_pid = nix::unistd::getpid().as_raw();
        state.child_pid = child_pid.as_raw();
        store.save_state(state)?;

        for cg in &config.cgroups {
            cg.apply(child_pid.as_raw())
                .context(format!("apply cgroup limit for {}", config.name))?;
        }

        let network_result = self.wire_networking(config, state, child_pid.as_raw());
        if let Err(e) = network_result {
            let _ = kill(child_pid, Signal::SIGUSR2);
            return Err(e);
        }

        store.save_state(state)?;

        kill(child_pid, Signal::SIGUSR2)
            .map_err(|e| ContainerError::namespace_op(format!("signal child ready failed: {e}")))?;

        waitpid(child_pid, None)
            .map_err(|e| ContainerError::namespace_op(format!("waitpid failed: {e}")))?;

        state.life_cycle = Lifecycle::Stopped;
        state.child_pid = 0;
        if let Some(ip_net) = state.ip_net.take() {
            if let Err(e) = self.ip_allocator().release(&ip_net) {
                log::warn!("failed to release {ip_net} for {}: {e}", config.name);
            }
        }
        for cg in &config.cgroups {
            if let Err(e) = cg.release() {
                log::warn!("failed to release cgroup for {}: {e}", config.name);
            }
        }
        store.save_state(state)?;

        Ok(())
    }

    fn wire_networking(&self, config: &ContainerConfig, state: &mut ContainerState, child_pid: i32) -> ContainerResult<()> {
        let ip_net = self
            .ip_allocator()
            .allocate(config::DEFAULT_BRIDGE_GATEWAY)
            .context("allocate container ip")?;
        let ip: std::net::Ipv4Addr = ip_net
            .split('/')
            .next()
            .unwrap()
            .parse()
            .map_err(|e| ContainerError::InvalidConfiguration { message: format!("{e}") })?;

        let seed = format!("{}-{}", child_pid, rand::random::<u16>() % 900 + 100);
        let peer = BridgeFabric::create_veth(config::DEFAULT_BRIDGE_NAME, &seed)
            .context("create veth pair")?;

        if let Err(e) = BridgeFabric::attach_to_netns(&peer, child_pid, ip, config::DEFAULT_BRIDGE_GATEWAY) {
            let _ = BridgeFabric::delete_veth(&peer);
            let _ = self.ip_allocator().release(&ip_net);
            return Err(e).context("attach veth to container namespace");
        }

        state.ip_net = Some(ip_net);
        Ok(())
    }

    /// `stop(name)`: refuses if not Running.
    pub fn stop(&self, name: &str) -> ContainerResult<()> {
        let store = self.store();
        let (config, mut state) = store.load(name)?;
        if state.observed_lifecycle() != Lifecycle::Running {
            return Err(ContainerError::InvalidLifecycle { name: name.to_string() });
        }

        let child = Pid::from_raw(state.child_pid);
        let parent = Pid::from_raw(state.parent_pid);
        let _ = kill(child, Signal::SIGKILL);
        let _ = kill(parent, Signal::SIGKILL);

        state.life_cycle = Lifecycle::Stopped;
        state.child_pid = 0;
        if let Some(ip_net) = state.ip_net.take() {
            if let Err(e) = self.ip_allocator().release(&ip_net) {
                log::warn!("failed to release {ip_net} for {name}: {e}");
            }
        }
        for cg in &config.cgroups {
            if let Err(e) = cg.release() {
                log::warn!("failed to release cgroup for {name}: {e}");
            }
        }
        store.save_state(&state)
    }

    /// `remove(name)`: refuses if Running.
    pub fn remove(&self, name: &str) -> ContainerResult<()> {
        let store = self.store();
        let (_config, state) = store.load(name)?;
        if state.observed_lifecycle() == Lifecycle::Running {
            return Err(ContainerError::InvalidLifecycle { name: name.to_string() });
        }
        store.remove(name)
    }

    pub fn list(&self) -> ContainerResult<Vec<(ContainerConfig, ContainerState)>> {
        let store = self.store();
        let mut out = Vec::new();
        for (config, mut state) in store.list()? {
            let observed = state.observed_lifecycle();
            if observed != state.life_cycle {
                state.life_cycle = observed;
                state.child_pid = 0;
                store.save_state(&state)?;
            }
            out.push((config, state));
        }
        Ok(out)
    }

    /// `clear`: kill + remove every container, then delete the config root.
    pub fn clear_all(&self) -> ContainerResult<()> {
        for (config, _state) in self.store().list()? {
            if self.stop(&config.name).is_ok() {
                // fall through to remove regardless of prior state
            }
            let _ = self.remove(&config.name);
        }
        let root = config::config_dir(&self.root);
        if root.exists() {
            fs::remove_dir_all(&root).context("remove config root")?;
        }
        Ok(())
    }

    /// The child role's full sequence, invoked from the `child` CLI
    /// re-entry point after namespace creation.
    pub fn child_entry(&self, name: &str) -> ContainerResult<()> {
        let mut sigusr2 = SigSet::empty();
        sigusr2.add(Signal::SIGUSR2);
        sigusr2
            .thread_block()
            .map_err(|e| ContainerError::namespace_op(format!("block SIGUSR2 failed: {e}")))?;

        kill(getppid(), Signal::SIGUSR2)
            .map_err(|e| ContainerError::namespace_op(format!("signal parent ready failed: {e}")))?;

        sigusr2
            .wait()
            .map_err(|e| ContainerError::namespace_op(format!("wait for network ready failed: {e}")))?;

        let (config, _state) = self.store().load(name)?;
        self.overlay().pivot_root(name).context("pivot_root")?;
        process::exec_entry_point(&config.child_entry_point)
    }
}

/// Clones a fresh child into new UTS/PID/mount/IPC/net namespaces and
/// immediately re-execs this same binary as `child <name>`, preserving
/// stdio and the blocked-signal mask across the exec.
fn fork_child_role(name: &str) -> ContainerResult<Pid> {
    let mut stack = vec![0u8; CLONE_STACK_SIZE];
    let flags = CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWIPC
        | CloneFlags::CLONE_NEWNET;

    let name = name.to_string();
    let cb = Box::new(move || -> isize {
        match reexec_as_child(&name) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("ERROR child re-exec failed: {e}");
                1
            }
        }
    });

    unsafe { clone(cb, &mut stack, flags, Some(Signal::SIGCHLD as i32)) }
        .map_err(|e| ContainerError::namespace_op(format!("clone failed: {e}")))
}

fn reexec_as_child(name: &str) -> ContainerResult<()> {
    let exe = fs::read_link("/proc/self/exe")
        .map_err(|e| ContainerError::namespace_op(format!("read /proc/self/exe failed: {e}")))?;
    let exe_c = CString::new(exe.to_string_lossy().into_owned())
        .map_err(|e| ContainerError::namespace_op(e.to_string()))?;
    let argv = vec![
        exe_c.clone(),
        CString::new("child").unwrap(),
        CString::new(name).map_err(|e| ContainerError::namespace_op(e.to_string()))?,
    ];
    let envp = process::build_environment()?;

    nix::unistd::execve(&exe_c, &argv, &envp)
        .map_err(|e| ContainerError::namespace_op(format!("execve self failed: {e}")))?;
    unreachable!("execve replaced the process image")
}
