use std::fs::File;
use std::net::Ipv4Addr;
use std::process::Command;

use nix::sched::{CloneFlags, setns};

use crate::error::{ContainerError, ContainerResult, Context};

/// A container's network namespace, addressed by the pid that owns it.
/// `enter` swaps the calling thread into it for the duration of a closure
/// and always swaps back, even if the closure errors.
#[derive(Debug)]
pub struct NetNs {
    pid: i32,
}

impl NetNs {
    pub fn from_pid(pid: i32) -> Self {
        NetNs { pid }
    }

    pub fn enter<F, T>(&self, f: F) -> ContainerResult<T>
    where
        F: FnOnce() -> ContainerResult<T>,
    {
        let origin = File::open("/proc/self/ns/net")
            .map_err(ContainerError::from)
            .context("open current network namespace")?;
        let target_path = format!("/proc/{}/ns/net", self.pid);
        let target = File::open(&target_path)
            .map_err(ContainerError::from)
            .context("open container network namespace")?;

        setns(&target, CloneFlags::CLONE_NEWNET)
            .map_err(ContainerError::from)
            .context("enter container network namespace")?;

        let result = f();

        setns(&origin, CloneFlags::CLONE_NEWNET)
            .map_err(ContainerError::from)
            .context("restore original network namespace")?;

        result
    }

    /// Brings up loopback, assigns `ip/prefix` to `interface`, brings it up,
    /// and installs a default route via `gateway` — all inside a single
    /// enter/restore of this namespace.
    pub fn configure_container_interface(
        &self,
        interface: &str,
        ip: Ipv4Addr,
        prefix: u8,
        gateway: Ipv4Addr,
    ) -> ContainerResult<()> {
        self.enter(|| {
            setup_loopback()?;
            configure_interface(interface, ip, prefix)?;
            add_default_route(interface, gateway)
        })
    }
}

fn setup_loopback() -> ContainerResult<()> {
    checked(run("ip", &["link", "set", "lo", "up"])?)
}

fn configure_interface(interface: &str, ip: Ipv4Addr, prefix: u8) -> ContainerResult<()> {
    let cidr = format!("{ip}/{prefix}");
    let output = run("ip", &["addr", "add", &cidr, "dev", interface])?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.contains("File exists") {
            return Err(ContainerError::subprocess("ip addr add", output.status, &output.stderr));
        }
    }
    checked(run("ip", &["link", "set", interface, "up"])?)
}

fn add_default_route(interface: &str, gateway: Ipv4Addr) -> ContainerResult<()> {
    checked(run(
        "ip",
        &["route", "add", "default", "via", &gateway.to_string(), "dev", interface],
    )?)
}

fn run(cmd: &str, args: &[&str]) -> ContainerResult<std::process::Output> {
    Command::new(cmd)
        .args(args)
        .output()
        .map_err(|e| ContainerError::link_op(format!("failed to spawn {cmd}: {e}")))
}

fn checked(output: std::process::Output) -> ContainerResult<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(ContainerError::subprocess("ip", output.status, &output.stderr))
    }
}
