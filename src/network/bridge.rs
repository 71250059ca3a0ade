use std::net::Ipv4Addr;
use std::process::Command;

use crate::error::{ContainerError, ContainerResult};

/// Linux bridge device names top out at `IFNAMSIZ - 1` (15 bytes).
const MAX_IFNAME: usize = 15;

pub fn truncate_ifname(name: &str) -> String {
    if name.len() <= MAX_IFNAME {
        name.to_string()
    } else {
        name[..MAX_IFNAME].to_string()
    }
}

#[derive(Clone)]
pub struct Bridge {
    pub name: String,
}

impl Bridge {
    pub fn new(name: &str) -> Self {
        Bridge {
            name: truncate_ifname(name),
        }
    }

    pub fn exists(&self) -> ContainerResult<bool> {
        let output = run("ip", &["link", "show", &self.name])?;
        Ok(output.status.success())
    }

    pub fn create(&self) -> ContainerResult<()> {
        if self.exists()? {
            log::info!("bridge {} already exists", self.name);
            return Ok(());
        }
        checked(run(
            "ip",
            &["link", "add", "name", &self.name, "type", "bridge"],
        )?)?;
        log::info!("created bridge {}", self.name);
        Ok(())
    }

    pub fn delete(&self) -> ContainerResult<()> {
        let output = run("ip", &["link", "delete", &self.name])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("Cannot find device") {
                return Err(ContainerError::subprocess("ip link delete", output.status, &output.stderr));
            }
        }
        Ok(())
    }

    pub fn set_ip(&self, ip: Ipv4Addr, prefix: u8) -> ContainerResult<()> {
        let cidr = format!("{ip}/{prefix}");
        let output = run("ip", &["addr", "add", &cidr, "dev", &self.name])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("File exists") {
                return Err(ContainerError::subprocess("ip addr add", output.status, &output.stderr));
            }
        }
        Ok(())
    }

    pub fn up(&self) -> ContainerResult<()> {
        checked(run("ip", &["link", "set", &self.name, "up"])?)
    }

    pub fn attach_interface(&self, interface: &str) -> ContainerResult<()> {
        checked(run(
            "ip",
            &["link", "set", interface, "master", &self.name],
        )?)?;
        checked(run("ip", &["link", "set", interface, "up"])?)
    }
}

fn run(cmd: &str, args: &[&str]) -> ContainerResult<std::process::Output> {
    Command::new(cmd).args(args).output().map_err(|e| {
        ContainerError::link_op(format!("failed to spawn {cmd}: {e}"))
    })
}

fn checked(output: std::process::Output) -> ContainerResult<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(ContainerError::subprocess("ip", output.status, &output.stderr))
    }
}
