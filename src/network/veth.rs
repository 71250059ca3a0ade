use std::process::Command;

use crate::error::{ContainerError, ContainerResult};
use crate::network::bridge::truncate_ifname;

const MAX_VETH_SEED: usize = 10;

/// Derives the host/peer interface names for a container's veth pair from
/// a seed string (pid-random), matching the host side's 15-char limit.
pub fn veth_names(seed: &str) -> (String, String) {
    let seed = if seed.len() <= MAX_VETH_SEED {
        seed.to_string()
    } else {
        seed[..MAX_VETH_SEED].to_string()
    };
    (
        truncate_ifname(&format!("veth-{seed}")),
        truncate_ifname(&format!("peer-{seed}")),
    )
}

pub fn create_veth_pair(host: &str, peer: &str) -> ContainerResult<()> {
    let output = Command::new("ip")
        .args(["link", "add", host, "type", "veth", "peer", "name", peer])
        .output()
        .map_err(|e| ContainerError::link_op(format!("failed to spawn ip: {e}")))?;
    if !output.status.success() {
        return Err(ContainerError::subprocess(
            "ip link add veth",
            output.status,
            &output.stderr,
        ));
    }
    log::debug!("created veth pair {host} <-> {peer}");
    Ok(())
}

pub fn move_to_netns(interface: &str, pid: i32) -> ContainerResult<()> {
    let output = Command::new("ip")
        .args(["link", "set", interface, "netns", &pid.to_string()])
        .output()
        .map_err(|e| ContainerError::link_op(format!("failed to spawn ip: {e}")))?;
    if !output.status.success() {
        return Err(ContainerError::subprocess(
            "ip link set netns",
            output.status,
            &output.stderr,
        ));
    }
    log::debug!("moved {interface} to netns of pid {pid}");
    Ok(())
}

pub fn delete_veth(interface: &str) -> ContainerResult<()> {
    let output = Command::new("ip")
        .args(["link", "delete", interface])
        .output()
        .map_err(|e| ContainerError::link_op(format!("failed to spawn ip: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.contains("Cannot find device") {
            return Err(ContainerError::subprocess(
                "ip link delete veth",
                output.status,
                &output.stderr,
            ));
        }
    }
    Ok(())
}
