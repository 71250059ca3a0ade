use std::fs;
use std::process::Command;

use crate::error::{ContainerError, ContainerResult};

/// Enables forwarding and masquerades outbound traffic from `subnet` that
/// isn't already leaving through the bridge itself.
pub fn setup_nat(bridge_name: &str, subnet: &str) -> ContainerResult<()> {
    fs::write("/proc/sys/net/ipv4/ip_forward", "1")
        .map_err(|e| ContainerError::link_op(format!("failed to enable ip_forward: {e}")))?;

    let output = Command::new("iptables")
        .args([
            "-t", "nat", "-A", "POSTROUTING", "-s", subnet, "!", "-o", bridge_name, "-j",
            "MASQUERADE",
        ])
        .output()
        .map_err(|e| ContainerError::link_op(format!("failed to spawn iptables: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.contains("already exists") {
            return Err(ContainerError::subprocess(
                "iptables -t nat -A POSTROUTING",
                output.status,
                &output.stderr,
            ));
        }
    }

    let _ = Command::new("iptables")
        .args(["-A", "FORWARD", "-i", bridge_name, "-j", "ACCEPT"])
        .output();
    let _ = Command::new("iptables")
        .args(["-A", "FORWARD", "-o", bridge_name, "-j", "ACCEPT"])
        .output();

    log::info!("nat configured for bridge {bridge_name} ({subnet})");
    Ok(())
}

pub fn cleanup_nat(bridge_name: &str) -> ContainerResult<()> {
    let _ = Command::new("iptables")
        .args(["-D", "FORWARD", "-i", bridge_name, "-j", "ACCEPT"])
        .output();
    let _ = Command::new("iptables")
        .args(["-D", "FORWARD", "-o", bridge_name, "-j", "ACCEPT"])
        .output();
    Ok(())
}
