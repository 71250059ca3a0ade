use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

use crate::error::{ContainerError, ContainerResult};
use crate::network::bridge::Bridge;
use crate::network::iptables;
use crate::network::netns::NetNs;
use crate::network::veth::{self, veth_names};

/// Host-side networking: bridge creation, veth pairs, and handing one end
/// of a pair into a container's network namespace.
pub struct BridgeFabric;

impl BridgeFabric {
    /// Creates `name` as a bridge with `gateway_cidr` if it doesn't already
    /// exist, and installs the NAT rule for its subnet. A no-op, including
    /// the NAT install, if the bridge already exists.
    pub fn ensure_bridge(name: &str, gateway_cidr: &str) -> ContainerResult<()> {
        let bridge = Bridge::new(name);
        if bridge.exists()? {
            return Ok(());
        }

        let net: Ipv4Network = gateway_cidr
            .parse()
            .map_err(|e| ContainerError::InvalidConfiguration {
                message: format!("invalid bridge gateway {gateway_cidr}: {e}"),
            })?;

        bridge.create()?;
        bridge.set_ip(net.ip(), net.prefix())?;
        bridge.up()?;

        let subnet = format!("{}/{}", net.network(), net.prefix());
        iptables::setup_nat(&bridge.name, &subnet)?;
        Ok(())
    }

    /// Builds a veth pair, attaches the host end to `bridge`, and returns
    /// the peer name destined for the container's namespace.
    pub fn create_veth(bridge: &str, seed: &str) -> ContainerResult<String> {
        let (host_name, peer_name) = veth_names(seed);
        veth::create_veth_pair(&host_name, &peer_name)?;

        let br = Bridge::new(bridge);
        br.attach_interface(&host_name)?;
        Ok(peer_name)
    }

    /// Moves `peer_name` into the netns of `child_pid`, then configures its
    /// address, brings it (and loopback) up, and installs a default route,
    /// all from inside that namespace.
    pub fn attach_to_netns(
        peer_name: &str,
        child_pid: i32,
        container_ip: Ipv4Addr,
        gateway_cidr: &str,
    ) -> ContainerResult<()> {
        let net: Ipv4Network = gateway_cidr
            .parse()
            .map_err(|e| ContainerError::InvalidConfiguration {
                message: format!("invalid gateway {gateway_cidr}: {e}"),
            })?;

        veth::move_to_netns(peer_name, child_pid)?;

        let ns = NetNs::from_pid(child_pid);
        ns.configure_container_interface(peer_name, container_ip, net.prefix(), net.ip())?;
        Ok(())
    }

    pub fn delete_veth(peer_name: &str) -> ContainerResult<()> {
        veth::delete_veth(peer_name)
    }

    pub fn teardown_nat(bridge: &str) -> ContainerResult<()> {
        iptables::cleanup_nat(bridge)
    }
}
