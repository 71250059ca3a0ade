pub mod bridge;
pub mod fabric;
pub mod iptables;
pub mod netns;
pub mod veth;

pub use fabric::BridgeFabric;
