use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use ipnetwork::Ipv4Network;
use nix::fcntl::{FlockArg, flock};

use crate::bitmap::Bitmap;
use crate::error::{ContainerError, ContainerResult};

type Store = HashMap<String, Bitmap>;

/// Per-subnet IPv4 allocator backed by a bitmap per subnet, durable as a
/// single JSON file. Every mutating call re-reads the file under an
/// exclusive advisory lock so sibling parent processes racing on the same
/// file converge instead of clobbering each other.
#[derive(Debug, Clone)]
pub struct IpAllocator {
    path: PathBuf,
}

/// Holds an exclusive flock on the pool file for the lifetime of one
/// read-modify-write cycle; the lock is released when the file closes.
struct LockedFile(File);

impl IpAllocator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `x.x.x.x/prefix` -> (canonical subnet key, network address as u32, subnet size in hosts).
    fn parse_subnet(subnet_str: &str) -> ContainerResult<(String, u32, u32)> {
        let net: Ipv4Network = subnet_str
            .parse()
            .map_err(|e| ContainerError::InvalidConfiguration {
                message: format!("invalid subnet {subnet_str}: {e}"),
            })?;
        let prefix = net.prefix();
        let network = u32::from(net.network());
        let size: u64 = 1u64 << (32 - prefix as u32);
        let key = format!("{}/{}", net.network(), prefix);
        Ok((key, network, size as u32))
    }

    /// `x.x.x.x/prefix` -> (canonical subnet key, host offset within the subnet, subnet size).
    fn parse_address(cidr: &str) -> ContainerResult<(String, u32, u32)> {
        let net: Ipv4Network = cidr
            .parse()
            .map_err(|e| ContainerError::InvalidConfiguration {
                message: format!("invalid address {cidr}: {e}"),
            })?;
        let prefix = net.prefix();
        let ip = u32::from(net.ip());
        let size: u64 = 1u64 << (32 - prefix as u32);
        let mask = (size - 1) as u32;
        let key = format!("{}/{}", net.network(), prefix);
        Ok((key, ip & mask, size as u32))
    }

    fn open_locked(&self) -> ContainerResult<LockedFile> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)?;
        flock(&file, FlockArg::LockExclusive).map_err(|e| ContainerError::PersistenceOp {
            message: format!("failed to lock {}: {e}", self.path.display()),
        })?;
        Ok(LockedFile(file))
    }

    fn read_store(&self) -> ContainerResult<Store> {
        let bytes = fs::read(&self.path)?;
        if bytes.is_empty() {
            return Ok(Store::new());
        }
        serde_json::from_slice(&bytes).map_err(|e| ContainerError::PersistenceOp {
            message: format!("corrupt ip pool {}: {e}", self.path.display()),
        })
    }

    fn write_store(&self, store: &Store) -> ContainerResult<()> {
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(store).map_err(|e| ContainerError::PersistenceOp {
            message: format!("failed to encode ip pool: {e}"),
        })?;
        let mut f = File::create(&tmp)?;
        f.write_all(&json)?;
        f.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Re-reads the pool under an exclusive lock, runs `f`, atomically
    /// persists the result, then releases the lock.
    fn with_store<F, T>(&self, f: F) -> ContainerResult<T>
    where
        F: FnOnce(&mut Store) -> ContainerResult<T>,
    {
        let _lock = self.open_locked()?;
        let mut store = self.read_store()?;
        let result = f(&mut store)?;
        self.write_store(&store)?;
        Ok(result)
    }

    /// Allocates the first free host address in `subnet_str`, returning
    /// `network_address/prefix`.
    pub fn allocate(&self, subnet_str: &str) -> ContainerResult<String> {
        let (key, network, size) = Self::parse_subnet(subnet_str)?;
        self.with_store(|store| {
            let bm = store
                .entry(key.clone())
                .or_insert_with(|| Bitmap::new(size as usize));

            if bm.ones() >= bm.cap().saturating_sub(2) {
                return Err(ContainerError::NoAvailableIP {
                    subnet: key.clone(),
                });
            }

            let pos = bm.first_unset(1);
            if pos < 0 {
                return Err(ContainerError::NoAvailableIP { subnet: key });
            }
            bm.set(pos as usize)
                .map_err(|e| ContainerError::PersistenceOp { message: e })?;

            let ip_u32 = network | pos as u32;
            let ip = Ipv4Addr::from(ip_u32);
            let prefix = key.rsplit('/').next().unwrap_or("24");
            Ok(format!("{ip}/{prefix}"))
        })
    }

    /// Releases the address denoted by `cidr` (`x.x.x.x/prefix`). A no-op
    /// if the enclosing subnet has never been allocated from.
    pub fn release(&self, cidr: &str) -> ContainerResult<()> {
        let (key, offset, _size) = Self::parse_address(cidr)?;
        self.with_store(|store| {
            if let Some(bm) = store.get_mut(&key) {
                bm.unset(offset as usize);
            }
            Ok(())
        })
    }

    /// `x.x.x.x/prefix` is available if the subnet has no record of it, or
    /// the bit is unset; the network and broadcast addresses are always
    /// unavailable.
    pub fn is_available(&self, cidr: &str) -> ContainerResult<bool> {
        let (key, offset, size) = Self::parse_address(cidr)?;
        if offset == 0 || offset == size - 1 {
            return Ok(false);
        }
        self.with_store(|store| match store.get(&key) {
            Some(bm) => Ok(!bm.get(offset as usize)),
            None => Ok(true),
        })
    }

    /// Marks `cidr` as occupied without going through the first-unset scan
    /// (used to pre-reserve the bridge gateway).
    pub fn set_used(&self, cidr: &str) -> ContainerResult<()> {
        let (key, offset, size) = Self::parse_address(cidr)?;
        self.with_store(|store| {
            let bm = store
                .entry(key)
                .or_insert_with(|| Bitmap::new(size as usize));
            bm.set(offset as usize)
                .map_err(|e| ContainerError::PersistenceOp { message: e })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn alloc() -> (tempfile::TempDir, IpAllocator) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ip-pool.json");
        (dir, IpAllocator::new(path))
    }

    #[test]
    fn allocate_skips_network_address() {
        let (_d, a) = alloc();
        let ip = a.allocate("192.172.0.0/24").unwrap();
        assert_eq!(ip, "192.172.0.1/24");
    }

    #[test]
    fn allocate_then_release_frees_address() {
        let (_d, a) = alloc();
        let ip = a.allocate("10.0.0.0/28").unwrap();
        assert!(!a.is_available(&ip).unwrap());
        a.release(&ip).unwrap();
        assert!(a.is_available(&ip).unwrap());
    }

    #[test]
    fn allocate_distinct_calls_yield_distinct_ips() {
        let (_d, a) = alloc();
        let ip1 = a.allocate("192.172.0.0/24").unwrap();
        let ip2 = a.allocate("192.172.0.0/24").unwrap();
        assert_ne!(ip1, ip2);
    }

    #[test]
    fn allocate_on_slash_31_has_no_usable_hosts() {
        let (_d, a) = alloc();
        assert!(a.allocate("10.0.0.0/31").is_err());
    }

    #[test]
    fn allocate_on_slash_30_has_two_usable_hosts() {
        let (_d, a) = alloc();
        assert!(a.allocate("10.0.0.0/30").is_ok());
        assert!(a.allocate("10.0.0.0/30").is_ok());
        assert!(a.allocate("10.0.0.0/30").is_err());
    }

    #[test]
    fn set_used_reserves_gateway() {
        let (_d, a) = alloc();
        a.set_used("192.172.0.1/24").unwrap();
        assert!(!a.is_available("192.172.0.1/24").unwrap());
        let ip = a.allocate("192.172.0.0/24").unwrap();
        assert_ne!(ip, "192.172.0.1/24");
    }

    #[test]
    fn is_available_on_unknown_subnet_is_true() {
        let (_d, a) = alloc();
        assert!(a.is_available("172.16.5.5/24").unwrap());
    }

    #[test]
    fn is_available_for_broadcast_is_always_false() {
        let (_d, a) = alloc();
        assert!(!a.is_available("192.172.0.255/24").unwrap());
    }

    #[test]
    fn pool_survives_reload_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ip-pool.json");
        let a1 = IpAllocator::new(&path);
        let ip = a1.allocate("192.172.0.0/24").unwrap();

        let a2 = IpAllocator::new(&path);
        assert!(!a2.is_available(&ip).unwrap());
    }
}
