//! Candidate network interface discovery from the sysfs device tree.
//!
//! The driver directory lists one entry per bound PCI function, named by
//! bus address (`0000:33:00.0`) and symlinked to the device node. Each
//! device node carries a `net/` directory whose children are the kernel
//! interface names.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default sysfs mount point.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/";

/// Driver directory relative to the sysfs root.
pub const DRIVER_PATH: &str = "bus/pci/drivers/habanalabs";

/// Subdirectory of a device node listing its network interfaces.
const NET_DIR: &str = "net";

/// PCI bus address, `domain:bus:device.function`.
static PCI_DEVICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{4}:[0-9a-fA-F]{2}:[0-9a-fA-F]{2}\.[0-9a-fA-F]$")
        .expect("Invalid regex pattern")
});

/// Finds interface names of the scale-out NICs under a sysfs root.
#[derive(Debug, Clone)]
pub struct DeviceEnumerator {
    driver_dir: PathBuf,
}

impl DeviceEnumerator {
    /// Creates an enumerator for the default driver below `sysfs_root`.
    pub fn new(sysfs_root: impl AsRef<Path>) -> Self {
        Self {
            driver_dir: sysfs_root.as_ref().join(DRIVER_PATH),
        }
    }

    /// Returns the driver directory that is scanned.
    pub fn driver_dir(&self) -> &Path {
        &self.driver_dir
    }

    /// Returns the interface names of all bound devices.
    ///
    /// Best effort: an unreadable driver directory or device node is
    /// logged and skipped, never an error.
    pub fn discover(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();

        let entries = match fs::read_dir(&self.driver_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.driver_dir.display(), error = %e, "No PCI devices found");
                return names;
            }
        };

        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(device) = file_name.to_str() else {
                continue;
            };
            if !PCI_DEVICE_RE.is_match(device) {
                continue;
            }

            let device_path = entry.path();
            let target = match fs::canonicalize(&device_path) {
                Ok(target) => target,
                Err(e) => {
                    warn!(
                        path = %device_path.display(),
                        error = %e,
                        "Expected PCI device entry to be a symlink"
                    );
                    continue;
                }
            };

            let net_dir = target.join(NET_DIR);
            let netdevs = match fs::read_dir(&net_dir) {
                Ok(netdevs) => netdevs,
                Err(e) => {
                    warn!(path = %net_dir.display(), error = %e, "Could not find network devices");
                    continue;
                }
            };

            for netdev in netdevs.flatten() {
                if let Some(name) = netdev.file_name().to_str() {
                    debug!(device = %device, ifname = %name, "Found network device");
                    names.insert(name.to_string());
                }
            }
        }

        if names.is_empty() {
            warn!(path = %self.driver_dir.display(), "No network devices found");
        }

        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn add_device(root: &Path, bus_addr: &str, netdevs: &[&str]) {
        let node = root.join("devices/pci0000:00").join(bus_addr);
        fs::create_dir_all(node.join(NET_DIR)).unwrap();
        for name in netdevs {
            fs::create_dir_all(node.join(NET_DIR).join(name)).unwrap();
        }
        let driver_dir = root.join(DRIVER_PATH);
        fs::create_dir_all(&driver_dir).unwrap();
        symlink(&node, driver_dir.join(bus_addr)).unwrap();
    }

    #[test]
    fn test_discover_devices() {
        let root = TempDir::new().unwrap();
        add_device(root.path(), "0000:33:00.0", &["ens1", "ens2"]);
        add_device(root.path(), "0000:9a:00.0", &["ens3"]);

        let names = DeviceEnumerator::new(root.path()).discover();
        let names: Vec<_> = names.into_iter().collect();
        assert_eq!(names, vec!["ens1", "ens2", "ens3"]);
    }

    #[test]
    fn test_discover_ignores_non_device_entries() {
        let root = TempDir::new().unwrap();
        add_device(root.path(), "0000:33:00.0", &["ens1"]);
        let driver_dir = root.path().join(DRIVER_PATH);
        fs::create_dir_all(driver_dir.join("module")).unwrap();
        fs::write(driver_dir.join("bind"), "").unwrap();
        fs::write(driver_dir.join("new_id"), "").unwrap();

        let names = DeviceEnumerator::new(root.path()).discover();
        assert_eq!(names.len(), 1);
        assert!(names.contains("ens1"));
    }

    #[test]
    fn test_discover_missing_root_is_empty() {
        let root = TempDir::new().unwrap();
        let names = DeviceEnumerator::new(root.path().join("missing")).discover();
        assert!(names.is_empty());
    }

    #[test]
    fn test_discover_device_without_net_dir() {
        let root = TempDir::new().unwrap();
        add_device(root.path(), "0000:33:00.0", &["ens1"]);
        let bare = root.path().join("devices/pci0000:00/0000:4d:00.0");
        fs::create_dir_all(&bare).unwrap();
        symlink(&bare, root.path().join(DRIVER_PATH).join("0000:4d:00.0")).unwrap();

        let names = DeviceEnumerator::new(root.path()).discover();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_dangling_symlink_is_skipped() {
        let root = TempDir::new().unwrap();
        let driver_dir = root.path().join(DRIVER_PATH);
        fs::create_dir_all(&driver_dir).unwrap();
        symlink(root.path().join("gone"), driver_dir.join("0000:01:00.0")).unwrap();

        assert!(DeviceEnumerator::new(root.path()).discover().is_empty());
    }
}
