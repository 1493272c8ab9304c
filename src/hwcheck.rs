/*! Pre-flight hardware checks.

Readout packets are sized for jumbo frames, so a detector host whose
interfaces run a small MTU will silently drop the large datagrams. The MTU
check runs before the pipeline threads start and a failure aborts startup
with a dedicated exit code.
*/
use std::path::Path;

use log::{debug, warn};

/// Default required MTU, matching the jumbo-frame packet budget.
pub const DEFAULT_MINIMUM_MTU: usize = 9000;

/// Network interface sanity checker.
pub struct HwCheck {
    minimum_mtu: usize,
}

impl Default for HwCheck {
    fn default() -> Self {
        Self {
            minimum_mtu: DEFAULT_MINIMUM_MTU,
        }
    }
}

impl HwCheck {
    /// Checker with the default MTU requirement.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the required MTU.
    pub fn set_minimum_mtu(&mut self, mtu: usize) {
        self.minimum_mtu = mtu;
    }

    /// Verify that every system interface not matched by
    /// `ignored_prefixes` has an MTU of at least the configured minimum.
    ///
    /// Interfaces whose MTU cannot be read are skipped.
    #[must_use]
    pub fn check_mtu(&self, ignored_prefixes: &[&str]) -> bool {
        self.check_mtu_in(Path::new("/sys/class/net"), ignored_prefixes)
    }

    fn check_mtu_in(&self, root: &Path, ignored_prefixes: &[&str]) -> bool {
        let entries = match std::fs::read_dir(root) {
            Ok(e) => e,
            Err(e) => {
                warn!("Cannot enumerate network interfaces in {root:?}: {e}");
                return true;
            }
        };
        let mut ok = true;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if ignored_prefixes.iter().any(|p| name.starts_with(p)) {
                debug!("Ignoring interface {name}");
                continue;
            }
            let mtu_file = entry.path().join("mtu");
            let Ok(text) = std::fs::read_to_string(&mtu_file) else {
                continue;
            };
            let Ok(mtu) = text.trim().parse::<usize>() else {
                continue;
            };
            debug!("Interface {name} has MTU {mtu}");
            if mtu < self.minimum_mtu {
                warn!("Interface {name} MTU {mtu} below required {}", self.minimum_mtu);
                ok = false;
            }
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtu_pass() {
        let mut check = HwCheck::new();
        // 68 is the minimum legal IPv4 MTU, every interface clears it.
        check.set_minimum_mtu(68);
        assert!(check.check_mtu(&["0", "00"]));
    }

    #[test]
    fn mtu_fail() {
        let mut check = HwCheck::new();
        check.set_minimum_mtu(6_553_500);
        assert!(!check.check_mtu(&["0", "00"]));
    }

    #[test]
    fn missing_sysfs_is_not_fatal() {
        let check = HwCheck::new();
        assert!(check.check_mtu_in(Path::new("/nonexistent/net"), &[]));
    }

    #[test]
    fn synthetic_tree() {
        let dir = tempfile::tempdir().unwrap();
        for (name, mtu) in [("eth0", "9000"), ("lo", "65536"), ("veth1", "1500")] {
            let d = dir.path().join(name);
            std::fs::create_dir(&d).unwrap();
            std::fs::write(d.join("mtu"), mtu).unwrap();
        }
        let check = HwCheck::new(); // default 9000
        assert!(!check.check_mtu_in(dir.path(), &[]));
        assert!(check.check_mtu_in(dir.path(), &["veth"]));
    }
}
