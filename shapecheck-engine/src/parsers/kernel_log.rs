//! Kernel log (`dmesg`) scans

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// One XID code seen in the log, with every PCI address that reported it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XidHit {
    pub code: String,
    pub pcis: Vec<String>,
    pub occurrences: usize,
}

/// Result of scanning the log for `NVRM: Xid` lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XidScan {
    /// Codes in ascending numeric order
    pub hits: Vec<XidHit>,
    /// `NVRM: Xid` lines that did not match the expected layout
    pub unrecognised: usize,
}

impl XidScan {
    pub fn is_clean(&self) -> bool {
        self.hits.is_empty() && self.unrecognised == 0
    }
}

pub fn scan_xid(output: &str) -> XidScan {
    static XID: OnceLock<Regex> = OnceLock::new();
    let xid = XID.get_or_init(|| {
        Regex::new(r"NVRM: Xid \(PCI:([0-9A-Fa-f:.]+)\): (\d+),").expect("static regex")
    });

    let mut by_code: BTreeMap<u32, XidHit> = BTreeMap::new();
    let mut unrecognised = 0;

    for line in output.lines().filter(|line| line.contains("NVRM: Xid")) {
        let Some(caps) = xid.captures(line) else {
            unrecognised += 1;
            continue;
        };
        let Ok(code) = caps[2].parse::<u32>() else {
            unrecognised += 1;
            continue;
        };

        let hit = by_code.entry(code).or_insert_with(|| XidHit {
            code: code.to_string(),
            pcis: Vec::new(),
            occurrences: 0,
        });
        hit.occurrences += 1;
        let pci = caps[1].to_string();
        if !hit.pcis.contains(&pci) {
            hit.pcis.push(pci);
        }
    }

    XidScan {
        hits: by_code.into_values().collect(),
        unrecognised,
    }
}

/// PCIe port errors, ignoring capability banners
pub fn pcie_errors(output: &str) -> Vec<&str> {
    output
        .lines()
        .filter(|line| !line.contains("capabilities"))
        .filter(|line| {
            let lower = line.to_lowercase();
            lower.contains("pcieport") && lower.contains("error")
        })
        .collect()
}

/// Fatal errors raised by the mlx5 driver
pub fn hca_fatal_errors(output: &str) -> Vec<&str> {
    output
        .lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            lower.contains("mlx5") && lower.contains("fatal")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_xid_groups_by_code() {
        let log = "\
[ 100.1] NVRM: Xid (PCI:0000:0f:00): 79, pid=1, GPU has fallen off the bus.
[ 100.2] NVRM: Xid (PCI:0000:2d:00): 79, pid=1, GPU has fallen off the bus.
[ 100.3] NVRM: Xid (PCI:0000:2d:00): 13, Graphics Exception
[ 100.4] NVRM: Xid something unexpected
[ 100.5] eth0: link up
";
        let scan = scan_xid(log);
        assert_eq!(scan.hits.len(), 2);
        assert_eq!(scan.hits[0].code, "13");
        assert_eq!(scan.hits[1].code, "79");
        assert_eq!(scan.hits[1].pcis, vec!["0000:0f:00", "0000:2d:00"]);
        assert_eq!(scan.unrecognised, 1);
        assert!(!scan.is_clean());
        assert!(scan_xid("quiet boot").is_clean());
    }

    #[test]
    fn test_pcie_errors() {
        let log = "\
pcieport 0000:00:01.1: AER: enabled with IRQ 26
pcieport 0000:00:01.1: AER: Corrected error received: 0000:01:00.0
pcieport 0000:00:01.1: PCIe error capabilities enabled
";
        assert_eq!(pcie_errors(log).len(), 1);
    }

    #[test]
    fn test_hca_fatal() {
        let log = "mlx5_core 0000:0c:00.0: mlx5_health_check: FATAL error detected\nmlx5_core: ok\n";
        assert_eq!(hca_fatal_errors(log).len(), 1);
    }
}
