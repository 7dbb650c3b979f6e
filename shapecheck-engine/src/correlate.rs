//! Declared vs discovered device correlation
//!
//! Devices are joined on their canonical PCI address. Results follow the
//! declared order; leftovers keep the order the probe reported them in.

use crate::discovered::DiscoveredDevice;
use crate::error::{EngineError, Result};
use crate::pci::{normalize, CanonicalPci};
use crate::topology::Declared;
use std::collections::BTreeMap;
use tracing::warn;

/// A declared entry and the hardware it was joined to
#[derive(Debug, Clone)]
pub struct MatchedPair<'a, T> {
    pub declared: &'a T,
    pub discovered: DiscoveredDevice,
    pub pci: CanonicalPci,
}

/// Outcome for one declared entry
#[derive(Debug, Clone)]
pub enum Correlated<'a, T> {
    Matched(MatchedPair<'a, T>),
    Missing(&'a T),
}

#[derive(Debug, Clone)]
pub struct Correlation<'a, T> {
    /// One slot per declared entry, in declared order
    pub entries: Vec<Correlated<'a, T>>,
    /// Discovered but not declared
    pub unexpected: Vec<DiscoveredDevice>,
    /// Probe anomalies such as two devices reported at one address
    pub warnings: Vec<String>,
}

impl<'a, T> Correlation<'a, T> {
    pub fn matched(&self) -> impl Iterator<Item = &MatchedPair<'a, T>> {
        self.entries.iter().filter_map(|entry| match entry {
            Correlated::Matched(pair) => Some(pair),
            Correlated::Missing(_) => None,
        })
    }

    pub fn missing(&self) -> impl Iterator<Item = &'a T> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            Correlated::Missing(declared) => Some(*declared),
            Correlated::Matched(_) => None,
        })
    }

    pub fn matched_count(&self) -> usize {
        self.matched().count()
    }

    pub fn missing_count(&self) -> usize {
        self.missing().count()
    }
}

/// Join declared entries to discovered devices by canonical PCI address.
///
/// Never fails on absent or extra hardware. Fails only when a declared
/// entry has no PCI address.
pub fn correlate<'a, T: Declared>(
    declared: &'a [T],
    discovered: Vec<DiscoveredDevice>,
) -> Result<Correlation<'a, T>> {
    if let Some(entry) = declared.iter().find(|entry| entry.pci().trim().is_empty()) {
        return Err(EngineError::InvalidTopology(format!(
            "declared device {} has an empty PCI address",
            entry.label()
        )));
    }

    let mut warnings = Vec::new();
    let mut slots: Vec<Option<DiscoveredDevice>> = Vec::with_capacity(discovered.len());
    let mut by_pci: BTreeMap<CanonicalPci, usize> = BTreeMap::new();

    for device in discovered {
        let key = normalize(&device.pci);
        if by_pci.contains_key(&key) {
            warn!("Duplicate discovered device at {}, keeping the first", key);
            warnings.push(format!("duplicate discovered device at {}", key));
            continue;
        }
        by_pci.insert(key, slots.len());
        slots.push(Some(device));
    }

    let mut entries = Vec::with_capacity(declared.len());
    for entry in declared {
        let key = normalize(entry.pci());
        let found = by_pci
            .remove(&key)
            .and_then(|slot| slots.get_mut(slot).and_then(Option::take));

        entries.push(match found {
            Some(device) => Correlated::Matched(MatchedPair {
                declared: entry,
                discovered: device,
                pci: key,
            }),
            None => Correlated::Missing(entry),
        });
    }

    let unexpected = slots.into_iter().flatten().collect();

    Ok(Correlation {
        entries,
        unexpected,
        warnings,
    })
}

/// Outcome of the name join for one declared entry
#[derive(Debug, Clone)]
pub enum NameJoined<'a, T> {
    /// Bound to this OS interface
    Resolved(&'a T, String),
    Missing(&'a T),
}

/// Declared entries resolved to OS interface names
#[derive(Debug, Clone)]
pub struct NameJoin<'a, T> {
    /// One slot per declared entry, in declared order
    pub entries: Vec<NameJoined<'a, T>>,
}

impl<'a, T> NameJoin<'a, T> {
    pub fn resolved(&self) -> impl Iterator<Item = (&'a T, &str)> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            NameJoined::Resolved(declared, interface) => Some((*declared, interface.as_str())),
            NameJoined::Missing(_) => None,
        })
    }

    pub fn missing(&self) -> impl Iterator<Item = &'a T> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            NameJoined::Missing(declared) => Some(*declared),
            NameJoined::Resolved(..) => None,
        })
    }
}

/// Secondary join: declared device name to the OS interface it is bound to.
/// An entry with no device name, or a name the OS does not report, is missing.
pub fn join_by_name<'a, T, I>(declared: I, names: &BTreeMap<String, String>) -> NameJoin<'a, T>
where
    T: Declared + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let entries = declared
        .into_iter()
        .map(|entry| match entry.device_name().and_then(|name| names.get(name)) {
            Some(interface) => NameJoined::Resolved(entry, interface.clone()),
            None => NameJoined::Missing(entry),
        })
        .collect();

    NameJoin { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{GpuEntry, NicEntry};

    fn gpu(pci: &str, module: &str) -> GpuEntry {
        GpuEntry {
            pci: pci.to_string(),
            model: "H100".to_string(),
            index: None,
            module_id: Some(module.to_string()),
        }
    }

    fn nic(pci: &str, name: &str) -> NicEntry {
        NicEntry {
            pci: pci.to_string(),
            interface: String::new(),
            device_name: name.to_string(),
            model: String::new(),
            gpu_pci: None,
            gpu_id: None,
        }
    }

    #[test]
    fn test_matches_across_formats() {
        let declared = vec![gpu("0000:0f:00.0", "2"), gpu("0000:2d:00.0", "4")];
        let discovered = vec![
            DiscoveredDevice::new("00000000:2D:00.0"),
            DiscoveredDevice::new("00000000:0F:00.0"),
        ];
        let result = correlate(&declared, discovered).unwrap();
        assert_eq!(result.matched_count(), 2);
        assert_eq!(result.missing_count(), 0);
        assert!(result.unexpected.is_empty());

        // declared order, not discovered order
        let pcis: Vec<&str> = result.matched().map(|p| p.pci.as_str()).collect();
        assert_eq!(pcis, vec!["0000:0f:00.0", "0000:2d:00.0"]);
    }

    #[test]
    fn test_missing_and_unexpected() {
        let declared = vec![gpu("0000:0f:00.0", "2"), gpu("0000:44:00.0", "3")];
        let discovered = vec![
            DiscoveredDevice::new("0000:0f:00.0"),
            DiscoveredDevice::new("0000:99:00.0"),
        ];
        let result = correlate(&declared, discovered).unwrap();
        assert_eq!(result.matched_count() + result.missing_count(), declared.len());
        assert_eq!(result.missing().next().map(|g| g.pci.as_str()), Some("0000:44:00.0"));
        assert_eq!(result.unexpected.len(), 1);
        assert_eq!(result.unexpected[0].pci, "0000:99:00.0");
    }

    #[test]
    fn test_no_double_match() {
        // two declarations of the same address can only claim one device
        let declared = vec![gpu("0000:0f:00.0", "2"), gpu("0f:00.0", "2")];
        let discovered = vec![DiscoveredDevice::new("00000000:0F:00.0")];
        let result = correlate(&declared, discovered).unwrap();
        assert_eq!(result.matched_count(), 1);
        assert_eq!(result.missing_count(), 1);
    }

    #[test]
    fn test_duplicate_discovered_keeps_first() {
        let declared = vec![gpu("0000:0f:00.0", "2")];
        let discovered = vec![
            DiscoveredDevice::new("0000:0f:00.0").with_module_id("2"),
            DiscoveredDevice::new("00000000:0F:00.0").with_module_id("9"),
        ];
        let result = correlate(&declared, discovered).unwrap();
        let pair = result.matched().next().unwrap();
        assert_eq!(pair.discovered.module_id.as_deref(), Some("2"));
        assert_eq!(result.warnings.len(), 1);
        assert!(result.unexpected.is_empty());
    }

    #[test]
    fn test_completeness_over_many_shapes() {
        let pool = ["0000:0c:00.0", "0000:0c:00.1", "0000:2a:00.0", "0000:41:00.0", "0000:58:00.1"];
        for declared_mask in 0u8..32 {
            for discovered_mask in 0u8..32 {
                let declared: Vec<NicEntry> = pool
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| declared_mask & (1 << i) != 0)
                    .map(|(i, pci)| nic(pci, &format!("mlx5_{}", i)))
                    .collect();
                let discovered: Vec<DiscoveredDevice> = pool
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| discovered_mask & (1 << i) != 0)
                    .map(|(_, pci)| DiscoveredDevice::new(pci.to_uppercase()))
                    .collect();
                let total = discovered.len();

                let result = correlate(&declared, discovered).unwrap();
                assert_eq!(result.matched_count() + result.missing_count(), declared.len());
                assert_eq!(result.matched_count() + result.unexpected.len(), total);
                for extra in &result.unexpected {
                    let key = normalize(&extra.pci);
                    assert!(result.matched().all(|pair| pair.pci != key));
                }
            }
        }
    }

    #[test]
    fn test_empty_pci_is_configuration_error() {
        let declared = vec![nic("", "mlx5_0")];
        let err = correlate(&declared, Vec::new()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTopology(msg) if msg.contains("mlx5_0")));
    }

    #[test]
    fn test_join_by_name() {
        let declared = vec![
            nic("0000:0c:00.0", "mlx5_0"),
            nic("0000:0c:00.1", "mlx5_1"),
            nic("0000:2a:00.0", ""),
        ];
        let mut names = BTreeMap::new();
        names.insert("mlx5_0".to_string(), "rdma0".to_string());
        names.insert("mlx5_7".to_string(), "rdma7".to_string());

        let joined = join_by_name(&declared, &names);
        let resolved: Vec<(&str, &str)> = joined.resolved().map(|(nic, iface)| (nic.pci.as_str(), iface)).collect();
        assert_eq!(resolved, vec![("0000:0c:00.0", "rdma0")]);
        assert_eq!(joined.missing().count(), 2);
    }

    #[test]
    fn test_join_by_name_keeps_declared_order() {
        let declared = vec![nic("0000:0c:00.0", "mlx5_0"), nic("0000:2a:00.0", "mlx5_1")];
        let mut names = BTreeMap::new();
        names.insert("mlx5_1".to_string(), "rdma1".to_string());

        let joined = join_by_name(&declared, &names);
        assert_eq!(joined.entries.len(), 2);
        assert!(matches!(joined.entries[0], NameJoined::Missing(nic) if nic.device_name == "mlx5_0"));
        assert!(matches!(&joined.entries[1], NameJoined::Resolved(_, iface) if iface == "rdma1"));
    }
}
