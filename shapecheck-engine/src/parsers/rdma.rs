//! RDMA NIC tooling: `ibdev2netdev`, `show_gids`, `ethtool -S`, `mlxconfig`, `wpa_cli`

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Device name to interface, from lines like `mlx5_0 port 1 ==> enp12s0f0np0 (Up)`
pub fn parse_ibdev2netdev(output: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(arrow) = fields.iter().position(|f| *f == "==>") else {
            continue;
        };
        if let (Some(device), Some(interface)) = (fields.first(), fields.get(arrow + 1)) {
            map.entry(device.to_string()).or_insert_with(|| interface.to_string());
        }
    }
    map
}

/// One row of `show_gids`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GidEntry {
    pub device: String,
    pub port: String,
    pub index: i64,
    pub gid: String,
}

/// Rows are `DEV PORT INDEX GID [IPv4] [VER] [DEV]`. Header, separator and
/// the trailing `n_gids_found` line are skipped.
pub fn parse_show_gids(output: &str) -> Vec<GidEntry> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty()
                && !line.starts_with("DEV")
                && !line.starts_with("---")
                && !line.starts_with("n_gids_found")
        })
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return None;
            }
            let index = fields[2].parse::<i64>().ok()?;
            Some(GidEntry {
                device: fields[0].to_string(),
                port: fields[1].to_string(),
                index,
                gid: fields[3].to_string(),
            })
        })
        .collect()
}

/// `rx_prio*_discards` counters from `ethtool -S`, in output order
pub fn parse_rx_discards(output: &str) -> Vec<(String, String)> {
    static COUNTER: OnceLock<Regex> = OnceLock::new();
    let counter = COUNTER
        .get_or_init(|| Regex::new(r"^\s*(rx_prio\w*_discards):\s*(\S+)").expect("static regex"));

    output
        .lines()
        .filter_map(|line| counter.captures(line))
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}

/// The two settings read from `mlxconfig -d <pci> query`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessSettings {
    pub max_acc_out_read: Option<String>,
    pub advanced_pci_settings: Option<String>,
}

pub fn parse_mlxconfig(output: &str) -> AccessSettings {
    let mut settings = AccessSettings::default();
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.last()) else {
            continue;
        };
        // values look like `True(1)` or `128`
        let value = value.split('(').next().unwrap_or(value).to_string();
        match key {
            "MAX_ACC_OUT_READ" => settings.max_acc_out_read = Some(value),
            "ADVANCED_PCI_SETTINGS" => settings.advanced_pci_settings = Some(value),
            _ => {}
        }
    }
    settings
}

/// `Supplicant PAE state=...` from `wpa_cli status`
pub fn supplicant_state(output: &str) -> Option<&str> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Supplicant PAE state="))
}

/// `lspci -v -s <pci>` shows a Mellanox controller
pub fn is_mellanox_controller(output: &str) -> bool {
    output.contains("controller: Mellanox Technologies")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ibdev2netdev() {
        let output = "mlx5_0 port 1 ==> enp12s0f0np0 (Up)\nmlx5_1 port 1 ==> enp12s0f1np1 (Down)\nnoise\n";
        let map = parse_ibdev2netdev(output);
        assert_eq!(map.get("mlx5_0").map(String::as_str), Some("enp12s0f0np0"));
        assert_eq!(map.get("mlx5_1").map(String::as_str), Some("enp12s0f1np1"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_show_gids() {
        let output = "\
DEV\tPORT\tINDEX\tGID\t\t\t\t\tIPv4  \t\tVER\tDEV
---\t----\t-----\t---\t\t\t\t\t------------  \t---\t---
mlx5_0\t1\t0\tfe80:0000:0000:0000:0ac0:ebff:fe2b:0c10\t\t\tv1\trdma0
mlx5_0\t1\t3\t0000:0000:0000:0000:0000:ffff:0a00:0001\t10.0.0.1  \tv2\trdma0
n_gids_found=2
";
        let gids = parse_show_gids(output);
        assert_eq!(gids.len(), 2);
        assert_eq!(gids[1].index, 3);
        assert_eq!(gids[0].device, "mlx5_0");
    }

    #[test]
    fn test_rx_discards() {
        let output = "NIC statistics:\n     rx_prio0_discards: 0\n     rx_prio3_discards: 17\n     tx_prio0_packets: 9\n";
        assert_eq!(
            parse_rx_discards(output),
            vec![
                ("rx_prio0_discards".to_string(), "0".to_string()),
                ("rx_prio3_discards".to_string(), "17".to_string())
            ]
        );
    }

    #[test]
    fn test_mlxconfig() {
        let output = "\
Device #1:
----------
Configurations:                                      Next Boot
         MAX_ACC_OUT_READ                            44
         ADVANCED_PCI_SETTINGS                       True(1)
";
        let settings = parse_mlxconfig(output);
        assert_eq!(settings.max_acc_out_read.as_deref(), Some("44"));
        assert_eq!(settings.advanced_pci_settings.as_deref(), Some("True"));
        assert_eq!(parse_mlxconfig("nothing here"), AccessSettings::default());
    }

    #[test]
    fn test_supplicant_and_controller() {
        let output = "bssid=...\nSupplicant PAE state=AUTHENTICATED\nsuppPortStatus=Authorized\n";
        assert_eq!(supplicant_state(output), Some("AUTHENTICATED"));
        assert!(is_mellanox_controller("0c:00.0 Ethernet controller: Mellanox Technologies MT2910"));
    }
}
