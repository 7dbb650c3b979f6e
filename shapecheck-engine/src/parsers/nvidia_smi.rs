//! `nvidia-smi` output parsing

use regex::Regex;
use std::sync::OnceLock;

const DRIVER_FAILURES: &[&str] = &[
    "couldn't communicate with the NVIDIA driver",
    "NVIDIA-SMI has failed",
    "nvidia-smi: command not found",
    "No devices were found",
];

/// First line of output when `nvidia-smi` could not talk to the driver
pub fn driver_failure(output: &str) -> Option<String> {
    if DRIVER_FAILURES.iter().any(|marker| output.contains(marker)) {
        let line = output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("nvidia-smi failed");
        Some(line.to_string())
    } else {
        None
    }
}

/// Rows of a `--query-gpu=... --format=csv,noheader` call. Rows with fewer
/// than `columns` fields and error lines are dropped.
pub fn parse_query(output: &str, columns: usize) -> Vec<Vec<String>> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("Error"))
        .map(|line| line.split(',').map(|f| f.trim().to_string()).collect::<Vec<_>>())
        .filter(|fields| fields.len() >= columns)
        .collect()
}

/// Leading number of a field such as `1980 MHz`
pub fn leading_number(field: &str) -> Option<f64> {
    field.split_whitespace().next()?.parse::<f64>().ok()
}

/// Major version of a driver string (`550.90.12` -> 550)
pub fn driver_major(version: &str) -> Option<u32> {
    version.trim().split('.').next()?.parse().ok()
}

/// GPU as described by `nvidia-smi -q`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailedGpu {
    pub pci: String,
    pub module_id: Option<String>,
}

fn gpu_header() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        Regex::new(r"^GPU\s+([0-9A-Fa-f]+:[0-9A-Fa-f]{2}:[0-9A-Fa-f]{2}\.[0-9A-Fa-f])\s*$")
            .expect("static regex")
    })
}

/// Value after the first colon of a `Key : value` line
fn value_of(line: &str) -> &str {
    line.split_once(':').map(|(_, v)| v.trim()).unwrap_or("")
}

/// Split `nvidia-smi -q` output into GPU blocks and pick Bus Id / Module ID.
pub fn parse_detailed(output: &str) -> Vec<DetailedGpu> {
    let mut gpus: Vec<DetailedGpu> = Vec::new();

    for line in output.lines() {
        if let Some(caps) = gpu_header().captures(line) {
            gpus.push(DetailedGpu {
                pci: caps[1].to_string(),
                module_id: None,
            });
            continue;
        }

        let trimmed = line.trim();
        let key = trimmed.split(':').next().unwrap_or("").trim().to_ascii_lowercase();
        let Some(current) = gpus.last_mut() else {
            continue;
        };

        match key.as_str() {
            "bus id" => {
                let value = value_of(trimmed);
                if !value.is_empty() {
                    current.pci = value.to_string();
                }
            }
            "module id" => {
                let value = value_of(trimmed);
                if !value.is_empty() && value != "N/A" && value != "[Not Supported]" {
                    current.module_id = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    gpus
}

/// SRAM error counters of one GPU, aggregate section of `nvidia-smi -q -d ECC`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SramCounts {
    pub pci: String,
    pub parity: u64,
    pub sec_ded: u64,
    pub uncorrectable: Option<u64>,
    pub correctable: Option<u64>,
}

pub fn parse_sram(output: &str) -> Vec<SramCounts> {
    let mut gpus: Vec<SramCounts> = Vec::new();
    let mut in_aggregate = false;

    for line in output.lines() {
        if let Some(caps) = gpu_header().captures(line) {
            gpus.push(SramCounts {
                pci: caps[1].to_string(),
                ..Default::default()
            });
            in_aggregate = false;
            continue;
        }

        let trimmed = line.trim();
        match trimmed {
            "Aggregate" => {
                in_aggregate = true;
                continue;
            }
            "Volatile" => {
                in_aggregate = false;
                continue;
            }
            _ => {}
        }
        if !in_aggregate || !trimmed.starts_with("SRAM") {
            continue;
        }

        let Some(current) = gpus.last_mut() else {
            continue;
        };
        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        let Ok(count) = value.trim().parse::<u64>() else {
            continue;
        };

        let key = key.trim();
        if key == "SRAM Correctable" {
            current.correctable = Some(count);
        } else if key.starts_with("SRAM Uncorrectable") {
            if key.ends_with("Parity") {
                current.parity = count;
            } else if key.ends_with("SEC-DED") {
                current.sec_ded = count;
            }
            current.uncorrectable = Some(current.uncorrectable.unwrap_or(0) + count);
        }
    }

    gpus
}

/// Per-GPU NVLink state from `nvidia-smi nvlink -s`
#[derive(Debug, Clone, PartialEq)]
pub struct NvlinkGpu {
    pub index: u32,
    /// (link id, speed in GB/s)
    pub links: Vec<(u32, f64)>,
}

impl NvlinkGpu {
    /// Links running at or above `speed`
    pub fn links_at_least(&self, speed: f64) -> usize {
        self.links.iter().filter(|(_, s)| *s >= speed).count()
    }
}

/// Parse `nvidia-smi nvlink -s`. Inactive links are not listed with a speed
/// and therefore never count.
pub fn parse_nvlink(output: &str) -> Result<Vec<NvlinkGpu>, String> {
    static GPU: OnceLock<Regex> = OnceLock::new();
    static LINK: OnceLock<Regex> = OnceLock::new();
    let gpu_re = GPU.get_or_init(|| Regex::new(r"GPU\s+(\d+):\s+(?:NVIDIA|HGX)").expect("static regex"));
    let link_re = LINK.get_or_init(|| Regex::new(r"Link\s+(\d+):\s+([\d.]+)\s+GB/s").expect("static regex"));

    if output.trim().is_empty() {
        return Err("empty nvidia-smi nvlink output".to_string());
    }

    let mut gpus: Vec<NvlinkGpu> = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(caps) = gpu_re.captures(line) {
            let index = caps[1].parse().map_err(|_| format!("bad GPU index in '{}'", line))?;
            gpus.push(NvlinkGpu { index, links: Vec::new() });
        } else if let Some(caps) = link_re.captures(line) {
            if line.to_lowercase().contains("inactive") {
                continue;
            }
            let (Ok(link), Ok(speed)) = (caps[1].parse::<u32>(), caps[2].parse::<f64>()) else {
                continue;
            };
            if let Some(current) = gpus.last_mut() {
                current.links.push((link, speed));
            }
        } else if !line.contains("GPU") && !line.contains("Link") {
            return Err(format!("unexpected entry in nvidia-smi nvlink output: {}", line));
        }
    }

    Ok(gpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAILED: &str = "\
==============NVSMI LOG==============

Driver Version                            : 550.90.12

GPU 00000000:0F:00.0
    Product Name                          : NVIDIA H100 80GB HBM3
    Module ID                             : 2
    PCI
        Bus                               : 0x0F
        Bus Id                            : 00000000:0F:00.0

GPU 00000000:2D:00.0
    Product Name                          : NVIDIA H100 80GB HBM3
    Module ID                             : N/A
    PCI
        Bus Id                            : 00000000:2D:00.0
";

    #[test]
    fn test_parse_detailed_blocks() {
        let gpus = parse_detailed(DETAILED);
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[0].pci, "00000000:0F:00.0");
        assert_eq!(gpus[0].module_id.as_deref(), Some("2"));
        assert_eq!(gpus[1].module_id, None);
    }

    #[test]
    fn test_query_rows_and_numbers() {
        let rows = parse_query("00000000:0F:00.0, 1980 MHz\n\n00000000:2D:00.0, 1755 MHz\nbroken\n", 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(leading_number(&rows[1][1]), Some(1755.0));
        assert_eq!(driver_major("535.104.12"), Some(535));
    }

    #[test]
    fn test_driver_failure() {
        let output = "NVIDIA-SMI has failed because it couldn't communicate with the NVIDIA driver.\n";
        assert!(driver_failure(output).unwrap().starts_with("NVIDIA-SMI has failed"));
        assert!(driver_failure("00000000:0F:00.0, 1980").is_none());
    }

    #[test]
    fn test_parse_sram_aggregate_only() {
        let output = "\
GPU 00000000:0F:00.0
    ECC Errors
        Volatile
            SRAM Correctable              : 7
            SRAM Uncorrectable Parity     : 9
        Aggregate
            SRAM Correctable              : 25
            SRAM Uncorrectable Parity     : 2
            SRAM Uncorrectable SEC-DED    : 3
            DRAM Correctable              : 0
GPU 00000000:2D:00.0
    ECC Errors
        Aggregate
            SRAM Correctable              : 1200
            SRAM Uncorrectable            : 0
";
        let counts = parse_sram(output);
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].uncorrectable, Some(5));
        assert_eq!(counts[0].parity, 2);
        assert_eq!(counts[0].correctable, Some(25));
        assert_eq!(counts[1].uncorrectable, Some(0));
        assert_eq!(counts[1].correctable, Some(1200));
    }

    #[test]
    fn test_parse_nvlink() {
        let output = "\
GPU 0: NVIDIA H100 80GB HBM3 (UUID: GPU-1)
\t Link 0: 26.562 GB/s
\t Link 1: 26.562 GB/s
\t Link 2: <inactive>
GPU 1: NVIDIA H100 80GB HBM3 (UUID: GPU-2)
\t Link 0: 13.281 GB/s
";
        let gpus = parse_nvlink(output).unwrap();
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[0].links_at_least(26.0), 2);
        assert_eq!(gpus[1].links_at_least(26.0), 0);
        assert!(parse_nvlink("").is_err());
        assert!(parse_nvlink("garbage line").is_err());
    }
}
