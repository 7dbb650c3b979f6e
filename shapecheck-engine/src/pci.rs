//! PCI bus address normalization
//!
//! Utilities print the same device in different ways:
//! - `nvidia-smi` uses an 8 digit domain (`00000000:0F:00.0`)
//! - `lspci` omits the domain (`0f:00.0`)
//! - shape documents use the sysfs form (`0000:0f:00.0`)
//!
//! Every address is parsed into domain/bus/device/function and printed back
//! as `dddd:bb:dd.f`, so all three compare equal.

use serde::Serialize;
use std::fmt;

/// Canonical, comparable form of a PCI bus address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CanonicalPci(String);

impl CanonicalPci {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalPci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parsed domain:bus:device.function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciAddress {
    pub domain: u32,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    /// Parse `[domain:]bus:device.function`, any hex width, any case.
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let (head, dev_fn) = lowered.rsplit_once(':')?;
        let (domain, bus) = match head.rsplit_once(':') {
            Some((domain, bus)) => (hex_field(domain)?, hex_field(bus)?),
            None => (0, hex_field(head)?),
        };
        let (device, function) = dev_fn.split_once('.')?;
        let device = hex_field(device)?;
        let function = hex_field(function)?;

        if bus > 0xff || device > 0x1f || function > 0x7 {
            return None;
        }

        Some(PciAddress {
            domain,
            bus: bus as u8,
            device: device as u8,
            function: function as u8,
        })
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

/// Normalize a raw address. Strings that are not PCI addresses at all are
/// only trimmed and lower-cased, which keeps the operation idempotent.
pub fn normalize(raw: &str) -> CanonicalPci {
    match PciAddress::parse(raw) {
        Some(address) => CanonicalPci(address.to_string()),
        None => CanonicalPci(raw.trim().to_lowercase()),
    }
}

fn hex_field(field: &str) -> Option<u32> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let significant = field.trim_start_matches('0');
    if significant.is_empty() {
        return Some(0);
    }
    u32::from_str_radix(significant, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "0000:0f:00.0",
        "00000000:0F:00.0",
        "0f:00.0",
        "0F:00.0",
        "0000000F:00.0",
        "000f:00.0",
        "  0000:2D:00.1 ",
        "10000:01:1f.7",
        "mlx5_0",
        "",
        "0000:zz:00.0",
        "0000:0f:00",
        "000000000000abc",
        "0000:0f:20.0",
    ];

    #[test]
    fn test_six_zero_quirk_equivalence() {
        assert_eq!(
            normalize(&format!("{}{}", "000000", "0F:00.0")),
            normalize(&format!("{}{}", "00", "0f:00.0"))
        );
    }

    #[test]
    fn test_segment_count_and_case() {
        let canonical = normalize("0000:0f:00.0");
        assert_eq!(canonical.as_str(), "0000:0f:00.0");
        assert_eq!(normalize("00000000:0F:00.0"), canonical);
        assert_eq!(normalize("0f:00.0"), canonical);
        assert_eq!(normalize("0F:00.0"), canonical);
    }

    #[test]
    fn test_distinct_devices_stay_distinct() {
        assert_ne!(normalize("0000:0f:00.0"), normalize("0000:0f:00.1"));
        assert_ne!(normalize("0000:0f:00.0"), normalize("0001:0f:00.0"));
        assert_ne!(normalize("0000:2d:00.0"), normalize("0000:2a:00.0"));
    }

    #[test]
    fn test_idempotent() {
        for sample in SAMPLES {
            let once = normalize(sample);
            let twice = normalize(once.as_str());
            assert_eq!(once, twice, "normalize not idempotent for {:?}", sample);
        }
    }

    #[test]
    fn test_unparseable_falls_back_to_lowercase() {
        assert_eq!(normalize("MLX5_0").as_str(), "mlx5_0");
        assert_eq!(normalize("0000:0f:00").as_str(), "0000:0f:00");
        // device numbers stop at 0x1f
        assert_eq!(normalize("0000:0f:20.0").as_str(), "0000:0f:20.0");
    }

    #[test]
    fn test_wide_domain_is_kept() {
        assert_eq!(normalize("10000:01:1f.7").as_str(), "10000:01:1f.7");
    }

    #[test]
    fn test_parse_fields() {
        let address = PciAddress::parse("0000:d5:00.1").unwrap();
        assert_eq!(address.domain, 0);
        assert_eq!(address.bus, 0xd5);
        assert_eq!(address.device, 0);
        assert_eq!(address.function, 1);
    }
}
