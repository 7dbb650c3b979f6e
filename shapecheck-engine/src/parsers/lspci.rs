//! `lspci` output

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Which vendor's devices a `lspci -vvv` scan is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    /// NVIDIA GPUs and NVSwitches
    Nvidia,
    Mellanox,
}

impl DeviceClass {
    fn marker(self) -> &'static str {
        match self {
            DeviceClass::Nvidia => "nvidia",
            DeviceClass::Mellanox => "mellanox",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DeviceClass::Nvidia => "GPU/NVSwitch",
            DeviceClass::Mellanox => "RDMA",
        }
    }
}

/// Aggregated `LnkSta` lines for one device class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStatus {
    /// `Width x16` -> number of devices
    pub widths: BTreeMap<String, u64>,
    /// `Speed 32GT/s` -> number of devices
    pub speeds: BTreeMap<String, u64>,
    /// Link state other than `ok`
    pub state_errors: Vec<String>,
    /// Devices of this class that reported a `LnkSta` line
    pub devices: u64,
}

fn device_header() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        Regex::new(r"^([0-9a-fA-F]{2,8}:)?[0-9a-fA-F]{2}:[0-9a-fA-F]{2}\.[0-7]\s").expect("static regex")
    })
}

fn link_status() -> &'static Regex {
    static LNKSTA: OnceLock<Regex> = OnceLock::new();
    LNKSTA.get_or_init(|| {
        Regex::new(r"LnkSta:\s*Speed\s+([^\s,]+)\s*(?:\(([^)]+)\))?,\s*Width\s+x(\d+)\s*(?:\(([^)]+)\))?")
            .expect("static regex")
    })
}

/// Count link widths and speeds of every `class` device in `lspci -vvv` output.
/// A state that is not printed counts as `ok`.
pub fn link_status_for(output: &str, class: DeviceClass) -> LinkStatus {
    let mut status = LinkStatus::default();
    let mut in_class = false;

    for line in output.lines() {
        if device_header().is_match(line) {
            in_class = line.to_lowercase().contains(class.marker());
            continue;
        }
        if !in_class {
            continue;
        }
        let Some(caps) = link_status().captures(line) else {
            continue;
        };

        status.devices += 1;
        let speed = &caps[1];
        let width = &caps[3];
        let speed_state = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("ok");
        let width_state = caps.get(4).map(|m| m.as_str().trim()).unwrap_or("ok");

        if width_state == "ok" {
            *status.widths.entry(format!("Width x{}", width)).or_insert(0) += 1;
        } else {
            status
                .state_errors
                .push(format!("width x{} state '{}' instead of 'ok'", width, width_state));
        }
        if speed_state == "ok" {
            *status.speeds.entry(format!("Speed {}", speed)).or_insert(0) += 1;
        } else {
            status
                .state_errors
                .push(format!("speed {} state '{}' instead of 'ok'", speed, speed_state));
        }
    }

    status
}

/// Devices reporting revision `ff`, i.e. fallen off the bus
pub fn count_rev_ff(output: &str) -> usize {
    output.lines().filter(|line| line.contains("rev ff")).count()
}
