//! Host-wide checks: kernel modules, services, kernel log and PCIe links

use super::{CheckContext, CheckKind, Probe};
use crate::discovered::MetricValue;
use crate::error::Result;
use crate::evaluate::evaluate;
use crate::orchestrate::CheckOutcome;
use crate::orchestrate::DeviceRecord;
use crate::parsers::lspci::{self, DeviceClass};
use crate::parsers::kernel_log;
use crate::threshold::{ThresholdSpec, ThresholdValue};
use crate::verdict::Evaluation;

const PEERMEM_MODULE: &str = "nvidia_peermem";

/// Run `check` over the output of one probe, reported under `subject`
fn on_output<F>(ctx: &CheckContext<'_>, kind: CheckKind, probe: Probe, subject: &str, check: F) -> CheckOutcome
where
    F: FnOnce(&str) -> Evaluation,
{
    let evaluation = match ctx.output(&probe) {
        Ok(text) => check(text),
        Err(evaluation) => evaluation,
    };
    CheckOutcome::single(kind.name(), subject, evaluation)
}

pub(super) fn peermem(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    Ok(on_output(ctx, CheckKind::PeermemModule, Probe::Lsmod, PEERMEM_MODULE, |text| {
        let loaded = text
            .lines()
            .any(|line| line.split_whitespace().next() == Some(PEERMEM_MODULE));
        if loaded {
            Evaluation::pass()
        } else {
            Evaluation::fail(format!("{} module is not loaded", PEERMEM_MODULE))
        }
    }))
}

pub(super) fn fabric_manager(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    if !ctx.topology.has_gpus() {
        return Ok(CheckOutcome::skipped(CheckKind::FabricManager.name(), "shape has no GPUs"));
    }
    Ok(on_output(ctx, CheckKind::FabricManager, Probe::FabricManagerStatus, "nvidia-fabricmanager", |text| {
        if text.contains("active (running)") {
            Evaluation::pass()
        } else {
            let state = text
                .lines()
                .map(str::trim)
                .find(|line| line.starts_with("Active:"))
                .unwrap_or("service status unknown");
            Evaluation::fail(format!("fabric manager is not running ({})", state))
        }
    }))
}

/// FAIL listing the first offending line and how many there were
fn log_findings(lines: &[&str], what: &str) -> Evaluation {
    match lines.first() {
        None => Evaluation::pass_because(format!("no {} found", what)),
        Some(first) => Evaluation::fail(format!("{} {} found, first: {}", lines.len(), what, first.trim())),
    }
}

pub(super) fn pcie_error(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    Ok(on_output(ctx, CheckKind::PcieError, Probe::Dmesg, "dmesg", |text| {
        if text.trim().is_empty() {
            return Evaluation::fail("no system messages found");
        }
        log_findings(&kernel_log::pcie_errors(text), "PCIe errors")
    }))
}

pub(super) fn hca_error(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    Ok(on_output(ctx, CheckKind::HcaError, Probe::DmesgHuman, "dmesg", |text| {
        log_findings(&kernel_log::hca_fatal_errors(text), "fatal mlx5 errors")
    }))
}

pub(super) fn missing_interface(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    let allowed = match ctx.limit(CheckKind::MissingInterface) {
        Some(limit) => limit.number()?,
        None => 0.0,
    };
    let spec = ThresholdSpec::NumericCeiling(allowed);

    Ok(on_output(ctx, CheckKind::MissingInterface, Probe::Lspci, "rev ff devices", |text| {
        let missing = lspci::count_rev_ff(text) as u64;
        evaluate(&MetricValue::from(missing), &spec)
    }))
}

pub(super) fn eth0_presence(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    Ok(on_output(ctx, CheckKind::Eth0Presence, Probe::IpAddr, "eth0", |text| {
        if has_interface(text, "eth0") {
            Evaluation::pass()
        } else {
            Evaluation::fail("eth0 interface not found")
        }
    }))
}

/// Interface header lines of `ip addr` look like `2: eth0: <BROADCAST,...>`
fn has_interface(ip_addr: &str, name: &str) -> bool {
    ip_addr.lines().any(|line| {
        let mut fields = line.split(':');
        let numbered = fields.next().is_some_and(|index| index.trim().parse::<u32>().is_ok());
        let interface = fields.next().map(str::trim).unwrap_or_default();
        numbered && interface.split('@').next() == Some(name)
    })
}

/// Width and speed expectations for one device class
struct ClassLimits {
    class: DeviceClass,
    widths: Vec<(String, u64)>,
    speeds: Vec<(String, u64)>,
}

impl ClassLimits {
    fn from_threshold(limit: &ThresholdValue<'_>, class: DeviceClass, prefix: &str) -> Result<Self> {
        Ok(Self {
            class,
            widths: limit.field_counts(&format!("{}_widths", prefix))?,
            speeds: limit.field_counts(&format!("{}_speeds", prefix))?,
        })
    }

    fn is_empty(&self) -> bool {
        self.widths.is_empty() && self.speeds.is_empty()
    }

    fn check(&self, lspci_output: &str) -> Evaluation {
        let status = lspci::link_status_for(lspci_output, self.class);
        let label = self.class.label();

        if status.devices == 0 {
            let vendor = match self.class {
                DeviceClass::Nvidia => "NVIDIA",
                DeviceClass::Mellanox => "Mellanox",
            };
            return Evaluation::fail(format!("No {} PCIe devices found", vendor));
        }

        let mut problems: Vec<String> = status
            .state_errors
            .iter()
            .map(|error| format!("{} {}", label, error))
            .collect();
        problems.extend(mismatches(label, "width", &self.widths, &status.widths));
        problems.extend(mismatches(label, "speed", &self.speeds, &status.speeds));

        if problems.is_empty() {
            Evaluation::pass()
        } else {
            Evaluation::fail(problems.join("; "))
        }
    }
}

fn mismatches(
    label: &str,
    what: &str,
    expected: &[(String, u64)],
    observed: &std::collections::BTreeMap<String, u64>,
) -> Vec<String> {
    expected
        .iter()
        .filter_map(|(value, count)| {
            let found = observed.get(value).copied().unwrap_or(0);
            (found != *count).then(|| {
                format!(
                    "{} PCIe {} mismatch: expected {}x {}, got {}x {}",
                    label, what, count, value, found, value
                )
            })
        })
        .collect()
}

pub(super) fn pcie_width(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    let name = CheckKind::PcieWidthMissingLanes.name();
    let limit = ctx.required_limit(CheckKind::PcieWidthMissingLanes)?;
    if !limit.is_object() {
        return Err(limit.invalid("expected {gpu_widths, gpu_speeds, rdma_widths, rdma_speeds}"));
    }

    let classes = [
        ClassLimits::from_threshold(&limit, DeviceClass::Nvidia, "gpu")?,
        ClassLimits::from_threshold(&limit, DeviceClass::Mellanox, "rdma")?,
    ];

    let text = match ctx.output(&Probe::LspciVerbose) {
        Ok(text) => text,
        Err(evaluation) => return Ok(CheckOutcome::single(name, "lspci", evaluation)),
    };

    let records = classes
        .iter()
        .filter(|class| !class.is_empty())
        .map(|class| DeviceRecord::new(class.class.label(), class.check(text)))
        .collect();

    Ok(CheckOutcome::fold(name, records))
}

#[cfg(test)]
mod tests {
    use super::super::{execute, ProbeOutputs};
    use super::*;
    use crate::topology::{GpuEntry, ShapeTopology};
    use crate::verdict::Verdict;
    use serde_json::json;

    fn shape() -> ShapeTopology {
        ShapeTopology {
            shape: "BM.GPU.H100.8".into(),
            gpus: vec![GpuEntry {
                pci: "0000:0f:00.0".into(),
                model: "H100".into(),
                index: Some(0),
                module_id: None,
            }],
            ..Default::default()
        }
    }

    fn run_with(kind: CheckKind, probe: Probe, output: &str) -> CheckOutcome {
        let topology = shape();
        let probes = ProbeOutputs::new().captured(probe, output);
        execute(kind, &CheckContext::new(&topology, &probes))
    }

    #[test]
    fn test_peermem() {
        let loaded = "Module Size Used by\nnvidia_peermem 16384 0\nnvidia 56000000 1 nvidia_peermem\n";
        assert_eq!(run_with(CheckKind::PeermemModule, Probe::Lsmod, loaded).verdict, Verdict::Pass);
        let missing = "Module Size Used by\nnvidia 56000000 0\n";
        assert_eq!(run_with(CheckKind::PeermemModule, Probe::Lsmod, missing).verdict, Verdict::Fail);
    }

    #[test]
    fn test_fabric_manager() {
        let running = "● nvidia-fabricmanager.service\n   Active: active (running) since Mon\n";
        let stopped = "● nvidia-fabricmanager.service\n   Active: inactive (dead)\n";
        assert_eq!(run_with(CheckKind::FabricManager, Probe::FabricManagerStatus, running).verdict, Verdict::Pass);
        let outcome = run_with(CheckKind::FabricManager, Probe::FabricManagerStatus, stopped);
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert!(outcome.reason.contains("Active: inactive (dead)"));
    }

    #[test]
    fn test_pcie_error_and_empty_log() {
        let clean = "[    1.0] pcieport 0000:00:01.0: AER: enabled with IRQ 24\n";
        assert_eq!(run_with(CheckKind::PcieError, Probe::Dmesg, clean).verdict, Verdict::Pass);

        let noisy = "[ 12.0] pcieport 0000:00:01.0: AER: Corrected error received: 0000:00:01.0\n";
        let outcome = run_with(CheckKind::PcieError, Probe::Dmesg, noisy);
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert!(outcome.reason.contains("1 PCIe errors found"));

        let empty = run_with(CheckKind::PcieError, Probe::Dmesg, "");
        assert_eq!(empty.reason, "dmesg: no system messages found");
    }

    #[test]
    fn test_hca_error() {
        let fatal = "[Mon Oct 19 10:00:00 2026] mlx5_core 0000:0c:00.0: mlx5_health: Fatal error detected\n";
        assert_eq!(run_with(CheckKind::HcaError, Probe::DmesgHuman, fatal).verdict, Verdict::Fail);
        assert_eq!(run_with(CheckKind::HcaError, Probe::DmesgHuman, "quiet\n").verdict, Verdict::Pass);
    }

    #[test]
    fn test_missing_interface() {
        let output = "0c:00.0 Ethernet controller: Mellanox Technologies MT2910 (rev ff)\n0f:00.0 3D controller: NVIDIA Corporation (rev a1)\n";
        let outcome = run_with(CheckKind::MissingInterface, Probe::Lspci, output);
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(outcome.reason, "rev ff devices: 1 exceeds 0");

        let topology = shape();
        let probes = ProbeOutputs::new().captured(Probe::Lspci, output);
        let tolerant = json!(1);
        let ctx = CheckContext::new(&topology, &probes).with_threshold(Some(&tolerant));
        assert_eq!(execute(CheckKind::MissingInterface, &ctx).verdict, Verdict::Pass);
    }

    #[test]
    fn test_eth0_presence() {
        let present = "1: lo: <LOOPBACK,UP> mtu 65536\n2: eth0: <BROADCAST,MULTICAST,UP> mtu 9000\n";
        let absent = "1: lo: <LOOPBACK,UP> mtu 65536\n2: ens300f0: <BROADCAST> mtu 9000\n    altname eth0x\n";
        assert_eq!(run_with(CheckKind::Eth0Presence, Probe::IpAddr, present).verdict, Verdict::Pass);
        assert_eq!(run_with(CheckKind::Eth0Presence, Probe::IpAddr, absent).verdict, Verdict::Fail);
    }

    const LSPCI_VVV: &str = "\
0f:00.0 3D controller: NVIDIA Corporation GH100 [H100 SXM5 80GB] (rev a1)
\t\tLnkSta:\tSpeed 32GT/s, Width x16
2d:00.0 3D controller: NVIDIA Corporation GH100 [H100 SXM5 80GB] (rev a1)
\t\tLnkSta:\tSpeed 32GT/s (ok), Width x8 (downgraded)
0c:00.0 Ethernet controller: Mellanox Technologies MT2910 Family [ConnectX-7]
\t\tLnkSta:\tSpeed 32GT/s (ok), Width x16 (ok)
";

    #[test]
    fn test_pcie_width() {
        let topology = shape();
        let probes = ProbeOutputs::new().captured(Probe::LspciVerbose, LSPCI_VVV);
        let threshold = json!({
            "gpu_widths": {"Width x16": 2},
            "gpu_speeds": {"Speed 32GT/s": 2},
            "rdma_widths": {"Width x16": 1}
        });
        let ctx = CheckContext::new(&topology, &probes).with_threshold(Some(&threshold));
        let outcome = execute(CheckKind::PcieWidthMissingLanes, &ctx);

        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(outcome.devices[1].verdict, Verdict::Pass);
        let gpu = &outcome.devices[0].reason;
        assert!(gpu.contains("width x8 state 'downgraded'"));
        assert!(gpu.contains("GPU/NVSwitch PCIe width mismatch: expected 2x Width x16, got 1x Width x16"));
    }

    #[test]
    fn test_pcie_width_no_devices() {
        let topology = shape();
        let probes = ProbeOutputs::new().captured(Probe::LspciVerbose, "00:00.0 Host bridge: Intel\n");
        let threshold = json!({"gpu_widths": {"Width x16": 8}});
        let ctx = CheckContext::new(&topology, &probes).with_threshold(Some(&threshold));
        let outcome = execute(CheckKind::PcieWidthMissingLanes, &ctx);
        assert_eq!(outcome.reason, "GPU/NVSwitch: No NVIDIA PCIe devices found");
    }
}
