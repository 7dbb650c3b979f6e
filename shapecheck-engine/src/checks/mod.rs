//! Check catalogue
//!
//! Every check is a thin configuration over the engine: which probes it
//! needs, how their output becomes [`DiscoveredDevice`]s or metrics, which
//! [`ThresholdSpec`] its limit maps to, and how results are folded.
//!
//! Running a check happens in two steps. [`plan`] lists the probes that are
//! still missing for a check; the caller runs them and adds the output to
//! [`ProbeOutputs`], then asks again. Some probes depend on the output of
//! others (an `ethtool` call needs the interface `ibdev2netdev` maps a device
//! to), so planning may take more than one round. Once [`plan`] returns
//! nothing, [`execute`] produces the [`CheckOutcome`].
//!
//! [`DiscoveredDevice`]: crate::discovered::DiscoveredDevice
//! [`ThresholdSpec`]: crate::threshold::ThresholdSpec

pub mod defaults;
mod gpu;
mod host;
mod nic;

use crate::error::{EngineError, Result};
use crate::limits::{resolve_threshold, FallbackPolicy};
use crate::orchestrate::CheckOutcome;
use crate::threshold::ThresholdValue;
use crate::topology::ShapeTopology;
use crate::verdict::Evaluation;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CheckKind {
    GpuCount,
    GpuClock,
    GpuDriver,
    GpuMode,
    CdfpCable,
    RowRemapError,
    SramError,
    GpuXid,
    NvlinkSpeed,
    PeermemModule,
    FabricManager,
    RdmaNicsCount,
    Link,
    EthLink,
    RxDiscards,
    GidIndex,
    Auth,
    MaxAcc,
    PcieError,
    PcieWidthMissingLanes,
    MissingInterface,
    HcaError,
    Eth0Presence,
}

impl CheckKind {
    /// Catalogue order; checks run in this order
    pub const ALL: [CheckKind; 23] = [
        CheckKind::GpuCount,
        CheckKind::GpuClock,
        CheckKind::GpuDriver,
        CheckKind::GpuMode,
        CheckKind::CdfpCable,
        CheckKind::RowRemapError,
        CheckKind::SramError,
        CheckKind::GpuXid,
        CheckKind::NvlinkSpeed,
        CheckKind::PeermemModule,
        CheckKind::FabricManager,
        CheckKind::RdmaNicsCount,
        CheckKind::Link,
        CheckKind::EthLink,
        CheckKind::RxDiscards,
        CheckKind::GidIndex,
        CheckKind::Auth,
        CheckKind::MaxAcc,
        CheckKind::PcieError,
        CheckKind::PcieWidthMissingLanes,
        CheckKind::MissingInterface,
        CheckKind::HcaError,
        CheckKind::Eth0Presence,
    ];

    /// Name used in the limits document and on the command line
    pub fn name(self) -> &'static str {
        match self {
            CheckKind::GpuCount => "gpu_count_check",
            CheckKind::GpuClock => "gpu_clk_check",
            CheckKind::GpuDriver => "gpu_driver_check",
            CheckKind::GpuMode => "gpu_mode_check",
            CheckKind::CdfpCable => "cdfp_cable_check",
            CheckKind::RowRemapError => "row_remap_error_check",
            CheckKind::SramError => "sram_error_check",
            CheckKind::GpuXid => "gpu_xid_check",
            CheckKind::NvlinkSpeed => "nvlink_speed_check",
            CheckKind::PeermemModule => "peermem_module_check",
            CheckKind::FabricManager => "fabricmanager_check",
            CheckKind::RdmaNicsCount => "rdma_nics_count",
            CheckKind::Link => "link_check",
            CheckKind::EthLink => "eth_link_check",
            CheckKind::RxDiscards => "rx_discards_check",
            CheckKind::GidIndex => "gid_index_check",
            CheckKind::Auth => "auth_check",
            CheckKind::MaxAcc => "max_acc_check",
            CheckKind::PcieError => "pcie_error_check",
            CheckKind::PcieWidthMissingLanes => "pcie_width_missing_lanes_check",
            CheckKind::MissingInterface => "missing_interface_check",
            CheckKind::HcaError => "hca_error_check",
            CheckKind::Eth0Presence => "eth0_presence_check",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| EngineError::UnknownCheck(name.to_string()))
    }

    /// Whether an enabled check must carry a threshold under the strict policy
    pub fn needs_threshold(self) -> bool {
        matches!(
            self,
            CheckKind::GpuCount
                | CheckKind::GpuClock
                | CheckKind::GpuDriver
                | CheckKind::GpuMode
                | CheckKind::RowRemapError
                | CheckKind::SramError
                | CheckKind::GpuXid
                | CheckKind::NvlinkSpeed
                | CheckKind::Link
                | CheckKind::EthLink
                | CheckKind::RxDiscards
                | CheckKind::GidIndex
                | CheckKind::PcieWidthMissingLanes
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            CheckKind::GpuCount => "GPUs reported by nvidia-smi match the shape",
            CheckKind::GpuClock => "GPU graphics clocks within tolerance of the target",
            CheckKind::GpuDriver => "driver version is consistent, supported and not blacklisted",
            CheckKind::GpuMode => "MIG mode is in the allowed set",
            CheckKind::CdfpCable => "GPU module IDs match the declared slots",
            CheckKind::RowRemapError => "remapped row failures per GPU",
            CheckKind::SramError => "SRAM correctable and uncorrectable error counts",
            CheckKind::GpuXid => "XID errors in the kernel log",
            CheckKind::NvlinkSpeed => "active NVLinks at the expected speed",
            CheckKind::PeermemModule => "nvidia_peermem kernel module is loaded",
            CheckKind::FabricManager => "nvidia-fabricmanager service is running",
            CheckKind::RdmaNicsCount => "declared RDMA NICs present on the PCI bus",
            CheckKind::Link => "RDMA link speed, state and error counters",
            CheckKind::EthLink => "Ethernet (VCN) link speed, width, state and error counters",
            CheckKind::RxDiscards => "rx_prio*_discards counters on RDMA interfaces",
            CheckKind::GidIndex => "RoCE GID indices in the allowed set",
            CheckKind::Auth => "802.1X supplicant authenticated on RDMA interfaces",
            CheckKind::MaxAcc => "MAX_ACC_OUT_READ and ADVANCED_PCI_SETTINGS on RDMA NICs",
            CheckKind::PcieError => "PCIe port errors in the kernel log",
            CheckKind::PcieWidthMissingLanes => "PCIe link widths and speeds of GPUs and RDMA NICs",
            CheckKind::MissingInterface => "PCI devices reporting revision ff",
            CheckKind::HcaError => "fatal mlx5 errors in the kernel log",
            CheckKind::Eth0Presence => "eth0 interface is present",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A host utility invocation a check depends on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Probe {
    /// `nvidia-smi --query-gpu=<fields>`, fields comma separated
    NvidiaSmiQuery(String),
    NvidiaSmiDetailed,
    NvidiaSmiEcc,
    NvidiaSmiRemappedRows,
    NvidiaSmiNvlink,
    Dmesg,
    /// `dmesg -T`, human readable timestamps
    DmesgHuman,
    Lspci,
    LspciVerbose,
    /// `lspci -v -s <pci>`
    LspciDevice(String),
    Ibdev2netdev,
    /// `mlxlink -d <rdma device>`
    Mlxlink(String),
    /// `ethtool -S <interface>`
    Ethtool(String),
    ShowGids,
    /// `mlxconfig -d <pci> query`
    Mlxconfig(String),
    Lsmod,
    IpAddr,
    FabricManagerStatus,
    /// `wpa_cli -i <interface> status`
    WpaCli(String),
}

impl Probe {
    pub fn gpu_query(fields: &str) -> Self {
        Probe::NvidiaSmiQuery(fields.to_string())
    }

    /// Program and arguments
    pub fn argv(&self) -> Vec<String> {
        let parts: Vec<&str> = match self {
            Probe::NvidiaSmiQuery(fields) => {
                return vec![
                    "nvidia-smi".to_string(),
                    format!("--query-gpu={}", fields),
                    "--format=csv,noheader,nounits".to_string(),
                ]
            }
            Probe::NvidiaSmiDetailed => vec!["nvidia-smi", "-q"],
            Probe::NvidiaSmiEcc => vec!["nvidia-smi", "-q", "-d", "ECC"],
            Probe::NvidiaSmiRemappedRows => vec![
                "nvidia-smi",
                "--query-remapped-rows=gpu_bus_id,remapped_rows.failure",
                "--format=csv,noheader",
            ],
            Probe::NvidiaSmiNvlink => vec!["nvidia-smi", "nvlink", "-s"],
            Probe::Dmesg => vec!["dmesg"],
            Probe::DmesgHuman => vec!["dmesg", "-T"],
            Probe::Lspci => vec!["lspci"],
            Probe::LspciVerbose => vec!["lspci", "-vvv"],
            Probe::LspciDevice(pci) => vec!["lspci", "-v", "-s", pci],
            Probe::Ibdev2netdev => vec!["ibdev2netdev"],
            Probe::Mlxlink(device) => vec![
                "mlxlink",
                "-d",
                device,
                "--json",
                "--show_module",
                "--show_counters",
                "--show_eye",
            ],
            Probe::Ethtool(interface) => vec!["ethtool", "-S", interface],
            Probe::ShowGids => vec!["show_gids"],
            Probe::Mlxconfig(pci) => vec!["mlxconfig", "-d", pci, "query"],
            Probe::Lsmod => vec!["lsmod"],
            Probe::IpAddr => vec!["ip", "addr"],
            Probe::FabricManagerStatus => vec!["systemctl", "status", "nvidia-fabricmanager"],
            Probe::WpaCli(interface) => vec!["wpa_cli", "-i", interface, "status"],
        };
        parts.into_iter().map(str::to_string).collect()
    }

    /// Utilities that only report full data when run as root
    pub fn needs_root(&self) -> bool {
        matches!(
            self,
            Probe::Dmesg
                | Probe::DmesgHuman
                | Probe::LspciVerbose
                | Probe::Mlxlink(_)
                | Probe::Mlxconfig(_)
                | Probe::WpaCli(_)
        )
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}

/// What running a probe produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutput {
    /// The utility ran; its output, whatever the exit status
    Captured(String),
    /// The utility could not be run or timed out
    Failed(String),
}

/// Probe outputs gathered for one run, shared by every check
#[derive(Debug, Clone, Default)]
pub struct ProbeOutputs {
    outputs: BTreeMap<Probe, ProbeOutput>,
}

impl ProbeOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, probe: Probe, output: ProbeOutput) {
        self.outputs.insert(probe, output);
    }

    pub fn captured(mut self, probe: Probe, output: impl Into<String>) -> Self {
        self.insert(probe, ProbeOutput::Captured(output.into()));
        self
    }

    pub fn failed(mut self, probe: Probe, error: impl Into<String>) -> Self {
        self.insert(probe, ProbeOutput::Failed(error.into()));
        self
    }

    pub fn get(&self, probe: &Probe) -> Option<&ProbeOutput> {
        self.outputs.get(probe)
    }

    pub fn contains(&self, probe: &Probe) -> bool {
        self.outputs.contains_key(probe)
    }

    /// Captured text, if the probe ran
    pub fn text(&self, probe: &Probe) -> Option<&str> {
        match self.outputs.get(probe) {
            Some(ProbeOutput::Captured(text)) => Some(text),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Everything a check reads
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    pub topology: &'a ShapeTopology,
    /// Threshold from the limits document, if any
    pub threshold: Option<&'a Value>,
    pub policy: FallbackPolicy,
    pub probes: &'a ProbeOutputs,
}

impl<'a> CheckContext<'a> {
    pub fn new(topology: &'a ShapeTopology, probes: &'a ProbeOutputs) -> Self {
        Self {
            topology,
            threshold: None,
            policy: FallbackPolicy::default(),
            probes,
        }
    }

    pub fn with_threshold(mut self, threshold: Option<&'a Value>) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub(crate) fn limit(&self, kind: CheckKind) -> Option<ThresholdValue<'a>> {
        self.threshold.map(|value| ThresholdValue::new(kind.name(), value))
    }

    /// The threshold, or an error when there is no built-in to fall back to
    pub(crate) fn required_limit(&self, kind: CheckKind) -> Result<ThresholdValue<'a>> {
        self.limit(kind).ok_or_else(|| EngineError::MissingThreshold {
            check: kind.name().to_string(),
            shape: self.topology.shape.clone(),
        })
    }

    /// Captured output of a probe, or the FAIL evaluation explaining why not
    pub(crate) fn output(&self, probe: &Probe) -> std::result::Result<&'a str, Evaluation> {
        match self.probes.get(probe) {
            Some(ProbeOutput::Captured(text)) => Ok(text),
            Some(ProbeOutput::Failed(error)) => {
                Err(Evaluation::fail(format!("`{}` failed: {}", probe, error)))
            }
            None => Err(Evaluation::fail(format!("`{}` was not run", probe))),
        }
    }

    /// Interface names from `ibdev2netdev`, empty when it did not run
    pub(crate) fn netdev_map(&self) -> BTreeMap<String, String> {
        self.probes
            .text(&Probe::Ibdev2netdev)
            .map(crate::parsers::rdma::parse_ibdev2netdev)
            .unwrap_or_default()
    }
}

/// Probes `kind` still needs, given what has already been collected
pub fn plan(kind: CheckKind, ctx: &CheckContext<'_>) -> Vec<Probe> {
    let wanted = match kind {
        CheckKind::GpuCount => vec![Probe::gpu_query(gpu::COUNT_FIELDS)],
        CheckKind::GpuClock => vec![Probe::gpu_query(gpu::CLOCK_FIELDS)],
        CheckKind::GpuDriver => vec![Probe::gpu_query(gpu::DRIVER_FIELDS)],
        CheckKind::GpuMode => vec![Probe::gpu_query(gpu::MODE_FIELDS)],
        CheckKind::CdfpCable => vec![Probe::NvidiaSmiDetailed],
        CheckKind::RowRemapError => vec![
            Probe::gpu_query(gpu::DRIVER_FIELDS),
            Probe::NvidiaSmiRemappedRows,
        ],
        CheckKind::SramError => vec![Probe::NvidiaSmiEcc],
        CheckKind::GpuXid => vec![Probe::Dmesg],
        CheckKind::NvlinkSpeed => vec![Probe::NvidiaSmiNvlink],
        CheckKind::PeermemModule => vec![Probe::Lsmod],
        CheckKind::FabricManager => vec![Probe::FabricManagerStatus],
        CheckKind::RdmaNicsCount => nic::count_probes(ctx),
        CheckKind::Link => nic::link_probes(&ctx.topology.rdma_nics),
        CheckKind::EthLink => nic::link_probes(&ctx.topology.vcn_nics),
        CheckKind::RxDiscards => nic::interface_probes(ctx, Probe::Ethtool),
        CheckKind::GidIndex => vec![Probe::ShowGids],
        CheckKind::Auth => nic::interface_probes(ctx, Probe::WpaCli),
        CheckKind::MaxAcc => nic::max_acc_probes(ctx),
        CheckKind::PcieError => vec![Probe::Dmesg],
        CheckKind::PcieWidthMissingLanes => vec![Probe::LspciVerbose],
        CheckKind::MissingInterface => vec![Probe::Lspci],
        CheckKind::HcaError => vec![Probe::DmesgHuman],
        CheckKind::Eth0Presence => vec![Probe::IpAddr],
    };

    wanted
        .into_iter()
        .filter(|probe| !ctx.probes.contains(probe))
        .collect()
}

/// Probes still needed by any of `kinds`, deduplicated and sorted
pub fn plan_all(kinds: &[CheckKind], ctx: &CheckContext<'_>) -> Vec<Probe> {
    kinds
        .iter()
        .flat_map(|kind| plan(*kind, ctx))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Run one check. `Err` is a configuration problem: the check could not run.
pub fn run(kind: CheckKind, ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    let threshold = resolve_threshold(
        &ctx.topology.shape,
        kind.name(),
        ctx.threshold,
        kind.needs_threshold(),
        ctx.policy,
    )?;
    let ctx = ctx.with_threshold(threshold);

    debug!("Running {} for {}", kind, ctx.topology.shape);

    match kind {
        CheckKind::GpuCount => gpu::count(&ctx),
        CheckKind::GpuClock => gpu::clock(&ctx),
        CheckKind::GpuDriver => gpu::driver(&ctx),
        CheckKind::GpuMode => gpu::mode(&ctx),
        CheckKind::CdfpCable => gpu::cdfp_cable(&ctx),
        CheckKind::RowRemapError => gpu::row_remap(&ctx),
        CheckKind::SramError => gpu::sram(&ctx),
        CheckKind::GpuXid => gpu::xid(&ctx),
        CheckKind::NvlinkSpeed => gpu::nvlink(&ctx),
        CheckKind::PeermemModule => host::peermem(&ctx),
        CheckKind::FabricManager => host::fabric_manager(&ctx),
        CheckKind::RdmaNicsCount => nic::count(&ctx),
        CheckKind::Link => nic::link(&ctx, CheckKind::Link),
        CheckKind::EthLink => nic::link(&ctx, CheckKind::EthLink),
        CheckKind::RxDiscards => nic::rx_discards(&ctx),
        CheckKind::GidIndex => nic::gid_index(&ctx),
        CheckKind::Auth => nic::auth(&ctx),
        CheckKind::MaxAcc => nic::max_acc(&ctx),
        CheckKind::PcieError => host::pcie_error(&ctx),
        CheckKind::PcieWidthMissingLanes => host::pcie_width(&ctx),
        CheckKind::MissingInterface => host::missing_interface(&ctx),
        CheckKind::HcaError => host::hca_error(&ctx),
        CheckKind::Eth0Presence => host::eth0_presence(&ctx),
    }
}

/// Run one check; configuration problems become a flagged FAIL outcome.
pub fn execute(kind: CheckKind, ctx: &CheckContext<'_>) -> CheckOutcome {
    run(kind, ctx).unwrap_or_else(|error| {
        warn!("{} could not run: {}", kind, error);
        CheckOutcome::configuration_error(kind.name(), error)
    })
}
