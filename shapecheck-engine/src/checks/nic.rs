//! NIC checks: presence, link health, counters and RDMA configuration

use super::{defaults, CheckContext, CheckKind, Probe};
use crate::correlate::{join_by_name, NameJoined};
use crate::discovered::{DiscoveredDevice, MetricValue};
use crate::error::Result;
use crate::evaluate::{evaluate, evaluate_metrics};
use crate::orchestrate::{run_correlated, CheckOutcome, DeviceRecord};
use crate::parsers::{mlxlink, rdma};
use crate::threshold::{SubSpec, ThresholdSpec, ThresholdValue};
use crate::topology::{Declared, NicEntry};
use crate::verdict::Evaluation;
use std::collections::BTreeMap;

const AUTHENTICATED: &str = "Supplicant PAE state=AUTHENTICATED";

pub(super) fn count_probes(ctx: &CheckContext<'_>) -> Vec<Probe> {
    ctx.topology
        .rdma_nics
        .iter()
        .map(|nic| Probe::LspciDevice(nic.pci.clone()))
        .collect()
}

pub(super) fn link_probes(nics: &[NicEntry]) -> Vec<Probe> {
    std::iter::once(Probe::Ibdev2netdev)
        .chain(
            nics.iter()
                .filter_map(|nic| nic.device_name())
                .map(|device| Probe::Mlxlink(device.to_string())),
        )
        .collect()
}

/// `ibdev2netdev` first, then one probe per RDMA interface it resolves
pub(super) fn interface_probes(ctx: &CheckContext<'_>, probe: fn(String) -> Probe) -> Vec<Probe> {
    if !ctx.probes.contains(&Probe::Ibdev2netdev) {
        return vec![Probe::Ibdev2netdev];
    }
    let names = ctx.netdev_map();
    join_by_name(&ctx.topology.rdma_nics, &names)
        .entries
        .into_iter()
        .filter_map(|entry| match entry {
            NameJoined::Resolved(_, interface) => Some(probe(interface)),
            NameJoined::Missing(_) => None,
        })
        .collect()
}

pub(super) fn max_acc_probes(ctx: &CheckContext<'_>) -> Vec<Probe> {
    max_acc_targets(ctx)
        .unwrap_or_default()
        .into_iter()
        .map(Probe::Mlxconfig)
        .collect()
}

pub(super) fn count(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    let name = CheckKind::RdmaNicsCount.name();
    let declared = &ctx.topology.rdma_nics;
    let expected = match ctx.limit(CheckKind::RdmaNicsCount) {
        Some(limit) => limit.number()?,
        None => declared.len() as f64,
    };

    let mut discovered = Vec::new();
    let mut probe_failures = Vec::new();
    for nic in declared {
        match ctx.output(&Probe::LspciDevice(nic.pci.clone())) {
            Ok(text) if rdma::is_mellanox_controller(text) => {
                // lspci echoes the address it was asked about on the first line
                let address = text.split_whitespace().next().unwrap_or(&nic.pci);
                discovered.push(DiscoveredDevice::new(address));
            }
            Ok(_) => {}
            Err(evaluation) => probe_failures.push((nic.label(), evaluation)),
        }
    }

    let found = discovered.len() as u64;
    let mut outcome = run_correlated(name, declared, discovered, |pair| {
        DeviceRecord::new(pair.declared.label(), Evaluation::pass())
    })?;

    // a NIC whose probe failed says why, instead of just "not found"
    for (label, evaluation) in probe_failures {
        if let Some(record) = outcome.devices.iter_mut().find(|d| d.device == label) {
            record.reason = evaluation.reason;
        }
    }

    if declared.is_empty() && expected == 0.0 {
        return Ok(outcome);
    }
    let total = evaluate(&MetricValue::from(found), &ThresholdSpec::count(expected));
    Ok(outcome.with_device(DeviceRecord::new("rdma nic count", total)))
}

/// Thresholds of `link_check` / `eth_link_check`
struct LinkLimits {
    speed: String,
    width: Option<String>,
    effective_errors: f64,
    lane_errors: f64,
    effective_ber: f64,
    raw_ber: f64,
}

impl LinkLimits {
    fn from_threshold(limit: ThresholdValue<'_>, with_width: bool) -> Result<Self> {
        if !limit.is_object() {
            return Err(limit.invalid("expected an object with at least 'speed'"));
        }
        Ok(Self {
            speed: limit
                .field_string("speed")?
                .ok_or_else(|| limit.invalid("missing 'speed'"))?,
            width: if with_width { limit.field_string("width")? } else { None },
            effective_errors: limit.field_number("effective_physical_errors")?.unwrap_or(0.0),
            lane_errors: limit.field_number("raw_physical_errors_per_lane")?.unwrap_or(0.0),
            effective_ber: limit
                .field_float("effective_physical_ber")?
                .unwrap_or(defaults::EFFECTIVE_BER_CEILING),
            raw_ber: limit
                .field_float("raw_physical_ber")?
                .unwrap_or(defaults::RAW_BER_CEILING),
        })
    }

    fn spec(&self) -> ThresholdSpec {
        let mut subs = vec![
            SubSpec::new("speed", ThresholdSpec::Exact(self.speed.clone())),
            SubSpec::new("state", ThresholdSpec::Exact("Active".into())),
            SubSpec::new(
                "physical_state",
                ThresholdSpec::AllowSet(defaults::strings(defaults::LINK_PHYSICAL_STATES)),
            ),
            SubSpec::new("status_opcode", ThresholdSpec::count(0.0)),
            SubSpec::new(
                "effective_physical_errors",
                ThresholdSpec::NumericCeiling(self.effective_errors),
            ),
            SubSpec::new(
                "effective_physical_ber",
                ThresholdSpec::ExponentialCeiling(self.effective_ber),
            ),
            SubSpec::new("raw_physical_ber", ThresholdSpec::ExponentialCeiling(self.raw_ber)),
        ];
        if let Some(width) = &self.width {
            subs.push(SubSpec::new("width", ThresholdSpec::Exact(width.clone())));
        }
        ThresholdSpec::Composite(subs)
    }

    /// Per-lane counters only warn, and the reason lists every lane
    fn lanes(&self, lanes: &[u64]) -> Evaluation {
        if lanes.iter().any(|lane| *lane as f64 > self.lane_errors) {
            let joined = lanes.iter().map(u64::to_string).collect::<Vec<_>>().join(" ");
            Evaluation::warn(joined)
        } else {
            Evaluation::pass()
        }
    }
}

fn link_metrics(report: &mlxlink::LinkReport) -> BTreeMap<String, MetricValue> {
    [
        ("speed", &report.speed),
        ("state", &report.state),
        ("physical_state", &report.physical_state),
        ("width", &report.width),
        ("status_opcode", &report.status_opcode),
        ("effective_physical_errors", &report.effective_physical_errors),
        ("effective_physical_ber", &report.effective_physical_ber),
        ("raw_physical_ber", &report.raw_physical_ber),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .map(|(name, value)| (name.to_string(), MetricValue::from(value.as_str())))
    .collect()
}

pub(super) fn link(ctx: &CheckContext<'_>, kind: CheckKind) -> Result<CheckOutcome> {
    let name = kind.name();
    let eth = kind == CheckKind::EthLink;
    let limits = LinkLimits::from_threshold(ctx.required_limit(kind)?, eth)?;
    let spec = limits.spec();

    let nics = if eth { &ctx.topology.vcn_nics } else { &ctx.topology.rdma_nics };
    if nics.is_empty() {
        let reason = if eth { "no VCN NICs declared for the shape" } else { "no RDMA NICs declared for the shape" };
        return Ok(CheckOutcome::skipped(name, reason));
    }

    if let Err(evaluation) = ctx.output(&Probe::Ibdev2netdev) {
        return Ok(CheckOutcome::single(name, "ibdev2netdev", evaluation));
    }
    let names = ctx.netdev_map();
    let joined = join_by_name(nics, &names);

    let records: Vec<DeviceRecord> = joined
        .entries
        .iter()
        .map(|entry| {
            let (nic, interface) = match entry {
                NameJoined::Resolved(nic, interface) => (nic, interface),
                NameJoined::Missing(nic) => return DeviceRecord::not_found(nic.label()),
            };
            let label = format!("{} ({})", nic.label(), interface);
            let device = nic.device_name().unwrap_or_default();
            let report = ctx
                .output(&Probe::Mlxlink(device.to_string()))
                .and_then(|text| {
                    mlxlink::parse(text).map_err(|error| Evaluation::fail(error.describe(device)))
                });

            match report {
                Ok(report) => {
                    let mut result = evaluate_metrics(&link_metrics(&report), &spec).metrics;
                    result.push(("raw_physical_errors_per_lane".to_string(), limits.lanes(&report.raw_errors_per_lane)));
                    DeviceRecord::from_metrics(label, result)
                }
                Err(evaluation) => DeviceRecord::new(label, evaluation),
            }
        })
        .collect();

    Ok(CheckOutcome::fold(name, records))
}

pub(super) fn rx_discards(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    let name = CheckKind::RxDiscards.name();
    let ceiling = ctx.required_limit(CheckKind::RxDiscards)?.number()?;
    let spec = ThresholdSpec::NumericCeiling(ceiling);

    per_interface(ctx, name, Probe::Ethtool, |text| {
        let counters = rdma::parse_rx_discards(text);
        if counters.is_empty() {
            return vec![(
                "rx_prio_discards".to_string(),
                Evaluation::fail("no rx_prio*_discards counters reported"),
            )];
        }
        counters
            .into_iter()
            .map(|(counter, value)| {
                let evaluation = evaluate(&MetricValue::from(value), &spec);
                (counter, evaluation)
            })
            .collect()
    })
}

pub(super) fn auth(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    let name = CheckKind::Auth.name();
    let spec = ThresholdSpec::Exact(AUTHENTICATED.to_string());

    per_interface(ctx, name, Probe::WpaCli, |text| {
        let state = match rdma::supplicant_state(text) {
            Some(state) => format!("Supplicant PAE state={}", state),
            None => "no supplicant state reported".to_string(),
        };
        vec![("supplicant".to_string(), evaluate(&MetricValue::from(state), &spec))]
    })
}

/// Shared shape of the checks that run one probe per RDMA interface
fn per_interface<F>(ctx: &CheckContext<'_>, name: &str, probe: fn(String) -> Probe, evaluate_output: F) -> Result<CheckOutcome>
where
    F: Fn(&str) -> Vec<(String, Evaluation)>,
{
    let nics = &ctx.topology.rdma_nics;
    if nics.is_empty() {
        return Ok(CheckOutcome::skipped(name, "no RDMA NICs declared for the shape"));
    }
    if let Err(evaluation) = ctx.output(&Probe::Ibdev2netdev) {
        return Ok(CheckOutcome::single(name, "ibdev2netdev", evaluation));
    }

    let names = ctx.netdev_map();
    let joined = join_by_name(nics, &names);

    let records: Vec<DeviceRecord> = joined
        .entries
        .iter()
        .map(|entry| match entry {
            NameJoined::Resolved(nic, interface) => {
                let label = format!("{} ({})", nic.label(), interface);
                match ctx.output(&probe(interface.clone())) {
                    Ok(text) => DeviceRecord::from_metrics(label, evaluate_output(text)),
                    Err(evaluation) => DeviceRecord::new(label, evaluation),
                }
            }
            NameJoined::Missing(nic) => DeviceRecord::not_found(nic.label()),
        })
        .collect();

    Ok(CheckOutcome::fold(name, records))
}

pub(super) fn gid_index(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    let name = CheckKind::GidIndex.name();
    let allowed: Vec<String> = match ctx.limit(CheckKind::GidIndex) {
        Some(limit) => limit.integers()?,
        None => defaults::GID_ALLOWED_INDICES.to_vec(),
    }
    .into_iter()
    .map(|index| index.to_string())
    .collect();
    let spec = ThresholdSpec::AllowSet(allowed);

    let text = match ctx.output(&Probe::ShowGids) {
        Ok(text) => text,
        Err(evaluation) => return Ok(CheckOutcome::single(name, "show_gids", evaluation)),
    };

    let entries = rdma::parse_show_gids(text);
    if entries.is_empty() {
        let evaluation = Evaluation::fail("no GID entries reported by show_gids");
        return Ok(CheckOutcome::single(name, "show_gids", evaluation));
    }

    // one record per RDMA device, one metric per distinct index
    let mut by_device: BTreeMap<String, BTreeMap<i64, Evaluation>> = BTreeMap::new();
    for entry in &entries {
        by_device
            .entry(entry.device.clone())
            .or_default()
            .entry(entry.index)
            .or_insert_with(|| evaluate(&MetricValue::from(entry.index.to_string()), &spec));
    }

    let records = by_device
        .into_iter()
        .map(|(device, indices)| {
            let metrics = indices
                .into_iter()
                .map(|(index, evaluation)| (format!("index {}", index), evaluation))
                .collect();
            DeviceRecord::from_metrics(device, metrics)
        })
        .collect();

    Ok(CheckOutcome::fold(name, records))
}

/// PCI addresses `max_acc_check` inspects: the configured list, else the
/// declared RDMA NICs
fn max_acc_targets(ctx: &CheckContext<'_>) -> Result<Vec<String>> {
    match ctx.limit(CheckKind::MaxAcc) {
        Some(limit) if limit.raw().is_array() => limit.strings(),
        Some(limit) if limit.is_object() => Ok(limit
            .field_strings("pci_ids")?
            .unwrap_or_else(|| declared_pcis(ctx))),
        Some(limit) => Err(limit.invalid("expected a list of PCI addresses or {pci_ids}")),
        None => Ok(declared_pcis(ctx)),
    }
}

fn declared_pcis(ctx: &CheckContext<'_>) -> Vec<String> {
    ctx.topology.rdma_nics.iter().map(|nic| nic.pci.clone()).collect()
}

pub(super) fn max_acc(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    let name = CheckKind::MaxAcc.name();
    let targets = max_acc_targets(ctx)?;
    let spec = ThresholdSpec::Composite(vec![
        SubSpec::new(
            "MAX_ACC_OUT_READ",
            ThresholdSpec::AllowSet(defaults::strings(defaults::MAX_ACC_OUT_READ_VALUES)),
        ),
        SubSpec::new("ADVANCED_PCI_SETTINGS", ThresholdSpec::Exact("True".into())),
    ]);

    let records = targets
        .into_iter()
        .map(|pci| match ctx.output(&Probe::Mlxconfig(pci.clone())) {
            Ok(text) => {
                let settings = rdma::parse_mlxconfig(text);
                let mut metrics = BTreeMap::new();
                if let Some(value) = settings.max_acc_out_read {
                    metrics.insert("MAX_ACC_OUT_READ".to_string(), MetricValue::from(value));
                }
                if let Some(value) = settings.advanced_pci_settings {
                    metrics.insert("ADVANCED_PCI_SETTINGS".to_string(), MetricValue::from(value));
                }
                DeviceRecord::from_metrics(pci, evaluate_metrics(&metrics, &spec).metrics)
            }
            Err(evaluation) => DeviceRecord::new(pci, evaluation),
        })
        .collect();

    Ok(CheckOutcome::fold(name, records))
}
