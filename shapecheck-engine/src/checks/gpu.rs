//! GPU checks, all fed by `nvidia-smi` except the XID log scan

use super::{defaults, CheckContext, CheckKind, Probe};
use crate::discovered::{DiscoveredDevice, MetricValue};
use crate::error::Result;
use crate::evaluate::{band_floor, evaluate, evaluate_metrics};
use crate::orchestrate::{run_correlated, CheckOutcome, DeviceRecord};
use crate::parsers::{kernel_log, nvidia_smi};
use crate::threshold::{SubSpec, ThresholdSpec, ThresholdValue};
use crate::topology::Declared;
use crate::verdict::{Evaluation, Verdict};
use std::collections::{BTreeMap, BTreeSet};

pub(super) const COUNT_FIELDS: &str = "pci.bus_id,name";
pub(super) const CLOCK_FIELDS: &str = "pci.bus_id,index,clocks.current.graphics";
pub(super) const DRIVER_FIELDS: &str = "pci.bus_id,driver_version";
pub(super) const MODE_FIELDS: &str = "pci.bus_id,index,mig.mode.current";

/// Output of an `nvidia-smi` probe, or why there is none
fn smi_output<'a>(ctx: &CheckContext<'a>, probe: &Probe) -> std::result::Result<&'a str, Evaluation> {
    let text = ctx.output(probe)?;
    match nvidia_smi::driver_failure(text) {
        Some(line) => Err(Evaluation::fail(line)),
        None => Ok(text),
    }
}

/// One device per CSV row; first column is the bus id, `index` is lifted out
fn query_devices(text: &str, fields: &str) -> Vec<DiscoveredDevice> {
    let names: Vec<&str> = fields.split(',').collect();
    nvidia_smi::parse_query(text, names.len())
        .into_iter()
        .map(|row| {
            let mut device = DiscoveredDevice::new(row[0].clone());
            for (name, value) in names.iter().zip(row.iter()).skip(1) {
                if *name == "index" {
                    if let Ok(index) = value.parse() {
                        device = device.with_index(index);
                    }
                }
                device = device.with_metric(name, value.as_str());
            }
            device
        })
        .collect()
}

/// GPU indices (or addresses) of the named records, for summaries
fn gpu_list(ctx: &CheckContext<'_>, labels: &[&str]) -> String {
    labels
        .iter()
        .map(|label| {
            ctx.topology
                .gpus
                .iter()
                .find(|gpu| gpu.pci == *label)
                .and_then(|gpu| gpu.index)
                .map(|index| index.to_string())
                .unwrap_or_else(|| label.to_string())
        })
        .collect::<Vec<_>>()
        .join(",")
}

pub(super) fn count(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    let name = CheckKind::GpuCount.name();
    let expected = match ctx.limit(CheckKind::GpuCount) {
        Some(limit) => limit.number()?,
        None => ctx.topology.gpus.len() as f64,
    };
    if !ctx.topology.has_gpus() && expected == 0.0 {
        return Ok(CheckOutcome::skipped(name, "shape declares no GPUs"));
    }

    let text = match smi_output(ctx, &Probe::gpu_query(COUNT_FIELDS)) {
        Ok(text) => text,
        Err(evaluation) => return Ok(CheckOutcome::single(name, "nvidia-smi", evaluation)),
    };

    let discovered = query_devices(text, COUNT_FIELDS);
    let found = discovered.len() as u64;
    let outcome = run_correlated(name, &ctx.topology.gpus, discovered, |pair| {
        DeviceRecord::new(pair.declared.label(), Evaluation::pass())
    })?;

    let total = evaluate(&MetricValue::from(found), &ThresholdSpec::count(expected));
    Ok(outcome.with_device(DeviceRecord::new("gpu count", total)))
}

pub(super) fn clock(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    let name = CheckKind::GpuClock.name();
    let target = ctx
        .required_limit(CheckKind::GpuClock)?
        .number_or_field("clock_speed")?;
    let spec = ThresholdSpec::ToleranceBand {
        target,
        fraction_below: defaults::CLOCK_TOLERANCE,
    };

    let text = match smi_output(ctx, &Probe::gpu_query(CLOCK_FIELDS)) {
        Ok(text) => text,
        Err(evaluation) => return Ok(CheckOutcome::single(name, "nvidia-smi", evaluation)),
    };

    let mut lowest_passing: Option<f64> = None;
    let outcome = run_correlated(
        name,
        &ctx.topology.gpus,
        query_devices(text, CLOCK_FIELDS),
        |pair| {
            let raw = pair
                .discovered
                .metric("clocks.current.graphics")
                .map(MetricValue::as_text)
                .unwrap_or_default();
            let value = match nvidia_smi::leading_number(&raw) {
                Some(clock) => MetricValue::from(clock),
                None => MetricValue::from(raw),
            };
            let evaluation = evaluate(&value, &spec);
            if let (true, Some(clock)) = (evaluation.is_pass(), value.as_f64()) {
                lowest_passing = Some(lowest_passing.map_or(clock, |low: f64| low.min(clock)));
            }
            DeviceRecord::new(pair.declared.label(), evaluation)
        },
    )?;

    Ok(match outcome.verdict {
        Verdict::Pass => {
            let allowed = lowest_passing.unwrap_or_else(|| band_floor(target, defaults::CLOCK_TOLERANCE));
            let reason = format!("Expected {}, allowed {}", target, allowed);
            outcome.with_reason(reason)
        }
        Verdict::Fail | Verdict::Warn => {
            let failing = gpu_list(ctx, &outcome.failing_devices());
            let reason = format!("check GPU {}", failing);
            outcome.with_reason(reason)
        }
        Verdict::Skip => outcome,
    })
}

pub(super) fn driver(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    let name = CheckKind::GpuDriver.name();
    let (blocked, allowed) = match ctx.limit(CheckKind::GpuDriver) {
        Some(limit) => {
            if !limit.is_object() {
                return Err(limit.invalid("expected {blacklisted_versions, supported_versions}"));
            }
            (
                limit
                    .field_strings("blacklisted_versions")?
                    .unwrap_or_else(|| defaults::strings(defaults::BLACKLISTED_DRIVERS)),
                limit
                    .field_strings("supported_versions")?
                    .unwrap_or_default(),
            )
        }
        None => (
            defaults::strings(defaults::BLACKLISTED_DRIVERS),
            defaults::strings(defaults::SUPPORTED_DRIVERS),
        ),
    };

    let text = match smi_output(ctx, &Probe::gpu_query(DRIVER_FIELDS)) {
        Ok(text) => text,
        Err(evaluation) => return Ok(CheckOutcome::single(name, "nvidia-smi", evaluation)),
    };

    let versions: BTreeSet<String> = nvidia_smi::parse_query(text, 2)
        .into_iter()
        .map(|row| row[1].clone())
        .collect();

    let evaluation = match versions.len() {
        0 => Evaluation::fail("no driver version reported"),
        1 => {
            let version = versions.iter().next().cloned().unwrap_or_default();
            let spec = ThresholdSpec::BlockSet { blocked, allowed };
            let evaluation = evaluate(&MetricValue::from(version.as_str()), &spec);
            if evaluation.is_pass() {
                Evaluation::pass_because(version)
            } else {
                evaluation
            }
        }
        _ => Evaluation::fail(format!(
            "driver versions are mismatched: {}",
            versions.into_iter().collect::<Vec<_>>().join(", ")
        )),
    };

    Ok(CheckOutcome::single(name, "driver", evaluation))
}

pub(super) fn mode(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    let name = CheckKind::GpuMode.name();
    let allowed = match ctx.limit(CheckKind::GpuMode) {
        Some(limit) if limit.raw().is_array() => limit.strings()?,
        Some(limit) => limit
            .field_strings("allowed_modes")?
            .ok_or_else(|| limit.invalid("missing 'allowed_modes'"))?,
        None => defaults::strings(defaults::GPU_ALLOWED_MODES),
    };
    let spec = ThresholdSpec::AllowSet(allowed);

    let text = match smi_output(ctx, &Probe::gpu_query(MODE_FIELDS)) {
        Ok(text) => text,
        Err(evaluation) => return Ok(CheckOutcome::single(name, "nvidia-smi", evaluation)),
    };

    let outcome = run_correlated(name, &ctx.topology.gpus, query_devices(text, MODE_FIELDS), |pair| {
        let evaluation = match pair.discovered.metric("mig.mode.current") {
            Some(value) => evaluate(value, &spec),
            None => Evaluation::fail("mig.mode.current not reported"),
        };
        DeviceRecord::new(pair.declared.label(), evaluation)
    })?;

    Ok(if outcome.verdict == Verdict::Fail {
        let failing = gpu_list(ctx, &outcome.failing_devices());
        let reason = format!("Invalid GPU modes detected on GPUs {}", failing);
        outcome.with_reason(reason)
    } else {
        outcome
    })
}

pub(super) fn cdfp_cable(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    let name = CheckKind::CdfpCable.name();
    let text = match smi_output(ctx, &Probe::NvidiaSmiDetailed) {
        Ok(text) => text,
        Err(evaluation) => return Ok(CheckOutcome::single(name, "nvidia-smi", evaluation)),
    };

    let discovered = nvidia_smi::parse_detailed(text)
        .into_iter()
        .map(|gpu| {
            let device = DiscoveredDevice::new(gpu.pci);
            match gpu.module_id {
                Some(module_id) => device.with_module_id(module_id),
                None => device,
            }
        })
        .collect();

    run_correlated(name, &ctx.topology.gpus, discovered, |pair| {
        let label = pair.declared.label();
        let Some(expected) = pair.declared.module_id.as_deref() else {
            return DeviceRecord::new(label, Evaluation::skip("no module ID declared"));
        };
        let found = pair.discovered.module_id.as_deref().unwrap_or("none");
        let evaluation = if found.trim() == expected.trim() {
            Evaluation::pass()
        } else {
            Evaluation::fail(format!(
                "Mismatch for PCI {}: Expected GPU module ID {}, found {}",
                pair.pci, expected, found
            ))
        };
        DeviceRecord::new(label, evaluation)
    })
}

pub(super) fn row_remap(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    let name = CheckKind::RowRemapError.name();
    let (max_failures, min_driver) = match ctx.limit(CheckKind::RowRemapError) {
        Some(limit) if limit.is_object() => (
            limit
                .field_number("minimum-error")?
                .unwrap_or(defaults::ROW_REMAP_FAILURES),
            limit
                .field_number("minimum-nvidia-smi-version")?
                .map(|v| v as u32)
                .unwrap_or(defaults::ROW_REMAP_MIN_DRIVER),
        ),
        Some(limit) => (limit.number()?, defaults::ROW_REMAP_MIN_DRIVER),
        None => (defaults::ROW_REMAP_FAILURES, defaults::ROW_REMAP_MIN_DRIVER),
    };

    let version_text = match smi_output(ctx, &Probe::gpu_query(DRIVER_FIELDS)) {
        Ok(text) => text,
        Err(evaluation) => return Ok(CheckOutcome::single(name, "nvidia-smi", evaluation)),
    };
    let major = nvidia_smi::parse_query(version_text, 2)
        .first()
        .and_then(|row| nvidia_smi::driver_major(&row[1]));
    match major {
        None => {
            let evaluation = Evaluation::fail("could not determine nvidia-smi driver version");
            return Ok(CheckOutcome::single(name, "driver", evaluation));
        }
        Some(major) if major < min_driver => {
            let reason = format!("Not applicable for nvidia-smi driver {}", major);
            return Ok(CheckOutcome::skipped(name, reason));
        }
        Some(_) => {}
    }

    let text = match smi_output(ctx, &Probe::NvidiaSmiRemappedRows) {
        Ok(text) => text,
        Err(evaluation) => return Ok(CheckOutcome::single(name, "nvidia-smi", evaluation)),
    };
    let discovered = nvidia_smi::parse_query(text, 2)
        .into_iter()
        .map(|row| DiscoveredDevice::new(row[0].clone()).with_metric("remapped_rows.failure", row[1].as_str()))
        .collect();

    let spec = ThresholdSpec::NumericCeiling(max_failures);
    run_correlated(name, &ctx.topology.gpus, discovered, |pair| {
        let evaluation = match pair.discovered.metric("remapped_rows.failure") {
            Some(value) => evaluate(value, &spec),
            None => Evaluation::fail("remapped_rows.failure not reported"),
        };
        DeviceRecord::new(pair.declared.label(), evaluation)
    })
}

pub(super) fn sram(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    let name = CheckKind::SramError.name();
    let (uncorrectable, correctable) = match ctx.limit(CheckKind::SramError) {
        Some(limit) if limit.is_object() => (
            limit
                .field_number("uncorrectable")?
                .unwrap_or(defaults::SRAM_UNCORRECTABLE),
            limit
                .field_number("correctable")?
                .unwrap_or(defaults::SRAM_CORRECTABLE),
        ),
        Some(limit) => (limit.number()?, defaults::SRAM_CORRECTABLE),
        None => (defaults::SRAM_UNCORRECTABLE, defaults::SRAM_CORRECTABLE),
    };
    let spec = ThresholdSpec::Composite(vec![
        SubSpec::new("uncorrectable", ThresholdSpec::NumericCeiling(uncorrectable)),
        SubSpec::soft("correctable", ThresholdSpec::NumericCeiling(correctable)),
    ]);

    let text = match smi_output(ctx, &Probe::NvidiaSmiEcc) {
        Ok(text) => text,
        Err(evaluation) => return Ok(CheckOutcome::single(name, "nvidia-smi", evaluation)),
    };

    let discovered = nvidia_smi::parse_sram(text)
        .into_iter()
        .map(|counts| {
            let mut device = DiscoveredDevice::new(counts.pci);
            if let Some(n) = counts.uncorrectable {
                device = device.with_metric("uncorrectable", n);
            }
            if let Some(n) = counts.correctable {
                device = device.with_metric("correctable", n);
            }
            device
        })
        .collect();

    run_correlated(name, &ctx.topology.gpus, discovered, |pair| {
        let result = evaluate_metrics(&pair.discovered.metrics, &spec);
        DeviceRecord::from_metrics(pair.declared.label(), result.metrics)
    })
}

/// XID code table: code -> (description, critical)
fn xid_table(limit: Option<ThresholdValue<'_>>) -> Result<Vec<(String, String, bool)>> {
    let Some(limit) = limit else {
        return Ok(defaults::CRITICAL_XIDS
            .iter()
            .map(|(code, description)| (code.to_string(), description.to_string(), true))
            .collect());
    };

    let table = limit.field("xid_error_codes").unwrap_or(limit);
    let entries = table
        .raw()
        .as_object()
        .ok_or_else(|| limit.invalid("expected an object of XID codes"))?;

    entries
        .iter()
        .map(|(code, info)| {
            let info = ThresholdValue::new(CheckKind::GpuXid.name(), info);
            let description = info.field_string("description")?.unwrap_or_default();
            let severity = info.field_string("severity")?.unwrap_or_default();
            Ok((code.clone(), description, severity.eq_ignore_ascii_case("critical")))
        })
        .collect()
}

pub(super) fn xid(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    let name = CheckKind::GpuXid.name();
    let table = xid_table(ctx.limit(CheckKind::GpuXid))?;
    let spec = ThresholdSpec::BlockSet {
        blocked: table
            .iter()
            .filter(|(_, _, critical)| *critical)
            .map(|(code, _, _)| code.clone())
            .collect(),
        allowed: Vec::new(),
    };

    let text = match ctx.output(&Probe::Dmesg) {
        Ok(text) => text,
        Err(evaluation) => return Ok(CheckOutcome::single(name, "dmesg", evaluation)),
    };

    let scan = kernel_log::scan_xid(text);
    if scan.is_clean() {
        return Ok(CheckOutcome::single(
            name,
            "dmesg",
            Evaluation::pass_because("no XID errors found"),
        ));
    }

    let mut records: Vec<DeviceRecord> = scan
        .hits
        .iter()
        .map(|hit| {
            let description = table
                .iter()
                .find(|(code, _, _)| *code == hit.code)
                .map(|(_, description, _)| description.as_str())
                .unwrap_or("unrecognised XID");
            let verdict = evaluate(&MetricValue::from(hit.code.as_str()), &spec).verdict;
            let reason = format!(
                "{} on {} ({} occurrences)",
                description,
                hit.pcis.join(", "),
                hit.occurrences
            );
            DeviceRecord::new(format!("XID {}", hit.code), Evaluation::new(verdict, reason))
        })
        .collect();

    if scan.unrecognised > 0 {
        records.push(DeviceRecord::new(
            "XID",
            Evaluation::warn(format!("{} NVRM: Xid lines could not be read", scan.unrecognised)),
        ));
    }

    Ok(CheckOutcome::fold(name, records))
}

pub(super) fn nvlink(ctx: &CheckContext<'_>) -> Result<CheckOutcome> {
    let name = CheckKind::NvlinkSpeed.name();
    let limit = ctx.required_limit(CheckKind::NvlinkSpeed)?;
    let speed = limit
        .field_float("speed")?
        .ok_or_else(|| limit.invalid("missing 'speed'"))?;
    let count = limit
        .field_number("count")?
        .ok_or_else(|| limit.invalid("missing 'count'"))?;
    let spec = ThresholdSpec::Composite(vec![SubSpec::new("link_count", ThresholdSpec::count(count))]);

    let text = match smi_output(ctx, &Probe::NvidiaSmiNvlink) {
        Ok(text) => text,
        Err(evaluation) => return Ok(CheckOutcome::single(name, "nvidia-smi", evaluation)),
    };
    let gpus = match nvidia_smi::parse_nvlink(text) {
        Ok(gpus) => gpus,
        Err(reason) => return Ok(CheckOutcome::single(name, "nvidia-smi", Evaluation::fail(reason))),
    };

    let evaluate_gpu = |gpu: &nvidia_smi::NvlinkGpu| {
        let active = gpu.links_at_least(speed) as u64;
        let metrics: BTreeMap<String, MetricValue> =
            std::iter::once(("link_count".to_string(), MetricValue::from(active))).collect();
        let result = evaluate_metrics(&metrics, &spec);
        DeviceRecord::from_metrics(format!("GPU {}", gpu.index), result.metrics)
    };

    let declared: Vec<u32> = ctx.topology.gpus.iter().filter_map(|gpu| gpu.index).collect();
    if declared.is_empty() {
        // nothing to join on, every reported GPU is evaluated
        return Ok(CheckOutcome::fold(name, gpus.iter().map(evaluate_gpu).collect()));
    }

    // declared order; each reported GPU is claimed at most once
    let mut reported: Vec<Option<&nvidia_smi::NvlinkGpu>> = gpus.iter().map(Some).collect();
    let records = declared
        .iter()
        .map(|&index| {
            let found = reported
                .iter_mut()
                .find(|slot| matches!(slot, Some(gpu) if gpu.index == index))
                .and_then(Option::take);
            match found {
                Some(gpu) => evaluate_gpu(gpu),
                None => DeviceRecord::not_found(format!("GPU {}", index)),
            }
        })
        .collect();

    let mut outcome = CheckOutcome::fold(name, records);
    outcome.unexpected = reported
        .into_iter()
        .flatten()
        .map(|gpu| format!("GPU {}", gpu.index))
        .collect();
    Ok(outcome)
}
