//! Whole-node runs: fixture documents on disk, probes from the stub

use shapecheck_devkit::{fixtures, ProbeStub, TestHarness};
use shapecheck_engine::checks::Probe;
use shapecheck_engine::{CheckOutcome, FallbackPolicy, Verdict};

fn outcome<'a>(outcomes: &'a [CheckOutcome], check: &str) -> &'a CheckOutcome {
    outcomes
        .iter()
        .find(|o| o.check == check)
        .unwrap_or_else(|| panic!("{} did not run", check))
}

fn run_h100(harness: &TestHarness, stub: &ProbeStub) -> Vec<CheckOutcome> {
    harness
        .run_checks(fixtures::H100_SHAPE, stub, FallbackPolicy::Strict)
        .unwrap()
}

#[test]
fn test_healthy_node_passes_every_check() {
    let harness = TestHarness::with_fixtures().unwrap();
    let outcomes = run_h100(&harness, &fixtures::healthy_h100());

    assert_eq!(outcomes.len(), 22);
    for outcome in &outcomes {
        assert_eq!(outcome.verdict, Verdict::Pass, "{}: {}", outcome.check, outcome.reason);
    }
    assert!(outcomes.iter().all(|o| o.check != "eth_link_check"));
}

#[test]
fn test_missing_gpu_fails_count() {
    let harness = TestHarness::with_fixtures().unwrap();
    let stub = fixtures::healthy_h100().with_output(
        Probe::gpu_query("pci.bus_id,name"),
        "00000000:0F:00.0, NVIDIA H100 80GB HBM3\n",
    );
    let outcomes = run_h100(&harness, &stub);

    let count = outcome(&outcomes, "gpu_count_check");
    assert_eq!(count.verdict, Verdict::Fail);
    assert!(count.reason.contains("0000:2d:00.0: device not found"), "{}", count.reason);
    assert!(count.reason.contains("expected 2, got 1"), "{}", count.reason);
    assert_eq!(outcome(&outcomes, "gpu_clk_check").verdict, Verdict::Pass);
}

#[test]
fn test_module_id_mismatch() {
    let harness = TestHarness::with_fixtures().unwrap();
    // only the second GPU's module line ends in ": 4"
    let detailed = fixtures::SMI_DETAILED.replace(": 4\n", ": 6\n");
    let stub = fixtures::healthy_h100().with_output(Probe::NvidiaSmiDetailed, detailed);
    let outcomes = run_h100(&harness, &stub);

    let cdfp = outcome(&outcomes, "cdfp_cable_check");
    assert_eq!(cdfp.verdict, Verdict::Fail);
    assert!(cdfp.reason.contains("Expected GPU module ID 4, found 6"), "{}", cdfp.reason);
    assert_eq!(cdfp.failing_devices(), vec!["0000:2d:00.0"]);
}

#[test]
fn test_strict_and_builtin_policies() {
    let harness = TestHarness::with_fixtures().unwrap();
    harness
        .edit_limits(|doc| {
            if let Some(check) = doc["test_limits"][fixtures::H100_SHAPE]["gid_index_check"].as_object_mut() {
                check.remove("threshold");
            }
        })
        .unwrap();
    let stub = fixtures::healthy_h100();

    let strict = run_h100(&harness, &stub);
    let gid = outcome(&strict, "gid_index_check");
    assert!(gid.config_error);
    assert_eq!(gid.verdict, Verdict::Fail);
    assert!(gid.reason.contains("has no threshold configured"), "{}", gid.reason);

    let builtin = harness
        .run_checks(fixtures::H100_SHAPE, &stub, FallbackPolicy::BuiltIn)
        .unwrap();
    let gid = outcome(&builtin, "gid_index_check");
    assert!(!gid.config_error);
    assert_eq!(gid.verdict, Verdict::Pass);
}

#[test]
fn test_mlxlink_failure_on_one_port() {
    let harness = TestHarness::with_fixtures().unwrap();
    let stub = fixtures::healthy_h100().with_failure(Probe::Mlxlink("mlx5_1".into()), "mlxlink: command not found");
    let outcomes = run_h100(&harness, &stub);

    let link = outcome(&outcomes, "link_check");
    assert_eq!(link.verdict, Verdict::Fail);
    assert_eq!(link.failing_devices(), vec!["mlx5_1 (rdma1)"]);
    assert!(link.reason.contains("command not found"), "{}", link.reason);
}

#[test]
fn test_lane_errors_only_warn() {
    let harness = TestHarness::with_fixtures().unwrap();
    let stub = fixtures::healthy_h100().with_output(
        Probe::Mlxlink("mlx5_0".into()),
        fixtures::mlxlink_report("200G", "15E-255", ["0", "25000", "0", "0"]),
    );
    let outcomes = run_h100(&harness, &stub);

    let link = outcome(&outcomes, "link_check");
    assert_eq!(link.verdict, Verdict::Warn);
    assert!(link.reason.contains("0 25000 0 0"), "{}", link.reason);
}

#[test]
fn test_interfaces_resolved_once() {
    let harness = TestHarness::with_fixtures().unwrap();
    let stub = fixtures::healthy_h100();
    run_h100(&harness, &stub);

    assert_eq!(stub.calls_for(&Probe::Ibdev2netdev), 1);
    assert_eq!(stub.calls_for(&Probe::Dmesg), 1);
    assert_eq!(stub.calls_for(&Probe::Ethtool("rdma1".into())), 1);
}

#[test]
fn test_cpu_shape_skips_gpu_checks() {
    let harness = TestHarness::with_fixtures().unwrap();
    let stub = ProbeStub::new().with_output(Probe::IpAddr, fixtures::IP_ADDR);
    let outcomes = harness
        .run_checks(fixtures::CPU_SHAPE, &stub, FallbackPolicy::Strict)
        .unwrap();

    assert_eq!(outcome(&outcomes, "gpu_count_check").verdict, Verdict::Skip);
    assert_eq!(outcome(&outcomes, "eth0_presence_check").verdict, Verdict::Pass);
    assert_eq!(stub.calls_for(&Probe::IpAddr), 1);
    assert_eq!(stub.calls_for(&Probe::Lspci), 0);
}

#[test]
fn test_unknown_shape_is_an_error() {
    let harness = TestHarness::with_fixtures().unwrap();
    let err = harness
        .run_checks("BM.GPU.Unknown", &fixtures::healthy_h100(), FallbackPolicy::Strict)
        .unwrap_err();
    assert!(err.to_string().contains("BM.GPU.Unknown"));
}
