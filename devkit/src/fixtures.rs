/*!
Sample documents and utility outputs

`SHAPES` and `LIMITS` describe a two-GPU, two-NIC H100 node and a CPU-only
shape. `healthy_h100()` answers every probe the enabled checks need with
output from a node that passes all of them; tests override single probes
to introduce faults.
*/

use crate::probe_stub::ProbeStub;
use shapecheck_engine::checks::Probe;

pub const H100_SHAPE: &str = "BM.GPU.H100.8";
pub const CPU_SHAPE: &str = "BM.Standard.E5.192";

pub const SHAPES: &str = r#"{
    "version": "fixture",
    "hpc-shapes": [
        {
            "shape": "BM.GPU.H100.8",
            "gpu": [
                {"pci": "0000:0f:00.0", "model": "NVIDIA H100 80GB HBM3", "id": 0, "module_id": 2},
                {"pci": "0000:2d:00.0", "model": "NVIDIA H100 80GB HBM3", "id": 1, "module_id": 4}
            ],
            "vcn-nics": [],
            "rdma-nics": [
                {"pci": "0000:0c:00.0", "interface": "rdma0", "device_name": "mlx5_0", "model": "ConnectX-7", "gpu_pci": "0000:0f:00.0", "gpu_id": 0},
                {"pci": "0000:2a:00.0", "interface": "rdma1", "device_name": "mlx5_1", "model": "ConnectX-7", "gpu_pci": "0000:2d:00.0", "gpu_id": 1}
            ]
        },
        {"shape": "BM.Standard.E5.192", "gpu": false, "vcn-nics": [], "rdma-nics": []}
    ]
}"#;

pub const LIMITS: &str = r#"{
    "test_limits": {
        "BM.GPU.H100.8": {
            "gpu_count_check": {"enabled": true, "test_category": "LEVEL_1", "threshold": 2},
            "gpu_clk_check": {"enabled": true, "test_category": "LEVEL_1", "threshold": {"clock_speed": 1980}},
            "gpu_driver_check": {"enabled": true, "test_category": "LEVEL_1", "threshold": {
                "blacklisted_versions": ["470.57.02"],
                "supported_versions": ["535.104.12", "550.90.12"]
            }},
            "gpu_mode_check": {"enabled": true, "test_category": "LEVEL_1", "threshold": {"allowed_modes": ["N/A", "DISABLED"]}},
            "cdfp_cable_check": {"enabled": true, "test_category": "LEVEL_1"},
            "row_remap_error_check": {"enabled": true, "test_category": "LEVEL_1", "threshold": {"minimum-error": 0, "minimum-nvidia-smi-version": 550}},
            "sram_error_check": {"enabled": true, "test_category": "LEVEL_1", "threshold": {"uncorrectable": 5, "correctable": 1000}},
            "gpu_xid_check": {"enabled": true, "test_category": "LEVEL_1", "threshold": {"xid_error_codes": {
                "13": {"description": "Graphics Engine Exception", "severity": "Warn"},
                "79": {"description": "GPU has fallen off the bus", "severity": "Critical"}
            }}},
            "nvlink_speed_check": {"enabled": true, "test_category": "LEVEL_1", "threshold": {"speed": 26, "count": 2}},
            "peermem_module_check": {"enabled": true, "test_category": "LEVEL_1"},
            "fabricmanager_check": {"enabled": true, "test_category": "LEVEL_1"},
            "rdma_nics_count": {"enabled": true, "test_category": "LEVEL_1", "threshold": 2},
            "link_check": {"enabled": true, "test_category": "LEVEL_1", "threshold": {
                "speed": "200G",
                "effective_physical_errors": 0,
                "raw_physical_errors_per_lane": 10000,
                "effective_physical_ber": "1E-12",
                "raw_physical_ber": "1E-5"
            }},
            "eth_link_check": {"enabled": false, "test_category": "LEVEL_1", "threshold": {"speed": "100G", "width": "4x"}},
            "rx_discards_check": {"enabled": true, "test_category": "LEVEL_1", "threshold": 100},
            "gid_index_check": {"enabled": true, "test_category": "LEVEL_1", "threshold": [0, 1, 2, 3]},
            "auth_check": {"enabled": true, "test_category": "LEVEL_2"},
            "max_acc_check": {"enabled": true, "test_category": "LEVEL_2"},
            "pcie_error_check": {"enabled": true, "test_category": "LEVEL_1"},
            "pcie_width_missing_lanes_check": {"enabled": true, "test_category": "LEVEL_1", "threshold": {
                "gpu_widths": {"Width x16": 2},
                "gpu_speeds": {"Speed 32GT/s": 2},
                "rdma_widths": {"Width x16": 2},
                "rdma_speeds": {"Speed 32GT/s": 2}
            }},
            "missing_interface_check": {"enabled": true, "test_category": "LEVEL_1", "threshold": 0},
            "hca_error_check": {"enabled": true, "test_category": "LEVEL_1"},
            "eth0_presence_check": {"enabled": true, "test_category": "LEVEL_1"},
            "legacy_custom_check": {"enabled": true, "test_category": "LEVEL_3"}
        },
        "BM.Standard.E5.192": {
            "gpu_count_check": {"enabled": true, "test_category": "LEVEL_1", "threshold": 0},
            "eth0_presence_check": {"enabled": true, "test_category": "LEVEL_1"}
        }
    }
}"#;

pub const GPU_NAMES: &str = "\
00000000:0F:00.0, NVIDIA H100 80GB HBM3
00000000:2D:00.0, NVIDIA H100 80GB HBM3
";

pub const GPU_CLOCKS: &str = "\
00000000:0F:00.0, 0, 1980
00000000:2D:00.0, 1, 1980
";

pub const GPU_DRIVERS: &str = "\
00000000:0F:00.0, 550.90.12
00000000:2D:00.0, 550.90.12
";

pub const GPU_MODES: &str = "\
00000000:0F:00.0, 0, N/A
00000000:2D:00.0, 1, Disabled
";

pub const SMI_DETAILED: &str = "\
==============NVSMI LOG==============

Driver Version                            : 550.90.12
Attached GPUs                             : 2

GPU 00000000:0F:00.0
    Product Name                          : NVIDIA H100 80GB HBM3
    Module ID                             : 2
    PCI
        Bus                               : 0x0F
        Bus Id                            : 00000000:0F:00.0

GPU 00000000:2D:00.0
    Product Name                          : NVIDIA H100 80GB HBM3
    Module ID                             : 4
    PCI
        Bus                               : 0x2D
        Bus Id                            : 00000000:2D:00.0
";

pub const REMAPPED_ROWS: &str = "\
00000000:0F:00.0, 0
00000000:2D:00.0, 0
";

pub const SMI_ECC: &str = "\
GPU 00000000:0F:00.0
    ECC Errors
        Volatile
            SRAM Correctable              : 0
            SRAM Uncorrectable Parity     : 0
            SRAM Uncorrectable SEC-DED    : 0
        Aggregate
            SRAM Correctable              : 3
            SRAM Uncorrectable Parity     : 0
            SRAM Uncorrectable SEC-DED    : 0
GPU 00000000:2D:00.0
    ECC Errors
        Aggregate
            SRAM Correctable              : 0
            SRAM Uncorrectable Parity     : 0
            SRAM Uncorrectable SEC-DED    : 0
";

pub const NVLINK: &str = "\
GPU 0: NVIDIA H100 80GB HBM3 (UUID: GPU-2a4f0c1e)
\t Link 0: 26.562 GB/s
\t Link 1: 26.562 GB/s
GPU 1: NVIDIA H100 80GB HBM3 (UUID: GPU-7b81d3f2)
\t Link 0: 26.562 GB/s
\t Link 1: 26.562 GB/s
";

pub const DMESG: &str = "\
[    0.000000] Linux version 5.15.0-1042-oracle
[    1.204311] pcieport 0000:00:01.1: AER: enabled with IRQ 26
[    9.118020] nvidia-nvlink: Nvlink Core is being initialized
";

pub const DMESG_HUMAN: &str = "\
[Mon Oct 19 10:00:01 2026] mlx5_core 0000:0c:00.0: firmware version: 28.39.1002
[Mon Oct 19 10:00:02 2026] mlx5_core 0000:2a:00.0: firmware version: 28.39.1002
";

pub const LSMOD: &str = "\
Module                  Size  Used by
nvidia_peermem         16384  0
nvidia               56893440  1 nvidia_peermem
";

pub const FABRIC_MANAGER: &str = "\
● nvidia-fabricmanager.service - NVIDIA fabric manager service
     Loaded: loaded (/lib/systemd/system/nvidia-fabricmanager.service; enabled)
     Active: active (running) since Mon 2026-10-19 10:00:05 UTC
";

pub const LSPCI: &str = "\
00:00.0 Host bridge: Intel Corporation Device 1bfe (rev 11)
0c:00.0 Ethernet controller: Mellanox Technologies MT2910 Family [ConnectX-7]
0f:00.0 3D controller: NVIDIA Corporation GH100 [H100 SXM5 80GB] (rev a1)
2a:00.0 Ethernet controller: Mellanox Technologies MT2910 Family [ConnectX-7]
2d:00.0 3D controller: NVIDIA Corporation GH100 [H100 SXM5 80GB] (rev a1)
";

pub const LSPCI_VERBOSE: &str = "\
0c:00.0 Ethernet controller: Mellanox Technologies MT2910 Family [ConnectX-7]
\t\tLnkCap:\tPort #0, Speed 32GT/s, Width x16
\t\tLnkSta:\tSpeed 32GT/s (ok), Width x16 (ok)
0f:00.0 3D controller: NVIDIA Corporation GH100 [H100 SXM5 80GB] (rev a1)
\t\tLnkSta:\tSpeed 32GT/s, Width x16
2a:00.0 Ethernet controller: Mellanox Technologies MT2910 Family [ConnectX-7]
\t\tLnkSta:\tSpeed 32GT/s (ok), Width x16 (ok)
2d:00.0 3D controller: NVIDIA Corporation GH100 [H100 SXM5 80GB] (rev a1)
\t\tLnkSta:\tSpeed 32GT/s, Width x16
";

pub const IBDEV2NETDEV: &str = "\
mlx5_0 port 1 ==> rdma0 (Up)
mlx5_1 port 1 ==> rdma1 (Up)
";

pub const SHOW_GIDS: &str = "\
DEV\tPORT\tINDEX\tGID\t\t\t\t\tIPv4  \t\tVER\tDEV
---\t----\t-----\t---\t\t\t\t\t------------  \t---\t---
mlx5_0\t1\t0\tfe80:0000:0000:0000:0a9e:f3ff:fe01:0001\t\t\tv1\trdma0
mlx5_0\t1\t1\tfe80:0000:0000:0000:0a9e:f3ff:fe01:0001\t\t\tv2\trdma0
mlx5_0\t1\t2\t0000:0000:0000:0000:0000:ffff:c0a8:0105\t192.168.1.5  \tv1\trdma0
mlx5_0\t1\t3\t0000:0000:0000:0000:0000:ffff:c0a8:0105\t192.168.1.5  \tv2\trdma0
n_gids_found=4
";

pub const IP_ADDR: &str = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN group default qlen 1000
    inet 127.0.0.1/8 scope host lo
2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 9000 qdisc mq state UP group default qlen 1000
    inet 10.0.0.5/24 brd 10.0.0.255 scope global eth0
";

/// `mlxlink --json` output of a healthy 200G port
pub fn mlxlink_report(speed: &str, effective_ber: &str, lanes: [&str; 4]) -> String {
    format!(
        r#"{{"result": {{"output": {{
    "Operational Info": {{"State": "Active", "Physical state": "LinkUp", "Speed": "{speed}", "Width": "4x", "FEC": "Standard_RS-FEC - (544,514)"}},
    "Troubleshooting Info": {{"Status Opcode": "0", "Group Opcode": "N/A", "Recommendation": "No issue was observed"}},
    "Physical Counters and BER Info": {{
        "Time Since Last Clear [Min]": "3052.5",
        "Effective Physical Errors": "0",
        "Effective Physical BER": "{effective_ber}",
        "Raw Physical BER": "1E-8",
        "Raw Physical Errors Per Lane": ["{}", "{}", "{}", "{}"]
    }}
}}}}, "status": {{"code": 0, "message": "Success"}}}}"#,
        lanes[0], lanes[1], lanes[2], lanes[3]
    )
}

pub fn ethtool_stats(discards: u64) -> String {
    format!(
        "NIC statistics:\n     rx_packets: 881632\n     rx_prio0_discards: 0\n     rx_prio3_discards: {}\n",
        discards
    )
}

pub fn mlxconfig_query(max_acc_out_read: &str, advanced: &str) -> String {
    format!(
        "Device #1:\n----------\n\nDevice type:    ConnectX7\n\nConfigurations:                                      Next Boot\n         MAX_ACC_OUT_READ                            {}\n         ADVANCED_PCI_SETTINGS                       {}\n",
        max_acc_out_read, advanced
    )
}

pub fn lspci_device(pci: &str) -> String {
    format!(
        "{} Ethernet controller: Mellanox Technologies MT2910 Family [ConnectX-7]\n\tSubsystem: Mellanox Technologies Device 0023\n\tKernel driver in use: mlx5_core\n",
        pci.trim_start_matches("0000:")
    )
}

/// Every probe the H100 limits need, answered as a healthy node would
pub fn healthy_h100() -> ProbeStub {
    let mut stub = ProbeStub::new()
        .with_output(Probe::gpu_query("pci.bus_id,name"), GPU_NAMES)
        .with_output(Probe::gpu_query("pci.bus_id,index,clocks.current.graphics"), GPU_CLOCKS)
        .with_output(Probe::gpu_query("pci.bus_id,driver_version"), GPU_DRIVERS)
        .with_output(Probe::gpu_query("pci.bus_id,index,mig.mode.current"), GPU_MODES)
        .with_output(Probe::NvidiaSmiDetailed, SMI_DETAILED)
        .with_output(Probe::NvidiaSmiRemappedRows, REMAPPED_ROWS)
        .with_output(Probe::NvidiaSmiEcc, SMI_ECC)
        .with_output(Probe::NvidiaSmiNvlink, NVLINK)
        .with_output(Probe::Dmesg, DMESG)
        .with_output(Probe::DmesgHuman, DMESG_HUMAN)
        .with_output(Probe::Lsmod, LSMOD)
        .with_output(Probe::FabricManagerStatus, FABRIC_MANAGER)
        .with_output(Probe::Lspci, LSPCI)
        .with_output(Probe::LspciVerbose, LSPCI_VERBOSE)
        .with_output(Probe::Ibdev2netdev, IBDEV2NETDEV)
        .with_output(Probe::ShowGids, SHOW_GIDS)
        .with_output(Probe::IpAddr, IP_ADDR);

    for (pci, device, interface) in [
        ("0000:0c:00.0", "mlx5_0", "rdma0"),
        ("0000:2a:00.0", "mlx5_1", "rdma1"),
    ] {
        stub = stub
            .with_output(Probe::LspciDevice(pci.into()), lspci_device(pci))
            .with_output(Probe::Mlxconfig(pci.into()), mlxconfig_query("44", "True(1)"))
            .with_output(Probe::Mlxlink(device.into()), mlxlink_report("200G", "15E-255", ["0", "0", "0", "0"]))
            .with_output(Probe::Ethtool(interface.into()), ethtool_stats(0))
            .with_output(
                Probe::WpaCli(interface.into()),
                "Supplicant PAE state=AUTHENTICATED\nsuppPortStatus=Authorized\nEAP state=SUCCESS\n",
            );
    }

    stub
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapecheck_engine::parsers::mlxlink;
    use shapecheck_engine::{ShapesDocument, TestLimits};

    #[test]
    fn test_documents_parse() {
        let shapes = ShapesDocument::from_json(SHAPES).unwrap();
        assert_eq!(shapes.topology(H100_SHAPE).unwrap().gpus.len(), 2);
        assert!(!shapes.topology(CPU_SHAPE).unwrap().has_gpus());
        assert!(TestLimits::from_json(LIMITS).unwrap().has_shape(H100_SHAPE));
    }

    #[test]
    fn test_mlxlink_report_parses() {
        let report = mlxlink::parse(&mlxlink_report("200G", "15E-255", ["0", "1", "2", "undefined"])).unwrap();
        assert_eq!(report.speed, "200G");
        assert_eq!(report.raw_errors_per_lane, vec![0, 1, 2]);
    }
}
