//! Port-mapping correlation tests: device-name decoding, workload
//! cross-referencing and full-replacement snapshot semantics.

use std::collections::BTreeMap;

use chrono::Utc;
use switchyard_api::workloads::{
    self, mapping::build_port_mapping, WorkloadDevice,
};

const QM_LIST: &str = "\
      VMID NAME                 STATUS     MEM(MB)    BOOTDISK(GB) PID
       101 web-frontend         running    4096              32.00 1543
       107 ids-sensor           running    8192              64.00 1544
";

const PCT_LIST: &str = "\
VMID       Status     Lock         Name
106        running                 sliver-client
110        stopped                 scratchpad
";

const QM_CONFIG_107: &str = "\
boot: order=scsi0;net0
cores: 8
memory: 8192
net0: virtio=BC:24:11:62:54:3B,bridge=ovsbr0,firewall=1
net2: virtio=BC:24:11:0A:0B:0C,bridge=vmbr1
scsi0: local-lvm:vm-107-disk-0,size=64G
";

const PCT_CONFIG_106: &str = "\
arch: amd64
hostname: sliver-client
net0: name=eth0,bridge=ovsbr0,firewall=1,hwaddr=BC:24:11:1A:33:AB,ip=dhcp,type=veth
ostype: debian
rootfs: local-lvm:vm-106-disk-0,size=8G
";

#[test]
fn device_name_decoding_matches_the_convention() {
    assert_eq!(
        WorkloadDevice::parse("tap107i2"),
        Some(WorkloadDevice::Vm { vmid: 107, index: 2 })
    );
    assert_eq!(
        WorkloadDevice::parse("veth106i0"),
        Some(WorkloadDevice::Container { ctid: 106, index: 0 })
    );
    assert_eq!(WorkloadDevice::parse("eth0"), None);
}

fn fixture_mapping() -> switchyard_common::PortMapping {
    let mut vms = workloads::parse_vm_list(QM_LIST);
    for vm in &mut vms {
        if vm.vmid == 107 {
            vm.interfaces = workloads::parse_vm_interfaces(107, QM_CONFIG_107);
        }
    }
    let mut containers = workloads::parse_container_list(PCT_LIST);
    for container in &mut containers {
        if container.ctid == 106 {
            container.interfaces = workloads::parse_container_interfaces(106, PCT_CONFIG_106);
        }
    }

    let port_rows = vec![
        ("ovsbr0".to_string(), "u-br".to_string()),
        ("tap107i0".to_string(), "u-tap0".to_string()),
        ("tap107i2".to_string(), "u-tap2".to_string()),
        ("tap999i0".to_string(), "u-tap999".to_string()),
        ("veth106i0".to_string(), "u-veth".to_string()),
        ("veth-odd".to_string(), "u-odd".to_string()),
        ("eno1".to_string(), "u-eno".to_string()),
    ];

    let mut bridge_map = BTreeMap::new();
    for port in ["ovsbr0", "tap107i0", "tap999i0", "veth106i0", "veth-odd"] {
        bridge_map.insert(port.to_string(), "ovsbr0".to_string());
    }
    bridge_map.insert("tap107i2".to_string(), "vmbr1".to_string());

    let mut bridge_uuid_map = BTreeMap::new();
    bridge_uuid_map.insert("ovsbr0".to_string(), "bridge-uuid-0".to_string());

    build_port_mapping(
        "pve-lab",
        "198.51.100.7",
        &port_rows,
        &bridge_map,
        &bridge_uuid_map,
        &vms,
        &containers,
        Utc::now(),
    )
}

#[test]
fn vm_ports_correlate_with_config_interfaces() {
    let mapping = fixture_mapping();
    let record = |name: &str| {
        mapping
            .ports
            .iter()
            .find(|r| r.port_name == name)
            .unwrap()
    };

    let tap0 = record("tap107i0");
    assert_eq!(tap0.vm_id, Some(107));
    assert_eq!(tap0.vm_name.as_deref(), Some("ids-sensor"));
    assert_eq!(tap0.interface_index, Some(0));
    assert_eq!(tap0.interface_netid.as_deref(), Some("net0"));
    assert_eq!(tap0.interface_mac.as_deref(), Some("BC:24:11:62:54:3B"));
    assert_eq!(tap0.bridge_uuid.as_deref(), Some("bridge-uuid-0"));

    let tap2 = record("tap107i2");
    assert_eq!(tap2.interface_netid.as_deref(), Some("net2"));
    assert_eq!(tap2.interface_mac.as_deref(), Some("BC:24:11:0A:0B:0C"));
    assert_eq!(tap2.bridge_name.as_deref(), Some("vmbr1"));
}

#[test]
fn decodable_port_without_workload_keeps_index_derived_slot() {
    let mapping = fixture_mapping();
    let record = mapping
        .ports
        .iter()
        .find(|r| r.port_name == "tap999i0")
        .unwrap();

    assert_eq!(record.vm_id, None);
    assert_eq!(record.vm_name, None);
    assert_eq!(record.interface_netid.as_deref(), Some("net0"));
    assert_eq!(record.interface_mac, None);
}

#[test]
fn container_ports_correlate_exactly_and_by_bridge_fallback() {
    let mapping = fixture_mapping();
    let record = |name: &str| {
        mapping
            .ports
            .iter()
            .find(|r| r.port_name == name)
            .unwrap()
    };

    let exact = record("veth106i0");
    assert!(exact.is_container);
    assert_eq!(exact.container_id, Some(106));
    assert_eq!(exact.container_name.as_deref(), Some("sliver-client"));
    assert_eq!(exact.interface_mac.as_deref(), Some("BC:24:11:1A:33:AB"));

    // "veth-odd" does not decode; the first container on the same bridge
    // is accepted (best-effort heuristic)
    let fallback = record("veth-odd");
    assert!(fallback.is_container);
    assert_eq!(fallback.container_id, Some(106));
    assert!(fallback.interface_index.is_none());
}

#[test]
fn infrastructure_ports_carry_bridge_but_no_workload() {
    let mapping = fixture_mapping();
    for name in ["ovsbr0", "eno1"] {
        let record = mapping.ports.iter().find(|r| r.port_name == name).unwrap();
        assert!(record.vm_id.is_none());
        assert!(record.container_id.is_none());
        assert!(record.interface_netid.is_none());
    }
}

#[test]
fn snapshot_covers_every_port_exactly_once() {
    let mapping = fixture_mapping();
    assert_eq!(mapping.host_id, "pve-lab");
    assert_eq!(mapping.ports.len(), 7);

    let mut names: Vec<&str> = mapping.ports.iter().map(|r| r.port_name.as_str()).collect();
    let total = names.len();
    names.dedup();
    assert_eq!(names.len(), total);
}
