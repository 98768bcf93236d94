///! Hypervisor workload listings and device-name decoding
///!
///! VMs and containers are discovered through the host's own tools
///! (`qm list` / `pct list`) and their per-workload network configuration
///! (`qm config` / `pct config`). The host names each backing device by
///! convention: `tap<vmid>i<index>` for VM NICs, `veth<ctid>i<index>` for
///! container NICs. Decoding that convention is what lets a switch port be
///! tied back to the workload behind it.

pub mod mapping;

use std::sync::LazyLock;

use regex::Regex;
use switchyard_common::{Container, Vm, WorkloadInterface, WorkloadStatus};

static TAP_DEVICE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^tap(\d+)i(\d+)$").unwrap());

static VETH_DEVICE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^veth(\d+)i(\d+)$").unwrap());

static MAC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Fa-f:]{17}$").unwrap());

/// A host-side network device decoded from its conventional name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadDevice {
    Vm { vmid: u32, index: u32 },
    Container { ctid: u32, index: u32 },
}

impl WorkloadDevice {
    /// Decode `tap<id>i<idx>` / `veth<id>i<idx>`. Anything else is an
    /// infrastructure port with no workload behind it.
    pub fn parse(name: &str) -> Option<Self> {
        if let Some(caps) = TAP_DEVICE_REGEX.captures(name) {
            return Some(WorkloadDevice::Vm {
                vmid: caps[1].parse().ok()?,
                index: caps[2].parse().ok()?,
            });
        }
        if let Some(caps) = VETH_DEVICE_REGEX.captures(name) {
            return Some(WorkloadDevice::Container {
                ctid: caps[1].parse().ok()?,
                index: caps[2].parse().ok()?,
            });
        }
        None
    }
}

/// Numeric slot of a `netN` identifier.
pub fn netid_index(netid: &str) -> Option<u32> {
    netid.strip_prefix("net").and_then(|n| n.parse().ok())
}

/// Parse `qm list` output. The header row is skipped; rows that do not
/// start with a numeric VMID are ignored.
pub fn parse_vm_list(output: &str) -> Vec<Vm> {
    let mut vms = Vec::new();
    for line in output.trim().lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }
        let Ok(vmid) = parts[0].parse::<u32>() else {
            continue;
        };
        let status = parts
            .get(2)
            .map(|s| s.parse::<WorkloadStatus>().unwrap_or_default())
            .unwrap_or_default();
        vms.push(Vm {
            vmid,
            name: parts[1].to_string(),
            status,
            interfaces: Vec::new(),
        });
    }
    vms
}

/// Parse `pct list` output. Columns are `CTID Status Lock Name`; the lock
/// column may be empty or `-`, so the name is whatever non-dash tokens
/// remain after the status. Containers with no printable name fall back to
/// `CT<id>`.
pub fn parse_container_list(output: &str) -> Vec<Container> {
    let mut containers = Vec::new();
    for line in output.trim().lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }
        let Ok(ctid) = parts[0].parse::<u32>() else {
            continue;
        };
        let status = parts[1].parse::<WorkloadStatus>().unwrap_or_default();

        let name_parts: Vec<&str> = parts[2..]
            .iter()
            .copied()
            .filter(|part| *part != "-" && !part.is_empty())
            .collect();
        let name = if name_parts.is_empty() {
            format!("CT{}", ctid)
        } else {
            name_parts.join(" ")
        };

        containers.push(Container {
            ctid,
            name,
            status,
            interfaces: Vec::new(),
        });
    }
    containers
}

/// One candidate pattern for a `netN:` configuration line. Applied in
/// order, first pattern with any match wins for the whole document.
struct NetLinePattern {
    regex: Regex,
    /// Whether capture group 2 is a MAC (group 3 then holds the bridge)
    mac_group: bool,
}

static VM_NET_PATTERNS: LazyLock<Vec<NetLinePattern>> = LazyLock::new(|| {
    vec![
        // model=MAC,bridge=xxx in any order; bridge is all we require
        NetLinePattern {
            regex: Regex::new(r"(?im)^net(\d+):\s+.*?bridge=([^,\s]+)").unwrap(),
            mac_group: false,
        },
        // strict model=MAC immediately followed by the bridge
        NetLinePattern {
            regex: Regex::new(r"(?im)^net(\d+):\s+\w+=([0-9A-F:]{17}),bridge=([^,\s]+)").unwrap(),
            mac_group: true,
        },
        // explicit mac= somewhere before the bridge
        NetLinePattern {
            regex: Regex::new(r"(?im)^net(\d+):\s+[^,]*mac=([0-9A-F:]{17})[^,]*bridge=([^,\s]+)")
                .unwrap(),
            mac_group: true,
        },
    ]
});

/// Parse VM NICs from `qm config` output.
/// Line shape: `net0: virtio=BC:24:11:1A:33:AB,bridge=vmbr0,firewall=1`.
pub fn parse_vm_interfaces(vmid: u32, output: &str) -> Vec<WorkloadInterface> {
    let mut interfaces: Vec<WorkloadInterface> = Vec::new();

    for pattern in VM_NET_PATTERNS.iter() {
        let mut matched = false;
        for caps in pattern.regex.captures_iter(output) {
            matched = true;
            let netid = &caps[1];
            let (mut mac, bridge) = if pattern.mac_group {
                (caps[2].to_string(), caps[3].to_string())
            } else {
                (String::new(), caps[2].to_string())
            };

            if !MAC_REGEX.is_match(&mac) {
                mac = backfill_mac(netid, output).unwrap_or_default();
            }

            let device = format!("tap{}i{}", vmid, netid);
            if interfaces.iter().any(|iface| iface.device == device) {
                continue;
            }
            interfaces.push(WorkloadInterface {
                netid: format!("net{}", netid),
                device,
                mac,
                bridge: Some(bridge),
            });
        }
        if matched {
            break;
        }
    }

    interfaces
}

/// Recover a MAC from the `netN:` line when the matched pattern did not
/// capture one (`virtio=`, `e1000=`, `mac=` and friends all carry it).
fn backfill_mac(netid: &str, output: &str) -> Option<String> {
    let pattern = format!(r"(?im)^net{}:[^\n]*?[a-z][a-z0-9]*=([0-9A-F:]{{17}})", netid);
    let regex = Regex::new(&pattern).ok()?;
    regex
        .captures(output)
        .map(|caps| caps[1].to_string())
        .filter(|mac| MAC_REGEX.is_match(mac))
}

static CT_NET_PATTERNS: LazyLock<Vec<NetLinePattern>> = LazyLock::new(|| {
    vec![
        // name=eth0,bridge=vmbr0[,hwaddr=...]
        NetLinePattern {
            regex: Regex::new(r"(?im)^net(\d+):\s+name=[^,]+,bridge=([^,\s]+)").unwrap(),
            mac_group: false,
        },
        // bridge first
        NetLinePattern {
            regex: Regex::new(r"(?im)^net(\d+):\s+bridge=([^,\s]+)").unwrap(),
            mac_group: false,
        },
        // anything followed by the bridge
        NetLinePattern {
            regex: Regex::new(r"(?im)^net(\d+):\s+[^,]+,bridge=([^,\s]+)").unwrap(),
            mac_group: false,
        },
    ]
});

/// Parse container NICs from `pct config` output.
/// Line shape: `net0: name=eth0,bridge=vmbr0,firewall=1,hwaddr=BC:24:11:1A:33:AB`.
pub fn parse_container_interfaces(ctid: u32, output: &str) -> Vec<WorkloadInterface> {
    let mut interfaces: Vec<WorkloadInterface> = Vec::new();

    for pattern in CT_NET_PATTERNS.iter() {
        let mut matched = false;
        for caps in pattern.regex.captures_iter(output) {
            matched = true;
            let netid = &caps[1];
            let bridge = caps[2].to_string();
            let mac = backfill_hwaddr(netid, output).unwrap_or_default();

            let slot = format!("net{}", netid);
            if interfaces.iter().any(|iface| iface.netid == slot) {
                continue;
            }
            interfaces.push(WorkloadInterface {
                netid: slot,
                device: format!("veth{}i{}", ctid, netid),
                mac,
                bridge: Some(bridge),
            });
        }
        if matched {
            break;
        }
    }

    interfaces
}

/// `hwaddr=` can sit anywhere on the line, typically after `firewall=`.
fn backfill_hwaddr(netid: &str, output: &str) -> Option<String> {
    let pattern = format!(r"(?im)^net{}:[^\n]*?hwaddr=([0-9A-F:]{{17}})", netid);
    let regex = Regex::new(&pattern).ok()?;
    regex
        .captures(output)
        .map(|caps| caps[1].to_string())
        .filter(|mac| MAC_REGEX.is_match(mac))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_tap_device() {
        assert_eq!(
            WorkloadDevice::parse("tap107i2"),
            Some(WorkloadDevice::Vm { vmid: 107, index: 2 })
        );
    }

    #[test]
    fn test_decode_veth_device() {
        assert_eq!(
            WorkloadDevice::parse("veth106i0"),
            Some(WorkloadDevice::Container { ctid: 106, index: 0 })
        );
    }

    #[test]
    fn test_decode_infrastructure_port() {
        assert_eq!(WorkloadDevice::parse("eth0"), None);
        assert_eq!(WorkloadDevice::parse("vmbr0"), None);
        // prefix alone is not enough, the full convention must match
        assert_eq!(WorkloadDevice::parse("tapXiY"), None);
        assert_eq!(WorkloadDevice::parse("veth-custom"), None);
    }

    #[test]
    fn test_parse_vm_list() {
        let output = "\
      VMID NAME                 STATUS     MEM(MB)    BOOTDISK(GB) PID
       101 web-frontend         running    4096              32.00 1234
       107 build-agent          stopped    8192              64.00 0
";
        let vms = parse_vm_list(output);
        assert_eq!(vms.len(), 2);
        assert_eq!(vms[0].vmid, 101);
        assert_eq!(vms[0].name, "web-frontend");
        assert_eq!(vms[0].status, WorkloadStatus::Running);
        assert_eq!(vms[1].status, WorkloadStatus::Stopped);
    }

    #[test]
    fn test_parse_container_list_with_lock_column() {
        let output = "\
VMID       Status     Lock         Name
106        running                 sliver-client
108        stopped    backup       db-replica
";
        let containers = parse_container_list(output);
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].ctid, 106);
        assert_eq!(containers[0].name, "sliver-client");
        // lock token is part of the row; only non-dash trailing tokens
        // count as the name, so "backup db-replica" collapses into it
        assert_eq!(containers[1].name, "backup db-replica");
    }

    #[test]
    fn test_parse_container_list_nameless_falls_back() {
        let output = "VMID       Status     Lock         Name\n109        stopped    -\n";
        let containers = parse_container_list(output);
        assert_eq!(containers[0].name, "CT109");
    }

    #[test]
    fn test_parse_vm_interfaces() {
        let output = "\
boot: order=scsi0;net0
cores: 4
net0: virtio=BC:24:11:1A:33:AB,bridge=vmbr0,firewall=1
net1: e1000=BC:24:11:22:33:44,bridge=ovsbr2
scsi0: local-lvm:vm-101-disk-0,size=32G
";
        let interfaces = parse_vm_interfaces(101, output);
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0].netid, "net0");
        assert_eq!(interfaces[0].device, "tap101i0");
        assert_eq!(interfaces[0].mac, "BC:24:11:1A:33:AB");
        assert_eq!(interfaces[0].bridge.as_deref(), Some("vmbr0"));
        assert_eq!(interfaces[1].device, "tap101i1");
        assert_eq!(interfaces[1].bridge.as_deref(), Some("ovsbr2"));
    }

    #[test]
    fn test_parse_vm_interfaces_backfills_mac() {
        // first pattern captures only the bridge; the MAC is recovered from
        // the same line afterwards
        let output = "net2: bridge=vmbr1,virtio=AA:BB:CC:DD:EE:FF,firewall=1\n";
        let interfaces = parse_vm_interfaces(200, output);
        assert_eq!(interfaces.len(), 1);
        assert_eq!(interfaces[0].mac, "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_parse_vm_interfaces_empty_config() {
        assert!(parse_vm_interfaces(101, "cores: 2\nmemory: 2048\n").is_empty());
    }

    #[test]
    fn test_parse_container_interfaces() {
        let output = "\
arch: amd64
hostname: sliver-client
net0: name=eth0,bridge=ovsbr0,firewall=1,hwaddr=BC:24:11:1A:33:AB,ip=dhcp,type=veth
net1: name=eth1,bridge=vmbr1
ostype: debian
";
        let interfaces = parse_container_interfaces(106, output);
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0].netid, "net0");
        assert_eq!(interfaces[0].device, "veth106i0");
        assert_eq!(interfaces[0].mac, "BC:24:11:1A:33:AB");
        assert_eq!(interfaces[0].bridge.as_deref(), Some("ovsbr0"));
        assert_eq!(interfaces[1].mac, "");
    }

    #[test]
    fn test_parse_container_interfaces_no_duplicates() {
        let output = "net0: name=eth0,bridge=vmbr0\nnet0: name=eth0,bridge=vmbr0\n";
        let interfaces = parse_container_interfaces(106, output);
        assert_eq!(interfaces.len(), 1);
    }

    #[test]
    fn test_netid_index() {
        assert_eq!(netid_index("net0"), Some(0));
        assert_eq!(netid_index("net12"), Some(12));
        assert_eq!(netid_index("eth0"), None);
    }
}
