//! Common types shared between switchyard-api and external integrations

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection record for a managed hypervisor host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub name: String,
    pub hostname: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub ssh_key_path: Option<String>,
    pub password: Option<String>,
    pub description: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

/// Derived type of a switch port, inferred from its primary interface
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    System,    // Physical or otherwise unmanaged device
    Internal,  // Internal port
    Tap,       // VM-backed tap device
    Veth,      // Container-backed veth device
    Patch,     // Patch port connecting two bridges
    Vxlan,     // VXLAN tunnel
    Gre,       // GRE tunnel
    Geneve,    // Geneve tunnel
    Unknown,
}

impl PortKind {
    /// Map the switch's `type` column to a kind. An empty type string means
    /// the switch left it unset; the device name decides instead.
    pub fn from_ovs_type(ovs_type: &str, name: &str) -> Self {
        match ovs_type {
            "" => Self::from_interface_name(name),
            "system" => PortKind::System,
            "internal" => PortKind::Internal,
            "tap" => PortKind::Tap,
            "veth" => PortKind::Veth,
            "patch" => PortKind::Patch,
            "vxlan" => PortKind::Vxlan,
            "gre" => PortKind::Gre,
            "geneve" => PortKind::Geneve,
            _ => PortKind::Unknown,
        }
    }

    /// Name-derived fallback: `tap*` and `veth*` devices are recognizable by
    /// convention, everything else is treated as a system device.
    pub fn from_interface_name(name: &str) -> Self {
        if name.starts_with("tap") {
            PortKind::Tap
        } else if name.starts_with("veth") {
            PortKind::Veth
        } else {
            PortKind::System
        }
    }
}

impl std::fmt::Display for PortKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PortKind::System => "system",
            PortKind::Internal => "internal",
            PortKind::Tap => "tap",
            PortKind::Veth => "veth",
            PortKind::Patch => "patch",
            PortKind::Vxlan => "vxlan",
            PortKind::Gre => "gre",
            PortKind::Geneve => "geneve",
            PortKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Interface as it appears inside a port in `ovs-vsctl show` output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterfaceStub {
    pub name: String,
    pub kind: PortKind,
}

/// Attachment point on a bridge; more than one interface means a bond
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub uuid: String,
    pub name: String,
    pub bridge: Option<String>,
    pub kind: PortKind,
    pub interfaces: Vec<InterfaceStub>,
}

/// Traffic-copy rule on a bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mirror {
    pub uuid: String,
    pub name: Option<String>,
    /// Owning bridge, or "unknown" when neither resolution tier matched
    pub bridge: String,
    pub select_src_ports: Vec<String>,
    pub select_all: bool,
    pub output_port: Option<String>,
    pub output_vlan: Option<u16>,
}

/// Virtual switch instance on a host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bridge {
    /// Assigned by the switch; empty until resolved
    pub uuid: String,
    pub name: String,
    pub ports: Vec<Port>,
    pub mirrors: Vec<Mirror>,
    /// Administratively configured subnet from the interfaces file
    pub cidr: Option<String>,
    pub comment: Option<String>,
}

/// Workload run state as reported by the hypervisor tools
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadStatus {
    Running,
    Stopped,
    Paused,
    #[default]
    Unknown,
}

impl std::str::FromStr for WorkloadStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "running" => WorkloadStatus::Running,
            "stopped" => WorkloadStatus::Stopped,
            "paused" => WorkloadStatus::Paused,
            _ => WorkloadStatus::Unknown,
        })
    }
}

impl std::fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Paused => write!(f, "paused"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One virtual NIC of a VM or container
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadInterface {
    /// Local interface slot, e.g. "net0"
    pub netid: String,
    /// Host-side device backing the NIC, e.g. "tap101i0" or "veth106i0"
    pub device: String,
    pub mac: String,
    pub bridge: Option<String>,
}

/// Virtual machine with its network interfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vm {
    pub vmid: u32,
    pub name: String,
    pub status: WorkloadStatus,
    pub interfaces: Vec<WorkloadInterface>,
}

/// Container with its network interfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub ctid: u32,
    pub name: String,
    pub status: WorkloadStatus,
    pub interfaces: Vec<WorkloadInterface>,
}

/// Reconciled record correlating one switch port to the workload behind it
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PortMappingRecord {
    pub port_name: String,
    pub port_uuid: String,
    pub bridge_name: Option<String>,
    pub bridge_uuid: Option<String>,
    pub vm_id: Option<u32>,
    pub vm_name: Option<String>,
    pub container_id: Option<u32>,
    pub container_name: Option<String>,
    pub interface_index: Option<u32>,
    pub interface_netid: Option<String>,
    pub interface_mac: Option<String>,
    pub is_container: bool,
}

/// Full port-mapping snapshot for one host; always replaced wholesale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_id: String,
    pub hostname: String,
    pub last_updated: DateTime<Utc>,
    pub ports: Vec<PortMappingRecord>,
}

/// Detailed interface record from the switch database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceDetail {
    pub name: String,
    pub kind: PortKind,
    pub mac_address: Option<String>,
    pub mtu: Option<u32>,
    pub admin_state: Option<String>,
    pub link_state: Option<String>,
    /// Type-specific options (remote_ip, key, peer, ...)
    pub options: BTreeMap<String, String>,
}

/// Counter snapshot for one interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceStats {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_dropped: u64,
    pub rx_errors: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_dropped: u64,
    pub tx_errors: u64,
    pub timestamp: DateTime<Utc>,
}

/// Detailed port record including VLAN and bond attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDetail {
    pub uuid: String,
    pub name: String,
    pub bridge: Option<String>,
    pub tag: Option<u16>,
    pub trunks: Vec<u16>,
    pub vlan_mode: Option<String>,
    pub bond_mode: Option<String>,
    pub lacp: Option<String>,
    pub bond_updelay: Option<u32>,
    pub bond_downdelay: Option<u32>,
    pub interfaces: Vec<InterfaceDetail>,
}

/// Detailed bridge record from the switch database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeDetail {
    pub uuid: String,
    pub name: String,
    pub fail_mode: Option<String>,
    pub datapath_type: Option<String>,
    pub datapath_id: Option<String>,
    pub protocols: Vec<String>,
    pub stp_enable: bool,
    pub rstp_enable: bool,
    pub mcast_snooping_enable: bool,
    pub ports: Vec<PortDetail>,
    pub mirrors: Vec<Mirror>,
}

/// Bond slave state parsed from `ovs-appctl bond/show`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BondSlave {
    pub name: String,
    pub status: String,
}

/// Bond health summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BondStatus {
    pub name: String,
    pub mode: String,
    pub lacp: String,
    pub active_slave: Option<String>,
    pub slaves: Vec<BondSlave>,
}

/// LACP negotiation state for a bond
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LacpStatus {
    pub bond_name: String,
    pub actor_key: Option<u32>,
    pub partner_key: Option<u32>,
    pub aggregation_status: Option<String>,
    pub details: BTreeMap<String, String>,
}

/// Flow export protocol selector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlowProtocol {
    Netflow,
    Sflow,
    Ipfix,
}

impl std::fmt::Display for FlowProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Netflow => write!(f, "netflow"),
            Self::Sflow => write!(f, "sflow"),
            Self::Ipfix => write!(f, "ipfix"),
        }
    }
}

/// Flow export settings for one bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowExportConfig {
    pub protocol: FlowProtocol,
    pub bridge: String,
    /// Collector addresses in IP:port form
    pub targets: Vec<String>,
    pub active_timeout: Option<u32>,
    pub engine_id: Option<u32>,
    pub engine_type: Option<u32>,
    pub header: Option<u32>,
    pub sampling: Option<u32>,
    pub polling: Option<u32>,
    pub obs_domain_id: Option<u32>,
    pub obs_point_id: Option<u32>,
    pub cache_active_timeout: Option<u32>,
    pub cache_max_flows: Option<u32>,
}

// Request payloads accepted by the API

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBridgeRequest {
    pub name: String,
    pub fail_mode: Option<String>,
    pub datapath_type: Option<String>,
    pub ipv4_cidr: Option<String>,
    pub ipv4_gateway: Option<String>,
    pub ipv6_cidr: Option<String>,
    pub ipv6_gateway: Option<String>,
    /// Space-separated physical ports to enslave, e.g. "eth1 eth2"
    pub bridge_ports: Option<String>,
    #[serde(default = "default_true")]
    pub autostart: bool,
    pub ovs_options: Option<String>,
    pub comment: Option<String>,
    pub mtu: Option<u32>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePortRequest {
    pub name: String,
    pub port_type: Option<String>,
    pub options: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBondRequest {
    pub name: String,
    pub interfaces: Vec<String>,
    pub mode: Option<String>,
    pub lacp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetVlanRequest {
    pub tag: Option<u16>,
    pub mode: String,
    pub trunks: Option<Vec<u16>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMirrorRequest {
    pub bridge: String,
    pub name: String,
    /// Empty means select-all mirroring
    #[serde(default)]
    pub source_ports: Vec<String>,
    pub output_port: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMirrorRequest {
    pub bridge: String,
    pub mirror_uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureFlowExportRequest {
    pub targets: Vec<String>,
    pub active_timeout: Option<u32>,
    pub engine_id: Option<u32>,
    pub engine_type: Option<u32>,
    pub header: Option<u32>,
    pub sampling: Option<u32>,
    pub polling: Option<u32>,
    pub obs_domain_id: Option<u32>,
    pub obs_point_id: Option<u32>,
    pub cache_active_timeout: Option<u32>,
    pub cache_max_flows: Option<u32>,
}

/// API error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Host not found: {0}")]
    HostNotFound(String),

    #[error("Bridge not found: {0}")]
    BridgeNotFound(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Remote transport error: {0}")]
    Remote(String),

    #[error("Remote command failed: {0}")]
    CommandFailed(String),

    #[error("System error: {0}")]
    System(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
