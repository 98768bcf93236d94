///! Open vSwitch management over a remote shell
///!
///! `OvsService` wraps the switch CLI on a remote hypervisor host: topology
///! reads (`ovs-vsctl show` / `list`), bridge and port management, VLANs,
///! bonds, mirrors and statistics. Every operation is one or more sequential
///! remote round trips; a rebuild is a best-effort snapshot with no
///! transactional guarantee against concurrent changes on the host.

pub mod flow_export;
pub mod parse;
pub mod topology;

use std::collections::BTreeMap;

use chrono::Utc;
use switchyard_common::{
    BondSlave, BondStatus, Bridge, BridgeDetail, Container, CreateBondRequest,
    CreateBridgeRequest, CreateMirrorRequest, CreatePortRequest, DeleteMirrorRequest, Error,
    InterfaceDetail, InterfaceStats, LacpStatus, Mirror, PortDetail, PortKind, PortMapping,
    Result, SetVlanRequest, Vm,
};
use tracing::{error, info, warn};

use crate::netcfg::{self, BridgeStanza};
use crate::remote::RemoteShell;
use crate::validation;
use crate::workloads::{self, mapping};

const INTERFACES_FILE: &str = "/etc/network/interfaces";

/// Numeric column that the switch renders as `[]` when unset.
fn record_num<T: std::str::FromStr>(record: &BTreeMap<String, String>, key: &str) -> Option<T> {
    record
        .get(key)
        .and_then(|v| parse::optional_scalar(v))
        .and_then(|v| v.parse().ok())
}

pub struct OvsService<'a> {
    shell: &'a dyn RemoteShell,
}

impl<'a> OvsService<'a> {
    pub fn new(shell: &'a dyn RemoteShell) -> Self {
        Self { shell }
    }

    // ======================
    // Topology reads
    // ======================

    /// Full bridge topology: skeleton from `ovs-vsctl show`, UUIDs via point
    /// lookups, interface kinds from the interface table, CIDRs from the
    /// interfaces file, mirrors attached per bridge.
    ///
    /// A failed `show` fails the read; the enrichment steps degrade to
    /// placeholders instead (empty UUID, unknown kind, no CIDR, no mirrors).
    pub async fn bridges(&self) -> Result<Vec<Bridge>> {
        let show = self.shell.execute_checked("ovs-vsctl show").await?;
        let show_tree = parse::parse_show_tree(&show);

        let cidr_map = match self.shell.execute(&format!("cat {}", INTERFACES_FILE)).await {
            Ok(out) if out.exit_code == 0 => netcfg::bridge_cidr_map(&out.stdout),
            Ok(out) => {
                warn!(stderr = %out.stderr.trim(), "could not read interfaces file, bridge CIDRs unavailable");
                BTreeMap::new()
            }
            Err(e) => {
                warn!(error = %e, "could not read interfaces file, bridge CIDRs unavailable");
                BTreeMap::new()
            }
        };

        let mut bridge_uuids = BTreeMap::new();
        for bridge in &show_tree {
            if let Some(uuid) = self.bridge_uuid(&bridge.name).await {
                bridge_uuids.insert(bridge.name.clone(), uuid);
            }
        }

        let interface_kinds = match self
            .shell
            .execute("ovs-vsctl --columns=name,type list interface")
            .await
        {
            Ok(out) if out.exit_code == 0 => parse::parse_interface_kinds(&out.stdout),
            Ok(out) => {
                warn!(stderr = %out.stderr.trim(), "could not list interface types");
                BTreeMap::new()
            }
            Err(e) => {
                warn!(error = %e, "could not list interface types");
                BTreeMap::new()
            }
        };

        let mut bridges = topology::build_topology(&show, &bridge_uuids, &interface_kinds, &cidr_map);

        match self.mirrors().await {
            Ok(mirrors) => topology::attach_mirrors(&mut bridges, &mirrors),
            Err(e) => warn!(error = %e, "mirror listing failed, bridges returned without mirrors"),
        }

        Ok(bridges)
    }

    /// All mirrors with their owning bridge resolved (two-tier strategy).
    pub async fn mirrors(&self) -> Result<Vec<Mirror>> {
        let mirror_dump = self.shell.execute_checked("ovs-vsctl list mirror").await?;

        let port_dump = self.shell.execute_checked("ovs-vsctl list port").await?;
        let port_names = parse::parse_port_name_map(&port_dump);

        // Tier 1: the bridge table names its mirrors directly.
        let bridge_mirrors = match self.shell.execute("ovs-vsctl list bridge").await {
            Ok(out) if out.exit_code == 0 => parse::parse_bridge_mirror_map(&out.stdout),
            Ok(out) => {
                warn!(stderr = %out.stderr.trim(), "could not list bridges for mirror ownership");
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };

        // Tier 2 input: port membership from the show tree.
        let show = self.shell.execute_checked("ovs-vsctl show").await?;
        let port_bridges = parse::port_bridge_map(&parse::parse_show_tree(&show));

        Ok(topology::build_mirrors(&mirror_dump, &port_names, &port_bridges, &bridge_mirrors))
    }

    async fn bridge_uuid(&self, name: &str) -> Option<String> {
        match self
            .shell
            .execute(&format!("ovs-vsctl get Bridge {} _uuid", name))
            .await
        {
            Ok(out) if out.exit_code == 0 => {
                let uuid = out.stdout.trim().to_string();
                (!uuid.is_empty()).then_some(uuid)
            }
            _ => None,
        }
    }

    // ======================
    // Workloads
    // ======================

    /// All VMs on the host with their network interfaces.
    pub async fn vms(&self) -> Result<Vec<Vm>> {
        let listing = self.shell.execute_checked("qm list").await?;
        let mut vms = workloads::parse_vm_list(&listing);

        for vm in &mut vms {
            match self.shell.execute(&format!("qm config {}", vm.vmid)).await {
                Ok(out) if out.exit_code == 0 => {
                    vm.interfaces = workloads::parse_vm_interfaces(vm.vmid, &out.stdout);
                }
                Ok(out) => {
                    warn!(vmid = vm.vmid, stderr = %out.stderr.trim(), "could not fetch VM config");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(vms)
    }

    /// All containers on the host with their network interfaces.
    pub async fn containers(&self) -> Result<Vec<Container>> {
        let listing = self.shell.execute_checked("pct list").await?;
        let mut containers = workloads::parse_container_list(&listing);

        for container in &mut containers {
            match self
                .shell
                .execute(&format!("pct config {}", container.ctid))
                .await
            {
                Ok(out) if out.exit_code == 0 => {
                    container.interfaces =
                        workloads::parse_container_interfaces(container.ctid, &out.stdout);
                }
                Ok(out) => {
                    warn!(ctid = container.ctid, stderr = %out.stderr.trim(), "could not fetch container config");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(containers)
    }

    /// Rebuild the full port-to-workload mapping for the host. The result
    /// always replaces the previous set; it is never merged into it.
    pub async fn port_mapping(&self, host: &switchyard_common::HostConfig) -> Result<PortMapping> {
        let port_dump = self.shell.execute_checked("ovs-vsctl list port").await?;
        let port_rows = parse::parse_port_rows(&port_dump);

        let show = self.shell.execute_checked("ovs-vsctl show").await?;
        let show_tree = parse::parse_show_tree(&show);
        let bridge_map = parse::port_bridge_map(&show_tree);

        let mut bridge_uuid_map = BTreeMap::new();
        for bridge in &show_tree {
            if let Some(uuid) = self.bridge_uuid(&bridge.name).await {
                bridge_uuid_map.insert(bridge.name.clone(), uuid);
            }
        }

        let vms = self.vms().await?;

        // A host without the container tooling still has a valid mapping;
        // transport errors are still fatal.
        let containers = match self.containers().await {
            Ok(containers) => containers,
            Err(Error::CommandFailed(msg)) => {
                warn!(error = %msg, "container listing failed, mapping built without containers");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        Ok(mapping::build_port_mapping(
            &host.name,
            &host.hostname,
            &port_rows,
            &bridge_map,
            &bridge_uuid_map,
            &vms,
            &containers,
            Utc::now(),
        ))
    }

    // ======================
    // Bridge management
    // ======================

    /// Create a bridge on the live switch and persist its stanza in the
    /// interfaces file. The live change is reverted if the file edit fails.
    ///
    /// Callers must hold the per-host mutation lock: two stanza edits racing
    /// against the same file would corrupt it.
    pub async fn create_bridge(&self, request: &CreateBridgeRequest) -> Result<()> {
        validation::validate_bridge_name(&request.name)?;
        if let Some(cidr) = &request.ipv4_cidr {
            validation::validate_cidr(cidr, false)?;
        }
        if let Some(cidr) = &request.ipv6_cidr {
            validation::validate_cidr(cidr, true)?;
        }
        if let Some(gateway) = &request.ipv6_gateway {
            validation::validate_ip_address(gateway, true)?;
        }
        if let Some(mtu) = request.mtu {
            validation::validate_mtu(mtu)?;
        }
        if let Some(gateway) = &request.ipv4_gateway {
            validation::validate_ip_address(gateway, false)?;
            let current = self.interfaces_file().await?;
            if let Some(owner) = netcfg::find_default_gateway(&current) {
                return Err(Error::Validation(format!(
                    "Default gateway already exists on interface '{}'. Remove the gateway \
                     parameter or delete the existing gateway first; multiple default \
                     gateways cause routing conflicts.",
                    owner
                )));
            }
        }

        let mut command = format!("ovs-vsctl add-br {}", request.name);
        if let Some(datapath) = &request.datapath_type {
            if datapath != "system" {
                command.push_str(&format!(
                    " -- set bridge {} datapath_type={}",
                    request.name, datapath
                ));
            }
        }
        if let Some(fail_mode) = &request.fail_mode {
            command.push_str(&format!(" -- set bridge {} fail_mode={}", request.name, fail_mode));
        }
        self.shell.execute_checked(&command).await?;

        let stanza = BridgeStanza {
            name: request.name.clone(),
            ipv4_cidr: request.ipv4_cidr.clone(),
            ipv4_gateway: request.ipv4_gateway.clone(),
            ipv6_cidr: request.ipv6_cidr.clone(),
            ipv6_gateway: request.ipv6_gateway.clone(),
            ports: request.bridge_ports.clone(),
            mtu: request.mtu,
            ovs_options: request.ovs_options.clone(),
            comment: request.comment.clone(),
            autostart: request.autostart,
        };

        if let Err(e) = self.persist_bridge_stanza(&stanza).await {
            error!(bridge = %request.name, error = %e, "interfaces file edit failed, reverting live bridge");
            let _ = self
                .shell
                .execute(&format!("ovs-vsctl del-br {}", request.name))
                .await;
            return Err(e);
        }

        // Bring the interface up; it may already be up from the switch side.
        match self.shell.execute(&format!("ifup {}", request.name)).await {
            Ok(out) if out.exit_code != 0 => {
                warn!(bridge = %request.name, stderr = %out.stderr.trim(), "ifup returned non-zero");
            }
            Err(e) => warn!(bridge = %request.name, error = %e, "ifup failed"),
            _ => {}
        }

        info!(bridge = %request.name, "bridge created");
        Ok(())
    }

    async fn persist_bridge_stanza(&self, stanza: &BridgeStanza) -> Result<()> {
        let current = self.interfaces_file().await?;
        let updated = netcfg::append_bridge_stanza(&current, stanza);
        self.write_interfaces_file(&updated).await
    }

    /// Delete a bridge from the live switch and remove its stanza from the
    /// interfaces file. Removing an already-absent stanza is a no-op, so the
    /// operation is safe to re-run. Callers hold the per-host mutation lock.
    pub async fn delete_bridge(&self, name: &str) -> Result<()> {
        self.shell
            .execute_checked(&format!("ovs-vsctl del-br {}", name))
            .await?;

        let current = self.interfaces_file().await?;
        let updated = netcfg::remove_bridge_stanza(name, &current);
        self.write_interfaces_file(&updated).await?;

        let _ = self
            .shell
            .execute(&format!("ifdown {} 2>/dev/null || true", name))
            .await;

        info!(bridge = %name, "bridge deleted");
        Ok(())
    }

    /// Set bridge properties in one transaction. Values are passed through
    /// to the switch as-is.
    pub async fn update_bridge(
        &self,
        name: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<()> {
        if properties.is_empty() {
            return Ok(());
        }
        let clauses: Vec<String> = properties
            .iter()
            .map(|(key, value)| format!("set bridge {} {}={}", name, key, value))
            .collect();
        let command = format!("ovs-vsctl {}", clauses.join(" -- "));
        self.shell.execute_checked(&command).await?;
        Ok(())
    }

    /// Detailed bridge record: attributes, per-port detail, mirrors.
    pub async fn bridge_details(&self, name: &str) -> Result<BridgeDetail> {
        let dump = self
            .shell
            .execute_checked(&format!("ovs-vsctl list bridge {}", name))
            .await
            .map_err(|_| Error::BridgeNotFound(name.to_string()))?;
        let record = parse::parse_record_dump(&dump);
        if record.is_empty() {
            return Err(Error::BridgeNotFound(name.to_string()));
        }

        let ports_out = self
            .shell
            .execute_checked(&format!("ovs-vsctl list-ports {}", name))
            .await?;
        let mut ports = Vec::new();
        for port_name in ports_out.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match self.port_details(port_name).await {
                Ok(detail) => ports.push(detail),
                Err(e) => warn!(port = port_name, error = %e, "could not fetch port detail"),
            }
        }

        let mirrors = self
            .mirrors()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|mirror| mirror.bridge == name)
            .collect();

        let flag = |key: &str| {
            record
                .get(key)
                .map(|v| parse::strip_quotes(v) == "true")
                .unwrap_or(false)
        };

        Ok(BridgeDetail {
            uuid: record.get("_uuid").cloned().unwrap_or_default(),
            name: record
                .get("name")
                .map(|n| parse::strip_quotes(n).to_string())
                .unwrap_or_else(|| name.to_string()),
            fail_mode: record.get("fail_mode").and_then(|v| parse::optional_scalar(v)),
            datapath_type: record
                .get("datapath_type")
                .and_then(|v| parse::optional_scalar(v)),
            datapath_id: record
                .get("datapath_id")
                .and_then(|v| parse::optional_scalar(v)),
            protocols: record
                .get("protocols")
                .map(|v| parse::parse_array_literal(v))
                .unwrap_or_default(),
            stp_enable: flag("stp_enable"),
            rstp_enable: flag("rstp_enable"),
            mcast_snooping_enable: flag("mcast_snooping_enable"),
            ports,
            mirrors,
        })
    }

    /// Flush the MAC learning table of a bridge.
    pub async fn flush_bridge_fdb(&self, name: &str) -> Result<()> {
        self.shell
            .execute_checked(&format!("ovs-appctl fdb/flush {}", name))
            .await?;
        Ok(())
    }

    // ======================
    // Port management
    // ======================

    pub async fn add_port(&self, bridge: &str, request: &CreatePortRequest) -> Result<()> {
        let mut command = format!("ovs-vsctl add-port {} {}", bridge, request.name);
        if let Some(port_type) = &request.port_type {
            if port_type != "system" {
                command.push_str(&format!(
                    " -- set interface {} type={}",
                    request.name, port_type
                ));
            }
        }
        if let Some(options) = &request.options {
            for (key, value) in options {
                command.push_str(&format!(
                    " -- set interface {} options:{}={}",
                    request.name, key, value
                ));
            }
        }
        self.shell.execute_checked(&command).await?;
        info!(bridge, port = %request.name, "port added");
        Ok(())
    }

    pub async fn delete_port(&self, bridge: &str, port: &str) -> Result<()> {
        self.shell
            .execute_checked(&format!("ovs-vsctl del-port {} {}", bridge, port))
            .await?;
        info!(bridge, port, "port deleted");
        Ok(())
    }

    pub async fn update_port(
        &self,
        name: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<()> {
        if properties.is_empty() {
            return Ok(());
        }
        let clauses: Vec<String> = properties
            .iter()
            .map(|(key, value)| format!("set port {} {}={}", name, key, value))
            .collect();
        let command = format!("ovs-vsctl {}", clauses.join(" -- "));
        self.shell.execute_checked(&command).await?;
        Ok(())
    }

    /// Detailed port record with per-interface detail resolved by UUID.
    pub async fn port_details(&self, name: &str) -> Result<PortDetail> {
        let dump = self
            .shell
            .execute_checked(&format!("ovs-vsctl list port {}", name))
            .await
            .map_err(|_| Error::PortNotFound(name.to_string()))?;
        let record = parse::parse_record_dump(&dump);
        if record.is_empty() {
            return Err(Error::PortNotFound(name.to_string()));
        }

        let mut interfaces = Vec::new();
        if let Some(value) = record.get("interfaces") {
            for uuid in parse::extract_uuids(value) {
                match self.interface_detail(&uuid).await {
                    Ok(detail) => interfaces.push(detail),
                    Err(e) => warn!(interface = %uuid, error = %e, "could not fetch interface detail"),
                }
            }
        }

        let show = self.shell.execute_checked("ovs-vsctl show").await?;
        let bridge = parse::port_bridge_map(&parse::parse_show_tree(&show))
            .get(name)
            .cloned();

        Ok(PortDetail {
            uuid: record.get("_uuid").cloned().unwrap_or_default(),
            name: record
                .get("name")
                .map(|n| parse::strip_quotes(n).to_string())
                .unwrap_or_else(|| name.to_string()),
            bridge,
            tag: record_num(&record, "tag"),
            trunks: record
                .get("trunks")
                .map(|v| {
                    parse::parse_array_literal(v)
                        .iter()
                        .filter_map(|t| t.parse().ok())
                        .collect()
                })
                .unwrap_or_default(),
            vlan_mode: record.get("vlan_mode").and_then(|v| parse::optional_scalar(v)),
            bond_mode: record.get("bond_mode").and_then(|v| parse::optional_scalar(v)),
            lacp: record.get("lacp").and_then(|v| parse::optional_scalar(v)),
            bond_updelay: record_num(&record, "bond_updelay"),
            bond_downdelay: record_num(&record, "bond_downdelay"),
            interfaces,
        })
    }

    async fn interface_detail(&self, uuid: &str) -> Result<InterfaceDetail> {
        let dump = self
            .shell
            .execute_checked(&format!(
                "ovs-vsctl --columns=name,type,mac_in_use,mtu,admin_state,link_state,options list interface {}",
                uuid
            ))
            .await?;
        let record = parse::parse_record_dump(&dump);

        let name = record
            .get("name")
            .map(|n| parse::strip_quotes(n).to_string())
            .unwrap_or_default();
        let ovs_type = record
            .get("type")
            .map(|t| parse::strip_quotes(t).to_string())
            .unwrap_or_default();

        Ok(InterfaceDetail {
            kind: PortKind::from_ovs_type(&ovs_type, &name),
            name,
            mac_address: record.get("mac_in_use").and_then(|v| parse::optional_scalar(v)),
            mtu: record
                .get("mtu")
                .and_then(|v| parse::optional_scalar(v))
                .and_then(|v| v.parse().ok()),
            admin_state: record.get("admin_state").and_then(|v| parse::optional_scalar(v)),
            link_state: record.get("link_state").and_then(|v| parse::optional_scalar(v)),
            options: record
                .get("options")
                .map(|v| parse::parse_set_literal(v))
                .unwrap_or_default(),
        })
    }

    /// System interfaces that could be attached to a bridge.
    pub async fn available_interfaces(&self) -> Result<Vec<String>> {
        let output = self.shell.execute_checked("ip link show").await?;
        Ok(output
            .lines()
            .filter(|line| line.contains(':') && !line.starts_with(' '))
            .filter_map(|line| line.split(':').nth(1))
            .map(str::trim)
            .filter(|name| !name.is_empty() && *name != "lo")
            .map(|name| name.to_string())
            .collect())
    }

    // ======================
    // VLANs
    // ======================

    pub async fn set_port_vlan(&self, port: &str, request: &SetVlanRequest) -> Result<()> {
        let command = match request.mode.as_str() {
            "access" => {
                let tag = request.tag.ok_or_else(|| {
                    Error::Validation("access mode requires a VLAN tag".to_string())
                })?;
                format!("ovs-vsctl set port {} tag={} vlan_mode=access", port, tag)
            }
            "trunk" => format!("ovs-vsctl set port {} vlan_mode=trunk", port),
            mode @ ("native-tagged" | "native-untagged") => {
                let tag = request.tag.ok_or_else(|| {
                    Error::Validation(format!("{} mode requires a VLAN tag", mode))
                })?;
                format!("ovs-vsctl set port {} tag={} vlan_mode={}", port, tag, mode)
            }
            other => {
                return Err(Error::Validation(format!("invalid VLAN mode: {}", other)));
            }
        };
        self.shell.execute_checked(&command).await?;

        if let Some(trunks) = &request.trunks {
            self.set_port_trunks(port, trunks).await?;
        }
        Ok(())
    }

    pub async fn set_port_trunks(&self, port: &str, trunks: &[u16]) -> Result<()> {
        let list = trunks
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.shell
            .execute_checked(&format!("ovs-vsctl set port {} trunks={}", port, list))
            .await?;
        Ok(())
    }

    // ======================
    // Bonds
    // ======================

    pub async fn create_bond(&self, bridge: &str, request: &CreateBondRequest) -> Result<()> {
        if request.interfaces.len() < 2 {
            return Err(Error::Validation(
                "a bond requires at least two member interfaces".to_string(),
            ));
        }
        let members = request.interfaces.join(" ");
        let mode = request.mode.as_deref().unwrap_or("active-backup");
        let lacp = request.lacp.as_deref().unwrap_or("off");
        self.shell
            .execute_checked(&format!(
                "ovs-vsctl add-bond {} {} {} bond_mode={} lacp={}",
                bridge, request.name, members, mode, lacp
            ))
            .await?;
        info!(bridge, bond = %request.name, "bond created");
        Ok(())
    }

    /// Bond health: mode and LACP from the port record, slave states from
    /// `ovs-appctl bond/show`.
    pub async fn bond_status(&self, bond: &str) -> Result<BondStatus> {
        let detail = self.port_details(bond).await?;

        let mut slaves = Vec::new();
        let mut active_slave = None;
        if let Ok(output) = self
            .shell
            .execute(&format!("ovs-appctl bond/show {}", bond))
            .await
        {
            if output.exit_code == 0 {
                for line in output.stdout.lines() {
                    if line.to_lowercase().contains("slave") {
                        if let Some((head, status)) = line.split_once(':') {
                            let name = head.trim().trim_start_matches("slave ").to_string();
                            let status = status.trim().to_string();
                            if status.to_lowercase().contains("active") {
                                active_slave = Some(name.clone());
                            }
                            slaves.push(BondSlave { name, status });
                        }
                    }
                }
            }
        }

        Ok(BondStatus {
            name: bond.to_string(),
            mode: detail.bond_mode.unwrap_or_else(|| "unknown".to_string()),
            lacp: detail.lacp.unwrap_or_else(|| "off".to_string()),
            active_slave,
            slaves,
        })
    }

    pub async fn lacp_status(&self, bond: &str) -> Result<LacpStatus> {
        let output = self
            .shell
            .execute_checked(&format!("ovs-appctl lacp/show {}", bond))
            .await?;

        let mut details = BTreeMap::new();
        for line in output.lines() {
            if let Some((key, value)) = line.split_once(':') {
                details.insert(key.trim().to_lowercase(), value.trim().to_string());
            }
        }

        Ok(LacpStatus {
            bond_name: bond.to_string(),
            actor_key: details.get("actor key").and_then(|v| v.parse().ok()),
            partner_key: details.get("partner key").and_then(|v| v.parse().ok()),
            aggregation_status: details.get("status").cloned(),
            details,
        })
    }

    // ======================
    // Mirrors
    // ======================

    /// Create a mirror. An empty source-port list means select-all
    /// (mirror every packet on the bridge).
    pub async fn create_mirror(&self, request: &CreateMirrorRequest) -> Result<()> {
        let command = if request.source_ports.is_empty() {
            format!(
                "ovs-vsctl -- --id=@p get Port {} \
                 -- --id=@m create Mirror name={} select-all=true output-port=@p \
                 -- add Bridge {} mirrors @m",
                request.output_port, request.name, request.bridge
            )
        } else if request.source_ports.len() == 1 {
            format!(
                "ovs-vsctl -- --id=@src get Port {} \
                 -- --id=@out get Port {} \
                 -- --id=@m create Mirror name={} \
                 select-src-port=@src select-dst-port=@src output-port=@out \
                 -- add Bridge {} mirrors @m",
                request.source_ports[0], request.output_port, request.name, request.bridge
            )
        } else {
            let port_refs: Vec<String> = request
                .source_ports
                .iter()
                .enumerate()
                .map(|(i, port)| format!("--id=@src{} get Port {}", i, port))
                .collect();
            let src_refs: Vec<String> = (0..request.source_ports.len())
                .map(|i| format!("@src{}", i))
                .collect();
            let src_set = src_refs.join(" ");
            format!(
                "ovs-vsctl -- {} \
                 -- --id=@out get Port {} \
                 -- --id=@m create Mirror name={} \
                 select-src-port={{{}}} select-dst-port={{{}}} output-port=@out \
                 -- add Bridge {} mirrors @m",
                port_refs.join(" -- "),
                request.output_port,
                request.name,
                src_set,
                src_set,
                request.bridge
            )
        };

        self.shell.execute_checked(&command).await?;
        info!(bridge = %request.bridge, mirror = %request.name, "mirror created");
        Ok(())
    }

    /// Delete a mirror: confirm the UUID against the bridge record first,
    /// then detach it from the bridge (which garbage-collects the mirror).
    pub async fn delete_mirror(&self, request: &DeleteMirrorRequest) -> Result<()> {
        let dump = self
            .shell
            .execute_checked(&format!("ovs-vsctl list bridge {}", request.bridge))
            .await?;
        let known = parse::extract_uuids(dump.as_str());
        if !known.contains(&request.mirror_uuid) {
            // The UUID may still be right even when the listing is stale;
            // proceed, the remove below fails loudly if it is not.
            warn!(
                bridge = %request.bridge,
                mirror = %request.mirror_uuid,
                "mirror UUID not listed by bridge record"
            );
        }

        self.shell
            .execute_checked(&format!(
                "ovs-vsctl remove bridge {} mirrors {}",
                request.bridge, request.mirror_uuid
            ))
            .await?;
        info!(bridge = %request.bridge, mirror = %request.mirror_uuid, "mirror deleted");
        Ok(())
    }

    pub async fn clear_bridge_mirrors(&self, bridge: &str) -> Result<()> {
        self.shell
            .execute_checked(&format!("ovs-vsctl clear bridge {} mirrors", bridge))
            .await?;
        info!(bridge, "all mirrors cleared");
        Ok(())
    }

    /// Mirror packet/byte counters from the `statistics` set literal.
    pub async fn mirror_statistics(&self, mirror: &str) -> Result<BTreeMap<String, u64>> {
        let output = self
            .shell
            .execute_checked(&format!("ovs-vsctl get Mirror {} statistics", mirror))
            .await?;
        Ok(parse::parse_set_literal(output.trim())
            .into_iter()
            .filter_map(|(key, value)| value.parse().ok().map(|v| (key, v)))
            .collect())
    }

    // ======================
    // Interface statistics
    // ======================

    pub async fn interface_stats(&self, interface: &str) -> Result<InterfaceStats> {
        let dump = self
            .shell
            .execute_checked(&format!("ovs-vsctl list interface {}", interface))
            .await?;
        let record = parse::parse_record_dump(&dump);
        let stats = record
            .get("statistics")
            .map(|v| parse::parse_set_literal(v))
            .unwrap_or_default();

        let counter = |key: &str| stats.get(key).and_then(|v| v.parse().ok()).unwrap_or(0);

        Ok(InterfaceStats {
            rx_packets: counter("rx_packets"),
            rx_bytes: counter("rx_bytes"),
            rx_dropped: counter("rx_dropped"),
            rx_errors: counter("rx_errors"),
            tx_packets: counter("tx_packets"),
            tx_bytes: counter("tx_bytes"),
            tx_dropped: counter("tx_dropped"),
            tx_errors: counter("tx_errors"),
            timestamp: Utc::now(),
        })
    }

    /// Per-second rates between two snapshots. The baseline is explicit:
    /// callers own it for the span of one reconciliation session.
    pub fn stats_delta(baseline: &InterfaceStats, current: &InterfaceStats) -> BTreeMap<String, f64> {
        let mut seconds = (current.timestamp - baseline.timestamp).num_milliseconds() as f64 / 1000.0;
        if seconds <= 0.0 {
            seconds = 1.0;
        }

        let rate = |now: u64, then: u64| now.saturating_sub(then) as f64 / seconds;

        let mut delta = BTreeMap::new();
        delta.insert("rx_bps".to_string(), rate(current.rx_bytes, baseline.rx_bytes) * 8.0);
        delta.insert("tx_bps".to_string(), rate(current.tx_bytes, baseline.tx_bytes) * 8.0);
        delta.insert("rx_pps".to_string(), rate(current.rx_packets, baseline.rx_packets));
        delta.insert("tx_pps".to_string(), rate(current.tx_packets, baseline.tx_packets));
        delta.insert("rx_dropped_ps".to_string(), rate(current.rx_dropped, baseline.rx_dropped));
        delta.insert("tx_dropped_ps".to_string(), rate(current.tx_dropped, baseline.tx_dropped));
        delta.insert("rx_errors_ps".to_string(), rate(current.rx_errors, baseline.rx_errors));
        delta.insert("tx_errors_ps".to_string(), rate(current.tx_errors, baseline.tx_errors));
        delta
    }

    // ======================
    // Interfaces file plumbing
    // ======================

    async fn interfaces_file(&self) -> Result<String> {
        self.shell
            .execute_checked(&format!("cat {}", INTERFACES_FILE))
            .await
    }

    /// Snapshot the file, then replace it in one whole-file write. Never
    /// appends or patches in place, so a failed command cannot leave a
    /// half-written file behind.
    async fn write_interfaces_file(&self, content: &str) -> Result<()> {
        let backup = format!(
            "cp {0} {0}.bak.$(date +%Y%m%d_%H%M%S)",
            INTERFACES_FILE
        );
        if let Err(e) = self.shell.execute(&backup).await {
            warn!(error = %e, "could not snapshot interfaces file before edit");
        }

        let body = content.strip_suffix('\n').unwrap_or(content);
        let command = format!("cat > {} << 'EOF'\n{}\nEOF", INTERFACES_FILE, body);
        self.shell.execute_checked(&command).await?;
        Ok(())
    }
}
