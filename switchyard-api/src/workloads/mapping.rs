///! Port-to-workload correlation
///!
///! Produces the canonical mapping of switch port -> {workload identity,
///! interface slot, MAC, bridge}. The record set is rebuilt in full on every
///! refresh and replaces the previous set for the host wholesale; partial
///! merges would leave stale cross-references behind.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use switchyard_common::{Container, PortMapping, PortMappingRecord, Vm};
use tracing::debug;

use super::{netid_index, WorkloadDevice};

/// Correlate every switch port against the VM and container inventories.
///
/// Primary correlation decodes the `tap<id>i<idx>` / `veth<id>i<idx>`
/// convention and matches the numeric id exactly; the decoded interface
/// index is resolved against the workload's own interface list to recover
/// the netid and MAC, falling back to the index-derived `net<idx>` when the
/// workload has no matching slot. Ports named `veth*` that do not follow
/// the convention go through a bridge-co-membership fallback (containers
/// only): the first container with any interface on the port's bridge is
/// accepted as owner. That heuristic is best-effort and can misattribute
/// when two containers share a bridge.
#[allow(clippy::too_many_arguments)]
pub fn build_port_mapping(
    host_id: &str,
    hostname: &str,
    port_rows: &[(String, String)],
    bridge_map: &BTreeMap<String, String>,
    bridge_uuid_map: &BTreeMap<String, String>,
    vms: &[Vm],
    containers: &[Container],
    last_updated: DateTime<Utc>,
) -> PortMapping {
    let mut records = Vec::with_capacity(port_rows.len());

    for (port_name, port_uuid) in port_rows {
        let bridge_name = bridge_map.get(port_name).cloned();
        let bridge_uuid = bridge_name
            .as_ref()
            .and_then(|bridge| bridge_uuid_map.get(bridge))
            .cloned();

        let mut record = PortMappingRecord {
            port_name: port_name.clone(),
            port_uuid: port_uuid.clone(),
            bridge_name: bridge_name.clone(),
            bridge_uuid,
            ..Default::default()
        };

        match WorkloadDevice::parse(port_name) {
            Some(WorkloadDevice::Vm { vmid, index }) => {
                record.interface_index = Some(index);
                record.interface_netid = Some(format!("net{}", index));

                if let Some(vm) = vms.iter().find(|vm| vm.vmid == vmid) {
                    record.vm_id = Some(vm.vmid);
                    record.vm_name = Some(vm.name.clone());
                    apply_interface_details(&mut record, &vm.interfaces, index);
                } else {
                    debug!(port = %port_name, vmid, "no VM with this id on the host");
                }
            }
            Some(WorkloadDevice::Container { ctid, index }) => {
                record.is_container = true;
                record.interface_index = Some(index);
                record.interface_netid = Some(format!("net{}", index));

                if let Some(container) = containers.iter().find(|ct| ct.ctid == ctid) {
                    record.container_id = Some(container.ctid);
                    record.container_name = Some(container.name.clone());
                    apply_interface_details(&mut record, &container.interfaces, index);
                } else {
                    debug!(port = %port_name, ctid, "no container with this id on the host");
                }
            }
            None if port_name.starts_with("veth") => {
                // Non-conforming container device name: best-effort match by
                // bridge co-membership, first container wins.
                record.is_container = true;
                correlate_by_bridge(&mut record, containers, bridge_name.as_deref());
            }
            None => {
                // Infrastructure port, nothing to correlate.
            }
        }

        records.push(record);
    }

    PortMapping {
        host_id: host_id.to_string(),
        hostname: hostname.to_string(),
        last_updated,
        ports: records,
    }
}

/// Copy netid and MAC from the workload's own interface list when the
/// decoded index has an exact match there.
fn apply_interface_details(
    record: &mut PortMappingRecord,
    interfaces: &[switchyard_common::WorkloadInterface],
    index: u32,
) {
    if let Some(iface) = interfaces
        .iter()
        .find(|iface| netid_index(&iface.netid) == Some(index))
    {
        record.interface_netid = Some(iface.netid.clone());
        if !iface.mac.is_empty() {
            record.interface_mac = Some(iface.mac.clone());
        }
    }
}

fn correlate_by_bridge(
    record: &mut PortMappingRecord,
    containers: &[Container],
    bridge: Option<&str>,
) {
    let Some(bridge) = bridge else {
        return;
    };
    for container in containers {
        if let Some(iface) = container
            .interfaces
            .iter()
            .find(|iface| iface.bridge.as_deref() == Some(bridge))
        {
            debug!(
                port = %record.port_name,
                ctid = container.ctid,
                bridge,
                "matched non-conforming veth port by bridge co-membership"
            );
            record.container_id = Some(container.ctid);
            record.container_name = Some(container.name.clone());
            record.interface_netid = Some(iface.netid.clone());
            if !iface.mac.is_empty() {
                record.interface_mac = Some(iface.mac.clone());
            }
            return;
        }
    }
    debug!(port = %record.port_name, bridge, "no container shares this bridge");
}
