///! Topology assembly from primitive-parsed switch output
///!
///! Pure functions: every input is text already fetched from the host, so
///! the builders can be exercised without a live switch. Unresolvable
///! references degrade to empty/"unknown" placeholders instead of dropping
///! records or failing the rebuild.

use std::collections::BTreeMap;

use switchyard_common::{Bridge, InterfaceStub, Mirror, Port, PortKind};
use tracing::debug;

use super::parse;

/// Build the bridge/port/interface model from `ovs-vsctl show` output plus
/// the per-bridge UUID lookups, the interface kind table and the CIDR map
/// extracted from the interfaces file.
///
/// One bridge per top-level block; port and interface order from the source
/// is preserved. A bridge whose UUID lookup failed keeps an empty UUID.
pub fn build_topology(
    show_output: &str,
    bridge_uuids: &BTreeMap<String, String>,
    interface_kinds: &BTreeMap<String, PortKind>,
    cidr_map: &BTreeMap<String, String>,
) -> Vec<Bridge> {
    parse::parse_show_tree(show_output)
        .into_iter()
        .map(|show_bridge| {
            let ports = show_bridge
                .ports
                .into_iter()
                .map(|show_port| {
                    let interfaces: Vec<InterfaceStub> = show_port
                        .interfaces
                        .iter()
                        .map(|name| InterfaceStub {
                            name: name.clone(),
                            kind: interface_kinds
                                .get(name)
                                .copied()
                                .unwrap_or(PortKind::Unknown),
                        })
                        .collect();

                    Port {
                        uuid: String::new(),
                        name: show_port.name.clone(),
                        bridge: Some(show_bridge.name.clone()),
                        kind: infer_port_kind(&show_port.interfaces, interface_kinds),
                        interfaces,
                    }
                })
                .collect();

            Bridge {
                uuid: bridge_uuids.get(&show_bridge.name).cloned().unwrap_or_default(),
                name: show_bridge.name.clone(),
                ports,
                mirrors: Vec::new(),
                cidr: cidr_map.get(&show_bridge.name).cloned(),
                comment: None,
            }
        })
        .collect()
}

/// A port's kind follows its first interface: the kind table is
/// authoritative, the tap/veth name convention is the fallback, and
/// anything else is a system device. Ports with more than one interface are
/// bonds; the first member still decides the kind.
fn infer_port_kind(
    interface_names: &[String],
    interface_kinds: &BTreeMap<String, PortKind>,
) -> PortKind {
    let Some(primary) = interface_names.first() else {
        return PortKind::Unknown;
    };
    interface_kinds
        .get(primary)
        .copied()
        .unwrap_or_else(|| PortKind::from_interface_name(primary))
}

/// Build mirrors from `ovs-vsctl list mirror` output.
///
/// Bridge ownership uses a two-tier strategy: the `mirrors` column of the
/// bridge table (tier 1, authoritative) first, then the source/output port's
/// bridge membership (tier 2) for mirrors the bridge table does not list.
/// A mirror matching neither tier is labeled "unknown", never dropped.
pub fn build_mirrors(
    list_mirror_output: &str,
    port_names: &BTreeMap<String, String>,
    port_bridges: &BTreeMap<String, String>,
    bridge_mirrors: &BTreeMap<String, String>,
) -> Vec<Mirror> {
    parse::parse_record_blocks(list_mirror_output)
        .into_iter()
        .filter_map(|record| {
            let uuid = record.get("_uuid")?.clone();

            let select_src_ports: Vec<String> = record
                .get("select_src_port")
                .map(|v| parse::extract_uuids(v))
                .unwrap_or_default()
                .iter()
                .filter_map(|port_uuid| port_names.get(port_uuid).cloned())
                .collect();

            let output_port = record
                .get("output_port")
                .and_then(|v| parse::optional_scalar(v))
                .and_then(|port_uuid| port_names.get(&port_uuid).cloned());

            let bridge = resolve_mirror_bridge(
                &uuid,
                &select_src_ports,
                output_port.as_deref(),
                port_bridges,
                bridge_mirrors,
            );

            let select_all = record
                .get("select_all")
                .map(|v| parse::strip_quotes(v) == "true")
                .unwrap_or(false);

            let output_vlan = record
                .get("output_vlan")
                .and_then(|v| parse::optional_scalar(v))
                .and_then(|v| v.parse::<u16>().ok());

            Some(Mirror {
                uuid,
                name: record.get("name").and_then(|v| parse::optional_scalar(v)),
                bridge,
                select_src_ports,
                select_all,
                output_port,
                output_vlan,
            })
        })
        .collect()
}

/// Tier 1 (bridge table) wins whenever it knows the mirror, even when tier 2
/// would disagree; tier 2 exists because some deployments omit or delay the
/// bridge-side mirrors column.
fn resolve_mirror_bridge(
    mirror_uuid: &str,
    select_src_ports: &[String],
    output_port: Option<&str>,
    port_bridges: &BTreeMap<String, String>,
    bridge_mirrors: &BTreeMap<String, String>,
) -> String {
    if let Some(bridge) = bridge_mirrors.get(mirror_uuid) {
        return bridge.clone();
    }

    let via_ports = select_src_ports
        .iter()
        .find_map(|port| port_bridges.get(port))
        .or_else(|| output_port.and_then(|port| port_bridges.get(port)));

    match via_ports {
        Some(bridge) => {
            debug!(
                mirror = mirror_uuid,
                bridge = %bridge,
                "mirror not listed by any bridge record, resolved via port membership"
            );
            bridge.clone()
        }
        None => "unknown".to_string(),
    }
}

/// Attach mirrors to their owning bridges by name. Mirrors on bridges the
/// topology does not know (including "unknown") are left unattached.
pub fn attach_mirrors(bridges: &mut [Bridge], mirrors: &[Mirror]) {
    for mirror in mirrors {
        if let Some(bridge) = bridges.iter_mut().find(|b| b.name == mirror.bridge) {
            bridge.mirrors.push(mirror.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW_OUTPUT: &str = r#"59b27047-d01e-4d94-9d75-3d36a0fbb974
    Bridge "vmbr0"
        Port "vmbr0"
            Interface "vmbr0"
        Port "tap101i0"
            Interface "tap101i0"
        Port "mirror0"
            Interface "mirror0"
    Bridge "vmbr1"
        Port "bond0"
            Interface "eno1"
            Interface "eno2"
        Port "vmbr1"
            Interface "vmbr1"
    ovs_version: "2.17.7"
"#;

    fn kinds() -> BTreeMap<String, PortKind> {
        let mut kinds = BTreeMap::new();
        kinds.insert("vmbr0".to_string(), PortKind::Internal);
        kinds.insert("tap101i0".to_string(), PortKind::Tap);
        kinds.insert("mirror0".to_string(), PortKind::Internal);
        kinds.insert("eno1".to_string(), PortKind::System);
        kinds.insert("eno2".to_string(), PortKind::System);
        kinds.insert("vmbr1".to_string(), PortKind::Internal);
        kinds
    }

    #[test]
    fn test_build_topology_preserves_structure() {
        let mut uuids = BTreeMap::new();
        uuids.insert("vmbr0".to_string(), "59b27047-aaaa".to_string());
        let bridges = build_topology(SHOW_OUTPUT, &uuids, &kinds(), &BTreeMap::new());

        assert_eq!(bridges.len(), 2);
        assert_eq!(bridges[0].name, "vmbr0");
        assert_eq!(bridges[0].uuid, "59b27047-aaaa");
        assert_eq!(bridges[0].ports.len(), 3);
        assert_eq!(bridges[1].ports[0].interfaces.len(), 2);

        // unresolved UUID keeps the bridge, with an empty uuid
        assert_eq!(bridges[1].uuid, "");
    }

    #[test]
    fn test_port_kind_from_interface_table() {
        let bridges = build_topology(SHOW_OUTPUT, &BTreeMap::new(), &kinds(), &BTreeMap::new());
        assert_eq!(bridges[0].ports[0].kind, PortKind::Internal);
        assert_eq!(bridges[0].ports[1].kind, PortKind::Tap);
        // bond takes the kind of its first interface
        assert_eq!(bridges[1].ports[0].kind, PortKind::System);
    }

    #[test]
    fn test_port_kind_name_fallback_when_table_misses() {
        let bridges =
            build_topology(SHOW_OUTPUT, &BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new());
        // no kind table at all: tap ports decode by name, others become system
        assert_eq!(bridges[0].ports[1].kind, PortKind::Tap);
        assert_eq!(bridges[1].ports[0].kind, PortKind::System);
        // interface stubs stay unknown when the table has no entry
        assert_eq!(bridges[0].ports[1].interfaces[0].kind, PortKind::Unknown);
    }

    #[test]
    fn test_cidr_applied_from_map() {
        let mut cidrs = BTreeMap::new();
        cidrs.insert("vmbr0".to_string(), "10.10.10.0/24".to_string());
        let bridges = build_topology(SHOW_OUTPUT, &BTreeMap::new(), &kinds(), &cidrs);
        assert_eq!(bridges[0].cidr.as_deref(), Some("10.10.10.0/24"));
        assert!(bridges[1].cidr.is_none());
    }

    const MIRROR_M1: &str = "8b5cdd6e-31a5-4bd5-b0a5-1d26ac5d4f38";
    const PORT_SRC: &str = "11111111-2222-3333-4444-555555555555";
    const PORT_OUT: &str = "66666666-7777-8888-9999-aaaaaaaaaaaa";

    fn mirror_dump() -> String {
        format!(
            "_uuid               : {MIRROR_M1}\n\
             name                : \"m1\"\n\
             output_port         : {PORT_OUT}\n\
             output_vlan         : []\n\
             select_all          : false\n\
             select_src_port     : [{PORT_SRC}]\n"
        )
    }

    fn port_names() -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(PORT_SRC.to_string(), "tap101i0".to_string());
        map.insert(PORT_OUT.to_string(), "mirror0".to_string());
        map
    }

    fn port_bridges() -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("tap101i0".to_string(), "br0".to_string());
        map.insert("mirror0".to_string(), "br0".to_string());
        map
    }

    #[test]
    fn test_mirror_tier1_resolution() {
        let mut bridge_mirrors = BTreeMap::new();
        bridge_mirrors.insert(MIRROR_M1.to_string(), "br0".to_string());

        let mirrors = build_mirrors(&mirror_dump(), &port_names(), &port_bridges(), &bridge_mirrors);
        assert_eq!(mirrors.len(), 1);
        assert_eq!(mirrors[0].bridge, "br0");
        assert_eq!(mirrors[0].name.as_deref(), Some("m1"));
        assert_eq!(mirrors[0].select_src_ports, vec!["tap101i0"]);
        assert_eq!(mirrors[0].output_port.as_deref(), Some("mirror0"));
        assert!(!mirrors[0].select_all);
        assert!(mirrors[0].output_vlan.is_none());
    }

    #[test]
    fn test_mirror_tier1_wins_over_disagreeing_tier2() {
        // bridge table says br-other, port membership says br0: tier 1 wins
        let mut bridge_mirrors = BTreeMap::new();
        bridge_mirrors.insert(MIRROR_M1.to_string(), "br-other".to_string());

        let mirrors = build_mirrors(&mirror_dump(), &port_names(), &port_bridges(), &bridge_mirrors);
        assert_eq!(mirrors[0].bridge, "br-other");
    }

    #[test]
    fn test_mirror_tier2_fallback() {
        let mirrors =
            build_mirrors(&mirror_dump(), &port_names(), &port_bridges(), &BTreeMap::new());
        assert_eq!(mirrors[0].bridge, "br0");
    }

    #[test]
    fn test_mirror_unresolvable_is_unknown_not_dropped() {
        let mirrors =
            build_mirrors(&mirror_dump(), &BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new());
        assert_eq!(mirrors.len(), 1);
        assert_eq!(mirrors[0].bridge, "unknown");
        assert!(mirrors[0].select_src_ports.is_empty());
    }

    #[test]
    fn test_mirror_select_all_and_vlan() {
        let dump = format!(
            "_uuid               : {MIRROR_M1}\n\
             name                : []\n\
             output_port         : {PORT_OUT}\n\
             output_vlan         : 42\n\
             select_all          : true\n\
             select_src_port     : []\n"
        );
        let mirrors = build_mirrors(&dump, &port_names(), &port_bridges(), &BTreeMap::new());
        assert!(mirrors[0].select_all);
        assert_eq!(mirrors[0].output_vlan, Some(42));
        assert!(mirrors[0].name.is_none());
    }

    #[test]
    fn test_attach_mirrors() {
        let mut bridges = build_topology(SHOW_OUTPUT, &BTreeMap::new(), &kinds(), &BTreeMap::new());
        let mirror = Mirror {
            uuid: MIRROR_M1.to_string(),
            name: Some("m1".to_string()),
            bridge: "vmbr0".to_string(),
            select_src_ports: vec![],
            select_all: true,
            output_port: Some("mirror0".to_string()),
            output_vlan: None,
        };
        attach_mirrors(&mut bridges, &[mirror]);
        assert_eq!(bridges[0].mirrors.len(), 1);
        assert!(bridges[1].mirrors.is_empty());
    }
}
