///! Parsers for the two textual shapes the switch CLI emits
///!
///! `ovs-vsctl show` produces an indentation/keyword-nested tree of bridges,
///! ports and interfaces; `ovs-vsctl list <table>` produces flat
///! `key : value` record dumps separated by blank lines, with `[a, b]` array
///! and `{k=v}` set literals embedded in the values. Both shapes are parsed
///! defensively: malformed lines are skipped, unrecognized lines are ignored
///! without attaching fields to the wrong record.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use switchyard_common::PortKind;

static UUID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").unwrap()
});

/// Strip one level of surrounding double quotes, if present.
pub fn strip_quotes(value: &str) -> &str {
    value.trim().trim_matches('"')
}

/// Parse a flat `key : value` record dump. Duplicate keys: last wins.
/// Lines without a colon are skipped.
pub fn parse_record_dump(output: &str) -> BTreeMap<String, String> {
    let mut record = BTreeMap::new();
    for line in output.lines() {
        let line = line.trim();
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            record.insert(key.to_string(), value.trim().to_string());
        }
    }
    record
}

/// Parse a multi-record dump (`ovs-vsctl list <table>` with several rows)
/// into one record per blank-line-separated block, in source order.
pub fn parse_record_blocks(output: &str) -> Vec<BTreeMap<String, String>> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    for line in output.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(parse_record_dump(&current));
                current.clear();
            }
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.is_empty() {
        blocks.push(parse_record_dump(&current));
    }
    blocks
}

/// Parse an array literal of the form `[v1, v2]` into trimmed,
/// quote-stripped items. `[]` and non-array values parse to an empty list.
pub fn parse_array_literal(value: &str) -> Vec<String> {
    let value = value.trim();
    if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        let inner = inner.trim();
        if inner.is_empty() {
            return Vec::new();
        }
        inner
            .split(',')
            .map(|item| strip_quotes(item).to_string())
            .filter(|item| !item.is_empty())
            .collect()
    } else {
        Vec::new()
    }
}

/// Parse a set literal of the form `{k1=v1, k2=v2}` into a key/value map.
/// Non-set values parse to an empty map.
pub fn parse_set_literal(value: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    let value = value.trim();
    if let Some(inner) = value.strip_prefix('{').and_then(|v| v.strip_suffix('}')) {
        for pair in inner.split(',') {
            if let Some((key, val)) = pair.split_once('=') {
                let key = key.trim();
                if key.is_empty() {
                    continue;
                }
                map.insert(key.to_string(), strip_quotes(val).to_string());
            }
        }
    }
    map
}

/// Extract every UUID occurring in a field value, whatever the surrounding
/// literal syntax (`[u1, u2]`, bare, comma- or space-separated).
pub fn extract_uuids(value: &str) -> Vec<String> {
    UUID_REGEX
        .find_iter(value)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// A scalar column that the switch renders as `[]` when unset.
pub fn optional_scalar(value: &str) -> Option<String> {
    let value = strip_quotes(value);
    if value.is_empty() || value == "[]" {
        None
    } else {
        Some(value.to_string())
    }
}

/// Port node of the `ovs-vsctl show` tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowPort {
    pub name: String,
    pub interfaces: Vec<String>,
}

/// Bridge node of the `ovs-vsctl show` tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowBridge {
    pub name: String,
    pub ports: Vec<ShowPort>,
}

/// Parse the `ovs-vsctl show` tree into bridges, ports and interface names,
/// preserving source order. Child lines belong to the most recently opened
/// block; a `Port` line with no open bridge, or an `Interface` line with no
/// open port, is ignored rather than misattributed. All other lines
/// (options, tags, the ovs_version trailer) are ignored.
pub fn parse_show_tree(output: &str) -> Vec<ShowBridge> {
    let mut bridges: Vec<ShowBridge> = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Bridge ") {
            bridges.push(ShowBridge {
                name: strip_quotes(rest).to_string(),
                ports: Vec::new(),
            });
        } else if let Some(rest) = line.strip_prefix("Port ") {
            if let Some(bridge) = bridges.last_mut() {
                bridge.ports.push(ShowPort {
                    name: strip_quotes(rest).to_string(),
                    interfaces: Vec::new(),
                });
            }
        } else if let Some(rest) = line.strip_prefix("Interface ") {
            if let Some(port) = bridges.last_mut().and_then(|b| b.ports.last_mut()) {
                port.interfaces.push(strip_quotes(rest).to_string());
            }
        }
    }

    bridges
}

/// Port name -> owning bridge name, derived from the show tree.
pub fn port_bridge_map(bridges: &[ShowBridge]) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for bridge in bridges {
        for port in &bridge.ports {
            map.insert(port.name.clone(), bridge.name.clone());
        }
    }
    map
}

/// Parse `ovs-vsctl list port` output into (name, uuid) rows in source order.
pub fn parse_port_rows(output: &str) -> Vec<(String, String)> {
    parse_record_blocks(output)
        .into_iter()
        .filter_map(|record| {
            let name = record.get("name").map(|n| strip_quotes(n).to_string())?;
            let uuid = record.get("_uuid").cloned()?;
            Some((name, uuid))
        })
        .collect()
}

/// Port UUID -> port name, from `ovs-vsctl list port` output.
pub fn parse_port_name_map(output: &str) -> BTreeMap<String, String> {
    parse_port_rows(output)
        .into_iter()
        .map(|(name, uuid)| (uuid, name))
        .collect()
}

/// Interface name -> kind, from `ovs-vsctl --columns=name,type list
/// interface` output. An empty type column falls back to the
/// name-convention kind.
pub fn parse_interface_kinds(output: &str) -> BTreeMap<String, PortKind> {
    let mut kinds = BTreeMap::new();
    for record in parse_record_blocks(output) {
        let Some(name) = record.get("name").map(|n| strip_quotes(n).to_string()) else {
            continue;
        };
        let ovs_type = record
            .get("type")
            .map(|t| strip_quotes(t).to_string())
            .unwrap_or_default();
        kinds.insert(name.clone(), PortKind::from_ovs_type(&ovs_type, &name));
    }
    kinds
}

/// Mirror UUID -> bridge name, from the `mirrors` column of
/// `ovs-vsctl list bridge` output. This is the authoritative (tier-1)
/// source for mirror ownership.
pub fn parse_bridge_mirror_map(output: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for record in parse_record_blocks(output) {
        let Some(bridge) = record.get("name").map(|n| strip_quotes(n).to_string()) else {
            continue;
        };
        if let Some(mirrors) = record.get("mirrors") {
            for uuid in extract_uuids(mirrors) {
                map.insert(uuid, bridge.clone());
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW_OUTPUT: &str = r#"59b27047-d01e-4d94-9d75-3d36a0fbb974
    Bridge "vmbr0"
        Port "vmbr0"
            Interface "vmbr0"
                type: internal
        Port "tap101i0"
            Interface "tap101i0"
    Bridge vmbr1
        Port bond0
            Interface eno1
            Interface eno2
        Port vmbr1
            Interface vmbr1
                type: internal
    ovs_version: "2.17.7"
"#;

    #[test]
    fn test_parse_record_dump() {
        let output = "_uuid               : 8b5cdd6e-31a5-4bd5-b0a5-1d26ac5d4f38\nname                : \"m0\"\nselect_all          : false";
        let record = parse_record_dump(output);
        assert_eq!(record["_uuid"], "8b5cdd6e-31a5-4bd5-b0a5-1d26ac5d4f38");
        assert_eq!(record["name"], "\"m0\"");
        assert_eq!(record["select_all"], "false");
    }

    #[test]
    fn test_parse_record_dump_duplicate_key_last_wins() {
        let record = parse_record_dump("name : a\nname : b");
        assert_eq!(record["name"], "b");
    }

    #[test]
    fn test_parse_record_dump_skips_malformed_lines() {
        let record = parse_record_dump("garbage line\nname : ok\n== also garbage ==");
        assert_eq!(record.len(), 1);
        assert_eq!(record["name"], "ok");
    }

    #[test]
    fn test_parse_record_blocks() {
        let output = "name : a\n_uuid : u1\n\nname : b\n_uuid : u2\n";
        let blocks = parse_record_blocks(output);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["name"], "a");
        assert_eq!(blocks[1]["_uuid"], "u2");
    }

    #[test]
    fn test_parse_array_literal() {
        assert_eq!(parse_array_literal("[a, b]"), vec!["a", "b"]);
        assert_eq!(
            parse_array_literal(r#"["10.0.0.1:2055", "10.0.0.2:2055"]"#),
            vec!["10.0.0.1:2055", "10.0.0.2:2055"]
        );
    }

    #[test]
    fn test_parse_array_literal_empty_is_empty_list() {
        assert!(parse_array_literal("[]").is_empty());
        assert!(parse_array_literal("").is_empty());
        assert!(parse_array_literal("not-an-array").is_empty());
    }

    #[test]
    fn test_parse_set_literal() {
        let map = parse_set_literal("{rx_bytes=1024, tx_bytes=2048}");
        assert_eq!(map["rx_bytes"], "1024");
        assert_eq!(map["tx_bytes"], "2048");
        assert!(parse_set_literal("{}").is_empty());
        assert!(parse_set_literal("plain").is_empty());
    }

    #[test]
    fn test_optional_scalar() {
        assert_eq!(optional_scalar("[]"), None);
        assert_eq!(optional_scalar(""), None);
        assert_eq!(optional_scalar("\"up\""), Some("up".to_string()));
        assert_eq!(optional_scalar("1500"), Some("1500".to_string()));
    }

    #[test]
    fn test_parse_show_tree_structure() {
        let bridges = parse_show_tree(SHOW_OUTPUT);
        assert_eq!(bridges.len(), 2);

        assert_eq!(bridges[0].name, "vmbr0");
        assert_eq!(bridges[0].ports.len(), 2);
        assert_eq!(bridges[0].ports[0].name, "vmbr0");
        assert_eq!(bridges[0].ports[1].name, "tap101i0");
        assert_eq!(bridges[0].ports[1].interfaces, vec!["tap101i0"]);

        assert_eq!(bridges[1].name, "vmbr1");
        assert_eq!(bridges[1].ports[0].name, "bond0");
        assert_eq!(bridges[1].ports[0].interfaces, vec!["eno1", "eno2"]);
    }

    #[test]
    fn test_parse_show_tree_ignores_orphan_lines() {
        // Port/Interface lines before any bridge must not invent records
        let output = "Port stray\nInterface stray\nBridge br0\n    Port p0\n        Interface p0\n";
        let bridges = parse_show_tree(output);
        assert_eq!(bridges.len(), 1);
        assert_eq!(bridges[0].ports.len(), 1);
    }

    #[test]
    fn test_port_bridge_map() {
        let bridges = parse_show_tree(SHOW_OUTPUT);
        let map = port_bridge_map(&bridges);
        assert_eq!(map["tap101i0"], "vmbr0");
        assert_eq!(map["bond0"], "vmbr1");
    }

    #[test]
    fn test_parse_port_rows_preserves_order() {
        let output = "\
_uuid               : 11111111-2222-3333-4444-555555555555
name                : \"zz-last\"

_uuid               : 66666666-7777-8888-9999-aaaaaaaaaaaa
name                : \"aa-first\"
";
        let rows = parse_port_rows(output);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "zz-last");
        assert_eq!(rows[1].0, "aa-first");
    }

    #[test]
    fn test_parse_interface_kinds() {
        let output = "\
name                : \"vmbr0\"
type                : internal

name                : \"tap101i0\"
type                : \"\"

name                : \"vx0\"
type                : vxlan

name                : \"eno1\"
type                : \"\"
";
        let kinds = parse_interface_kinds(output);
        assert_eq!(kinds["vmbr0"], PortKind::Internal);
        assert_eq!(kinds["tap101i0"], PortKind::Tap);
        assert_eq!(kinds["vx0"], PortKind::Vxlan);
        assert_eq!(kinds["eno1"], PortKind::System);
    }

    #[test]
    fn test_parse_bridge_mirror_map() {
        let output = "\
name                : \"vmbr0\"
mirrors             : [8b5cdd6e-31a5-4bd5-b0a5-1d26ac5d4f38]

name                : \"vmbr1\"
mirrors             : []
";
        let map = parse_bridge_mirror_map(output);
        assert_eq!(map.len(), 1);
        assert_eq!(map["8b5cdd6e-31a5-4bd5-b0a5-1d26ac5d4f38"], "vmbr0");
    }

    #[test]
    fn test_extract_uuids() {
        let uuids = extract_uuids("[8b5cdd6e-31a5-4bd5-b0a5-1d26ac5d4f38, 59b27047-d01e-4d94-9d75-3d36a0fbb974]");
        assert_eq!(uuids.len(), 2);
        assert!(extract_uuids("[]").is_empty());
    }
}
