///! Block edits of the host's /etc/network/interfaces text
///!
///! Both operations are pure text transforms: they know nothing about the
///! live switch state, and callers are responsible for sequencing the live
///! create/delete around the file edit (snapshot first, revert the live
///! change if the edit fails, write the whole file back in one piece).
///!
///! The stanza format is the one the host's own tooling writes: optional
///! `auto <name>`, an `iface <name> inet static|manual` header, 8-space
///! indented body lines, and a single-`#` comment line placed after the
///! block rather than inside it.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

static IFACE_STATIC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^iface\s+(\S+)\s+inet\s+static\b").unwrap());

static ADDRESS_CIDR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^address\s+(\d+)\.(\d+)\.(\d+)\.(\d+)/(\d+)\b").unwrap());

/// Everything that goes into one bridge stanza.
#[derive(Debug, Clone, Default)]
pub struct BridgeStanza {
    pub name: String,
    pub ipv4_cidr: Option<String>,
    pub ipv4_gateway: Option<String>,
    pub ipv6_cidr: Option<String>,
    pub ipv6_gateway: Option<String>,
    /// Space-separated member ports, e.g. "eth1 eth2"
    pub ports: Option<String>,
    pub mtu: Option<u32>,
    pub ovs_options: Option<String>,
    pub comment: Option<String>,
    pub autostart: bool,
}

/// Append a bridge stanza to the interfaces text.
///
/// Additive only: the existing content is carried over byte-for-byte and the
/// stanza is appended with a blank line before and after it. The inverse of
/// this operation is [`remove_bridge_stanza`]; applying it to the result
/// restores the input exactly.
pub fn append_bridge_stanza(current: &str, stanza: &BridgeStanza) -> String {
    let mut lines: Vec<String> = Vec::new();

    if stanza.autostart {
        lines.push(format!("auto {}", stanza.name));
    }

    if let Some(cidr) = &stanza.ipv4_cidr {
        lines.push(format!("iface {} inet static", stanza.name));
        lines.push(format!("        address {}", cidr));
        if let Some(gateway) = &stanza.ipv4_gateway {
            lines.push(format!("        gateway {}", gateway));
        }
    } else {
        lines.push(format!("iface {} inet manual", stanza.name));
    }

    lines.push("        ovs_type OVSBridge".to_string());
    if let Some(ports) = &stanza.ports {
        lines.push(format!("        ovs_ports {}", ports));
    }
    if let Some(mtu) = stanza.mtu {
        if mtu != 1500 {
            lines.push(format!("        ovs_mtu {}", mtu));
        }
    }
    if let Some(options) = &stanza.ovs_options {
        lines.push(format!("        ovs_options {}", options));
    }

    if let Some(cidr) = &stanza.ipv6_cidr {
        lines.push(format!("iface {} inet6 static", stanza.name));
        lines.push(format!("        address {}", cidr));
        if let Some(gateway) = &stanza.ipv6_gateway {
            lines.push(format!("        gateway {}", gateway));
        }
    }

    // The comment goes after the block, never inside it.
    if let Some(comment) = &stanza.comment {
        lines.push(format!("#{}", comment));
    }

    let mut out = String::with_capacity(current.len() + 64 + lines.iter().map(|l| l.len() + 1).sum::<usize>());
    out.push_str(current);
    if !current.is_empty() && !current.ends_with('\n') {
        out.push('\n');
    }
    if !current.is_empty() {
        out.push('\n');
    }
    for line in &lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Remove the named bridge's stanza from the interfaces text.
///
/// A single left-to-right scan: the block starts at `auto <name>` or
/// `iface <name> ...`, its body is every subsequent indented line, and
/// immediately after the body at most one single-`#` comment line (never a
/// `##` line) plus the blank lines around it are consumed. Lookahead decides
/// whether a blank line still belongs to the block or already to the next
/// stanza. Every other line is copied unchanged, in order. If the stanza is
/// not present the input comes back unchanged, so re-running a delete
/// against already-clean state is a no-op.
pub fn remove_bridge_stanza(name: &str, current: &str) -> String {
    let lines: Vec<&str> = current.split('\n').collect();
    let auto_line = format!("auto {}", name);
    let iface_prefix = format!("iface {} ", name);

    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    let mut in_block = false;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let stripped = line.trim();

        if stripped == auto_line || stripped.starts_with(&iface_prefix) {
            in_block = true;
            i += 1;
            continue;
        }

        if in_block {
            if line.starts_with(' ') || line.starts_with('\t') {
                // block body
                i += 1;
                continue;
            } else if stripped.starts_with('#') && !stripped.starts_with("##") {
                // the stanza's trailing comment, plus the spacing after it
                i += 1;
                while i < lines.len() && lines[i].trim().is_empty() {
                    i += 1;
                }
                in_block = false;
                continue;
            } else if stripped.is_empty() {
                let mut peek = i + 1;
                while peek < lines.len() && lines[peek].trim().is_empty() {
                    peek += 1;
                }
                if peek < lines.len() {
                    let next = lines[peek];
                    let next_stripped = next.trim();
                    let continues_block = next.starts_with(' ')
                        || next.starts_with('\t')
                        || next_stripped.starts_with(&iface_prefix)
                        || (next_stripped.starts_with('#') && !next_stripped.starts_with("##"));
                    if continues_block {
                        // spacing inside the block, keep consuming
                        i += 1;
                        continue;
                    }
                    // the next stanza begins; this blank closes the block
                    in_block = false;
                    i += 1;
                    continue;
                }
                // only blank lines remain, they are the block's tail spacing
                while i < lines.len() && lines[i].trim().is_empty() {
                    i += 1;
                }
                in_block = false;
                continue;
            } else {
                // non-indented content: the block ended before this line
                in_block = false;
            }
        }

        kept.push(line);
        i += 1;
    }

    kept.join("\n")
}

/// Extract the administratively configured subnet per bridge from the
/// interfaces text. Only `iface <name> inet static` stanzas carry an
/// address; bridges without one are simply absent from the map.
///
/// The address is normalized to its network form by exact octet truncation
/// for /8, /16 and /24 prefixes. Other prefix lengths pass through
/// unnormalized; full netmask arithmetic is intentionally not applied so the
/// output matches what the host tooling reports.
pub fn bridge_cidr_map(text: &str) -> BTreeMap<String, String> {
    let lines: Vec<&str> = text.lines().collect();
    let mut map = BTreeMap::new();

    for (i, line) in lines.iter().enumerate() {
        let stripped = line.trim();
        if stripped.starts_with('#') {
            continue;
        }
        let Some(caps) = IFACE_STATIC_REGEX.captures(stripped) else {
            continue;
        };
        let bridge = caps[1].to_string();

        for next in &lines[i + 1..] {
            let next = next.trim();
            if next.is_empty() || next.starts_with('#') {
                continue;
            }
            if next.starts_with("iface ") || next.starts_with("auto ") {
                break;
            }
            if let Some(addr) = ADDRESS_CIDR_REGEX.captures(next) {
                let octets = [&addr[1], &addr[2], &addr[3], &addr[4]];
                let prefix = &addr[5];
                map.insert(bridge.clone(), normalize_cidr(&octets, prefix));
                break;
            }
        }
    }

    map
}

/// Find the interface that already owns a default gateway, if any. Used to
/// refuse a second gateway before it causes routing conflicts on the host.
pub fn find_default_gateway(text: &str) -> Option<String> {
    let mut current_iface: Option<String> = None;
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("iface ") {
            current_iface = rest.split_whitespace().next().map(|s| s.to_string());
        } else if line.starts_with("gateway ") {
            if let Some(iface) = &current_iface {
                return Some(iface.clone());
            }
        }
    }
    None
}

fn normalize_cidr(octets: &[&str; 4], prefix: &str) -> String {
    match prefix {
        "24" => format!("{}.{}.{}.0/24", octets[0], octets[1], octets[2]),
        "16" => format!("{}.{}.0.0/16", octets[0], octets[1]),
        "8" => format!("{}.0.0.0/8", octets[0]),
        _ => format!("{}.{}.{}.{}/{}", octets[0], octets[1], octets[2], octets[3], prefix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "\
auto lo
iface lo inet loopback

auto eno1
iface eno1 inet manual
";

    fn full_stanza() -> BridgeStanza {
        BridgeStanza {
            name: "vmbr2".to_string(),
            ipv4_cidr: Some("10.10.10.1/24".to_string()),
            ipv4_gateway: Some("10.10.10.254".to_string()),
            ipv6_cidr: Some("fd00::1/64".to_string()),
            ipv6_gateway: Some("fd00::ff".to_string()),
            ports: Some("eno1 eno2".to_string()),
            mtu: Some(9000),
            ovs_options: Some("tag=100".to_string()),
            comment: Some("lab uplink".to_string()),
            autostart: true,
        }
    }

    #[test]
    fn test_append_emits_canonical_stanza() {
        let text = append_bridge_stanza(BASE, &full_stanza());
        assert!(text.contains("auto vmbr2\n"));
        assert!(text.contains("iface vmbr2 inet static\n"));
        assert!(text.contains("        address 10.10.10.1/24\n"));
        assert!(text.contains("        gateway 10.10.10.254\n"));
        assert!(text.contains("        ovs_type OVSBridge\n"));
        assert!(text.contains("        ovs_ports eno1 eno2\n"));
        assert!(text.contains("        ovs_mtu 9000\n"));
        assert!(text.contains("        ovs_options tag=100\n"));
        assert!(text.contains("iface vmbr2 inet6 static\n"));
        assert!(text.contains("        address fd00::1/64\n"));
        // comment sits after the block, not inside it
        assert!(text.contains("fd00::ff\n#lab uplink\n"));
    }

    #[test]
    fn test_append_manual_without_address() {
        let stanza = BridgeStanza {
            name: "vmbr3".to_string(),
            autostart: true,
            ..Default::default()
        };
        let text = append_bridge_stanza(BASE, &stanza);
        assert!(text.contains("iface vmbr3 inet manual\n"));
        assert!(!text.contains("address"));
        // default MTU is not written out
        assert!(!text.contains("ovs_mtu"));
    }

    #[test]
    fn test_append_never_touches_existing_bytes() {
        let text = append_bridge_stanza(BASE, &full_stanza());
        assert!(text.starts_with(BASE));
    }

    #[test]
    fn test_roundtrip_all_field_combinations() {
        let toggles = [false, true];
        for &with_addr in &toggles {
            for &with_gw in &toggles {
                for &with_v6 in &toggles {
                    for &with_ports in &toggles {
                        for &with_comment in &toggles {
                            for &auto in &toggles {
                                let stanza = BridgeStanza {
                                    name: "vmbr9".to_string(),
                                    ipv4_cidr: with_addr.then(|| "192.168.7.1/24".to_string()),
                                    ipv4_gateway: with_gw.then(|| "192.168.7.254".to_string()),
                                    ipv6_cidr: with_v6.then(|| "fd00::1/64".to_string()),
                                    ipv6_gateway: None,
                                    ports: with_ports.then(|| "eno3".to_string()),
                                    mtu: Some(1500),
                                    ovs_options: None,
                                    comment: with_comment.then(|| "c".to_string()),
                                    autostart: auto,
                                };
                                let appended = append_bridge_stanza(BASE, &stanza);
                                let restored = remove_bridge_stanza("vmbr9", &appended);
                                assert_eq!(restored, BASE, "stanza: {:?}", stanza);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_roundtrip_sequential_appends() {
        let one = append_bridge_stanza(BASE, &full_stanza());
        let mut second = full_stanza();
        second.name = "vmbr5".to_string();
        let two = append_bridge_stanza(&one, &second);

        assert_eq!(remove_bridge_stanza("vmbr5", &two), one);
    }

    #[test]
    fn test_remove_keeps_sibling_stanza_intact() {
        let with_zero = append_bridge_stanza(
            BASE,
            &BridgeStanza {
                name: "vmbr0".to_string(),
                ipv4_cidr: Some("10.0.0.1/24".to_string()),
                comment: Some("zero".to_string()),
                autostart: true,
                ..Default::default()
            },
        );
        let with_both = append_bridge_stanza(
            &with_zero,
            &BridgeStanza {
                name: "vmbr1".to_string(),
                comment: Some("one".to_string()),
                autostart: true,
                ..Default::default()
            },
        );

        let removed = remove_bridge_stanza("vmbr0", &with_both);
        assert!(!removed.contains("vmbr0"));
        assert!(!removed.contains("#zero"));
        assert!(removed.contains("auto vmbr1\n"));
        assert!(removed.contains("iface vmbr1 inet manual\n"));
        assert!(removed.contains("#one"));
        assert!(removed.starts_with(BASE));
    }

    #[test]
    fn test_remove_absent_stanza_is_identity() {
        assert_eq!(remove_bridge_stanza("vmbr7", BASE), BASE);
        let text = append_bridge_stanza(BASE, &full_stanza());
        let once = remove_bridge_stanza("vmbr2", &text);
        let twice = remove_bridge_stanza("vmbr2", &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_remove_matches_iface_line_without_auto() {
        let text = "iface vmbr4 inet manual\n        ovs_type OVSBridge\n\nauto eno1\niface eno1 inet manual\n";
        let removed = remove_bridge_stanza("vmbr4", text);
        assert!(!removed.contains("vmbr4"));
        assert!(removed.contains("auto eno1"));
    }

    #[test]
    fn test_remove_does_not_eat_prefix_named_bridge() {
        // vmbr1 must not match vmbr10's stanza
        let text = "auto vmbr10\niface vmbr10 inet manual\n        ovs_type OVSBridge\n";
        assert_eq!(remove_bridge_stanza("vmbr1", text), text);
    }

    #[test]
    fn test_remove_keeps_double_hash_comments() {
        let text = "## managed block marker\nauto vmbr6\niface vmbr6 inet manual\n        ovs_type OVSBridge\n## end marker\n";
        let removed = remove_bridge_stanza("vmbr6", text);
        assert!(removed.contains("## managed block marker"));
        assert!(removed.contains("## end marker"));
        assert!(!removed.contains("auto vmbr6"));
    }

    #[test]
    fn test_cidr_map_normalizes_common_prefixes() {
        let text = "\
auto vmbr0
iface vmbr0 inet static
        address 10.10.10.7/24
        ovs_type OVSBridge

auto vmbr1
iface vmbr1 inet static
        address 172.16.3.1/16
        ovs_type OVSBridge

auto vmbr2
iface vmbr2 inet static
        address 10.1.2.3/8
        ovs_type OVSBridge
";
        let map = bridge_cidr_map(text);
        assert_eq!(map["vmbr0"], "10.10.10.0/24");
        assert_eq!(map["vmbr1"], "172.16.0.0/16");
        assert_eq!(map["vmbr2"], "10.0.0.0/8");
    }

    #[test]
    fn test_cidr_map_passes_other_prefixes_through() {
        let text = "iface vmbr3 inet static\n        address 192.168.100.33/22\n";
        let map = bridge_cidr_map(text);
        // documented limitation: no netmask arithmetic outside /8, /16, /24
        assert_eq!(map["vmbr3"], "192.168.100.33/22");
    }

    #[test]
    fn test_cidr_map_skips_manual_and_comments() {
        let text = "\
# iface vmbr8 inet static
iface vmbr4 inet manual
        ovs_type OVSBridge

iface vmbr5 inet static
        # address 1.2.3.4/24 (disabled)
        address 10.0.5.1/24
";
        let map = bridge_cidr_map(text);
        assert!(!map.contains_key("vmbr4"));
        assert!(!map.contains_key("vmbr8"));
        assert_eq!(map["vmbr5"], "10.0.5.0/24");
    }

    #[test]
    fn test_find_default_gateway() {
        let text = append_bridge_stanza(BASE, &full_stanza());
        assert_eq!(find_default_gateway(&text).as_deref(), Some("vmbr2"));
        assert_eq!(find_default_gateway(BASE), None);
    }

    #[test]
    fn test_cidr_map_stops_at_next_stanza() {
        let text = "\
iface vmbr6 inet static
        ovs_type OVSBridge

auto vmbr7
iface vmbr7 inet static
        address 10.7.7.7/24
";
        let map = bridge_cidr_map(text);
        // vmbr6 has no address of its own and must not steal vmbr7's
        assert!(!map.contains_key("vmbr6"));
        assert_eq!(map["vmbr7"], "10.7.7.0/24");
    }
}
