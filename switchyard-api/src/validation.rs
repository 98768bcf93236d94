///! Input validation for bridge and network parameters

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use regex::Regex;
use switchyard_common::Error;

pub const MIN_MTU: u32 = 576;
pub const MAX_MTU: u32 = 9000;

/// Host naming rules: leading letter, then letters, digits or underscores.
/// No hyphens, matching what the host's network tooling accepts.
static BRIDGE_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*$").unwrap());

pub type ValidationResult<T> = Result<T, Error>;

pub fn validate_bridge_name(name: &str) -> ValidationResult<()> {
    if !BRIDGE_NAME_REGEX.is_match(name) {
        return Err(Error::Validation(format!(
            "Invalid bridge name '{}'. Bridge names must start with a letter and may only \
             contain letters, numbers, and underscores. Examples: vmbr1, ovsbr0, mybridge_1",
            name
        )));
    }
    Ok(())
}

pub fn validate_ip_address(address: &str, ipv6: bool) -> ValidationResult<()> {
    let valid = if ipv6 {
        address.parse::<Ipv6Addr>().is_ok()
    } else {
        address.parse::<Ipv4Addr>().is_ok()
    };
    if !valid {
        return Err(Error::Validation(format!(
            "Invalid {} address '{}'",
            if ipv6 { "IPv6" } else { "IPv4" },
            address
        )));
    }
    Ok(())
}

pub fn validate_cidr(cidr: &str, ipv6: bool) -> ValidationResult<()> {
    let err = || {
        Error::Validation(format!(
            "Invalid CIDR '{}'. Expected forms like {}",
            cidr,
            if ipv6 { "fd00::1/64" } else { "192.168.1.1/24" }
        ))
    };

    let (address, prefix) = cidr.split_once('/').ok_or_else(err)?;
    let prefix: u8 = prefix.parse().map_err(|_| err())?;
    let max_prefix = if ipv6 { 128 } else { 32 };
    if prefix > max_prefix {
        return Err(err());
    }
    validate_ip_address(address, ipv6).map_err(|_| err())?;
    Ok(())
}

pub fn validate_mtu(mtu: u32) -> ValidationResult<()> {
    if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
        return Err(Error::Validation(format!(
            "Invalid MTU {}. Must be between {} and {} (standard Ethernet: 1500, jumbo: 9000)",
            mtu, MIN_MTU, MAX_MTU
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_names() {
        assert!(validate_bridge_name("vmbr0").is_ok());
        assert!(validate_bridge_name("ovsbr_lab1").is_ok());
        assert!(validate_bridge_name("br-lan").is_err());
        assert!(validate_bridge_name("0br").is_err());
        assert!(validate_bridge_name("").is_err());
    }

    #[test]
    fn test_ip_addresses() {
        assert!(validate_ip_address("10.0.0.1", false).is_ok());
        assert!(validate_ip_address("10.0.0.256", false).is_err());
        assert!(validate_ip_address("fe80::1", true).is_ok());
        assert!(validate_ip_address("fe80::zz", true).is_err());
    }

    #[test]
    fn test_cidrs() {
        assert!(validate_cidr("192.168.1.1/24", false).is_ok());
        assert!(validate_cidr("192.168.1.1/33", false).is_err());
        assert!(validate_cidr("192.168.1.1", false).is_err());
        assert!(validate_cidr("fd00::1/64", true).is_ok());
        assert!(validate_cidr("fd00::1/129", true).is_err());
    }

    #[test]
    fn test_mtu_bounds() {
        assert!(validate_mtu(1500).is_ok());
        assert!(validate_mtu(9000).is_ok());
        assert!(validate_mtu(575).is_err());
        assert!(validate_mtu(9001).is_err());
    }
}
