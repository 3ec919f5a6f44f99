// beacongraph/src/subnet.rs
//
// IPv4 subnet handling for the analyze() entry point: a "user" argument
// ending in zero octets denotes a subnet and expands to every known user
// address inside it. `0.0.0.0` selects every user.

use std::net::Ipv4Addr;

/// True when the address parses as IPv4 and ends in at least one zero
/// octet, i.e. denotes a subnet rather than a single user.
pub fn is_subnet(addr: &str) -> bool {
    match addr.parse::<Ipv4Addr>() {
        Ok(ip) => ip.octets()[3] == 0,
        Err(_) => false,
    }
}

/// Prefix string shared by all addresses in the subnet: trailing zero
/// octets are stripped, the rest keeps its dotted form. `0.0.0.0` yields
/// the empty prefix (matches everything).
fn subnet_prefix(subnet: &str) -> String {
    let octets: Vec<&str> = subnet.split('.').collect();
    let last_nonzero = octets.iter().rposition(|o| *o != "0");
    match last_nonzero {
        Some(i) => {
            let mut prefix = octets[..=i].join(".");
            prefix.push('.');
            prefix
        }
        None => String::new(),
    }
}

/// Every known user address inside the subnet.
pub fn users_in_subnet(subnet: &str, all_users: &[String]) -> Vec<String> {
    let prefix = subnet_prefix(subnet);
    all_users
        .iter()
        .filter(|u| u.starts_with(&prefix))
        .cloned()
        .collect()
}

/// Enumerate every subnet covering at least one known user, `0.0.0.0`
/// included, sorted in address order.
pub fn all_subnets(all_users: &[String]) -> Vec<String> {
    let mut subnets: Vec<String> = vec!["0.0.0.0".to_string()];
    for user in all_users {
        let Ok(ip) = user.parse::<Ipv4Addr>() else {
            continue;
        };
        let o = ip.octets();
        for cut in 1..4 {
            let mut masked = [0u8; 4];
            masked[..cut].copy_from_slice(&o[..cut]);
            let subnet = Ipv4Addr::from(masked).to_string();
            if !subnets.contains(&subnet) {
                subnets.push(subnet);
            }
        }
    }
    sort_ips(&mut subnets);
    subnets
}

/// Sort dotted addresses numerically; unparseable entries go last.
pub fn sort_ips(addrs: &mut [String]) {
    addrs.sort_by_key(|a| {
        a.parse::<Ipv4Addr>()
            .map(|ip| u32::from(ip) as u64)
            .unwrap_or(u64::MAX)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Vec<String> {
        ["10.0.0.1", "10.0.0.7", "10.0.1.3", "192.168.4.2"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn subnet_detection() {
        assert!(is_subnet("10.0.0.0"));
        assert!(is_subnet("10.0.1.0"));
        assert!(is_subnet("0.0.0.0"));
        assert!(!is_subnet("10.0.0.1"));
        assert!(!is_subnet("not-an-ip"));
    }

    #[test]
    fn expansion_matches_prefix() {
        assert_eq!(
            users_in_subnet("10.0.0.0", &users()),
            vec!["10.0.0.1", "10.0.0.7"]
        );
        assert_eq!(users_in_subnet("0.0.0.0", &users()).len(), 4);
        // Inner zero octets stay significant.
        assert_eq!(users_in_subnet("10.0.1.0", &users()), vec!["10.0.1.3"]);
    }

    #[test]
    fn subnet_enumeration_covers_users_and_sorts() {
        let subnets = all_subnets(&users());
        assert_eq!(subnets[0], "0.0.0.0");
        assert!(subnets.contains(&"10.0.0.0".to_string()));
        assert!(subnets.contains(&"10.0.1.0".to_string()));
        assert!(subnets.contains(&"192.168.4.0".to_string()));
        let mut sorted = subnets.clone();
        sort_ips(&mut sorted);
        assert_eq!(subnets, sorted);
    }

    #[test]
    fn ip_sort_is_numeric_not_lexicographic() {
        let mut addrs = vec![
            "10.0.0.12".to_string(),
            "10.0.0.2".to_string(),
            "9.0.0.1".to_string(),
        ];
        sort_ips(&mut addrs);
        assert_eq!(addrs, vec!["9.0.0.1", "10.0.0.2", "10.0.0.12"]);
    }
}
