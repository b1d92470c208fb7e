//! Northbound key parsing.
//!
//! Desired-state feed items are addressed by hierarchical keys of the form
//! `<namespace>/config/<version>/<entity-type>/<entity-name>`. The engine
//! interprets only the entity type and name; namespace and version are
//! carried through untouched. FIB entries nest under their bridge domain
//! (`.../bd/<bd>/fib/<mac>`) and routes under their VRF
//! (`.../vrf/<id>/fib/<dst>/<next-hop>`).

/// Entity type and name extracted from a feed key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKey {
    Interface(String),
    BridgeDomain(String),
    Fib {
        bridge_domain: String,
        phys_address: String,
    },
    XConnect(String),
    Acl(String),
    Route {
        vrf: u32,
        dst_network: String,
        next_hop: String,
    },
}

/// Parses a feed key, returning `None` for keys the engine does not own.
pub fn parse_key(key: &str) -> Option<EntityKey> {
    // skip "<namespace>/config/<version>/"
    let pos = key.find("/config/")?;
    let rest = &key[pos + "/config/".len()..];
    let mut parts = rest.splitn(2, '/');
    let _version = parts.next()?;
    let tail = parts.next()?;
    let segments: Vec<&str> = tail.split('/').filter(|s| !s.is_empty()).collect();

    match segments.as_slice() {
        ["interface", name] => Some(EntityKey::Interface(name.to_string())),
        ["bd", name] => Some(EntityKey::BridgeDomain(name.to_string())),
        ["bd", bd, "fib", mac] => Some(EntityKey::Fib {
            bridge_domain: bd.to_string(),
            phys_address: mac.to_string(),
        }),
        ["xconnect", rx] => Some(EntityKey::XConnect(rx.to_string())),
        ["acl", name] => Some(EntityKey::Acl(name.to_string())),
        ["vrf", vrf, "fib", route @ ..] if route.len() >= 2 => {
            let vrf = vrf.parse().ok()?;
            // the destination prefix contains a slash ("10.0.0.0/24"), the
            // last segment is the next hop
            let (nh, dst) = route.split_last()?;
            Some(EntityKey::Route {
                vrf,
                dst_network: dst.join("/"),
                next_hop: nh.to_string(),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "/dp-agent/node7/config/v1";

    #[test]
    fn test_parse_interface_key() {
        let key = format!("{}/interface/eth0", PREFIX);
        assert_eq!(
            parse_key(&key),
            Some(EntityKey::Interface("eth0".to_string()))
        );
    }

    #[test]
    fn test_parse_bridge_and_fib_keys() {
        assert_eq!(
            parse_key(&format!("{}/bd/bd1", PREFIX)),
            Some(EntityKey::BridgeDomain("bd1".to_string()))
        );
        assert_eq!(
            parse_key(&format!("{}/bd/bd1/fib/aa:bb:cc:dd:ee:01", PREFIX)),
            Some(EntityKey::Fib {
                bridge_domain: "bd1".to_string(),
                phys_address: "aa:bb:cc:dd:ee:01".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_route_key_with_prefix_slash() {
        let key = format!("{}/vrf/2/fib/10.1.0.0/16/192.168.1.1", PREFIX);
        assert_eq!(
            parse_key(&key),
            Some(EntityKey::Route {
                vrf: 2,
                dst_network: "10.1.0.0/16".to_string(),
                next_hop: "192.168.1.1".to_string(),
            })
        );
    }

    #[test]
    fn test_foreign_keys_ignored() {
        assert_eq!(parse_key("/dp-agent/node7/status/v1/interface/eth0"), None);
        assert_eq!(parse_key(&format!("{}/unknown/x", PREFIX)), None);
        assert_eq!(parse_key("garbage"), None);
    }
}
