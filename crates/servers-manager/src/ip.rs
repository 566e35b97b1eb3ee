// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Address translation for callers on different networks.
//!
//! A provisioned workload is reachable at `127.0.0.1:<game port>` on this
//! host. Callers on the same private network need the machine's LAN address
//! instead, everybody else the public one. Only the host part is rewritten;
//! the port is always preserved.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::{debug, warn};

/// Rewrites workload addresses according to the caller's origin.
#[derive(Debug, Clone, Default)]
pub struct IpTranslator {
    lan_host: Option<String>,
    wan_host: Option<String>,
}

impl IpTranslator {
    pub fn new(lan_host: Option<String>, wan_host: Option<String>) -> Self {
        Self { lan_host, wan_host }
    }

    /// Host handed to callers on the local network, if configured.
    pub fn lan_host(&self) -> Option<&str> {
        self.lan_host.as_deref()
    }

    /// Host handed to remote callers, if configured.
    pub fn wan_host(&self) -> Option<&str> {
        self.wan_host.as_deref()
    }

    /// Rewrite `address` (`host:port`) for a caller connecting from `caller`.
    ///
    /// Returns `address` unchanged when the caller is unknown, when no host is
    /// configured for the caller's side, or when `address` has no port.
    ///
    /// The local side is wider than site-local ranges alone: loopback and
    /// link-local callers also get the LAN host (see [`is_local_network`]).
    /// A caller on the same machine therefore gets `MACHINE_IP`, not
    /// `PUBLIC_IP`.
    pub fn translate(&self, address: &str, caller: Option<IpAddr>) -> String {
        let Some(caller) = caller else {
            return address.to_string();
        };

        let Some((_, port)) = address.rsplit_once(':') else {
            warn!(address, "Address has no port, leaving it untranslated");
            return address.to_string();
        };

        let target = if is_local_network(caller) {
            self.lan_host.as_deref()
        } else {
            self.wan_host.as_deref()
        };

        match target {
            Some(host) => {
                let translated = format!("{}:{port}", bracket_ipv6(host));
                debug!(%caller, from = address, to = %translated, "Translated workload address");
                translated
            }
            None => address.to_string(),
        }
    }
}

/// Whether `ip` belongs to a private, loopback or link-local network.
pub fn is_local_network(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_local_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_local_v4(v4),
            None => is_local_v6(v6),
        },
    }
}

fn is_local_v4(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local()
}

fn is_local_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    // fc00::/7 unique local, fe80::/10 link local, fec0::/10 site local
    ip.is_loopback()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
        || (first & 0xffc0) == 0xfec0
}

fn bracket_ipv6(host: &str) -> String {
    match host.parse::<Ipv6Addr>() {
        Ok(_) => format!("[{host}]"),
        Err(_) => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    fn translator() -> IpTranslator {
        IpTranslator::new(Some("192.168.1.50".to_string()), Some("8.8.4.4".to_string()))
    }

    #[test]
    fn test_lan_caller_gets_lan_host() {
        assert_eq!(
            translator().translate("127.0.0.1:8001", ip("192.168.1.50")),
            "192.168.1.50:8001"
        );
        assert_eq!(
            translator().translate("127.0.0.1:8003", ip("10.0.0.7")),
            "192.168.1.50:8003"
        );
    }

    #[test]
    fn test_same_machine_caller_gets_lan_host() {
        assert_eq!(
            translator().translate("127.0.0.1:8001", ip("127.0.0.1")),
            "192.168.1.50:8001"
        );
        assert_eq!(
            translator().translate("127.0.0.1:8001", ip("169.254.3.4")),
            "192.168.1.50:8001"
        );
    }

    #[test]
    fn test_wan_caller_gets_wan_host() {
        assert_eq!(
            translator().translate("127.0.0.1:8001", ip("8.8.8.8")),
            "8.8.4.4:8001"
        );
    }

    #[test]
    fn test_unknown_caller_keeps_address() {
        assert_eq!(translator().translate("127.0.0.1:8001", None), "127.0.0.1:8001");
    }

    #[test]
    fn test_unset_target_keeps_address() {
        let lan_only = IpTranslator::new(Some("192.168.1.50".to_string()), None);
        assert_eq!(lan_only.translate("127.0.0.1:8001", ip("8.8.8.8")), "127.0.0.1:8001");

        let wan_only = IpTranslator::new(None, Some("8.8.4.4".to_string()));
        assert_eq!(
            wan_only.translate("127.0.0.1:8001", ip("192.168.1.50")),
            "127.0.0.1:8001"
        );

        let none = IpTranslator::default();
        assert_eq!(none.translate("127.0.0.1:8001", ip("8.8.8.8")), "127.0.0.1:8001");
    }

    #[test]
    fn test_address_without_port_is_untouched() {
        assert_eq!(translator().translate("localhost", ip("8.8.8.8")), "localhost");
    }

    #[test]
    fn test_local_network_classification() {
        for local in [
            "10.1.2.3",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.0.1",
            "127.0.0.1",
            "169.254.10.10",
            "::1",
            "fd12:3456::1",
            "fe80::1",
            "::ffff:192.168.1.2",
        ] {
            assert!(is_local_network(local.parse().unwrap()), "{local}");
        }
        for remote in ["8.8.8.8", "172.32.0.1", "1.1.1.1", "2001:4860::8888", "::ffff:8.8.8.8"] {
            assert!(!is_local_network(remote.parse().unwrap()), "{remote}");
        }
    }

    #[test]
    fn test_ipv6_target_is_bracketed() {
        let translator = IpTranslator::new(None, Some("2001:db8::1".to_string()));
        assert_eq!(
            translator.translate("127.0.0.1:8001", ip("8.8.8.8")),
            "[2001:db8::1]:8001"
        );
    }
}
