//! procd init scripts and the combined watchdog script.

use crate::config::{Profile, ProxiesInfo};
use crate::topology::{Backend, ProxyKind, Topology};

/// One init.d service: a proxy together with the backend whose binary it runs.
///
/// The `relayUDP` shell runs the same binary as its backend, so stopping one
/// service through `service_stop` also stops the other. Both names come from
/// `proxiesInfo` and are left as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceUnit {
    pub proxy: ProxyKind,
    pub backend: Backend,
}

impl ServiceUnit {
    pub fn service_name<'a>(&self, proxies: &'a ProxiesInfo) -> &'a str {
        proxies.service_name(self.proxy, self.backend)
    }

    pub fn bin_name<'a>(&self, proxies: &'a ProxiesInfo) -> &'a str {
        proxies.bin_name(self.proxy, self.backend)
    }
}

/// Services the profile runs, in watchdog order.
pub fn active_units(profile: &Profile) -> Vec<ServiceUnit> {
    let topology: Topology = profile.proxies;
    let backend = topology.backend();

    ProxyKind::ALL
        .into_iter()
        .filter(|&proxy| match proxy {
            ProxyKind::TunnelDns => profile.enable_tunnel_dns,
            ProxyKind::RelayUdp => profile.enable_relay_udp,
            other => topology.runs(other),
        })
        .map(|proxy| ServiceUnit { proxy, backend })
        .collect()
}

/// Every service a router could ever need, shells once per backend.
pub fn all_units() -> Vec<ServiceUnit> {
    let mut units = Vec::new();
    for proxy in ProxyKind::ALL {
        if proxy.is_shell() {
            units.extend(Backend::ALL.into_iter().map(|backend| ServiceUnit { proxy, backend }));
        } else {
            let backend = match proxy {
                ProxyKind::ShadowsocksR => Backend::ShadowsocksR,
                _ => Backend::Shadowsocks,
            };
            units.push(ServiceUnit { proxy, backend });
        }
    }
    units
}

pub fn init_script(unit: ServiceUnit, proxies: &ProxiesInfo, remote_cfg_dir: &str) -> String {
    let bin_path = format!("/usr/bin/{}", unit.bin_name(proxies));
    let cfg_path = format!("{}/{}", remote_cfg_dir, proxies.cfg_name(unit.proxy));

    format!(
        "#!/bin/sh /etc/rc.common\n\
         # Copyright (C) 2006-2011 OpenWrt.org\n\
         START=95\n\
         SERVICE_USE_PID=1\n\
         SERVICE_WRITE_PID=1\n\
         SERVICE_DAEMONIZE=1\n\
         start() {{\n    service_start {bin} -c {cfg}\n}}\n\
         stop() {{\n    service_stop {bin}\n}}\n",
        bin = bin_path,
        cfg = cfg_path,
    )
}

fn watchdog_check(unit: ServiceUnit, proxies: &ProxiesInfo) -> String {
    // `-[c]` keeps grep from matching its own command line
    format!(
        "output=$(ps -w| grep \"{} -[c] .*{}\")\n\
         if [ -z \"$output\" ];then\n  /etc/init.d/{} restart\nfi\n",
        unit.bin_name(proxies),
        proxies.cfg_name(unit.proxy),
        unit.service_name(proxies),
    )
}

/// Cron-driven script restarting any active service whose process is gone.
pub fn watchdog_script(units: &[ServiceUnit], proxies: &ProxiesInfo) -> String {
    let mut out = String::from("#!/bin/sh\n");
    for unit in units {
        out.push('\n');
        out.push_str(&watchdog_check(*unit, proxies));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(topology: Topology, tunnel_dns: bool, relay_udp: bool) -> Profile {
        Profile {
            proxies: topology,
            enable_tunnel_dns: tunnel_dns,
            enable_relay_udp: relay_udp,
            ..Default::default()
        }
    }

    fn kinds(units: &[ServiceUnit]) -> Vec<ProxyKind> {
        units.iter().map(|u| u.proxy).collect()
    }

    #[test]
    fn test_active_units_plain() {
        let units = active_units(&profile(Topology::Shadowsocks, false, false));
        assert_eq!(kinds(&units), vec![ProxyKind::Shadowsocks]);
    }

    #[test]
    fn test_active_units_order_with_addons() {
        let units = active_units(&profile(Topology::ShadowsocksROverKcptun, true, true));
        assert_eq!(
            kinds(&units),
            vec![
                ProxyKind::TunnelDns,
                ProxyKind::RelayUdp,
                ProxyKind::Kcptun,
                ProxyKind::ShadowsocksR,
            ]
        );
        assert!(units.iter().all(|u| u.backend == Backend::ShadowsocksR));
    }

    #[test]
    fn test_shells_borrow_backend_names() {
        let proxies = ProxiesInfo::default();
        let unit = ServiceUnit {
            proxy: ProxyKind::TunnelDns,
            backend: Backend::ShadowsocksR,
        };
        assert_eq!(unit.service_name(&proxies), "ssr-tunnel-dns");
        assert_eq!(unit.bin_name(&proxies), "ssr-tunnel");
    }

    #[test]
    fn test_all_units_covers_both_backends() {
        let proxies = ProxiesInfo::default();
        let names: Vec<&str> = all_units().iter().map(|u| u.service_name(&proxies)).collect();
        assert_eq!(
            names,
            vec![
                "ss-tunnel-dns",
                "ssr-tunnel-dns",
                "ss-relay-udp",
                "ssr-relay-udp",
                "kcptun",
                "shadowsocksr",
                "shadowsocks",
            ]
        );
    }

    #[test]
    fn test_init_script() {
        let proxies = ProxiesInfo::default();
        let unit = ServiceUnit {
            proxy: ProxyKind::Shadowsocks,
            backend: Backend::Shadowsocks,
        };
        let script = init_script(unit, &proxies, "/etc/vrouter");
        assert_eq!(
            script,
            "#!/bin/sh /etc/rc.common\n\
             # Copyright (C) 2006-2011 OpenWrt.org\n\
             START=95\n\
             SERVICE_USE_PID=1\n\
             SERVICE_WRITE_PID=1\n\
             SERVICE_DAEMONIZE=1\n\
             start() {\n    service_start /usr/bin/ss-redir -c /etc/vrouter/ss-client.json\n}\n\
             stop() {\n    service_stop /usr/bin/ss-redir\n}\n"
        );
    }

    #[test]
    fn test_relay_udp_shares_backend_binary() {
        let proxies = ProxiesInfo::default();
        let relay = ServiceUnit {
            proxy: ProxyKind::RelayUdp,
            backend: Backend::Shadowsocks,
        };
        let script = init_script(relay, &proxies, "/etc/vrouter");
        assert!(script.contains("service_start /usr/bin/ss-redir -c /etc/vrouter/relay-udp.json"));
        assert!(script.contains("service_stop /usr/bin/ss-redir\n"));
    }

    #[test]
    fn test_watchdog_script() {
        let proxies = ProxiesInfo::default();
        let units = active_units(&profile(Topology::ShadowsocksOverKcptun, true, false));
        let script = watchdog_script(&units, &proxies);

        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("output=$(ps -w| grep \"ss-tunnel -[c] .*tunnel-dns.json\")"));
        assert!(script.contains("output=$(ps -w| grep \"kcptun -[c] .*kt-client.json\")"));
        assert!(script.contains("  /etc/init.d/shadowsocks restart\n"));
        assert_eq!(script.matches("restart").count(), 3);
        assert!(!script.contains("ssr"));
    }
}
