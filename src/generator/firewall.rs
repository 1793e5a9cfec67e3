//! iptables script implementing the routing mode.
//!
//! Rules are appended to PREROUTING/OUTPUT and evaluated top to bottom; the
//! first `RETURN` ends evaluation for a packet, so section order decides which
//! list wins when an address appears in more than one.

use std::net::Ipv4Addr;
use tracing::debug;

use crate::config::{FirewallInfo, Mode, Profile, ProxiesInfo};
use crate::error::Result;
use crate::resolver::{resolve_host, Resolver};

pub const SCRIPT_HEADER: &str = "# generated by vrouter";
pub const TPROXY_MARK: &str = "0x01/0x01";
pub const TPROXY_ROUTE_TABLE: u32 = 100;

pub const SECTION_RESTORE: &str = "restore ipsets";
pub const SECTION_SPEEDUP_SSH: &str = "speedup server ssh connection";
pub const SECTION_BYPASS_SERVERS: &str = "bypass server ip";
pub const SECTION_BYPASS_LAN: &str = "bypass lan networks";
pub const SECTION_ROUTE_BLACKLIST: &str = "route all blacklist traffic";
pub const SECTION_BYPASS_WHITELIST: &str = "bypass whitelist";
pub const SECTION_ROUTE_OTHERS: &str = "route all other traffic";
pub const SECTION_ROUTE_ALL: &str = "route all traffic";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: &'static str,
    pub rules: Vec<String>,
}

/// Ordered firewall sections for one profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallScript {
    pub mode: Mode,
    pub sections: Vec<Section>,
}

impl FirewallScript {
    pub fn section_index(&self, title: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.title == title)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(SCRIPT_HEADER);
        out.push('\n');
        out.push_str(&format!("# workMode: {}\n", self.mode));
        for section in &self.sections {
            out.push_str(&format!("\n# {}\n", section.title));
            for rule in &section.rules {
                out.push_str(rule);
                out.push('\n');
            }
        }
        out
    }
}

/// Same rule for forwarded LAN traffic and for the router's own traffic.
fn nat_rule(rule: &str) -> [String; 2] {
    [
        format!("iptables -t nat -A PREROUTING {}", rule),
        format!("iptables -t nat -A OUTPUT {}", rule),
    ]
}

fn policy_routing() -> [String; 3] {
    [
        format!("ip rule del fwmark 1 lookup {} 2>/dev/null", TPROXY_ROUTE_TABLE),
        format!("ip rule add fwmark 1 lookup {}", TPROXY_ROUTE_TABLE),
        format!(
            "ip route add local default dev lo table {} 2>/dev/null",
            TPROXY_ROUTE_TABLE
        ),
    ]
}

pub struct FirewallCompiler<'a, R: ?Sized> {
    profile: &'a Profile,
    proxies: &'a ProxiesInfo,
    firewall: &'a FirewallInfo,
    remote_cfg_dir: &'a str,
    resolver: &'a R,
}

impl<'a, R: Resolver + ?Sized> FirewallCompiler<'a, R> {
    pub fn new(
        profile: &'a Profile,
        proxies: &'a ProxiesInfo,
        firewall: &'a FirewallInfo,
        remote_cfg_dir: &'a str,
        resolver: &'a R,
    ) -> Self {
        Self {
            profile,
            proxies,
            firewall,
            remote_cfg_dir,
            resolver,
        }
    }

    /// Local port of the TCP redirect listener.
    ///
    /// kcptun sits behind the backend, so it never receives redirected traffic.
    fn redir_port(&self) -> u16 {
        self.proxies.local_port(self.profile.proxies.backend().proxy())
    }

    fn udp_redir_port(&self) -> u16 {
        self.proxies.relay_udp.local_port
    }

    pub async fn compile(&self) -> Result<FirewallScript> {
        let redir_port = self.redir_port();
        debug!("tcp redirPort: {}", redir_port);
        debug!("udp redirPort: {}", self.udp_redir_port());

        let mut sections = vec![self.restore_section()];

        let topology = self.profile.proxies;
        if topology.uses_kcptun() && self.profile.speedup_server_ssh {
            let kt_ip = resolve_host(self.resolver, &self.profile.kcptun.server).await?;
            sections.push(Section {
                title: SECTION_SPEEDUP_SSH,
                rules: nat_rule(&format!(
                    "-d {} -p tcp --dport {} -j REDIRECT --to-port {}",
                    kt_ip, self.profile.server_ssh_port, redir_port
                ))
                .into(),
            });
        }

        sections.push(self.bypass_servers_section().await?);
        sections.push(self.bypass_set_section(SECTION_BYPASS_LAN, &self.firewall.ipset.lan_set_name));

        match self.profile.mode {
            Mode::None => {}
            Mode::Whitelist => {
                // Blacklist first so user blacklist entries beat identical whitelist ones
                sections.push(self.route_section(
                    SECTION_ROUTE_BLACKLIST,
                    Some(&self.firewall.ipset.black_set_name),
                    true,
                ));
                sections.push(self.bypass_set_section(
                    SECTION_BYPASS_WHITELIST,
                    &self.firewall.ipset.white_set_name,
                ));
                sections.push(self.route_section(SECTION_ROUTE_OTHERS, None, false));
            }
            Mode::Blacklist => {
                // Whitelist first so user whitelist entries beat identical blacklist ones
                sections.push(self.bypass_set_section(
                    SECTION_BYPASS_WHITELIST,
                    &self.firewall.ipset.white_set_name,
                ));
                sections.push(self.route_section(
                    SECTION_ROUTE_BLACKLIST,
                    Some(&self.firewall.ipset.black_set_name),
                    true,
                ));
            }
            Mode::Global => {
                sections.push(self.route_section(SECTION_ROUTE_ALL, None, true));
            }
        }

        Ok(FirewallScript {
            mode: self.profile.mode,
            sections,
        })
    }

    fn restore_section(&self) -> Section {
        Section {
            title: SECTION_RESTORE,
            rules: vec![
                "ipset flush".to_string(),
                format!(
                    "/usr/sbin/ipset restore -! -f {}/{} > /dev/null 2>&1",
                    self.remote_cfg_dir, self.firewall.ipset_fname
                ),
            ],
        }
    }

    /// Keep the proxies' own upstream connections out of the proxy.
    async fn bypass_servers_section(&self) -> Result<Section> {
        let topology = self.profile.proxies;
        let mut hosts: Vec<&str> = Vec::new();
        if topology.uses_kcptun() {
            hosts.push(self.profile.kcptun.server.as_str());
        }
        hosts.push(self.profile.backend_server(topology.backend()));

        let mut ips: Vec<Ipv4Addr> = Vec::with_capacity(hosts.len());
        for host in hosts {
            let ip = resolve_host(self.resolver, host).await?;
            if !ips.contains(&ip) {
                ips.push(ip);
            }
        }

        let mut rules = Vec::new();
        for ip in ips {
            rules.extend(nat_rule(&format!("-d {} -j RETURN", ip)));
            rules.push(format!("iptables -t mangle -A PREROUTING -p udp -d {} -j RETURN", ip));
        }

        Ok(Section {
            title: SECTION_BYPASS_SERVERS,
            rules,
        })
    }

    fn bypass_set_section(&self, title: &'static str, set: &str) -> Section {
        let mut rules: Vec<String> = nat_rule(&format!("-m set --match-set {} dst -j RETURN", set)).into();
        if title == SECTION_BYPASS_LAN {
            rules.push(format!(
                "iptables -t mangle -A PREROUTING -p udp -m set --match-set {} dst -j RETURN",
                set
            ));
        }
        Section { title, rules }
    }

    /// Redirect TCP (and TPROXY UDP when relaying) matching `set`, or everything.
    fn route_section(&self, title: &'static str, set: Option<&str>, add_policy_routing: bool) -> Section {
        let matcher = set
            .map(|s| format!("-m set --match-set {} dst ", s))
            .unwrap_or_default();

        let mut rules: Vec<String> = nat_rule(&format!(
            "-p tcp {}-j REDIRECT --to-port {}",
            matcher,
            self.redir_port()
        ))
        .into();

        if self.profile.enable_relay_udp {
            if add_policy_routing {
                rules.extend(policy_routing());
            }
            rules.push(format!(
                "iptables -t mangle -A PREROUTING -p udp {}-j TPROXY --on-port {} --tproxy-mark {}",
                matcher,
                self.udp_redir_port(),
                TPROXY_MARK
            ));
        }

        Section { title, rules }
    }
}
