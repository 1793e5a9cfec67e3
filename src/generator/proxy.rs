//! Per-proxy JSON configs (ss-redir, ssr-redir, kcptun, ss-tunnel, UDP relay).

use serde_json::{json, Map, Value};

use crate::config::{Profile, ProxiesInfo};
use crate::error::{CompileError, Result};
use crate::resolver::{resolve_host, Resolver};
use crate::topology::{Backend, ProxyKind};

/// A proxy config as written to disk.
pub type ProxyConfig = Map<String, Value>;

/// Upstream used by ss-tunnel when the profile sets no DNS server.
pub const DEFAULT_TUNNEL_DNS: &str = "8.8.8.8:53";

/// Parse `key=value;key=value` extra settings.
///
/// Empty segments are skipped. A segment without `=` or with an empty key is
/// a [`CompileError::Config`]. Values may themselves contain `=`.
pub fn parse_extra_pairs(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                CompileError::Config(format!("Malformed extra setting '{}', expected key=value", segment))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(CompileError::Config(format!(
                    "Malformed extra setting '{}', empty key",
                    segment
                )));
            }
            Ok((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// kcptun rejects quoted numbers and booleans, so unquote and coerce.
pub fn coerce_kcptun_value(raw: &str) -> Value {
    let value = raw.replace('"', "");
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = value.parse::<u64>() {
            return Value::from(n);
        }
    }
    match value.as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(value),
    }
}

/// ss-tunnel wants `host:port`; accept dnsmasq's `host#port` too.
pub fn tunnel_address(dns_server: Option<&str>) -> String {
    match dns_server.map(str::trim).filter(|s| !s.is_empty()) {
        Some(server) => {
            let server = server.replace('#', ":");
            if server.contains(':') {
                server
            } else {
                format!("{}:53", server)
            }
        }
        None => DEFAULT_TUNNEL_DNS.to_string(),
    }
}

/// Builds connection configs for one profile against one topology descriptor.
pub struct ProxyConfigBuilder<'a, R: ?Sized> {
    profile: &'a Profile,
    proxies: &'a ProxiesInfo,
    resolver: &'a R,
}

impl<'a, R: Resolver + ?Sized> ProxyConfigBuilder<'a, R> {
    pub fn new(profile: &'a Profile, proxies: &'a ProxiesInfo, resolver: &'a R) -> Self {
        Self {
            profile,
            proxies,
            resolver,
        }
    }

    pub async fn build(&self, proxy: ProxyKind) -> Result<ProxyConfig> {
        match proxy {
            ProxyKind::Shadowsocks => self.shadowsocks().await,
            ProxyKind::ShadowsocksR => self.shadowsocksr().await,
            ProxyKind::Kcptun => self.kcptun().await,
            ProxyKind::TunnelDns => self.tunnel_dns().await,
            ProxyKind::RelayUdp => self.relay_udp().await,
        }
    }

    /// Whether `backend` is dialed through the local kcptun endpoint.
    fn behind_kcptun(&self, backend: Backend) -> bool {
        let topology = self.profile.proxies;
        topology.uses_kcptun() && topology.backend() == backend
    }

    /// Point `cfg` at kcptun's loopback listener, or at the resolved server.
    async fn set_upstream(&self, cfg: &mut ProxyConfig, backend: Backend) -> Result<()> {
        if self.behind_kcptun(backend) {
            cfg.insert("server".into(), json!("127.0.0.1"));
            cfg.insert("server_port".into(), json!(self.proxies.kcptun.local_port));
        } else {
            let host = self.profile.backend_server(backend);
            let ip = resolve_host(self.resolver, host).await?;
            cfg.insert("server".into(), json!(ip.to_string()));
        }
        Ok(())
    }

    pub async fn shadowsocks(&self) -> Result<ProxyConfig> {
        let data = &self.profile.shadowsocks;
        let mut cfg = as_map(json!({
            "server": data.server,
            "server_port": data.server_port,
            "local_address": "0.0.0.0",
            "local_port": self.proxies.shadowsocks.local_port,
            "password": data.password.as_str(),
            "timeout": data.timeout,
            "method": data.method,
            "fast_open": data.fast_open,
            "mode": "tcp_only",
        }));
        self.set_upstream(&mut cfg, Backend::Shadowsocks).await?;
        Ok(cfg)
    }

    pub async fn shadowsocksr(&self) -> Result<ProxyConfig> {
        let data = &self.profile.shadowsocksr;
        // "tcp_oly" is what the ssr client on the router has always been fed
        let mut cfg = as_map(json!({
            "server": data.server,
            "server_port": data.server_port,
            "local_address": "0.0.0.0",
            "local_port": self.proxies.shadowsocksr.local_port,
            "password": data.password.as_str(),
            "timeout": data.timeout,
            "method": data.method,
            "fast_open": data.fast_open,
            "mode": "tcp_oly",
            "protocol": data.protocol,
            "protocol_param": data.protocol_param,
            "obfs": data.obfs,
            "obfs_param": data.obfs_param,
        }));
        for (key, value) in parse_extra_pairs(&data.others)? {
            cfg.insert(key, Value::String(value));
        }
        self.set_upstream(&mut cfg, Backend::ShadowsocksR).await?;
        Ok(cfg)
    }

    pub async fn kcptun(&self) -> Result<ProxyConfig> {
        let data = &self.profile.kcptun;
        let server_ip = resolve_host(self.resolver, &data.server).await?;
        let mut cfg = as_map(json!({
            "remoteaddr": format!("{}:{}", server_ip, data.server_port),
            "localaddr": format!(":{}", self.proxies.kcptun.local_port),
            "key": data.key.as_str(),
            "crypt": data.crypt,
            "mode": data.mode,
        }));
        for (key, value) in parse_extra_pairs(&data.others)? {
            cfg.insert(key, coerce_kcptun_value(&value));
        }
        Ok(cfg)
    }

    /// Backend config re-targeted for a UDP shell.
    ///
    /// kcptun only carries TCP, so when the topology uses it the shell dials
    /// the kcptun server host directly on the backend's own remote port.
    async fn udp_shell_base(&self) -> Result<ProxyConfig> {
        let backend = self.profile.proxies.backend();
        let mut cfg = match backend {
            Backend::Shadowsocks => self.shadowsocks().await?,
            Backend::ShadowsocksR => self.shadowsocksr().await?,
        };

        if self.profile.proxies.uses_kcptun() {
            let ip = resolve_host(self.resolver, &self.profile.kcptun.server).await?;
            cfg.insert("server".into(), json!(ip.to_string()));
            cfg.insert(
                "server_port".into(),
                json!(self.profile.backend_server_port(backend)),
            );
        }
        cfg.insert("mode".into(), json!("udp_only"));
        Ok(cfg)
    }

    pub async fn tunnel_dns(&self) -> Result<ProxyConfig> {
        let mut cfg = self.udp_shell_base().await?;
        cfg.insert("local_port".into(), json!(self.proxies.tunnel_dns.local_port));
        // ss-tunnel does not support fast_open
        cfg.insert("fast_open".into(), json!(false));
        cfg.insert(
            "tunnel_address".into(),
            json!(tunnel_address(self.profile.dns_server.as_deref())),
        );
        Ok(cfg)
    }

    pub async fn relay_udp(&self) -> Result<ProxyConfig> {
        let mut cfg = self.udp_shell_base().await?;
        cfg.insert("local_port".into(), json!(self.proxies.relay_udp.local_port));
        Ok(cfg)
    }
}

fn as_map(value: Value) -> ProxyConfig {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Plain digit strings always become JSON integers
        #[test]
        fn prop_digits_coerce_to_integer(n in 0u64..=u32::MAX as u64) {
            prop_assert_eq!(coerce_kcptun_value(&n.to_string()), json!(n));
        }

        /// Well-formed pair strings parse to one pair per segment
        #[test]
        fn prop_pairs_parse(pairs in prop::collection::vec(("[a-z]{1,8}", "[a-z0-9]{0,8}"), 0..8)) {
            let raw: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            let parsed = parse_extra_pairs(&raw.join(";")).unwrap();
            prop_assert_eq!(parsed.len(), pairs.len());
        }
    }
}
