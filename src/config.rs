//! Configuration management for vrouter.
//!
//! The config file carries the user profiles plus the two static registries
//! the compiler reads: the proxy topology descriptor (`proxiesInfo`) and the
//! firewall descriptor (`firewallInfo`). Both are plain values handed to the
//! compiler by reference; nothing here is process-wide state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CompileError;
use crate::generator::proxy::parse_extra_pairs;
use crate::topology::{Backend, ProxyKind, Topology};

/// Whitelist id whose entries go to the LAN set instead of the white set.
pub const LAN_NETWORKS_LIST: &str = "lanNetworks";

/// Secure string type that zeroizes memory on drop
/// Used for proxy passwords and kcptun keys
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecureString(String);

impl SecureString {
    pub fn new(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub version: String,

    #[serde(flatten)]
    pub layout: RouterLayout,

    /// Hostnames pinned to an address, consulted before system DNS
    pub hosts: BTreeMap<String, Ipv4Addr>,

    pub proxies_info: ProxiesInfo,

    pub firewall_info: FirewallInfo,

    pub profiles: Vec<Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "0.4".to_string(),
            layout: RouterLayout::default(),
            hosts: BTreeMap::new(),
            proxies_info: ProxiesInfo::default(),
            firewall_info: FirewallInfo::default(),
            profiles: vec![starter_profile()],
        }
    }
}

/// Placeholder server written into fresh configs; users replace it.
const PLACEHOLDER_SERVER: &str = "vps.example.com";

/// The single active profile shipped in `templates/config.yaml`.
fn starter_profile() -> Profile {
    let mut profile = Profile {
        active: true,
        ..Default::default()
    };
    profile.shadowsocks.server = PLACEHOLDER_SERVER.to_string();
    profile.shadowsocksr.server = PLACEHOLDER_SERVER.to_string();
    profile.kcptun.server = PLACEHOLDER_SERVER.to_string();
    profile
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), CompileError> {
        if self.profiles.is_empty() {
            return Err(CompileError::Config("No profiles configured".to_string()));
        }

        let active = self.profiles.iter().filter(|p| p.active).count();
        if active > 1 {
            return Err(CompileError::Config(format!(
                "{} profiles are marked active, at most one is allowed",
                active
            )));
        }

        self.proxies_info.validate()?;

        for profile in &self.profiles {
            profile.validate(&self.firewall_info)?;
        }

        Ok(())
    }

    /// Save configuration to YAML file atomically
    ///
    /// Uses tempfile + rename pattern to prevent corruption on crash.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let path = path.as_ref();
        let content = serde_yaml::to_string(self).with_context(|| "Failed to serialize config")?;

        let parent_dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut temp_file = NamedTempFile::new_in(parent_dir)
            .context("Failed to create temporary file for config")?;

        temp_file.write_all(content.as_bytes())?;
        temp_file.as_file().sync_all()?;

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {:?}", path))?;

        Ok(())
    }

    /// Pick a profile by name, else the active one, else the first.
    pub fn select_profile(&self, name: Option<&str>) -> std::result::Result<&Profile, CompileError> {
        if let Some(name) = name {
            return self
                .profiles
                .iter()
                .find(|p| p.name == name)
                .ok_or_else(|| CompileError::Config(format!("No profile named '{}'", name)));
        }

        self.profiles
            .iter()
            .find(|p| p.active)
            .or_else(|| self.profiles.first())
            .ok_or_else(|| CompileError::Config("No profiles configured".to_string()))
    }

    /// Generate default config with comments
    pub fn generate_default_yaml() -> String {
        include_str!("../templates/config.yaml").to_string()
    }
}

/// Where things live: list files on the host, generated files in the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouterLayout {
    /// Directory inside the guest holding configs and scripts
    pub remote_cfg_dir: String,
    /// dnsmasq conf-dir inside the guest
    pub dnsmasq_cfg_dir: String,
    /// Local directory holding the black/white list files
    pub lists_dir: PathBuf,
}

impl Default for RouterLayout {
    fn default() -> Self {
        Self {
            remote_cfg_dir: "/etc/vrouter".to_string(),
            dnsmasq_cfg_dir: "/etc/dnsmasq.d".to_string(),
            lists_dir: PathBuf::from("/etc/vrouter/lists"),
        }
    }
}

/// Routing policy
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// No redirection at all
    None,
    /// Proxy everything except whitelisted destinations
    #[default]
    Whitelist,
    /// Proxy only blacklisted destinations
    Blacklist,
    /// Proxy everything
    Global,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::None => "none",
            Mode::Whitelist => "whitelist",
            Mode::Blacklist => "blacklist",
            Mode::Global => "global",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry entry for a proxy the topology runs on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyInfo {
    pub local_port: u16,
    pub cfg_name: String,
    pub service_name: String,
    pub bin_name: String,
}

/// One value per wrapped backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerBackend<T> {
    pub shadowsocks: T,
    pub shadowsocksr: T,
}

impl<T> PerBackend<T> {
    pub fn get(&self, backend: Backend) -> &T {
        match backend {
            Backend::Shadowsocks => &self.shadowsocks,
            Backend::ShadowsocksR => &self.shadowsocksr,
        }
    }
}

/// Registry entry for tunnelDns / relayUDP, whose binary and service name
/// depend on the backend they wrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellProxyInfo {
    pub local_port: u16,
    pub cfg_name: String,
    pub service_name: PerBackend<String>,
    pub bin_name: PerBackend<String>,
}

/// Topology descriptor (`proxiesInfo`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProxiesInfo {
    pub shadowsocks: ProxyInfo,
    pub shadowsocksr: ProxyInfo,
    pub kcptun: ProxyInfo,
    pub tunnel_dns: ShellProxyInfo,
    #[serde(rename = "relayUDP")]
    pub relay_udp: ShellProxyInfo,
}

impl Default for ProxiesInfo {
    fn default() -> Self {
        fn info(port: u16, cfg: &str, service: &str, bin: &str) -> ProxyInfo {
            ProxyInfo {
                local_port: port,
                cfg_name: cfg.to_string(),
                service_name: service.to_string(),
                bin_name: bin.to_string(),
            }
        }
        fn per(ss: &str, ssr: &str) -> PerBackend<String> {
            PerBackend {
                shadowsocks: ss.to_string(),
                shadowsocksr: ssr.to_string(),
            }
        }

        Self {
            shadowsocks: info(1010, "ss-client.json", "shadowsocks", "ss-redir"),
            shadowsocksr: info(1020, "ssr-client.json", "shadowsocksr", "ssr-redir"),
            kcptun: info(1030, "kt-client.json", "kcptun", "kcptun"),
            tunnel_dns: ShellProxyInfo {
                local_port: 1040,
                cfg_name: "tunnel-dns.json".to_string(),
                service_name: per("ss-tunnel-dns", "ssr-tunnel-dns"),
                bin_name: per("ss-tunnel", "ssr-tunnel"),
            },
            relay_udp: ShellProxyInfo {
                local_port: 1050,
                cfg_name: "relay-udp.json".to_string(),
                service_name: per("ss-relay-udp", "ssr-relay-udp"),
                bin_name: per("ss-redir", "ssr-redir"),
            },
        }
    }
}

impl ProxiesInfo {
    pub fn local_port(&self, proxy: ProxyKind) -> u16 {
        match proxy {
            ProxyKind::Shadowsocks => self.shadowsocks.local_port,
            ProxyKind::ShadowsocksR => self.shadowsocksr.local_port,
            ProxyKind::Kcptun => self.kcptun.local_port,
            ProxyKind::TunnelDns => self.tunnel_dns.local_port,
            ProxyKind::RelayUdp => self.relay_udp.local_port,
        }
    }

    pub fn cfg_name(&self, proxy: ProxyKind) -> &str {
        match proxy {
            ProxyKind::Shadowsocks => &self.shadowsocks.cfg_name,
            ProxyKind::ShadowsocksR => &self.shadowsocksr.cfg_name,
            ProxyKind::Kcptun => &self.kcptun.cfg_name,
            ProxyKind::TunnelDns => &self.tunnel_dns.cfg_name,
            ProxyKind::RelayUdp => &self.relay_udp.cfg_name,
        }
    }

    /// Binary run for `proxy`; shells resolve through the wrapped backend.
    pub fn bin_name(&self, proxy: ProxyKind, backend: Backend) -> &str {
        match proxy {
            ProxyKind::Shadowsocks => &self.shadowsocks.bin_name,
            ProxyKind::ShadowsocksR => &self.shadowsocksr.bin_name,
            ProxyKind::Kcptun => &self.kcptun.bin_name,
            ProxyKind::TunnelDns => self.tunnel_dns.bin_name.get(backend),
            ProxyKind::RelayUdp => self.relay_udp.bin_name.get(backend),
        }
    }

    /// init.d service name for `proxy`; shells resolve through the wrapped backend.
    pub fn service_name(&self, proxy: ProxyKind, backend: Backend) -> &str {
        match proxy {
            ProxyKind::Shadowsocks => &self.shadowsocks.service_name,
            ProxyKind::ShadowsocksR => &self.shadowsocksr.service_name,
            ProxyKind::Kcptun => &self.kcptun.service_name,
            ProxyKind::TunnelDns => self.tunnel_dns.service_name.get(backend),
            ProxyKind::RelayUdp => self.relay_udp.service_name.get(backend),
        }
    }

    fn validate(&self) -> std::result::Result<(), CompileError> {
        let mut seen = HashSet::new();
        for proxy in ProxyKind::ALL {
            let port = self.local_port(proxy);
            if port == 0 {
                return Err(CompileError::Config(format!(
                    "proxiesInfo.{}.localPort must not be 0",
                    proxy
                )));
            }
            if !seen.insert(port) {
                return Err(CompileError::Config(format!(
                    "proxiesInfo.{}.localPort {} is already used by another proxy",
                    proxy, port
                )));
            }
            if self.cfg_name(proxy).is_empty() {
                return Err(CompileError::Config(format!(
                    "proxiesInfo.{}.cfgName must not be empty",
                    proxy
                )));
            }
        }
        Ok(())
    }
}

/// IP-set names referenced by the firewall script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpsetNames {
    pub black_set_name: String,
    pub white_set_name: String,
    pub lan_set_name: String,
}

/// Firewall descriptor (`firewallInfo`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FirewallInfo {
    /// List id -> file name under `listsDir`
    pub lists: BTreeMap<String, String>,
    pub ipset: IpsetNames,
    pub firewall_fname: String,
    pub ipset_fname: String,
    pub dnsmasq_fname: String,
    pub watchdog_fname: String,
}

impl Default for FirewallInfo {
    fn default() -> Self {
        let lists = [
            ("gfwList", "gfwlist.txt"),
            ("extraBlackList", "extra_blacklist.txt"),
            ("chinaIPs", "chinaips.txt"),
            (LAN_NETWORKS_LIST, "lan_networks.txt"),
            ("extraWhiteList", "extra_whitelist.txt"),
        ]
        .into_iter()
        .map(|(id, file)| (id.to_string(), file.to_string()))
        .collect();

        Self {
            lists,
            ipset: IpsetNames {
                black_set_name: "blacklist".to_string(),
                white_set_name: "whitelist".to_string(),
                lan_set_name: "lan".to_string(),
            },
            firewall_fname: "firewall.user".to_string(),
            ipset_fname: "custom.ipset".to_string(),
            dnsmasq_fname: "custom.conf".to_string(),
            watchdog_fname: "proxies-watchdog".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowsocksServer {
    pub server: String,
    pub server_port: u16,
    pub password: SecureString,
    pub timeout: u32,
    pub method: String,
    pub fast_open: bool,
}

impl Default for ShadowsocksServer {
    fn default() -> Self {
        Self {
            server: String::new(),
            server_port: 8388,
            password: SecureString::default(),
            timeout: 300,
            method: "chacha20-ietf-poly1305".to_string(),
            fast_open: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowsocksRServer {
    pub server: String,
    pub server_port: u16,
    pub password: SecureString,
    pub timeout: u32,
    pub method: String,
    pub fast_open: bool,
    pub protocol: String,
    pub protocol_param: String,
    pub obfs: String,
    pub obfs_param: String,
    /// Extra `key=value;key=value` settings merged into the config
    pub others: String,
}

impl Default for ShadowsocksRServer {
    fn default() -> Self {
        Self {
            server: String::new(),
            server_port: 8989,
            password: SecureString::default(),
            timeout: 300,
            method: "aes-256-cfb".to_string(),
            fast_open: false,
            protocol: "origin".to_string(),
            protocol_param: String::new(),
            obfs: "plain".to_string(),
            obfs_param: String::new(),
            others: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KcptunServer {
    pub server: String,
    pub server_port: u16,
    pub key: SecureString,
    pub crypt: String,
    pub mode: String,
    /// Extra `key=value;key=value` settings, coerced to numbers/booleans
    pub others: String,
}

impl Default for KcptunServer {
    fn default() -> Self {
        Self {
            server: String::new(),
            server_port: 29900,
            key: SecureString::default(),
            crypt: "aes".to_string(),
            mode: "fast2".to_string(),
            others: String::new(),
        }
    }
}

/// User intent for one compilation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Profile {
    pub name: String,
    pub active: bool,
    pub proxies: Topology,
    pub mode: Mode,
    pub enable_tunnel_dns: bool,
    #[serde(rename = "enableRelayUDP")]
    pub enable_relay_udp: bool,
    #[serde(rename = "speedupServerSSH")]
    pub speedup_server_ssh: bool,
    #[serde(rename = "serverSSHPort")]
    pub server_ssh_port: u16,
    /// Upstream DNS server (dnsmasq `server=` target, ss-tunnel destination)
    pub dns_server: Option<String>,
    #[serde(rename = "selectedBL")]
    pub selected_bl: BTreeMap<String, bool>,
    #[serde(rename = "selectedWL")]
    pub selected_wl: BTreeMap<String, bool>,
    pub shadowsocks: ShadowsocksServer,
    pub shadowsocksr: ShadowsocksRServer,
    pub kcptun: KcptunServer,
}

impl Default for Profile {
    fn default() -> Self {
        let selected = |ids: &[&str]| ids.iter().map(|id| (id.to_string(), true)).collect();
        Self {
            name: "default".to_string(),
            active: false,
            proxies: Topology::Shadowsocks,
            mode: Mode::Whitelist,
            enable_tunnel_dns: true,
            enable_relay_udp: false,
            speedup_server_ssh: false,
            server_ssh_port: 22,
            dns_server: None,
            selected_bl: selected(&["gfwList", "extraBlackList"]),
            selected_wl: selected(&["chinaIPs", LAN_NETWORKS_LIST, "extraWhiteList"]),
            shadowsocks: ShadowsocksServer::default(),
            shadowsocksr: ShadowsocksRServer::default(),
            kcptun: KcptunServer::default(),
        }
    }
}

impl Profile {
    /// Selected blacklist ids, in sorted order.
    pub fn blacklists(&self) -> impl Iterator<Item = &str> {
        enabled_ids(&self.selected_bl)
    }

    /// Selected whitelist ids, in sorted order.
    pub fn whitelists(&self) -> impl Iterator<Item = &str> {
        enabled_ids(&self.selected_wl)
    }

    /// Remote port of the backend the topology dials.
    pub fn backend_server_port(&self, backend: Backend) -> u16 {
        match backend {
            Backend::Shadowsocks => self.shadowsocks.server_port,
            Backend::ShadowsocksR => self.shadowsocksr.server_port,
        }
    }

    pub fn backend_server(&self, backend: Backend) -> &str {
        match backend {
            Backend::Shadowsocks => &self.shadowsocks.server,
            Backend::ShadowsocksR => &self.shadowsocksr.server,
        }
    }

    pub fn validate(&self, firewall: &FirewallInfo) -> std::result::Result<(), CompileError> {
        for id in self.blacklists().chain(self.whitelists()) {
            if !firewall.lists.contains_key(id) {
                return Err(CompileError::Config(format!(
                    "Profile '{}' selects unknown list '{}'",
                    self.name, id
                )));
            }
        }

        if self.speedup_server_ssh && self.server_ssh_port == 0 {
            return Err(CompileError::Config(format!(
                "Profile '{}' enables speedupServerSSH without a serverSSHPort",
                self.name
            )));
        }

        let backend = self.proxies.backend();
        if self.backend_server(backend).is_empty() {
            return Err(CompileError::Config(format!(
                "Profile '{}' uses {} but sets no {}.server",
                self.name,
                self.proxies,
                backend.proxy()
            )));
        }
        if self.proxies.uses_kcptun() && self.kcptun.server.is_empty() {
            return Err(CompileError::Config(format!(
                "Profile '{}' uses {} but sets no kcptun.server",
                self.name, self.proxies
            )));
        }

        parse_extra_pairs(&self.shadowsocksr.others)?;
        parse_extra_pairs(&self.kcptun.others)?;

        Ok(())
    }
}

fn enabled_ids(map: &BTreeMap<String, bool>) -> impl Iterator<Item = &str> {
    map.iter()
        .filter(|(_, enabled)| **enabled)
        .map(|(id, _)| id.as_str())
}
