//! Proxy topology: which backend is dialed and whether kcptun sits in front of it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CompileError;

/// The two shadowsocks-family backends that terminate at a remote server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Backend {
    Shadowsocks,
    ShadowsocksR,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Shadowsocks, Backend::ShadowsocksR];

    /// The proxy entry in `proxiesInfo` that runs this backend directly.
    pub fn proxy(self) -> ProxyKind {
        match self {
            Backend::Shadowsocks => ProxyKind::Shadowsocks,
            Backend::ShadowsocksR => ProxyKind::ShadowsocksR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Shadowsocks => "shadowsocks",
            Backend::ShadowsocksR => "shadowsocksr",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every logical process the router may run.
///
/// `TunnelDns` and `RelayUdp` are shells around whichever [`Backend`] the
/// topology selects; they borrow that backend's binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProxyKind {
    Shadowsocks,
    ShadowsocksR,
    Kcptun,
    TunnelDns,
    RelayUdp,
}

impl ProxyKind {
    pub const ALL: [ProxyKind; 5] = [
        ProxyKind::TunnelDns,
        ProxyKind::RelayUdp,
        ProxyKind::Kcptun,
        ProxyKind::ShadowsocksR,
        ProxyKind::Shadowsocks,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProxyKind::Shadowsocks => "shadowsocks",
            ProxyKind::ShadowsocksR => "shadowsocksr",
            ProxyKind::Kcptun => "kcptun",
            ProxyKind::TunnelDns => "tunnelDns",
            ProxyKind::RelayUdp => "relayUDP",
        }
    }

    /// True for the protocol-agnostic shells that wrap a backend.
    pub fn is_shell(self) -> bool {
        matches!(self, ProxyKind::TunnelDns | ProxyKind::RelayUdp)
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyKind {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProxyKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CompileError::Config(format!("Unknown proxy '{}'", s)))
    }
}

/// User-selected proxy combination (`proxies` in a profile).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topology {
    #[serde(rename = "ss")]
    Shadowsocks,
    #[serde(rename = "ssr")]
    ShadowsocksR,
    #[serde(rename = "ssKt")]
    ShadowsocksOverKcptun,
    #[serde(rename = "ssrKt")]
    ShadowsocksROverKcptun,
}

impl Topology {
    pub const ALL: [Topology; 4] = [
        Topology::Shadowsocks,
        Topology::ShadowsocksR,
        Topology::ShadowsocksOverKcptun,
        Topology::ShadowsocksROverKcptun,
    ];

    pub fn backend(self) -> Backend {
        match self {
            Topology::Shadowsocks | Topology::ShadowsocksOverKcptun => Backend::Shadowsocks,
            Topology::ShadowsocksR | Topology::ShadowsocksROverKcptun => Backend::ShadowsocksR,
        }
    }

    pub fn uses_kcptun(self) -> bool {
        matches!(
            self,
            Topology::ShadowsocksOverKcptun | Topology::ShadowsocksROverKcptun
        )
    }

    /// Whether the topology itself runs `proxy` (shells excluded).
    pub fn runs(self, proxy: ProxyKind) -> bool {
        match proxy {
            ProxyKind::Kcptun => self.uses_kcptun(),
            ProxyKind::Shadowsocks | ProxyKind::ShadowsocksR => self.backend().proxy() == proxy,
            ProxyKind::TunnelDns | ProxyKind::RelayUdp => false,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Topology::Shadowsocks => "ss",
            Topology::ShadowsocksR => "ssr",
            Topology::ShadowsocksOverKcptun => "ssKt",
            Topology::ShadowsocksROverKcptun => "ssrKt",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Topology {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topology::ALL
            .into_iter()
            .find(|t| t.tag() == s)
            .ok_or_else(|| {
                CompileError::Config(format!(
                    "Unknown topology '{}'. Valid values: ss, ssr, ssKt, ssrKt",
                    s
                ))
            })
    }
}
