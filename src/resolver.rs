//! Hostname resolution for proxy server addresses.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::debug;

use crate::error::{CompileError, Result};

#[cfg(test)]
use mockall::automock;

/// Default DNS resolution timeout in seconds
const DNS_TIMEOUT_SECS: u64 = 5;

/// Resolves a hostname to the IPv4 address firewall rules and proxy
/// configs are written against.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<Ipv4Addr>;
}

/// Resolve `host`, returning IPv4 literals as-is without a lookup.
pub async fn resolve_host<R: Resolver + ?Sized>(resolver: &R, host: &str) -> Result<Ipv4Addr> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }
    debug!("Resolving {}", host);
    resolver.resolve(host).await
}

/// System resolver (getaddrinfo) run on the blocking pool, with timeout.
#[derive(Debug, Clone)]
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(DNS_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Ipv4Addr> {
        let owned = host.to_string();
        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_host(&owned));

        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(Ok(addrs))) => first_ipv4(&addrs)
                .ok_or_else(|| CompileError::resolution(host, "no IPv4 address")),
            Ok(Ok(Err(e))) => Err(CompileError::resolution(host, e)),
            Ok(Err(e)) => Err(CompileError::resolution(host, format!("lookup task failed: {}", e))),
            Err(_) => Err(CompileError::resolution(host, "DNS timeout")),
        }
    }
}

fn first_ipv4(addrs: &[IpAddr]) -> Option<Ipv4Addr> {
    addrs.iter().find_map(|addr| match addr {
        IpAddr::V4(v4) => Some(*v4),
        IpAddr::V6(_) => None,
    })
}

/// Consults the config's `hosts` pins before falling back to `inner`.
#[derive(Debug, Clone)]
pub struct PinnedResolver<R> {
    pins: BTreeMap<String, Ipv4Addr>,
    inner: R,
}

impl<R: Resolver> PinnedResolver<R> {
    pub fn new(pins: BTreeMap<String, Ipv4Addr>, inner: R) -> Self {
        Self { pins, inner }
    }
}

#[async_trait]
impl<R: Resolver> Resolver for PinnedResolver<R> {
    async fn resolve(&self, host: &str) -> Result<Ipv4Addr> {
        if let Some(ip) = self.pins.get(host) {
            debug!("{} pinned to {}", host, ip);
            return Ok(*ip);
        }
        self.inner.resolve(host).await
    }
}
