//! Compiler facade: one profile in, one artifact bundle out.
//!
//! Every artifact is generated independently. A failure in one (an
//! unresolvable server, a missing list file) is reported in its slot of the
//! bundle and leaves the others intact, so callers decide whether a partial
//! bundle is usable.

pub mod firewall;
pub mod ipset;
pub mod proxy;
pub mod service;

use std::fmt;
use tracing::{debug, info, warn};

use crate::config::{Config, FirewallInfo, Mode, Profile, ProxiesInfo, RouterLayout};
use crate::error::{CompileError, Result};
use crate::fs_abstraction::{real_fs, FileSystem};
use crate::resolver::Resolver;
use crate::topology::ProxyKind;

use self::firewall::FirewallCompiler;
use self::ipset::LoadedList;
use self::proxy::ProxyConfigBuilder;
use self::service::ServiceUnit;

/// Directory init scripts are installed to inside the guest.
pub const INIT_D_DIR: &str = "/etc/init.d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    ProxyConfig(ProxyKind),
    Ipset,
    Dnsmasq,
    Firewall,
    Service(ServiceUnit),
    Watchdog,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::ProxyConfig(proxy) => write!(f, "{} config", proxy),
            ArtifactKind::Ipset => f.write_str("ipset script"),
            ArtifactKind::Dnsmasq => f.write_str("dnsmasq fragment"),
            ArtifactKind::Firewall => f.write_str("firewall script"),
            ArtifactKind::Service(unit) => write!(f, "{} service ({})", unit.proxy, unit.backend),
            ArtifactKind::Watchdog => f.write_str("watchdog script"),
        }
    }
}

/// A generated file and where it belongs inside the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    /// Name used in the local staging directory
    pub file_name: String,
    /// Absolute destination path inside the guest
    pub remote_path: String,
    pub content: String,
    pub executable: bool,
}

impl Artifact {
    /// Short name accepted by `vrouter show`.
    pub fn label(&self) -> String {
        match self.kind {
            ArtifactKind::ProxyConfig(proxy) => proxy.as_str().to_string(),
            ArtifactKind::Ipset => "ipset".to_string(),
            ArtifactKind::Dnsmasq => "dnsmasq".to_string(),
            ArtifactKind::Firewall => "firewall".to_string(),
            ArtifactKind::Service(_) => format!("init.d/{}", self.file_name),
            ArtifactKind::Watchdog => "watchdog".to_string(),
        }
    }
}

/// Output of one compilation, one slot per artifact in emission order.
#[derive(Debug)]
pub struct ArtifactBundle {
    pub profile: String,
    pub entries: Vec<(ArtifactKind, Result<Artifact>)>,
}

impl ArtifactBundle {
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|(_, result)| result.is_ok())
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.entries.iter().filter_map(|(_, result)| result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (ArtifactKind, &CompileError)> {
        self.entries
            .iter()
            .filter_map(|(kind, result)| result.as_ref().err().map(|e| (*kind, e)))
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<&Result<Artifact>> {
        self.entries.iter().find(|(k, _)| *k == kind).map(|(_, r)| r)
    }

    /// Look up by label first, then by staging file name.
    pub fn find(&self, name: &str) -> Option<&Artifact> {
        self.artifacts()
            .find(|a| a.label() == name)
            .or_else(|| self.artifacts().find(|a| a.file_name == name))
    }
}

/// Read-only descriptors shared by every compilation.
#[derive(Debug, Clone, Copy)]
pub struct CompileContext<'a> {
    pub proxies: &'a ProxiesInfo,
    pub firewall: &'a FirewallInfo,
    pub layout: &'a RouterLayout,
}

impl<'a> CompileContext<'a> {
    pub fn from_config(config: &'a Config) -> Self {
        Self {
            proxies: &config.proxies_info,
            firewall: &config.firewall_info,
            layout: &config.layout,
        }
    }

    fn remote_cfg_path(&self, name: &str) -> String {
        format!("{}/{}", self.layout.remote_cfg_dir, name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Emit init scripts for every service, not just the active topology's
    pub all_services: bool,
}

pub struct Compiler<'a, R: ?Sized> {
    context: CompileContext<'a>,
    resolver: &'a R,
    fs: &'a dyn FileSystem,
}

impl<'a, R: Resolver + ?Sized> Compiler<'a, R> {
    pub fn new(context: CompileContext<'a>, resolver: &'a R) -> Self {
        Self {
            context,
            resolver,
            fs: real_fs(),
        }
    }

    /// Read list files through `fs` instead of the real filesystem.
    pub fn with_fs(mut self, fs: &'a dyn FileSystem) -> Self {
        self.fs = fs;
        self
    }

    pub async fn compile(&self, profile: &Profile, options: CompileOptions) -> ArtifactBundle {
        info!(
            "Compiling profile '{}' ({}, mode {})",
            profile.name, profile.proxies, profile.mode
        );

        let active = service::active_units(profile);
        let mut entries = Vec::new();

        let builder = ProxyConfigBuilder::new(profile, self.context.proxies, self.resolver);
        for unit in &active {
            let kind = ArtifactKind::ProxyConfig(unit.proxy);
            entries.push((kind, self.proxy_config(&builder, unit.proxy).await));
        }

        entries.push((ArtifactKind::Ipset, self.ipset(profile)));
        entries.push((ArtifactKind::Dnsmasq, self.dnsmasq(profile)));
        entries.push((ArtifactKind::Firewall, self.firewall(profile).await));

        let units = if options.all_services {
            service::all_units()
        } else {
            active.clone()
        };
        for unit in units {
            entries.push((ArtifactKind::Service(unit), Ok(self.service(unit))));
        }

        entries.push((ArtifactKind::Watchdog, Ok(self.watchdog(&active))));

        let bundle = ArtifactBundle {
            profile: profile.name.clone(),
            entries,
        };
        for (kind, err) in bundle.failures() {
            warn!("Failed to generate {}: {}", kind, err);
        }
        bundle
    }

    async fn proxy_config(&self, builder: &ProxyConfigBuilder<'_, R>, proxy: ProxyKind) -> Result<Artifact> {
        let cfg = builder.build(proxy).await?;
        let mut content = serde_json::to_string_pretty(&cfg)
            .map_err(|e| CompileError::Config(format!("Failed to serialize {} config: {}", proxy, e)))?;
        content.push('\n');

        let file_name = self.context.proxies.cfg_name(proxy).to_string();
        Ok(Artifact {
            kind: ArtifactKind::ProxyConfig(proxy),
            remote_path: self.context.remote_cfg_path(&file_name),
            file_name,
            content,
            executable: false,
        })
    }

    /// Lists are not read at all in mode `none`.
    fn lists(&self, profile: &Profile) -> Result<Vec<LoadedList>> {
        if profile.mode == Mode::None {
            return Ok(Vec::new());
        }
        let targets = ipset::list_targets(profile, self.context.firewall, &self.context.layout.lists_dir)?;
        debug!("Loading {} list files", targets.len());
        ipset::load_lists(self.fs, targets)
    }

    fn ipset(&self, profile: &Profile) -> Result<Artifact> {
        let lists = self.lists(profile)?;
        let file_name = self.context.firewall.ipset_fname.clone();
        Ok(Artifact {
            kind: ArtifactKind::Ipset,
            remote_path: self.context.remote_cfg_path(&file_name),
            file_name,
            content: ipset::ipset_script(profile.mode, self.context.firewall, &lists),
            executable: false,
        })
    }

    fn dnsmasq(&self, profile: &Profile) -> Result<Artifact> {
        let lists = self.lists(profile)?;
        let dns = ipset::effective_dns_server(profile, self.context.proxies);
        let file_name = self.context.firewall.dnsmasq_fname.clone();
        Ok(Artifact {
            kind: ArtifactKind::Dnsmasq,
            remote_path: format!("{}/{}", self.context.layout.dnsmasq_cfg_dir, file_name),
            file_name,
            content: ipset::dnsmasq_fragment(profile.mode, dns.as_deref(), &lists),
            executable: false,
        })
    }

    async fn firewall(&self, profile: &Profile) -> Result<Artifact> {
        let script = FirewallCompiler::new(
            profile,
            self.context.proxies,
            self.context.firewall,
            &self.context.layout.remote_cfg_dir,
            self.resolver,
        )
        .compile()
        .await?;

        let file_name = self.context.firewall.firewall_fname.clone();
        Ok(Artifact {
            kind: ArtifactKind::Firewall,
            remote_path: self.context.remote_cfg_path(&file_name),
            file_name,
            content: script.render(),
            executable: true,
        })
    }

    fn service(&self, unit: ServiceUnit) -> Artifact {
        let file_name = unit.service_name(self.context.proxies).to_string();
        Artifact {
            kind: ArtifactKind::Service(unit),
            remote_path: format!("{}/{}", INIT_D_DIR, file_name),
            file_name,
            content: service::init_script(unit, self.context.proxies, &self.context.layout.remote_cfg_dir),
            executable: true,
        }
    }

    fn watchdog(&self, active: &[ServiceUnit]) -> Artifact {
        let file_name = self.context.firewall.watchdog_fname.clone();
        Artifact {
            kind: ArtifactKind::Watchdog,
            remote_path: self.context.remote_cfg_path(&file_name),
            file_name,
            content: service::watchdog_script(active, self.context.proxies),
            executable: true,
        }
    }
}
