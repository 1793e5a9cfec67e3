//! ipset restore script and dnsmasq conditional-DNS fragment.
//!
//! IP literals from the selected lists go into the ipsets directly; domains
//! are handed to dnsmasq, which forwards their lookups to the chosen DNS
//! server and adds the answers to the same ipsets.

use std::path::{Path, PathBuf};

use crate::classifier::{Entry, ListFile};
use crate::config::{FirewallInfo, Mode, Profile, ProxiesInfo, LAN_NETWORKS_LIST};
use crate::error::{CompileError, Result};
use crate::fs_abstraction::FileSystem;

/// Marker written when mode `none` makes lists irrelevant.
pub const NONE_MODE_MARKER: &str = "# workMode: none";

/// A selected list and the ipset its entries land in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListTarget {
    pub list_id: String,
    pub path: PathBuf,
    pub set_name: String,
}

/// Selected lists in emission order: blacklists first, then whitelists.
pub fn list_targets(
    profile: &Profile,
    firewall: &FirewallInfo,
    lists_dir: &Path,
) -> Result<Vec<ListTarget>> {
    let black = profile
        .blacklists()
        .map(|id| (id, firewall.ipset.black_set_name.as_str()));
    let white = profile.whitelists().map(|id| {
        let set = if id == LAN_NETWORKS_LIST {
            firewall.ipset.lan_set_name.as_str()
        } else {
            firewall.ipset.white_set_name.as_str()
        };
        (id, set)
    });

    black
        .chain(white)
        .map(|(id, set)| {
            let fname = firewall.lists.get(id).ok_or_else(|| {
                CompileError::Config(format!("List '{}' has no file in firewallInfo.lists", id))
            })?;
            Ok(ListTarget {
                list_id: id.to_string(),
                path: lists_dir.join(fname),
                set_name: set.to_string(),
            })
        })
        .collect()
}

/// A list target with its file contents.
#[derive(Debug, Clone)]
pub struct LoadedList {
    pub target: ListTarget,
    pub file: ListFile,
}

pub fn load_lists<F: FileSystem + ?Sized>(fs: &F, targets: Vec<ListTarget>) -> Result<Vec<LoadedList>> {
    targets
        .into_iter()
        .map(|target| {
            let file = ListFile::read(fs, &target.path)?;
            Ok(LoadedList { target, file })
        })
        .collect()
}

/// DNS server dnsmasq forwards listed domains to, in dnsmasq `host#port` form.
///
/// With tunnel DNS enabled this is the local ss-tunnel listener.
pub fn effective_dns_server(profile: &Profile, proxies: &ProxiesInfo) -> Option<String> {
    if profile.enable_tunnel_dns {
        return Some(format!("127.0.0.1#{}", proxies.tunnel_dns.local_port));
    }
    profile
        .dns_server
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.replace(':', "#"))
}

/// Every set the firewall script references, declared even when empty.
fn set_names(firewall: &FirewallInfo) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::with_capacity(3);
    for name in [
        firewall.ipset.black_set_name.as_str(),
        firewall.ipset.white_set_name.as_str(),
        firewall.ipset.lan_set_name.as_str(),
    ] {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

pub fn ipset_script(mode: Mode, firewall: &FirewallInfo, lists: &[LoadedList]) -> String {
    let mut lines: Vec<String> = set_names(firewall)
        .into_iter()
        .map(|name| {
            format!(
                "create {} hash:net family inet hashsize 1024 maxelem 65536 -exist",
                name
            )
        })
        .collect();

    if mode != Mode::None {
        for list in lists {
            for entry in list.file.entries() {
                if let Entry::Ip(cidr) = entry {
                    lines.push(format!("add {} {}", list.target.set_name, cidr));
                }
            }
        }
    }

    finish(lines)
}

pub fn dnsmasq_fragment(mode: Mode, dns_server: Option<&str>, lists: &[LoadedList]) -> String {
    if mode == Mode::None {
        return finish(vec![NONE_MODE_MARKER.to_string()]);
    }

    let mut lines = Vec::new();
    for list in lists {
        for entry in list.file.entries() {
            if let Entry::Domain(domain) = entry {
                if let Some(dns) = dns_server {
                    lines.push(format!("server=/{}/{}", domain, dns));
                }
                lines.push(format!("ipset=/{}/{}", domain, list.target.set_name));
            }
        }
    }

    finish(lines)
}

fn finish(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
