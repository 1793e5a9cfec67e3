//! Validate command implementation.

use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::config::Config;

/// One summary line per profile.
pub(crate) fn profile_summary(config: &Config) -> Vec<String> {
    let selected = config.select_profile(None).ok().map(|p| p.name.as_str());
    config
        .profiles
        .iter()
        .map(|p| {
            let marker = if Some(p.name.as_str()) == selected { "*" } else { " " };
            let mut addons = Vec::new();
            if p.enable_tunnel_dns {
                addons.push("tunnelDns");
            }
            if p.enable_relay_udp {
                addons.push("relayUDP");
            }
            let addons = if addons.is_empty() {
                String::new()
            } else {
                format!(" +{}", addons.join(" +"))
            };
            format!(
                "{} {:<16} {:<6} {:<10}{}",
                marker,
                p.name,
                p.proxies.tag(),
                p.mode.as_str(),
                addons
            )
        })
        .collect()
}

/// Run the validate command
pub async fn run(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;
    info!("Config {:?} is valid", config_path);

    println!("Profiles:");
    for line in profile_summary(&config) {
        println!("  {}", line.trim_end());
    }
    Ok(())
}
