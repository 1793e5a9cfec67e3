//! Init command implementation.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::fs_abstraction::{real_fs, FileSystem};

/// Run the init command
pub async fn run(force: bool, config_path: &Path) -> Result<()> {
    write_template(real_fs(), force, config_path)?;

    info!("Default config written to {:?}", config_path);
    println!("Edit {:?} to add your servers, then run 'vrouter compile'.", config_path);
    Ok(())
}

fn write_template(fs: &dyn FileSystem, force: bool, config_path: &Path) -> Result<()> {
    if fs.exists(config_path) && !force {
        bail!(
            "Config file {:?} already exists (use --force to overwrite)",
            config_path
        );
    }

    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs.create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    fs.write(config_path, Config::generate_default_yaml().as_bytes())
        .with_context(|| format!("Failed to write config file {:?}", config_path))?;
    Ok(())
}
