//! Compile command implementation.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::fs_abstraction::real_fs;
use crate::generator::CompileOptions;
use crate::stager::{default_staging_dir, stage};

/// Run the compile command
pub async fn run(
    profile: Option<String>,
    out: Option<PathBuf>,
    all_services: bool,
    config_path: &Path,
) -> Result<()> {
    let config = super::load_config(config_path)?;
    let bundle =
        super::compile_profile(&config, profile.as_deref(), CompileOptions { all_services }).await?;

    let dir = out.unwrap_or_else(default_staging_dir);
    let staged = stage(real_fs(), &dir, &bundle)?;

    let mut failed = 0;
    for result in &staged {
        match result {
            Ok(file) => println!("  {} -> {}", file.local_path.display(), file.remote_path),
            Err(e) => {
                error!("{}", e);
                failed += 1;
            }
        }
    }
    for (kind, e) in bundle.failures() {
        error!("{}: {}", kind, e);
        failed += 1;
    }

    if failed > 0 {
        bail!(
            "{} artifact(s) failed for profile '{}'; {} staged in {:?}",
            failed,
            bundle.profile,
            staged.len() - staged.iter().filter(|r| r.is_err()).count(),
            dir
        );
    }

    info!(
        "Staged {} artifacts for profile '{}' in {:?}",
        staged.len(),
        bundle.profile,
        dir
    );
    Ok(())
}
