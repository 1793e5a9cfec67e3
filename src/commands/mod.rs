//! CLI command implementations.

pub mod compile;
pub mod init;
pub mod show;
pub mod validate;

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::generator::{ArtifactBundle, CompileContext, CompileOptions, Compiler};
use crate::resolver::{PinnedResolver, SystemResolver};

pub(crate) fn load_config(config_path: &Path) -> Result<Config> {
    Config::load(config_path).with_context(|| {
        format!(
            "Cannot use config {:?} (run 'vrouter init' to create one)",
            config_path
        )
    })
}

/// Compile the selected profile against the system resolver and `hosts` pins.
pub(crate) async fn compile_profile(
    config: &Config,
    profile: Option<&str>,
    options: CompileOptions,
) -> Result<ArtifactBundle> {
    let profile = config.select_profile(profile)?;
    let resolver = PinnedResolver::new(config.hosts.clone(), SystemResolver::new());
    let compiler = Compiler::new(CompileContext::from_config(config), &resolver);
    Ok(compiler.compile(profile, options).await)
}
