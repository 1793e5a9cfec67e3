//! Show command implementation.

use anyhow::{bail, Result};
use std::path::Path;

use crate::generator::{ArtifactBundle, CompileOptions};

fn render(bundle: &ArtifactBundle, name: &str) -> Result<String> {
    if let Some(artifact) = bundle.find(name) {
        return Ok(artifact.content.clone());
    }

    let failures: Vec<String> = bundle
        .failures()
        .map(|(kind, e)| format!("{}: {}", kind, e))
        .collect();
    if !failures.is_empty() {
        bail!("Artifact '{}' not available; failures:\n  {}", name, failures.join("\n  "));
    }

    let labels: Vec<String> = bundle.artifacts().map(|a| a.label()).collect();
    bail!("Unknown artifact '{}'. Available: {}", name, labels.join(", "))
}

/// Run the show command
pub async fn run(artifact: &str, profile: Option<String>, config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;
    let bundle = super::compile_profile(&config, profile.as_deref(), CompileOptions::default()).await?;
    print!("{}", render(&bundle, artifact)?);
    Ok(())
}
