//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vrouter")]
#[command(author, version, about = "Routing configuration compiler for an OpenWrt proxy router")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "/etc/vrouter/config.yaml", global = true)]
    pub config: PathBuf,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Load and validate the config, then list its profiles
    Validate,

    /// Compile a profile and stage the artifacts for transfer
    Compile {
        /// Profile name (default: the active profile)
        #[arg(short, long)]
        profile: Option<String>,

        /// Staging directory (default: <temp dir>/vrouter)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Stage init scripts for every service, not only the active ones
        #[arg(long)]
        all_services: bool,
    },

    /// Compile a profile and print one artifact
    Show {
        /// firewall, ipset, dnsmasq, watchdog, a proxy name (e.g. shadowsocks),
        /// init.d/<service>, or a staging file name
        artifact: String,

        /// Profile name (default: the active profile)
        #[arg(short, long)]
        profile: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_compile() {
        let cli = Cli::try_parse_from([
            "vrouter",
            "--config",
            "/tmp/vr.yaml",
            "compile",
            "--profile",
            "office",
            "--out",
            "/tmp/stage",
            "--all-services",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("/tmp/vr.yaml"));
        match cli.command {
            Commands::Compile {
                profile,
                out,
                all_services,
            } => {
                assert_eq!(profile.as_deref(), Some("office"));
                assert_eq!(out, Some(PathBuf::from("/tmp/stage")));
                assert!(all_services);
            }
            _ => panic!("expected compile"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["vrouter", "show", "firewall", "-v"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("/etc/vrouter/config.yaml"));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["vrouter", "-q", "-v", "validate"]).is_err());
    }
}
