//! # vrouter - routing configuration compiler for an OpenWrt proxy router
//!
//! Turns one user profile (proxy topology, routing mode, selected block and
//! allow lists) into the files a transparent proxy router needs: per-backend
//! JSON configs, an ipset restore script, a dnsmasq fragment, an iptables
//! script and procd init/watchdog scripts. Nothing is executed here; the
//! artifacts are staged for a transfer layer to copy into the guest.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        vrouter                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: init, validate, compile, show              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Config (serde_yaml)                                        │
//! │    └── profiles, proxiesInfo, firewallInfo, host pins       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Classifier (ipnet)                                         │
//! │    └── list lines -> IPv4/CIDR literal or domain            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Generator                                                  │
//! │    ├── proxy     ss / ssr / kcptun / tunnelDns / relayUDP   │
//! │    ├── ipset     ipset restore script + dnsmasq fragment    │
//! │    ├── firewall  ordered NAT / mangle sections              │
//! │    └── service   init.d scripts + watchdog                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Resolver (dns-lookup)  │  Stager (FileSystem trait)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Provision (RetryPolicy, GuestShell)                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use vrouter::config::Config;
//! use vrouter::fs_abstraction::real_fs;
//! use vrouter::generator::{CompileContext, CompileOptions, Compiler};
//! use vrouter::resolver::{PinnedResolver, SystemResolver};
//! use vrouter::stager::{default_staging_dir, stage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("/etc/vrouter/config.yaml")?;
//!     let profile = config.select_profile(None)?;
//!
//!     let resolver = PinnedResolver::new(config.hosts.clone(), SystemResolver::new());
//!     let bundle = Compiler::new(CompileContext::from_config(&config), &resolver)
//!         .compile(profile, CompileOptions::default())
//!         .await;
//!
//!     for staged in stage(real_fs(), &default_staging_dir(), &bundle)? {
//!         let staged = staged?;
//!         println!("{} -> {}", staged.local_path.display(), staged.remote_path);
//!     }
//!     Ok(())
//! }
//! ```

pub mod classifier;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod fs_abstraction;
pub mod generator;
pub mod provision;
pub mod resolver;
pub mod stager;
pub mod topology;
