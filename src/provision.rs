//! First-boot provisioning of the router guest.
//!
//! The steps run in a fixed order through a [`GuestShell`]; the only step that
//! waits on the guest is the install-marker poll, which runs under a
//! [`RetryPolicy`].

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SecureString;

#[cfg(test)]
use mockall::automock;

/// File the package installer writes `done` to once it has finished.
pub const INSTALL_MARKER_PATH: &str = "/tmp/log/vrouter";

const INSTALL_PACKAGES: &[&str] = &[
    "dnsmasq-full",
    "ipset",
    "openssh-sftp-server",
    "libopenssl",
    "rng-tools",
    "iptables-mod-tproxy",
    "ip",
];

/// Runs one shell command inside the guest and returns its stdout.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GuestShell: Send + Sync {
    async fn execute(&self, cmd: &str) -> Result<String>;
}

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or the attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            debug!("{}: attempt {}/{}", what, attempt, attempts);
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("{}: attempt {} failed: {}", what, attempt, e);
                    last_err = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.backoff).await;
            }
        }

        let err = last_err.unwrap_or_else(|| anyhow!("no attempts made"));
        Err(err.context(format!("{} did not succeed after {} attempts", what, attempts)))
    }
}

/// Wrap `value` in single quotes for the guest's POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapStep {
    ConfigureLan { lan_ip: Ipv4Addr },
    ChangePassword { username: String, password: SecureString },
    InstallPackages,
    AwaitInstallMarker,
    EnableCron,
}

impl BootstrapStep {
    pub fn name(&self) -> &'static str {
        match self {
            BootstrapStep::ConfigureLan { .. } => "configure lan",
            BootstrapStep::ChangePassword { .. } => "change password",
            BootstrapStep::InstallPackages => "install packages",
            BootstrapStep::AwaitInstallMarker => "await install marker",
            BootstrapStep::EnableCron => "enable cron",
        }
    }

    /// Guest command for this step.
    pub fn command(&self) -> String {
        match self {
            BootstrapStep::ConfigureLan { lan_ip } => [
                format!("uci set network.lan.ipaddr='{}'", lan_ip),
                "uci set network.lan.ipv6='0'".to_string(),
                "uci commit network".to_string(),
                "/etc/init.d/network restart".to_string(),
            ]
            .join(" && "),
            BootstrapStep::ChangePassword { username, password } => {
                let pw = password.as_str().replace('\'', r"'\''");
                format!("echo -e '{pw}\\n{pw}' | (passwd {})", shell_quote(username), pw = pw)
            }
            BootstrapStep::InstallPackages => [
                "opkg update".to_string(),
                "opkg remove dnsmasq".to_string(),
                format!("opkg install {}", INSTALL_PACKAGES.join(" ")),
                "/etc/init.d/dropbear restart".to_string(),
                format!("echo \"done\" > {}", INSTALL_MARKER_PATH),
            ]
            .join(" && "),
            BootstrapStep::AwaitInstallMarker => format!("cat {}", INSTALL_MARKER_PATH),
            BootstrapStep::EnableCron => "/etc/init.d/cron enable".to_string(),
        }
    }
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The first-boot step sequence.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    steps: Vec<BootstrapStep>,
    retry: RetryPolicy,
}

impl Bootstrap {
    pub fn new(lan_ip: Ipv4Addr, username: impl Into<String>, password: SecureString) -> Self {
        Self {
            steps: vec![
                BootstrapStep::ConfigureLan { lan_ip },
                BootstrapStep::ChangePassword {
                    username: username.into(),
                    password,
                },
                BootstrapStep::InstallPackages,
                BootstrapStep::AwaitInstallMarker,
                BootstrapStep::EnableCron,
            ],
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn steps(&self) -> &[BootstrapStep] {
        &self.steps
    }

    /// Run every step in order, stopping at the first failure.
    pub async fn run<S: GuestShell + ?Sized>(&self, shell: &S) -> Result<()> {
        for (i, step) in self.steps.iter().enumerate() {
            info!("[{}/{}] {}", i + 1, self.steps.len(), step);
            self.run_step(shell, step)
                .await
                .with_context(|| format!("Bootstrap step '{}' failed", step))?;
        }
        info!("Guest bootstrap complete");
        Ok(())
    }

    async fn run_step<S: GuestShell + ?Sized>(&self, shell: &S, step: &BootstrapStep) -> Result<()> {
        let cmd = step.command();
        match step {
            BootstrapStep::AwaitInstallMarker => {
                let cmd = cmd.as_str();
                self.retry
                    .run("install marker check", move |_| async move {
                        let out = shell.execute(cmd).await?;
                        if out.trim() != "done" {
                            bail!("package install not finished");
                        }
                        Ok::<(), anyhow::Error>(())
                    })
                    .await
            }
            _ => shell.execute(&cmd).await.map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn no_wait(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::ZERO,
        }
    }

    fn bootstrap() -> Bootstrap {
        Bootstrap::new(Ipv4Addr::new(192, 168, 50, 1), "root", SecureString::from("s3cret"))
            .with_retry(no_wait(4))
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.backoff, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = no_wait(4)
            .run("flaky", move |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        bail!("not yet");
                    }
                    Ok::<u32, anyhow::Error>(attempt)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = no_wait(4)
            .run("never", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(anyhow!("still failing")) }
            })
            .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("after 4 attempts"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_between_attempts_only() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_secs(10),
        };
        let start = tokio::time::Instant::now();
        let _: Result<()> = policy.run("timed", |_| async { Err::<(), _>(anyhow!("no")) }).await;
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[test]
    fn test_step_commands() {
        let steps = bootstrap().steps().to_vec();
        assert_eq!(
            steps[0].command(),
            "uci set network.lan.ipaddr='192.168.50.1' && uci set network.lan.ipv6='0' && uci commit network && /etc/init.d/network restart"
        );
        assert_eq!(steps[1].command(), "echo -e 's3cret\\ns3cret' | (passwd 'root')");
        assert_eq!(
            steps[2].command(),
            "opkg update && opkg remove dnsmasq && opkg install dnsmasq-full ipset openssh-sftp-server libopenssl rng-tools iptables-mod-tproxy ip && /etc/init.d/dropbear restart && echo \"done\" > /tmp/log/vrouter"
        );
        assert_eq!(steps[3].command(), "cat /tmp/log/vrouter");
        assert_eq!(steps[4].command(), "/etc/init.d/cron enable");
    }

    #[test]
    fn test_password_quote_is_escaped() {
        let step = BootstrapStep::ChangePassword {
            username: "root".to_string(),
            password: SecureString::from("it's"),
        };
        assert_eq!(step.command(), r"echo -e 'it'\''s\nit'\''s' | (passwd 'root')");
    }

    #[test]
    fn test_step_debug_redacts_password() {
        let bootstrap = bootstrap();
        let step = &bootstrap.steps()[1];
        assert!(!format!("{:?}", step).contains("s3cret"));
    }

    #[tokio::test]
    async fn test_bootstrap_runs_steps_in_order() {
        let mut shell = MockGuestShell::new();
        let mut seq = Sequence::new();
        for prefix in ["uci set", "echo -e", "opkg update"] {
            shell
                .expect_execute()
                .withf(move |cmd| cmd.starts_with(prefix))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(String::new()));
        }
        shell
            .expect_execute()
            .withf(|cmd| cmd == "cat /tmp/log/vrouter")
            .times(2)
            .in_sequence(&mut seq)
            .returning({
                let polls = Arc::new(AtomicU32::new(0));
                move |_| {
                    let n = polls.fetch_add(1, Ordering::SeqCst);
                    Ok(if n == 0 { String::new() } else { "done\n".to_string() })
                }
            });
        shell
            .expect_execute()
            .withf(|cmd| cmd == "/etc/init.d/cron enable")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(String::new()));

        bootstrap().run(&shell).await.unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_stops_at_first_failure() {
        let mut shell = MockGuestShell::new();
        shell
            .expect_execute()
            .withf(|cmd| cmd.starts_with("uci set"))
            .returning(|_| Ok(String::new()));
        shell
            .expect_execute()
            .withf(|cmd| cmd.starts_with("echo -e"))
            .returning(|_| Err(anyhow!("serial console closed")));

        let err = bootstrap().run(&shell).await.unwrap_err();
        assert!(err.to_string().contains("change password"));
    }

    #[tokio::test]
    async fn test_bootstrap_fails_when_marker_never_appears() {
        let mut shell = MockGuestShell::new();
        shell
            .expect_execute()
            .withf(|cmd| cmd == "cat /tmp/log/vrouter")
            .times(4)
            .returning(|_| Err(anyhow!("No such file or directory")));
        shell
            .expect_execute()
            .withf(|cmd| cmd != "cat /tmp/log/vrouter" && cmd != "/etc/init.d/cron enable")
            .returning(|_| Ok(String::new()));

        let err = bootstrap().run(&shell).await.unwrap_err();
        assert!(err.to_string().contains("await install marker"));
    }
}
