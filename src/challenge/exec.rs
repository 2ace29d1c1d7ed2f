//! `dns-01` provider that runs an external program.
//!
//! The program is invoked as
//!
//! ```text
//! <program> present <fqdn> <value>
//! <program> cleanup <fqdn> <value>
//! ```
//!
//! with the record name and value from [`dns01::challenge_info`], or in [`Mode::Raw`] as
//!
//! ```text
//! <program> present -- <domain> <token> <key-auth>
//! <program> cleanup -- <domain> <token> <key-auth>
//! ```
//!
//! Exit status 0 means success. Everything the program prints is logged line by line.

use std::{env, ffi::OsString, path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use eyre::{bail, eyre, WrapErr as _};
use tokio::{
    io::{AsyncBufReadExt as _, AsyncRead, BufReader},
    process::Command,
};

use super::{dns01, Provider};

const ENV_PATH: &str = "EXEC_PATH";
const ENV_MODE: &str = "EXEC_MODE";
const ENV_PROPAGATION_TIMEOUT: &str = "EXEC_PROPAGATION_TIMEOUT";
const ENV_POLLING_INTERVAL: &str = "EXEC_POLLING_INTERVAL";
const ENV_SEQUENCE_INTERVAL: &str = "EXEC_SEQUENCE_INTERVAL";

/// Shape of the program arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Record name and value.
    #[default]
    Default,

    /// Domain, token and key authorization, as received from the resolver.
    Raw,
}

/// Configuration of an [`ExecProvider`].
#[derive(Debug, Clone)]
pub struct Config {
    pub program: PathBuf,
    pub mode: Mode,
    pub propagation_timeout: Duration,
    pub polling_interval: Duration,
    pub sequence_interval: Duration,
}

impl Config {
    /// Configuration for `program` with default timings.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Config {
            program: program.into(),
            mode: Mode::Default,
            propagation_timeout: dns01::DEFAULT_PROPAGATION_TIMEOUT,
            polling_interval: dns01::DEFAULT_POLLING_INTERVAL,
            sequence_interval: dns01::DEFAULT_PROPAGATION_TIMEOUT,
        }
    }

    /// Reads the configuration from the environment.
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `EXEC_PATH` | program to run (required) |
    /// | `EXEC_MODE` | `RAW` selects [`Mode::Raw`] |
    /// | `EXEC_PROPAGATION_TIMEOUT` | seconds, default 60 |
    /// | `EXEC_POLLING_INTERVAL` | seconds, default 2 |
    /// | `EXEC_SEQUENCE_INTERVAL` | seconds, default 60 |
    pub fn from_env() -> eyre::Result<Self> {
        Self::from_lookup(|name| env::var_os(name))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> eyre::Result<Self> {
        let program = lookup(ENV_PATH)
            .filter(|path| !path.is_empty())
            .ok_or_else(|| eyre!("exec: some credentials information are missing: {ENV_PATH}"))?;

        let mut config = Config::new(program);

        if lookup(ENV_MODE).is_some_and(|mode| mode == "RAW") {
            config.mode = Mode::Raw;
        }

        let seconds = |name: &str, default: Duration| -> eyre::Result<Duration> {
            let Some(value) = lookup(name) else {
                return Ok(default);
            };

            value
                .to_str()
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .ok_or_else(|| eyre!("exec: {name} must be a number of seconds, got {value:?}"))
        };

        config.propagation_timeout = seconds(ENV_PROPAGATION_TIMEOUT, config.propagation_timeout)?;
        config.polling_interval = seconds(ENV_POLLING_INTERVAL, config.polling_interval)?;
        config.sequence_interval = seconds(ENV_SEQUENCE_INTERVAL, config.sequence_interval)?;

        Ok(config)
    }
}

/// Publishes `dns-01` records by running a program.
///
/// Declares its own propagation timings and asks to be run [sequentially](Provider::sequential).
#[derive(Debug, Clone)]
pub struct ExecProvider {
    config: Config,
}

impl ExecProvider {
    pub fn new(config: Config) -> Self {
        ExecProvider { config }
    }

    /// Provider configured from the `EXEC_*` environment variables.
    pub fn from_env() -> eyre::Result<Self> {
        Config::from_env().map(Self::new)
    }

    fn args(&self, command: &str, domain: &str, token: &str, key_auth: &str) -> Vec<String> {
        match self.config.mode {
            Mode::Raw => [command, "--", domain, token, key_auth]
                .map(ToOwned::to_owned)
                .to_vec(),

            Mode::Default => {
                let info = dns01::challenge_info(domain, key_auth);
                vec![command.to_owned(), info.effective_fqdn, info.value]
            }
        }
    }

    async fn run(&self, command: &str, domain: &str, token: &str, key_auth: &str) -> eyre::Result<()> {
        let program = &self.config.program;

        let mut child = Command::new(program)
            .args(self.args(command, domain, token, key_auth))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .wrap_err_with(|| format!("exec: start command {}", program.display()))?;

        let (stdout, stderr) = tokio::join!(
            log_lines(child.stdout.take()),
            log_lines(child.stderr.take()),
        );
        stdout.and(stderr).wrap_err("exec: read command output")?;

        let status = child.wait().await.wrap_err("exec: wait command")?;
        if !status.success() {
            bail!("exec: {} {command} failed: {status}", program.display());
        }

        Ok(())
    }
}

async fn log_lines<R: AsyncRead + Unpin>(output: Option<R>) -> std::io::Result<()> {
    let Some(output) = output else {
        return Ok(());
    };

    let mut lines = BufReader::new(output).lines();
    while let Some(line) = lines.next_line().await? {
        log::info!("{line}");
    }

    Ok(())
}

#[async_trait]
impl Provider for ExecProvider {
    async fn present(&self, domain: &str, token: &str, key_auth: &str) -> eyre::Result<()> {
        self.run("present", domain, token, key_auth).await
    }

    async fn clean_up(&self, domain: &str, token: &str, key_auth: &str) -> eyre::Result<()> {
        self.run("cleanup", domain, token, key_auth).await
    }

    fn timeout(&self) -> Option<(Duration, Duration)> {
        Some((self.config.propagation_timeout, self.config.polling_interval))
    }

    fn sequential(&self) -> Option<Duration> {
        Some(self.config.sequence_interval)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect::<HashMap<_, _>>();

        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn config_defaults() {
        let config = Config::from_lookup(lookup(&[("EXEC_PATH", "/usr/local/bin/update-dns")]))
            .unwrap();

        assert_eq!(config.program, PathBuf::from("/usr/local/bin/update-dns"));
        assert_eq!(config.mode, Mode::Default);
        assert_eq!(config.propagation_timeout, Duration::from_secs(60));
        assert_eq!(config.polling_interval, Duration::from_secs(2));
        assert_eq!(config.sequence_interval, Duration::from_secs(60));
    }

    #[test]
    fn config_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("EXEC_PATH", "update-dns"),
            ("EXEC_MODE", "RAW"),
            ("EXEC_PROPAGATION_TIMEOUT", "300"),
            ("EXEC_POLLING_INTERVAL", "5"),
            ("EXEC_SEQUENCE_INTERVAL", "10"),
        ]))
        .unwrap();

        assert_eq!(config.mode, Mode::Raw);
        assert_eq!(config.propagation_timeout, Duration::from_secs(300));
        assert_eq!(config.polling_interval, Duration::from_secs(5));
        assert_eq!(config.sequence_interval, Duration::from_secs(10));

        let provider = ExecProvider::new(config);
        assert_eq!(
            provider.timeout(),
            Some((Duration::from_secs(300), Duration::from_secs(5)))
        );
        assert_eq!(provider.sequential(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn config_errors() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("EXEC_PATH", "")])).is_err());

        let err = Config::from_lookup(lookup(&[
            ("EXEC_PATH", "update-dns"),
            ("EXEC_POLLING_INTERVAL", "2s"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("EXEC_POLLING_INTERVAL"));
    }

    #[test]
    fn arguments_per_mode() {
        let mut config = Config::new("update-dns");
        let provider = ExecProvider::new(config.clone());
        let info = dns01::challenge_info("example.test", "tok.thumb");

        assert_eq!(
            provider.args("present", "example.test", "tok", "tok.thumb"),
            ["present", "_acme-challenge.example.test.", info.value.as_str()]
        );

        config.mode = Mode::Raw;
        let provider = ExecProvider::new(config);
        assert_eq!(
            provider.args("cleanup", "example.test", "tok", "tok.thumb"),
            ["cleanup", "--", "example.test", "tok", "tok.thumb"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_decides_success() {
        let ok = ExecProvider::new(Config::new("true"));
        ok.present("example.test", "tok", "tok.thumb").await.unwrap();
        ok.clean_up("example.test", "tok", "tok.thumb").await.unwrap();

        let failing = ExecProvider::new(Config::new("false"));
        let err = failing
            .present("example.test", "tok", "tok.thumb")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("present failed"), "{err}");

        let missing = ExecProvider::new(Config::new("/nonexistent/update-dns"));
        assert!(missing.present("example.test", "tok", "tok.thumb").await.is_err());
    }
}
