use std::time::Duration;

use anyhow::{bail, Context, Result};

const DEFAULT_COORDINATOR_PORT: u16 = 5000;
const DEFAULT_AGENT_PORT: u16 = 5001;
const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 2;

/// Coordinator process configuration, loaded once at startup from environment.
/// The coordinator owns the upload/build/push pipeline, so the registry
/// credentials and push toggle live here (matching the original source,
/// where the scheduler process reads `DOCKER_USERNAME`/`DOCKER_PASSWORD`).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub port: u16,
    pub heartbeat_timeout: Duration,
    pub docker_username: Option<String>,
    pub docker_password: Option<String>,
    pub hub_push: bool,
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self> {
        let port = env_parsed("COORDINATOR_PORT", DEFAULT_COORDINATOR_PORT)?;
        let heartbeat_timeout_secs =
            env_parsed("HEARTBEAT_TIMEOUT_SECS", DEFAULT_HEARTBEAT_TIMEOUT_SECS)?;
        let docker_username = std::env::var("DOCKER_USERNAME").ok();
        let docker_password = std::env::var("DOCKER_PASSWORD").ok();
        let hub_push = std::env::var("HUB_PUSH")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            port,
            heartbeat_timeout: Duration::from_secs(heartbeat_timeout_secs),
            docker_username,
            docker_password,
            hub_push,
        })
    }

    /// Push is attempted only when explicitly enabled *and* credentials are
    /// present. Resolves the source's ambiguous "push if creds present"
    /// reading to the safe one: an operator must opt in with `HUB_PUSH=true`.
    pub fn should_push(&self) -> bool {
        self.hub_push && self.docker_username.is_some() && self.docker_password.is_some()
    }
}

/// Worker agent process configuration, loaded once at startup from environment.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Advertised endpoint (host:port) the coordinator uses to reach this agent.
    pub agent_ip: String,
    pub agent_port: u16,
    pub scheduler_url: String,
    pub heartbeat_interval: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let agent_ip =
            std::env::var("AGENT_IP").context("AGENT_IP is required (expected host:port)")?;
        validate_host_port(&agent_ip)?;

        let agent_port = env_parsed("AGENT_PORT", DEFAULT_AGENT_PORT)?;
        let scheduler_url = std::env::var("SCHEDULER_URL")
            .unwrap_or_else(|_| "http://localhost:5000".to_string());
        let heartbeat_interval_secs =
            env_parsed("HEARTBEAT_INTERVAL_SECS", DEFAULT_HEARTBEAT_INTERVAL_SECS)?;

        Ok(Self {
            agent_ip,
            agent_port,
            scheduler_url,
            heartbeat_interval: Duration::from_secs(heartbeat_interval_secs),
        })
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}

/// Require a `host:port` shape: a colon-separated suffix that parses as u16.
/// This is the §9 fix for the source's inconsistent bare-host advertisement.
fn validate_host_port(value: &str) -> Result<()> {
    match value.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => bail!("AGENT_IP must be a full host:port, got {value:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_accepts_full_endpoint() {
        assert!(validate_host_port("10.0.0.4:5001").is_ok());
    }

    #[test]
    fn host_port_rejects_bare_host() {
        assert!(validate_host_port("10.0.0.4").is_err());
    }

    #[test]
    fn host_port_rejects_non_numeric_port() {
        assert!(validate_host_port("10.0.0.4:http").is_err());
    }

    fn base_coordinator_config() -> CoordinatorConfig {
        CoordinatorConfig {
            port: 5000,
            heartbeat_timeout: Duration::from_secs(10),
            docker_username: Some("u".to_string()),
            docker_password: Some("p".to_string()),
            hub_push: false,
        }
    }

    #[test]
    fn should_push_requires_flag_and_both_credentials() {
        let base = base_coordinator_config();
        assert!(!base.should_push(), "push must stay off without HUB_PUSH");

        let mut enabled = base.clone();
        enabled.hub_push = true;
        assert!(enabled.should_push());

        let mut missing_password = enabled.clone();
        missing_password.docker_password = None;
        assert!(!missing_password.should_push());
    }
}
