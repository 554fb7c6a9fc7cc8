//! Town configuration.
//!
//! Read from `<town>/settings/gt.yaml` when present, then overridden by
//! environment variables.

use crate::machine::MachinesConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timing and capture sizes for a session exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Lines captured before sending, used to locate new output.
    #[serde(default = "default_baseline_lines")]
    pub baseline_lines: usize,
    /// Lines captured on each poll.
    #[serde(default = "default_capture_lines")]
    pub capture_lines: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long the pane must stay unchanged before the reply is complete.
    #[serde(default = "default_stability_ms")]
    pub stability_ms: u64,
}

fn default_baseline_lines() -> usize {
    10
}

fn default_capture_lines() -> usize {
    100
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_stability_ms() -> u64 {
    2000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            baseline_lines: default_baseline_lines(),
            capture_lines: default_capture_lines(),
            poll_interval_ms: default_poll_interval_ms(),
            stability_ms: default_stability_ms(),
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_ms)
    }
}

/// Settings for the MCP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpSettings {
    #[serde(default = "default_mcp_host")]
    pub host: String,
    #[serde(default = "default_mcp_port")]
    pub port: u16,
    /// Shared secret for request signatures. Unset disables verification.
    #[serde(default)]
    pub instance_token: Option<String>,
    /// Read when `instance_token` is unset.
    #[serde(default = "default_instance_token_file")]
    pub instance_token_file: PathBuf,
    /// Maximum allowed clock skew of a signed request, in seconds.
    #[serde(default = "default_timestamp_freshness")]
    pub timestamp_freshness_secs: u64,
    #[serde(default = "default_task_timeout")]
    pub default_task_timeout_secs: u64,
    #[serde(default = "default_max_task_timeout")]
    pub max_task_timeout_secs: u64,
    /// Model for one-shot runs when the mayor session is down.
    #[serde(default = "default_claude_model")]
    pub claude_model: String,
}

fn default_mcp_host() -> String {
    "0.0.0.0".to_string()
}

fn default_mcp_port() -> u16 {
    8081
}

fn default_instance_token_file() -> PathBuf {
    PathBuf::from("/tmp/gastown/instance_token")
}

fn default_timestamp_freshness() -> u64 {
    300
}

fn default_task_timeout() -> u64 {
    300
}

fn default_max_task_timeout() -> u64 {
    600
}

fn default_claude_model() -> String {
    "opus".to_string()
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            host: default_mcp_host(),
            port: default_mcp_port(),
            instance_token: None,
            instance_token_file: default_instance_token_file(),
            timestamp_freshness_secs: default_timestamp_freshness(),
            default_task_timeout_secs: default_task_timeout(),
            max_task_timeout_secs: default_max_task_timeout(),
            claude_model: default_claude_model(),
        }
    }
}

impl McpSettings {
    /// The configured token, or the trimmed contents of the token file.
    pub fn resolve_token(&self) -> Option<String> {
        self.instance_token
            .clone()
            .or_else(|| std::fs::read_to_string(&self.instance_token_file).ok())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

/// Top-level town configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GtConfig {
    /// Town root on the coordinating machine.
    #[serde(default)]
    pub town_root: PathBuf,
    /// Machine registry file. Defaults to `settings/machines.yaml` in the
    /// town when that file exists.
    #[serde(default)]
    pub machines_file: Option<PathBuf>,
    /// Issue store document, relative to the town root unless absolute.
    #[serde(default = "default_issues_file")]
    pub issues_file: PathBuf,
    /// Prefix of issues this town dispatches.
    #[serde(default = "default_issue_prefix")]
    pub issue_prefix: String,
    #[serde(default = "default_mayor_session")]
    pub mayor_session: String,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub mcp: McpSettings,
}

fn default_issues_file() -> PathBuf {
    PathBuf::from(".beads/issues.json")
}

fn default_issue_prefix() -> String {
    "gt".to_string()
}

fn default_mayor_session() -> String {
    "gt-mayor".to_string()
}

impl Default for GtConfig {
    fn default() -> Self {
        Self {
            town_root: PathBuf::new(),
            machines_file: None,
            issues_file: default_issues_file(),
            issue_prefix: default_issue_prefix(),
            mayor_session: default_mayor_session(),
            session: SessionConfig::default(),
            mcp: McpSettings::default(),
        }
    }
}

impl GtConfig {
    /// Load the configuration for `town_root`, or for `$GT_ROOT` / `~/gt`
    /// when none is given, then apply environment overrides.
    pub fn load(town_root: Option<PathBuf>) -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let root = town_root
            .or_else(|| env("GT_ROOT").map(PathBuf::from))
            .or_else(|| env("HOME").map(|h| Path::new(&h).join("gt")))
            .ok_or_else(|| Error::Config("cannot locate town root: set GT_ROOT".to_string()))?;

        let mut config = Self::from_town(&root)?;
        config.apply_env(env)?;
        Ok(config)
    }

    /// Read `<root>/settings/gt.yaml` if it exists, without environment
    /// overrides.
    pub fn from_town(root: &Path) -> Result<Self> {
        let path = root.join("settings").join("gt.yaml");
        let mut config: Self = if path.exists() {
            serde_yaml::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            Self::default()
        };
        config.town_root = root.to_path_buf();
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("GT_ROOT") {
            self.town_root = PathBuf::from(root);
        }
        if let Some(file) = lookup("GT_MACHINES") {
            self.machines_file = Some(PathBuf::from(file));
        }
        if let Some(host) = lookup("MCP_HOST") {
            self.mcp.host = host;
        }
        if let Some(port) = lookup("MCP_PORT") {
            self.mcp.port = parse_env("MCP_PORT", &port)?;
        }
        if let Some(token) = lookup("INSTANCE_TOKEN").filter(|t| !t.is_empty()) {
            self.mcp.instance_token = Some(token);
        }
        if let Some(file) = lookup("INSTANCE_TOKEN_FILE") {
            self.mcp.instance_token_file = PathBuf::from(file);
        }
        if let Some(secs) = lookup("TIMESTAMP_FRESHNESS") {
            self.mcp.timestamp_freshness_secs = parse_env("TIMESTAMP_FRESHNESS", &secs)?;
        }
        if let Some(secs) = lookup("DEFAULT_TASK_TIMEOUT") {
            self.mcp.default_task_timeout_secs = parse_env("DEFAULT_TASK_TIMEOUT", &secs)?;
        }
        if let Some(secs) = lookup("MAX_TASK_TIMEOUT") {
            self.mcp.max_task_timeout_secs = parse_env("MAX_TASK_TIMEOUT", &secs)?;
        }
        if let Some(model) = lookup("CLAUDE_MODEL") {
            self.mcp.claude_model = model;
        }
        Ok(())
    }

    /// Machines from the registry file (if any), plus the local machine
    /// rooted at the town.
    pub fn machines(&self) -> Result<MachinesConfig> {
        let default_file = self.town_root.join("settings").join("machines.yaml");
        let config = match &self.machines_file {
            Some(file) => MachinesConfig::from_file(file)?,
            None if default_file.exists() => MachinesConfig::from_file(&default_file)?,
            None => MachinesConfig::default(),
        };
        Ok(config.with_local(self.town_root.clone()))
    }

    pub fn issues_path(&self) -> PathBuf {
        self.town_root.join(&self.issues_file)
    }

    /// Working directory of the mayor agent.
    pub fn mayor_dir(&self) -> PathBuf {
        self.town_root.join("mayor")
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} has invalid value {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_without_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = GtConfig::from_town(dir.path()).unwrap();

        assert_eq!(config.town_root, dir.path());
        assert_eq!(config.mayor_session, "gt-mayor");
        assert_eq!(config.session, SessionConfig::default());
        assert_eq!(config.session.stability_window(), Duration::from_secs(2));
        assert_eq!(config.mcp.port, 8081);
        assert_eq!(config.issues_path(), dir.path().join(".beads/issues.json"));
    }

    #[test]
    fn test_settings_file_and_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("settings")).unwrap();
        std::fs::write(
            dir.path().join("settings/gt.yaml"),
            "mayor_session: hq-mayor\nsession:\n  poll_interval_ms: 250\nmcp:\n  port: 9000\n",
        )
        .unwrap();

        let mut config = GtConfig::from_town(dir.path()).unwrap();
        assert_eq!(config.mayor_session, "hq-mayor");
        assert_eq!(config.session.poll_interval_ms, 250);
        assert_eq!(config.session.capture_lines, 100);
        assert_eq!(config.mcp.port, 9000);

        let env: HashMap<&str, &str> = [
            ("MCP_PORT", "9100"),
            ("INSTANCE_TOKEN", "s3cret"),
            ("MAX_TASK_TIMEOUT", "120"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.mcp.port, 9100);
        assert_eq!(config.mcp.resolve_token().as_deref(), Some("s3cret"));
        assert_eq!(config.mcp.max_task_timeout_secs, 120);
    }

    #[test]
    fn test_bad_env_value_is_config_error() {
        let mut config = GtConfig::default();
        let err = config
            .apply_env(|k| (k == "MCP_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_token_file_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("token");
        std::fs::write(&file, "  from-file\n").unwrap();

        let settings = McpSettings {
            instance_token_file: file,
            ..McpSettings::default()
        };
        assert_eq!(settings.resolve_token().as_deref(), Some("from-file"));

        let missing = McpSettings {
            instance_token_file: dir.path().join("absent"),
            ..McpSettings::default()
        };
        assert_eq!(missing.resolve_token(), None);
    }

    #[test]
    fn test_machines_always_include_local() {
        let dir = tempfile::tempdir().unwrap();
        let config = GtConfig::from_town(dir.path()).unwrap();
        let machines = config.machines().unwrap();
        assert_eq!(machines.names().collect::<Vec<_>>(), vec!["local"]);
        assert_eq!(machines.get("local").unwrap().workspace_root, dir.path());
    }
}
