//! Machine definitions and the machine configuration file.

use crate::address::LOCAL_MACHINE;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A logical compute target that workers can run on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    /// Unique machine name, referenced by worker addresses.
    pub name: String,
    #[serde(flatten)]
    pub kind: MachineKind,
    /// Town root on this machine. Relative paths resolve against the
    /// login directory for remote machines.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MachineKind {
    Local,
    Ssh(SshParams),
    Cloud(CloudParams),
}

/// Connection parameters for a plain SSH host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshParams {
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Private key passed to `ssh -i`.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

/// A provisioned cloud instance, reached over SSH.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudParams {
    pub project: String,
    pub zone: String,
    pub instance: String,
    /// External address of the instance; defaults to its internal DNS name.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("gt")
}

fn default_ssh_port() -> u16 {
    22
}

impl CloudParams {
    pub fn ssh_params(&self) -> SshParams {
        let host = self.host.clone().unwrap_or_else(|| {
            format!("{}.{}.c.{}.internal", self.instance, self.zone, self.project)
        });
        SshParams {
            host,
            user: self.user.clone(),
            port: default_ssh_port(),
            identity_file: self.identity_file.clone(),
        }
    }
}

impl Machine {
    pub fn local(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            name: LOCAL_MACHINE.to_string(),
            kind: MachineKind::Local,
            workspace_root: workspace_root.into(),
        }
    }

    /// SSH parameters for remote machines, `None` for local ones.
    pub fn ssh_params(&self) -> Option<SshParams> {
        match &self.kind {
            MachineKind::Local => None,
            MachineKind::Ssh(params) => Some(params.clone()),
            MachineKind::Cloud(params) => Some(params.ssh_params()),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            MachineKind::Local => "local",
            MachineKind::Ssh(_) => "ssh",
            MachineKind::Cloud(_) => "cloud",
        }
    }
}

/// The configured set of machines. Built once at startup and handed to the
/// registry; it is never mutated in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachinesConfig {
    #[serde(default)]
    pub machines: Vec<Machine>,
}

impl MachinesConfig {
    pub fn new(machines: Vec<Machine>) -> Result<Self> {
        let config = Self { machines };
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML or JSON file (chosen by extension).
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Ensure a `local` machine exists, rooted at `workspace_root`.
    pub fn with_local(mut self, workspace_root: impl Into<PathBuf>) -> Self {
        if self.get(LOCAL_MACHINE).is_none() {
            self.machines.push(Machine::local(workspace_root));
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Machine> {
        self.machines.iter().find(|m| m.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.machines.iter().map(|m| m.name.as_str())
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for machine in &self.machines {
            if machine.name.is_empty() || machine.name.contains([':', '/']) {
                return Err(Error::Config(format!(
                    "invalid machine name {:?}",
                    machine.name
                )));
            }
            if !seen.insert(machine.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate machine name {:?}",
                    machine.name
                )));
            }
            match &machine.kind {
                MachineKind::Local => {}
                MachineKind::Ssh(params) if params.host.is_empty() => {
                    return Err(Error::Config(format!(
                        "machine {:?} has an empty ssh host",
                        machine.name
                    )));
                }
                MachineKind::Ssh(_) => {}
                MachineKind::Cloud(params) => {
                    if params.project.is_empty()
                        || params.zone.is_empty()
                        || params.instance.is_empty()
                    {
                        return Err(Error::Config(format!(
                            "machine {:?} needs project, zone and instance",
                            machine.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
