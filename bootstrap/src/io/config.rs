//! Bootstrap configuration stored in `bootstrap.toml` at the project root.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::Environment;
use crate::io::atomic::write_atomic;

pub const DEFAULT_CONFIG_FILE: &str = "bootstrap.toml";

/// Bootstrap configuration (TOML).
///
/// Every field has a default matching the standard project layout, so the
/// file is optional. Relative paths resolve against the project root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Terraform executable.
    pub terraform_bin: String,

    /// AWS CLI executable used by the validators.
    pub aws_bin: String,

    /// Directory holding one Terraform working directory per environment.
    pub environments_dir: PathBuf,

    /// Variables file passed to every `terraform plan`.
    pub tfvars_path: PathBuf,

    /// Plan artifact written by `plan` and consumed by `apply`.
    pub plan_artifact: String,

    /// Kill an external command after this many seconds. Unset waits
    /// indefinitely.
    pub command_timeout_secs: Option<u64>,

    /// Region passed to the AWS CLI. Unset defers to the profile.
    pub region: Option<String>,

    pub profiles: ProfileConfig,

    pub roles: RoleConfig,

    pub phase3: Phase3Config,
}

/// Named AWS CLI credential profiles, one per account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProfileConfig {
    pub tooling: String,
    pub prod: String,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            tooling: "tooling".to_string(),
            prod: "prod".to_string(),
        }
    }
}

/// IAM role names created in the prod account by phase 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoleConfig {
    pub codepipeline: String,
    pub cloudformation: String,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            codepipeline: "CodePipelineCrossAccountRole".to_string(),
            cloudformation: "CloudFormationDeploymentRole".to_string(),
        }
    }
}

/// Settings for the generated phase 3 `main.tf`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Phase3Config {
    pub required_version: String,
    pub provider_version: String,
    /// Module path relative to the prod working directory.
    pub module_source: String,
}

impl Default for Phase3Config {
    fn default() -> Self {
        Self {
            required_version: ">= 1.0".to_string(),
            provider_version: "~> 5.0".to_string(),
            module_source: "../../modules/iam-roles".to_string(),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            terraform_bin: "terraform".to_string(),
            aws_bin: "aws".to_string(),
            environments_dir: PathBuf::from("environments"),
            tfvars_path: PathBuf::from("terraform.tfvars"),
            plan_artifact: "tfplan".to_string(),
            command_timeout_secs: None,
            region: None,
            profiles: ProfileConfig::default(),
            roles: RoleConfig::default(),
            phase3: Phase3Config::default(),
        }
    }
}

impl BootstrapConfig {
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("terraform_bin", self.terraform_bin.as_str()),
            ("aws_bin", self.aws_bin.as_str()),
            ("plan_artifact", self.plan_artifact.as_str()),
            ("profiles.tooling", self.profiles.tooling.as_str()),
            ("profiles.prod", self.profiles.prod.as_str()),
            ("roles.codepipeline", self.roles.codepipeline.as_str()),
            ("roles.cloudformation", self.roles.cloudformation.as_str()),
            ("phase3.required_version", self.phase3.required_version.as_str()),
            ("phase3.provider_version", self.phase3.provider_version.as_str()),
            ("phase3.module_source", self.phase3.module_source.as_str()),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(anyhow!("{name} must be non-empty"));
            }
        }
        if self.environments_dir.as_os_str().is_empty() {
            return Err(anyhow!("environments_dir must be non-empty"));
        }
        if self.tfvars_path.as_os_str().is_empty() {
            return Err(anyhow!("tfvars_path must be non-empty"));
        }
        if self.command_timeout_secs == Some(0) {
            return Err(anyhow!("command_timeout_secs must be > 0 when set"));
        }
        if matches!(&self.region, Some(region) if region.trim().is_empty()) {
            return Err(anyhow!("region must be non-empty when set"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    pub fn profile(&self, environment: Environment) -> &str {
        match environment {
            Environment::Prod => &self.profiles.prod,
            Environment::Tooling => &self.profiles.tooling,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BootstrapConfig::default()`.
pub fn load_config(path: &Path) -> Result<BootstrapConfig> {
    if !path.exists() {
        let cfg = BootstrapConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BootstrapConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &BootstrapConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf)
}
