//! Canonical filesystem locations for a bootstrap project.

use std::path::{Path, PathBuf};

use crate::core::types::Environment;
use crate::io::config::{BootstrapConfig, DEFAULT_CONFIG_FILE};

pub const OUTPUTS_FILE: &str = "outputs.json";
pub const MAIN_CONFIG_FILE: &str = "main.tf";

/// Directories the setup validator expects relative to the root.
pub const LAYOUT_DIRS: [&str; 6] = [
    "modules/iam-roles",
    "modules/pipeline",
    "environments/tooling",
    "environments/prod",
    "application",
    "scripts",
];

/// All canonical paths for a project root, with config paths resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub environments_dir: PathBuf,
    pub tfvars_path: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>, config: &BootstrapConfig) -> Self {
        let root = root.into();
        Self {
            environments_dir: root.join(&config.environments_dir),
            tfvars_path: root.join(&config.tfvars_path),
            root,
        }
    }

    /// Default config location for `root`.
    pub fn default_config_path(root: &Path) -> PathBuf {
        root.join(DEFAULT_CONFIG_FILE)
    }

    /// Terraform working directory for `environment`.
    pub fn environment_dir(&self, environment: Environment) -> PathBuf {
        self.environments_dir.join(environment.as_str())
    }

    pub fn outputs_path(&self, environment: Environment) -> PathBuf {
        self.environment_dir(environment).join(OUTPUTS_FILE)
    }

    pub fn main_config_path(&self, environment: Environment) -> PathBuf {
        self.environment_dir(environment).join(MAIN_CONFIG_FILE)
    }
}
