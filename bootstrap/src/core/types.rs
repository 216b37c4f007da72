//! Shared types for deployment targets, phases and captured outputs.
//!
//! Outputs are kept in a `BTreeMap` so anything serialized from them (the
//! `outputs.json` files, summaries) has a stable key order across runs.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Deployment target with its own Terraform working directory and
/// credential profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production account: cross-account IAM roles.
    Prod,
    /// Tooling account: pipeline, repository, artifact bucket and KMS key.
    Tooling,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Tooling => "tooling",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bootstrap stage, ordered by execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Phase 1: IAM roles without policies.
    Roles,
    /// Phase 2: pipeline infrastructure.
    Pipeline,
    /// Phase 3: IAM roles with complete policies.
    Policies,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Roles, Phase::Pipeline, Phase::Policies];

    pub fn number(self) -> u8 {
        match self {
            Phase::Roles => 1,
            Phase::Pipeline => 2,
            Phase::Policies => 3,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Phase::Roles => "IAM roles without policies",
            Phase::Pipeline => "pipeline infrastructure",
            Phase::Policies => "complete IAM policies",
        }
    }

    /// CLI subcommand that runs this phase.
    pub fn command(self) -> &'static str {
        match self {
            Phase::Roles => "bootstrap phase1",
            Phase::Pipeline => "bootstrap phase2",
            Phase::Policies => "bootstrap phase3",
        }
    }

    /// The first phase whose outputs populate `environment`'s outputs file.
    pub fn producer_of(environment: Environment) -> Phase {
        match environment {
            Environment::Prod => Phase::Roles,
            Environment::Tooling => Phase::Pipeline,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phase {} ({})", self.number(), self.title())
    }
}

/// One entry of `terraform output -json`.
///
/// Only `value` is interpreted. Other fields Terraform emits (`sensitive`,
/// `type`) are carried through unchanged so a rewritten file matches what
/// Terraform produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    pub value: Value,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl OutputValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            value: Value::String(value.into()),
            extra: BTreeMap::new(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

/// Captured outputs of one environment, keyed by output name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseOutputs {
    entries: BTreeMap<String, OutputValue>,
}

impl PhaseOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a string output.
    pub fn with_string(mut self, key: &str, value: &str) -> Self {
        self.insert(key, OutputValue::string(value));
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: OutputValue) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&OutputValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the string value of `key`.
    pub fn string(&self, key: &str) -> Result<&str> {
        let entry = self
            .get(key)
            .ok_or_else(|| anyhow!("missing output '{key}'"))?;
        entry
            .as_str()
            .ok_or_else(|| anyhow!("output '{key}' is not a string"))
    }
}
