//! Persistence for captured phase outputs.
//!
//! The [`OutputStore`] trait is the only cross-phase memory: a phase reads
//! what earlier phases saved for an environment and saves its own capture.
//! [`FileOutputStore`] keeps one `outputs.json` per environment working
//! directory.

use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::types::{Environment, PhaseOutputs};
use crate::io::atomic::write_atomic;
use crate::io::paths::ProjectPaths;

const OUTPUTS_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/terraform_outputs.schema.json"
));

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("{} not found", .location.display())]
    Missing { location: PathBuf },

    #[error("invalid outputs in {}: {reason}", .location.display())]
    Malformed { location: PathBuf, reason: String },

    #[error("read {}", .location.display())]
    Io {
        location: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub trait OutputStore {
    /// Where `environment`'s outputs live, for messages.
    fn location(&self, environment: Environment) -> PathBuf;

    fn load(&self, environment: Environment) -> Result<PhaseOutputs, LoadError>;

    /// Replace `environment`'s outputs wholesale.
    fn save(&self, environment: Environment, outputs: &PhaseOutputs) -> Result<()>;
}

/// Store backed by `environments/<env>/outputs.json`.
#[derive(Debug, Clone)]
pub struct FileOutputStore {
    paths: ProjectPaths,
}

impl FileOutputStore {
    pub fn new(paths: ProjectPaths) -> Self {
        Self { paths }
    }
}

impl OutputStore for FileOutputStore {
    fn location(&self, environment: Environment) -> PathBuf {
        self.paths.outputs_path(environment)
    }

    fn load(&self, environment: Environment) -> Result<PhaseOutputs, LoadError> {
        let location = self.location(environment);
        debug!(path = %location.display(), "loading outputs");
        let contents = match fs::read_to_string(&location) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(LoadError::Missing { location });
            }
            Err(source) => return Err(LoadError::Io { location, source }),
        };
        parse_outputs(&contents).map_err(|err| LoadError::Malformed {
            location,
            reason: format!("{err:#}"),
        })
    }

    fn save(&self, environment: Environment, outputs: &PhaseOutputs) -> Result<()> {
        let location = self.location(environment);
        debug!(path = %location.display(), keys = outputs.len(), "writing outputs");
        write_atomic(&location, render_outputs(outputs)?)
    }
}

/// Parse `terraform output -json` text, checking its shape against the
/// bundled schema first.
pub fn parse_outputs(raw: &str) -> Result<PhaseOutputs> {
    let value: Value = serde_json::from_str(raw).context("parse outputs json")?;
    let schema: Value = serde_json::from_str(OUTPUTS_SCHEMA).context("parse outputs schema")?;
    let validator = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {err}"))?;
    let messages: Vec<String> = validator
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!("schema validation failed: {}", messages.join("; ")));
    }
    serde_json::from_value(value).context("deserialize outputs")
}

/// Pretty JSON with trailing newline.
pub fn render_outputs(outputs: &PhaseOutputs) -> Result<String> {
    let mut buf = serde_json::to_string_pretty(outputs).context("serialize outputs")?;
    buf.push('\n');
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::BootstrapConfig;

    fn store(root: &std::path::Path) -> FileOutputStore {
        FileOutputStore::new(ProjectPaths::new(root, &BootstrapConfig::default()))
    }

    #[test]
    fn load_distinguishes_missing_and_malformed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());

        let err = store.load(Environment::Prod).unwrap_err();
        assert!(matches!(err, LoadError::Missing { .. }));

        let path = store.location(Environment::Prod);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, "{not json").expect("write");
        let err = store.load(Environment::Prod).unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));
    }

    #[test]
    fn schema_rejects_entries_without_value() {
        let err = parse_outputs(r#"{"kms_key_arn": {"sensitive": false}}"#).unwrap_err();
        assert!(format!("{err:#}").contains("schema validation failed"));

        let err = parse_outputs(r#"{"kms_key_arn": "arn"}"#).unwrap_err();
        assert!(format!("{err:#}").contains("schema validation failed"));
    }

    #[test]
    fn save_then_load_preserves_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let raw = r#"{"pipeline_name":{"sensitive":false,"type":"string","value":"app-pipeline"}}"#;
        let outputs = parse_outputs(raw).expect("parse");

        store.save(Environment::Tooling, &outputs).expect("save");
        let loaded = store.load(Environment::Tooling).expect("load");
        assert_eq!(loaded, outputs);
        assert_eq!(
            loaded.string("pipeline_name").expect("value"),
            "app-pipeline"
        );

        let written = fs::read_to_string(store.location(Environment::Tooling)).expect("read");
        assert!(written.ends_with("}\n"));
        assert!(written.contains("\"sensitive\": false"));
    }
}
