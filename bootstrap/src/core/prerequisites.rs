//! Prerequisite failures and the pure key check behind them.

use std::path::PathBuf;

use crate::core::phases::Requirement;
use crate::core::types::{Environment, Phase, PhaseOutputs};

/// Reason a phase refused to start. Raised before any external command runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrerequisiteError {
    #[error("{} not found", .path.display())]
    MissingTfvars { path: PathBuf },

    #[error("{} not found (run {} first: `{}`)", .path.display(), .producer, .producer.command())]
    MissingOutputs {
        environment: Environment,
        path: PathBuf,
        producer: Phase,
    },

    #[error("invalid JSON in {environment} outputs {}: {reason}", .path.display())]
    MalformedOutputs {
        environment: Environment,
        path: PathBuf,
        reason: String,
    },

    #[error("missing {key} in {environment} outputs")]
    MissingKey {
        environment: Environment,
        key: String,
    },
}

/// Keys from `keys` that `outputs` lacks, in declaration order.
pub fn missing_keys<'k>(outputs: &PhaseOutputs, keys: &[&'k str]) -> Vec<&'k str> {
    keys.iter()
        .copied()
        .filter(|key| !outputs.contains(key))
        .collect()
}

/// Check one requirement, reporting the first missing key.
pub fn check_requirement(
    requirement: &Requirement,
    outputs: &PhaseOutputs,
) -> Result<(), PrerequisiteError> {
    match missing_keys(outputs, requirement.keys).first() {
        Some(key) => Err(PrerequisiteError::MissingKey {
            environment: requirement.environment,
            key: (*key).to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::phases::{
        ARTIFACT_BUCKET_ARN, ARTIFACT_BUCKET_NAME, KMS_KEY_ARN, POLICIES, PIPELINE,
    };

    #[test]
    fn reports_first_missing_key() {
        let tooling = PhaseOutputs::new().with_string(ARTIFACT_BUCKET_NAME, "bucket-x");
        let requirement = POLICIES.requires[1];

        assert_eq!(
            missing_keys(&tooling, requirement.keys),
            vec![ARTIFACT_BUCKET_ARN, KMS_KEY_ARN]
        );
        let err = check_requirement(&requirement, &tooling).unwrap_err();
        assert_eq!(
            err,
            PrerequisiteError::MissingKey {
                environment: Environment::Tooling,
                key: ARTIFACT_BUCKET_ARN.to_string(),
            }
        );
        assert_eq!(
            err.to_string(),
            "missing artifact_bucket_arn in tooling outputs"
        );
    }

    #[test]
    fn extra_keys_are_ignored() {
        let prod = PhaseOutputs::new()
            .with_string("codepipeline_role_arn", "arn:aws:iam::222:role/a")
            .with_string("cloudformation_role_arn", "arn:aws:iam::222:role/b")
            .with_string("unrelated", "x");
        check_requirement(&PIPELINE.requires[0], &prod).expect("satisfied");
    }

    #[test]
    fn missing_outputs_message_names_producer() {
        let err = PrerequisiteError::MissingOutputs {
            environment: Environment::Prod,
            path: PathBuf::from("environments/prod/outputs.json"),
            producer: Phase::Roles,
        };
        let message = err.to_string();
        assert!(message.starts_with("environments/prod/outputs.json not found"));
        assert!(message.contains("bootstrap phase1"));
    }
}
