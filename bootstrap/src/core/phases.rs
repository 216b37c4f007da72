//! Phases described as data: target environment, required inputs and
//! produced outputs. One generic executor runs all three.

use crate::core::types::{Environment, Phase};

pub const CODEPIPELINE_ROLE_ARN: &str = "codepipeline_role_arn";
pub const CLOUDFORMATION_ROLE_ARN: &str = "cloudformation_role_arn";
pub const ARTIFACT_BUCKET_NAME: &str = "artifact_bucket_name";
pub const ARTIFACT_BUCKET_ARN: &str = "artifact_bucket_arn";
pub const KMS_KEY_ARN: &str = "kms_key_arn";
pub const REPOSITORY_CLONE_URL: &str = "repository_clone_url";
pub const PIPELINE_NAME: &str = "pipeline_name";

const ROLE_KEYS: &[&str] = &[CODEPIPELINE_ROLE_ARN, CLOUDFORMATION_ROLE_ARN];
const ARTIFACT_KEYS: &[&str] = &[ARTIFACT_BUCKET_NAME, ARTIFACT_BUCKET_ARN, KMS_KEY_ARN];
const PIPELINE_KEYS: &[&str] = &[
    ARTIFACT_BUCKET_NAME,
    ARTIFACT_BUCKET_ARN,
    KMS_KEY_ARN,
    REPOSITORY_CLONE_URL,
    PIPELINE_NAME,
];

/// Keys that must be present in an environment's outputs before a phase runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    pub environment: Environment,
    pub keys: &'static [&'static str],
}

/// Static description of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasePlan {
    pub phase: Phase,
    /// Environment whose working directory is applied.
    pub environment: Environment,
    /// Checked in order; the first failure stops the phase.
    pub requires: &'static [Requirement],
    /// Keys the phase is expected to leave in its outputs file.
    pub produces: &'static [&'static str],
    /// Whether the apply runs under a patched `main.tf`.
    pub patched: bool,
}

pub static ROLES: PhasePlan = PhasePlan {
    phase: Phase::Roles,
    environment: Environment::Prod,
    requires: &[],
    produces: ROLE_KEYS,
    patched: false,
};

pub static PIPELINE: PhasePlan = PhasePlan {
    phase: Phase::Pipeline,
    environment: Environment::Tooling,
    requires: &[Requirement {
        environment: Environment::Prod,
        keys: ROLE_KEYS,
    }],
    produces: PIPELINE_KEYS,
    patched: false,
};

pub static POLICIES: PhasePlan = PhasePlan {
    phase: Phase::Policies,
    environment: Environment::Prod,
    requires: &[
        Requirement {
            environment: Environment::Prod,
            keys: ROLE_KEYS,
        },
        Requirement {
            environment: Environment::Tooling,
            keys: ARTIFACT_KEYS,
        },
    ],
    produces: ROLE_KEYS,
    patched: true,
};

impl Phase {
    pub fn plan(self) -> &'static PhasePlan {
        match self {
            Phase::Roles => &ROLES,
            Phase::Pipeline => &PIPELINE,
            Phase::Policies => &POLICIES,
        }
    }
}
