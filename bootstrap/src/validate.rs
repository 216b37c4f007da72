//! Read-only validation commands: `validate-setup`, `validate-phase1` and
//! `validate` (cross-account).
//!
//! Every check in a group runs regardless of earlier failures in the same
//! group; the caller renders the [`ValidationReport`] and picks the exit
//! code from [`ValidationReport::passed`].

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::arn::{kms_key_id, repository_name, resource_name};
use crate::core::phases::{
    ARTIFACT_BUCKET_NAME, CLOUDFORMATION_ROLE_ARN, CODEPIPELINE_ROLE_ARN, KMS_KEY_ARN,
    PIPELINE_NAME, REPOSITORY_CLONE_URL,
};
use crate::core::report::{CheckGroup, CheckStatus, GroupReport, ValidationReport};
use crate::core::types::{Environment, PhaseOutputs};
use crate::io::cloud::{Access, CloudProbe};
use crate::io::config::BootstrapConfig;
use crate::io::output_store::OutputStore;
use crate::io::paths::{LAYOUT_DIRS, ProjectPaths};
use crate::io::tfvars;

/// Session name used for the cross-account role assumption.
pub const VALIDATION_SESSION: &str = "ValidationTest";

/// Profiles, directory layout and `terraform.tfvars`.
#[instrument(skip_all)]
pub fn validate_setup<C: CloudProbe>(
    cloud: &C,
    config: &BootstrapConfig,
    paths: &ProjectPaths,
) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();

    let mut profiles = GroupReport::new(CheckGroup::Profiles);
    for environment in [Environment::Tooling, Environment::Prod] {
        let profile = config.profile(environment);
        match cloud.caller_account(profile) {
            Ok(account) => profiles.push(
                format!("{environment} profile '{profile}' (account {account})"),
                CheckStatus::Passed,
            ),
            Err(err) => profiles.push(
                format!("{environment} profile '{profile}'"),
                CheckStatus::Failed(format!("{err:#}")),
            ),
        }
    }
    report.push(profiles);

    let mut layout = GroupReport::new(CheckGroup::Layout);
    for dir in LAYOUT_DIRS {
        let status = if paths.root.join(dir).is_dir() {
            CheckStatus::Passed
        } else {
            CheckStatus::Failed("directory not found".to_string())
        };
        layout.push(dir, status);
    }
    report.push(layout);

    let mut configuration = GroupReport::new(CheckGroup::Configuration);
    let status = tfvars::inspect(&paths.tfvars_path)?;
    let name = paths
        .tfvars_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| paths.tfvars_path.display().to_string());
    if status.exists {
        configuration.push(format!("{name} exists"), CheckStatus::Passed);
        for variable in tfvars::REQUIRED_VARIABLES {
            let check = if status.missing_variables.contains(&variable) {
                CheckStatus::Failed(format!("{variable} not set"))
            } else {
                CheckStatus::Passed
            };
            configuration.push(format!("{name} sets {variable}"), check);
        }
    } else {
        configuration.push(
            format!("{name} exists"),
            CheckStatus::Failed(format!("{} not found", status.path.display())),
        );
    }
    report.push(configuration);

    Ok(report)
}

/// Roles created by phase 1 exist in prod and carry no inline policies yet.
///
/// Missing or malformed prod outputs are an error, not a failed check.
#[instrument(skip_all)]
pub fn validate_phase1<C: CloudProbe, S: OutputStore>(
    cloud: &C,
    store: &S,
    config: &BootstrapConfig,
) -> Result<ValidationReport> {
    let _prod = load(store, Environment::Prod)?;
    let profile = config.profile(Environment::Prod);

    let mut roles = GroupReport::new(CheckGroup::Phase1Roles);
    for role in [&config.roles.codepipeline, &config.roles.cloudformation] {
        if let Err(err) = cloud.get_role(profile, role) {
            roles.push(
                format!("{role} exists"),
                CheckStatus::Failed(format!("{err:#}")),
            );
            continue;
        }
        roles.push(format!("{role} exists"), CheckStatus::Passed);
        let status = match cloud.list_role_policies(profile, role) {
            Ok(policies) if policies.is_empty() => CheckStatus::Passed,
            Ok(policies) => CheckStatus::Warning(format!(
                "{} inline policies found (expected none before phase 3)",
                policies.len()
            )),
            Err(err) => CheckStatus::Warning(format!("could not list policies: {err:#}")),
        };
        roles.push(format!("{role} has no inline policies"), status);
    }

    let mut report = ValidationReport::default();
    report.push(roles);
    Ok(report)
}

/// Resources from phases 2 and 3, then the cross-account path between them.
#[instrument(skip_all)]
pub fn validate_cross_account<C: CloudProbe, S: OutputStore>(
    cloud: &C,
    store: &S,
    config: &BootstrapConfig,
) -> Result<ValidationReport> {
    let prod = load(store, Environment::Prod)?;
    let tooling = load(store, Environment::Tooling)?;
    let tooling_profile = config.profile(Environment::Tooling);
    let prod_profile = config.profile(Environment::Prod);

    let tooling_group = check_tooling(cloud, tooling_profile, &tooling);
    let prod_group = check_prod(cloud, prod_profile, &prod);

    let cross_group = if tooling_group.passed() && prod_group.passed() {
        check_cross_account(cloud, tooling_profile, &prod, &tooling)
    } else {
        GroupReport::skipped(
            CheckGroup::CrossAccount,
            "tooling and prod resource checks must pass first",
        )
    };

    let mut report = ValidationReport::default();
    report.push(tooling_group);
    report.push(prod_group);
    report.push(cross_group);
    Ok(report)
}

fn load<S: OutputStore>(store: &S, environment: Environment) -> Result<PhaseOutputs> {
    store
        .load(environment)
        .with_context(|| format!("load {environment} outputs"))
}

/// Record the outcome of probing `key`'s value, or a failure if the output
/// is missing.
fn probe<F>(group: &mut GroupReport, label: &str, outputs: &PhaseOutputs, key: &str, f: F)
where
    F: FnOnce(&str) -> Result<String>,
{
    let status = match outputs.string(key) {
        Ok(value) => match f(value) {
            Ok(detail) => {
                group.push(format!("{label}: {detail}"), CheckStatus::Passed);
                return;
            }
            Err(err) => CheckStatus::Failed(format!("{err:#}")),
        },
        Err(err) => CheckStatus::Failed(format!("{err:#}")),
    };
    debug!(check = label, "check failed");
    group.push(label, status);
}

fn check_tooling<C: CloudProbe>(cloud: &C, profile: &str, tooling: &PhaseOutputs) -> GroupReport {
    let mut group = GroupReport::new(CheckGroup::ToolingResources);
    probe(
        &mut group,
        "S3 bucket",
        tooling,
        ARTIFACT_BUCKET_NAME,
        |bucket| {
            cloud.head_bucket(Access::Profile(profile), bucket)?;
            Ok(bucket.to_string())
        },
    );
    probe(&mut group, "KMS key", tooling, KMS_KEY_ARN, |arn| {
        let key_id = kms_key_id(arn);
        cloud.describe_key(profile, key_id)?;
        Ok(key_id.to_string())
    });
    probe(
        &mut group,
        "CodeCommit repository",
        tooling,
        REPOSITORY_CLONE_URL,
        |url| {
            let repository = repository_name(url);
            cloud.get_repository(profile, repository)?;
            Ok(repository.to_string())
        },
    );
    probe(
        &mut group,
        "CodePipeline",
        tooling,
        PIPELINE_NAME,
        |pipeline| {
            cloud.get_pipeline(profile, pipeline)?;
            Ok(pipeline.to_string())
        },
    );
    group
}

fn check_prod<C: CloudProbe>(cloud: &C, profile: &str, prod: &PhaseOutputs) -> GroupReport {
    let mut group = GroupReport::new(CheckGroup::ProdResources);
    for key in [CODEPIPELINE_ROLE_ARN, CLOUDFORMATION_ROLE_ARN] {
        let role = match prod.string(key) {
            Ok(arn) => resource_name(arn),
            Err(err) => {
                group.push(
                    format!("IAM role ({key})"),
                    CheckStatus::Failed(format!("{err:#}")),
                );
                continue;
            }
        };
        if let Err(err) = cloud.get_role(profile, role) {
            group.push(
                format!("IAM role: {role}"),
                CheckStatus::Failed(format!("{err:#}")),
            );
            continue;
        }
        group.push(format!("IAM role: {role}"), CheckStatus::Passed);
        let status = match cloud.list_role_policies(profile, role) {
            Ok(policies) if policies.is_empty() => {
                CheckStatus::Warning("no inline policies attached".to_string())
            }
            Ok(_) => CheckStatus::Passed,
            Err(err) => CheckStatus::Failed(format!("{err:#}")),
        };
        group.push(format!("{role} policies"), status);
    }
    group
}

fn check_cross_account<C: CloudProbe>(
    cloud: &C,
    tooling_profile: &str,
    prod: &PhaseOutputs,
    tooling: &PhaseOutputs,
) -> GroupReport {
    let mut group = GroupReport::new(CheckGroup::CrossAccount);
    let assume = "Tooling can assume CodePipeline role";
    let access = "Artifact bucket access from prod role";

    let credentials = prod
        .string(CODEPIPELINE_ROLE_ARN)
        .and_then(|arn| cloud.assume_role(tooling_profile, arn, VALIDATION_SESSION));
    let credentials = match credentials {
        Ok(credentials) => {
            group.push(assume, CheckStatus::Passed);
            credentials
        }
        Err(err) => {
            group.push(assume, CheckStatus::Failed(format!("{err:#}")));
            group.push(
                access,
                CheckStatus::Skipped("role assumption failed".to_string()),
            );
            return group;
        }
    };

    let status = tooling
        .string(ARTIFACT_BUCKET_NAME)
        .and_then(|bucket| cloud.head_bucket(Access::Delegated(&credentials), bucket));
    match status {
        Ok(()) => group.push(access, CheckStatus::Passed),
        Err(err) => group.push(access, CheckStatus::Failed(format!("{err:#}"))),
    }
    group
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        FakeCloud, MemoryOutputStore, PROD_OUTPUTS_JSON, TOOLING_OUTPUTS_JSON, TestProject,
    };

    fn deployed_cloud() -> FakeCloud {
        FakeCloud::new()
            .with_bucket("bucket-x")
            .with_key("abc")
            .with_repository("app-repo")
            .with_pipeline("app-pipeline")
            .with_role("CodePipelineCrossAccountRole", &["artifact-access"])
            .with_role("CloudFormationDeploymentRole", &["deploy"])
            .allow_assume("arn:aws:iam::222:role/CodePipelineCrossAccountRole")
            .with_delegated_bucket("bucket-x")
    }

    fn store() -> MemoryOutputStore {
        MemoryOutputStore::new()
            .with_raw(Environment::Prod, PROD_OUTPUTS_JSON)
            .with_raw(Environment::Tooling, TOOLING_OUTPUTS_JSON)
    }

    #[test]
    fn fully_deployed_project_passes() {
        let cloud = deployed_cloud();
        let report =
            validate_cross_account(&cloud, &store(), &BootstrapConfig::default()).expect("report");
        assert!(report.passed(), "{}", report.render());
        let assumed =
            "assume-role arn:aws:iam::222:role/CodePipelineCrossAccountRole ValidationTest";
        assert!(cloud.calls().contains(&assumed.to_string()));
    }

    #[test]
    fn cross_account_is_skipped_when_tooling_fails() {
        let cloud = FakeCloud::new()
            .with_key("abc")
            .with_repository("app-repo")
            .with_pipeline("app-pipeline")
            .with_role("CodePipelineCrossAccountRole", &["artifact-access"])
            .with_role("CloudFormationDeploymentRole", &["deploy"])
            .allow_assume("arn:aws:iam::222:role/CodePipelineCrossAccountRole");

        let report =
            validate_cross_account(&cloud, &store(), &BootstrapConfig::default()).expect("report");

        assert!(!report.passed());
        let tooling = report.group(CheckGroup::ToolingResources).expect("tooling");
        assert!(!tooling.passed());
        // Other tooling checks still ran.
        assert_eq!(tooling.checks.len(), 4);
        let cross = report.group(CheckGroup::CrossAccount).expect("cross");
        assert!(cross.was_skipped());
        assert!(
            cloud
                .calls()
                .iter()
                .all(|call| !call.starts_with("assume-role"))
        );
    }

    #[test]
    fn roles_without_policies_warn_but_pass() {
        let cloud = FakeCloud::new()
            .with_bucket("bucket-x")
            .with_key("abc")
            .with_repository("app-repo")
            .with_pipeline("app-pipeline")
            .with_role("CodePipelineCrossAccountRole", &[])
            .with_role("CloudFormationDeploymentRole", &[])
            .allow_assume("arn:aws:iam::222:role/CodePipelineCrossAccountRole")
            .with_delegated_bucket("bucket-x");

        let report =
            validate_cross_account(&cloud, &store(), &BootstrapConfig::default()).expect("report");
        let prod = report.group(CheckGroup::ProdResources).expect("prod");
        assert!(prod.passed());
        assert!(
            prod.checks
                .iter()
                .any(|check| matches!(check.status, CheckStatus::Warning(_)))
        );
    }

    #[test]
    fn denied_bucket_access_fails_cross_account_group() {
        let cloud = FakeCloud::new()
            .with_bucket("bucket-x")
            .with_key("abc")
            .with_repository("app-repo")
            .with_pipeline("app-pipeline")
            .with_role("CodePipelineCrossAccountRole", &["artifact-access"])
            .with_role("CloudFormationDeploymentRole", &["deploy"])
            .allow_assume("arn:aws:iam::222:role/CodePipelineCrossAccountRole");

        let report =
            validate_cross_account(&cloud, &store(), &BootstrapConfig::default()).expect("report");
        let cross = report.group(CheckGroup::CrossAccount).expect("cross");
        assert!(!cross.passed());
        assert!(!cross.was_skipped());
    }

    #[test]
    fn missing_outputs_are_fatal() {
        let cloud = deployed_cloud();
        let store = MemoryOutputStore::new().with_raw(Environment::Prod, PROD_OUTPUTS_JSON);
        let err = validate_cross_account(&cloud, &store, &BootstrapConfig::default()).unwrap_err();
        assert!(format!("{err:#}").contains("load tooling outputs"));
        assert!(cloud.calls().is_empty());
    }

    #[test]
    fn phase1_warns_on_existing_policies_and_fails_on_missing_role() {
        let store = MemoryOutputStore::new().with_raw(Environment::Prod, PROD_OUTPUTS_JSON);
        let cloud = FakeCloud::new().with_role("CodePipelineCrossAccountRole", &["early"]);

        let report = validate_phase1(&cloud, &store, &BootstrapConfig::default()).expect("report");
        let roles = report.group(CheckGroup::Phase1Roles).expect("roles");
        let statuses: Vec<&CheckStatus> = roles.checks.iter().map(|check| &check.status).collect();
        assert!(matches!(statuses[0], CheckStatus::Passed));
        assert!(matches!(statuses[1], CheckStatus::Warning(_)));
        assert!(matches!(statuses[2], CheckStatus::Failed(_)));
        assert!(!report.passed());
    }

    #[test]
    fn setup_reports_every_problem() {
        let project = TestProject::new().expect("project");
        let cloud = FakeCloud::new().with_account("tooling", "111111111111");

        let report = validate_setup(&cloud, project.config(), project.paths()).expect("report");

        let profiles = report.group(CheckGroup::Profiles).expect("profiles");
        assert_eq!(
            profiles.checks[0].name,
            "tooling profile 'tooling' (account 111111111111)"
        );
        assert!(matches!(profiles.checks[1].status, CheckStatus::Failed(_)));

        let layout = report.group(CheckGroup::Layout).expect("layout");
        assert_eq!(layout.checks.len(), LAYOUT_DIRS.len());
        assert!(
            layout
                .checks
                .iter()
                .any(|check| check.name == "application" && !check.status.is_ok())
        );

        let configuration = report
            .group(CheckGroup::Configuration)
            .expect("configuration");
        assert!(configuration.passed());
        assert!(!report.passed());
    }
}
