//! Cross-account validation driven through the AWS CLI adapter, with the
//! CLI itself scripted.

use std::fs;

use bootstrap::core::report::CheckGroup;
use bootstrap::core::types::Environment;
use bootstrap::io::cloud::AwsCli;
use bootstrap::io::output_store::{FileOutputStore, OutputStore};
use bootstrap::test_support::{
    PROD_OUTPUTS_JSON, ScriptedRunner, TOOLING_OUTPUTS_JSON, TestProject,
};
use bootstrap::validate::validate_cross_account;

const ASSUMED: &str = r#"{"Credentials":{"AccessKeyId":"ASIAEXAMPLE","SecretAccessKey":"s","SessionToken":"t","Expiration":"2026-01-01T00:00:00Z"}}"#;
const POLICIES: &str = r#"{"PolicyNames":["artifact-access"]}"#;

fn deployed_project() -> (TestProject, FileOutputStore) {
    let project = TestProject::new().expect("project");
    let store = FileOutputStore::new(project.paths().clone());
    fs::write(store.location(Environment::Prod), PROD_OUTPUTS_JSON).expect("prod outputs");
    fs::write(store.location(Environment::Tooling), TOOLING_OUTPUTS_JSON).expect("tooling outputs");
    (project, store)
}

fn operations(runner: &ScriptedRunner) -> Vec<String> {
    runner
        .calls()
        .into_iter()
        .map(|call| format!("{} {}", call.args[0], call.args[1]))
        .collect()
}

#[test]
fn healthy_deployment_passes_every_group() {
    let (project, store) = deployed_project();
    let runner = ScriptedRunner::new()
        .respond("list-role-policies", POLICIES)
        .respond("assume-role", ASSUMED);
    let aws = AwsCli::new(&runner, "aws", None);

    let report = validate_cross_account(&aws, &store, project.config()).expect("report");

    assert!(report.passed(), "{}", report.render());
    assert!(report.render().contains("All validations passed."));
    let ops = operations(&runner);
    assert_eq!(ops.last().map(String::as_str), Some("s3api head-bucket"));
    let delegated = runner.calls().pop().expect("last call");
    assert!(!delegated.args.contains(&"--profile".to_string()));
}

#[test]
fn tooling_failure_skips_cross_account_checks() {
    let (project, store) = deployed_project();
    let runner = ScriptedRunner::new()
        .respond("list-role-policies", POLICIES)
        .respond("assume-role", ASSUMED)
        .fail_with(
            "describe-key",
            "An error occurred (NotFoundException) when calling the DescribeKey operation",
        );
    let aws = AwsCli::new(&runner, "aws", None);

    let report = validate_cross_account(&aws, &store, project.config()).expect("report");

    assert!(!report.passed());
    let cross = report
        .group(CheckGroup::CrossAccount)
        .expect("cross-account");
    assert!(cross.was_skipped());
    // The rest of the tooling group still ran.
    let ops = operations(&runner);
    assert!(ops.contains(&"codecommit get-repository".to_string()));
    assert!(ops.contains(&"codepipeline get-pipeline".to_string()));
    assert!(!ops.contains(&"sts assume-role".to_string()));

    let rendered = report.render();
    assert!(rendered.contains("NotFoundException"));
    assert!(rendered.contains("Cross-Account Permissions: NOT RUN"));
    assert!(rendered.contains("Verify Phase 2 deployment completed successfully"));
}
