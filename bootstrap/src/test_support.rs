//! Test-only doubles and fixtures.
//!
//! Compiled for unit tests and behind the `test-support` feature so
//! integration tests can script the same seams.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::types::{Environment, PhaseOutputs};
use crate::io::cloud::{Access, CloudProbe, Credentials};
use crate::io::config::BootstrapConfig;
use crate::io::output_store::{LoadError, OutputStore, parse_outputs, render_outputs};
use crate::io::paths::{MAIN_CONFIG_FILE, ProjectPaths};
use crate::io::process::{CommandError, CommandRunner, CommandSpec};

/// `terraform output -json` for the tooling environment.
pub const TOOLING_OUTPUTS_JSON: &str = r#"{
  "artifact_bucket_name": {"sensitive": false, "type": "string", "value": "bucket-x"},
  "artifact_bucket_arn": {"sensitive": false, "type": "string", "value": "arn:aws:s3:::bucket-x"},
  "kms_key_arn": {"sensitive": false, "type": "string", "value": "arn:aws:kms:us-east-1:111:key/abc"},
  "repository_clone_url": {"sensitive": false, "type": "string", "value": "https://git-codecommit.us-east-1.amazonaws.com/v1/repos/app-repo"},
  "pipeline_name": {"sensitive": false, "type": "string", "value": "app-pipeline"}
}
"#;

/// `terraform output -json` for the prod environment.
pub const PROD_OUTPUTS_JSON: &str = r#"{
  "codepipeline_role_arn": {"sensitive": false, "type": "string", "value": "arn:aws:iam::222:role/CodePipelineCrossAccountRole"},
  "cloudformation_role_arn": {"sensitive": false, "type": "string", "value": "arn:aws:iam::222:role/CloudFormationDeploymentRole"}
}
"#;

/// Original prod `main.tf` written by [`TestProject`].
pub const PHASE1_MAIN_TF: &str = "module \"iam_roles\" {\n  source          = \"../../modules/iam-roles\"\n  create_policies = false\n}\n";

/// One command seen by [`ScriptedRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// `main.tf` in the working directory at the time of the call.
    pub main_config: Option<String>,
}

#[derive(Debug, Clone)]
struct Response {
    arg: String,
    cwd: Option<PathBuf>,
    stdout: String,
}

/// Command runner that records calls and answers from a script.
///
/// A response or failure matches when any argument equals its trigger (and
/// the working directory matches, if one was given). Unmatched calls succeed
/// with empty stdout.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Vec<Response>,
    failures: Vec<(String, String)>,
    calls: RefCell<Vec<RecordedCommand>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer captures containing `arg` with `stdout`.
    pub fn respond(mut self, arg: &str, stdout: &str) -> Self {
        self.responses.push(Response {
            arg: arg.to_string(),
            cwd: None,
            stdout: stdout.to_string(),
        });
        self
    }

    /// Answer `terraform output -json` run in `dir`.
    pub fn terraform_outputs(mut self, dir: impl Into<PathBuf>, json: &str) -> Self {
        self.responses.push(Response {
            arg: "output".to_string(),
            cwd: Some(dir.into()),
            stdout: json.to_string(),
        });
        self
    }

    /// Fail calls containing `arg` with exit code 1 and `stderr`.
    pub fn fail_with(mut self, arg: &str, stderr: &str) -> Self {
        self.failures.push((arg.to_string(), stderr.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCommand> {
        self.calls.borrow().clone()
    }

    fn record(&self, spec: &CommandSpec) -> Result<Vec<String>, CommandError> {
        let args = spec.arg_strings();
        let main_config = spec
            .cwd
            .as_ref()
            .and_then(|dir| fs::read_to_string(dir.join(MAIN_CONFIG_FILE)).ok());
        self.calls.borrow_mut().push(RecordedCommand {
            program: spec.program.to_string_lossy().into_owned(),
            args: args.clone(),
            cwd: spec.cwd.clone(),
            main_config,
        });
        if let Some((_, stderr)) = self
            .failures
            .iter()
            .find(|(trigger, _)| args.contains(trigger))
        {
            return Err(CommandError::Failed {
                command: spec.to_string(),
                status: "exit code 1".to_string(),
                code: Some(1),
                stderr: stderr.clone(),
            });
        }
        Ok(args)
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<(), CommandError> {
        self.record(spec).map(|_| ())
    }

    fn capture(&self, spec: &CommandSpec) -> Result<String, CommandError> {
        let args = self.record(spec)?;
        let stdout = self
            .responses
            .iter()
            .find(|response| {
                args.contains(&response.arg)
                    && response
                        .cwd
                        .as_ref()
                        .is_none_or(|dir| spec.cwd.as_ref() == Some(dir))
            })
            .map(|response| response.stdout.clone())
            .unwrap_or_default();
        Ok(stdout)
    }
}

/// Output store holding raw JSON text per environment.
#[derive(Debug, Default)]
pub struct MemoryOutputStore {
    raw: RefCell<BTreeMap<Environment, String>>,
}

impl MemoryOutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_raw(self, environment: Environment, raw: &str) -> Self {
        self.raw.borrow_mut().insert(environment, raw.to_string());
        self
    }

    pub fn raw(&self, environment: Environment) -> Option<String> {
        self.raw.borrow().get(&environment).cloned()
    }
}

impl OutputStore for MemoryOutputStore {
    fn location(&self, environment: Environment) -> PathBuf {
        PathBuf::from(format!("memory/{environment}/outputs.json"))
    }

    fn load(&self, environment: Environment) -> Result<PhaseOutputs, LoadError> {
        let location = self.location(environment);
        let Some(raw) = self.raw(environment) else {
            return Err(LoadError::Missing { location });
        };
        parse_outputs(&raw).map_err(|err| LoadError::Malformed {
            location,
            reason: format!("{err:#}"),
        })
    }

    fn save(&self, environment: Environment, outputs: &PhaseOutputs) -> Result<()> {
        let rendered = render_outputs(outputs)?;
        self.raw.borrow_mut().insert(environment, rendered);
        Ok(())
    }
}

/// In-memory account state answering [`CloudProbe`] calls.
///
/// Resources are matched by name only; profiles matter just for
/// `caller_account`. Every call is logged as `"<operation> <args...>"`.
#[derive(Debug, Default)]
pub struct FakeCloud {
    accounts: BTreeMap<String, String>,
    roles: BTreeMap<String, Vec<String>>,
    buckets: BTreeSet<String>,
    keys: BTreeSet<String>,
    repositories: BTreeSet<String>,
    pipelines: BTreeSet<String>,
    assumable: BTreeSet<String>,
    delegated_buckets: BTreeSet<String>,
    calls: RefCell<Vec<String>>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, profile: &str, account: &str) -> Self {
        self.accounts.insert(profile.to_string(), account.to_string());
        self
    }

    pub fn with_role(mut self, name: &str, policies: &[&str]) -> Self {
        self.roles.insert(
            name.to_string(),
            policies.iter().map(|policy| policy.to_string()).collect(),
        );
        self
    }

    pub fn with_bucket(mut self, bucket: &str) -> Self {
        self.buckets.insert(bucket.to_string());
        self
    }

    pub fn with_key(mut self, key_id: &str) -> Self {
        self.keys.insert(key_id.to_string());
        self
    }

    pub fn with_repository(mut self, repository: &str) -> Self {
        self.repositories.insert(repository.to_string());
        self
    }

    pub fn with_pipeline(mut self, pipeline: &str) -> Self {
        self.pipelines.insert(pipeline.to_string());
        self
    }

    pub fn allow_assume(mut self, role_arn: &str) -> Self {
        self.assumable.insert(role_arn.to_string());
        self
    }

    /// Bucket readable with assumed-role credentials.
    pub fn with_delegated_bucket(mut self, bucket: &str) -> Self {
        self.delegated_buckets.insert(bucket.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn log(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn found(set: &BTreeSet<String>, kind: &str, name: &str) -> Result<()> {
        if set.contains(name) {
            Ok(())
        } else {
            Err(anyhow!("{kind} {name} not found"))
        }
    }
}

impl CloudProbe for FakeCloud {
    fn caller_account(&self, profile: &str) -> Result<String> {
        self.log(format!("get-caller-identity {profile}"));
        self.accounts
            .get(profile)
            .cloned()
            .ok_or_else(|| anyhow!("The config profile ({profile}) could not be found"))
    }

    fn get_role(&self, _profile: &str, role_name: &str) -> Result<()> {
        self.log(format!("get-role {role_name}"));
        if self.roles.contains_key(role_name) {
            Ok(())
        } else {
            bail!("NoSuchEntity: role {role_name} cannot be found")
        }
    }

    fn list_role_policies(&self, _profile: &str, role_name: &str) -> Result<Vec<String>> {
        self.log(format!("list-role-policies {role_name}"));
        self.roles
            .get(role_name)
            .cloned()
            .ok_or_else(|| anyhow!("NoSuchEntity: role {role_name} cannot be found"))
    }

    fn head_bucket(&self, access: Access<'_>, bucket: &str) -> Result<()> {
        match access {
            Access::Profile(_) => {
                self.log(format!("head-bucket {bucket}"));
                Self::found(&self.buckets, "bucket", bucket)
            }
            Access::Delegated(_) => {
                self.log(format!("head-bucket (delegated) {bucket}"));
                if self.delegated_buckets.contains(bucket) {
                    Ok(())
                } else {
                    bail!(
                        "An error occurred (403) when calling the HeadBucket operation: Forbidden"
                    )
                }
            }
        }
    }

    fn describe_key(&self, _profile: &str, key_id: &str) -> Result<()> {
        self.log(format!("describe-key {key_id}"));
        Self::found(&self.keys, "key", key_id)
    }

    fn get_repository(&self, _profile: &str, repository: &str) -> Result<()> {
        self.log(format!("get-repository {repository}"));
        Self::found(&self.repositories, "repository", repository)
    }

    fn get_pipeline(&self, _profile: &str, pipeline: &str) -> Result<()> {
        self.log(format!("get-pipeline {pipeline}"));
        Self::found(&self.pipelines, "pipeline", pipeline)
    }

    fn assume_role(
        &self,
        _profile: &str,
        role_arn: &str,
        session_name: &str,
    ) -> Result<Credentials> {
        self.log(format!("assume-role {role_arn} {session_name}"));
        if !self.assumable.contains(role_arn) {
            bail!("AccessDenied: not authorized to perform sts:AssumeRole on {role_arn}");
        }
        Ok(Credentials {
            access_key_id: "ASIAFAKE".to_string(),
            secret_access_key: "fake-secret".to_string(),
            session_token: "fake-token".to_string(),
        })
    }
}

/// Temporary project root with default config, a `terraform.tfvars` and
/// both environment directories (prod holding [`PHASE1_MAIN_TF`]).
pub struct TestProject {
    dir: TempDir,
    config: BootstrapConfig,
    paths: ProjectPaths,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp project")?;
        let config = BootstrapConfig::default();
        let paths = ProjectPaths::new(dir.path(), &config);
        for environment in [Environment::Prod, Environment::Tooling] {
            let env_dir = paths.environment_dir(environment);
            fs::create_dir_all(&env_dir).with_context(|| format!("create {}", env_dir.display()))?;
        }
        fs::write(paths.main_config_path(Environment::Prod), PHASE1_MAIN_TF)
            .context("write prod main.tf")?;
        fs::write(
            &paths.tfvars_path,
            "tooling_account_id = \"111111111111\"\nprod_account_id    = \"222222222222\"\nregion             = \"us-east-1\"\nproject_name       = \"app\"\n",
        )
        .context("write terraform.tfvars")?;
        Ok(Self { dir, config, paths })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    pub fn env_dir(&self, environment: Environment) -> PathBuf {
        self.paths.environment_dir(environment)
    }

    /// Runner answering `terraform output -json` for both environments.
    pub fn terraform(&self) -> ScriptedRunner {
        ScriptedRunner::new()
            .terraform_outputs(self.env_dir(Environment::Prod), PROD_OUTPUTS_JSON)
            .terraform_outputs(self.env_dir(Environment::Tooling), TOOLING_OUTPUTS_JSON)
    }
}
