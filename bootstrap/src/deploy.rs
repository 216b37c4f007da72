//! Orchestration for `bootstrap phase1|phase2|phase3|deploy`.
//!
//! A phase is a [`PhasePlan`]; [`PhaseExecutor`] checks its prerequisites,
//! runs the Terraform sequence in the target environment (under the config
//! patch when the plan asks for it) and persists the captured outputs.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::ffi::OsString;
use std::fmt::Write as _;
use std::path;

use anyhow::{Context, Result, bail};
use tracing::{info, instrument, warn};

use crate::core::fragment::{FragmentInputs, ModuleSettings, render_fragment};
use crate::core::phases::{
    ARTIFACT_BUCKET_NAME, CLOUDFORMATION_ROLE_ARN, CODEPIPELINE_ROLE_ARN, KMS_KEY_ARN,
    PIPELINE_NAME, PhasePlan, REPOSITORY_CLONE_URL,
};
use crate::core::prerequisites::{PrerequisiteError, check_requirement, missing_keys};
use crate::core::types::{Environment, Phase, PhaseOutputs};
use crate::io::config::BootstrapConfig;
use crate::io::output_store::{LoadError, OutputStore, parse_outputs};
use crate::io::patch::{self, PatchState, run_patched};
use crate::io::paths::ProjectPaths;
use crate::io::process::{CommandRunner, CommandSpec};
use crate::io::tfvars;

/// Outputs loaded while checking a phase's prerequisites, by environment.
pub type Inputs = BTreeMap<Environment, PhaseOutputs>;

/// Result of one completed phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOutcome {
    pub phase: Phase,
    /// Outputs captured from the phase's environment.
    pub outputs: PhaseOutputs,
    /// Outputs of other environments the phase consumed.
    pub inputs: Inputs,
}

/// Load and check everything `plan` requires, in order, failing on the first
/// problem. Prerequisite failures are [`PrerequisiteError`]s.
pub fn check_prerequisites<S: OutputStore>(
    store: &S,
    paths: &ProjectPaths,
    plan: &PhasePlan,
) -> Result<Inputs> {
    tfvars::ensure_exists(&paths.tfvars_path)?;

    let mut inputs = Inputs::new();
    for requirement in plan.requires {
        let environment = requirement.environment;
        let outputs = match inputs.entry(environment) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(load_required(store, environment)?),
        };
        check_requirement(requirement, outputs)?;
    }
    Ok(inputs)
}

fn load_required<S: OutputStore>(store: &S, environment: Environment) -> Result<PhaseOutputs> {
    match store.load(environment) {
        Ok(outputs) => Ok(outputs),
        Err(LoadError::Missing { location }) => Err(PrerequisiteError::MissingOutputs {
            environment,
            path: location,
            producer: Phase::producer_of(environment),
        }
        .into()),
        Err(LoadError::Malformed { location, reason }) => Err(PrerequisiteError::MalformedOutputs {
            environment,
            path: location,
            reason,
        }
        .into()),
        Err(err @ LoadError::Io { .. }) => Err(err.into()),
    }
}

/// Runs phases against one project.
pub struct PhaseExecutor<'a, R: CommandRunner, S: OutputStore> {
    runner: &'a R,
    store: &'a S,
    config: &'a BootstrapConfig,
    paths: &'a ProjectPaths,
}

impl<'a, R: CommandRunner, S: OutputStore> PhaseExecutor<'a, R, S> {
    pub fn new(
        runner: &'a R,
        store: &'a S,
        config: &'a BootstrapConfig,
        paths: &'a ProjectPaths,
    ) -> Self {
        Self {
            runner,
            store,
            config,
            paths,
        }
    }

    /// `terraform init`, `plan`, `apply` and `output -json` in
    /// `environment`'s working directory, then save the outputs.
    ///
    /// Outputs are only written once they parse, so a bad capture leaves the
    /// previous file in place.
    #[instrument(skip(self))]
    pub fn execute(&self, environment: Environment) -> Result<PhaseOutputs> {
        let dir = self.paths.environment_dir(environment);
        let tfvars = path::absolute(&self.paths.tfvars_path)
            .with_context(|| format!("resolve {}", self.paths.tfvars_path.display()))?;
        let artifact = &self.config.plan_artifact;
        let terraform = || CommandSpec::new(&self.config.terraform_bin).cwd(&dir);

        let mut var_file = OsString::from("-var-file=");
        var_file.push(tfvars.as_os_str());
        let steps = [
            terraform().arg("init"),
            terraform()
                .arg("plan")
                .arg(var_file)
                .arg(format!("-out={artifact}")),
            terraform().arg("apply").arg(artifact),
        ];
        for spec in &steps {
            announce(spec);
            self.runner
                .run(spec)
                .with_context(|| format!("deploy {environment}"))?;
        }

        let capture = terraform().args(["output", "-json"]);
        announce(&capture);
        let raw = self
            .runner
            .capture(&capture)
            .with_context(|| format!("capture {environment} outputs"))?;
        let outputs =
            parse_outputs(&raw).with_context(|| format!("invalid {environment} outputs"))?;
        self.store
            .save(environment, &outputs)
            .with_context(|| format!("save {environment} outputs"))?;
        info!(keys = outputs.len(), "outputs saved");
        Ok(outputs)
    }

    /// Run one phase end to end.
    #[instrument(skip_all, fields(phase = phase.number()))]
    pub fn run(&self, phase: Phase) -> Result<PhaseOutcome> {
        let plan = phase.plan();
        let inputs = check_prerequisites(self.store, self.paths, plan)?;
        let dir = self.paths.environment_dir(plan.environment);
        if patch::state(&dir) == PatchState::Interrupted {
            bail!(
                "an interrupted phase 3 patch is pending in {} (run `bootstrap recover` first)",
                dir.display()
            );
        }

        let outputs = if plan.patched {
            let tooling = inputs
                .get(&Environment::Tooling)
                .context("tooling outputs were not loaded")?;
            let fragment = render_fragment(&FragmentInputs::from_outputs(
                self.module_settings(),
                tooling,
            )?)?;
            run_patched(&dir, &fragment, || self.execute(plan.environment))?
        } else {
            self.execute(plan.environment)?
        };

        let missing = missing_keys(&outputs, plan.produces);
        if !missing.is_empty() {
            warn!(missing = ?missing, "{phase} finished without expected outputs");
        }
        Ok(PhaseOutcome {
            phase,
            outputs,
            inputs,
        })
    }

    /// Run every phase in order, calling `on_phase` after each. Stops at the
    /// first failure.
    pub fn run_all<F: FnMut(&PhaseOutcome)>(&self, mut on_phase: F) -> Result<Vec<PhaseOutcome>> {
        let mut outcomes = Vec::with_capacity(Phase::ALL.len());
        for phase in Phase::ALL {
            let outcome = self.run(phase).with_context(|| format!("{phase} failed"))?;
            on_phase(&outcome);
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn module_settings(&self) -> ModuleSettings<'a> {
        let phase3 = &self.config.phase3;
        ModuleSettings {
            required_version: &phase3.required_version,
            provider_version: &phase3.provider_version,
            module_source: &phase3.module_source,
            profile: self.config.profile(Environment::Prod),
        }
    }
}

fn announce(spec: &CommandSpec) {
    println!("  → Running: {spec}");
}

/// Captured string value for display, or `<missing>`.
fn shown<'o>(outputs: Option<&'o PhaseOutputs>, key: &str) -> &'o str {
    outputs
        .and_then(|outputs| outputs.get(key))
        .and_then(|entry| entry.as_str())
        .unwrap_or("<missing>")
}

impl PhaseOutcome {
    fn outputs_of(&self, environment: Environment) -> Option<&PhaseOutputs> {
        if self.phase.plan().environment == environment {
            Some(&self.outputs)
        } else {
            self.inputs.get(&environment)
        }
    }

    /// Human-readable result: the values worth copying and the next step.
    pub fn summary(&self) -> String {
        let prod = self.outputs_of(Environment::Prod);
        let tooling = self.outputs_of(Environment::Tooling);
        let mut out = String::new();
        let _ = writeln!(out, "\n{} complete.", capitalize(&self.phase.to_string()));

        // Phase 1 runs before any tooling outputs exist.
        if self.phase != Phase::Roles {
            let _ = writeln!(out, "\nPipeline resources:");
            for (label, key) in [
                ("Repository URL", REPOSITORY_CLONE_URL),
                ("Pipeline Name", PIPELINE_NAME),
                ("S3 Bucket", ARTIFACT_BUCKET_NAME),
                ("KMS Key ARN", KMS_KEY_ARN),
            ] {
                let _ = writeln!(out, "  {label}: {}", shown(tooling, key));
            }
        }
        let _ = writeln!(out, "\nCross-account roles:");
        for (label, key) in [
            ("CodePipeline Role", CODEPIPELINE_ROLE_ARN),
            ("CloudFormation Role", CLOUDFORMATION_ROLE_ARN),
        ] {
            let _ = writeln!(out, "  {label}: {}", shown(prod, key));
        }

        let next = match self.phase {
            Phase::Roles => "`bootstrap validate-phase1`, then `bootstrap phase2`",
            Phase::Pipeline => "`bootstrap phase3` to attach the IAM policies",
            Phase::Policies => "`bootstrap validate` to check cross-account access",
        };
        let _ = writeln!(out, "\nNext: run {next}");
        out
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::phases::{PIPELINE, POLICIES, ROLES};
    use crate::test_support::{
        MemoryOutputStore, PROD_OUTPUTS_JSON, ScriptedRunner, TOOLING_OUTPUTS_JSON, TestProject,
    };

    #[test]
    fn missing_tfvars_is_checked_first() {
        let project = TestProject::new().expect("project");
        std::fs::remove_file(&project.paths().tfvars_path).expect("remove tfvars");
        let store = MemoryOutputStore::new();

        let err = check_prerequisites(&store, project.paths(), &ROLES).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PrerequisiteError>(),
            Some(PrerequisiteError::MissingTfvars { .. })
        ));
    }

    #[test]
    fn missing_outputs_name_the_producing_phase() {
        let project = TestProject::new().expect("project");
        let store = MemoryOutputStore::new();

        let err = check_prerequisites(&store, project.paths(), &PIPELINE).unwrap_err();
        match err.downcast_ref::<PrerequisiteError>() {
            Some(PrerequisiteError::MissingOutputs { producer, .. }) => {
                assert_eq!(*producer, Phase::Roles);
            }
            other => panic!("expected MissingOutputs, got {other:?}"),
        }
    }

    #[test]
    fn malformed_outputs_are_a_prerequisite_failure() {
        let project = TestProject::new().expect("project");
        let store = MemoryOutputStore::new()
            .with_raw(Environment::Prod, PROD_OUTPUTS_JSON)
            .with_raw(Environment::Tooling, "{\"kms_key_arn\": ");

        let err = check_prerequisites(&store, project.paths(), &POLICIES).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PrerequisiteError>(),
            Some(PrerequisiteError::MalformedOutputs {
                environment: Environment::Tooling,
                ..
            })
        ));
    }

    #[test]
    fn policies_phase_loads_both_environments() {
        let project = TestProject::new().expect("project");
        let store = MemoryOutputStore::new()
            .with_raw(Environment::Prod, PROD_OUTPUTS_JSON)
            .with_raw(Environment::Tooling, TOOLING_OUTPUTS_JSON);

        let inputs = check_prerequisites(&store, project.paths(), &POLICIES).expect("inputs");
        assert_eq!(
            inputs.keys().copied().collect::<Vec<_>>(),
            vec![Environment::Prod, Environment::Tooling]
        );
    }

    #[test]
    fn execute_runs_terraform_sequence_in_environment_dir() {
        let project = TestProject::new().expect("project");
        let store = MemoryOutputStore::new();
        let runner = ScriptedRunner::new()
            .terraform_outputs(project.env_dir(Environment::Prod), PROD_OUTPUTS_JSON);
        let executor = PhaseExecutor::new(&runner, &store, project.config(), project.paths());

        let outputs = executor.execute(Environment::Prod).expect("execute");
        assert_eq!(outputs.len(), 2);

        let calls = runner.calls();
        let subcommands: Vec<&str> = calls.iter().map(|call| call.args[0].as_str()).collect();
        assert_eq!(subcommands, vec!["init", "plan", "apply", "output"]);
        let prod_dir = project.env_dir(Environment::Prod);
        assert!(
            calls
                .iter()
                .all(|call| call.cwd.as_deref() == Some(prod_dir.as_path()))
        );
        let plan = &calls[1].args;
        assert!(plan[1].starts_with("-var-file="));
        assert!(plan[1].ends_with("terraform.tfvars"));
        assert_eq!(plan[2], "-out=tfplan");
        assert_eq!(calls[2].args, vec!["apply", "tfplan"]);
        assert!(store.load(Environment::Prod).is_ok());
    }

    #[test]
    fn unparseable_capture_is_not_saved() {
        let project = TestProject::new().expect("project");
        let store = MemoryOutputStore::new().with_raw(Environment::Prod, PROD_OUTPUTS_JSON);
        let runner = ScriptedRunner::new()
            .terraform_outputs(project.env_dir(Environment::Prod), "Warning: no outputs");
        let executor = PhaseExecutor::new(&runner, &store, project.config(), project.paths());

        assert!(executor.execute(Environment::Prod).is_err());
        assert_eq!(
            store.raw(Environment::Prod).as_deref(),
            Some(PROD_OUTPUTS_JSON)
        );
    }

    #[test]
    fn interrupted_patch_blocks_every_phase() {
        let project = TestProject::new().expect("project");
        let prod_dir = project.env_dir(Environment::Prod);
        std::fs::write(prod_dir.join(patch::JOURNAL_FILE), "{}").expect("journal");
        let store = MemoryOutputStore::new();
        let runner = ScriptedRunner::new();
        let executor = PhaseExecutor::new(&runner, &store, project.config(), project.paths());

        let err = executor.run(Phase::Roles).unwrap_err();
        assert!(err.to_string().contains("bootstrap recover"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn summary_marks_missing_values() {
        let outputs = PhaseOutputs::new().with_string(PIPELINE_NAME, "app-pipeline");
        let outcome = PhaseOutcome {
            phase: Phase::Pipeline,
            outputs,
            inputs: Inputs::new(),
        };
        let summary = outcome.summary();
        assert!(summary.contains("Phase 2 (pipeline infrastructure) complete."));
        assert!(summary.contains("Pipeline Name: app-pipeline"));
        assert!(summary.contains("S3 Bucket: <missing>"));
        assert!(summary.contains("CodePipeline Role: <missing>"));
        assert!(summary.contains("bootstrap phase3"));
    }

    #[test]
    fn policies_summary_shows_tooling_resources_next_to_roles() {
        let inputs = Inputs::from([(
            Environment::Tooling,
            parse_outputs(TOOLING_OUTPUTS_JSON).expect("tooling"),
        )]);
        let outcome = PhaseOutcome {
            phase: Phase::Policies,
            outputs: parse_outputs(PROD_OUTPUTS_JSON).expect("prod"),
            inputs,
        };
        let summary = outcome.summary();
        assert!(summary.contains("Phase 3 (complete IAM policies) complete."));
        assert!(summary.contains("Repository URL: https://git-codecommit"));
        assert!(summary.contains("Pipeline Name: app-pipeline"));
        assert!(summary.contains("S3 Bucket: bucket-x"));
        let role = "CodePipeline Role: arn:aws:iam::222:role/CodePipelineCrossAccountRole";
        assert!(summary.contains(role));
        assert!(!summary.contains("<missing>"));
    }

    #[test]
    fn roles_summary_skips_pipeline_resources() {
        let outcome = PhaseOutcome {
            phase: Phase::Roles,
            outputs: parse_outputs(PROD_OUTPUTS_JSON).expect("prod"),
            inputs: Inputs::new(),
        };
        let summary = outcome.summary();
        assert!(!summary.contains("Pipeline resources"));
        assert!(summary.contains("bootstrap validate-phase1"));
    }
}
