//! `bootstrap` CLI.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use bootstrap::core::phases::{CLOUDFORMATION_ROLE_ARN, CODEPIPELINE_ROLE_ARN};
use bootstrap::core::report::ValidationReport;
use bootstrap::core::types::{Environment, Phase};
use bootstrap::deploy::{PhaseExecutor, PhaseOutcome};
use bootstrap::exit_codes;
use bootstrap::io::cloud::AwsCli;
use bootstrap::io::config::{BootstrapConfig, load_config, write_config};
use bootstrap::io::output_store::{FileOutputStore, OutputStore};
use bootstrap::io::patch::{self, Recovery};
use bootstrap::io::paths::ProjectPaths;
use bootstrap::io::process::SystemRunner;
use bootstrap::logging;
use bootstrap::validate::{validate_cross_account, validate_phase1, validate_setup};

#[derive(Parser)]
#[command(
    name = "bootstrap",
    version,
    about = "Three-phase cross-account Terraform bootstrap"
)]
struct Cli {
    /// Project root holding `terraform.tfvars` and `environments/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file. Defaults to `<root>/bootstrap.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `bootstrap.toml`.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Phase 1: deploy IAM roles without policies (prod).
    Phase1,
    /// Phase 2: deploy pipeline infrastructure (tooling).
    Phase2,
    /// Phase 3: re-deploy prod roles with complete policies.
    Phase3,
    /// Run all three phases in order.
    Deploy,
    /// Check AWS profiles, directory layout and terraform.tfvars.
    ValidateSetup,
    /// Check the roles created by phase 1.
    ValidatePhase1,
    /// Check deployed resources and cross-account access.
    Validate,
    /// Restore prod `main.tf` after an interrupted phase 3.
    Recover,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(exit_codes::FAILURE);
        }
    }
}

/// Loaded config plus resolved paths for one invocation.
struct Project {
    config: BootstrapConfig,
    paths: ProjectPaths,
}

impl Project {
    fn load(root: &Path, config_path: &Path) -> Result<Self> {
        let config = load_config(config_path)?;
        let paths = ProjectPaths::new(root, &config);
        Ok(Self { config, paths })
    }

    fn runner(&self) -> SystemRunner {
        SystemRunner::new(self.config.command_timeout())
    }

    fn store(&self) -> FileOutputStore {
        FileOutputStore::new(self.paths.clone())
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| ProjectPaths::default_config_path(&cli.root));

    let project = || Project::load(&cli.root, &config_path);
    match cli.command {
        Command::Init { force } => cmd_init(&config_path, force),
        Command::Phase1 => cmd_phase(&project()?, Phase::Roles),
        Command::Phase2 => cmd_phase(&project()?, Phase::Pipeline),
        Command::Phase3 => cmd_phase(&project()?, Phase::Policies),
        Command::Deploy => cmd_deploy(&project()?),
        Command::ValidateSetup => cmd_validate_setup(&project()?),
        Command::ValidatePhase1 => cmd_validate_phase1(&project()?),
        Command::Validate => cmd_validate(&project()?),
        Command::Recover => cmd_recover(&project()?),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        println!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &BootstrapConfig::default())?;
    println!("Wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn banner(phase: Phase) {
    println!("\n=== Phase {}: {} ===", phase.number(), phase.title());
}

fn cmd_phase(project: &Project, phase: Phase) -> Result<i32> {
    let runner = project.runner();
    let store = project.store();
    let executor = PhaseExecutor::new(&runner, &store, &project.config, &project.paths);
    banner(phase);
    let outcome = executor.run(phase)?;
    print!("{}", outcome.summary());
    Ok(exit_codes::OK)
}

fn cmd_deploy(project: &Project) -> Result<i32> {
    let runner = project.runner();
    let store = project.store();
    let executor = PhaseExecutor::new(&runner, &store, &project.config, &project.paths);
    banner(Phase::Roles);
    executor.run_all(|outcome: &PhaseOutcome| {
        print!("{}", outcome.summary());
        if let Some(next) = Phase::ALL.into_iter().find(|phase| *phase > outcome.phase) {
            banner(next);
        }
    })?;
    Ok(exit_codes::OK)
}

fn report_exit(report: &ValidationReport) -> i32 {
    print!("{}", report.render());
    if report.passed() {
        exit_codes::OK
    } else {
        exit_codes::FAILURE
    }
}

fn cmd_validate_setup(project: &Project) -> Result<i32> {
    let runner = project.runner();
    let cloud = AwsCli::new(
        &runner,
        &project.config.aws_bin,
        project.config.region.clone(),
    );
    println!("Validating setup");
    let report = validate_setup(&cloud, &project.config, &project.paths)?;
    Ok(report_exit(&report))
}

fn cmd_validate_phase1(project: &Project) -> Result<i32> {
    let runner = project.runner();
    let store = project.store();
    let cloud = AwsCli::new(
        &runner,
        &project.config.aws_bin,
        project.config.region.clone(),
    );
    println!("Validating phase 1 (IAM roles)");
    let report = validate_phase1(&cloud, &store, &project.config)?;
    let code = report_exit(&report);

    let prod = store.load(Environment::Prod)?;
    println!("\nCaptured role ARNs:");
    for (label, key) in [
        ("CodePipeline", CODEPIPELINE_ROLE_ARN),
        ("CloudFormation", CLOUDFORMATION_ROLE_ARN),
    ] {
        let value = prod
            .get(key)
            .and_then(|entry| entry.as_str())
            .unwrap_or("<missing>");
        println!("  {label}: {value}");
    }
    Ok(code)
}

fn cmd_validate(project: &Project) -> Result<i32> {
    let runner = project.runner();
    let store = project.store();
    let cloud = AwsCli::new(
        &runner,
        &project.config.aws_bin,
        project.config.region.clone(),
    );
    println!("Validating cross-account deployment");
    let report = validate_cross_account(&cloud, &store, &project.config)?;
    Ok(report_exit(&report))
}

fn cmd_recover(project: &Project) -> Result<i32> {
    let dir = project
        .paths
        .environment_dir(Phase::Policies.plan().environment);
    match patch::recover(&dir)? {
        Recovery::Clean => println!("Nothing to recover in {}", dir.display()),
        Recovery::Restored => println!(
            "Restored the original main.tf in {} from backup",
            dir.display()
        ),
        Recovery::DiscardedFragment => println!(
            "Removed a leftover phase 3 fragment from {}; main.tf was not modified",
            dir.display()
        ),
        Recovery::ClearedCommitted => println!(
            "Phase 3 had already been committed in {}; removed the leftover journal",
            dir.display()
        ),
    }
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["bootstrap", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::parse_from(["bootstrap", "phase3", "--root", "/srv/infra"]);
        assert!(matches!(cli.command, Command::Phase3));
        assert_eq!(cli.root, PathBuf::from("/srv/infra"));
        assert!(cli.config.is_none());
    }

    #[test]
    fn parse_kebab_case_validators() {
        let cli = Cli::parse_from(["bootstrap", "validate-phase1"]);
        assert!(matches!(cli.command, Command::ValidatePhase1));
        let cli = Cli::parse_from(["bootstrap", "validate-setup"]);
        assert!(matches!(cli.command, Command::ValidateSetup));
    }
}
