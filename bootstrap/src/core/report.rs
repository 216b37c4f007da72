//! Aggregated results of read-only validation checks.

use std::fmt::Write as _;

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    /// Passed, with something the operator should look at.
    Warning(String),
    Failed(String),
    /// Not attempted; counts as a failure.
    Skipped(String),
}

impl CheckStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, CheckStatus::Passed | CheckStatus::Warning(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
}

/// Independent group of checks reported together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckGroup {
    Profiles,
    Layout,
    Configuration,
    Phase1Roles,
    ToolingResources,
    ProdResources,
    CrossAccount,
}

impl CheckGroup {
    pub fn title(self) -> &'static str {
        match self {
            CheckGroup::Profiles => "AWS Profiles",
            CheckGroup::Layout => "Directory Structure",
            CheckGroup::Configuration => "Configuration",
            CheckGroup::Phase1Roles => "Production Account Roles",
            CheckGroup::ToolingResources => "Tooling Account Resources",
            CheckGroup::ProdResources => "Production Account Resources",
            CheckGroup::CrossAccount => "Cross-Account Permissions",
        }
    }

    /// Remediation hints printed when the group fails.
    pub fn hints(self) -> &'static [&'static str] {
        match self {
            CheckGroup::Profiles => &["Configure the tooling and prod AWS CLI profiles"],
            CheckGroup::Layout => &["Create the missing directories"],
            CheckGroup::Configuration => {
                &["Create terraform.tfvars with tooling_account_id and prod_account_id"]
            }
            CheckGroup::Phase1Roles => &["Run phase 1 first: `bootstrap phase1`"],
            CheckGroup::ToolingResources => &[
                "Check tooling account AWS profile configuration",
                "Verify Phase 2 deployment completed successfully",
            ],
            CheckGroup::ProdResources => &[
                "Check prod account AWS profile configuration",
                "Verify Phases 1 and 3 deployment completed successfully",
            ],
            CheckGroup::CrossAccount => &[
                "Verify all three phases completed successfully",
                "Check IAM role trust relationships",
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupReport {
    pub group: CheckGroup,
    pub checks: Vec<CheckResult>,
}

impl GroupReport {
    pub fn new(group: CheckGroup) -> Self {
        Self {
            group,
            checks: Vec::new(),
        }
    }

    /// A group that was not run at all.
    pub fn skipped(group: CheckGroup, reason: &str) -> Self {
        let mut report = Self::new(group);
        report.push(group.title(), CheckStatus::Skipped(reason.to_string()));
        report
    }

    pub fn push(&mut self, name: impl Into<String>, status: CheckStatus) {
        self.checks.push(CheckResult {
            name: name.into(),
            status,
        });
    }

    /// An empty group has nothing to vouch for and does not pass.
    pub fn passed(&self) -> bool {
        !self.checks.is_empty() && self.checks.iter().all(|check| check.status.is_ok())
    }

    pub fn was_skipped(&self) -> bool {
        self.checks
            .iter()
            .all(|check| matches!(check.status, CheckStatus::Skipped(_)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub groups: Vec<GroupReport>,
}

impl ValidationReport {
    pub fn push(&mut self, group: GroupReport) {
        self.groups.push(group);
    }

    pub fn group(&self, group: CheckGroup) -> Option<&GroupReport> {
        self.groups.iter().find(|report| report.group == group)
    }

    pub fn passed(&self) -> bool {
        !self.groups.is_empty() && self.groups.iter().all(GroupReport::passed)
    }

    /// Per-check detail followed by a per-group summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for group in &self.groups {
            let _ = writeln!(out, "\n{}:", group.group.title());
            for check in &group.checks {
                let line = match &check.status {
                    CheckStatus::Passed => format!("  [ok]   {}", check.name),
                    CheckStatus::Warning(reason) => format!("  [warn] {}: {reason}", check.name),
                    CheckStatus::Failed(reason) => format!("  [FAIL] {}: {reason}", check.name),
                    CheckStatus::Skipped(reason) => format!("  [skip] {}: {reason}", check.name),
                };
                let _ = writeln!(out, "{line}");
            }
        }

        let _ = writeln!(out, "\n{}", "=".repeat(60));
        let _ = writeln!(out, "Validation Summary");
        let _ = writeln!(out, "{}", "=".repeat(60));
        for group in &self.groups {
            let verdict = if group.passed() {
                "OK"
            } else if group.was_skipped() {
                "NOT RUN"
            } else {
                "FAILED"
            };
            let _ = writeln!(out, "{}: {verdict}", group.group.title());
        }

        if self.passed() {
            let _ = writeln!(out, "\nAll validations passed.");
        } else {
            let _ = writeln!(out, "\nSome validations failed. Common fixes:");
            for group in self.groups.iter().filter(|group| !group.passed()) {
                for hint in group.group.hints() {
                    let _ = writeln!(out, "  - {hint}");
                }
            }
        }
        out
    }
}
