//! Read-only probes of live AWS state.
//!
//! [`CloudProbe`] is what the validators see. [`AwsCli`] implements it by
//! shelling out to the AWS CLI through a [`CommandRunner`], so credential
//! resolution stays with the CLI's own profile configuration.

use std::fmt;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::io::process::{CommandRunner, CommandSpec};

/// Temporary credentials returned by `sts assume-role`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .finish()
    }
}

/// Identity a probe runs as.
#[derive(Debug, Clone, Copy)]
pub enum Access<'a> {
    /// Named CLI profile.
    Profile(&'a str),
    /// Credentials obtained by assuming a role.
    Delegated(&'a Credentials),
}

pub trait CloudProbe {
    /// Account id behind `profile`.
    fn caller_account(&self, profile: &str) -> Result<String>;

    fn get_role(&self, profile: &str, role_name: &str) -> Result<()>;

    /// Names of the role's inline policies.
    fn list_role_policies(&self, profile: &str, role_name: &str) -> Result<Vec<String>>;

    fn head_bucket(&self, access: Access<'_>, bucket: &str) -> Result<()>;

    fn describe_key(&self, profile: &str, key_id: &str) -> Result<()>;

    fn get_repository(&self, profile: &str, repository: &str) -> Result<()>;

    fn get_pipeline(&self, profile: &str, pipeline: &str) -> Result<()>;

    fn assume_role(&self, profile: &str, role_arn: &str, session_name: &str) -> Result<Credentials>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CallerIdentity {
    account: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RolePolicies {
    #[serde(default)]
    policy_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumedRole {
    credentials: Credentials,
}

/// [`CloudProbe`] backed by the `aws` executable.
pub struct AwsCli<'a, R: CommandRunner> {
    runner: &'a R,
    program: String,
    region: Option<String>,
}

impl<'a, R: CommandRunner> AwsCli<'a, R> {
    pub fn new(runner: &'a R, program: impl Into<String>, region: Option<String>) -> Self {
        Self {
            runner,
            program: program.into(),
            region,
        }
    }

    /// `aws <service> <operation> <args> --output json` as `access`.
    pub fn command(
        &self,
        access: Access<'_>,
        service: &str,
        operation: &str,
        args: &[&str],
    ) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.program)
            .arg(service)
            .arg(operation)
            .args(args.iter().copied())
            .args(["--output", "json"]);
        if let Some(region) = &self.region {
            spec = spec.args(["--region", region.as_str()]);
        }
        match access {
            Access::Profile(profile) => spec.args(["--profile", profile]),
            Access::Delegated(credentials) => spec
                .env("AWS_ACCESS_KEY_ID", &credentials.access_key_id)
                .env("AWS_SECRET_ACCESS_KEY", &credentials.secret_access_key)
                .env("AWS_SESSION_TOKEN", &credentials.session_token),
        }
    }

    fn call(
        &self,
        access: Access<'_>,
        service: &str,
        operation: &str,
        args: &[&str],
    ) -> Result<String> {
        let spec = self.command(access, service, operation, args);
        debug!(command = %spec, "aws call");
        Ok(self.runner.capture(&spec)?)
    }

    fn call_json<T: DeserializeOwned>(
        &self,
        access: Access<'_>,
        service: &str,
        operation: &str,
        args: &[&str],
    ) -> Result<T> {
        let stdout = self.call(access, service, operation, args)?;
        serde_json::from_str(&stdout)
            .with_context(|| format!("parse `aws {service} {operation}` output"))
    }
}

impl<R: CommandRunner> CloudProbe for AwsCli<'_, R> {
    #[instrument(skip(self))]
    fn caller_account(&self, profile: &str) -> Result<String> {
        let identity: CallerIdentity =
            self.call_json(Access::Profile(profile), "sts", "get-caller-identity", &[])?;
        Ok(identity.account)
    }

    #[instrument(skip(self))]
    fn get_role(&self, profile: &str, role_name: &str) -> Result<()> {
        self.call(
            Access::Profile(profile),
            "iam",
            "get-role",
            &["--role-name", role_name],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn list_role_policies(&self, profile: &str, role_name: &str) -> Result<Vec<String>> {
        let policies: RolePolicies = self.call_json(
            Access::Profile(profile),
            "iam",
            "list-role-policies",
            &["--role-name", role_name],
        )?;
        Ok(policies.policy_names)
    }

    #[instrument(skip(self, access))]
    fn head_bucket(&self, access: Access<'_>, bucket: &str) -> Result<()> {
        self.call(access, "s3api", "head-bucket", &["--bucket", bucket])?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn describe_key(&self, profile: &str, key_id: &str) -> Result<()> {
        self.call(
            Access::Profile(profile),
            "kms",
            "describe-key",
            &["--key-id", key_id],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn get_repository(&self, profile: &str, repository: &str) -> Result<()> {
        self.call(
            Access::Profile(profile),
            "codecommit",
            "get-repository",
            &["--repository-name", repository],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn get_pipeline(&self, profile: &str, pipeline: &str) -> Result<()> {
        self.call(
            Access::Profile(profile),
            "codepipeline",
            "get-pipeline",
            &["--name", pipeline],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn assume_role(
        &self,
        profile: &str,
        role_arn: &str,
        session_name: &str,
    ) -> Result<Credentials> {
        let assumed: AssumedRole = self.call_json(
            Access::Profile(profile),
            "sts",
            "assume-role",
            &["--role-arn", role_arn, "--role-session-name", session_name],
        )?;
        Ok(assumed.credentials)
    }
}
