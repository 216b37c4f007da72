//! Replacement `main.tf` for the policies phase, rendered from captured
//! tooling outputs.

use anyhow::{Context, Result};
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use crate::core::phases::{ARTIFACT_BUCKET_ARN, ARTIFACT_BUCKET_NAME, KMS_KEY_ARN};
use crate::core::types::PhaseOutputs;

const PHASE3_TEMPLATE: &str = include_str!("templates/phase3_main.tf.j2");

/// Module and provider settings that do not come from outputs.
#[derive(Debug, Clone, Copy)]
pub struct ModuleSettings<'a> {
    pub required_version: &'a str,
    pub provider_version: &'a str,
    pub module_source: &'a str,
    /// Credential profile for the prod provider block.
    pub profile: &'a str,
}

/// Everything the template interpolates.
#[derive(Debug, Clone, Serialize)]
pub struct FragmentInputs<'a> {
    pub required_version: &'a str,
    pub provider_version: &'a str,
    pub module_source: &'a str,
    pub profile: &'a str,
    pub artifact_bucket_name: &'a str,
    pub artifact_bucket_arn: &'a str,
    pub kms_key_arn: &'a str,
}

impl<'a> FragmentInputs<'a> {
    pub fn from_outputs(settings: ModuleSettings<'a>, tooling: &'a PhaseOutputs) -> Result<Self> {
        Ok(Self {
            required_version: settings.required_version,
            provider_version: settings.provider_version,
            module_source: settings.module_source,
            profile: settings.profile,
            artifact_bucket_name: tooling.string(ARTIFACT_BUCKET_NAME)?,
            artifact_bucket_arn: tooling.string(ARTIFACT_BUCKET_ARN)?,
            kms_key_arn: tooling.string(KMS_KEY_ARN)?,
        })
    }
}

/// Render the phase 3 `main.tf`.
pub fn render_fragment(inputs: &FragmentInputs<'_>) -> Result<String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env.add_filter("hcl", hcl_escape);
    env.add_template("phase3_main.tf", PHASE3_TEMPLATE)
        .context("load phase 3 template")?;
    let template = env.get_template("phase3_main.tf")?;
    template.render(inputs).context("render phase 3 template")
}

/// Escape a value for use inside an HCL double-quoted string.
///
/// Plain identifiers and ARNs pass through unchanged.
fn hcl_escape(value: String) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(ch);
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}
