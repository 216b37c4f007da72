//! Three-phase cross-account bootstrap driven by Terraform.
//!
//! IAM roles in the prod account need the tooling account's artifact bucket
//! and KMS key, which only exist once the pipeline is deployed, and the
//! pipeline needs the roles. The bootstrap breaks the cycle in three phases:
//!
//! 1. roles without policies (`prod`),
//! 2. pipeline infrastructure (`tooling`),
//! 3. roles with policies, applied through a patched `main.tf` (`prod`).
//!
//! The crate keeps the same split as other runner-style tools:
//!
//! - **[`core`]**: Pure logic (phase plans, prerequisite checks, fragment
//!   rendering, validation reports). No I/O.
//! - **[`io`]**: Side-effecting adapters (processes, output files, the config
//!   patch, the AWS CLI). Each sits behind a trait so tests can script it.
//!
//! [`deploy`] and [`validate`] coordinate the two to implement CLI commands.

pub mod core;
pub mod deploy;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
