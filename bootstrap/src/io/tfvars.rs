//! Presence checks for `terraform.tfvars`.
//!
//! The file is owned by Terraform; the bootstrap only confirms it exists and
//! mentions the account variables, by substring search on the raw text.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::prerequisites::PrerequisiteError;

pub const REQUIRED_VARIABLES: [&str; 2] = ["tooling_account_id", "prod_account_id"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TfvarsStatus {
    pub path: PathBuf,
    pub exists: bool,
    /// Required variables with no mention in the file (all of them if the
    /// file is missing).
    pub missing_variables: Vec<&'static str>,
}

/// Fail with [`PrerequisiteError::MissingTfvars`] unless `path` is a file.
pub fn ensure_exists(path: &Path) -> Result<(), PrerequisiteError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PrerequisiteError::MissingTfvars {
            path: path.to_path_buf(),
        })
    }
}

pub fn inspect(path: &Path) -> Result<TfvarsStatus> {
    if !path.is_file() {
        return Ok(TfvarsStatus {
            path: path.to_path_buf(),
            exists: false,
            missing_variables: REQUIRED_VARIABLES.to_vec(),
        });
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(TfvarsStatus {
        path: path.to_path_buf(),
        exists: true,
        missing_variables: REQUIRED_VARIABLES
            .into_iter()
            .filter(|name| !contents.contains(name))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_missing_variables() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("terraform.tfvars");

        let status = inspect(&path).expect("inspect missing");
        assert!(!status.exists);
        assert!(ensure_exists(&path).is_err());

        fs::write(
            &path,
            "tooling_account_id = \"111\"\nregion = \"us-east-1\"\n",
        )
        .expect("write");
        let status = inspect(&path).expect("inspect");
        assert!(status.exists);
        assert_eq!(status.missing_variables, vec!["prod_account_id"]);
        ensure_exists(&path).expect("exists");
    }
}
