//! Resource identifiers derived from captured outputs.

/// Trailing path segment of an ARN or URL (`arn:aws:iam::1:role/Name` → `Name`).
pub fn resource_name(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

/// KMS key id from a key ARN.
pub fn kms_key_id(key_arn: &str) -> &str {
    resource_name(key_arn)
}

/// CodeCommit repository name from its HTTPS clone URL.
pub fn repository_name(clone_url: &str) -> &str {
    let last = resource_name(clone_url.trim_end_matches('/'));
    last.strip_suffix(".git").unwrap_or(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_names_from_identifiers() {
        assert_eq!(
            resource_name("arn:aws:iam::222:role/CodePipelineCrossAccountRole"),
            "CodePipelineCrossAccountRole"
        );
        assert_eq!(kms_key_id("arn:aws:kms:us-east-1:111:key/abc"), "abc");
        assert_eq!(
            repository_name("https://git-codecommit.us-east-1.amazonaws.com/v1/repos/app.git"),
            "app"
        );
        assert_eq!(repository_name("https://example.com/repos/app/"), "app");
        assert_eq!(resource_name("plain"), "plain");
    }
}
