//! Parsing of artifact source specs.
//!
//! Accepted forms:
//! - `owner/repo/path[@version]` shorthand
//! - `https://github.com/owner/repo/tree/<branch>/path`
//! - `https://github.com/owner/repo/blob/<branch>/path[.md]`

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceSpecError {
    #[error("malformed source spec: {0}")]
    Malformed(String),
}

/// A parsed upstream source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub owner: String,
    pub repo: String,
    /// Repository-relative path to the artifact; empty for repo roots.
    pub path: String,
    /// Branch (URL forms) or pinned version (`@version` shorthand).
    pub reference: Option<String>,
}

impl SourceSpec {
    /// Parse a user- or marketplace-supplied source spec.
    pub fn parse(input: &str) -> Result<Self, SourceSpecError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SourceSpecError::Malformed("empty spec".to_string()));
        }

        if let Some(rest) = input
            .strip_prefix("https://github.com/")
            .or_else(|| input.strip_prefix("http://github.com/"))
        {
            return Self::parse_github_url(input, rest);
        }
        if input.contains("://") {
            return Err(SourceSpecError::Malformed(input.to_string()));
        }

        Self::parse_shorthand(input)
    }

    fn parse_shorthand(input: &str) -> Result<Self, SourceSpecError> {
        let (spec, reference) = match input.rsplit_once('@') {
            // An @ in the owner segment would not be a version pin.
            Some((spec, version)) if spec.contains('/') && !version.is_empty() => {
                (spec, Some(version.to_string()))
            }
            _ => (input, None),
        };

        let mut parts = spec.splitn(3, '/');
        let owner = parts.next().unwrap_or_default();
        let repo = parts.next().unwrap_or_default();
        let path = parts.next().unwrap_or_default();

        if owner.is_empty() || repo.is_empty() {
            return Err(SourceSpecError::Malformed(input.to_string()));
        }

        Ok(SourceSpec {
            owner: owner.to_string(),
            repo: repo.to_string(),
            path: path.trim_matches('/').to_string(),
            reference,
        })
    }

    fn parse_github_url(original: &str, rest: &str) -> Result<Self, SourceSpecError> {
        let mut parts = rest.splitn(5, '/');
        let owner = parts.next().unwrap_or_default();
        let repo = parts.next().unwrap_or_default();
        let kind = parts.next().unwrap_or_default();
        let branch = parts.next().unwrap_or_default();
        let path = parts.next().unwrap_or_default();

        if owner.is_empty() || repo.is_empty() {
            return Err(SourceSpecError::Malformed(original.to_string()));
        }
        if !matches!(kind, "tree" | "blob") || branch.is_empty() {
            return Err(SourceSpecError::Malformed(original.to_string()));
        }

        Ok(SourceSpec {
            owner: owner.to_string(),
            repo: repo.to_string(),
            path: path.trim_matches('/').to_string(),
            reference: Some(branch.to_string()),
        })
    }

    /// The trailing path segment, used as a fallback artifact name.
    pub fn default_name(&self) -> &str {
        if self.path.is_empty() {
            &self.repo
        } else {
            self.path.rsplit('/').next().unwrap_or(&self.repo)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shorthand_with_version() {
        let spec = SourceSpec::parse("anthropic/skills/canvas-design@v1.2").unwrap();
        assert_eq!(spec.owner, "anthropic");
        assert_eq!(spec.repo, "skills");
        assert_eq!(spec.path, "canvas-design");
        assert_eq!(spec.reference.as_deref(), Some("v1.2"));
        assert_eq!(spec.default_name(), "canvas-design");
    }

    #[test]
    fn parses_shorthand_without_path() {
        let spec = SourceSpec::parse("owner/repo").unwrap();
        assert_eq!(spec.path, "");
        assert_eq!(spec.reference, None);
        assert_eq!(spec.default_name(), "repo");
    }

    #[test]
    fn parses_tree_url() {
        let spec =
            SourceSpec::parse("https://github.com/owner/repo/tree/main/skills/canvas").unwrap();
        assert_eq!(spec.owner, "owner");
        assert_eq!(spec.repo, "repo");
        assert_eq!(spec.reference.as_deref(), Some("main"));
        assert_eq!(spec.path, "skills/canvas");
    }

    #[test]
    fn parses_blob_url_with_md_suffix() {
        let spec =
            SourceSpec::parse("https://github.com/owner/repo/blob/main/commands/fmt.md").unwrap();
        assert_eq!(spec.path, "commands/fmt.md");
        assert_eq!(spec.default_name(), "fmt.md");
    }

    #[test]
    fn rejects_bare_name() {
        assert!(SourceSpec::parse("justaname").is_err());
    }

    #[test]
    fn rejects_non_github_url() {
        assert!(SourceSpec::parse("https://gitlab.com/owner/repo/tree/main/x").is_err());
    }

    #[test]
    fn rejects_url_without_branch() {
        assert!(SourceSpec::parse("https://github.com/owner/repo/tree/").is_err());
    }

    #[test]
    fn empty_input_is_malformed() {
        assert!(SourceSpec::parse("  ").is_err());
    }
}
