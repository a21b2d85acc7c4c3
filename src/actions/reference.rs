//! Action reference parsing.

use std::path::PathBuf;

use crate::error::{Result, VermontError};

/// A parsed action reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRef {
    /// A filesystem path starting with `./` or `/`, resolved against the
    /// runner's working directory.
    Local { path: PathBuf },

    /// `owner/name@ref`; `name` may contain `/` for sub-directory
    /// actions, `git_ref` is a tag, branch, or commit.
    Remote {
        owner: String,
        name: String,
        git_ref: String,
    },
}

impl ActionRef {
    /// Parse a `uses:` string.
    pub fn parse(reference: &str) -> Result<Self> {
        if reference.is_empty() {
            return Err(VermontError::ActionReferenceInvalid {
                reference: reference.to_string(),
            });
        }

        if reference.starts_with("./") || reference.starts_with('/') {
            return Ok(ActionRef::Local {
                path: PathBuf::from(reference),
            });
        }

        let (base, git_ref) =
            reference
                .rsplit_once('@')
                .ok_or_else(|| VermontError::ActionReferenceInvalid {
                    reference: reference.to_string(),
                })?;

        let (owner, name) =
            base.split_once('/')
                .ok_or_else(|| VermontError::ActionReferenceInvalid {
                    reference: reference.to_string(),
                })?;

        if owner.is_empty() || name.is_empty() || git_ref.is_empty() {
            return Err(VermontError::ActionReferenceInvalid {
                reference: reference.to_string(),
            });
        }

        Ok(ActionRef::Remote {
            owner: owner.to_string(),
            name: name.to_string(),
            git_ref: git_ref.to_string(),
        })
    }

    /// Repository URL under the given registry, for remote references.
    pub fn repository_url(&self, registry: &str) -> Option<String> {
        match self {
            ActionRef::Local { .. } => None,
            ActionRef::Remote { owner, name, .. } => {
                // Sub-directory actions live inside the repository named
                // by the first path segment.
                let repo = name.split('/').next().unwrap_or(name);
                Some(format!("{}/{owner}/{repo}", registry.trim_end_matches('/')))
            }
        }
    }

    /// Sub-directory within the repository, for sub-directory actions.
    pub fn subdirectory(&self) -> Option<&str> {
        match self {
            ActionRef::Local { .. } => None,
            ActionRef::Remote { name, .. } => name.split_once('/').map(|(_, rest)| rest),
        }
    }

    /// Whether this reference points at the local filesystem.
    pub fn is_local(&self) -> bool {
        matches!(self, ActionRef::Local { .. })
    }
}

impl std::fmt::Display for ActionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionRef::Local { path } => write!(f, "{}", path.display()),
            ActionRef::Remote {
                owner,
                name,
                git_ref,
            } => write!(f, "{owner}/{name}@{git_ref}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_remote_reference() {
        let parsed = ActionRef::parse("actions/checkout@v4").unwrap();
        assert_eq!(
            parsed,
            ActionRef::Remote {
                owner: "actions".into(),
                name: "checkout".into(),
                git_ref: "v4".into(),
            }
        );
    }

    #[test]
    fn parses_subdirectory_action() {
        let parsed = ActionRef::parse("acme/tools/setup-env@main").unwrap();
        match &parsed {
            ActionRef::Remote { owner, name, git_ref } => {
                assert_eq!(owner, "acme");
                assert_eq!(name, "tools/setup-env");
                assert_eq!(git_ref, "main");
            }
            _ => panic!("expected remote reference"),
        }
        assert_eq!(parsed.subdirectory(), Some("setup-env"));
    }

    #[test]
    fn parses_local_relative_path() {
        let parsed = ActionRef::parse("./actions/greet").unwrap();
        assert!(parsed.is_local());
    }

    #[test]
    fn parses_local_absolute_path() {
        let parsed = ActionRef::parse("/opt/actions/greet").unwrap();
        assert!(parsed.is_local());
    }

    #[test]
    fn rejects_missing_at() {
        let result = ActionRef::parse("actions/checkout");
        assert!(matches!(
            result,
            Err(VermontError::ActionReferenceInvalid { .. })
        ));
    }

    #[test]
    fn rejects_missing_slash() {
        let result = ActionRef::parse("checkout@v4");
        assert!(matches!(
            result,
            Err(VermontError::ActionReferenceInvalid { .. })
        ));
    }

    #[test]
    fn rejects_empty_reference() {
        assert!(ActionRef::parse("").is_err());
    }

    #[test]
    fn rejects_empty_ref_component() {
        assert!(ActionRef::parse("actions/checkout@").is_err());
    }

    #[test]
    fn last_at_wins_for_refs_containing_at() {
        let parsed = ActionRef::parse("acme/weird@tool@v1").unwrap();
        match parsed {
            ActionRef::Remote { name, git_ref, .. } => {
                assert_eq!(name, "weird@tool");
                assert_eq!(git_ref, "v1");
            }
            _ => panic!("expected remote reference"),
        }
    }

    #[test]
    fn repository_url_uses_registry_and_repo_root() {
        let parsed = ActionRef::parse("acme/tools/setup-env@main").unwrap();
        assert_eq!(
            parsed.repository_url("https://github.com").as_deref(),
            Some("https://github.com/acme/tools")
        );
    }

    #[test]
    fn display_round_trips_remote() {
        let parsed = ActionRef::parse("actions/checkout@v4").unwrap();
        assert_eq!(parsed.to_string(), "actions/checkout@v4");
    }
}
