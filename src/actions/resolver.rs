//! Action resolution and on-disk caching.
//!
//! Remote actions are materialised under
//! `<cache_root>/<owner>/<repo>/<ref>/` with the VCS metadata directory
//! stripped; for sub-directory actions the action root is the named
//! sub-directory of that tree. A cache entry is valid when an
//! `action.yml` or `action.yaml` is present at the action root.
//!
//! Fetching stages into a sibling temporary directory and publishes with
//! an atomic rename, so concurrent resolution of the same reference
//! cannot corrupt the cache: the loser of the race finds the entry
//! already published and discards its staging directory.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::actions::metadata::{self, ActionMetadata};
use crate::actions::reference::ActionRef;
use crate::error::{Result, VermontError};

/// A reference resolved to an on-disk action tree with loaded metadata.
#[derive(Debug, Clone)]
pub struct ResolvedAction {
    /// The original reference string.
    pub reference: String,

    /// Root of the materialised action (the directory holding its
    /// metadata file).
    pub path: PathBuf,

    /// Parsed metadata.
    pub metadata: ActionMetadata,
}

/// Resolves action references against the cache, fetching on miss.
pub struct ActionResolver {
    cache_root: PathBuf,
    registry: String,
    cache_enabled: bool,
}

impl ActionResolver {
    /// Create a resolver rooted at the given cache directory.
    pub fn new(cache_root: impl Into<PathBuf>, registry: impl Into<String>) -> Self {
        Self {
            cache_root: cache_root.into(),
            registry: registry.into(),
            cache_enabled: true,
        }
    }

    /// Disable reuse of cached entries (fresh trees are still written).
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// The cache root directory.
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Resolve a reference to an action root and its metadata.
    ///
    /// Local references resolve against `work_dir`; remote references go
    /// through the cache.
    pub fn resolve(&self, reference: &str, work_dir: &Path) -> Result<ResolvedAction> {
        let parsed = ActionRef::parse(reference)?;

        let root = match &parsed {
            ActionRef::Local { path } => {
                let absolute = if path.is_absolute() {
                    path.clone()
                } else {
                    work_dir.join(path)
                };
                if !absolute.is_dir() {
                    return Err(VermontError::ActionNotFound { path: absolute });
                }
                absolute
            }
            ActionRef::Remote { .. } => self.ensure_cached(reference, &parsed)?,
        };

        let metadata = ActionMetadata::load(&root)?;

        Ok(ResolvedAction {
            reference: reference.to_string(),
            path: root,
            metadata,
        })
    }

    /// Where the repository tree for a remote reference lives in the
    /// cache: `<cache_root>/<owner>/<repo>/<ref>`.
    pub fn tree_path(&self, parsed: &ActionRef) -> Option<PathBuf> {
        match parsed {
            ActionRef::Local { .. } => None,
            ActionRef::Remote {
                owner,
                name,
                git_ref,
            } => {
                let repo = name.split('/').next().unwrap_or(name);
                Some(self.cache_root.join(owner).join(repo).join(git_ref))
            }
        }
    }

    /// Return the action root for a remote reference, fetching the tree
    /// first if absent.
    fn ensure_cached(&self, reference: &str, parsed: &ActionRef) -> Result<PathBuf> {
        let tree = self
            .tree_path(parsed)
            .expect("remote reference has a tree path");

        let action_root = match parsed.subdirectory() {
            Some(sub) => tree.join(sub),
            None => tree.clone(),
        };

        if self.cache_enabled && metadata::metadata_path(&action_root).is_some() {
            debug!(action = reference, path = %action_root.display(), "Action cache hit");
            return Ok(action_root);
        }

        self.fetch(reference, parsed, &tree)?;

        if metadata::metadata_path(&action_root).is_none() {
            return Err(VermontError::ActionNotFound { path: action_root });
        }

        Ok(action_root)
    }

    /// Fetch a remote action tree into the cache.
    ///
    /// A shallow clone of the ref is attempted first; if the ref is not a
    /// branch or tag the fallback is a full clone followed by an explicit
    /// checkout. The tree is staged in a sibling temporary directory and
    /// renamed into place.
    fn fetch(&self, reference: &str, parsed: &ActionRef, tree: &Path) -> Result<()> {
        let url = parsed
            .repository_url(&self.registry)
            .expect("remote reference has a repository url");

        let ActionRef::Remote { git_ref, .. } = parsed else {
            unreachable!("fetch is only called for remote references");
        };

        let parent = tree.parent().ok_or_else(|| VermontError::ActionFetchFailed {
            reference: reference.to_string(),
            message: "cache path has no parent directory".to_string(),
        })?;
        std::fs::create_dir_all(parent)?;

        let staging = tempfile::Builder::new()
            .prefix(".fetch-")
            .tempdir_in(parent)?;
        let clone_target = staging.path().join("tree");

        info!(action = reference, url = %url, "Fetching action");

        if !self.shallow_clone(reference, &url, git_ref, &clone_target)? {
            self.full_clone_and_checkout(reference, &url, git_ref, &clone_target)?;
        }

        let _ = std::fs::remove_dir_all(clone_target.join(".git"));

        if tree.exists() {
            // A concurrent resolver published first; its tree is as good
            // as ours.
            return Ok(());
        }

        std::fs::rename(&clone_target, tree)?;
        Ok(())
    }

    fn shallow_clone(
        &self,
        reference: &str,
        url: &str,
        git_ref: &str,
        target: &Path,
    ) -> Result<bool> {
        let output = Command::new("git")
            .args(["clone", "--depth", "1", "--branch", git_ref, url])
            .arg(target)
            .output()
            .map_err(|e| VermontError::ActionFetchFailed {
                reference: reference.to_string(),
                message: format!("git is not available: {e}"),
            })?;

        if output.status.success() {
            return Ok(true);
        }

        debug!(url, git_ref, "Shallow clone failed, retrying with full clone");
        let _ = std::fs::remove_dir_all(target);
        Ok(false)
    }

    fn full_clone_and_checkout(
        &self,
        reference: &str,
        url: &str,
        git_ref: &str,
        target: &Path,
    ) -> Result<()> {
        let output = Command::new("git")
            .args(["clone", url])
            .arg(target)
            .output()
            .map_err(|e| VermontError::ActionFetchFailed {
                reference: reference.to_string(),
                message: format!("git is not available: {e}"),
            })?;

        if !output.status.success() {
            return Err(VermontError::ActionFetchFailed {
                reference: reference.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let output = Command::new("git")
            .args(["checkout", git_ref])
            .current_dir(target)
            .output()?;

        if !output.status.success() {
            return Err(VermontError::ActionFetchFailed {
                reference: reference.to_string(),
                message: format!(
                    "failed to checkout '{git_ref}': {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ACTION_YML: &str = "name: cached\nruns:\n  using: composite\n  steps:\n    - run: echo hi\n      shell: bash\n";

    fn write_action(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("action.yml"), ACTION_YML).unwrap();
    }

    fn git(repo: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(repo)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    /// Create `<registry_root>/<owner>/<repo>` as a git repository with a
    /// committed action.yml tagged `v1`, so `file://<registry_root>` can
    /// serve as the actions registry.
    fn create_registry_repo(registry_root: &Path, owner: &str, repo: &str) -> PathBuf {
        let path = registry_root.join(owner).join(repo);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("action.yml"), ACTION_YML).unwrap();

        git(&path, &["init", "--initial-branch=main"]);
        git(&path, &["config", "user.name", "Test"]);
        git(&path, &["config", "user.email", "test@test.invalid"]);
        git(&path, &["add", "."]);
        git(&path, &["commit", "-m", "initial"]);
        git(&path, &["tag", "v1"]);

        path
    }

    #[test]
    fn local_action_resolves_against_work_dir() {
        let temp = TempDir::new().unwrap();
        write_action(&temp.path().join("actions/greet"));

        let resolver = ActionResolver::new(temp.path().join("cache"), "https://github.com");
        let resolved = resolver.resolve("./actions/greet", temp.path()).unwrap();

        assert_eq!(resolved.metadata.name, "cached");
        assert!(resolved.path.ends_with("actions/greet"));
    }

    #[test]
    fn missing_local_action_is_not_found() {
        let temp = TempDir::new().unwrap();
        let resolver = ActionResolver::new(temp.path().join("cache"), "https://github.com");

        let result = resolver.resolve("./actions/absent", temp.path());
        assert!(matches!(result, Err(VermontError::ActionNotFound { .. })));
    }

    #[test]
    fn malformed_reference_is_invalid() {
        let temp = TempDir::new().unwrap();
        let resolver = ActionResolver::new(temp.path().join("cache"), "https://github.com");

        let result = resolver.resolve("no-at-sign", temp.path());
        assert!(matches!(
            result,
            Err(VermontError::ActionReferenceInvalid { .. })
        ));
    }

    #[test]
    fn cache_hit_skips_fetching() {
        let temp = TempDir::new().unwrap();
        let cache_root = temp.path().join("cache");

        // Pre-populate the cache; the registry is unreachable, so any
        // fetch attempt would fail loudly.
        write_action(&cache_root.join("acme/greet/v1"));

        let resolver = ActionResolver::new(&cache_root, "file:///nonexistent-registry");
        let resolved = resolver.resolve("acme/greet@v1", temp.path()).unwrap();

        assert_eq!(resolved.metadata.name, "cached");
    }

    #[test]
    fn tree_path_is_owner_repo_ref() {
        let temp = TempDir::new().unwrap();
        let resolver = ActionResolver::new(temp.path(), "https://github.com");

        let parsed = ActionRef::parse("acme/tools/setup@v2").unwrap();
        let path = resolver.tree_path(&parsed).unwrap();

        assert_eq!(path, temp.path().join("acme").join("tools").join("v2"));
    }

    #[test]
    fn fetches_from_registry_and_strips_git_dir() {
        let temp = TempDir::new().unwrap();
        let registry_root = temp.path().join("registry");
        create_registry_repo(&registry_root, "acme", "greet");

        let registry = format!("file://{}", registry_root.display());
        let resolver = ActionResolver::new(temp.path().join("cache"), registry);

        let resolved = resolver.resolve("acme/greet@v1", temp.path()).unwrap();

        assert_eq!(resolved.metadata.name, "cached");
        assert!(!resolved.path.join(".git").exists());
        assert!(temp.path().join("cache/acme/greet/v1/action.yml").is_file());
    }

    #[test]
    fn second_resolution_uses_the_cache() {
        let temp = TempDir::new().unwrap();
        let registry_root = temp.path().join("registry");
        let repo = create_registry_repo(&registry_root, "acme", "greet");

        let registry = format!("file://{}", registry_root.display());
        let resolver = ActionResolver::new(temp.path().join("cache"), registry);

        let first = resolver.resolve("acme/greet@v1", temp.path()).unwrap();

        // Removing the source repository proves the second resolution
        // never fetches.
        std::fs::remove_dir_all(&repo).unwrap();
        let second = resolver.resolve("acme/greet@v1", temp.path()).unwrap();

        assert_eq!(first.path, second.path);
        let first_content = std::fs::read(first.path.join("action.yml")).unwrap();
        let second_content = std::fs::read(second.path.join("action.yml")).unwrap();
        assert_eq!(first_content, second_content);
    }

    #[test]
    fn unreachable_registry_fails_loudly() {
        let temp = TempDir::new().unwrap();
        let resolver = ActionResolver::new(
            temp.path().join("cache"),
            format!("file://{}/nonexistent", temp.path().display()),
        );

        let result = resolver.resolve("acme/greet@v1", temp.path());
        assert!(matches!(result, Err(VermontError::ActionFetchFailed { .. })));

        // No placeholder entry may appear in the cache.
        assert!(!temp.path().join("cache/acme/greet/v1").exists());
    }

    #[test]
    fn fetched_tree_without_metadata_is_not_found() {
        let temp = TempDir::new().unwrap();
        let registry_root = temp.path().join("registry");

        // A repository that carries no action.yml at all.
        let path = registry_root.join("acme").join("empty");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("README.md"), "nothing here").unwrap();
        git(&path, &["init", "--initial-branch=main"]);
        git(&path, &["config", "user.name", "Test"]);
        git(&path, &["config", "user.email", "test@test.invalid"]);
        git(&path, &["add", "."]);
        git(&path, &["commit", "-m", "initial"]);
        git(&path, &["tag", "v1"]);

        let registry = format!("file://{}", registry_root.display());
        let resolver = ActionResolver::new(temp.path().join("cache"), registry);

        let result = resolver.resolve("acme/empty@v1", temp.path());
        assert!(matches!(result, Err(VermontError::ActionNotFound { .. })));
    }
}
