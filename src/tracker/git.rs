use crate::phase::manager::PLANNING_DIR;
use anyhow::{Context, Result};
use git2::{IndexAddOption, IndexMatchedPath, Repository, Signature};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// A commit found in history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
}

/// The narrow set of version-control operations the engine needs.
///
/// Staging and committing for one task must finish before the next task is
/// staged, so every commit contains exactly one task's changes.
pub trait GitOps: Send + Sync {
    /// Stage the given paths. An empty list stages every change in the work tree
    /// except the engine's own bookkeeping.
    fn stage(&self, files: &[String]) -> Result<()>;

    /// Commit the index and return the new commit's hash.
    /// Fails when the index has nothing new relative to HEAD.
    fn commit(&self, message: &str) -> Result<String>;

    /// HEAD commit hash, `None` on an unborn branch.
    fn head_sha(&self) -> Option<String>;

    fn current_branch(&self) -> Option<String>;

    /// Commits whose subject carries `({scope}):`, oldest first.
    fn find_commits(&self, _scope: &str) -> Result<Vec<CommitInfo>> {
        Ok(Vec::new())
    }
}

/// [`GitOps`] over a real repository.
pub struct GitTracker {
    repo: Mutex<Repository>,
    author_name: String,
    author_email: String,
    /// Work-tree prefixes never swept up by a stage-all
    excluded: Vec<PathBuf>,
}

impl GitTracker {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let repo = Repository::open(project_dir).context("Failed to open git repository")?;
        Ok(Self {
            repo: Mutex::new(repo),
            author_name: "phasekit".to_string(),
            author_email: "phasekit@localhost".to_string(),
            excluded: vec![PathBuf::from(PLANNING_DIR)],
        })
    }

    /// Identity used when the repository has no `user.name`/`user.email`.
    pub fn with_author(mut self, name: &str, email: &str) -> Self {
        self.author_name = name.to_string();
        self.author_email = email.to_string();
        self
    }

    fn repo(&self) -> Result<MutexGuard<'_, Repository>> {
        self.repo
            .lock()
            .map_err(|_| anyhow::anyhow!("git repository lock poisoned"))
    }

    fn signature<'a>(&self, repo: &'a Repository) -> Result<Signature<'a>> {
        match repo.signature() {
            Ok(sig) => Ok(sig),
            Err(_) => Signature::now(&self.author_name, &self.author_email)
                .context("Failed to build commit signature"),
        }
    }
}

/// Path relative to the work tree, as the index expects.
fn relative_to(workdir: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.strip_prefix(workdir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    } else {
        path.strip_prefix("./")
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

impl GitOps for GitTracker {
    fn stage(&self, files: &[String]) -> Result<()> {
        let repo = self.repo()?;
        let workdir = repo
            .workdir()
            .context("Repository has no work tree")?
            .to_path_buf();
        let mut index = repo.index().context("Failed to open git index")?;

        if files.is_empty() {
            // Positive return skips the path
            let mut skip_excluded = |path: &Path, _matched: &[u8]| -> i32 {
                i32::from(self.excluded.iter().any(|prefix| path.starts_with(prefix)))
            };
            index
                .add_all(
                    ["*"].iter(),
                    IndexAddOption::DEFAULT,
                    Some(&mut skip_excluded as &mut IndexMatchedPath<'_>),
                )
                .context("Failed to stage work tree")?;
            index
                .update_all(
                    ["*"].iter(),
                    Some(&mut skip_excluded as &mut IndexMatchedPath<'_>),
                )
                .context("Failed to stage removals")?;
        } else {
            for file in files {
                let rel = relative_to(&workdir, file);
                if workdir.join(&rel).exists() {
                    index
                        .add_path(&rel)
                        .with_context(|| format!("Failed to stage {}", rel.display()))?;
                } else {
                    index
                        .remove_path(&rel)
                        .with_context(|| format!("Failed to stage removal of {}", rel.display()))?;
                }
            }
        }

        index.write().context("Failed to write git index")?;
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<String> {
        let repo = self.repo()?;
        let mut index = repo.index().context("Failed to open git index")?;
        let tree_id = index.write_tree().context("Failed to write tree")?;
        let tree = repo.find_tree(tree_id)?;
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());

        let unchanged = match &parent {
            Some(p) => p.tree_id() == tree_id,
            None => tree.is_empty(),
        };
        if unchanged {
            anyhow::bail!("nothing to commit");
        }

        let sig = self.signature(&repo)?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .context("Failed to create commit")?;

        Ok(oid.to_string())
    }

    fn head_sha(&self) -> Option<String> {
        let repo = self.repo().ok()?;
        let head = repo.head().ok()?;
        let commit = head.peel_to_commit().ok()?;
        Some(commit.id().to_string())
    }

    fn current_branch(&self) -> Option<String> {
        let repo = self.repo().ok()?;
        let head = repo.head().ok()?;
        head.shorthand().map(str::to_string)
    }

    fn find_commits(&self, scope: &str) -> Result<Vec<CommitInfo>> {
        let repo = self.repo()?;
        if repo.head().is_err() {
            return Ok(Vec::new());
        }

        let needle = format!("({}):", scope);
        let mut walk = repo.revwalk().context("Failed to walk history")?;
        walk.push_head()?;

        let mut found = Vec::new();
        for oid in walk {
            let commit = repo.find_commit(oid?)?;
            let summary = commit.summary().unwrap_or("");
            if summary.contains(&needle) {
                found.push(CommitInfo {
                    hash: commit.id().to_string(),
                    message: summary.to_string(),
                });
            }
        }
        found.reverse();
        Ok(found)
    }
}
