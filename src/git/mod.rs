//! Version-control queries used by the builder and the incremental updater.
//!
//! Shells out to the `git` CLI. Every query is behind [`ChangeSource`] so the
//! updater can be driven by a scripted source in tests.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

/// What the incremental updater needs to know about history.
pub trait ChangeSource {
    /// Commit id of HEAD.
    fn current_commit(&self) -> Result<String, String>;

    /// Full commit id for `rev`; an error if it does not resolve.
    fn resolve(&self, rev: &str) -> Result<String, String>;

    /// Corpus-relative paths that differ between `since` and the working tree,
    /// including untracked files. Sorted, deduplicated, `/`-separated.
    fn changed_paths(&self, since: &str) -> Result<Vec<String>, String>;
}

/// [`ChangeSource`] backed by the `git` binary, run inside `root`.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn git(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(&self.root).args(["-c", "core.quotepath=off"]);
        cmd
    }

    /// True if `root` is inside a git work tree.
    pub fn is_work_tree(&self) -> bool {
        run_git(self.git().args(["rev-parse", "--is-inside-work-tree"]))
            .map(|out| out.trim() == "true")
            .unwrap_or(false)
    }
}

impl ChangeSource for GitCli {
    fn current_commit(&self) -> Result<String, String> {
        self.resolve("HEAD")
    }

    fn resolve(&self, rev: &str) -> Result<String, String> {
        let spec = format!("{}^{{commit}}", rev);
        let out = run_git(self.git().args(["rev-parse", "--verify", "--quiet"]).arg(&spec))?;
        let id = out.trim();
        if id.is_empty() {
            return Err(format!("unknown revision '{}'", rev));
        }
        Ok(id.to_string())
    }

    fn changed_paths(&self, since: &str) -> Result<Vec<String>, String> {
        let diff = run_git(
            self.git()
                .args(["diff", "--name-only", "--no-renames", "--relative", "-z"])
                .arg(since)
                .arg("--"),
        )?;
        let untracked = run_git(self.git().args(["ls-files", "--others", "--exclude-standard", "-z"]))?;
        Ok(merge_path_lists(&[&diff, &untracked]))
    }
}

/// Split NUL-separated git output lists into one sorted, deduplicated list.
fn merge_path_lists(outputs: &[&str]) -> Vec<String> {
    let paths: BTreeSet<String> = outputs
        .iter()
        .flat_map(|out| out.split('\0'))
        .map(|p| p.trim().replace('\\', "/"))
        .filter(|p| !p.is_empty())
        .collect();
    paths.into_iter().collect()
}

/// Run a git command and return stdout as String.
fn run_git(cmd: &mut Command) -> Result<String, String> {
    let output = cmd
        .output()
        .map_err(|e| format!("Failed to execute git: {}. Is git installed and in PATH?", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        return Err(if stderr.is_empty() {
            format!("git exited with {}", output.status)
        } else {
            format!("git command failed: {}", stderr)
        });
    }

    String::from_utf8(output.stdout).map_err(|e| format!("git output is not valid UTF-8: {}", e))
}

/// Commit and working-tree state of a corpus at indexing time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadState {
    pub commit: String,
    /// Paths that differ from `commit`, untracked files included.
    pub dirty: Vec<String>,
}

/// HEAD of `root` and its uncommitted paths, or `None` outside a git work tree.
pub fn head_state(root: &Path) -> Option<HeadState> {
    let git = GitCli::new(root);
    if !git.is_work_tree() {
        return None;
    }
    let commit = git.current_commit().ok()?;
    let dirty = git.changed_paths(&commit).ok()?;
    Some(HeadState { commit, dirty })
}

#[cfg(test)]
#[path = "git_tests.rs"]
mod tests;
