use super::*;
use crate::builder::{BuildOptions, build_and_save, build_index};
use crate::git::GitCli;
use crate::index::save_index;
use proptest::prelude::*;
use std::cell::RefCell;
use std::fs;
use std::process::Command;

/// Scripted history: every diff returns the paths touched since the last call.
struct FakeSource {
    head: String,
    changed: RefCell<Vec<String>>,
    fail_diff: bool,
}

impl FakeSource {
    fn new(head: &str, changed: &[&str]) -> Self {
        Self {
            head: head.to_string(),
            changed: RefCell::new(changed.iter().map(|s| s.to_string()).collect()),
            fail_diff: false,
        }
    }
}

impl ChangeSource for FakeSource {
    fn current_commit(&self) -> Result<String, String> {
        Ok(self.head.clone())
    }

    fn resolve(&self, rev: &str) -> Result<String, String> {
        if rev == "unknown" {
            return Err(format!("unknown revision '{}'", rev));
        }
        Ok(rev.to_string())
    }

    fn changed_paths(&self, _since: &str) -> Result<Vec<String>, String> {
        if self.fail_diff {
            return Err("fatal: bad object".to_string());
        }
        let mut paths = self.changed.borrow().clone();
        paths.sort();
        paths.dedup();
        Ok(paths)
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn build_opts(root: &Path) -> BuildOptions {
    BuildOptions {
        threads: 2,
        record_commit: false,
        ..BuildOptions::new(root)
    }
}

fn rebuild(root: &Path) -> IndexStore {
    build_index(&build_opts(root), &ExtractorRegistry::default(), &AtomicBool::new(false)).unwrap()
}

/// Build and persist an index at `<root>/ai-index/codebase-index.json` stamped with `commit`.
fn seed(root: &Path, commit: Option<&str>) -> PathBuf {
    let mut store = rebuild(root);
    store.last_indexed_commit = commit.map(str::to_string);
    let path = root.join("ai-index").join("codebase-index.json");
    save_index(&store, &path, DEFAULT_SIZE_WARN_BYTES).unwrap();
    path
}

fn corpus() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "src/a.ts", "export function createUser(name) { return name; }");
    write(dir.path(), "src/b.ts", "export const voteCount = 3;");
    write(dir.path(), "docs/guide.md", "How bills become law.");
    write(dir.path(), "src/d.ts", "export const stale = true;");
    dir
}

#[test]
fn test_update_converges_to_full_rebuild() {
    let dir = corpus();
    let root = dir.path();
    let index_path = seed(root, Some("c1"));

    write(root, "src/a.ts", "export function deleteUser(id) { return id; }");
    fs::remove_file(root.join("src/b.ts")).unwrap();
    write(root, "src/c.ts", "export class BallotBox {}");
    write(root, "src/d.ts", "   \n");
    write(root, "src/e.test.ts", "it('works', () => {});");

    let source = FakeSource::new("c2", &["src/a.ts", "src/b.ts", "src/c.ts", "src/d.ts", "src/e.test.ts"]);
    let report = update_index(
        &UpdateOptions::new(root, &index_path),
        &ExtractorRegistry::default(),
        &source,
        &AtomicBool::new(false),
    )
    .unwrap();

    assert_eq!(report.added, 1);
    assert_eq!(report.modified, 1);
    assert_eq!(report.deleted, 2);
    assert_eq!(report.from_commit.as_deref(), Some("c1"));
    assert_eq!(report.to_commit.as_deref(), Some("c2"));

    let updated = load_index(&index_path).unwrap();
    assert_eq!(updated.last_indexed_commit.as_deref(), Some("c2"));
    assert!(updated.same_content(&rebuild(root)));
    assert!(!updated.tokens.contains_key("createuser"));
    assert!(!updated.tokens.contains_key("votecount"));
    assert!(updated.tokens["ballotbox"].contains("src/c.ts"));
}

#[test]
fn test_unchanged_paths_are_counted_not_rewritten() {
    let dir = corpus();
    let root = dir.path();
    let index_path = seed(root, Some("c1"));

    let source = FakeSource::new("c2", &["docs/guide.md"]);
    let report = update_index(
        &UpdateOptions::new(root, &index_path),
        &ExtractorRegistry::default(),
        &source,
        &AtomicBool::new(false),
    )
    .unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.touched(), 0);
    // head moved, so metadata still advances
    assert_eq!(load_index(&index_path).unwrap().last_indexed_commit.as_deref(), Some("c2"));
}

#[test]
fn test_up_to_date_index_is_not_rewritten() {
    let dir = corpus();
    let root = dir.path();
    let index_path = seed(root, Some("c1"));
    let before = fs::read(&index_path).unwrap();

    let source = FakeSource::new("c1", &[]);
    let report = update_index(
        &UpdateOptions::new(root, &index_path),
        &ExtractorRegistry::default(),
        &source,
        &AtomicBool::new(false),
    )
    .unwrap();
    assert_eq!(report.touched(), 0);
    assert_eq!(fs::read(&index_path).unwrap(), before);
}

#[test]
fn test_missing_commit_requires_full_build() {
    let dir = corpus();
    let index_path = seed(dir.path(), None);
    let err = update_index(
        &UpdateOptions::new(dir.path(), &index_path),
        &ExtractorRegistry::default(),
        &FakeSource::new("c2", &[]),
        &AtomicBool::new(false),
    )
    .unwrap_err();
    assert!(matches!(err, IndexError::MissingCommit));
}

#[test]
fn test_since_override_replaces_missing_commit() {
    let dir = corpus();
    let index_path = seed(dir.path(), None);
    let mut opts = UpdateOptions::new(dir.path(), &index_path);
    opts.since = Some("c0".to_string());
    let report = update_index(
        &opts,
        &ExtractorRegistry::default(),
        &FakeSource::new("c2", &[]),
        &AtomicBool::new(false),
    )
    .unwrap();
    assert_eq!(report.from_commit.as_deref(), Some("c0"));
}

#[test]
fn test_diff_failure_leaves_index_untouched() {
    let dir = corpus();
    let root = dir.path();
    let index_path = seed(root, Some("c1"));
    let before = fs::read(&index_path).unwrap();
    write(root, "src/a.ts", "export const changed = 1;");

    let mut source = FakeSource::new("c2", &["src/a.ts"]);
    source.fail_diff = true;
    let err = update_index(
        &UpdateOptions::new(root, &index_path),
        &ExtractorRegistry::default(),
        &source,
        &AtomicBool::new(false),
    )
    .unwrap_err();
    match err {
        IndexError::DiffFailure { commit, message } => {
            assert_eq!(commit, "c1");
            assert!(message.contains("bad object"));
        }
        other => panic!("expected DiffFailure, got {:?}", other),
    }
    assert_eq!(fs::read(&index_path).unwrap(), before);
}

#[test]
fn test_unresolvable_commit_is_diff_failure() {
    let dir = corpus();
    let index_path = seed(dir.path(), Some("unknown"));
    let err = update_index(
        &UpdateOptions::new(dir.path(), &index_path),
        &ExtractorRegistry::default(),
        &FakeSource::new("c2", &[]),
        &AtomicBool::new(false),
    )
    .unwrap_err();
    assert!(matches!(err, IndexError::DiffFailure { .. }));
}

#[test]
fn test_missing_index_file() {
    let dir = corpus();
    let err = update_index(
        &UpdateOptions::new(dir.path(), dir.path().join("nope.json")),
        &ExtractorRegistry::default(),
        &FakeSource::new("c2", &[]),
        &AtomicBool::new(false),
    )
    .unwrap_err();
    assert!(matches!(err, IndexError::IndexNotFound { .. }));
}

#[test]
fn test_cancelled_update_persists_nothing() {
    let dir = corpus();
    let root = dir.path();
    let index_path = seed(root, Some("c1"));
    let before = fs::read(&index_path).unwrap();
    write(root, "src/a.ts", "export const changed = 1;");

    let err = update_index(
        &UpdateOptions::new(root, &index_path),
        &ExtractorRegistry::default(),
        &FakeSource::new("c2", &["src/a.ts"]),
        &AtomicBool::new(true),
    )
    .unwrap_err();
    assert!(matches!(err, IndexError::Cancelled));
    assert_eq!(fs::read(&index_path).unwrap(), before);
}

#[test]
fn test_apply_changes_ignores_unknown_deleted_paths() {
    let dir = corpus();
    let mut store = rebuild(dir.path());
    let before = store.clone();
    let eligible: BTreeSet<String> = store.files.keys().cloned().collect();
    let candidates = vec!["src/never-existed.ts".to_string(), "image.png".to_string()];
    let report = apply_changes(
        &mut store,
        dir.path(),
        &candidates,
        &eligible,
        &ExtractorRegistry::default(),
        DEFAULT_MIN_TOKEN_LEN,
    );
    assert_eq!(report, UpdateReport::default());
    assert_eq!(store, before);
}

#[test]
fn test_candidate_paths_reconciles_walk_with_index() {
    let dir = corpus();
    let store = rebuild(dir.path());
    let eligible: BTreeSet<String> = ["src/a.ts", "src/b.ts", "src/new.ts", "docs/guide.md"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let dirty: BTreeSet<String> = ["src/b.ts".to_string()].into_iter().collect();
    let candidates = candidate_paths(&store, &["src/a.ts".to_string()], &dirty, &eligible);
    let expected: BTreeSet<String> = ["src/a.ts", "src/b.ts", "src/d.ts", "src/new.ts"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(candidates, expected);
}

#[cfg(unix)]
#[test]
fn test_symlinked_file_is_not_indexed() {
    let dir = corpus();
    let root = dir.path();
    let index_path = seed(root, Some("c1"));
    std::os::unix::fs::symlink(root.join("src/a.ts"), root.join("src/link.ts")).unwrap();

    let report = update_index(
        &UpdateOptions::new(root, &index_path),
        &ExtractorRegistry::default(),
        &FakeSource::new("c2", &["src/link.ts"]),
        &AtomicBool::new(false),
    )
    .unwrap();
    assert_eq!(report.added, 0);

    let updated = load_index(&index_path).unwrap();
    assert!(!updated.files.contains_key("src/link.ts"));
    assert!(updated.same_content(&rebuild(root)));
}

#[test]
fn test_file_missing_from_diff_is_still_reconciled() {
    let dir = corpus();
    let root = dir.path();
    let index_path = seed(root, Some("c1"));
    write(root, "src/unlisted.ts", "export const unlistedValue = 1;");
    fs::remove_file(root.join("src/b.ts")).unwrap();

    let report = update_index(
        &UpdateOptions::new(root, &index_path),
        &ExtractorRegistry::default(),
        &FakeSource::new("c2", &[]),
        &AtomicBool::new(false),
    )
    .unwrap();
    assert_eq!((report.added, report.deleted), (1, 1));
    assert!(load_index(&index_path).unwrap().same_content(&rebuild(root)));
}

// ─── Real git history ────────────────────────────────────────────────

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok_and(|o| o.status.success())
}

fn git(root: &Path, args: &[&str]) {
    let out = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(["-c", "user.name=Test", "-c", "user.email=test@example.com", "-c", "commit.gpgsign=false"])
        .args(args)
        .output()
        .unwrap();
    assert!(out.status.success(), "git {:?}: {}", args, String::from_utf8_lossy(&out.stderr));
}

/// `corpus()` committed to a fresh repository with the index directory ignored.
fn git_corpus() -> tempfile::TempDir {
    let dir = corpus();
    write(dir.path(), ".gitignore", "ai-index/\n");
    git(dir.path(), &["init", "-q"]);
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "-q", "-m", "initial"]);
    dir
}

/// Full build that records HEAD and the dirty paths, as `codeindex build` does.
fn build_with_git(root: &Path) -> PathBuf {
    let mut opts = build_opts(root);
    opts.record_commit = true;
    let index_path = root.join("ai-index").join("codebase-index.json");
    build_and_save(&opts, &ExtractorRegistry::default(), &index_path, &AtomicBool::new(false)).unwrap();
    index_path
}

fn git_update(root: &Path, index_path: &Path) -> UpdateReport {
    update_index(
        &UpdateOptions::new(root, index_path),
        &ExtractorRegistry::default(),
        &GitCli::new(root),
        &AtomicBool::new(false),
    )
    .unwrap()
}

#[test]
fn test_update_with_git_history() {
    if !git_available() {
        return;
    }
    let dir = git_corpus();
    let root = dir.path();
    let index_path = build_with_git(root);
    let first = load_index(&index_path).unwrap();
    assert!(first.last_indexed_commit.is_some());
    assert!(first.working_tree_paths.is_empty());

    write(root, "src/a.ts", "export const renamed = 1;");
    git(root, &["commit", "-q", "-am", "edit a"]);
    fs::remove_file(root.join("src/b.ts")).unwrap();
    write(root, "src/new.ts", "export const fresh = 2;");

    let report = git_update(root, &index_path);
    assert_eq!((report.added, report.modified, report.deleted), (1, 1, 1));

    let updated = load_index(&index_path).unwrap();
    assert_ne!(updated.last_indexed_commit, first.last_indexed_commit);
    assert!(updated.same_content(&rebuild(root)));
}

#[test]
fn test_untracked_file_deleted_after_indexing_is_dropped() {
    if !git_available() {
        return;
    }
    let dir = git_corpus();
    let root = dir.path();
    let index_path = build_with_git(root);

    write(root, "src/scratch.ts", "export const scratchPad = 1;");
    assert_eq!(git_update(root, &index_path).added, 1);
    let indexed = load_index(&index_path).unwrap();
    assert!(indexed.files.contains_key("src/scratch.ts"));
    assert!(indexed.working_tree_paths.contains("src/scratch.ts"));

    fs::remove_file(root.join("src/scratch.ts")).unwrap();
    assert_eq!(git_update(root, &index_path).deleted, 1);

    let updated = load_index(&index_path).unwrap();
    assert!(!updated.files.contains_key("src/scratch.ts"));
    assert!(updated.working_tree_paths.is_empty());
    assert!(updated.same_content(&rebuild(root)));
}

#[test]
fn test_reverted_uncommitted_edit_is_reindexed() {
    if !git_available() {
        return;
    }
    let dir = git_corpus();
    let root = dir.path();
    let index_path = build_with_git(root);

    write(root, "src/a.ts", "export function uncommittedEdit() {}");
    assert_eq!(git_update(root, &index_path).modified, 1);
    assert!(load_index(&index_path).unwrap().tokens.contains_key("uncommittededit"));

    git(root, &["checkout", "--", "src/a.ts"]);
    assert_eq!(git_update(root, &index_path).modified, 1);

    let updated = load_index(&index_path).unwrap();
    assert!(!updated.tokens.contains_key("uncommittededit"));
    assert!(updated.tokens["createuser"].contains("src/a.ts"));
    assert!(updated.working_tree_paths.is_empty());
    assert!(updated.same_content(&rebuild(root)));
}

#[test]
fn test_build_records_dirty_paths_for_next_update() {
    if !git_available() {
        return;
    }
    let dir = git_corpus();
    let root = dir.path();
    write(root, "src/a.ts", "export function uncommittedEdit() {}");
    let index_path = build_with_git(root);
    assert!(load_index(&index_path).unwrap().working_tree_paths.contains("src/a.ts"));

    git(root, &["checkout", "--", "src/a.ts"]);
    git_update(root, &index_path);
    assert!(load_index(&index_path).unwrap().same_content(&rebuild(root)));
}

#[test]
fn test_tracked_but_ignored_file_is_not_indexed() {
    if !git_available() {
        return;
    }
    let dir = corpus();
    let root = dir.path();
    write(root, ".gitignore", "ai-index/\ngenerated/\n");
    write(root, "generated/out.ts", "export const generatedOutput = 1;");
    git(root, &["init", "-q"]);
    git(root, &["add", "."]);
    git(root, &["add", "-f", "generated/out.ts"]);
    git(root, &["commit", "-q", "-m", "initial"]);
    let index_path = build_with_git(root);
    assert!(!load_index(&index_path).unwrap().files.contains_key("generated/out.ts"));

    write(root, "generated/out.ts", "export const generatedOutput = 2;");
    let report = git_update(root, &index_path);
    assert_eq!(report.added, 0);

    let updated = load_index(&index_path).unwrap();
    assert!(!updated.files.contains_key("generated/out.ts"));
    assert!(updated.same_content(&rebuild(root)));
}

// ─── Convergence property ────────────────────────────────────────────

const POOL: &[&str] = &["src/a.ts", "src/b.ts", "src/c.py", "docs/d.md", "lib/e.rs"];
const BODIES: &[&str] = &[
    "export function createUser(name) {}",
    "class VoteCounter { tally() {} }",
    "def render_bill(bill): return bill",
    "# Governance\nRules for members.",
    "pub fn parse_config() {}",
    "   ",
];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Any sequence of add/modify/delete followed by an update equals a rebuild.
    #[test]
    fn update_matches_rebuild(
        initial in proptest::collection::vec(proptest::option::of(0..BODIES.len()), POOL.len()),
        ops in proptest::collection::vec((0..POOL.len(), proptest::option::of(0..BODIES.len())), 0..12),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for (rel, body) in POOL.iter().zip(&initial) {
            if let Some(b) = body {
                write(root, rel, BODIES[*b]);
            }
        }
        let index_path = seed(root, Some("c1"));

        let mut touched = Vec::new();
        for (file, body) in &ops {
            let rel = POOL[*file];
            match body {
                Some(b) => write(root, rel, BODIES[*b]),
                None => { let _ = fs::remove_file(root.join(rel)); }
            }
            touched.push(rel);
        }

        let source = FakeSource::new("c2", &touched);
        update_index(
            &UpdateOptions::new(root, &index_path),
            &ExtractorRegistry::default(),
            &source,
            &AtomicBool::new(false),
        ).unwrap();

        let updated = load_index(&index_path).unwrap();
        prop_assert!(updated.same_content(&rebuild(root)));
    }
}
