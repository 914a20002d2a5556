//! Source-control probes for the context assembler.
//!
//! Every probe shells out to `git` with a bounded timeout and degrades to
//! absence on any failure — a missing binary, a non-repo directory, or a
//! hang never fails the enclosing request.

use std::time::Duration;

use crate::memory::store::MemoryStore;
use crate::memory::types::{MemoryKind, NewMemory};

/// One parsed commit from `git log --oneline --name-only`.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub short_hash: String,
    pub subject: String,
    pub files: Vec<String>,
}

/// Current branch, recent subjects, and a short diff stat.
#[derive(Debug, Default)]
pub struct WorkspaceState {
    pub branch: Option<String>,
    pub recent: Vec<String>,
    pub diff_stat: Option<String>,
    pub uncommitted: Vec<String>,
}

/// Run a git command, returning stdout on success and `None` on any failure.
pub async fn run_git(args: &[&str], timeout: Duration) -> Option<String> {
    let child = tokio::process::Command::new("git")
        .args(args)
        .stdin(std::process::Stdio::null())
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(Ok(output)) => {
            tracing::debug!(status = ?output.status, ?args, "git command failed");
            None
        }
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "git not runnable");
            None
        }
        Err(_) => {
            tracing::warn!(?args, "git command timed out");
            None
        }
    }
}

/// Gather branch, last commits, and diff stat for the workspace section.
pub async fn workspace_state(timeout: Duration) -> WorkspaceState {
    let branch = run_git(&["rev-parse", "--abbrev-ref", "HEAD"], timeout)
        .await
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let recent = run_git(&["log", "--oneline", "-5", "--no-merges"], timeout)
        .await
        .map(|s| s.lines().map(|l| l.to_string()).collect())
        .unwrap_or_default();

    let diff_stat = run_git(&["diff", "--stat", "HEAD"], timeout)
        .await
        .map(|s| s.trim_end().to_string())
        .filter(|s| !s.is_empty());

    let uncommitted = run_git(&["status", "--porcelain"], timeout)
        .await
        .map(|s| s.lines().take(10).map(|l| l.to_string()).collect())
        .unwrap_or_default();

    WorkspaceState {
        branch,
        recent,
        diff_stat,
        uncommitted,
    }
}

/// Fetch and parse the last `n` commits with their changed paths.
pub async fn recent_commits(n: usize, timeout: Duration) -> Vec<CommitRecord> {
    let Some(output) = run_git(
        &[
            "log",
            "--oneline",
            "--name-only",
            &format!("-{n}"),
            "--no-merges",
        ],
        timeout,
    )
    .await
    else {
        return Vec::new();
    };
    parse_oneline_name_only(&output)
}

/// Parse `git log --oneline --name-only` output: a subject line starting with
/// the short hash, followed by changed paths until the next blank/subject.
fn parse_oneline_name_only(output: &str) -> Vec<CommitRecord> {
    let mut commits: Vec<CommitRecord> = Vec::new();
    for line in output.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        // A subject line: "<hex-hash> <subject words>"
        let looks_like_subject = line
            .split_once(' ')
            .map(|(hash, rest)| {
                hash.len() >= 7
                    && hash.chars().all(|c| c.is_ascii_hexdigit())
                    && !rest.is_empty()
            })
            .unwrap_or(false);

        if looks_like_subject {
            let (hash, subject) = line.split_once(' ').expect("checked above");
            commits.push(CommitRecord {
                short_hash: hash.to_string(),
                subject: subject.trim().to_string(),
                files: Vec::new(),
            });
        } else if let Some(current) = commits.last_mut() {
            if current.files.len() < 20 {
                current.files.push(line.to_string());
            }
        }
    }
    commits
}

/// Classify a commit subject into an item kind.
pub fn classify_subject(subject: &str) -> MemoryKind {
    let lower = subject.to_lowercase();
    let has = |needle: &str| lower.contains(needle);
    if has("fix") {
        MemoryKind::BugFix
    } else if has("feat") || has("add") || has("implement") {
        MemoryKind::Decision
    } else if has("refactor") || has("clean") || has("lint") {
        MemoryKind::Convention
    } else if has("doc") {
        MemoryKind::Insight
    } else {
        MemoryKind::Decision
    }
}

const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("auth", &["auth", "login", "token", "session", "oauth"]),
    ("database", &["db", "database", "sql", "migration", "schema"]),
    ("api", &["api", "endpoint", "route", "rest", "graphql"]),
    ("ui", &["ui", "css", "style", "component", "layout"]),
    ("testing", &["test", "spec", "e2e", "coverage"]),
    ("devops", &["docker", "deploy", "pipeline", "k8s", "helm"]),
    ("security", &["security", "vuln", "xss", "csrf", "sanitize"]),
    ("performance", &["perf", "performance", "optimize", "cache", "latency"]),
];

/// Topic tags extracted from a commit subject.
pub fn topic_tags(subject: &str) -> Vec<String> {
    let lower = subject.to_lowercase();
    TOPIC_KEYWORDS
        .iter()
        .filter(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(tag, _)| (*tag).to_string())
        .collect()
}

/// Capture commits the store has not seen as items. A commit is "seen" when
/// its short hash appears among the tags of any active item. Returns the
/// number of new items stored.
pub fn ingest_commits(store: &mut MemoryStore, commits: &[CommitRecord]) -> usize {
    let known: std::collections::HashSet<String> = match store.get_active(usize::MAX / 2) {
        Ok(items) => items
            .into_iter()
            .flat_map(|u| u.tags.into_iter())
            .collect(),
        Err(_) => return 0,
    };

    let mut stored = 0;
    for commit in commits {
        if known.contains(&commit.short_hash) {
            continue;
        }
        let kind = classify_subject(&commit.subject);
        let mut tags = topic_tags(&commit.subject);
        tags.push(commit.short_hash.clone());

        let importance = if kind == MemoryKind::BugFix { 0.85 } else { 0.6 };
        let mut files = commit.files.clone();
        files.truncate(20);

        let draft = NewMemory {
            kind: Some(kind),
            intent: crate::memory::text::truncate_chars(&commit.subject, 300),
            action: String::new(),
            reason: None,
            impact: None,
            outcome: None,
            related_files: files,
            tags,
            timestamp: None,
            confidence: Some(0.8),
            importance: Some(importance),
            source_event_id: None,
        };
        match store.add(draft) {
            Ok(outcome) if !outcome.deduplicated => stored += 1,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, hash = %commit.short_hash, "commit ingest skipped");
            }
        }
    }
    stored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_oneline_name_only_blocks() {
        let output = "\
abc1234 fix race in session refresh
src/auth/session.ts
src/auth/refresh.ts

def5678 add billing webhooks
src/billing/webhook.ts
";
        let commits = parse_oneline_name_only(output);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].short_hash, "abc1234");
        assert_eq!(commits[0].subject, "fix race in session refresh");
        assert_eq!(
            commits[0].files,
            vec!["src/auth/session.ts", "src/auth/refresh.ts"]
        );
        assert_eq!(commits[1].files, vec!["src/billing/webhook.ts"]);
    }

    #[test]
    fn classification_follows_subject_keywords() {
        assert_eq!(classify_subject("fix crash on logout"), MemoryKind::BugFix);
        assert_eq!(classify_subject("feat: team billing"), MemoryKind::Decision);
        assert_eq!(
            classify_subject("refactor settings into modules"),
            MemoryKind::Convention
        );
        assert_eq!(classify_subject("docs for the cli"), MemoryKind::Insight);
        assert_eq!(classify_subject("bump lodash"), MemoryKind::Decision);
    }

    #[test]
    fn topic_tags_match_subject_keywords() {
        let tags = topic_tags("fix oauth token refresh against the database");
        assert!(tags.contains(&"auth".to_string()));
        assert!(tags.contains(&"database".to_string()));
        assert!(!tags.contains(&"ui".to_string()));
    }

    #[test]
    fn ingest_skips_already_seen_hashes() {
        let mut store = MemoryStore::open_in_memory(0.7).unwrap();
        let commits = vec![CommitRecord {
            short_hash: "abc1234".into(),
            subject: "fix race in session refresh".into(),
            files: vec!["src/auth/session.ts".into()],
        }];

        assert_eq!(ingest_commits(&mut store, &commits), 1);
        // Second pass sees the hash tag and stores nothing
        assert_eq!(ingest_commits(&mut store, &commits), 0);
        assert_eq!(store.active_count().unwrap(), 1);

        let unit = &store.get_active(1).unwrap()[0];
        assert_eq!(unit.kind, MemoryKind::BugFix);
        assert!((unit.importance - 0.85).abs() < 1e-9);
        assert!((unit.confidence - 0.8).abs() < 1e-9);
        assert!(unit.tags.contains(&"abc1234".to_string()));
        assert!(unit.tags.contains(&"auth".to_string()));
    }
}
