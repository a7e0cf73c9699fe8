//! Whole-history git log reader (§4.11): native pack walk for the primary
//! path, a single CLI invocation as fallback, plus per-file churn metrics
//! derived from the resulting commit list.

use std::collections::HashMap;
use std::path::Path;

use git2::{Repository, Sort};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{GitEnrichmentError, Result};
use crate::task_ids::extract_task_ids;

#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub sha: String,
    pub author: String,
    pub author_email: String,
    pub timestamp: i64,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileChurnData {
    pub commits: Vec<CommitInfo>,
    pub lines_added: u64,
    pub lines_deleted: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileChurnMetrics {
    pub relative_churn: f64,
    pub recency_weighted_freq: f64,
    pub change_density: f64,
    pub churn_volatility: f64,
    pub bug_fix_rate: f64,
    pub contributor_count: u32,
    pub task_ids: Vec<String>,
    pub dominant_author_pct: f64,
}

static BUG_FIX_WORDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(fix|fixes|fixed|bug|hotfix|patch)\b").unwrap());

/// Reads whole-repo history. Prefers the native git2 pack walk; falls back
/// to a single CLI invocation when the repo can't be opened natively (e.g.
/// `git2` doesn't support some on-disk layout the CLI does).
pub struct GitLogReader {
    repo_root: std::path::PathBuf,
}

impl GitLogReader {
    pub fn open(repo_root: impl Into<std::path::PathBuf>) -> Self {
        Self { repo_root: repo_root.into() }
    }

    pub fn head_sha(&self) -> Result<Option<String>> {
        match Repository::open(&self.repo_root) {
            Ok(repo) => match repo.head() {
                Ok(head) => Ok(head.peel_to_commit().ok().map(|c| c.id().to_string())),
                Err(_) => Ok(None),
            },
            Err(_) => Ok(None),
        }
    }

    /// Whole-history walk via native git2, diffing each commit's tree
    /// against its first parent (or the empty tree for root commits).
    /// Zero process spawns.
    pub fn walk_history_native(&self) -> Result<HashMap<String, FileChurnData>> {
        let repo = Repository::open(&self.repo_root)?;
        let mut walk = repo.revwalk()?;
        walk.push_head()?;
        walk.set_sorting(Sort::TIME | Sort::REVERSE)?;

        let mut churn: HashMap<String, FileChurnData> = HashMap::new();

        for oid in walk {
            let oid = oid?;
            let commit = repo.find_commit(oid)?;
            let tree = commit.tree()?;
            let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());

            let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;

            let author = commit.author();
            let info = CommitInfo {
                sha: commit.id().to_string(),
                author: author.name().unwrap_or("unknown").to_string(),
                author_email: author.email().unwrap_or("").to_string(),
                timestamp: author.when().seconds(),
                body: commit.message().unwrap_or("").to_string(),
            };

            for delta in diff.deltas() {
                let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) else {
                    continue;
                };
                let rel_path = path.to_string_lossy().replace('\\', "/");
                churn.entry(rel_path).or_default().commits.push(info.clone());
            }
        }

        Ok(churn)
    }

    /// Enriches a churn map (keyed by relative path) with line-add/delete
    /// totals from one `git log --all --numstat --format=` invocation
    /// (§4.11 step 3).
    pub async fn enrich_with_numstat(&self, churn: &mut HashMap<String, FileChurnData>) -> Result<()> {
        let output = run_git(&self.repo_root, &["log", "--all", "--numstat", "--format="]).await?;
        for (added, deleted, path) in parse_numstat_lines(&output) {
            if let Some(entry) = churn.get_mut(&path) {
                entry.lines_added += added;
                entry.lines_deleted += deleted;
            }
        }
        Ok(())
    }

    /// Fallback path: a single `git log --all --numstat --format=...`
    /// invocation, parsed by splitting on NUL, used when the native walk is
    /// unavailable (repo can't be opened by git2).
    pub async fn walk_history_fallback(&self) -> Result<HashMap<String, FileChurnData>> {
        let output = run_git(&self.repo_root, &["log", "--all", "--numstat", "--format=%x00%H%x00%an%x00%ae%x00%at%x00%B%x00"]).await?;
        Ok(parse_fallback_log(&output))
    }

    /// Reads whole-repo history, preferring the native path.
    pub async fn read_all(&self) -> Result<HashMap<String, FileChurnData>> {
        match self.walk_history_native() {
            Ok(mut churn) => {
                self.enrich_with_numstat(&mut churn).await?;
                Ok(churn)
            }
            Err(err) => {
                log::warn!("native git2 history walk failed ({err}), falling back to CLI log parse");
                self.walk_history_fallback().await
            }
        }
    }
}

async fn run_git(repo_root: &Path, args: &[&str]) -> Result<String> {
    let output = tokio::process::Command::new("git").args(args).current_dir(repo_root).output().await?;
    if !output.status.success() {
        return Err(GitEnrichmentError::Other(format!("git {args:?} failed: {}", String::from_utf8_lossy(&output.stderr))));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn parse_numstat_lines(output: &str) -> Vec<(u64, u64, String)> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let added = parts.next()?;
            let deleted = parts.next()?;
            let path = parts.next()?;
            let added: u64 = added.parse().unwrap_or(0);
            let deleted: u64 = deleted.parse().unwrap_or(0);
            Some((added, deleted, path.replace('\\', "/")))
        })
        .collect()
}

fn parse_fallback_log(output: &str) -> HashMap<String, FileChurnData> {
    let mut churn: HashMap<String, FileChurnData> = HashMap::new();
    let mut tokens = output.split('\0');
    // The leading token is whatever (normally empty) text precedes the
    // first record's NUL and is discarded.
    tokens.next();

    loop {
        let Some(sha) = tokens.next() else { break };
        let Some(author) = tokens.next() else { break };
        let Some(email) = tokens.next() else { break };
        let Some(ts) = tokens.next() else { break };
        let Some(rest) = tokens.next() else { break };

        let sha = sha.trim().to_string();
        if sha.is_empty() {
            break;
        }
        let timestamp: i64 = ts.trim().parse().unwrap_or(0);

        // `rest` holds the commit body followed by that commit's numstat
        // lines, up to (but not including) the next record's leading NUL.
        let mut lines = rest.lines();
        let mut body_lines = Vec::new();
        let mut numstat_lines = Vec::new();
        let mut in_numstat = false;
        for line in &mut lines {
            if !in_numstat && line.contains('\t') && line.splitn(3, '\t').count() == 3 {
                in_numstat = true;
            }
            if in_numstat {
                numstat_lines.push(line);
            } else {
                body_lines.push(line);
            }
        }

        let info = CommitInfo {
            sha,
            author: author.trim().to_string(),
            author_email: email.trim().to_string(),
            timestamp,
            body: body_lines.join("\n").trim().to_string(),
        };

        for (added, deleted, path) in parse_numstat_lines(&numstat_lines.join("\n")) {
            let entry = churn.entry(path).or_default();
            entry.commits.push(info.clone());
            entry.lines_added += added;
            entry.lines_deleted += deleted;
        }
    }

    churn
}

/// Derives §4.11's per-file metrics from a file's commit list.
#[must_use]
pub fn compute_file_metrics(data: &FileChurnData, current_line_count: u64, now_unix: i64) -> FileChurnMetrics {
    if data.commits.is_empty() {
        return FileChurnMetrics::default();
    }

    let mut timestamps: Vec<i64> = data.commits.iter().map(|c| c.timestamp).collect();
    timestamps.sort_unstable();

    let relative_churn = (data.lines_added + data.lines_deleted) as f64 / current_line_count.max(1) as f64;

    let recency_weighted_freq: f64 = data
        .commits
        .iter()
        .map(|c| {
            let days_ago = ((now_unix - c.timestamp).max(0) as f64) / 86_400.0;
            (-0.1 * days_ago).exp()
        })
        .sum();

    let first_ts = *timestamps.first().unwrap();
    let last_ts = *timestamps.last().unwrap();
    let months = ((last_ts - first_ts) as f64 / (86_400.0 * 30.0)).max(1.0);
    let change_density = data.commits.len() as f64 / months;

    let churn_volatility = if timestamps.len() > 1 {
        let gaps: Vec<f64> = timestamps.windows(2).map(|w| (w[1] - w[0]) as f64 / 86_400.0).collect();
        let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
        let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / gaps.len() as f64;
        variance.sqrt()
    } else {
        0.0
    };

    let bug_fix_commits = data.commits.iter().filter(|c| BUG_FIX_WORDS.is_match(&c.body)).count();
    let bug_fix_rate = bug_fix_commits as f64 / data.commits.len() as f64 * 100.0;

    let mut counts_by_author: HashMap<&str, usize> = HashMap::new();
    for c in &data.commits {
        *counts_by_author.entry(c.author_email.as_str()).or_insert(0) += 1;
    }
    let contributor_count = counts_by_author.len() as u32;
    let dominant_author_pct = counts_by_author.values().max().copied().unwrap_or(0) as f64 / data.commits.len() as f64 * 100.0;

    let mut task_ids = Vec::new();
    for c in &data.commits {
        for id in extract_task_ids(&c.body) {
            if !task_ids.contains(&id) {
                task_ids.push(id);
            }
        }
    }

    FileChurnMetrics {
        relative_churn,
        recency_weighted_freq,
        change_density,
        churn_volatility,
        bug_fix_rate,
        contributor_count,
        task_ids,
        dominant_author_pct,
    }
}
