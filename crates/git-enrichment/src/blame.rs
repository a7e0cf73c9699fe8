//! Per-file blame aggregation (§4.10): at most one `blame` invocation per
//! file per content hash, two-level cache (in-memory LRU + on-disk, keyed by
//! content hash), aggregated into per-chunk authorship/age signals.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use md5::{Digest as Md5Digest, Md5};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GitEnrichmentError, Result};
use crate::task_ids::extract_task_ids;

const BLAME_CACHE_VERSION: u32 = 4;
const SECONDS_PER_DAY: i64 = 86_400;

static BUG_FIX_WORDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(fix|fixes|fixed|bug|hotfix|patch)\b").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlameLine {
    pub commit: String,
    pub author: String,
    pub email: String,
    pub author_time: i64,
    pub task_ids: Vec<String>,
    pub is_bug_fix: bool,
}

pub type BlameMap = HashMap<u32, BlameLine>;

/// Blame aggregated over a chunk's line range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkBlame {
    pub dominant_author: Option<String>,
    pub authors: Vec<String>,
    pub commit_shas: Vec<String>,
    pub first_commit_at: Option<i64>,
    pub last_commit_at: Option<i64>,
    pub last_commit_hash: Option<String>,
    pub age_days: Option<u64>,
    pub task_ids: Vec<String>,
    /// Percentage (0-100) of this chunk's distinct touching commits whose
    /// summary or body reads as a bug fix.
    pub bug_fix_rate: f64,
}

/// Aggregates blame lines in `[start_line, end_line]` (1-based, inclusive)
/// into a single chunk-level signal (§4.10 step 3).
#[must_use]
pub fn aggregate_chunk_blame(blame: &BlameMap, start_line: usize, end_line: usize, now_unix: i64) -> ChunkBlame {
    let mut lines_per_author: HashMap<&str, usize> = HashMap::new();
    let mut authors_seen = Vec::new();
    let mut commits_seen = Vec::new();
    let mut bug_fix_commits: std::collections::HashSet<&str> = std::collections::HashSet::new();
    let mut task_ids = Vec::new();
    let mut min_time = i64::MAX;
    let mut max_time = i64::MIN;
    let mut last_commit_hash = None;

    for line_no in start_line..=end_line {
        let Some(entry) = blame.get(&(line_no as u32)) else {
            continue;
        };
        *lines_per_author.entry(entry.author.as_str()).or_insert(0) += 1;
        if !authors_seen.iter().any(|a: &String| a == &entry.author) {
            authors_seen.push(entry.author.clone());
        }
        if !commits_seen.iter().any(|c: &String| c == &entry.commit) {
            commits_seen.push(entry.commit.clone());
        }
        if entry.is_bug_fix {
            bug_fix_commits.insert(entry.commit.as_str());
        }
        for id in &entry.task_ids {
            if !task_ids.contains(id) {
                task_ids.push(id.clone());
            }
        }
        if entry.author_time < min_time {
            min_time = entry.author_time;
        }
        if entry.author_time > max_time {
            max_time = entry.author_time;
            last_commit_hash = Some(entry.commit.clone());
        }
    }

    if lines_per_author.is_empty() {
        return ChunkBlame::default();
    }

    let dominant_author = lines_per_author.into_iter().max_by_key(|(_, count)| *count).map(|(author, _)| author.to_string());

    let age_days = if max_time == i64::MIN {
        None
    } else {
        Some(u64::try_from((now_unix - max_time).max(0) / SECONDS_PER_DAY).unwrap_or(0))
    };

    let bug_fix_rate = if commits_seen.is_empty() { 0.0 } else { bug_fix_commits.len() as f64 / commits_seen.len() as f64 * 100.0 };

    ChunkBlame {
        dominant_author,
        authors: authors_seen,
        commit_shas: commits_seen,
        first_commit_at: if min_time == i64::MAX { None } else { Some(min_time) },
        last_commit_at: if max_time == i64::MIN { None } else { Some(max_time) },
        last_commit_hash,
        age_days,
        bug_fix_rate,
        task_ids,
    }
}

static BLAME_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([0-9a-f]{40}) (\d+) (\d+)(?: (\d+))?$").unwrap());

/// Parses `git blame --porcelain -w` output, enriching any line whose commit
/// summary carried no task IDs with IDs pulled from that commit's full body
/// (via `bodies`, built from a parallel `git log` invocation).
#[must_use]
pub fn parse_porcelain(output: &str, bodies: &HashMap<String, String>) -> BlameMap {
    let mut map = BlameMap::new();
    let mut commit_meta: HashMap<String, (String, String, i64, String)> = HashMap::new();
    let mut current_sha = String::new();
    let mut current_final_line = 0u32;

    for line in output.lines() {
        if let Some(caps) = BLAME_HEADER.captures(line) {
            current_sha = caps[1].to_string();
            current_final_line = caps[3].parse().unwrap_or(0);
            commit_meta.entry(current_sha.clone()).or_default();
            continue;
        }
        if let Some(rest) = line.strip_prefix("author ") {
            commit_meta.entry(current_sha.clone()).or_default().0 = rest.to_string();
        } else if let Some(rest) = line.strip_prefix("author-mail ") {
            commit_meta.entry(current_sha.clone()).or_default().1 = rest.trim_matches(['<', '>']).to_string();
        } else if let Some(rest) = line.strip_prefix("author-time ") {
            commit_meta.entry(current_sha.clone()).or_default().2 = rest.parse().unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("summary ") {
            commit_meta.entry(current_sha.clone()).or_default().3 = rest.to_string();
        } else if line.starts_with('\t') {
            let (author, email, author_time, summary) = commit_meta.entry(current_sha.clone()).or_default().clone();
            let mut task_ids = extract_task_ids(&summary);
            let body = bodies.get(&current_sha);
            if task_ids.is_empty() {
                if let Some(body) = body {
                    task_ids = extract_task_ids(body);
                }
            }
            let is_bug_fix = BUG_FIX_WORDS.is_match(&summary) || body.is_some_and(|b| BUG_FIX_WORDS.is_match(b));
            map.insert(
                current_final_line,
                BlameLine {
                    commit: current_sha.clone(),
                    author,
                    email,
                    author_time,
                    task_ids,
                    is_bug_fix,
                },
            );
        }
    }

    map
}

/// Parses `git log --format=%H%x00%B%x00` output into `sha -> body`.
#[must_use]
pub fn parse_log_bodies(output: &str) -> HashMap<String, String> {
    let mut bodies = HashMap::new();
    let mut tokens = output.split('\0');
    loop {
        let Some(sha) = tokens.next() else { break };
        let sha = sha.trim();
        if sha.is_empty() {
            continue;
        }
        let Some(body) = tokens.next() else { break };
        bodies.insert(sha.to_string(), body.trim().to_string());
    }
    bodies
}

async fn run_git(repo_root: &Path, args: &[&str]) -> Result<String> {
    let output = tokio::process::Command::new("git").args(args).current_dir(repo_root).output().await?;
    if !output.status.success() {
        return Err(GitEnrichmentError::Other(format!("git {args:?} failed: {}", String::from_utf8_lossy(&output.stderr))));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Runs `blame --porcelain -w` and `log --format=%H\x00%B\x00` for one file
/// concurrently and merges the result (§4.10 step 2).
pub async fn run_blame(repo_root: &Path, rel_path: &str) -> Result<BlameMap> {
    let blame_fut = run_git(repo_root, &["blame", "--porcelain", "-w", "--", rel_path]);
    let log_fut = run_git(repo_root, &["log", "--format=%H%x00%B%x00"]);

    let (blame_out, log_out) = tokio::join!(blame_fut, log_fut);
    let blame_out = blame_out?;
    let log_out = log_out.unwrap_or_default();

    let bodies = parse_log_bodies(&log_out);
    Ok(parse_porcelain(&blame_out, &bodies))
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFileV4 {
    version: u32,
    #[serde(rename = "contentHash")]
    content_hash: String,
    #[serde(rename = "cachedAt")]
    cached_at: i64,
    lines: Vec<(u32, String, String, String, i64, Vec<String>, bool)>,
}

fn truncated_content_hash(content_hash: &str) -> String {
    content_hash.chars().take(16).collect()
}

fn l1_key(repo_root: &str, rel_path: &str, content_hash: &str) -> String {
    format!("{repo_root}\u{1e}{rel_path}\u{1e}{content_hash}")
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// L2 cache location: `$cacheDir/<md5(repoRoot)[:8]>/<md5(relPath)[:12]>.json`.
fn l2_path(cache_dir: &Path, repo_root: &str, rel_path: &str) -> PathBuf {
    let repo_dir = &md5_hex(repo_root)[..8];
    let file_name = format!("{}.json", &md5_hex(rel_path)[..12]);
    cache_dir.join(repo_dir).join(file_name)
}

/// Two-level blame cache: L1 is an in-memory LRU keyed by
/// `(repoRoot, relPath, contentHash)`; L2 is a best-effort on-disk cache
/// (failures to read/write it are logged and otherwise ignored).
pub struct BlameCache {
    l1: Mutex<lru::LruCache<String, Arc<BlameMap>>>,
    cache_dir: Option<PathBuf>,
}

impl BlameCache {
    #[must_use]
    pub fn new(cache_dir: Option<PathBuf>, l1_capacity: usize) -> Self {
        Self {
            l1: Mutex::new(lru::LruCache::new(NonZeroUsize::new(l1_capacity.max(1)).unwrap())),
            cache_dir,
        }
    }

    pub async fn get(&self, repo_root: &str, rel_path: &str, content_hash: &str) -> Option<Arc<BlameMap>> {
        let key = l1_key(repo_root, rel_path, content_hash);
        if let Some(hit) = self.l1.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return Some(hit.clone());
        }

        let cache_dir = self.cache_dir.as_ref()?;
        let path = l2_path(cache_dir, repo_root, rel_path);
        let bytes = tokio::fs::read(&path).await.ok()?;
        let parsed: CacheFileV4 = serde_json::from_slice(&bytes).ok()?;
        if parsed.version != BLAME_CACHE_VERSION || parsed.content_hash != truncated_content_hash(content_hash) {
            return None;
        }

        let map: BlameMap = parsed
            .lines
            .into_iter()
            .map(|(line, commit, author, email, author_time, task_ids, is_bug_fix)| {
                (
                    line,
                    BlameLine {
                        commit,
                        author,
                        email,
                        author_time,
                        task_ids,
                        is_bug_fix,
                    },
                )
            })
            .collect();
        let map = Arc::new(map);
        self.l1.lock().unwrap_or_else(|e| e.into_inner()).put(key, map.clone());
        Some(map)
    }

    pub async fn put(&self, repo_root: &str, rel_path: &str, content_hash: &str, blame: BlameMap) -> Arc<BlameMap> {
        let blame = Arc::new(blame);
        let key = l1_key(repo_root, rel_path, content_hash);
        self.l1.lock().unwrap_or_else(|e| e.into_inner()).put(key, blame.clone());

        if let Some(cache_dir) = &self.cache_dir {
            let path = l2_path(cache_dir, repo_root, rel_path);
            let record = CacheFileV4 {
                version: BLAME_CACHE_VERSION,
                content_hash: truncated_content_hash(content_hash),
                cached_at: chrono::Utc::now().timestamp_millis(),
                lines: blame
                    .iter()
                    .map(|(line, entry)| (*line, entry.commit.clone(), entry.author.clone(), entry.email.clone(), entry.author_time, entry.task_ids.clone(), entry.is_bug_fix))
                    .collect(),
            };
            if let Ok(json) = serde_json::to_vec(&record) {
                if let Some(parent) = path.parent() {
                    if let Err(err) = tokio::fs::create_dir_all(parent).await {
                        log::warn!("blame L2 cache mkdir failed for {}: {err}", path.display());
                        return blame;
                    }
                }
                if let Err(err) = tokio::fs::write(&path, json).await {
                    log::warn!("blame L2 cache write failed for {}: {err}", path.display());
                }
            }
        }
        blame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_porcelain_attaches_author_and_summary() {
        let porcelain = "\
abcdabcdabcdabcdabcdabcdabcdabcdabcdabcd 1 1 1
author Alice
author-mail <alice@example.com>
author-time 1700000000
summary fix bug PROJ-7
\tfn f() {}
";
        let bodies = HashMap::new();
        let map = parse_porcelain(porcelain, &bodies);
        let line = map.get(&1).unwrap();
        assert_eq!(line.author, "Alice");
        assert_eq!(line.email, "alice@example.com");
        assert_eq!(line.task_ids, vec!["PROJ-7".to_string()]);
    }

    #[test]
    fn summary_without_task_id_falls_back_to_body() {
        let porcelain = "\
abcdabcdabcdabcdabcdabcdabcdabcdabcdabcd 1 1 1
author Alice
author-mail <alice@example.com>
author-time 1700000000
summary quick fix
\tfn f() {}
";
        let mut bodies = HashMap::new();
        bodies.insert("abcdabcdabcdabcdabcdabcdabcdabcdabcdabcd".to_string(), "quick fix\n\nrefs PROJ-9".to_string());
        let map = parse_porcelain(porcelain, &bodies);
        assert_eq!(map.get(&1).unwrap().task_ids, vec!["PROJ-9".to_string()]);
    }

    #[test]
    fn aggregate_picks_dominant_author_and_union_of_task_ids() {
        let mut blame = BlameMap::new();
        blame.insert(
            1,
            BlameLine {
                commit: "c1".into(),
                author: "Alice".into(),
                email: "a@x.com".into(),
                author_time: 1_700_000_000,
                task_ids: vec!["PROJ-1".into()],
                is_bug_fix: false,
            },
        );
        blame.insert(
            2,
            BlameLine {
                commit: "c1".into(),
                author: "Alice".into(),
                email: "a@x.com".into(),
                author_time: 1_700_000_000,
                task_ids: vec![],
                is_bug_fix: false,
            },
        );
        blame.insert(
            3,
            BlameLine {
                commit: "c2".into(),
                author: "Bob".into(),
                email: "b@x.com".into(),
                author_time: 1_700_100_000,
                task_ids: vec!["PROJ-2".into()],
                is_bug_fix: true,
            },
        );

        let agg = aggregate_chunk_blame(&blame, 1, 3, 1_700_200_000);
        assert_eq!(agg.dominant_author, Some("Alice".to_string()));
        assert_eq!(agg.authors.len(), 2);
        assert_eq!(agg.commit_shas.len(), 2);
        assert_eq!(agg.last_commit_hash, Some("c2".to_string()));
        assert!(agg.task_ids.contains(&"PROJ-1".to_string()));
        assert!(agg.task_ids.contains(&"PROJ-2".to_string()));
        assert!((agg.bug_fix_rate - 50.0).abs() < 1e-9);
    }
}
