//! Task-ID extraction from commit summaries/bodies (§4.10).

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static JIRA_STYLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z]{2,10}-\d{1,6}").unwrap());
static HASH_ISSUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|[^&])#(\d{1,7})").unwrap());
static AZURE_BOARDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"AB#\d{1,7}").unwrap());
static GITLAB_MR: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\d{1,7}").unwrap());

/// Runs all four task-ID regexes over `text` in a fixed order, returning the
/// union with duplicates removed but first-seen order preserved.
#[must_use]
pub fn extract_task_ids(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();

    let mut push = |id: String| {
        if seen.insert(id.clone()) {
            ids.push(id);
        }
    };

    for m in JIRA_STYLE.find_iter(text) {
        push(m.as_str().to_string());
    }
    for caps in HASH_ISSUE.captures_iter(text) {
        push(format!("#{}", &caps[1]));
    }
    for m in AZURE_BOARDS.find_iter(text) {
        push(m.as_str().to_string());
    }
    for m in GITLAB_MR.find_iter(text) {
        push(m.as_str().to_string());
    }

    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_jira_style_ids() {
        assert_eq!(extract_task_ids("fix: resolve PROJ-123 crash"), vec!["PROJ-123"]);
    }

    #[test]
    fn hash_issue_avoids_html_entity() {
        let ids = extract_task_ids("closes #42 but not &#123; entity");
        assert!(ids.contains(&"#42".to_string()));
        assert!(!ids.contains(&"#123".to_string()));
    }

    #[test]
    fn azure_boards_and_gitlab_mr_references() {
        let ids = extract_task_ids("fixes AB#77 per !5");
        assert!(ids.contains(&"AB#77".to_string()));
        assert!(ids.contains(&"!5".to_string()));
    }

    #[test]
    fn dedupes_while_preserving_first_seen_order() {
        let ids = extract_task_ids("PROJ-1 ... PROJ-1 again, then PROJ-2");
        assert_eq!(ids, vec!["PROJ-1".to_string(), "PROJ-2".to_string()]);
    }
}
