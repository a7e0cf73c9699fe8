//! Ruby class/module body grouper.
//!
//! After method nodes have been extracted from a Ruby `class`/`module` as
//! individual function chunks, the remaining body lines (DSL declarations
//! like `has_many`, `validates`, `scope`) are streamed through the state
//! machine below and merged into semantic groups, so e.g. all the
//! associations in an ActiveRecord model become one chunk instead of N
//! single-line ones.

use crate::chunk::{ChunkMetadata, ChunkType, CodeChunk};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// `(leading keyword, group type)`. Matched against a line's first
/// whitespace-delimited token.
const KEYWORD_GROUPS: &[(&str, &str)] = &[
    ("belongs_to", "associations"),
    ("has_one", "associations"),
    ("has_many", "associations"),
    ("has_and_belongs_to_many", "associations"),
    ("validates", "validations"),
    ("validate", "validations"),
    ("validates_presence_of", "validations"),
    ("validates_uniqueness_of", "validations"),
    ("validates_associated", "validations"),
    ("validates_numericality_of", "validations"),
    ("validates_length_of", "validations"),
    ("validates_format_of", "validations"),
    ("validates_inclusion_of", "validations"),
    ("scope", "scopes"),
    ("before_save", "callbacks"),
    ("after_save", "callbacks"),
    ("before_create", "callbacks"),
    ("after_create", "callbacks"),
    ("before_update", "callbacks"),
    ("after_update", "callbacks"),
    ("before_destroy", "callbacks"),
    ("after_destroy", "callbacks"),
    ("before_validation", "callbacks"),
    ("after_validation", "callbacks"),
    ("around_save", "callbacks"),
    ("around_create", "callbacks"),
    ("after_commit", "callbacks"),
    ("after_rollback", "callbacks"),
    ("before_action", "callbacks"),
    ("after_action", "callbacks"),
    ("around_action", "callbacks"),
    ("include", "includes"),
    ("extend", "includes"),
    ("prepend", "includes"),
    ("attr_accessor", "attributes"),
    ("attr_reader", "attributes"),
    ("attr_writer", "attributes"),
    ("attribute", "attributes"),
    ("delegate", "delegates"),
    ("enum", "enums"),
    ("aasm", "state_machine"),
    ("state_machine", "state_machine"),
    ("event", "state_machine"),
    ("accepts_nested_attributes_for", "nested_attributes"),
];

/// Block-opener keywords whose `do ... end` body is dropped transparently:
/// the opening line and the matching `end` are excluded from every group's
/// content, and the interior lines are classified as if they were at the
/// top level of the class body.
const TRANSPARENT_BLOCK_KEYWORDS: &[&str] = &["included", "extended", "class_methods"];

/// Keywords that always start a fresh `"other"` group rather than
/// continuing whatever group preceded them.
const OTHER_STATEMENT_KEYWORDS: &[&str] =
    &["self", "class", "module", "def", "private", "public", "protected"];

static CONSTANT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Z_0-9]*$").unwrap());

fn leading_token(trimmed: &str) -> &str {
    trimmed
        .split(|c: char| c.is_whitespace() || c == '(' || c == ':')
        .next()
        .unwrap_or("")
}

fn keyword_group_for(trimmed: &str) -> Option<&'static str> {
    let token = leading_token(trimmed);
    KEYWORD_GROUPS
        .iter()
        .find(|(kw, _)| *kw == token)
        .map(|(_, group)| *group)
}

fn starts_other_group(trimmed: &str) -> bool {
    let token = leading_token(trimmed);
    CONSTANT_RE.is_match(token) || OTHER_STATEMENT_KEYWORDS.contains(&token)
}

fn is_transparent_opener(trimmed: &str) -> bool {
    let token = leading_token(trimmed);
    TRANSPARENT_BLOCK_KEYWORDS.contains(&token) && opens_do_block(trimmed)
}

fn opens_do_block(trimmed: &str) -> bool {
    let without_comment = strip_trailing_comment(trimmed);
    let t = without_comment.trim_end();
    t == "do" || t.ends_with(" do") || t.ends_with(") do") || ends_with_do_params(t)
}

fn ends_with_do_params(t: &str) -> bool {
    // `scope :active, -> { where(active: true) } do |*args|` style is rare;
    // the common case is `do |x|` / `do |x, y|`.
    if let Some(idx) = t.rfind(" do |") {
        return t[idx..].ends_with('|');
    }
    false
}

fn is_keyword_block_opener(trimmed: &str) -> bool {
    let token = leading_token(trimmed);
    (token == "class" || token == "module") && !trimmed.trim_end().ends_with("end")
}

fn is_end_line(trimmed: &str) -> bool {
    strip_trailing_comment(trimmed).trim() == "end"
}

fn strip_trailing_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn brace_delta(line: &str) -> i32 {
    let code = strip_trailing_comment(line);
    let opens = code.matches('{').count() as i32;
    let closes = code.matches('}').count() as i32;
    opens - closes
}

/// A semantic group of class-body lines, e.g. all `validates` declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyGroup {
    pub group_type: String,
    /// 1-based inclusive `(start, end)` line ranges, in source order.
    pub line_ranges: Vec<(usize, usize)>,
    pub content: String,
}

struct Builder {
    group_type: String,
    line_ranges: Vec<(usize, usize)>,
    lines: Vec<String>,
}

impl Builder {
    fn new(group_type: &str) -> Self {
        Self {
            group_type: group_type.to_string(),
            line_ranges: Vec::new(),
            lines: Vec::new(),
        }
    }

    fn push(&mut self, line_no: usize, text: &str) {
        self.lines.push(text.to_string());
        match self.line_ranges.last_mut() {
            Some((_, end)) if *end + 1 == line_no => *end = line_no,
            _ => self.line_ranges.push((line_no, line_no)),
        }
    }

    fn finish(self) -> BodyGroup {
        BodyGroup {
            group_type: self.group_type,
            line_ranges: self.line_ranges,
            content: self.lines.join("\n"),
        }
    }
}

/// Classify class/module-body lines (already excluding extracted method
/// nodes) into semantic groups.
///
/// `lines` is `(1-based line number, text)` pairs in original source order;
/// callers filter out method-node lines before calling this.
#[must_use]
pub fn classify_body_lines(lines: &[(usize, &str)]) -> Vec<BodyGroup> {
    let mut groups: Vec<BodyGroup> = Vec::new();
    let mut current: Option<Builder> = None;
    // Comment/blank lines seen after the last real declaration, not yet
    // attached to a group. Flushed into the *next* group when one starts;
    // dropped silently if the input ends while still pending (preserves
    // the spec's documented behavior for a comment-only tail).
    let mut pending: Vec<(usize, String)> = Vec::new();

    let mut block_depth = 0u32; // do...end nesting once inside a suspended block
    let mut brace_depth = 0i32;
    let mut keyword_block_depth = 0u32;
    let mut in_transparent_block = false;

    let flush_current = |groups: &mut Vec<BodyGroup>, current: &mut Option<Builder>| {
        if let Some(builder) = current.take() {
            if !builder.lines.is_empty() {
                groups.push(builder.finish());
            }
        }
    };

    for &(line_no, raw) in lines {
        let trimmed = raw.trim();

        // Inside a suspended (non-transparent) block: accumulate into the
        // current group's content until the block closes.
        if block_depth > 0 || brace_depth > 0 {
            if is_end_line(trimmed) && brace_depth == 0 {
                block_depth = block_depth.saturating_sub(1);
                if let Some(builder) = current.as_mut() {
                    builder.push(line_no, raw);
                }
                continue;
            }
            if opens_do_block(trimmed) {
                block_depth += 1;
            }
            brace_depth += brace_delta(trimmed);
            if let Some(builder) = current.as_mut() {
                builder.push(line_no, raw);
            }
            continue;
        }

        if trimmed.is_empty() {
            pending.push((line_no, raw.to_string()));
            continue;
        }

        if is_end_line(trimmed) {
            if in_transparent_block {
                // Drop the closing `end` of a transparent block.
                in_transparent_block = false;
                pending.clear();
                continue;
            }
            if keyword_block_depth > 0 {
                keyword_block_depth -= 1;
                flush_current(&mut groups, &mut current);
                pending.clear();
                continue;
            }
            // Stray `end` with nothing open; treat as a continuation.
            if let Some(builder) = current.as_mut() {
                builder.push(line_no, raw);
            }
            continue;
        }

        if is_keyword_block_opener(trimmed) {
            flush_current(&mut groups, &mut current);
            pending.clear();
            keyword_block_depth += 1;
            continue;
        }

        if is_transparent_opener(trimmed) {
            in_transparent_block = true;
            pending.clear();
            continue;
        }

        let group_type = keyword_group_for(trimmed);
        let declarative = group_type.is_some() || starts_other_group(trimmed);

        if !declarative {
            // A non-blank line that isn't itself a recognized declaration
            // (typically a comment) defers classification: it carries
            // forward as pending and attaches to whichever group comes
            // next, or is dropped silently if nothing follows.
            pending.push((line_no, raw.to_string()));
            continue;
        }

        let resolved_type = group_type.unwrap_or("other").to_string();
        let is_new_kind = match &current {
            Some(builder) => builder.group_type != resolved_type,
            None => true,
        };

        if is_new_kind {
            flush_current(&mut groups, &mut current);
            current = Some(Builder::new(&resolved_type));
        }

        // Pending blank/comment lines accumulated since the last
        // declaration attach to whichever group we're writing into now
        // (the one just opened, or the one this line continues).
        for (pending_line, pending_text) in pending.drain(..) {
            if let Some(builder) = current.as_mut() {
                builder.push(pending_line, &pending_text);
            }
        }

        if let Some(builder) = current.as_mut() {
            builder.push(line_no, raw);
        }

        if opens_do_block(trimmed) {
            block_depth = 1;
        }
        brace_depth += brace_delta(trimmed);
    }

    flush_current(&mut groups, &mut current);
    // Trailing pending (comment-only or blank) lines with no open group are
    // dropped silently, per spec.
    groups
}

/// Split an oversized group's content at line boundaries so no emitted
/// chunk exceeds `max_chunk_size` characters.
fn split_group_if_oversized(group: BodyGroup, max_chunk_size: usize) -> Vec<BodyGroup> {
    if max_chunk_size == 0 || group.content.len() <= max_chunk_size {
        return vec![group];
    }

    let lines: Vec<&str> = group.content.lines().collect();
    // Flatten line_ranges back to individual absolute line numbers, in
    // source order, one per `lines` entry.
    let mut numbered = Vec::with_capacity(lines.len());
    for (start, end) in &group.line_ranges {
        for n in *start..=*end {
            numbered.push(n);
        }
    }

    let mut out = Vec::new();
    let mut buf_lines: Vec<&str> = Vec::new();
    let mut buf_numbers: Vec<usize> = Vec::new();
    let mut buf_len = 0usize;

    let flush = |out: &mut Vec<BodyGroup>, buf_lines: &mut Vec<&str>, buf_numbers: &mut Vec<usize>| {
        if buf_lines.is_empty() {
            return;
        }
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for &n in buf_numbers.iter() {
            match ranges.last_mut() {
                Some((_, end)) if *end + 1 == n => *end = n,
                _ => ranges.push((n, n)),
            }
        }
        out.push(BodyGroup {
            group_type: group.group_type.clone(),
            line_ranges: ranges,
            content: buf_lines.join("\n"),
        });
        buf_lines.clear();
        buf_numbers.clear();
    };

    for (line, &num) in lines.iter().zip(numbered.iter()) {
        if buf_len + line.len() + 1 > max_chunk_size && !buf_lines.is_empty() {
            flush(&mut out, &mut buf_lines, &mut buf_numbers);
            buf_len = 0;
        }
        buf_lines.push(line);
        buf_numbers.push(num);
        buf_len += line.len() + 1;
    }
    flush(&mut out, &mut buf_lines, &mut buf_numbers);
    out
}

/// Given chunks already extracted for a file (methods, top-level
/// functions, etc.), find Ruby `class`/`module` containers among them,
/// classify their leftover body lines into semantic groups, and append
/// those as additional [`CodeChunk`]s.
///
/// This is a line-based pass over the whole file rather than a second AST
/// walk: it locates class/module headers textually (`^\s*(class|module)\b`)
/// and treats every line in their span not already covered by an existing
/// chunk as body content for the grouper.
#[must_use]
pub fn augment_with_body_groups(
    content: &str,
    file_path: &str,
    max_chunk_size: usize,
    mut chunks: Vec<CodeChunk>,
) -> Vec<CodeChunk> {
    let source_lines: Vec<&str> = content.lines().collect();
    let mut covered = vec![false; source_lines.len() + 1];
    for chunk in &chunks {
        for line in chunk.start_line..=chunk.end_line {
            if line < covered.len() {
                covered[line] = true;
            }
        }
    }

    // Locate every `class`/`module` header textually and its matching
    // `end`, so body lines not already covered by an extracted method
    // chunk can be classified into groups.
    let mut containers: HashMap<usize, (Option<String>, usize, usize)> = HashMap::new();
    for (idx, line) in source_lines.iter().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim_start();
        if trimmed.starts_with("class ") || trimmed.starts_with("module ") {
            let name = trimmed
                .split_whitespace()
                .nth(1)
                .map(|s| s.trim_end_matches('<').trim().to_string());
            // `find_matching_end` returns a 0-based index; store it as the
            // matching `end` line's 1-based line number so it's directly
            // comparable with `line_no` and with chunk start/end lines.
            let end = find_matching_end(&source_lines, idx) + 1;
            containers.insert(line_no, (name, line_no, end));
        }
    }

    let mut chunk_index = chunks.len();
    for (_, (name, start, end)) in containers {
        let mut body: Vec<(usize, &str)> = Vec::new();
        for line_no in (start + 1)..end {
            if line_no >= covered.len() || covered[line_no] {
                continue;
            }
            body.push((line_no, source_lines[line_no - 1]));
        }
        if body.is_empty() {
            continue;
        }

        let groups = classify_body_lines(&body);
        for group in groups {
            for split in split_group_if_oversized(group, max_chunk_size) {
                let start_line = split.line_ranges.first().map_or(start, |r| r.0);
                let end_line = split.line_ranges.last().map_or(end, |r| r.1);
                chunks.push(CodeChunk {
                    content: split.content,
                    start_line,
                    end_line,
                    metadata: ChunkMetadata {
                        file_path: file_path.to_string(),
                        language: "ruby".to_string(),
                        chunk_index,
                        chunk_type: Some(ChunkType::Block),
                        name: Some(split.group_type.clone()),
                        parent_name: name.clone(),
                        parent_type: Some("class".to_string()),
                        symbol_id: None,
                        is_documentation: false,
                        imports: Vec::new(),
                        git: None,
                        line_ranges: split.line_ranges,
                    },
                });
                chunk_index += 1;
            }
        }
    }

    chunks
}

/// Find the line index (0-based) of the `end` matching the `class`/`module`
/// opener at `start` (0-based), by tracking `do`/`end`/keyword-block depth
/// textually.
fn find_matching_end(lines: &[&str], start: usize) -> usize {
    let mut depth = 1i32;
    let mut idx = start + 1;
    while idx < lines.len() {
        let trimmed = lines[idx].trim();
        let token = leading_token(trimmed);
        if token == "class" || token == "module" || token == "def" || opens_do_block(trimmed) {
            depth += 1;
        } else if is_end_line(trimmed) {
            depth -= 1;
            if depth == 0 {
                return idx;
            }
        }
        idx += 1;
    }
    lines.len().saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(lines: &[&str]) -> Vec<(usize, &str)> {
        lines.iter().enumerate().map(|(i, l)| (i + 1, *l)).collect()
    }

    #[test]
    fn associations_then_validations() {
        let lines = ["  has_many :posts", "", "  validates :email, presence: true"];
        let groups = classify_body_lines(&numbered(&lines));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group_type, "associations");
        assert_eq!(groups[1].group_type, "validations");
        assert_eq!(groups[0].line_ranges, vec![(1, 1)]);
    }

    #[test]
    fn blank_lines_between_same_type_are_continuations() {
        let lines = [
            "  has_many :posts",
            "",
            "  has_many :comments",
            "  belongs_to :account",
        ];
        let groups = classify_body_lines(&numbered(&lines));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group_type, "associations");
    }

    #[test]
    fn multiline_scope_do_end_stays_one_group() {
        let lines = [
            "  scope :recent, -> do",
            "    where('created_at > ?', 1.week.ago)",
            "  end",
            "  scope :old, -> { where('created_at < ?', 1.week.ago) }",
        ];
        let groups = classify_body_lines(&numbered(&lines));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group_type, "scopes");
        assert!(groups[0].content.contains("where"));
    }

    #[test]
    fn transparent_included_do_block_drops_boundary_lines() {
        let lines = [
            "  included do",
            "    has_many :posts",
            "  end",
            "  validates :email, presence: true",
        ];
        let groups = classify_body_lines(&numbered(&lines));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group_type, "associations");
        assert!(!groups[0].content.contains("included"));
        assert!(!groups[0].content.contains("end"));
        assert_eq!(groups[1].group_type, "validations");
    }

    #[test]
    fn aasm_with_nested_event_is_one_state_machine_group() {
        let lines = [
            "  aasm do",
            "    state :pending, initial: true",
            "    event :approve do",
            "      transitions from: :pending, to: :approved",
            "    end",
            "  end",
        ];
        let groups = classify_body_lines(&numbered(&lines));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group_type, "state_machine");
        assert!(groups[0].content.contains("transitions"));
    }

    #[test]
    fn trailing_comment_attaches_to_next_group() {
        let lines = [
            "  has_many :posts",
            "",
            "  # explains the validation below",
            "  validates :email, presence: true",
        ];
        let groups = classify_body_lines(&numbered(&lines));
        assert_eq!(groups.len(), 2);
        assert!(groups[1].content.contains("explains the validation"));
    }

    #[test]
    fn trailing_comment_only_tail_is_dropped() {
        let lines = ["  has_many :posts", "", "  # orphan trailing comment"];
        let groups = classify_body_lines(&numbered(&lines));
        assert_eq!(groups.len(), 1);
        assert!(!groups[0].content.contains("orphan"));
    }

    #[test]
    fn oversized_group_splits_at_line_boundaries() {
        let lines: Vec<String> = (0..20)
            .map(|i| format!("  validates :field_{i}, presence: true"))
            .collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let groups = classify_body_lines(&numbered(&refs));
        assert_eq!(groups.len(), 1);
        let split = split_group_if_oversized(groups.into_iter().next().unwrap(), 200);
        assert!(split.len() > 1, "expected split into multiple chunks");
        for s in &split {
            assert!(s.content.len() <= 200 + 60);
        }
    }

    #[test]
    fn nested_braces_in_hash_argument_suspend_classification() {
        let lines = [
            "  validates :email, format: {",
            "    with: /@/,",
            "  }",
            "  scope :active, -> { where(active: true) }",
        ];
        let groups = classify_body_lines(&numbered(&lines));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group_type, "validations");
        assert_eq!(groups[1].group_type, "scopes");
    }
}
