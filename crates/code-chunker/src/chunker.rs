use crate::chunk::{ChunkMetadata, ChunkType, CodeChunk};
use crate::contextual_imports::extract_imports_from_lines;
use crate::error::{ChunkerError, Result};
use crate::language::Language;
use crate::ruby_grouper;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tree_sitter::{Node, Parser};

/// Minimum chunk text length (bytes) below which a candidate chunk is
/// dropped as noise (stray braces, single-line stubs).
const MIN_CHUNK_LEN: usize = 50;

/// Minimum file size (bytes) below which character-chunking the whole file
/// as a last resort is skipped.
const MIN_FILE_LEN_FOR_FALLBACK: usize = 100;

/// Tunables for a single chunking pass.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Target maximum chunk size in characters. Nodes larger than
    /// `2 * max_chunk_size` are split (AST-aware, then character-chunked).
    pub max_chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1500,
        }
    }
}

/// One cached, lazily-constructed parser per language. Parsers are not
/// `Sync`, so each is behind its own mutex; a duplicate-load guard isn't
/// needed beyond the mutex itself since construction is cheap and
/// idempotent.
#[derive(Default)]
struct ParserCache {
    parsers: Mutex<HashMap<&'static str, Parser>>,
}

impl ParserCache {
    fn with_parser<T>(
        &self,
        language: Language,
        f: impl FnOnce(&mut Parser) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.parsers.lock().unwrap_or_else(|e| e.into_inner());
        let parser = match guard.entry(language.as_str()) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(v) => {
                let mut parser = Parser::new();
                let ts_lang = language.tree_sitter_language()?;
                parser
                    .set_language(&ts_lang)
                    .map_err(|e| ChunkerError::Other(format!("set_language: {e}")))?;
                v.insert(parser)
            }
        };
        f(parser)
    }
}

/// The tree-sitter-aware chunker: walks a file's AST and emits
/// [`CodeChunk`]s per the language's chunkable-type registry, falling back
/// to character chunking when parsing fails or the node set is empty.
pub struct Chunker {
    config: ChunkerConfig,
    parsers: ParserCache,
}

impl Chunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config,
            parsers: ParserCache::default(),
        }
    }

    /// Chunk a file's contents given an (optional) path used for language
    /// detection and `filePath` metadata.
    pub fn chunk_file(&self, content: &str, path: &Path) -> Result<Vec<CodeChunk>> {
        let language = Language::from_path(path);
        self.chunk(content, language, &path.to_string_lossy())
    }

    /// Convenience for tests / callers that only have a path string.
    pub fn chunk_str(&self, content: &str, path: Option<&str>) -> Result<Vec<CodeChunk>> {
        let path = path.unwrap_or("unknown");
        let language = Language::from_path(path);
        self.chunk(content, language, path)
    }

    pub fn chunk(
        &self,
        content: &str,
        language: Language,
        file_path: &str,
    ) -> Result<Vec<CodeChunk>> {
        if !language.supports_ast() {
            return Ok(self.character_chunk_whole_file(content, language, file_path));
        }

        let tree = self.parsers.with_parser(language, |parser| {
            parser
                .parse(content, None)
                .ok_or_else(|| ChunkerError::ParseError {
                    path: file_path.to_string(),
                    reason: "parser returned no tree".to_string(),
                })
        });

        let tree = match tree {
            Ok(tree) => tree,
            Err(err) => {
                log::warn!("chunker: parse failed for {file_path}: {err}; falling back to character chunking");
                return Ok(self.character_chunk_whole_file(content, language, file_path));
            }
        };

        if tree.root_node().has_error() {
            log::debug!("chunker: {file_path} parsed with errors, continuing best-effort");
        }

        let chunkable = language.chunkable_types();
        let mut top_level = Vec::new();
        collect_top_level(tree.root_node(), chunkable, &mut top_level);

        let imports = collect_import_lines(content, language);

        let mut chunks = Vec::new();
        let mut chunk_index = 0usize;

        for node in top_level {
            if language == Language::Ruby && matches!(node.kind(), "class" | "module") {
                self.emit_ruby_container(
                    node,
                    content,
                    language,
                    file_path,
                    &imports,
                    &mut chunk_index,
                    &mut chunks,
                );
            } else {
                self.emit_for_node(
                    node,
                    content,
                    language,
                    file_path,
                    None,
                    None,
                    &imports,
                    &mut chunk_index,
                    &mut chunks,
                );
            }
        }

        if chunks.is_empty() && content.len() >= MIN_FILE_LEN_FOR_FALLBACK {
            return Ok(self.character_chunk_whole_file(content, language, file_path));
        }

        if language == Language::Ruby {
            chunks = ruby_grouper::augment_with_body_groups(
                content,
                file_path,
                self.config.max_chunk_size,
                chunks,
            );
        }

        Ok(chunks)
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_for_node(
        &self,
        node: Node,
        content: &str,
        language: Language,
        file_path: &str,
        parent_name: Option<&str>,
        parent_type: Option<&str>,
        imports: &[String],
        chunk_index: &mut usize,
        out: &mut Vec<CodeChunk>,
    ) {
        let text = node_text(node, content);
        if text.trim().len() < MIN_CHUNK_LEN {
            return;
        }

        if text.len() > 2 * self.config.max_chunk_size {
            let name = node_name(node, content);
            let child_types = language.child_chunk_types();
            let mut child_chunks_found = false;

            for descendant in descendants(node) {
                if !child_types.contains(&descendant.kind()) {
                    continue;
                }
                let child_text = node_text(descendant, content);
                if child_text.trim().len() < MIN_CHUNK_LEN {
                    continue;
                }
                child_chunks_found = true;
                if child_text.len() > 2 * self.config.max_chunk_size {
                    self.character_chunk_node(
                        descendant,
                        content,
                        language,
                        file_path,
                        name.as_deref(),
                        Some(classify_node_type(node.kind()).as_str()),
                        imports,
                        chunk_index,
                        out,
                    );
                } else {
                    out.push(self.build_chunk(
                        descendant,
                        content,
                        language,
                        file_path,
                        name.as_deref(),
                        Some(classify_node_type(node.kind()).as_str()),
                        imports,
                        *chunk_index,
                    ));
                    *chunk_index += 1;
                }
            }

            if !child_chunks_found {
                self.character_chunk_node(
                    node,
                    content,
                    language,
                    file_path,
                    parent_name,
                    parent_type,
                    imports,
                    chunk_index,
                    out,
                );
            }
            return;
        }

        out.push(self.build_chunk(
            node,
            content,
            language,
            file_path,
            parent_name,
            parent_type,
            imports,
            *chunk_index,
        ));
        *chunk_index += 1;
    }

    /// Ruby `class`/`module` top-level node: extract `method`/
    /// `singleton_method` descendants as individual function chunks. The
    /// container itself is never emitted as a single chunk — its
    /// remaining body lines (DSL declarations) are classified into
    /// semantic groups in a second pass over the raw source (see
    /// [`crate::ruby_grouper::augment_with_body_groups`]).
    fn emit_ruby_container(
        &self,
        node: Node,
        content: &str,
        language: Language,
        file_path: &str,
        imports: &[String],
        chunk_index: &mut usize,
        out: &mut Vec<CodeChunk>,
    ) {
        let name = node_name(node, content);
        let parent_type = classify_node_type(node.kind()).as_str();

        for method in descendants(node)
            .into_iter()
            .filter(|d| matches!(d.kind(), "method" | "singleton_method"))
        {
            self.emit_for_node(
                method,
                content,
                language,
                file_path,
                name.as_deref(),
                Some(parent_type),
                imports,
                chunk_index,
                out,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_chunk(
        &self,
        node: Node,
        content: &str,
        language: Language,
        file_path: &str,
        parent_name: Option<&str>,
        parent_type: Option<&str>,
        imports: &[String],
        chunk_index: usize,
    ) -> CodeChunk {
        let name = node_name(node, content);
        let chunk_type = classify_node_type(node.kind());
        let symbol_id = match (parent_name, &name) {
            (Some(parent), Some(n)) => Some(format!("{parent}.{n}")),
            (None, Some(n)) => Some(n.clone()),
            _ => None,
        };

        CodeChunk {
            content: node_text(node, content).to_string(),
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
            metadata: ChunkMetadata {
                file_path: file_path.to_string(),
                language: language.as_str().to_string(),
                chunk_index,
                chunk_type: Some(chunk_type),
                name,
                parent_name: parent_name.map(str::to_string),
                parent_type: parent_type.map(str::to_string),
                symbol_id,
                is_documentation: false,
                imports: imports.to_vec(),
                git: None,
            },
        }
    }

    /// Character-chunk an oversized node, rebasing line numbers to the
    /// node's start line.
    #[allow(clippy::too_many_arguments)]
    fn character_chunk_node(
        &self,
        node: Node,
        content: &str,
        language: Language,
        file_path: &str,
        parent_name: Option<&str>,
        parent_type: Option<&str>,
        imports: &[String],
        chunk_index: &mut usize,
        out: &mut Vec<CodeChunk>,
    ) {
        let text = node_text(node, content);
        let start_line = node.start_position().row + 1;
        for (content, rel_start, rel_end) in split_by_chars(text, self.config.max_chunk_size) {
            out.push(CodeChunk {
                content,
                start_line: start_line + rel_start,
                end_line: start_line + rel_end,
                metadata: ChunkMetadata {
                    file_path: file_path.to_string(),
                    language: language.as_str().to_string(),
                    chunk_index: *chunk_index,
                    chunk_type: Some(ChunkType::Block),
                    name: None,
                    parent_name: parent_name.map(str::to_string),
                    parent_type: parent_type.map(str::to_string),
                    symbol_id: None,
                    is_documentation: false,
                    imports: imports.to_vec(),
                    git: None,
                },
            });
            *chunk_index += 1;
        }
    }

    fn character_chunk_whole_file(
        &self,
        content: &str,
        language: Language,
        file_path: &str,
    ) -> Vec<CodeChunk> {
        if content.len() < MIN_FILE_LEN_FOR_FALLBACK {
            return Vec::new();
        }
        let imports = collect_import_lines(content, language);
        let mut out = Vec::new();
        for (idx, (text, start, end)) in
            split_by_chars(content, self.config.max_chunk_size).into_iter().enumerate()
        {
            out.push(CodeChunk {
                content: text,
                start_line: start + 1,
                end_line: end + 1,
                metadata: ChunkMetadata {
                    file_path: file_path.to_string(),
                    language: language.as_str().to_string(),
                    chunk_index: idx,
                    chunk_type: Some(ChunkType::Block),
                    name: None,
                    parent_name: None,
                    parent_type: None,
                    symbol_id: None,
                    is_documentation: false,
                    imports: imports.clone(),
                    git: None,
                },
            });
        }
        out
    }
}

/// Derive a [`ChunkType`] from the raw tree-sitter node-kind string.
#[must_use]
pub fn classify_node_type(kind: &str) -> ChunkType {
    if kind.contains("function") || kind.contains("method") {
        ChunkType::Function
    } else if kind.contains("class") || kind.contains("struct") || kind.contains("module") {
        ChunkType::Class
    } else if kind.contains("interface") || kind.contains("trait") {
        ChunkType::Interface
    } else {
        ChunkType::Block
    }
}

/// Walk depth-first, collecting nodes of a chunkable type without
/// descending into them.
fn collect_top_level<'a>(node: Node<'a>, chunkable: &[&str], out: &mut Vec<Node<'a>>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if chunkable.contains(&child.kind()) {
            out.push(child);
        } else {
            collect_top_level(child, chunkable, out);
        }
    }
}

/// All descendants of `node` (not including `node` itself), depth-first.
fn descendants(node: Node) -> Vec<Node> {
    let mut out = Vec::new();
    collect_descendants(node, &mut out);
    out
}

fn collect_descendants<'a>(node: Node<'a>, out: &mut Vec<Node<'a>>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        out.push(child);
        collect_descendants(child, out);
    }
}

fn node_text<'a>(node: Node, content: &'a str) -> &'a str {
    content
        .get(node.start_byte()..node.end_byte())
        .unwrap_or_default()
}

/// Prefer the AST `name` field; otherwise the first identifier or
/// type_identifier child.
fn node_name(node: Node, content: &str) -> Option<String> {
    if let Some(field) = node.child_by_field_name("name") {
        let text = node_text(field, content).trim();
        if !text.is_empty() {
            return Some(text.to_string());
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if matches!(child.kind(), "identifier" | "type_identifier" | "constant") {
            let text = node_text(child, content).trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }
    None
}

fn collect_import_lines(content: &str, language: Language) -> Vec<String> {
    let lines: Vec<&str> = content.lines().collect();
    extract_imports_from_lines(language, &lines, 50)
}

/// Split `text` into chunks of at most `max_chunk_size` characters on line
/// boundaries where possible, returning `(text, start_line_offset,
/// end_line_offset)` triples (0-based, relative to the first line of
/// `text`).
fn split_by_chars(text: &str, max_chunk_size: usize) -> Vec<(String, usize, usize)> {
    let max_chunk_size = max_chunk_size.max(1);
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut buf = String::new();
    let mut start = 0usize;

    for (idx, line) in lines.iter().enumerate() {
        if !buf.is_empty() && buf.len() + line.len() + 1 > max_chunk_size {
            out.push((std::mem::take(&mut buf), start, idx - 1));
            start = idx;
        }
        if !buf.is_empty() {
            buf.push('\n');
        }
        buf.push_str(line);
    }

    if !buf.is_empty() {
        out.push((buf, start, lines.len() - 1));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_top_level_functions_become_chunks() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let code = "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n\nfn sub(a: i32, b: i32) -> i32 {\n    a - b\n}\n";
        let chunks = chunker.chunk_str(code, Some("lib.rs")).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata.name.as_deref(), Some("add"));
        assert_eq!(chunks[0].metadata.chunk_type, Some(ChunkType::Function));
        assert_eq!(chunks[1].metadata.name.as_deref(), Some("sub"));
    }

    #[test]
    fn drops_tiny_nodes() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let code = "fn f(){}\n";
        let chunks = chunker.chunk_str(code, Some("lib.rs")).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn unsupported_language_character_chunks() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let code = "x".repeat(200);
        let chunks = chunker.chunk_str(&code, Some("data.go")).unwrap();
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].metadata.chunk_type, Some(ChunkType::Block));
    }

    #[test]
    fn tiny_unsupported_file_yields_no_chunks() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let chunks = chunker.chunk_str("x = 1", Some("data.go")).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn oversized_rust_impl_splits_into_methods() {
        let chunker = Chunker::new(ChunkerConfig {
            max_chunk_size: 80,
        });
        let mut code = String::from("impl Thing {\n");
        for i in 0..6 {
            code.push_str(&format!(
                "    pub fn method_{i}(&self) -> i32 {{\n        let x = {i};\n        let y = x * 2;\n        y + 1\n    }}\n\n"
            ));
        }
        code.push_str("}\n");

        let chunks = chunker.chunk_str(&code, Some("lib.rs")).unwrap();
        assert!(chunks.len() >= 6, "expected per-method chunks, got {}", chunks.len());
        for c in &chunks {
            assert_eq!(c.metadata.parent_type.as_deref(), Some("class"));
        }
    }

    #[test]
    fn python_class_and_function_are_classified() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let code = "class Widget:\n    def render(self):\n        return 'box'\n\n\ndef helper():\n    return 1 + 2\n";
        let chunks = chunker.chunk_str(code, Some("widget.py")).unwrap();
        let class_chunk = chunks
            .iter()
            .find(|c| c.metadata.chunk_type == Some(ChunkType::Class))
            .expect("class chunk");
        assert_eq!(class_chunk.metadata.name.as_deref(), Some("Widget"));
    }

    #[test]
    fn symbol_id_combines_parent_and_name() {
        let chunker = Chunker::new(ChunkerConfig {
            max_chunk_size: 40,
        });
        let code = "impl Widget {\n    pub fn render_with_a_long_enough_body(&self) -> String {\n        let a = 1;\n        let b = 2;\n        format!(\"{a}{b}\")\n    }\n}\n";
        let chunks = chunker.chunk_str(code, Some("widget.rs")).unwrap();
        let method = chunks
            .iter()
            .find(|c| c.metadata.chunk_type == Some(ChunkType::Function))
            .expect("method chunk");
        assert_eq!(method.metadata.symbol_id.as_deref(), Some("Widget.render_with_a_long_enough_body"));
    }
}
