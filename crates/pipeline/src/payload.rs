//! Builds a point payload from a chunk, per §4.7 step 3.

use std::path::Path;

use context_code_chunker::CodeChunk;
use context_vector_store::Payload;
use serde_json::json;

/// `relative(codebasePath, filePath)`, forward-slash normalized. Falls back
/// to `filePath` unchanged if it isn't actually under `codebasePath`.
#[must_use]
pub fn relative_path(codebase_path: &str, file_path: &str) -> String {
    let rel = Path::new(file_path)
        .strip_prefix(Path::new(codebase_path))
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| file_path.to_string());
    rel.replace('\\', "/")
}

fn file_extension(file_path: &str) -> Option<String> {
    Path::new(file_path).extension().map(|e| e.to_string_lossy().into_owned())
}

/// Required fields plus any optional chunk-metadata fields that are present.
#[must_use]
pub fn build_payload(chunk: &CodeChunk, codebase_path: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert("content".to_string(), json!(chunk.content));
    payload.insert("relativePath".to_string(), json!(relative_path(codebase_path, &chunk.metadata.file_path)));
    payload.insert("startLine".to_string(), json!(chunk.start_line));
    payload.insert("endLine".to_string(), json!(chunk.end_line));
    if let Some(ext) = file_extension(&chunk.metadata.file_path) {
        payload.insert("fileExtension".to_string(), json!(ext));
    }
    payload.insert("language".to_string(), json!(chunk.metadata.language));
    payload.insert("codebasePath".to_string(), json!(codebase_path));
    payload.insert("chunkIndex".to_string(), json!(chunk.metadata.chunk_index));

    if let Some(chunk_type) = chunk.metadata.chunk_type {
        payload.insert("chunkType".to_string(), json!(chunk_type.as_str()));
    }
    if let Some(name) = &chunk.metadata.name {
        payload.insert("name".to_string(), json!(name));
    }
    if let Some(parent_name) = &chunk.metadata.parent_name {
        payload.insert("parentName".to_string(), json!(parent_name));
    }
    if let Some(parent_type) = &chunk.metadata.parent_type {
        payload.insert("parentType".to_string(), json!(parent_type));
    }
    if let Some(symbol_id) = &chunk.metadata.symbol_id {
        payload.insert("symbolId".to_string(), json!(symbol_id));
    }
    if chunk.metadata.is_documentation {
        payload.insert("isDocumentation".to_string(), json!(true));
    }
    if !chunk.metadata.imports.is_empty() {
        payload.insert("imports".to_string(), json!(chunk.metadata.imports));
    }
    if let Some(git) = &chunk.metadata.git {
        if let Ok(value) = serde_json::to_value(git) {
            payload.insert("git".to_string(), value);
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_code_chunker::ChunkMetadata;

    fn chunk(file_path: &str) -> CodeChunk {
        CodeChunk {
            content: "fn f() {}".to_string(),
            start_line: 1,
            end_line: 3,
            metadata: ChunkMetadata {
                file_path: file_path.to_string(),
                language: "rust".to_string(),
                chunk_index: 0,
                ..ChunkMetadata::default()
            },
        }
    }

    #[test]
    fn relative_path_strips_codebase_prefix() {
        assert_eq!(relative_path("/repo", "/repo/src/main.rs"), "src/main.rs");
    }

    #[test]
    fn relative_path_falls_back_when_not_a_prefix() {
        assert_eq!(relative_path("/repo", "/other/main.rs"), "/other/main.rs");
    }

    #[test]
    fn payload_carries_required_fields() {
        let c = chunk("/repo/src/main.rs");
        let payload = build_payload(&c, "/repo");
        assert_eq!(payload.get("relativePath").unwrap(), "src/main.rs");
        assert_eq!(payload.get("fileExtension").unwrap(), "rs");
        assert_eq!(payload.get("language").unwrap(), "rust");
        assert!(payload.get("name").is_none());
        assert!(payload.get("isDocumentation").is_none());
    }

    #[test]
    fn optional_fields_omitted_when_absent() {
        let c = chunk("/repo/src/main.rs");
        let payload = build_payload(&c, "/repo");
        assert!(!payload.contains_key("git"));
        assert!(!payload.contains_key("imports"));
    }
}
