//! `.gitignore`-aware file discovery (spec.md §2, "file scanning/ignore-pattern
//! handling" — an external collaborator whose boundary the façade still has to
//! call). Walks a project root with [`ignore::WalkBuilder`] so `.gitignore`,
//! `.ignore`, and hidden-file conventions are honored without the façade
//! reimplementing them, then filters to files a source-aware index cares
//! about: skip anything binary-shaped or implausibly large, keep everything
//! else (code-chunker's character-chunking fallback handles any language it
//! doesn't have a tree-sitter grammar for).

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

/// Directories that are conventionally vendored/generated and not worth
/// walking even when not covered by a project's own ignore files.
const ALWAYS_SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    ".venv",
    "venv",
    "__pycache__",
    ".context-finder",
];

/// Extensions that are almost never useful to index as source text.
const SKIP_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "svg", "webp", "pdf", "zip", "tar", "gz", "bz2",
    "7z", "rar", "exe", "dll", "so", "dylib", "a", "o", "class", "jar", "wasm", "woff", "woff2",
    "ttf", "eot", "mp3", "mp4", "mov", "avi", "lock",
];

/// Files larger than this are skipped outright; a single point payload
/// should not have to carry megabytes of content.
const MAX_FILE_SIZE_BYTES: u64 = 2 * 1024 * 1024;

pub struct FileScanner {
    root: PathBuf,
}

impl FileScanner {
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Walks the project root and returns every indexable file as an
    /// absolute path, sorted for deterministic downstream processing order.
    #[must_use]
    pub fn scan(&self) -> Vec<PathBuf> {
        let mut walker = WalkBuilder::new(&self.root);
        walker
            .hidden(false)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .parents(true);

        let mut files: Vec<PathBuf> = walker
            .build()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .map(|entry| entry.into_path())
            .filter(|path| !is_in_skipped_dir(path, &self.root))
            .filter(|path| should_index(path))
            .collect();

        files.sort();
        files
    }
}

fn is_in_skipped_dir(path: &Path, root: &Path) -> bool {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .any(|c| {
            let s = c.as_os_str().to_string_lossy();
            ALWAYS_SKIP_DIRS.contains(&s.as_ref())
        })
}

fn should_index(path: &Path) -> bool {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if SKIP_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
            return false;
        }
    }

    match std::fs::metadata(path) {
        Ok(meta) => meta.len() > 0 && meta.len() <= MAX_FILE_SIZE_BYTES,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn scans_plain_files_and_skips_ignored_ones() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();

        std::fs::write(root.join("a.rs"), "fn main() {}").unwrap();
        std::fs::create_dir_all(root.join("node_modules")).unwrap();
        std::fs::write(root.join("node_modules/x.js"), "ignored").unwrap();
        std::fs::write(root.join(".gitignore"), "ignored.txt\n").unwrap();
        std::fs::write(root.join("ignored.txt"), "ignored").unwrap();

        let files = FileScanner::new(root).scan();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().to_string())
            .collect();

        assert!(names.contains(&"a.rs".to_string()));
        assert!(!names.iter().any(|n| n.contains("node_modules")));
        assert!(!names.contains(&"ignored.txt".to_string()));
    }

    #[test]
    fn skips_binary_looking_extensions() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("logo.png"), [0u8, 1, 2, 3]).unwrap();
        std::fs::write(root.join("main.rs"), "fn main() {}").unwrap();

        let files = FileScanner::new(root).scan();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["main.rs".to_string()]);
    }

    #[test]
    fn skips_empty_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("empty.rs"), "").unwrap();

        let files = FileScanner::new(root).scan();
        assert!(files.is_empty());
    }
}
