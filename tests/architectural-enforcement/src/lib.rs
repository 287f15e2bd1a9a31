//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the companion crates:
//! - No sleep() calls in production code (timers wait on deadlines)
//! - No blocking I/O inside async functions
//!
//! These tests are designed to catch violations early in the development cycle.
//! This library holds the source scanning shared by the tests.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees checked by every rule
pub const PRODUCTION_DIRS: &[&str] = &["companion/core/src", "companion/cli/src"];

/// Workspace root, resolved from this package's manifest
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// A source file, cut off at its test module
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Production lines only
    pub lines: Vec<String>,
}

/// Load every `.rs` file under `dir` (relative to the workspace root)
pub fn production_sources(dir: &str) -> Vec<SourceFile> {
    let root = workspace_root();
    let base = root.join(dir);
    if !base.exists() {
        return Vec::new();
    }

    walkdir::WalkDir::new(&base)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .filter_map(|entry| {
            let content = fs::read_to_string(entry.path()).ok()?;
            let path = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_path_buf();
            Some(SourceFile {
                path,
                lines: production_lines(&content),
            })
        })
        .collect()
}

/// Lines before the first `#[cfg(test)]`
///
/// Test modules sit at the bottom of each file in this workspace.
pub fn production_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .take_while(|line| line.trim() != "#[cfg(test)]")
        .map(str::to_string)
        .collect()
}

/// Code part of a line (comments stripped)
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether a trimmed line opens a function, with any visibility or qualifiers
pub fn is_fn_signature(line: &str) -> bool {
    let line = line.trim_start();
    let rest = line
        .strip_prefix("pub(crate) ")
        .or_else(|| line.strip_prefix("pub(super) "))
        .or_else(|| line.strip_prefix("pub "))
        .unwrap_or(line);
    let rest = rest.strip_prefix("async ").unwrap_or(rest);
    rest.starts_with("fn ")
}

/// Whether the function enclosing `current_idx` is async
///
/// Finds the nearest preceding function signature. Closures and async blocks
/// inside a sync function count as sync; top-level lines count as sync.
pub fn is_in_async_function(lines: &[String], current_idx: usize) -> bool {
    lines[..=current_idx]
        .iter()
        .rev()
        .find(|line| is_fn_signature(line))
        .is_some_and(|line| line.contains("async fn "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(code: &[&str]) -> Vec<String> {
        code.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_fn_signatures() {
        assert!(is_fn_signature("fn main() {"));
        assert!(is_fn_signature("    pub async fn send(&self) {"));
        assert!(is_fn_signature("pub(crate) fn capture("));
        assert!(!is_fn_signature("let f = |x| x;"));
        assert!(!is_fn_signature("// fn commented()"));
    }

    #[test]
    fn test_async_detection_uses_nearest_function() {
        let code = lines(&[
            "pub fn load() {",
            "    std::fs::read_to_string(path);",
            "}",
            "pub async fn restore() {",
            "    tokio::fs::read(path).await;",
            "}",
        ]);
        assert!(!is_in_async_function(&code, 1));
        assert!(is_in_async_function(&code, 4));
    }

    #[test]
    fn test_test_module_is_cut_off() {
        let content = "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        assert_eq!(production_lines(content), vec!["fn a() {}".to_string()]);
    }

    #[test]
    fn test_production_dirs_exist() {
        for dir in PRODUCTION_DIRS {
            assert!(
                !production_sources(dir).is_empty(),
                "no sources found under {dir}"
            );
        }
    }
}
