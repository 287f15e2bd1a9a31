//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async functions in the companion crates MUST NOT use blocking I/O.
//! **Required**: `tokio::fs`, `tokio::net`, `tokio::io`, async `reqwest`.
//!
//! Blocking calls are acceptable in plain functions that run before the
//! runtime is involved (config loading during startup) and in test code.

use architectural_enforcement::{
    code_part, is_in_async_function, production_sources, SourceFile, PRODUCTION_DIRS,
};

/// Test that production code does not use blocking I/O in async context
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations: Vec<String> = PRODUCTION_DIRS
        .iter()
        .flat_map(|dir| production_sources(dir))
        .flat_map(|file| blocking_io_violations(&file))
        .collect();

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in async code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nFORBIDDEN in async fns:");
        eprintln!("  - std::fs::*, std::net::*");
        eprintln!("  - std::io::stdin()");
        eprintln!("  - std::process::Command");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("\nREQUIRED:");
        eprintln!("  - tokio::fs, tokio::net, tokio::io::stdin, tokio::process");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.",
            violations.len()
        );
    }
}

fn blocking_io_violations(file: &SourceFile) -> Vec<String> {
    let mut violations = Vec::new();
    for (idx, line) in file.lines.iter().enumerate() {
        if let Some(kind) = blocking_kind(code_part(line)) {
            if is_in_async_function(&file.lines, idx) {
                violations.push(format!(
                    "{}:{} - {kind}: {}",
                    file.path.display(),
                    idx + 1,
                    line.trim()
                ));
            }
        }
    }
    violations
}

fn blocking_kind(code: &str) -> Option<&'static str> {
    if code.contains("std::fs::") {
        Some("Blocking file I/O")
    } else if code.contains("std::net::") {
        Some("Blocking network I/O")
    } else if code.contains("std::process::Command") {
        Some("Blocking process I/O")
    } else if code.contains("reqwest::blocking") {
        Some("Blocking HTTP client")
    } else if code.contains("std::io::stdin()") {
        Some("Blocking stdin")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(code: &[&str]) -> Vec<String> {
        code.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_blocking_io_detection() {
        let file = SourceFile {
            path: "x.rs".into(),
            lines: lines(&[
                "async fn bad_function() {",
                "    let contents = std::fs::read_to_string(\"file.txt\")?;",
                "}",
            ]),
        };
        assert_eq!(blocking_io_violations(&file).len(), 1);
    }

    #[test]
    fn test_non_async_function_allowed() {
        let file = SourceFile {
            path: "x.rs".into(),
            lines: lines(&[
                "pub fn load_config_from_path(path: &Path) -> Result<()> {",
                "    let contents = std::fs::read_to_string(path)?;",
                "}",
            ]),
        };
        assert!(blocking_io_violations(&file).is_empty());
    }

    #[test]
    fn test_async_io_allowed() {
        assert_eq!(blocking_kind("tokio::fs::write(&path, bytes).await?;"), None);
        assert_eq!(
            blocking_kind("let s = std::net::TcpStream::connect(a)?;"),
            Some("Blocking network I/O")
        );
    }
}
