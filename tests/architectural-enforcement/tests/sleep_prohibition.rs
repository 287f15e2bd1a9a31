//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the companion crates MUST NOT call sleep.
//! Timers wait on an explicit deadline (`sleep_until` on the next expiry) so
//! nothing polls. There is no reconnect loop, so no backoff exception either.

use architectural_enforcement::{code_part, production_sources, SourceFile, PRODUCTION_DIRS};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations: Vec<String> = PRODUCTION_DIRS
        .iter()
        .flat_map(|dir| production_sources(dir))
        .flat_map(|file| sleep_violations(&file))
        .collect();

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nACCEPTABLE:");
        eprintln!("  - tokio::time::sleep_until(deadline) on a computed expiry");
        eprintln!("  - Test code (#[cfg(test)] modules, tests/ directories)");
        eprintln!("\nFORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep as poor man's synchronization");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}

fn sleep_violations(file: &SourceFile) -> Vec<String> {
    file.lines
        .iter()
        .enumerate()
        .filter(|(_, line)| is_sleep_call(code_part(line)))
        .map(|(idx, line)| format!("{}:{} - {}", file.path.display(), idx + 1, line.trim()))
        .collect()
}

/// `sleep(` calls, but not `sleep_until(`
fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(") || code.starts_with("sleep(")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_violation_detection() {
        assert!(is_sleep_call(
            "    tokio::time::sleep(Duration::from_millis(10)).await;"
        ));
        assert!(is_sleep_call("    std::thread::sleep(d);"));
    }

    #[test]
    fn test_deadline_wait_allowed() {
        assert!(!is_sleep_call(
            "    _ = tokio::time::sleep_until(deadline), if armed => {"
        ));
        assert!(!is_sleep_call(code_part("    // no tokio::time::sleep( here")));
    }
}
