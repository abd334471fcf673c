//! Retry classification.
//!
//! A failing `terminal_run` does not always mean the agent is stuck:
//! failing tests are the expected feedback signal of the build loop,
//! and plain exit-1 commands (grep with no matches, diff with changes)
//! are part of normal operation. Neither counts against the retry
//! budget; real technical failures do.

/// Command fragments that identify test runners.
const TEST_RUNNERS: &[&str] = &[
    "pytest",
    "py.test",
    "unittest",
    "jest",
    "go test",
    "cargo test",
    "npm test",
    "npm run test",
    "yarn test",
    "pnpm test",
    "bun test",
    "mocha",
    "vitest",
    "dotnet test",
    "mvn test",
    "gradle test",
    "ctest",
];

/// Output markers that positively identify a test failure (as opposed
/// to a crash of the runner itself).
const FAILURE_SIGNATURES: &[&str] = &[
    "FAILED",
    "FAILURES",
    "FAIL:",
    "AssertionError",
    "assertion failed",
    "Tests failed",
    "test failed",
    "failing",
    "✗",
    "not ok",
];

/// Whether a command line invokes a test runner.
pub fn is_test_command(command_line: &str) -> bool {
    let lowered = command_line.to_lowercase();
    TEST_RUNNERS.iter().any(|r| lowered.contains(r))
}

/// Whether output carries a positive test-failure marker.
pub fn has_test_failure_signature(output: &str) -> bool {
    FAILURE_SIGNATURES.iter().any(|s| output.contains(s))
}

/// An expected test failure: a test runner that reported failing tests.
/// Fed back to the model without a retry penalty.
pub fn is_expected_test_failure(command_line: &str, exit_code: Option<i64>, output: &str) -> bool {
    is_test_command(command_line)
        && (exit_code.map(|c| c != 0).unwrap_or(false) || has_test_failure_signature(output))
}

/// Plain exit-1 terminal runs are non-fatal: many healthy commands
/// signal "no result" that way.
pub fn is_nonfatal_exit(exit_code: Option<i64>) -> bool {
    exit_code == Some(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_common_runners() {
        assert!(is_test_command("pytest -q tests/"));
        assert!(is_test_command("python -m pytest"));
        assert!(is_test_command("python -m unittest discover"));
        assert!(is_test_command("cargo test --workspace"));
        assert!(is_test_command("npx jest --ci"));
        assert!(is_test_command("go test ./..."));
        assert!(is_test_command("yarn test"));
        assert!(is_test_command("mvn test -B"));
    }

    #[test]
    fn plain_commands_not_runners() {
        assert!(!is_test_command("python main.py"));
        assert!(!is_test_command("ls -la"));
        assert!(!is_test_command("pip install requests"));
    }

    #[test]
    fn signatures_detected() {
        assert!(has_test_failure_signature("E AssertionError: expected 2"));
        assert!(has_test_failure_signature("1 passed, 2 FAILED"));
        assert!(has_test_failure_signature("not ok 3 - handles empty input"));
        assert!(!has_test_failure_signature("3 passed in 0.12s"));
    }

    #[test]
    fn failing_pytest_is_expected() {
        assert!(is_expected_test_failure(
            "pytest -q",
            Some(1),
            "E AssertionError"
        ));
        // Signature alone is enough even with exit 0 (runner quirks).
        assert!(is_expected_test_failure("pytest -q", Some(0), "2 FAILED"));
        // Exit code alone is enough without a signature.
        assert!(is_expected_test_failure("cargo test", Some(101), ""));
    }

    #[test]
    fn non_test_failure_not_expected() {
        assert!(!is_expected_test_failure("python main.py", Some(1), "boom"));
    }

    #[test]
    fn exit_one_nonfatal() {
        assert!(is_nonfatal_exit(Some(1)));
        assert!(!is_nonfatal_exit(Some(2)));
        assert!(!is_nonfatal_exit(None));
    }
}
