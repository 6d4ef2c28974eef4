//! Decoding agent output, with deterministic fallbacks.
//!
//! Agents are asked to answer with a fenced JSON block. Output that does not
//! decode is never an error: analysis falls back to a keyword classifier over
//! the failure text and planning falls back to a single generic step.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use super::types::{ErrorAnalysis, FixPlan, FixStep, FixStepType, RootCause, TestFailure};

/// Confidence reported by the heuristic classifier.
pub const HEURISTIC_CONFIDENCE: f64 = 0.5;

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*\n(\{.*?\})\s*```").expect("Invalid JSON fence regex")
});

static MODIFIED_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:[-*]\s*)?(?:Edited|Modified|Updated|Wrote):\s*`?([^\s`]+)`?")
        .expect("Invalid modified file regex")
});

/// Keyword table, checked in order. The first match wins.
const ROOT_CAUSE_KEYWORDS: &[(RootCause, &[&str])] = &[
    (
        RootCause::DependencyIssue,
        &[
            "cannot find module",
            "module not found",
            "could not resolve",
            "peer dep",
            "missing dependency",
            "unresolved import",
        ],
    ),
    (
        RootCause::SelectorChanged,
        &[
            "selector",
            "locator",
            "element not found",
            "no element",
            "unable to find element",
            "not visible",
        ],
    ),
    (
        RootCause::TimingIssue,
        &["timeout", "timed out", "exceeded", "waiting for", "race condition"],
    ),
    (
        RootCause::NetworkError,
        &[
            "network",
            "econnrefused",
            "econnreset",
            "fetch failed",
            "socket hang up",
            "503",
            "502",
        ],
    ),
    (
        RootCause::TypeError,
        &[
            "typeerror",
            "type error",
            "is not a function",
            "is not assignable",
            "cannot read propert",
            "undefined is not",
            "mismatched types",
        ],
    ),
    (
        RootCause::BuildError,
        &[
            "build failed",
            "compilation failed",
            "failed to compile",
            "syntaxerror",
            "syntax error",
            "could not compile",
        ],
    ),
    (
        RootCause::AssertionFailure,
        &["assert", "expected", "to equal", "tobe", "to be"],
    ),
];

/// Classify an error message by keywords.
pub fn classify_error(message: &str) -> RootCause {
    let lower = message.to_lowercase();
    ROOT_CAUSE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(cause, _)| *cause)
        .unwrap_or(RootCause::Unknown)
}

fn suggested_fix(cause: RootCause) -> &'static str {
    match cause {
        RootCause::SelectorChanged => "Update the selector to match the current markup",
        RootCause::TimingIssue => "Wait for the expected condition instead of a fixed delay",
        RootCause::NetworkError => "Check that the service under test is reachable",
        RootCause::TypeError => "Fix the type mismatch at the failing call site",
        RootCause::BuildError => "Fix the compilation error reported by the build",
        RootCause::DependencyIssue => "Install or correct the missing dependency",
        RootCause::AssertionFailure => "Align the implementation with the asserted behavior",
        RootCause::LogicError => "Correct the faulty logic in the implementation",
        RootCause::Unknown => "Investigate the failure manually",
    }
}

/// Analysis built from the failure text alone.
pub fn heuristic_analysis(failure: &TestFailure) -> ErrorAnalysis {
    let mut text = failure.error_message.clone();
    if let Some(stack) = &failure.stack_trace {
        text.push('\n');
        text.push_str(stack);
    }
    let root_cause = classify_error(&text);

    ErrorAnalysis {
        root_cause,
        confidence: HEURISTIC_CONFIDENCE,
        explanation: format!(
            "Classified as {root_cause} from the error message: {}",
            failure.error_message
        ),
        suggested_fix: suggested_fix(root_cause).to_string(),
        affected_files: failure.file.iter().cloned().collect(),
        can_auto_fix: !matches!(root_cause, RootCause::NetworkError | RootCause::Unknown),
    }
}

/// Single-step plan used when no plan could be decoded.
pub fn fallback_plan(failure: &TestFailure, analysis: &ErrorAnalysis) -> FixPlan {
    let file = analysis
        .affected_files
        .first()
        .cloned()
        .or_else(|| failure.file.clone());

    FixPlan {
        steps: vec![FixStep {
            step_type: FixStepType::Analysis,
            file,
            description: format!(
                "Investigate and fix the failing test {}: {}",
                failure.key(),
                analysis.suggested_fix
            ),
            command: None,
            expected_outcome: Some("The failing test passes".to_string()),
        }],
    }
}

/// The JSON object in `text`: a fenced block if present, otherwise the span
/// from the first `{` to the last `}`.
pub fn extract_json_block(text: &str) -> Option<&str> {
    if let Some(captures) = JSON_FENCE.captures(text) {
        return captures.get(1).map(|m| m.as_str());
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn decode<T: DeserializeOwned>(output: &str) -> Option<T> {
    let block = extract_json_block(output)?;
    match serde_json::from_str(block) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(error = %e, "Agent output is not the expected JSON");
            None
        }
    }
}

/// Strictly decode an analysis. Rejects confidences outside 0..=1.
pub fn parse_analysis(output: &str) -> Option<ErrorAnalysis> {
    decode::<ErrorAnalysis>(output).filter(|a| (0.0..=1.0).contains(&a.confidence))
}

/// Strictly decode a plan. Rejects plans without steps.
pub fn parse_plan(output: &str) -> Option<FixPlan> {
    decode::<FixPlan>(output).filter(|p| !p.steps.is_empty())
}

/// Files a fix agent reported touching, in order, without duplicates.
pub fn extract_modified_files(output: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for captures in MODIFIED_FILE.captures_iter(output) {
        if let Some(path) = captures.get(1) {
            let path = path.as_str().trim_end_matches([',', '.', ';']);
            if !path.is_empty() && !files.iter().any(|f| f == path) {
                files.push(path.to_string());
            }
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_error() {
        let cases = [
            ("Error: locator('#submit') not found", RootCause::SelectorChanged),
            ("Timeout 30000ms exceeded", RootCause::TimingIssue),
            ("connect ECONNREFUSED 127.0.0.1:3000", RootCause::NetworkError),
            ("TypeError: foo.bar is not a function", RootCause::TypeError),
            ("SyntaxError: Unexpected token", RootCause::BuildError),
            ("Error: Cannot find module 'react'", RootCause::DependencyIssue),
            ("expect(received).toBe(expected)", RootCause::AssertionFailure),
            ("something odd happened", RootCause::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(classify_error(message), expected, "{message}");
        }
    }

    #[test]
    fn test_heuristic_analysis_confidence() {
        let failure = TestFailure::new("s", "c", "TypeError: x is undefined").with_file("src/app.ts");
        let analysis = heuristic_analysis(&failure);

        assert_eq!(analysis.confidence, 0.5);
        assert_eq!(analysis.root_cause, RootCause::TypeError);
        assert_eq!(analysis.affected_files, vec!["src/app.ts"]);
        assert!(analysis.can_auto_fix);
    }

    #[test]
    fn test_extract_fenced_json() {
        let output = "Here is my analysis:\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(extract_json_block(output), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_extract_bare_json() {
        let output = "result {\"a\": {\"b\": 2}} end";
        assert_eq!(extract_json_block(output), Some("{\"a\": {\"b\": 2}}"));
        assert_eq!(extract_json_block("no json here"), None);
    }

    #[test]
    fn test_parse_analysis() {
        let output = r#"```json
{"rootCause": "timing_issue", "confidence": 0.8, "explanation": "Flaky wait", "suggestedFix": "Await the response", "affectedFiles": [], "canAutoFix": true}
```"#;
        let analysis = parse_analysis(output).unwrap();
        assert_eq!(analysis.root_cause, RootCause::TimingIssue);
        assert_eq!(analysis.confidence, 0.8);
    }

    #[test]
    fn test_parse_analysis_rejects_garbage() {
        assert!(parse_analysis("I could not figure it out").is_none());
        assert!(parse_analysis("{\"rootCause\": 42}").is_none());
        assert!(
            parse_analysis(r#"{"rootCause": "unknown", "confidence": 7, "explanation": ""}"#)
                .is_none()
        );
    }

    #[test]
    fn test_parse_plan() {
        let output = r#"{"steps": [
            {"type": "edit", "file": "src/a.ts", "description": "Fix selector"},
            {"type": "command", "description": "Run tests", "command": "npm test", "expectedOutcome": "pass"}
        ]}"#;
        let plan = parse_plan(output).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].step_type, FixStepType::Command);

        assert!(parse_plan(r#"{"steps": []}"#).is_none());
    }

    #[test]
    fn test_fallback_plan_single_step() {
        let failure = TestFailure::new("suite", "scn", "boom").with_file("src/x.ts");
        let analysis = heuristic_analysis(&failure);
        let plan = fallback_plan(&failure, &analysis);

        assert_eq!(plan.steps.len(), 1);
        assert!(plan.steps[0].description.starts_with("Investigate and fix"));
        assert_eq!(plan.steps[0].file.as_deref(), Some("src/x.ts"));
    }

    #[test]
    fn test_extract_modified_files() {
        let output = "\
Applying plan.
Edited: src/login.tsx
- Modified: `src/api/client.ts`
Updated: src/login.tsx
Wrote: tests/login.spec.ts.
Nothing else to report.";

        assert_eq!(
            extract_modified_files(output),
            vec!["src/login.tsx", "src/api/client.ts", "tests/login.spec.ts"]
        );
        assert!(extract_modified_files("no changes").is_empty());
    }
}
