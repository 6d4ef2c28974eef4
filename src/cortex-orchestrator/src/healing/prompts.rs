//! Prompt templates for the healing phases.
//!
//! The JSON field names and enum values in these templates are read back by
//! [`super::heuristics`]; keep both sides in sync.

use std::fmt::Write as _;

use super::types::{ErrorAnalysis, FixPlan, FixStepType, TestFailure};

const ANALYSIS_TEMPLATE: &str = r#"# Test Failure Analysis

A test failed. Find the root cause. Do not modify any files.

## Failure

{failure}

## Instructions

1. Read the error message and stack trace.
2. Inspect the relevant source and test files.
3. Decide which category best describes the root cause.

## Response Format

Respond with a single JSON block:

```json
{
  "rootCause": "selector_changed | timing_issue | network_error | type_error | build_error | dependency_issue | assertion_failure | logic_error | unknown",
  "confidence": 0.0,
  "explanation": "What went wrong and why",
  "suggestedFix": "How to fix it",
  "affectedFiles": ["path/to/file"],
  "canAutoFix": true
}
```
"#;

const PLAN_TEMPLATE: &str = r#"# Fix Plan

Create a step-by-step plan to fix the failing test below. Do not modify any files.

## Failure

{failure}

## Analysis

{analysis}

## Response Format

Respond with a single JSON block:

```json
{
  "steps": [
    {
      "type": "read | edit | write | delete | command | analysis",
      "file": "path/to/file",
      "description": "What to do",
      "command": "command to run, for command steps",
      "expectedOutcome": "What should be true afterwards"
    }
  ]
}
```
"#;

const APPLY_TEMPLATE: &str = r#"# Apply Fix

Apply the plan below to fix the failing test.

## Failure

{failure}

## Root Cause

{analysis}

## Plan

{plan}

## Instructions

- Make the smallest change that fixes the failure.
- Do not change the test's intent.
- After every file change print a line `Edited: <path>`, `Modified: <path>`, `Updated: <path>` or `Wrote: <path>`.
"#;

fn describe_failure(failure: &TestFailure) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "- **Test:** {}", failure.key());
    if let Some(name) = &failure.test_name {
        let _ = writeln!(out, "- **Name:** {name}");
    }
    if let Some(file) = &failure.file {
        let _ = writeln!(out, "- **File:** {file}");
    }
    let _ = writeln!(out, "\n### Error\n\n```\n{}\n```", failure.error_message);
    if let Some(stack) = &failure.stack_trace {
        let _ = writeln!(out, "\n### Stack Trace\n\n```\n{stack}\n```");
    }
    if let Some(logs) = &failure.logs {
        let _ = writeln!(out, "\n### Logs\n\n```\n{logs}\n```");
    }
    out.trim_end().to_string()
}

fn describe_analysis(analysis: &ErrorAnalysis) -> String {
    let mut out = format!(
        "- **Root cause:** {} (confidence {:.2})\n- **Explanation:** {}\n- **Suggested fix:** {}",
        analysis.root_cause, analysis.confidence, analysis.explanation, analysis.suggested_fix
    );
    if !analysis.affected_files.is_empty() {
        let _ = write!(out, "\n- **Affected files:** {}", analysis.affected_files.join(", "));
    }
    out
}

fn step_type_name(step_type: FixStepType) -> &'static str {
    match step_type {
        FixStepType::Read => "read",
        FixStepType::Edit => "edit",
        FixStepType::Write => "write",
        FixStepType::Delete => "delete",
        FixStepType::Command => "command",
        FixStepType::Analysis => "analysis",
    }
}

fn describe_plan(plan: &FixPlan) -> String {
    let mut out = String::new();
    for (i, step) in plan.steps.iter().enumerate() {
        let _ = write!(
            out,
            "{}. [{}] {}",
            i + 1,
            step_type_name(step.step_type),
            step.description
        );
        if let Some(file) = &step.file {
            let _ = write!(out, " (`{file}`)");
        }
        if let Some(command) = &step.command {
            let _ = write!(out, "\n   Run: `{command}`");
        }
        if let Some(expected) = &step.expected_outcome {
            let _ = write!(out, "\n   Expect: {expected}");
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Prompt for the analysis phase.
pub fn analysis_prompt(failure: &TestFailure) -> String {
    ANALYSIS_TEMPLATE.replace("{failure}", &describe_failure(failure))
}

/// Prompt for the planning phase.
pub fn plan_prompt(failure: &TestFailure, analysis: &ErrorAnalysis) -> String {
    PLAN_TEMPLATE
        .replace("{failure}", &describe_failure(failure))
        .replace("{analysis}", &describe_analysis(analysis))
}

/// Prompt for the apply phase.
pub fn apply_prompt(failure: &TestFailure, analysis: &ErrorAnalysis, plan: &FixPlan) -> String {
    APPLY_TEMPLATE
        .replace("{failure}", &describe_failure(failure))
        .replace("{analysis}", &describe_analysis(analysis))
        .replace("{plan}", &describe_plan(plan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::healing::heuristics::{fallback_plan, heuristic_analysis};

    fn failure() -> TestFailure {
        TestFailure::new("checkout", "pay-with-card", "TimeoutError: waiting for #pay")
            .with_test_name("pays with a card")
            .with_file("tests/checkout.spec.ts")
    }

    #[test]
    fn test_analysis_prompt_contents() {
        let prompt = analysis_prompt(&failure());

        assert!(prompt.contains("checkout:pay-with-card"));
        assert!(prompt.contains("TimeoutError: waiting for #pay"));
        for field in [
            "rootCause",
            "confidence",
            "explanation",
            "suggestedFix",
            "affectedFiles",
            "canAutoFix",
        ] {
            assert!(prompt.contains(field), "missing {field}");
        }
        assert!(prompt.contains("selector_changed"));
        assert!(!prompt.contains("{failure}"));
    }

    #[test]
    fn test_plan_and_apply_prompts() {
        let failure = failure();
        let analysis = heuristic_analysis(&failure);
        let plan = fallback_plan(&failure, &analysis);

        let plan_text = plan_prompt(&failure, &analysis);
        assert!(plan_text.contains("expectedOutcome"));
        assert!(plan_text.contains("timing_issue"));

        let apply_text = apply_prompt(&failure, &analysis, &plan);
        assert!(apply_text.contains("1. [analysis] Investigate and fix"));
        assert!(apply_text.contains("Edited: <path>"));
        assert!(!apply_text.contains("{plan}"));
    }
}
