// src/evaluator.rs
use crate::channel::{ExecutionRequest, ExecutionResult};
use crate::errors::Result;
use crate::models::TestCase;
use crate::session::Session;
use serde::Serialize;

/// Diagnostic shown instead of the error text of a hidden case.
pub const HIDDEN_ERROR_LABEL: &str = "Execution error";
/// Diagnostic shown instead of expected/actual output of a hidden case.
pub const HIDDEN_MISMATCH_LABEL: &str = "Wrong answer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CaseOutcome {
    Passed,
    Mismatch {
        expected: Option<String>,
        actual: Option<String>,
    },
    Errored {
        diagnostic: String,
    },
    TimedOut {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub index: usize,
    pub hidden: bool,
    #[serde(flatten)]
    pub outcome: CaseOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirstFailure {
    pub index: usize,
    pub diagnostic: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestRunVerdict {
    pub total: usize,
    pub passed_count: usize,
    pub first_failure: Option<FirstFailure>,
    pub all_passed: bool,
    /// Evaluation stopped on a timeout; the interpreter had to be restarted.
    pub timed_out: bool,
    /// The submitted code equals the last pasted text. Informational only.
    pub copied: bool,
    pub reports: Vec<CaseReport>,
}

/// Last `k` lines of `actual`, joined with newlines.
pub fn tail_lines(actual: &str, k: usize) -> String {
    let lines: Vec<&str> = actual.split('\n').collect();
    let start = lines.len().saturating_sub(k);
    lines[start..].join("\n")
}

/// Compares the tail of `actual` with `expected`, line count taken from
/// `expected`. Leading lines (echoed prompts and input values) are ignored.
pub fn tail_matches(actual: &str, expected: &str) -> bool {
    let expected = expected.trim();
    let k = expected.split('\n').count();
    tail_lines(actual.trim(), k) == expected
}

/// Whether `source` is verbatim the most recently pasted text.
pub fn is_copied(source: &str, last_pasted: Option<&str>) -> bool {
    last_pasted.is_some_and(|pasted| source.trim() == pasted.trim())
}

/// Runs `cases` in order against `source`, stopping at the first case that
/// errors, times out or mismatches.
///
/// An empty case list never counts as passed. `last_pasted` only feeds the
/// informational copy flag.
pub async fn evaluate(
    session: &mut Session,
    source: &str,
    cases: &[TestCase],
    last_pasted: Option<&str>,
) -> Result<TestRunVerdict> {
    let copied = is_copied(source, last_pasted);
    if copied {
        log::info!("submitted code matches the last pasted text");
    }
    session.save_draft(source);

    let mut verdict = TestRunVerdict {
        total: cases.len(),
        passed_count: 0,
        first_failure: None,
        all_passed: false,
        timed_out: false,
        copied,
        reports: Vec::with_capacity(cases.len()),
    };

    for (index, case) in cases.iter().enumerate() {
        let result = session.execute(ExecutionRequest::new(source, case.inputs())).await?;

        let (outcome, diagnostic) = match result {
            ExecutionResult::TimedOut { message } => {
                verdict.timed_out = true;
                (CaseOutcome::TimedOut { message: message.clone() }, Some(message))
            }
            ExecutionResult::Failed { error } => {
                let diagnostic = if case.hidden { HIDDEN_ERROR_LABEL.to_string() } else { error };
                (CaseOutcome::Errored { diagnostic: diagnostic.clone() }, Some(diagnostic))
            }
            ExecutionResult::Completed { output } => {
                let expected = case.output.as_deref().unwrap_or("").trim().to_string();
                if tail_matches(&output, &expected) {
                    verdict.passed_count += 1;
                    (CaseOutcome::Passed, None)
                } else if case.hidden {
                    (
                        CaseOutcome::Mismatch { expected: None, actual: None },
                        Some(HIDDEN_MISMATCH_LABEL.to_string()),
                    )
                } else {
                    let actual = tail_lines(output.trim(), expected.split('\n').count());
                    let diagnostic = format!("Expected: {}\nGot: {}", expected, actual);
                    (
                        CaseOutcome::Mismatch { expected: Some(expected), actual: Some(actual) },
                        Some(diagnostic),
                    )
                }
            }
        };

        log::debug!("test {} of {}: {:?}", index + 1, cases.len(), outcome);
        verdict.reports.push(CaseReport { index, hidden: case.hidden, outcome });

        if let Some(diagnostic) = diagnostic {
            verdict.first_failure = Some(FirstFailure { index, diagnostic });
            break;
        }
    }

    if verdict.timed_out {
        if let Err(e) = session.recover().await {
            log::error!("interpreter did not come back after a timeout: {}", e);
        }
    }

    verdict.all_passed = !cases.is_empty() && verdict.passed_count == cases.len();
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use crate::testing::{Reply, ScriptedFactory, completed, failed};

    fn case(input: Option<&str>, output: &str, hidden: bool) -> TestCase {
        TestCase { input: input.map(str::to_string), output: Some(output.to_string()), hidden }
    }

    /// Behaves like a program that reads two numbers (echoing them, as the
    /// input override does) and prints their sum.
    fn adder(request: &ExecutionRequest) -> Reply {
        let numbers: Vec<i64> = request.inputs.iter().filter_map(|v| v.trim().parse().ok()).collect();
        if numbers.len() < 2 {
            return failed("ValueError: invalid literal for int() with base 10: ''");
        }
        completed(&format!("{}\n{}\n{}", request.inputs[0], request.inputs[1], numbers[0] + numbers[1]))
    }

    #[test]
    fn test_tail_comparison() {
        assert!(tail_matches("3\n4\n7", "7"));
        assert!(tail_matches("  hi  ", "hi"));
        assert!(tail_matches("a\nb", "a\nb"));
        assert!(!tail_matches("a\nb", "b\nb"));
        assert!(!tail_matches("Hi", "hi"));
        // trimming applies to the whole string, not to each line
        assert!(tail_matches("x\n7 ", "7\n"));
        assert!(!tail_matches("7 \nend", "7\nend"));
    }

    #[test]
    fn test_tail_comparison_ignores_extra_leading_lines() {
        let expected = "10\n20";
        for actual in ["10\n20", "prompt\n10\n20", "a\nb\nc\n10\n20"] {
            assert!(tail_matches(actual, expected), "{actual:?}");
        }
        for actual in ["10\n21", "prompt\n10\n21", "x\ny\n10\n21"] {
            assert!(!tail_matches(actual, expected), "{actual:?}");
        }
    }

    #[test]
    fn test_shorter_output_compares_whole() {
        assert!(!tail_matches("20", "10\n20"));
        assert_eq!(tail_lines("20", 2), "20");
    }

    #[test]
    fn test_empty_expected_matches_empty_last_line() {
        assert!(tail_matches("", ""));
        assert!(!tail_matches("something", ""));
    }

    #[test]
    fn test_copy_detection() {
        assert!(is_copied("print(1)\n", Some("  print(1)")));
        assert!(!is_copied("print(2)", Some("print(1)")));
        assert!(!is_copied("print(1)", None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sum_case_passes_despite_echo() {
        let factory = ScriptedFactory::new(adder);
        let mut session = Session::new(factory.clone(), SessionConfig::default());

        let source = "a=int(input());b=int(input());print(a+b)";
        let verdict = evaluate(&mut session, source, &[case(Some("3\n4"), "7", false)], None).await.unwrap();

        assert!(verdict.all_passed);
        assert_eq!(verdict.passed_count, 1);
        assert_eq!(verdict.first_failure, None);
        assert_eq!(factory.requests()[0].inputs, vec!["3", "4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_first_mismatch() {
        let factory = ScriptedFactory::new(adder);
        let mut session = Session::new(factory.clone(), SessionConfig::default());
        let cases = [
            case(Some("1\n1"), "2", false),
            case(Some("2\n2"), "5", false),
            case(Some("3\n3"), "6", false),
        ];

        let verdict = evaluate(&mut session, "src", &cases, None).await.unwrap();

        assert!(!verdict.all_passed);
        assert_eq!(verdict.passed_count, 1);
        assert_eq!(
            verdict.first_failure,
            Some(FirstFailure { index: 1, diagnostic: "Expected: 5\nGot: 4".to_string() })
        );
        assert_eq!(verdict.reports.len(), 2);
        assert_eq!(factory.submitted(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_stops_and_hides_details_of_hidden_case() {
        let factory = ScriptedFactory::new(adder);
        let mut session = Session::new(factory.clone(), SessionConfig::default());
        let cases = [case(None, "0", true), case(Some("1\n2"), "3", false)];

        let verdict = evaluate(&mut session, "src", &cases, None).await.unwrap();

        assert_eq!(verdict.first_failure.as_ref().unwrap().diagnostic, HIDDEN_ERROR_LABEL);
        assert_eq!(verdict.reports[0].outcome, CaseOutcome::Errored { diagnostic: HIDDEN_ERROR_LABEL.into() });
        assert_eq!(factory.submitted(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visible_error_is_verbatim() {
        let factory = ScriptedFactory::new(|_| failed("ZeroDivisionError: division by zero"));
        let mut session = Session::new(factory, SessionConfig::default());

        let verdict = evaluate(&mut session, "1/0", &[case(None, "x", false)], None).await.unwrap();

        assert_eq!(verdict.first_failure.unwrap().diagnostic, "ZeroDivisionError: division by zero");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_mismatch_reveals_nothing() {
        let factory = ScriptedFactory::new(|_| completed("41"));
        let mut session = Session::new(factory, SessionConfig::default());

        let verdict = evaluate(&mut session, "print(41)", &[case(None, "42", true)], None).await.unwrap();

        assert_eq!(verdict.reports[0].outcome, CaseOutcome::Mismatch { expected: None, actual: None });
        assert_eq!(verdict.first_failure.unwrap().diagnostic, HIDDEN_MISMATCH_LABEL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_and_restarts_interpreter() {
        let factory = ScriptedFactory::new(|request| {
            if request.inputs.first().map(String::as_str) == Some("loop") {
                Reply::Hang
            } else {
                completed("ok")
            }
        });
        let mut session = Session::new(factory.clone(), SessionConfig::default());
        let cases = [case(Some("fine"), "ok", false), case(Some("loop"), "ok", false), case(None, "ok", false)];

        let verdict = evaluate(&mut session, "src", &cases, None).await.unwrap();

        assert!(verdict.timed_out);
        assert!(!verdict.all_passed);
        assert_eq!(verdict.passed_count, 1);
        assert_eq!(verdict.first_failure.as_ref().unwrap().index, 1);
        assert_eq!(factory.submitted(), 2);
        assert_eq!(factory.created(), 2);
        assert_eq!(session.channel_state(), crate::channel::ChannelState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cases_is_not_a_pass() {
        let factory = ScriptedFactory::new(|_| completed(""));
        let mut session = Session::new(factory.clone(), SessionConfig::default());

        let verdict = evaluate(&mut session, "pass", &[], None).await.unwrap();

        assert!(!verdict.all_passed);
        assert_eq!(verdict.total, 0);
        assert_eq!(factory.submitted(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_copied_flag_is_orthogonal_to_pass() {
        let factory = ScriptedFactory::new(|_| completed("hi"));
        let mut session = Session::new(factory, SessionConfig::default());

        let verdict = evaluate(&mut session, "print('hi')\n", &[case(None, "hi", false)], Some("print('hi')"))
            .await
            .unwrap();

        assert!(verdict.copied);
        assert!(verdict.all_passed);
    }
}
