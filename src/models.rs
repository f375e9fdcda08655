// src/models.rs
use serde::{Deserialize, Serialize};

/// One stored test case for an exercise.
///
/// `input` holds newline-delimited values fed to `input()` in call order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct TestCase {
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

impl TestCase {
    /// The supplied-inputs sequence for this case; empty when there is no input.
    pub fn inputs(&self) -> Vec<String> {
        match &self.input {
            Some(text) => text.split('\n').map(str::to_string).collect(),
            None => Vec::new(),
        }
    }

    /// Copy safe to hand to the browser: hidden cases lose their data.
    pub fn redacted(&self) -> Self {
        if self.hidden {
            TestCase { input: None, output: None, hidden: true }
        } else {
            self.clone()
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct Task {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub default_code: Option<String>,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Progress {
    pub code: Option<String>,
    pub is_completed: bool,
    pub completed_at: Option<String>,
}

/// Student behaviour events the editor reports.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Paste,
    Copy,
    Leave,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Paste => "paste",
            ActivityKind::Copy => "copy",
            ActivityKind::Leave => "leave",
        }
    }
}

impl std::str::FromStr for ActivityKind {
    type Err = crate::errors::RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paste" => Ok(ActivityKind::Paste),
            "copy" => Ok(ActivityKind::Copy),
            "leave" => Ok(ActivityKind::Leave),
            other => Err(crate::errors::RunnerError::UnknownActivity(other.to_string())),
        }
    }
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Run,
    Check,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Run => "run",
            RunKind::Check => "check",
        }
    }
}

/// A row of the run history.
#[derive(Serialize, Clone, Debug)]
pub struct RunRecord {
    pub id: String,
    pub student: String,
    pub task_id: i64,
    pub kind: String,
    pub status: String,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub passed_count: Option<i64>,
    pub total_count: Option<i64>,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs_split_on_newlines() {
        let case = TestCase { input: Some("3\n4".to_string()), output: Some("7".to_string()), hidden: false };
        assert_eq!(case.inputs(), vec!["3".to_string(), "4".to_string()]);
        assert!(TestCase::default().inputs().is_empty());
    }

    #[test]
    fn test_redacted_hides_data_of_hidden_cases() {
        let hidden = TestCase { input: Some("1".into()), output: Some("2".into()), hidden: true };
        assert_eq!(hidden.redacted(), TestCase { input: None, output: None, hidden: true });

        let open = TestCase { input: Some("1".into()), output: Some("2".into()), hidden: false };
        assert_eq!(open.redacted(), open);
    }

    #[test]
    fn test_external_shape_deserializes_nulls() {
        let case: TestCase = serde_json::from_str(r#"{"input": null, "output": "hi", "hidden": false}"#).unwrap();
        assert_eq!(case.input, None);
        assert_eq!(case.output.as_deref(), Some("hi"));
    }
}
