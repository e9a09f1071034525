use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TIME_COMPLEXITY_INITIAL: &str = "O(1)";
pub const TIME_COMPLEXITY_EMPTY: &str = "N/A";
pub const TIME_COMPLEXITY_ERROR: &str = "Error analyzing";
pub const TIME_COMPLEXITY_UNKNOWN: &str = "Unknown";

/// Request body for POST /analyze-code
#[derive(Debug, Serialize)]
pub struct AnalyzeRequest<'a> {
    pub code: &'a str,
}

/// Parsed body of an /analyze-code response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub time_complexity: String,
    pub syntax_errors: Vec<String>,
}

impl AnalysisReport {
    /// Build a report from a response body, defaulting each field on its own.
    ///
    /// A missing or empty `timeComplexity` becomes "Unknown"; a missing
    /// `syntaxErrors` becomes an empty list. Non-string error entries are kept
    /// as their JSON text.
    pub fn from_json(value: &Value) -> Self {
        let time_complexity = value
            .get("timeComplexity")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(TIME_COMPLEXITY_UNKNOWN)
            .to_string();

        let syntax_errors = match value.get("syntaxErrors") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        };

        Self {
            time_complexity,
            syntax_errors,
        }
    }
}

/// Result shown to the user, tagged with the generation that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub time_complexity: String,
    pub syntax_errors: Vec<String>,
    pub generation: u64,
}

impl AnalysisResult {
    pub fn initial() -> Self {
        Self {
            time_complexity: TIME_COMPLEXITY_INITIAL.to_string(),
            syntax_errors: Vec::new(),
            generation: 0,
        }
    }

    pub fn empty(generation: u64) -> Self {
        Self {
            time_complexity: TIME_COMPLEXITY_EMPTY.to_string(),
            syntax_errors: Vec::new(),
            generation,
        }
    }

    pub fn failed(generation: u64) -> Self {
        Self {
            time_complexity: TIME_COMPLEXITY_ERROR.to_string(),
            syntax_errors: Vec::new(),
            generation,
        }
    }

    pub fn from_report(report: AnalysisReport, generation: u64) -> Self {
        Self {
            time_complexity: report.time_complexity,
            syntax_errors: report.syntax_errors,
            generation,
        }
    }

    pub fn syntax_status(&self) -> SyntaxStatus<'_> {
        if self.syntax_errors.is_empty() {
            SyntaxStatus::Valid
        } else {
            SyntaxStatus::Invalid(&self.syntax_errors)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxStatus<'a> {
    Valid,
    Invalid(&'a [String]),
}

/// What the analysis panel displays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisState {
    pub result: AnalysisResult,
    pub analyzing: bool,
}

impl Default for AnalysisState {
    fn default() -> Self {
        Self {
            result: AnalysisResult::initial(),
            analyzing: false,
        }
    }
}
