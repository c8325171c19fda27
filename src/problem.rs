//! Problem grading configuration
//!
//! Test cases, time limit and judge policy for a problem, parsed from the
//! JSON document kept in the problem store. The parser accepts the shapes that
//! problem documents have historically been stored in (see `from_document`).

use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Time limit used when a problem does not carry a valid one
pub const DEFAULT_TIME_LIMIT_SECS: f64 = 2.0;

/// Default tolerance of the `float_eps` judge (1e-6)
pub fn default_epsilon() -> BigDecimal {
    BigDecimal::new(1.into(), 6)
}

/// Comparison policy for deciding whether an output is correct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeType {
    #[default]
    Equal,
    UnorderedEqual,
    FloatEps,
    #[serde(other)]
    Unknown,
}

impl JudgeType {
    pub fn parse(name: &str) -> JudgeType {
        match name {
            "equal" => JudgeType::Equal,
            "unordered_equal" => JudgeType::UnorderedEqual,
            "float_eps" => JudgeType::FloatEps,
            _ => JudgeType::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub input: Value,
    pub expected_output: Value,
}

#[derive(Debug, Clone)]
pub struct ProblemGradingConfig {
    pub test_cases: Vec<TestCase>,
    pub time_limit_seconds: f64,
    pub judge_type: JudgeType,
    pub epsilon: BigDecimal,
}

impl Default for ProblemGradingConfig {
    fn default() -> Self {
        Self {
            test_cases: Vec::new(),
            time_limit_seconds: DEFAULT_TIME_LIMIT_SECS,
            judge_type: JudgeType::Equal,
            epsilon: default_epsilon(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProblemFormatError {
    #[error("test cases are not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("test cases must be a list or an object with a finalTestCases list")]
    NotAList,
    #[error("test case {case_number} is not an object")]
    NotAnObject { case_number: usize },
    #[error("test case {case_number} is missing '{key}'")]
    MissingKey {
        case_number: usize,
        key: &'static str,
    },
}

impl ProblemGradingConfig {
    /// Parse a stored problem document.
    ///
    /// Test cases may be stored as a list, as a JSON string encoding the list,
    /// or as an object wrapping the list under `finalTestCases`. A document
    /// without any test-case field has zero test cases. Unknown judge types
    /// fall back to `equal`; invalid epsilon or time limit values fall back to
    /// their defaults.
    pub fn from_document(problem_id: &str, doc: &Value) -> Result<Self, ProblemFormatError> {
        let raw_cases = field(doc, &["finalTestCases", "final_test_cases", "testCases"]);
        let test_cases = match raw_cases {
            Some(raw) => parse_test_cases(raw)?,
            None => Vec::new(),
        };

        let judge_type = match field(doc, &["judgeType", "judge_type"]) {
            None | Some(Value::Null) => JudgeType::Equal,
            Some(Value::String(name)) => match JudgeType::parse(name) {
                JudgeType::Unknown => {
                    warn!(
                        "Invalid judge_type '{}' for problem '{}'. Defaulting to 'equal'.",
                        name, problem_id
                    );
                    JudgeType::Equal
                }
                judge => judge,
            },
            Some(other) => {
                warn!(
                    "Non-string judge_type {} for problem '{}'. Defaulting to 'equal'.",
                    other, problem_id
                );
                JudgeType::Equal
            }
        };

        let epsilon = match field(doc, &["epsilon"]) {
            None | Some(Value::Null) => default_epsilon(),
            Some(raw) => match decimal_from_value(raw) {
                Some(eps) => eps,
                None => {
                    warn!(
                        "Invalid epsilon {} for problem '{}'. Using default.",
                        raw, problem_id
                    );
                    default_epsilon()
                }
            },
        };

        let time_limit_seconds = match field(doc, &["timeLimitSeconds", "time_limit_seconds"]) {
            None | Some(Value::Null) => DEFAULT_TIME_LIMIT_SECS,
            Some(raw) => match time_limit_from_value(raw) {
                Some(limit) => limit,
                None => {
                    warn!(
                        "Invalid time limit {} for problem '{}'. Using default {}s.",
                        raw, problem_id, DEFAULT_TIME_LIMIT_SECS
                    );
                    DEFAULT_TIME_LIMIT_SECS
                }
            },
        };

        Ok(Self {
            test_cases,
            time_limit_seconds,
            judge_type,
            epsilon,
        })
    }
}

fn field<'a>(doc: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| doc.get(*name))
}

fn parse_test_cases(raw: &Value) -> Result<Vec<TestCase>, ProblemFormatError> {
    let decoded;
    let raw = match raw {
        Value::String(s) => {
            decoded = serde_json::from_str::<Value>(s)?;
            &decoded
        }
        other => other,
    };

    let list = match raw {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("finalTestCases") {
            Some(Value::Array(items)) => items,
            _ => return Err(ProblemFormatError::NotAList),
        },
        _ => return Err(ProblemFormatError::NotAList),
    };

    list.iter()
        .enumerate()
        .map(|(idx, item)| {
            let case_number = idx + 1;
            let obj = item
                .as_object()
                .ok_or(ProblemFormatError::NotAnObject { case_number })?;
            let input = obj
                .get("input")
                .cloned()
                .ok_or(ProblemFormatError::MissingKey {
                    case_number,
                    key: "input",
                })?;
            let expected_output = obj
                .get("expectedOutput")
                .or_else(|| obj.get("expected_output"))
                .cloned()
                .ok_or(ProblemFormatError::MissingKey {
                    case_number,
                    key: "expectedOutput",
                })?;
            Ok(TestCase {
                input,
                expected_output,
            })
        })
        .collect()
}

fn decimal_from_value(raw: &Value) -> Option<BigDecimal> {
    match raw {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        Value::String(s) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn time_limit_from_value(raw: &Value) -> Option<f64> {
    let limit = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (limit.is_finite() && limit > 0.0).then_some(limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_list() {
        let doc = json!({
            "finalTestCases": [
                {"input": 3, "expected_output": 9},
                {"input": [1, 2], "expectedOutput": [2, 1]}
            ],
            "judgeType": "unordered_equal",
            "timeLimitSeconds": 1.5,
            "epsilon": "0.001"
        });
        let config = ProblemGradingConfig::from_document("p1", &doc).unwrap();
        assert_eq!(config.test_cases.len(), 2);
        assert_eq!(config.test_cases[0].expected_output, json!(9));
        assert_eq!(config.judge_type, JudgeType::UnorderedEqual);
        assert_eq!(config.time_limit_seconds, 1.5);
        assert_eq!(config.epsilon, BigDecimal::from_str("0.001").unwrap());
    }

    #[test]
    fn test_parse_json_string_wrapping_object() {
        let inner = json!({"finalTestCases": [{"input": "a", "expected_output": "A"}]});
        let doc = json!({ "finalTestCases": inner.to_string() });
        let config = ProblemGradingConfig::from_document("p1", &doc).unwrap();
        assert_eq!(config.test_cases.len(), 1);
        assert_eq!(config.test_cases[0].input, json!("a"));
    }

    #[test]
    fn test_unknown_judge_type_defaults_to_equal() {
        let doc = json!({"finalTestCases": [], "judge_type": "fuzzy"});
        let config = ProblemGradingConfig::from_document("p1", &doc).unwrap();
        assert_eq!(config.judge_type, JudgeType::Equal);
        assert!(config.test_cases.is_empty());
    }

    #[test]
    fn test_invalid_limits_fall_back() {
        let doc = json!({"time_limit_seconds": "soon", "epsilon": true});
        let config = ProblemGradingConfig::from_document("p1", &doc).unwrap();
        assert_eq!(config.time_limit_seconds, DEFAULT_TIME_LIMIT_SECS);
        assert_eq!(config.epsilon, default_epsilon());
    }

    #[test]
    fn test_malformed_test_cases() {
        let doc = json!({"finalTestCases": 42});
        assert!(matches!(
            ProblemGradingConfig::from_document("p1", &doc),
            Err(ProblemFormatError::NotAList)
        ));

        let doc = json!({"finalTestCases": [{"input": 1}]});
        assert!(matches!(
            ProblemGradingConfig::from_document("p1", &doc),
            Err(ProblemFormatError::MissingKey { case_number: 1, .. })
        ));

        let doc = json!({"finalTestCases": "[not json"});
        assert!(matches!(
            ProblemGradingConfig::from_document("p1", &doc),
            Err(ProblemFormatError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_judge_type_serde_other() {
        let judge: JudgeType = serde_json::from_str("\"levenshtein\"").unwrap();
        assert_eq!(judge, JudgeType::Unknown);
        assert_eq!(JudgeType::parse("float_eps"), JudgeType::FloatEps);
    }
}
