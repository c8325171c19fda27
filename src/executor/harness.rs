//! Harness generation and output decoding
//!
//! The harness is a small interpreter script generated per execution. It
//! embeds the user code as a module, reads the JSON input from stdin, calls the
//! first entry point it finds and writes the JSON return value, base64-encoded,
//! after a marker token on stdout. Failures go to stderr as a single JSON line.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Entry point names, tried in order
pub const ENTRY_POINTS: [&str; 4] = ["solution", "solve", "answer", "main"];

const HARNESS_TEMPLATE: &str = r#"import base64
import json
import math
import sys
import traceback
import types

MARKER = "@MARKER@"
ENTRY_POINTS = @ENTRY_POINTS@
SOURCE = base64.b64decode("@SOURCE@").decode("utf-8")


def fail(kind, message, tb=None):
    sys.stdout.flush()
    report = {"kind": kind, "error": message}
    if tb:
        report["traceback"] = tb
    sys.stderr.write("\n" + json.dumps(report) + "\n")
    sys.stderr.flush()
    sys.exit(1)


def sanitize(value):
    if isinstance(value, float):
        if math.isnan(value):
            return "NaN"
        if math.isinf(value):
            return "Infinity" if value > 0 else "-Infinity"
        return value
    if isinstance(value, dict):
        return {str(k): sanitize(v) for k, v in value.items()}
    if isinstance(value, (list, tuple)):
        return [sanitize(v) for v in value]
    return value


try:
    data = json.loads(sys.stdin.read() or "null")
except Exception as exc:
    fail("input_decode", f"{type(exc).__name__}: {exc}")

module = types.ModuleType("solution")
module.__file__ = "solution.py"
try:
    exec(compile(SOURCE, "solution.py", "exec"), module.__dict__)
except Exception as exc:
    fail("load_failed", f"{type(exc).__name__}: {exc}", traceback.format_exc())

entry = None
for name in ENTRY_POINTS:
    candidate = getattr(module, name, None)
    if callable(candidate):
        entry = candidate
        break

if entry is None:
    fail(
        "entry_point_not_found",
        "no callable named one of " + ", ".join(ENTRY_POINTS) + " in the solution code",
    )

try:
    result = entry(data)
except Exception as exc:
    fail("user_exception", f"{type(exc).__name__}: {exc}", traceback.format_exc())

try:
    encoded = json.dumps(sanitize(result), allow_nan=False)
except Exception as exc:
    fail("unserializable_result", f"{type(exc).__name__}: {exc}")

sys.stdout.flush()
sys.stdout.write(MARKER + base64.b64encode(encoded.encode("utf-8")).decode("ascii") + "\n")
sys.stdout.flush()
"#;

/// Token separating printed output from the return-value payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker(String);

impl Marker {
    /// Fresh marker, unique per execution
    pub fn generate() -> Self {
        Self(format!("__GRADER_RETURN_{}__", Uuid::new_v4().simple()))
    }

    #[cfg(test)]
    pub fn fixed(token: &str) -> Self {
        Self(token.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Render the harness script for `code`
pub fn render(code: &str, marker: &Marker) -> String {
    let entry_points = ENTRY_POINTS
        .iter()
        .map(|name| format!("\"{}\"", name))
        .collect::<Vec<_>>()
        .join(", ");

    HARNESS_TEMPLATE
        .replace("@MARKER@", marker.as_str())
        .replace("@ENTRY_POINTS@", &format!("[{}]", entry_points))
        .replace("@SOURCE@", &general_purpose::STANDARD.encode(code))
}

/// Return-value payload found after the marker
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnPayload {
    /// No marker in stdout
    Missing,
    Value(Value),
    /// Marker present but the payload did not decode
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitOutput {
    /// Everything before the last marker
    pub stdout: String,
    pub payload: ReturnPayload,
}

/// Split raw stdout at the last occurrence of the marker.
///
/// The last occurrence is used so that marker-like text printed by the user
/// program earlier stays part of the reported stdout.
pub fn split_stdout(raw: &str, marker: &Marker) -> SplitOutput {
    let Some(pos) = raw.rfind(marker.as_str()) else {
        return SplitOutput {
            stdout: raw.to_string(),
            payload: ReturnPayload::Missing,
        };
    };

    let encoded = raw[pos + marker.as_str().len()..].trim();
    SplitOutput {
        stdout: raw[..pos].to_string(),
        payload: decode_payload(encoded),
    }
}

fn decode_payload(encoded: &str) -> ReturnPayload {
    let bytes = match general_purpose::STANDARD.decode(encoded) {
        Ok(bytes) => bytes,
        Err(e) => return ReturnPayload::Corrupt(format!("invalid base64: {}", e)),
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => ReturnPayload::Value(value),
        Err(e) => ReturnPayload::Corrupt(format!("invalid JSON: {}", e)),
    }
}

/// Kind of failure reported by the harness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarnessFailureKind {
    InputDecode,
    LoadFailed,
    EntryPointNotFound,
    UserException,
    UnserializableResult,
    #[serde(other)]
    Other,
}

/// Failure report written by the harness to stderr
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessFailure {
    pub kind: HarnessFailureKind,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl HarnessFailure {
    /// Find the harness report in stderr (the last line that parses as one)
    pub fn from_stderr(stderr: &str) -> Option<Self> {
        stderr
            .lines()
            .rev()
            .map(str::trim)
            .filter(|line| line.starts_with('{'))
            .find_map(|line| serde_json::from_str::<HarnessFailure>(line).ok())
    }
}
