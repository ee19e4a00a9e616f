/// Core types shared by every tutorbox component: requests, results,
/// trace records and the error taxonomy.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Execution target. The set is closed: adding a target means adding a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Target {
    /// In-process evaluator with per-line state capture
    #[serde(rename = "traced")]
    Traced,
    /// Ahead-of-time compiled through an external compiler
    #[serde(rename = "compiled")]
    Compiled,
    /// Run by an external script interpreter
    #[serde(rename = "hosted")]
    Hosted,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::Traced, Target::Compiled, Target::Hosted];

    pub fn as_str(self) -> &'static str {
        match self {
            Target::Traced => "traced",
            Target::Compiled => "compiled",
            Target::Hosted => "hosted",
        }
    }

    /// Language names accepted as aliases for this target.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Target::Traced => &["python", "py"],
            Target::Compiled => &["c"],
            Target::Hosted => &["javascript", "js", "node"],
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = TutorError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Target::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted || t.aliases().contains(&wanted.as_str()))
            .ok_or_else(|| TutorError::UnsupportedTarget(s.to_string()))
    }
}

/// A single request to run a program.
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    pub source: String,
    pub target: Target,
    /// Opaque authenticated identity, used for logging only
    pub caller: Option<String>,
}

impl ExecutionRequest {
    pub fn new(source: impl Into<String>, target: Target) -> Self {
        Self {
            source: source.into(),
            target,
            caller: None,
        }
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }
}

/// Request shape accepted from collaborators: the target is still a string.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireRequest {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
}

/// Error taxonomy exposed to callers. Every kind is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InputTooLarge,
    UnsupportedTarget,
    DisallowedConstruct,
    CompileError,
    RuntimeFault,
    Timeout,
    ToolchainUnavailable,
    /// Host-side failure outside the program's control
    InternalError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::InputTooLarge,
        ErrorKind::UnsupportedTarget,
        ErrorKind::DisallowedConstruct,
        ErrorKind::CompileError,
        ErrorKind::RuntimeFault,
        ErrorKind::Timeout,
        ErrorKind::ToolchainUnavailable,
        ErrorKind::InternalError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InputTooLarge => "InputTooLarge",
            ErrorKind::UnsupportedTarget => "UnsupportedTarget",
            ErrorKind::DisallowedConstruct => "DisallowedConstruct",
            ErrorKind::CompileError => "CompileError",
            ErrorKind::RuntimeFault => "RuntimeFault",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::ToolchainUnavailable => "ToolchainUnavailable",
            ErrorKind::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Normalized response shape, identical for every target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    /// Empty for targets without line tracing
    pub trace: Vec<TraceStep>,
    pub final_output: String,
    pub error: Option<ExecutionError>,
}

impl ExecutionResult {
    pub fn succeeded(trace: Vec<TraceStep>, final_output: String) -> Self {
        Self {
            success: true,
            trace,
            final_output,
            error: None,
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            trace: Vec::new(),
            final_output: String::new(),
            error: Some(ExecutionError {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn with_trace(mut self, trace: Vec<TraceStep>) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_output(mut self, final_output: impl Into<String>) -> Self {
        self.final_output = final_output.into();
        self
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// State of the program after one executed source line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    #[serde(rename = "line")]
    pub line_number: u32,
    /// Outermost frame first, innermost last
    pub stack: Vec<Frame>,
    #[serde(rename = "output")]
    pub output_so_far: String,
    pub heap: HeapSnapshot,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "function")]
    pub function_name: String,
    #[serde(rename = "line")]
    pub line_number: u32,
    pub bindings: BTreeMap<String, ValueRef>,
}

/// Value that can be shown inline without a heap entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Identity of an object inside one heap snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeapId(pub String);

impl HeapId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HeapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A binding or element: inline scalar or pointer into the snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueRef {
    Ref {
        #[serde(rename = "ref")]
        id: HeapId,
    },
    Scalar(Scalar),
}

impl ValueRef {
    pub fn heap_id(&self) -> Option<&HeapId> {
        match self {
            ValueRef::Ref { id } => Some(id),
            ValueRef::Scalar(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    pub key: ValueRef,
    pub value: ValueRef,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeapValue {
    Scalar(Scalar),
    Sequence(Vec<ValueRef>),
    Mapping(Vec<MapEntry>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeapObject {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub value: HeapValue,
    #[serde(rename = "refs")]
    pub outgoing_refs: BTreeSet<HeapId>,
}

/// Deduplicated object graph reachable from one step's bindings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HeapSnapshot {
    pub objects: BTreeMap<HeapId, HeapObject>,
}

impl HeapSnapshot {
    pub fn get(&self, id: &HeapId) -> Option<&HeapObject> {
        self.objects.get(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Integrity of captured process output
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputIntegrity {
    #[default]
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "truncated_by_limit")]
    TruncatedByLimit,
    #[serde(rename = "read_error")]
    ReadError,
}

impl fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::TruncatedByLimit => write!(f, "truncated_by_limit"),
            OutputIntegrity::ReadError => write!(f, "read_error"),
        }
    }
}

/// Internal error type. `kind()` maps every variant onto the public taxonomy.
#[derive(Error, Debug)]
pub enum TutorError {
    #[error("source is {size} bytes, limit is {limit} bytes")]
    InputTooLarge { size: usize, limit: usize },

    #[error("unsupported target: {0}")]
    UnsupportedTarget(String),

    #[error("disallowed construct: '{0}' is not permitted")]
    DisallowedConstruct(String),

    #[error("{0}")]
    Compile(String),

    #[error("{0}")]
    Runtime(String),

    #[error("execution exceeded {0:?}")]
    Timeout(Duration),

    #[error("toolchain '{0}' is not available on this host")]
    ToolchainUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Workspace error: {0}")]
    Workspace(String),
}

impl TutorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TutorError::InputTooLarge { .. } => ErrorKind::InputTooLarge,
            TutorError::UnsupportedTarget(_) => ErrorKind::UnsupportedTarget,
            TutorError::DisallowedConstruct(_) => ErrorKind::DisallowedConstruct,
            TutorError::Compile(_) => ErrorKind::CompileError,
            TutorError::Runtime(_) => ErrorKind::RuntimeFault,
            TutorError::Timeout(_) => ErrorKind::Timeout,
            TutorError::ToolchainUnavailable(_) => ErrorKind::ToolchainUnavailable,
            TutorError::Io(_)
            | TutorError::Config(_)
            | TutorError::Process(_)
            | TutorError::Workspace(_) => ErrorKind::InternalError,
        }
    }
}

impl From<nix::errno::Errno> for TutorError {
    fn from(err: nix::errno::Errno) -> Self {
        TutorError::Process(err.to_string())
    }
}

impl From<TutorError> for ExecutionResult {
    fn from(err: TutorError) -> Self {
        ExecutionResult::failed(err.kind(), err.to_string())
    }
}

/// Result type alias for tutorbox operations
pub type Result<T> = std::result::Result<T, TutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_parsing_accepts_aliases() {
        assert_eq!("python".parse::<Target>().unwrap(), Target::Traced);
        assert_eq!("C".parse::<Target>().unwrap(), Target::Compiled);
        assert_eq!(" javascript ".parse::<Target>().unwrap(), Target::Hosted);
        assert_eq!("hosted".parse::<Target>().unwrap(), Target::Hosted);
    }

    #[test]
    fn unknown_target_is_unsupported() {
        let err = "cobol".parse::<Target>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedTarget);
    }

    #[test]
    fn result_serializes_with_wire_field_names() {
        let result = ExecutionResult::failed(ErrorKind::Timeout, "too slow");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["finalOutput"], "");
        assert_eq!(json["error"]["kind"], "Timeout");
        assert_eq!(json["error"]["message"], "too slow");
        assert!(json["trace"].as_array().unwrap().is_empty());
    }

    #[test]
    fn value_refs_serialize_inline_or_as_pointer() {
        let inline = serde_json::to_value(ValueRef::Scalar(Scalar::Int(3))).unwrap();
        assert_eq!(inline, serde_json::json!(3));

        let pointer = serde_json::to_value(ValueRef::Ref {
            id: HeapId("id4".to_string()),
        })
        .unwrap();
        assert_eq!(pointer, serde_json::json!({"ref": "id4"}));

        let none = serde_json::to_value(ValueRef::Scalar(Scalar::None)).unwrap();
        assert!(none.is_null());
    }

    #[test]
    fn internal_errors_map_to_internal_kind() {
        let err = TutorError::Workspace("disk full".to_string());
        assert_eq!(err.kind(), ErrorKind::InternalError);
        let result: ExecutionResult = err.into();
        assert_eq!(result.error_kind(), Some(ErrorKind::InternalError));
    }
}
