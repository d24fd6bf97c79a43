//! Pipeline request/result wire shapes (§4.4).

use serde::{Deserialize, Serialize};

use super::value::HranaValue;

/// A single named argument, e.g. `{name: "id", value: {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedArg {
    pub name: String,
    pub value: HranaValue,
}

/// A statement to execute, either inline SQL or a reference into the
/// session's stored-SQL map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stmt {
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub sql_id: Option<i64>,
    #[serde(default)]
    pub args: Vec<HranaValue>,
    #[serde(default)]
    pub named_args: Vec<NamedArg>,
    #[serde(default = "default_want_rows")]
    pub want_rows: bool,
}

fn default_want_rows() -> bool {
    true
}

impl Default for Stmt {
    fn default() -> Self {
        Self {
            sql: None,
            sql_id: None,
            args: Vec::new(),
            named_args: Vec::new(),
            want_rows: true,
        }
    }
}

/// One batch step: an optional condition plus the statement it guards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStep {
    #[serde(default)]
    pub condition: Option<super::batch::Condition>,
    pub stmt: Stmt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub steps: Vec<BatchStep>,
}

/// One request in a pipeline's `requests[]` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRequest {
    Execute { stmt: Stmt },
    Batch { batch: Batch },
    Sequence { sql: String },
    Describe { stmt: Stmt },
    StoreSql { sql_id: i64, sql: String },
    CloseSql { sql_id: i64 },
    Close,
    GetAutocommit,
}

/// Result of one `execute` (or the describe-equivalent shape for
/// `describe`), §4.4 "Execute".
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StmtResult {
    pub cols: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Vec<HranaValue>>>,
    pub affected_row_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_rowid: Option<String>,
}

/// Result of a `describe` request (§4.4 "Describe").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeResult {
    pub is_explain: bool,
    pub is_readonly: bool,
    pub cols: Vec<String>,
    pub params: Vec<String>,
}

/// The tagged result wrapper that wraps a `StmtResult`/`DescribeResult`/etc
/// or an error, one per request in the pipeline's `results[]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamResult {
    Ok { response: StreamResponse },
    Error { error: crate::error::HranaError },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamResponse {
    Execute { result: StmtResult },
    Batch { result: BatchResult },
    Sequence,
    Describe { result: DescribeResult },
    StoreSql,
    CloseSql,
    Close,
    GetAutocommit { is_autocommit: bool },
}

/// Result of a `batch` request: a null entry at index `i` means step `i`
/// was skipped by its condition (§4.4 "Batch").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BatchResult {
    pub step_results: Vec<Option<StmtResult>>,
    pub step_errors: Vec<Option<crate::error::HranaError>>,
}

/// A full pipeline request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRequest {
    #[serde(default)]
    pub baton: Option<uuid::Uuid>,
    pub requests: Vec<StreamRequest>,
}

/// A full pipeline response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResponse {
    pub base_url: Option<String>,
    pub baton: Option<uuid::Uuid>,
    pub results: Vec<StreamResult>,
}
