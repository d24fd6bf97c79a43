//! HRANA pipeline dispatch (§4.4). `HranaServer::pipeline` is the single
//! entry point both the HTTP pipeline endpoint and the WebSocket bridge
//! drive.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::HranaError;

use super::adapter::{AdapterResolver, DatabaseAdapter};
use super::batch::{evaluate, StepOutcome};
use super::error::map_error;
use super::request::{
    BatchResult, DescribeResult, PipelineRequest, PipelineResponse, Stmt, StmtResult, StreamRequest, StreamResponse,
    StreamResult,
};
use super::session::SessionManager;
use super::value::{HranaValue, Scalar};

pub struct HranaServer {
    sessions: Arc<SessionManager>,
    resolver: Arc<dyn AdapterResolver>,
    base_url: Option<String>,
}

impl HranaServer {
    pub fn new(sessions: Arc<SessionManager>, resolver: Arc<dyn AdapterResolver>, base_url: Option<String>) -> Self {
        Self {
            sessions,
            resolver,
            base_url,
        }
    }

    /// The session manager backing this server, for metrics/health reporting.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Run one pipeline: `{baton, requests[]}` -> `{base_url, baton, results[]}`.
    /// `adapter_type`/`namespace` come from the `x-database-adapter` /
    /// `x-database-namespace` headers (§4.4 "Adapter selection").
    pub async fn pipeline(
        &self,
        adapter_type: &str,
        namespace: Option<&str>,
        request: PipelineRequest,
    ) -> PipelineResponse {
        let adapter = match self.resolve_adapter(adapter_type, namespace).await {
            Ok(adapter) => adapter,
            Err(e) => {
                return PipelineResponse {
                    base_url: self.base_url.clone(),
                    baton: None,
                    results: vec![StreamResult::Error { error: map_error(&e) }],
                }
            }
        };

        let mut baton = request.baton;
        if let Some(b) = baton {
            if !self.sessions.touch_and_check(b) {
                return PipelineResponse {
                    base_url: self.base_url.clone(),
                    baton: None,
                    results: vec![StreamResult::Error {
                        error: HranaError::invalid_baton(),
                    }],
                };
            }
        } else if requests_open_a_transaction(&request.requests) {
            baton = Some(self.sessions.create(Some(adapter_type.to_string()), namespace.map(str::to_string)));
        }

        let mut results = Vec::with_capacity(request.requests.len());
        for req in request.requests {
            let (result, close_session) = self.handle_request(adapter.as_ref(), baton, req).await;
            results.push(result);
            if close_session {
                if let Some(b) = baton.take() {
                    self.sessions.close(b);
                }
            }
        }

        PipelineResponse {
            base_url: self.base_url.clone(),
            baton,
            results,
        }
    }

    async fn resolve_adapter(
        &self,
        adapter_type: &str,
        namespace: Option<&str>,
    ) -> Result<Arc<dyn DatabaseAdapter>, super::error::AdapterError> {
        match namespace {
            Some(ns) => self.resolver.get_adapter(adapter_type, ns).await,
            None => self.resolver.get_root_adapter(adapter_type).await,
        }
    }

    /// Dispatch one request. Returns the wire result plus whether the
    /// pipeline's session should be closed after this step.
    async fn handle_request(
        &self,
        adapter: &dyn DatabaseAdapter,
        baton: Option<Uuid>,
        request: StreamRequest,
    ) -> (StreamResult, bool) {
        match request {
            StreamRequest::Execute { stmt } => {
                let result = match self.execute_stmt(adapter, baton, &stmt).await {
                    Ok(result) => StreamResult::Ok {
                        response: StreamResponse::Execute { result },
                    },
                    Err(error) => StreamResult::Error { error },
                };
                (result, false)
            }
            StreamRequest::Batch { batch } => {
                let mut step_results = Vec::with_capacity(batch.steps.len());
                let mut step_errors = Vec::with_capacity(batch.steps.len());
                let mut outcomes = Vec::with_capacity(batch.steps.len());

                for (i, step) in batch.steps.into_iter().enumerate() {
                    let passes = match &step.condition {
                        Some(condition) => evaluate(condition, &outcomes, i),
                        None => true,
                    };
                    if !passes {
                        step_results.push(None);
                        step_errors.push(None);
                        outcomes.push(StepOutcome::Skipped);
                        continue;
                    }
                    match self.execute_stmt(adapter, baton, &step.stmt).await {
                        Ok(result) => {
                            step_results.push(Some(result));
                            step_errors.push(None);
                            outcomes.push(StepOutcome::Ok);
                        }
                        Err(e) => {
                            step_results.push(None);
                            step_errors.push(Some(e));
                            outcomes.push(StepOutcome::Error);
                        }
                    }
                }

                (
                    StreamResult::Ok {
                        response: StreamResponse::Batch {
                            result: BatchResult { step_results, step_errors },
                        },
                    },
                    false,
                )
            }
            StreamRequest::Sequence { sql } => {
                for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                    if let Err(e) = adapter.execute(statement, &[]).await {
                        return (StreamResult::Error { error: map_error(&e) }, false);
                    }
                }
                (StreamResult::Ok { response: StreamResponse::Sequence }, false)
            }
            StreamRequest::Describe { stmt } => {
                let sql = stmt.sql.unwrap_or_default();
                let trimmed = sql.trim_start();
                let upper: String = trimmed.chars().take(16).collect::<String>().to_uppercase();
                let is_explain = upper.starts_with("EXPLAIN");
                let is_readonly = is_explain || upper.starts_with("SELECT");
                (
                    StreamResult::Ok {
                        response: StreamResponse::Describe {
                            result: DescribeResult {
                                is_explain,
                                is_readonly,
                                cols: Vec::new(),
                                params: Vec::new(),
                            },
                        },
                    },
                    false,
                )
            }
            StreamRequest::StoreSql { sql_id, sql } => {
                let Some(b) = baton else {
                    return (StreamResult::Error { error: HranaError::no_session() }, false);
                };
                let stored = self.sessions.with_session(b, |session| {
                    session.stored_sql.write().expect("session lock poisoned").insert(sql_id, sql);
                });
                match stored {
                    Some(()) => (StreamResult::Ok { response: StreamResponse::StoreSql }, false),
                    None => (StreamResult::Error { error: HranaError::no_session() }, false),
                }
            }
            StreamRequest::CloseSql { sql_id } => {
                if let Some(b) = baton {
                    self.sessions.with_session(b, |session| {
                        session.stored_sql.write().expect("session lock poisoned").remove(&sql_id);
                    });
                }
                (StreamResult::Ok { response: StreamResponse::CloseSql }, false)
            }
            StreamRequest::Close => (StreamResult::Ok { response: StreamResponse::Close }, true),
            StreamRequest::GetAutocommit => (
                StreamResult::Ok {
                    response: StreamResponse::GetAutocommit { is_autocommit: true },
                },
                false,
            ),
        }
    }

    async fn execute_stmt(&self, adapter: &dyn DatabaseAdapter, baton: Option<Uuid>, stmt: &Stmt) -> Result<StmtResult, HranaError> {
        let sql = self.resolve_sql(baton, stmt)?;
        let args = positional_args(stmt);

        let result = adapter.execute(&sql, &args).await.map_err(|e| map_error(&e))?;

        let cols = result
            .rows
            .first()
            .map(|row| row.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default();

        let rows = if stmt.want_rows {
            Some(
                result
                    .rows
                    .iter()
                    .map(|row| row.iter().map(|(_, value)| HranaValue::encode(value)).collect())
                    .collect(),
            )
        } else {
            None
        };

        Ok(StmtResult {
            cols,
            rows,
            affected_row_count: result.rows_affected,
            last_insert_rowid: result.last_insert_rowid.map(|id| id.to_string()),
        })
    }

    fn resolve_sql(&self, baton: Option<Uuid>, stmt: &Stmt) -> Result<String, HranaError> {
        if let Some(sql) = &stmt.sql {
            return Ok(sql.clone());
        }
        let Some(sql_id) = stmt.sql_id else {
            return Err(HranaError::new("BAD_REQUEST", "statement has neither sql nor sql_id"));
        };
        let Some(b) = baton else {
            return Err(HranaError::unknown_sql_id(sql_id as i32));
        };
        self.sessions
            .with_session(b, |session| {
                session
                    .stored_sql
                    .read()
                    .expect("session lock poisoned")
                    .get(&sql_id)
                    .cloned()
            })
            .flatten()
            .ok_or_else(|| HranaError::unknown_sql_id(sql_id as i32))
    }
}

fn positional_args(stmt: &Stmt) -> Vec<Scalar> {
    if !stmt.args.is_empty() {
        return stmt.args.iter().map(HranaValue::decode).collect();
    }
    stmt.named_args.iter().map(|arg| arg.value.decode()).collect()
}

/// §4.4 "Baton semantics": a null input baton allocates a session only if
/// some request's SQL text begins with `BEGIN` or mentions `TRANSACTION`
/// (case-insensitive).
fn requests_open_a_transaction(requests: &[StreamRequest]) -> bool {
    requests.iter().any(|req| match req {
        StreamRequest::Execute { stmt } | StreamRequest::Describe { stmt } => sql_opens_transaction(stmt.sql.as_deref()),
        StreamRequest::Sequence { sql } => sql_opens_transaction(Some(sql)),
        StreamRequest::Batch { batch } => batch.steps.iter().any(|step| sql_opens_transaction(step.stmt.sql.as_deref())),
        StreamRequest::StoreSql { sql, .. } => sql_opens_transaction(Some(sql)),
        _ => false,
    })
}

fn sql_opens_transaction(sql: Option<&str>) -> bool {
    let Some(sql) = sql else { return false };
    let upper = sql.to_uppercase();
    upper.trim_start().starts_with("BEGIN") || upper.contains("TRANSACTION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct EchoAdapter;

    #[async_trait]
    impl super::super::adapter::DatabaseAdapter for EchoAdapter {
        async fn execute(&self, sql: &str, _args: &[Scalar]) -> Result<super::super::adapter::AdapterResult, super::super::error::AdapterError> {
            if sql.eq_ignore_ascii_case("FAIL") {
                return Err(super::super::error::AdapterError::new("synthetic failure"));
            }
            Ok(super::super::adapter::AdapterResult {
                rows: vec![vec![("one".to_string(), Scalar::SafeInteger(1.0))]],
                rows_affected: 0,
                last_insert_rowid: None,
            })
        }
    }

    struct SingleAdapterResolver;

    #[async_trait]
    impl AdapterResolver for SingleAdapterResolver {
        async fn get_adapter(&self, _adapter_type: &str, _namespace: &str) -> Result<Arc<dyn DatabaseAdapter>, super::super::error::AdapterError> {
            Ok(Arc::new(EchoAdapter))
        }
        async fn get_root_adapter(&self, _adapter_type: &str) -> Result<Arc<dyn DatabaseAdapter>, super::super::error::AdapterError> {
            Ok(Arc::new(EchoAdapter))
        }
    }

    fn server() -> HranaServer {
        HranaServer::new(
            Arc::new(SessionManager::new(Duration::from_secs(30))),
            Arc::new(SingleAdapterResolver),
            Some("http://localhost".to_string()),
        )
    }

    #[tokio::test]
    async fn null_baton_without_transaction_stays_null() {
        let server = server();
        let response = server
            .pipeline(
                "default",
                None,
                PipelineRequest {
                    baton: None,
                    requests: vec![StreamRequest::Execute {
                        stmt: Stmt {
                            sql: Some("SELECT 1".to_string()),
                            ..Default::default()
                        },
                    }],
                },
            )
            .await;
        assert!(response.baton.is_none());
    }

    #[tokio::test]
    async fn begin_allocates_a_session() {
        let server = server();
        let response = server
            .pipeline(
                "default",
                None,
                PipelineRequest {
                    baton: None,
                    requests: vec![StreamRequest::Execute {
                        stmt: Stmt {
                            sql: Some("BEGIN".to_string()),
                            ..Default::default()
                        },
                    }],
                },
            )
            .await;
        assert!(response.baton.is_some());
    }

    #[tokio::test]
    async fn unknown_baton_yields_invalid_baton_error() {
        let server = server();
        let response = server
            .pipeline(
                "default",
                None,
                PipelineRequest {
                    baton: Some(Uuid::new_v4()),
                    requests: vec![],
                },
            )
            .await;
        assert!(response.baton.is_none());
        assert_eq!(response.results.len(), 1);
        match &response.results[0] {
            StreamResult::Error { error } => assert_eq!(error.code, "INVALID_BATON"),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn store_sql_without_session_fails_with_no_session() {
        let server = server();
        let response = server
            .pipeline(
                "default",
                None,
                PipelineRequest {
                    baton: None,
                    requests: vec![StreamRequest::StoreSql {
                        sql_id: 1,
                        sql: "SELECT 1".to_string(),
                    }],
                },
            )
            .await;
        match &response.results[0] {
            StreamResult::Error { error } => assert_eq!(error.code, "NO_SESSION"),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn batch_or_condition_runs_step_after_a_failure() {
        let server = server();
        let response = server
            .pipeline(
                "default",
                None,
                PipelineRequest {
                    baton: None,
                    requests: vec![StreamRequest::Batch {
                        batch: super::super::request::Batch {
                            steps: vec![
                                super::super::request::BatchStep {
                                    condition: None,
                                    stmt: Stmt { sql: Some("FAIL".to_string()), ..Default::default() },
                                },
                                super::super::request::BatchStep {
                                    condition: None,
                                    stmt: Stmt { sql: Some("OK".to_string()), ..Default::default() },
                                },
                                super::super::request::BatchStep {
                                    condition: Some(super::super::batch::Condition::Or {
                                        or: vec![
                                            super::super::batch::Condition::Ok { ok: 0 },
                                            super::super::batch::Condition::Ok { ok: 1 },
                                        ],
                                    }),
                                    stmt: Stmt { sql: Some("OK".to_string()), ..Default::default() },
                                },
                            ],
                        },
                    }],
                },
            )
            .await;
        match &response.results[0] {
            StreamResult::Ok {
                response: StreamResponse::Batch { result },
            } => {
                assert!(result.step_results[0].is_none());
                assert!(result.step_results[1].is_some());
                assert!(result.step_results[2].is_some());
            }
            other => panic!("expected Batch result, got {other:?}"),
        }
    }
}
