use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tessera_api::{ConsistencyLevel, Frame, LoadBalancer, NodeId, Transport, Value};
use tessera_codec::{
    ErrorCode, ExecuteRequest, PrepareRequest, ProtocolError, QueryParameters, QueryRequest, Response,
    ResultBody,
};

use crate::agreement::{SchemaAgreement, SchemaAgreementWaiter};
use crate::cache::{CacheKey, StatementCache};
use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::policy::RoundRobin;
use crate::result::ResultSet;
use crate::statement::{BoundStatement, PreparedStatement, encode_untyped, is_schema_statement};

// ═══════════════════════════════════════════════════════════════
//  Abort: caller-side cancellation
// ═══════════════════════════════════════════════════════════════

/// Ways a caller can give up on an in-flight call: a cancellation token, a
/// deadline, or both. An aborted call fails with `Cancelled` and its
/// in-flight request is dropped.
#[derive(Debug, Clone, Default)]
pub struct Abort {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Abort {
    pub fn token(token: CancellationToken) -> Self {
        Self {
            token: Some(token),
            deadline: None,
        }
    }

    pub fn deadline(deadline: Instant) -> Self {
        Self {
            token: None,
            deadline: Some(deadline),
        }
    }

    pub fn after(timeout: Duration) -> Self {
        Self::deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Drive `fut` unless the token fires or the deadline passes first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, DriverError>
    where
        F: Future<Output = Result<T, DriverError>>,
    {
        let cancelled = async {
            match &self.token {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(DriverError::Cancelled),
            _ = expired => Err(DriverError::Cancelled),
            result = fut => result,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Statistics
// ═══════════════════════════════════════════════════════════════

/// Counters since the session was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// PREPARE requests sent (first prepares and re-prepares).
    pub prepares_sent: u64,
    pub cache_hits: u64,
    /// Statements prepared again after the server reported them unknown.
    pub reprepares: u64,
    pub executes: u64,
    pub queries: u64,
    pub schema_waits: u64,
    pub schema_timeouts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    prepares_sent: AtomicU64,
    cache_hits: AtomicU64,
    reprepares: AtomicU64,
    executes: AtomicU64,
    queries: AtomicU64,
    schema_waits: AtomicU64,
    schema_timeouts: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// ═══════════════════════════════════════════════════════════════
//  Session
// ═══════════════════════════════════════════════════════════════

/// Entry point: prepares, binds and executes statements against a cluster
/// reached through `Transport`.
///
/// Safe to share between any number of tasks. Each session owns its own
/// statement cache.
pub struct Session {
    transport: Arc<dyn Transport>,
    balancer: Arc<dyn LoadBalancer>,
    config: DriverConfig,
    cache: StatementCache,
    agreement: SchemaAgreementWaiter,
    counters: Counters,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, config: DriverConfig) -> Self {
        Self::with_load_balancer(transport, Arc::new(RoundRobin::default()), config)
    }

    pub fn with_load_balancer(
        transport: Arc<dyn Transport>,
        balancer: Arc<dyn LoadBalancer>,
        config: DriverConfig,
    ) -> Self {
        let agreement = SchemaAgreementWaiter::from_config(transport.clone(), &config.schema_agreement);
        Self {
            transport,
            balancer,
            cache: StatementCache::new(config.statement_cache.max_entries),
            config,
            agreement,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn cache(&self) -> &StatementCache {
        &self.cache
    }

    pub fn stats(&self) -> SessionStats {
        let c = &self.counters;
        SessionStats {
            prepares_sent: c.prepares_sent.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            reprepares: c.reprepares.load(Ordering::Relaxed),
            executes: c.executes.load(Ordering::Relaxed),
            queries: c.queries.load(Ordering::Relaxed),
            schema_waits: c.schema_waits.load(Ordering::Relaxed),
            schema_timeouts: c.schema_timeouts.load(Ordering::Relaxed),
        }
    }

    // ── prepare ──────────────────────────────────────────────────

    /// Prepare `query` in the configured keyspace, reusing a cached
    /// statement when there is one.
    pub async fn prepare(&self, query: &str) -> Result<Arc<PreparedStatement>, DriverError> {
        self.prepare_in(query, self.config.keyspace.as_deref()).await
    }

    pub async fn prepare_in(
        &self,
        query: &str,
        keyspace: Option<&str>,
    ) -> Result<Arc<PreparedStatement>, DriverError> {
        let key = CacheKey::new(query, keyspace);
        let lookup = self
            .cache
            .get_or_prepare(&key, || self.send_prepare(query, keyspace))
            .await?;
        if lookup.hit {
            bump(&self.counters.cache_hits);
            tracing::debug!(query, "statement cache hit");
        }
        Ok(lookup.statement)
    }

    pub async fn prepare_abortable(
        &self,
        query: &str,
        abort: &Abort,
    ) -> Result<Arc<PreparedStatement>, DriverError> {
        abort.run(self.prepare(query)).await
    }

    async fn send_prepare(&self, query: &str, keyspace: Option<&str>) -> Result<PreparedStatement, DriverError> {
        let request = PrepareRequest {
            query: query.to_string(),
            keyspace: keyspace.map(str::to_string),
        };
        bump(&self.counters.prepares_sent);
        let (node, response) = self.round_trip(request.to_frame()?).await?;
        match response {
            Response::Result(ResultBody::Prepared(body)) => {
                tracing::info!(
                    %node,
                    query,
                    parameters = body.parameters.len(),
                    "statement prepared"
                );
                Ok(PreparedStatement::new(query, keyspace.map(str::to_string), body))
            }
            Response::Result(_) => Err(unexpected("PREPARE answered with a non-prepared result")),
            Response::Error(err) => {
                tracing::debug!(%node, query, error = %err, "prepare rejected");
                Err(DriverError::from_server(err))
            }
        }
    }

    // ── bind ─────────────────────────────────────────────────────

    /// Bind at the configured consistency.
    pub fn bind(&self, statement: &Arc<PreparedStatement>, values: &[Value]) -> Result<BoundStatement, DriverError> {
        self.bind_with_consistency(statement, values, self.config.consistency)
    }

    pub fn bind_with_consistency(
        &self,
        statement: &Arc<PreparedStatement>,
        values: &[Value],
        consistency: ConsistencyLevel,
    ) -> Result<BoundStatement, DriverError> {
        Ok(crate::statement::bind(statement, values, consistency)?
            .with_serial_consistency(self.config.serial_consistency))
    }

    // ── execute ──────────────────────────────────────────────────

    /// Execute a bound statement.
    ///
    /// A statement the server no longer knows is prepared again once and
    /// retried. Schema-mutating statements wait for schema agreement before
    /// returning; the outcome is on the result set.
    pub async fn execute(&self, bound: &BoundStatement) -> Result<ResultSet, DriverError> {
        bump(&self.counters.executes);

        let (statement, response) = match self.send_execute(bound).await? {
            Response::Error(err) if err.code == ErrorCode::Unprepared => {
                let fresh = self.reprepare(bound.statement()).await?;
                let retry = bound.rebased(fresh);
                match self.send_execute(&retry).await? {
                    Response::Error(err) if err.code == ErrorCode::Unprepared => {
                        return Err(DriverError::StaleStatementId {
                            query: retry.statement().query().to_string(),
                        });
                    }
                    response => (retry.statement().clone(), response),
                }
            }
            response => (bound.statement().clone(), response),
        };

        match response {
            Response::Result(body) => {
                self.note_metadata_change(&statement, &body);
                let set = ResultSet::from_body(body, statement.result_columns())?;
                Ok(self.settle(statement.query(), set).await)
            }
            Response::Error(err) => Err(DriverError::from_server(err)),
        }
    }

    pub async fn execute_abortable(&self, bound: &BoundStatement, abort: &Abort) -> Result<ResultSet, DriverError> {
        abort.run(self.execute(bound)).await
    }

    /// Prepare (or reuse), bind and execute in one call.
    pub async fn execute_prepared(&self, query: &str, values: &[Value]) -> Result<ResultSet, DriverError> {
        let statement = self.prepare(query).await?;
        let bound = self.bind(&statement, values)?;
        self.execute(&bound).await
    }

    async fn send_execute(&self, bound: &BoundStatement) -> Result<Response, DriverError> {
        let statement = bound.statement();
        let mut params = QueryParameters::new(bound.consistency());
        params.values = bound.values().to_vec();
        params.skip_metadata = statement.result_columns().is_some();
        params.paging_state = bound.paging_state().cloned();
        params.serial_consistency = bound.serial_consistency();

        let request = ExecuteRequest {
            id: statement.id().clone(),
            result_metadata_id: statement.result_metadata_id().clone(),
            params,
        };
        let (_, response) = self.round_trip(request.to_frame()?).await?;
        Ok(response)
    }

    async fn reprepare(&self, stale: &Arc<PreparedStatement>) -> Result<Arc<PreparedStatement>, DriverError> {
        tracing::warn!(query = stale.query(), "statement unknown to server, re-preparing");
        let key = CacheKey::new(stale.query(), stale.keyspace());
        let lookup = self
            .cache
            .refresh(&key, stale, || self.send_prepare(stale.query(), stale.keyspace()))
            .await?;
        if !lookup.hit {
            bump(&self.counters.reprepares);
        }
        if lookup.statement.parameters() != stale.parameters() {
            return Err(DriverError::QueryInvalid {
                code: ErrorCode::Invalid,
                message: format!("bind parameters of '{}' changed on re-prepare", stale.query()),
            });
        }
        Ok(lookup.statement)
    }

    /// Switch the cached statement to result metadata the server reported
    /// as changed.
    fn note_metadata_change(&self, statement: &Arc<PreparedStatement>, body: &ResultBody) {
        let ResultBody::Rows(rows) = body else {
            return;
        };
        let (Some(new_id), Some(columns)) = (&rows.metadata.new_metadata_id, &rows.metadata.columns) else {
            return;
        };
        tracing::info!(query = statement.query(), "result metadata changed");
        let updated = statement.with_result_metadata(new_id.clone(), columns.clone());
        self.cache
            .replace(CacheKey::new(statement.query(), statement.keyspace()), Arc::new(updated));
    }

    // ── direct queries ───────────────────────────────────────────

    /// Run unprepared query text.
    pub async fn execute_direct(&self, query: &str, consistency: ConsistencyLevel) -> Result<ResultSet, DriverError> {
        self.execute_direct_with_values(query, &[], consistency).await
    }

    /// Run unprepared query text with positional values. Values are encoded
    /// by their own tag since no parameter metadata is known.
    pub async fn execute_direct_with_values(
        &self,
        query: &str,
        values: &[Value],
        consistency: ConsistencyLevel,
    ) -> Result<ResultSet, DriverError> {
        bump(&self.counters.queries);

        let mut params = QueryParameters::new(consistency);
        params.values = encode_untyped(values)?;
        params.serial_consistency = self.config.serial_consistency;
        params.keyspace = self.config.keyspace.clone();
        let request = QueryRequest {
            query: query.to_string(),
            params,
        };

        let (node, response) = self.round_trip(request.to_frame()?).await?;
        match response {
            Response::Result(body) => {
                let set = ResultSet::from_body(body, None)?;
                Ok(self.settle(query, set).await)
            }
            Response::Error(err) => {
                tracing::debug!(%node, query, error = %err, "query rejected");
                Err(DriverError::from_server(err))
            }
        }
    }

    pub async fn execute_direct_abortable(
        &self,
        query: &str,
        consistency: ConsistencyLevel,
        abort: &Abort,
    ) -> Result<ResultSet, DriverError> {
        abort.run(self.execute_direct(query, consistency)).await
    }

    // ── schema agreement ─────────────────────────────────────────

    /// Wait until every reachable node reports the same schema version.
    pub async fn await_schema_agreement(&self) -> SchemaAgreement {
        bump(&self.counters.schema_waits);
        let outcome = self.agreement.wait().await;
        if !outcome.is_converged() {
            bump(&self.counters.schema_timeouts);
        }
        outcome
    }

    pub async fn await_schema_agreement_abortable(&self, abort: &Abort) -> Result<SchemaAgreement, DriverError> {
        abort.run(async { Ok(self.await_schema_agreement().await) }).await
    }

    /// Attach the agreement outcome when `query` changed the schema.
    async fn settle(&self, query: &str, mut set: ResultSet) -> ResultSet {
        let changed = set.schema_change().is_some() || is_schema_statement(query);
        if changed && self.config.schema_agreement.enabled {
            let outcome = self.await_schema_agreement().await;
            set.set_schema_agreement(outcome);
        }
        set
    }

    // ── transport ────────────────────────────────────────────────

    async fn round_trip(&self, frame: Frame) -> Result<(NodeId, Response), DriverError> {
        let nodes = self.transport.known_nodes();
        let node = self.balancer.pick(&nodes).ok_or(DriverError::NoNodeAvailable)?;
        let opcode = frame.opcode;

        let send = self.transport.send(node, frame);
        let reply = match self.config.request_timeout() {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| DriverError::Timeout { node, after: limit })??,
            None => send.await?,
        };
        tracing::trace!(%node, request = ?opcode, response = ?reply.opcode, "round trip");
        Ok((node, Response::decode(reply)?))
    }
}

fn unexpected(reason: &str) -> DriverError {
    DriverError::Protocol(ProtocolError::Invalid {
        what: "response",
        reason: reason.to_string(),
    })
}
