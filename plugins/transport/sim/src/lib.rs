//! In-process cluster that answers native-protocol frames.
//!
//! Every node shares one store; what differs per node is reachability and
//! the schema version it reports, which is enough to exercise prepare
//! caching, re-prepare and schema agreement without a real server.

mod cql;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use num_bigint::BigInt;
use uuid::Uuid;

use tessera_api::{
    BoxFuture, ColumnSpec, Decimal, Frame, LogicalType, NodeId, Opcode, SchemaVersion, Transport,
    TransportError, Value, column_position,
};
use tessera_codec::primitives::read_bytes;
use tessera_codec::{
    ErrorCode, ExecuteRequest, PrepareRequest, PreparedBody, ProtocolError, QueryRequest, ResultBody,
    RowsBody, RowsMetadata, SchemaChange, ServerError, value,
};

use crate::cql::{Filter, Literal, Statement, TableRef, Term};

type Reply = Result<ResultBody, ServerError>;

struct Table {
    columns: Vec<ColumnSpec>,
    key: usize,
    rows: BTreeMap<Bytes, Vec<Option<Bytes>>>,
}

#[derive(Clone)]
struct Prepared {
    statement: Statement,
    keyspace: Option<String>,
}

struct ClusterState {
    keyspaces: HashSet<String>,
    tables: HashMap<(String, String), Table>,
    prepared: HashMap<Bytes, Prepared>,
    schema_version: SchemaVersion,
    /// Nodes holding on to an older schema version.
    lagging: HashMap<NodeId, SchemaVersion>,
    unreachable: HashSet<NodeId>,
    forgetful: bool,
}

/// Simulated cluster of `n` nodes at `127.0.0.x:9042`.
pub struct SimCluster {
    nodes: Vec<NodeId>,
    state: Mutex<ClusterState>,
    latency_ms: AtomicU64,
    prepares: AtomicUsize,
    executes: AtomicUsize,
}

impl SimCluster {
    pub fn new(nodes: usize) -> Self {
        let nodes = (0..nodes)
            .map(|i| SocketAddr::from(([127, 0, 0, (i % 254) as u8 + 1], 9042 + (i / 254) as u16)))
            .collect();
        Self {
            nodes,
            state: Mutex::new(ClusterState {
                keyspaces: HashSet::new(),
                tables: HashMap::new(),
                prepared: HashMap::new(),
                schema_version: Uuid::new_v4(),
                lagging: HashMap::new(),
                unreachable: HashSet::new(),
                forgetful: false,
            }),
            latency_ms: AtomicU64::new(0),
            prepares: AtomicUsize::new(0),
            executes: AtomicUsize::new(0),
        }
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    // ── knobs ────────────────────────────────────────────────────

    /// Delay applied to every request and schema version query.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Drop every prepared statement, as a restarted node would.
    pub fn forget_prepared(&self) {
        self.state().prepared.clear();
    }

    /// Forget each statement as soon as it is executed, so every EXECUTE
    /// fails as unprepared.
    pub fn set_forgetful(&self, forgetful: bool) {
        self.state().forgetful = forgetful;
    }

    /// Keep `node` on its current schema version until `catch_up`.
    pub fn lag_schema(&self, node: NodeId) {
        let mut state = self.state();
        let current = state.schema_version;
        state.lagging.entry(node).or_insert(current);
    }

    pub fn catch_up(&self, node: NodeId) {
        self.state().lagging.remove(&node);
    }

    pub fn set_unreachable(&self, node: NodeId, unreachable: bool) {
        let mut state = self.state();
        if unreachable {
            state.unreachable.insert(node);
        } else {
            state.unreachable.remove(&node);
        }
    }

    /// Add a column to an existing table, changing its result metadata.
    pub fn add_column(&self, keyspace: &str, table: &str, name: &str, ty: LogicalType) -> bool {
        let mut state = self.state();
        let Some(t) = state.tables.get_mut(&(keyspace.to_string(), table.to_string())) else {
            return false;
        };
        t.columns.push(ColumnSpec::new(keyspace, table, name, ty));
        for row in t.rows.values_mut() {
            row.push(None);
        }
        state.bump_schema();
        true
    }

    /// PREPARE requests received.
    pub fn prepare_count(&self) -> usize {
        self.prepares.load(Ordering::Relaxed)
    }

    /// EXECUTE requests received.
    pub fn execute_count(&self) -> usize {
        self.executes.load(Ordering::Relaxed)
    }

    pub fn prepared_count(&self) -> usize {
        self.state().prepared.len()
    }

    pub fn current_schema_version(&self) -> SchemaVersion {
        self.state().schema_version
    }

    // ── request handling ─────────────────────────────────────────

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("sim cluster state lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    async fn delay(&self) {
        let ms = self.latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn handle(&self, frame: Frame) -> Result<Frame, ProtocolError> {
        let reply = match frame.opcode {
            Opcode::Prepare => PrepareRequest::decode(frame.body)
                .map_err(protocol_error)
                .and_then(|request| self.prepare(request)),
            Opcode::Execute => ExecuteRequest::decode(frame.body)
                .map_err(protocol_error)
                .and_then(|request| self.execute(request)),
            Opcode::Query => QueryRequest::decode(frame.body)
                .map_err(protocol_error)
                .and_then(|request| self.query(request)),
            other => Err(ServerError::new(
                ErrorCode::ProtocolError,
                format!("unsupported request {other:?}"),
            )),
        };
        match reply {
            Ok(body) => body.to_frame(),
            Err(err) => err.to_frame(),
        }
    }

    fn prepare(&self, request: PrepareRequest) -> Reply {
        self.prepares.fetch_add(1, Ordering::Relaxed);
        let statement = cql::parse(&request.query).map_err(syntax_error)?;

        let mut state = self.state();
        let shape = state.describe(&statement, request.keyspace.as_deref())?;
        let id = digest(&[request.keyspace.as_deref().unwrap_or(""), &request.query]);
        state.prepared.insert(
            id.clone(),
            Prepared {
                statement,
                keyspace: request.keyspace,
            },
        );
        tracing::debug!(query = %request.query, "sim prepared statement");

        let result = match shape.result {
            Some(columns) => RowsMetadata::with_columns(columns),
            None => RowsMetadata::default(),
        };
        Ok(ResultBody::Prepared(PreparedBody {
            id,
            result_metadata_id: shape.result_metadata_id,
            parameters: shape.parameters,
            pk_indices: shape.pk_indices,
            result,
        }))
    }

    fn execute(&self, request: ExecuteRequest) -> Reply {
        self.executes.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state();
        if state.forgetful {
            state.prepared.remove(&request.id);
        }
        let Some(prepared) = state.prepared.get(&request.id).cloned() else {
            return Err(ServerError::unprepared(request.id));
        };
        let reuse = MetadataReuse {
            known_id: request.result_metadata_id,
            skip: request.params.skip_metadata,
        };
        state.run(
            &prepared.statement,
            prepared.keyspace.as_deref(),
            &request.params.values,
            Some(reuse),
        )
    }

    fn query(&self, request: QueryRequest) -> Reply {
        let statement = cql::parse(&request.query).map_err(syntax_error)?;
        self.state().run(
            &statement,
            request.params.keyspace.as_deref(),
            &request.params.values,
            None,
        )
    }
}

impl Transport for SimCluster {
    fn send(&self, node: NodeId, frame: Frame) -> BoxFuture<'_, Result<Frame, TransportError>> {
        Box::pin(async move {
            self.delay().await;
            if !self.nodes.contains(&node) || self.state().unreachable.contains(&node) {
                return Err(TransportError::Unreachable(node));
            }
            self.handle(frame).map_err(|e| TransportError::Closed {
                node,
                reason: e.to_string(),
            })
        })
    }

    fn known_nodes(&self) -> Vec<NodeId> {
        self.nodes.clone()
    }

    fn schema_version(&self, node: NodeId) -> BoxFuture<'_, Result<SchemaVersion, TransportError>> {
        Box::pin(async move {
            self.delay().await;
            let state = self.state();
            if !self.nodes.contains(&node) || state.unreachable.contains(&node) {
                return Err(TransportError::Unreachable(node));
            }
            Ok(state.lagging.get(&node).copied().unwrap_or(state.schema_version))
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Statement evaluation
// ═══════════════════════════════════════════════════════════════

/// Bind parameters and result columns of a statement.
struct Shape {
    parameters: Vec<ColumnSpec>,
    pk_indices: Vec<u16>,
    result: Option<Vec<ColumnSpec>>,
    result_metadata_id: Bytes,
}

struct MetadataReuse {
    known_id: Bytes,
    skip: bool,
}

impl ClusterState {
    fn bump_schema(&mut self) {
        self.schema_version = Uuid::new_v4();
    }

    fn resolve(&self, table: &TableRef, keyspace: Option<&str>) -> Result<(String, String), ServerError> {
        let ks = table.keyspace.as_deref().or(keyspace).ok_or_else(|| {
            invalid("No keyspace has been specified. USE a keyspace, or explicitly specify keyspace.tablename")
        })?;
        Ok((ks.to_string(), table.name.clone()))
    }

    fn table(&self, table: &TableRef, keyspace: Option<&str>) -> Result<&Table, ServerError> {
        let key = self.resolve(table, keyspace)?;
        self.tables
            .get(&key)
            .ok_or_else(|| invalid(format!("unconfigured table {}", table.name)))
    }

    fn describe(&self, statement: &Statement, keyspace: Option<&str>) -> Result<Shape, ServerError> {
        let mut shape = Shape {
            parameters: Vec::new(),
            pk_indices: Vec::new(),
            result: None,
            result_metadata_id: Bytes::new(),
        };
        let bind = |shape: &mut Shape, table: &Table, column: usize| {
            if column == table.key {
                shape.pk_indices.push(shape.parameters.len() as u16);
            }
            shape.parameters.push(table.columns[column].clone());
        };

        match statement {
            Statement::Insert { table, columns, values } => {
                let t = self.table(table, keyspace)?;
                for (name, term) in columns.iter().zip(values) {
                    let column = t.column(name)?;
                    if *term == Term::Marker {
                        bind(&mut shape, t, column);
                    }
                }
            }
            Statement::Select { table, columns, filter } => {
                let t = self.table(table, keyspace)?;
                let (name, terms) = match filter {
                    Some(Filter::Eq(name, term)) => (Some(name), std::slice::from_ref(term)),
                    Some(Filter::In(name, terms)) => (Some(name), terms.as_slice()),
                    None => (None, &[][..]),
                };
                if let Some(name) = name {
                    let column = t.column(name)?;
                    for _ in terms.iter().filter(|term| **term == Term::Marker) {
                        bind(&mut shape, t, column);
                    }
                }
                let selected = t.selection(columns.as_deref())?;
                let result: Vec<ColumnSpec> = selected.iter().map(|&i| t.columns[i].clone()).collect();
                shape.result_metadata_id = metadata_id(&result);
                shape.result = Some(result);
            }
            _ => {}
        }
        Ok(shape)
    }

    fn run(
        &mut self,
        statement: &Statement,
        keyspace: Option<&str>,
        values: &[Bytes],
        reuse: Option<MetadataReuse>,
    ) -> Reply {
        if statement.markers() != values.len() {
            return Err(invalid(format!(
                "There were {} markers(?) in CQL but {} bound variables",
                statement.markers(),
                values.len()
            )));
        }
        let mut bound = Vec::with_capacity(values.len());
        for value in values {
            bound.push(read_bytes(&mut value.clone()).map_err(protocol_error)?);
        }
        let mut bound = bound.into_iter();

        match statement {
            Statement::CreateKeyspace { name, if_not_exists } => {
                if self.keyspaces.contains(name) {
                    if *if_not_exists {
                        return Ok(ResultBody::Void);
                    }
                    return Err(ServerError::already_exists(name.clone(), ""));
                }
                self.keyspaces.insert(name.clone());
                self.bump_schema();
                Ok(schema_change("CREATED", "KEYSPACE", name, None))
            }
            Statement::CreateTable {
                table,
                if_not_exists,
                columns,
                key,
            } => {
                let (ks, name) = self.resolve(table, keyspace)?;
                if !self.keyspaces.contains(&ks) {
                    return Err(invalid(format!("Keyspace '{ks}' does not exist")));
                }
                if self.tables.contains_key(&(ks.clone(), name.clone())) {
                    if *if_not_exists {
                        return Ok(ResultBody::Void);
                    }
                    return Err(ServerError::already_exists(ks, name));
                }
                let specs: Vec<ColumnSpec> = columns
                    .iter()
                    .map(|(column, ty)| ColumnSpec::new(ks.as_str(), name.as_str(), column.as_str(), ty.clone()))
                    .collect();
                let key = column_position(&specs, key)
                    .ok_or_else(|| invalid(format!("Unknown definition {key} referenced in PRIMARY KEY")))?;
                self.tables.insert(
                    (ks.clone(), name.clone()),
                    Table {
                        columns: specs,
                        key,
                        rows: BTreeMap::new(),
                    },
                );
                self.bump_schema();
                Ok(schema_change("CREATED", "TABLE", &ks, Some(name)))
            }
            Statement::DropTable { table, if_exists } => {
                let (ks, name) = self.resolve(table, keyspace)?;
                if self.tables.remove(&(ks.clone(), name.clone())).is_none() {
                    if *if_exists {
                        return Ok(ResultBody::Void);
                    }
                    return Err(invalid(format!("unconfigured table {name}")));
                }
                self.prepared.retain(|_, p| !touches(&p.statement, p.keyspace.as_deref(), &ks, &name));
                self.bump_schema();
                Ok(schema_change("DROPPED", "TABLE", &ks, Some(name)))
            }
            Statement::Use(name) => {
                if !self.keyspaces.contains(name) {
                    return Err(invalid(format!("Keyspace '{name}' does not exist")));
                }
                Ok(ResultBody::SetKeyspace(name.clone()))
            }
            Statement::Insert { table, columns, values } => {
                let (ks, name) = self.resolve(table, keyspace)?;
                let t = self
                    .tables
                    .get_mut(&(ks, name.clone()))
                    .ok_or_else(|| invalid(format!("unconfigured table {name}")))?;

                let mut cells = Vec::with_capacity(columns.len());
                for (column, term) in columns.iter().zip(values) {
                    let i = t.column(column)?;
                    let cell = match term {
                        Term::Marker => bound.next().flatten(),
                        Term::Literal(literal) => literal_payload(literal, &t.columns[i].ty)?,
                    };
                    if let Some(payload) = &cell {
                        value::deserialize(&t.columns[i].ty, payload.clone()).map_err(|e| {
                            invalid(format!("Invalid value for column {}: {e}", t.columns[i].name))
                        })?;
                    }
                    cells.push((i, cell));
                }

                let key = cells
                    .iter()
                    .find(|(i, _)| *i == t.key)
                    .and_then(|(_, cell)| cell.clone())
                    .ok_or_else(|| {
                        invalid(format!("Invalid null value for partition key {}", t.columns[t.key].name))
                    })?;
                let width = t.columns.len();
                let row = t.rows.entry(key).or_insert_with(|| vec![None; width]);
                for (i, cell) in cells {
                    row[i] = cell;
                }
                Ok(ResultBody::Void)
            }
            Statement::Select { table, columns, filter } => {
                let t = self.table(table, keyspace)?;
                let selected = t.selection(columns.as_deref())?;
                let specs: Vec<ColumnSpec> = selected.iter().map(|&i| t.columns[i].clone()).collect();

                let keys: Option<Vec<Option<Bytes>>> = match filter {
                    None => None,
                    Some(Filter::Eq(column, term)) => Some(vec![t.key_term(column, term, &mut bound)?]),
                    Some(Filter::In(column, terms)) => Some(
                        terms
                            .iter()
                            .map(|term| t.key_term(column, term, &mut bound))
                            .collect::<Result<Vec<_>, _>>()?,
                    ),
                };
                let project = |row: &Vec<Option<Bytes>>| -> Vec<Option<Bytes>> {
                    selected.iter().map(|&i| row[i].clone()).collect()
                };
                let rows: Vec<Vec<Option<Bytes>>> = match keys {
                    None => t.rows.values().map(&project).collect(),
                    Some(keys) => {
                        let mut seen = HashSet::new();
                        keys.into_iter()
                            .flatten()
                            .filter(|key| seen.insert(key.clone()))
                            .filter_map(|key| t.rows.get(&key).map(&project))
                            .collect()
                    }
                };

                let current_id = metadata_id(&specs);
                let metadata = match reuse {
                    Some(reuse) if reuse.known_id != current_id => RowsMetadata {
                        new_metadata_id: Some(current_id),
                        ..RowsMetadata::with_columns(specs)
                    },
                    Some(reuse) if reuse.skip => RowsMetadata {
                        column_count: specs.len(),
                        ..RowsMetadata::default()
                    },
                    _ => RowsMetadata::with_columns(specs),
                };
                RowsBody::from_cells(metadata, &rows)
                    .map(ResultBody::Rows)
                    .map_err(protocol_error)
            }
        }
    }
}

impl Table {
    fn column(&self, name: &str) -> Result<usize, ServerError> {
        column_position(&self.columns, name).ok_or_else(|| invalid(format!("Undefined column name {name}")))
    }

    fn selection(&self, columns: Option<&[String]>) -> Result<Vec<usize>, ServerError> {
        match columns {
            None => Ok((0..self.columns.len()).collect()),
            Some(names) => names.iter().map(|name| self.column(name)).collect(),
        }
    }

    /// Key payload of a WHERE term; only the partition key can be filtered.
    fn key_term(
        &self,
        column: &str,
        term: &Term,
        bound: &mut impl Iterator<Item = Option<Bytes>>,
    ) -> Result<Option<Bytes>, ServerError> {
        if self.column(column)? != self.key {
            return Err(invalid(format!(
                "Cannot execute this query as it might involve data filtering: {column} is not the partition key"
            )));
        }
        match term {
            Term::Marker => Ok(bound.next().flatten()),
            Term::Literal(literal) => literal_payload(literal, &self.columns[self.key].ty),
        }
    }
}

/// Whether a prepared statement reads or writes `ks.table`.
fn touches(statement: &Statement, keyspace: Option<&str>, ks: &str, table: &str) -> bool {
    let target = match statement {
        Statement::Insert { table, .. } | Statement::Select { table, .. } => table,
        _ => return false,
    };
    target.name == table && target.keyspace.as_deref().or(keyspace) == Some(ks)
}

/// Payload of a literal written into a column of type `ty`.
fn literal_payload(literal: &Literal, ty: &LogicalType) -> Result<Option<Bytes>, ServerError> {
    let mismatch = || invalid(format!("Invalid literal {literal:?} for type {ty}"));
    let value = match (literal, ty) {
        (Literal::Null, _) => Value::Null,
        (Literal::Bool(b), LogicalType::Boolean) => Value::Boolean(*b),
        (Literal::Number(n), LogicalType::Int) => Value::Int(n.parse().map_err(|_| mismatch())?),
        (Literal::Number(n), LogicalType::BigInt) => Value::BigInt(n.parse().map_err(|_| mismatch())?),
        (Literal::Number(n), LogicalType::Timestamp) => Value::Timestamp(n.parse().map_err(|_| mismatch())?),
        (Literal::Number(n), LogicalType::VarInt) => Value::VarInt(BigInt::from_str(n).map_err(|_| mismatch())?),
        (Literal::Number(n), LogicalType::Float) => Value::Float(n.parse().map_err(|_| mismatch())?),
        (Literal::Number(n), LogicalType::Double) => Value::Double(n.parse().map_err(|_| mismatch())?),
        (Literal::Number(n), LogicalType::Decimal) => Value::Decimal(Decimal::from_str(n).map_err(|_| mismatch())?),
        (Literal::Str(s), LogicalType::Text) => Value::Text(s.clone()),
        (Literal::Str(s), LogicalType::Inet) => Value::Inet(IpAddr::from_str(s).map_err(|_| mismatch())?),
        (Literal::Str(s), LogicalType::Uuid) => Value::Uuid(Uuid::parse_str(s).map_err(|_| mismatch())?),
        (Literal::Hex(h), LogicalType::Blob) => Value::Blob(Bytes::from(hex(h).ok_or_else(mismatch)?)),
        _ => return Err(mismatch()),
    };
    let framed = value::encode(&value, ty).map_err(|e| invalid(e.to_string()))?;
    read_bytes(&mut framed.clone()).map_err(protocol_error)
}

fn hex(digits: &str) -> Option<Vec<u8>> {
    if digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).ok())
        .collect()
}

fn schema_change(change: &str, target: &str, keyspace: &str, name: Option<String>) -> ResultBody {
    ResultBody::SchemaChange(SchemaChange {
        change_type: change.to_string(),
        target: target.to_string(),
        keyspace: keyspace.to_string(),
        name,
        arguments: Vec::new(),
    })
}

/// Stable 16-byte digest, used for statement and metadata ids.
fn digest(parts: &[&str]) -> Bytes {
    let mut out = Vec::with_capacity(16);
    for seed in [0x5eed_u64, 0xc0ffee] {
        let mut hasher = DefaultHasher::new();
        seed.hash(&mut hasher);
        parts.hash(&mut hasher);
        out.extend_from_slice(&hasher.finish().to_be_bytes());
    }
    Bytes::from(out)
}

fn metadata_id(columns: &[ColumnSpec]) -> Bytes {
    let described: Vec<String> = columns
        .iter()
        .map(|c| format!("{}.{}.{}:{}", c.keyspace, c.table, c.name, c.ty))
        .collect();
    let parts: Vec<&str> = described.iter().map(String::as_str).collect();
    digest(&parts)
}

fn invalid(message: impl Into<String>) -> ServerError {
    ServerError::new(ErrorCode::Invalid, message)
}

fn syntax_error(message: String) -> ServerError {
    ServerError::new(ErrorCode::SyntaxError, message)
}

fn protocol_error(e: ProtocolError) -> ServerError {
    ServerError::new(ErrorCode::ProtocolError, e.to_string())
}
