use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::audit::{Actor, AuditEntry};
use crate::auth::TallyAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::schedule::now_ms;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct TallyHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<TallyQueryParser>,
}

impl TallyHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(TallyQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// The connection's login user is the audit actor for everything it does.
    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> Actor {
        match client.metadata().get("user") {
            Some(user) if !user.is_empty() => Actor::vendor(user.clone()),
            _ => Actor::system(),
        }
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
        actor: &Actor,
    ) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.dispatch(engine, cmd, actor).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn dispatch(
        &self,
        engine: &Engine,
        cmd: Command,
        actor: &Actor,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertSlot { spec } => {
                engine.create_slot(spec, actor).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertBulkSlots { specs } => {
                let outcome = engine
                    .create_bulk_slots(specs, actor)
                    .await
                    .map_err(engine_err)?;
                let created = outcome.created;

                let schema = Arc::new(bulk_failure_schema());
                let rows: Vec<PgWireResult<_>> = outcome
                    .failures
                    .into_iter()
                    .map(|failure| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&failure.date.to_string())?;
                        encoder.encode_field(&failure.time.to_string())?;
                        encoder.encode_field(&failure.error)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![
                    Response::Query(QueryResponse::new(schema, stream::iter(rows))),
                    Response::Execution(Tag::new("INSERT").with_rows(created)),
                ])
            }
            Command::UpdateSlot { id, patch } => {
                engine
                    .update_slot(id, patch, actor)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteSlot { id } => {
                engine.delete_slot(id, actor).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::BlockSlot { id, reason } => {
                let info = engine
                    .block_slot(id, reason, actor)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![slot_rows(vec![info])?])
            }
            Command::UnblockSlot { id } => {
                let info = engine.unblock_slot(id, actor).await.map_err(engine_err)?;
                Ok(vec![slot_rows(vec![info])?])
            }
            Command::Decrement { id, quantity } => {
                let result = engine.decrement_availability(id, quantity, actor).await;
                Ok(vec![counter_row(result)?])
            }
            Command::DecrementWithLock { id, quantity } => {
                let result = engine
                    .decrement_availability_with_lock(id, quantity, actor)
                    .await;
                Ok(vec![counter_row(result)?])
            }
            Command::Increment { id, quantity } => {
                let result = engine.increment_availability(id, quantity, actor).await;
                Ok(vec![counter_row(result)?])
            }
            Command::SelectAvailability {
                experience_id,
                range,
                cutoff_hours,
            } => {
                let slots = engine
                    .available_slots(experience_id, range, cutoff_hours, now_ms())
                    .await
                    .map_err(engine_err)?;
                Ok(vec![slot_rows(slots)?])
            }
            Command::SelectSlotById { id } => {
                let info = engine.get_slot(id).await.map_err(engine_err)?;
                Ok(vec![slot_rows(vec![info])?])
            }
            Command::SelectSlots { experience_id } => {
                let slots = engine.all_slots(experience_id).await;
                Ok(vec![slot_rows(slots)?])
            }
            Command::SelectAuditByEntity { entity_id } => {
                Ok(vec![audit_rows(engine.audit.by_entity(entity_id))?])
            }
            Command::SelectAuditByActor { actor_id } => {
                Ok(vec![audit_rows(engine.audit.by_actor(&actor_id))?])
            }
            Command::SelectAuditByRange {
                start,
                end,
                entity_type,
            } => Ok(vec![audit_rows(engine.audit.by_range(
                start,
                end,
                entity_type.as_deref(),
            ))?]),
            Command::Listen { channel } => {
                let experience_id_str = channel.strip_prefix("experience_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected experience_{{id}})"),
                    )))
                })?;
                let _experience_id = Ulid::from_string(experience_id_str).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("bad ULID in channel: {e}"),
                    )))
                })?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn slot_schema() -> Vec<FieldInfo> {
    let text = |name: &str| FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text);
    let int8 = |name: &str| FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text);
    vec![
        text("id"),
        text("experience_id"),
        text("date"),
        text("time"),
        int8("total_capacity"),
        int8("available"),
        FieldInfo::new("blocked".into(), None, None, Type::BOOL, FieldFormat::Text),
        int8("price_override"),
        int8("created_at"),
        int8("updated_at"),
    ]
}

/// The counter functions answer with a row, not an error: sold-out and
/// blocked are ordinary outcomes a booking flow branches on.
fn counter_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("success".into(), None, None, Type::BOOL, FieldFormat::Text),
        FieldInfo::new(
            "available_count".into(),
            None,
            None,
            Type::INT8,
            FieldFormat::Text,
        ),
        FieldInfo::new("error".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn bulk_failure_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("date".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("time".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("error".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn audit_schema() -> Vec<FieldInfo> {
    let text = |name: &str| FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text);
    vec![
        text("id"),
        text("event_type"),
        text("entity_type"),
        text("entity_id"),
        text("actor_id"),
        text("actor_type"),
        text("metadata"),
        FieldInfo::new(
            "created_at".into(),
            None,
            None,
            Type::INT8,
            FieldFormat::Text,
        ),
    ]
}

fn slot_rows(slots: Vec<SlotInfo>) -> PgWireResult<Response> {
    let schema = Arc::new(slot_schema());
    let rows: Vec<PgWireResult<_>> = slots
        .into_iter()
        .map(|slot| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&slot.id.to_string())?;
            encoder.encode_field(&slot.experience_id.to_string())?;
            encoder.encode_field(&slot.date.to_string())?;
            encoder.encode_field(&slot.time.to_string())?;
            encoder.encode_field(&(slot.total_capacity as i64))?;
            encoder.encode_field(&(slot.available as i64))?;
            encoder.encode_field(&slot.blocked)?;
            encoder.encode_field(&slot.price_override)?;
            encoder.encode_field(&slot.created_at)?;
            encoder.encode_field(&slot.updated_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    )))
}

fn counter_row(result: Result<u32, EngineError>) -> PgWireResult<Response> {
    let (success, count, error_text) = match result {
        Ok(remaining) => (true, Some(remaining as i64), None),
        // Storage failures are real errors, everything else is an outcome.
        Err(e) if e.is_retryable() => return Err(engine_err(e)),
        Err(e) => {
            let count = match &e {
                EngineError::Insufficient { available, .. } => Some(*available as i64),
                _ => None,
            };
            (false, count, Some(e.to_string()))
        }
    };

    let schema = Arc::new(counter_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&success)?;
    encoder.encode_field(&count)?;
    encoder.encode_field(&error_text)?;
    let row = Ok(encoder.take_row());
    Ok(Response::Query(QueryResponse::new(
        schema,
        stream::iter(vec![row]),
    )))
}

fn audit_rows(entries: Vec<AuditEntry>) -> PgWireResult<Response> {
    let schema = Arc::new(audit_schema());
    let rows: Vec<PgWireResult<_>> = entries
        .into_iter()
        .map(|entry| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&entry.id.to_string())?;
            encoder.encode_field(&entry.event_type.as_str())?;
            encoder.encode_field(&entry.entity_type)?;
            encoder.encode_field(&entry.entity_id.to_string())?;
            encoder.encode_field(&entry.actor_id)?;
            encoder.encode_field(&entry.actor_type.as_str())?;
            encoder.encode_field(&entry.metadata.to_string())?;
            encoder.encode_field(&entry.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    )))
}

#[async_trait]
impl SimpleQueryHandler for TallyHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let actor = self.resolve_actor(client);
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(&engine, cmd, &actor).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TallyQueryParser;

/// Best-effort result schema from the raw SQL text. Good enough for the
/// Describe messages clients send before Execute.
fn schema_for_statement(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.contains("_SLOT_INVENTORY") {
        counter_schema()
    } else if upper.contains("BLOCK_SLOT") {
        slot_schema()
    } else if upper.contains("AUDIT_LOG") {
        audit_schema()
    } else if upper.contains("SELECT") && (upper.contains("AVAILABILITY") || upper.contains("SLOTS"))
    {
        slot_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl QueryParser for TallyQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for_statement(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for TallyHandler {
    type Statement = String;
    type QueryParser = TallyQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let actor = self.resolve_actor(client);
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, cmd, &actor).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for_statement(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for_statement(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct TallyFactory {
    handler: Arc<TallyHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<TallyAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl TallyFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = TallyAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(TallyHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TallyFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one accepted TCP connection until the client disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let factory = Arc::new(TallyFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await?;
    Ok(())
}

fn engine_err(e: EngineError) -> PgWireError {
    // Schedule collisions surface as the standard unique-violation SQLSTATE
    // so client libraries can branch on it.
    let code = match e {
        EngineError::Duplicate { .. } => "23505",
        _ => "P0001",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
