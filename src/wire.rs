use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::PitchbookAuthSource;
use crate::engine::{BookingDraft, Engine, EngineError, RequestDraft};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::schedule::{ScheduleDecision, SolverStatus};
use crate::sql::{self, Command, SqlError};

pub struct PitchbookHandler {
    engine: Arc<Engine>,
    query_parser: Arc<PitchbookQueryParser>,
}

impl PitchbookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(PitchbookQueryParser),
        }
    }

    async fn execute(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = match &result {
            Ok(responses) if !responses.iter().any(|r| matches!(r, Response::Error(_))) => "ok",
            _ => "error",
        };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertFacility { id, name, kind } => {
                engine
                    .create_facility(id, name, kind)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::RenameFacility { id, name } => {
                engine.rename_facility(id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteFacility { id } => {
                engine.delete_facility(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertTeam { team } => {
                engine.create_team(team).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateTeam { id, set } => {
                let mut team = engine
                    .team(id)
                    .ok_or(EngineError::NotFound(id))
                    .map_err(engine_err)?;
                sql::apply_team(&mut team, &set).map_err(sql_err)?;
                engine.save_team(team).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteTeam { id } => {
                engine.delete_team(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertEvent { draft } => {
                engine.create_booking(draft).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::BatchInsertEvents { drafts } => {
                let committed = engine.batch_commit(drafts).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(
                    Tag::new("INSERT").with_rows(committed.len()),
                )])
            }
            Command::UpdateEvent { id, set } => {
                let booking = engine
                    .booking(id)
                    .await
                    .ok_or(EngineError::NotFound(id))
                    .map_err(engine_err)?;
                let mut draft = BookingDraft::from(&booking);
                sql::apply_event(&mut draft, &set).map_err(sql_err)?;
                engine.commit_booking(draft).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteEvent { id } => {
                engine.delete_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertRequest { draft } => {
                engine.submit_request(draft).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateRequest { id, set } => {
                let request = engine
                    .request(id)
                    .ok_or(EngineError::NotFound(id))
                    .map_err(engine_err)?;
                let mut draft = RequestDraft::from(&request);
                sql::apply_request(&mut draft, &set).map_err(sql_err)?;
                engine.update_request(draft).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteRequest { id } => {
                engine.delete_request(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectFacilities => {
                let schema = Arc::new(facility_schema());
                let rows: Vec<PgWireResult<DataRow>> = engine
                    .list_facilities()
                    .await
                    .into_iter()
                    .map(|f| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&f.id.to_string())?;
                        encoder.encode_field(&f.name)?;
                        encoder.encode_field(&f.kind.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectTeams => {
                let schema = Arc::new(team_schema());
                let rows: Vec<PgWireResult<DataRow>> = engine
                    .list_teams()
                    .into_iter()
                    .map(|t| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&t.id.to_string())?;
                        encoder.encode_field(&t.name)?;
                        encoder.encode_field(&t.age_group)?;
                        encoder.encode_field(&t.usual_day.map(|d| d.to_string().to_lowercase()))?;
                        encoder.encode_field(&t.usual_time)?;
                        encoder.encode_field(&t.usual_facility.map(|f| f.to_string()))?;
                        encoder.encode_field(&t.is_flexible)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectRequests => {
                let schema = Arc::new(request_schema());
                let rows: Vec<PgWireResult<DataRow>> = engine
                    .list_requests()
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.team_id.to_string())?;
                        encoder.encode_field(&r.kind.as_str())?;
                        encoder.encode_field(&r.duration_minutes)?;
                        encoder.encode_field(&r.recurrence.as_str())?;
                        encoder.encode_field(&r.preferred_facility.map(|f| f.to_string()))?;
                        encoder.encode_field(&r.preferred_days.to_string())?;
                        encoder.encode_field(&r.preferred_window.earliest_start)?;
                        encoder.encode_field(&r.preferred_window.latest_end)?;
                        encoder.encode_field(&r.priority.as_str())?;
                        encoder.encode_field(&r.schedule.start)?;
                        encoder.encode_field(&r.schedule.end)?;
                        encoder.encode_field(&r.status.as_str())?;
                        encoder.encode_field(&r.booking_id.map(|b| b.to_string()))?;
                        encoder.encode_field(&r.rejection_reason.map(|reason| reason.to_string()))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectEvents {
                facility_id,
                window,
            } => {
                let bookings = engine
                    .list_bookings(facility_id, window)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(event_schema());
                let rows: Vec<PgWireResult<DataRow>> = bookings
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.title)?;
                        encoder.encode_field(&b.facility_id.to_string())?;
                        encoder.encode_field(&b.span.start)?;
                        encoder.encode_field(&b.span.end)?;
                        encoder.encode_field(&b.kind.as_str())?;
                        encoder.encode_field(&b.is_fixed)?;
                        encoder.encode_field(&b.status.as_str())?;
                        encoder.encode_field(&b.team_id.map(|t| t.to_string()))?;
                        encoder.encode_field(&b.request_id.map(|r| r.to_string()))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectAvailability {
                facility_id,
                window,
                min_duration,
            } => {
                let free = engine
                    .availability(facility_id, window, min_duration)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let fid = facility_id.to_string();
                let rows: Vec<PgWireResult<DataRow>> = free
                    .into_iter()
                    .map(|span| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&fid)?;
                        encoder.encode_field(&span.start)?;
                        encoder.encode_field(&span.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::ScheduleSolve { horizon } => {
                let decision = engine
                    .check_feasibility(horizon)
                    .await
                    .map_err(engine_err)?;
                solve_responses(&decision)
            }
            Command::ScheduleAllocate {
                horizon,
                budget,
                mode,
                apply,
            } => {
                let options = crate::engine::AllocateOptions {
                    mode,
                    horizon,
                    budget,
                    apply,
                };
                let (decision, _) = engine.allocate(options).await.map_err(engine_err)?;
                Ok(vec![allocate_response(&decision)?])
            }
        }
    }
}

/// One summary row, then for an infeasible schedule an error naming the
/// overlapping pair.
fn solve_responses(decision: &ScheduleDecision) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(solve_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&decision.feasible)?;
    encoder.encode_field(&decision.message)?;
    encoder.encode_field(&(decision.checked as i64))?;
    encoder.encode_field(&decision.status.as_str())?;
    let mut responses = vec![query_response(schema, vec![Ok(encoder.take_row())])];
    if decision.status == SolverStatus::Infeasible {
        responses.push(Response::Error(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "P0002".into(),
            decision.message.clone(),
        ))));
    }
    Ok(responses)
}

fn allocate_response(decision: &ScheduleDecision) -> PgWireResult<Response> {
    let schema = Arc::new(allocate_schema());
    let mut rows = Vec::with_capacity(decision.resolutions.len());
    for resolution in &decision.resolutions {
        let placement = resolution.placement.as_ref();
        let details = placement
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| PgWireError::ApiError(Box::new(e)))?;
        let first = placement.and_then(|p| p.occurrences.first());
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&resolution.request_id.to_string())?;
        encoder.encode_field(&resolution.status.as_str())?;
        encoder.encode_field(&placement.map(|p| p.facility_id.to_string()))?;
        encoder.encode_field(&first.map(|s| s.start))?;
        encoder.encode_field(&first.map(|s| s.end))?;
        encoder.encode_field(&placement.map(|p| p.occurrences.len() as i64))?;
        encoder.encode_field(&placement.map(|p| p.penalty))?;
        encoder.encode_field(&resolution.reason.map(|r| r.to_string()))?;
        encoder.encode_field(&details)?;
        encoder.encode_field(&decision.status.as_str())?;
        rows.push(Ok(encoder.take_row()));
    }
    Ok(query_response(schema, rows))
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Schemas ──────────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn facility_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("kind", Type::VARCHAR),
    ]
}

fn team_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("age_group", Type::VARCHAR),
        field("usual_day", Type::VARCHAR),
        field("usual_time", Type::INT8),
        field("usual_facility", Type::VARCHAR),
        field("is_flexible", Type::BOOL),
    ]
}

fn request_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("team_id", Type::VARCHAR),
        field("kind", Type::VARCHAR),
        field("duration", Type::INT8),
        field("recurrence", Type::VARCHAR),
        field("preferred_facility", Type::VARCHAR),
        field("preferred_days", Type::VARCHAR),
        field("earliest_start", Type::INT8),
        field("latest_end", Type::INT8),
        field("priority", Type::VARCHAR),
        field("schedule_from", Type::INT8),
        field("schedule_until", Type::INT8),
        field("status", Type::VARCHAR),
        field("booking_id", Type::VARCHAR),
        field("rejection_reason", Type::VARCHAR),
    ]
}

fn event_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("title", Type::VARCHAR),
        field("facility_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("kind", Type::VARCHAR),
        field("is_fixed", Type::BOOL),
        field("status", Type::VARCHAR),
        field("team_id", Type::VARCHAR),
        field("request_id", Type::VARCHAR),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("facility_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
    ]
}

fn solve_schema() -> Vec<FieldInfo> {
    vec![
        field("feasible", Type::BOOL),
        field("message", Type::VARCHAR),
        field("checked", Type::INT8),
        field("solver_status", Type::VARCHAR),
    ]
}

fn allocate_schema() -> Vec<FieldInfo> {
    vec![
        field("request_id", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("facility_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("occurrences", Type::INT8),
        field("penalty", Type::INT8),
        field("reason", Type::VARCHAR),
        field("details", Type::VARCHAR),
        field("solver_status", Type::VARCHAR),
    ]
}

/// Result columns of a statement, for Describe.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::select_table(sql).as_deref() {
        Some("facilities") => facility_schema(),
        Some("teams") => team_schema(),
        Some("requests") => request_schema(),
        Some("events") => event_schema(),
        Some("availability") => availability_schema(),
        Some("schedule_solve") => solve_schema(),
        Some("schedule_allocate") => allocate_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for PitchbookHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmds = sql::parse_script(query).map_err(sql_err)?;
        if cmds.is_empty() {
            return Ok(vec![Response::EmptyQuery]);
        }
        // Statements run in order; the first failure ends the script.
        let mut responses = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            match self.execute(cmd).await {
                Ok(mut out) => {
                    let failed = out.iter().any(|r| matches!(r, Response::Error(_)));
                    responses.append(&mut out);
                    if failed {
                        break;
                    }
                }
                Err(PgWireError::UserError(info)) => {
                    responses.push(Response::Error(info));
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(responses)
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct PitchbookQueryParser;

#[async_trait]
impl QueryParser for PitchbookQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for PitchbookHandler {
    type Statement = String;
    type QueryParser = PitchbookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute(cmd).await?;
        // One response per portal: a trailing error replaces the rows.
        if let Some(pos) = responses
            .iter()
            .position(|r| matches!(r, Response::Error(_)))
            && let Response::Error(info) = responses.swap_remove(pos)
        {
            return Err(PgWireError::UserError(info));
        }
        Ok(responses.swap_remove(0))
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    sql.split('$')
        .skip(1)
        .filter_map(|rest| {
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            digits.parse::<usize>().ok()
        })
        .max()
        .unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    // Highest index first so `$1` never clobbers `$10`.
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

pub struct PitchbookFactory {
    handler: Arc<PitchbookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<PitchbookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl PitchbookFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(PitchbookHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                PitchbookAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for PitchbookFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let factory = Arc::new(PitchbookFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await?;
    Ok(())
}

// ── Errors ───────────────────────────────────────────────────────

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::Conflict { .. } => "23P01",
        EngineError::NotFound(_) => "42704",
        EngineError::NameTaken(_) | EngineError::AlreadyExists(_) => "23505",
        EngineError::InUse(_) => "23503",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
        EngineError::Internal(_) => "XX000",
    }
}

fn sql_sqlstate(e: &SqlError) -> &'static str {
    match e {
        SqlError::UnknownTable(_) => "42P01",
        SqlError::UnknownColumn(..) => "42703",
        SqlError::MissingColumn(_) => "23502",
        SqlError::BadValue { .. } => "22P02",
        SqlError::Parse(_)
        | SqlError::Empty
        | SqlError::Unsupported(_)
        | SqlError::WrongArity(..)
        | SqlError::MissingFilter(_) => "42601",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        engine_sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sql_sqlstate(&e).into(),
        e.to_string(),
    )))
}
