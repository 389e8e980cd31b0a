use std::str::FromStr;
use std::time::Duration;

use chrono::Weekday;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{BookingDraft, RequestDraft};
use crate::model::*;
use crate::schedule::SolveMode;

pub const FACILITY_COLUMNS: &[&str] = &["id", "name", "kind"];
pub const TEAM_COLUMNS: &[&str] = &[
    "id",
    "name",
    "age_group",
    "usual_day",
    "usual_time",
    "usual_facility",
    "is_flexible",
];
pub const EVENT_COLUMNS: &[&str] = &[
    "id",
    "title",
    "facility_id",
    "start",
    "end",
    "kind",
    "is_fixed",
    "status",
    "team_id",
    "request_id",
];
pub const REQUEST_COLUMNS: &[&str] = &[
    "id",
    "team_id",
    "kind",
    "duration",
    "recurrence",
    "preferred_facility",
    "preferred_days",
    "earliest_start",
    "latest_end",
    "priority",
    "schedule_from",
    "schedule_until",
];

/// Parsed command from SQL input.
#[derive(Debug)]
pub enum Command {
    InsertFacility {
        id: Ulid,
        name: String,
        kind: FacilityKind,
    },
    RenameFacility {
        id: Ulid,
        name: String,
    },
    DeleteFacility {
        id: Ulid,
    },
    InsertTeam {
        team: Team,
    },
    UpdateTeam {
        id: Ulid,
        set: Row,
    },
    DeleteTeam {
        id: Ulid,
    },
    InsertEvent {
        draft: BookingDraft,
    },
    BatchInsertEvents {
        drafts: Vec<BookingDraft>,
    },
    UpdateEvent {
        id: Ulid,
        set: Row,
    },
    DeleteEvent {
        id: Ulid,
    },
    InsertRequest {
        draft: RequestDraft,
    },
    UpdateRequest {
        id: Ulid,
        set: Row,
    },
    DeleteRequest {
        id: Ulid,
    },
    SelectFacilities,
    SelectTeams,
    SelectRequests,
    SelectEvents {
        facility_id: Option<Ulid>,
        window: Option<Span>,
    },
    SelectAvailability {
        facility_id: Ulid,
        window: Span,
        min_duration: Option<Ms>,
    },
    ScheduleSolve {
        horizon: Option<Span>,
    },
    ScheduleAllocate {
        horizon: Option<Span>,
        budget: Option<Duration>,
        mode: SolveMode,
        apply: bool,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let mut cmds = parse_script(sql)?;
    match cmds.len() {
        0 => Err(SqlError::Empty),
        1 => Ok(cmds.remove(0)),
        n => Err(SqlError::Unsupported(format!("{n} statements in one query"))),
    }
}

/// Every `;`-separated statement of a simple query, in order.
pub fn parse_script(sql: &str) -> Result<Vec<Command>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    stmts.iter().map(parse_statement).collect()
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from, if `sql` is one. Placeholders are fine here,
/// so it works on unbound prepared statements.
pub fn select_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let Some(Statement::Query(query)) = stmts.first() else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    table_factor_name(&select.from.first()?.relation).ok()
}

fn table_columns(table: &str) -> Result<(&'static str, &'static [&'static str]), SqlError> {
    match table {
        "facilities" => Ok(("facilities", FACILITY_COLUMNS)),
        "teams" => Ok(("teams", TEAM_COLUMNS)),
        "events" => Ok(("events", EVENT_COLUMNS)),
        "requests" => Ok(("requests", REQUEST_COLUMNS)),
        _ => Err(SqlError::UnknownTable(table.to_string())),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let (table, columns) = table_columns(&insert_table_name(insert)?)?;
    let named: Vec<String> = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .collect();
    let rows = extract_all_insert_rows(insert)?
        .iter()
        .map(|values| Row::from_insert(table, columns, &named, values))
        .collect::<Result<Vec<_>, _>>()?;

    if table == "events" {
        let mut drafts = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let draft = event_from_row(row).map_err(|e| match rows.len() {
                1 => e,
                _ => SqlError::Parse(format!("row {i}: {e}")),
            })?;
            drafts.push(draft);
        }
        return Ok(match drafts.len() {
            1 => Command::InsertEvent {
                draft: drafts.remove(0),
            },
            _ => Command::BatchInsertEvents { drafts },
        });
    }

    let [row] = rows.as_slice() else {
        return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}")));
    };
    match table {
        "facilities" => Ok(Command::InsertFacility {
            id: row.opt("id", SqlValue::ulid)?.unwrap_or_else(Ulid::new),
            name: row.req("name", SqlValue::text)?,
            kind: row.req("kind", SqlValue::tag)?,
        }),
        "teams" => {
            let id = row.opt("id", SqlValue::ulid)?.unwrap_or_else(Ulid::new);
            let mut team = Team::new(id, row.req("name", SqlValue::text)?);
            apply_team(&mut team, row)?;
            Ok(Command::InsertTeam { team })
        }
        _ => Ok(Command::InsertRequest {
            draft: request_from_row(row)?,
        }),
    }
}

fn event_from_row(row: &Row) -> Result<BookingDraft, SqlError> {
    let mut draft = BookingDraft::new(
        row.req("facility_id", SqlValue::ulid)?,
        row.req("title", SqlValue::text)?,
        row.req("kind", SqlValue::tag)?,
        row.req("start", SqlValue::int)?,
    );
    if let Some(id) = row.opt("id", SqlValue::ulid)? {
        draft.id = id;
    }
    apply_event(&mut draft, row)?;
    Ok(draft)
}

fn request_from_row(row: &Row) -> Result<RequestDraft, SqlError> {
    let schedule = Span::new(
        row.req("schedule_from", SqlValue::int)?,
        row.req("schedule_until", SqlValue::int)?,
    );
    let mut draft = RequestDraft::new(
        row.req("team_id", SqlValue::ulid)?,
        row.req("kind", SqlValue::tag)?,
        schedule,
    );
    if let Some(id) = row.opt("id", SqlValue::ulid)? {
        draft.id = id;
    }
    apply_request(&mut draft, row)?;
    Ok(draft)
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let (table, columns) = table_columns(&table_factor_name(&table.relation)?)?;
    let id = extract_where_id(selection)?;
    let mut cells = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        if column == "id" {
            return Err(SqlError::Unsupported("changing id".into()));
        }
        cells.push((column, sql_value(&assignment.value)?));
    }
    let set = Row::new(table, columns, cells)?;

    match table {
        "facilities" => {
            let name = set.req("name", SqlValue::text)?;
            if set.cells.len() > 1 {
                return Err(SqlError::Unsupported("only name can be updated on facilities".into()));
            }
            Ok(Command::RenameFacility { id, name })
        }
        "teams" => Ok(Command::UpdateTeam { id, set }),
        "events" => Ok(Command::UpdateEvent { id, set }),
        _ => Ok(Command::UpdateRequest { id, set }),
    }
}

/// Apply every column of `row` except `id` to `team`.
pub fn apply_team(team: &mut Team, row: &Row) -> Result<(), SqlError> {
    for (column, value) in &row.cells {
        match column.as_str() {
            "name" => team.name = value.required(column, SqlValue::text)?,
            "age_group" => team.age_group = value.nullable(column, SqlValue::text)?,
            "usual_day" => team.usual_day = value.nullable(column, SqlValue::weekday)?,
            "usual_time" => team.usual_time = value.nullable(column, SqlValue::int)?,
            "usual_facility" => team.usual_facility = value.nullable(column, SqlValue::ulid)?,
            "is_flexible" => team.is_flexible = value.required(column, SqlValue::boolean)?,
            _ => {}
        }
    }
    Ok(())
}

/// Apply every column of `row` except `id` to `draft`.
pub fn apply_event(draft: &mut BookingDraft, row: &Row) -> Result<(), SqlError> {
    for (column, value) in &row.cells {
        match column.as_str() {
            "title" => draft.title = value.required(column, SqlValue::text)?,
            "facility_id" => draft.facility_id = value.required(column, SqlValue::ulid)?,
            "start" => draft.start = value.required(column, SqlValue::int)?,
            "end" => draft.end = value.nullable(column, SqlValue::int)?,
            "kind" => draft.kind = value.required(column, SqlValue::tag)?,
            "is_fixed" => draft.is_fixed = value.required(column, SqlValue::boolean)?,
            "status" => draft.status = value.required(column, SqlValue::tag)?,
            "team_id" => draft.team_id = value.nullable(column, SqlValue::ulid)?,
            "request_id" => draft.request_id = value.nullable(column, SqlValue::ulid)?,
            _ => {}
        }
    }
    Ok(())
}

/// Apply every column of `row` except `id` to `draft`.
pub fn apply_request(draft: &mut RequestDraft, row: &Row) -> Result<(), SqlError> {
    for (column, value) in &row.cells {
        match column.as_str() {
            "team_id" => draft.team_id = value.required(column, SqlValue::ulid)?,
            "kind" => draft.kind = value.required(column, SqlValue::tag)?,
            "duration" => draft.duration_minutes = value.nullable(column, SqlValue::int)?,
            "recurrence" => draft.recurrence = value.required(column, SqlValue::tag)?,
            "preferred_facility" => {
                draft.preferred_facility = value.nullable(column, SqlValue::ulid)?
            }
            "preferred_days" => {
                draft.preferred_days = value
                    .nullable(column, SqlValue::tag::<DaySet>)?
                    .unwrap_or_default()
            }
            "earliest_start" => {
                draft.preferred_window.earliest_start = value.required(column, SqlValue::int)?
            }
            "latest_end" => {
                draft.preferred_window.latest_end = value.required(column, SqlValue::int)?
            }
            "priority" => draft.priority = value.required(column, SqlValue::tag)?,
            "schedule_from" => draft.schedule.start = value.required(column, SqlValue::int)?,
            "schedule_until" => draft.schedule.end = value.required(column, SqlValue::int)?,
            _ => {}
        }
    }
    Ok(())
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "facilities" => Ok(Command::DeleteFacility { id }),
        "teams" => Ok(Command::DeleteTeam { id }),
        "events" => Ok(Command::DeleteEvent { id }),
        "requests" => Ok(Command::DeleteRequest { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        filters.collect(selection)?;
    }

    let cmd = match table.as_str() {
        "facilities" => Command::SelectFacilities,
        "teams" => Command::SelectTeams,
        "requests" => Command::SelectRequests,
        "events" => Command::SelectEvents {
            facility_id: filters.take_eq("facility_id", SqlValue::ulid)?,
            window: filters.take_window()?,
        },
        "availability" => Command::SelectAvailability {
            facility_id: filters
                .take_eq("facility_id", SqlValue::ulid)?
                .ok_or(SqlError::MissingFilter("facility_id"))?,
            window: filters
                .take_window()?
                .ok_or(SqlError::MissingFilter("start"))?,
            min_duration: filters.take_eq("min_duration", SqlValue::int)?,
        },
        "schedule_solve" => Command::ScheduleSolve {
            horizon: filters.take_window()?,
        },
        "schedule_allocate" => Command::ScheduleAllocate {
            horizon: filters.take_window()?,
            budget: filters
                .take_eq("budget_ms", SqlValue::int)?
                .map(|ms| Duration::from_millis(ms.max(0) as u64)),
            mode: filters
                .take_eq("mode", SqlValue::tag)?
                .unwrap_or(SolveMode::Allocation),
            apply: filters
                .take_eq("apply", SqlValue::boolean)?
                .unwrap_or(false),
        },
        _ => return Err(SqlError::UnknownTable(table)),
    };
    filters.finish()?;
    Ok(cmd)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    GtEq,
    LtEq,
}

/// Conjunction of `column <op> literal` comparisons from a WHERE clause.
#[derive(Debug, Default)]
struct Filters {
    terms: Vec<(String, Op, SqlValue)>,
}

impl Filters {
    fn collect(&mut self, expr: &Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp { left, op, right } => {
                let op = match op {
                    ast::BinaryOperator::And => {
                        self.collect(left)?;
                        return self.collect(right);
                    }
                    ast::BinaryOperator::Eq => Op::Eq,
                    ast::BinaryOperator::GtEq => Op::GtEq,
                    ast::BinaryOperator::LtEq => Op::LtEq,
                    other => {
                        return Err(SqlError::Unsupported(format!("operator {other}")));
                    }
                };
                let column = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                self.terms.push((column, op, sql_value(right)?));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("filter {other}"))),
        }
    }

    fn take(&mut self, column: &str, op: Op) -> Option<SqlValue> {
        let pos = self
            .terms
            .iter()
            .position(|(c, o, _)| c == column && *o == op)?;
        Some(self.terms.remove(pos).2)
    }

    fn take_eq<T>(
        &mut self,
        column: &str,
        conv: impl Fn(&SqlValue, &str) -> Result<T, SqlError>,
    ) -> Result<Option<T>, SqlError> {
        self.take(column, Op::Eq)
            .map(|v| conv(&v, column))
            .transpose()
    }

    /// `start >= t0 AND "end" <= t1`; both or neither.
    fn take_window(&mut self) -> Result<Option<Span>, SqlError> {
        let start = self.take("start", Op::GtEq);
        let end = self.take("end", Op::LtEq);
        match (start, end) {
            (None, None) => Ok(None),
            (Some(s), Some(e)) => Ok(Some(Span::new(s.int("start")?, e.int("end")?))),
            (None, Some(_)) => Err(SqlError::MissingFilter("start")),
            (Some(_), None) => Err(SqlError::MissingFilter("end")),
        }
    }

    fn finish(self) -> Result<(), SqlError> {
        match self.terms.first() {
            None => Ok(()),
            Some((column, _, _)) => Err(SqlError::Unsupported(format!("filter on {column}"))),
        }
    }
}

// ── Values ────────────────────────────────────────────────────

/// A literal from the statement text.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Int(i64),
    Bool(bool),
}

impl SqlValue {
    fn bad(column: &str, message: impl Into<String>) -> SqlError {
        SqlError::BadValue {
            column: column.to_string(),
            message: message.into(),
        }
    }

    fn text(&self, column: &str) -> Result<String, SqlError> {
        match self {
            SqlValue::Text(s) => Ok(s.clone()),
            SqlValue::Int(n) => Ok(n.to_string()),
            other => Err(Self::bad(column, format!("expected text, got {other:?}"))),
        }
    }

    fn int(&self, column: &str) -> Result<i64, SqlError> {
        match self {
            SqlValue::Int(n) => Ok(*n),
            SqlValue::Text(s) => s
                .trim()
                .parse()
                .map_err(|e| Self::bad(column, format!("bad integer {s:?}: {e}"))),
            other => Err(Self::bad(column, format!("expected integer, got {other:?}"))),
        }
    }

    fn boolean(&self, column: &str) -> Result<bool, SqlError> {
        match self {
            SqlValue::Bool(b) => Ok(*b),
            SqlValue::Int(n) => Ok(*n != 0),
            SqlValue::Text(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(Self::bad(column, format!("bad bool: {s}"))),
            },
            SqlValue::Null => Err(Self::bad(column, "expected bool, got NULL")),
        }
    }

    fn ulid(&self, column: &str) -> Result<Ulid, SqlError> {
        let s = self.text(column)?;
        Ulid::from_string(&s).map_err(|e| Self::bad(column, format!("bad ULID: {e}")))
    }

    fn tag<T>(&self, column: &str) -> Result<T, SqlError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let s = self.text(column)?;
        s.parse().map_err(|e: T::Err| Self::bad(column, e.to_string()))
    }

    fn weekday(&self, column: &str) -> Result<Weekday, SqlError> {
        let s = self.text(column)?;
        s.trim()
            .parse()
            .map_err(|_| Self::bad(column, format!("unknown weekday: {s}")))
    }

    fn required<T>(
        &self,
        column: &str,
        conv: impl Fn(&SqlValue, &str) -> Result<T, SqlError>,
    ) -> Result<T, SqlError> {
        match self {
            SqlValue::Null => Err(SqlError::MissingColumn(column.to_string())),
            v => conv(v, column),
        }
    }

    fn nullable<T>(
        &self,
        column: &str,
        conv: impl Fn(&SqlValue, &str) -> Result<T, SqlError>,
    ) -> Result<Option<T>, SqlError> {
        match self {
            SqlValue::Null => Ok(None),
            v => conv(v, column).map(Some),
        }
    }
}

/// Column/value pairs of one INSERT row or UPDATE assignment list,
/// checked against the table's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    cells: Vec<(String, SqlValue)>,
}

impl Row {
    fn new(
        table: &'static str,
        columns: &[&str],
        cells: Vec<(String, SqlValue)>,
    ) -> Result<Self, SqlError> {
        for (column, _) in &cells {
            if !columns.contains(&column.as_str()) {
                return Err(SqlError::UnknownColumn(table, column.clone()));
            }
        }
        Ok(Self { cells })
    }

    /// Without a column list, values are positional in table order.
    fn from_insert(
        table: &'static str,
        columns: &[&str],
        named: &[String],
        values: &[Expr],
    ) -> Result<Self, SqlError> {
        let names: Vec<String> = if named.is_empty() {
            if values.len() > columns.len() {
                return Err(SqlError::WrongArity(table, columns.len(), values.len()));
            }
            columns.iter().map(|c| c.to_string()).collect()
        } else {
            if named.len() != values.len() {
                return Err(SqlError::WrongArity(table, named.len(), values.len()));
            }
            named.to_vec()
        };
        let cells = names
            .into_iter()
            .zip(values)
            .map(|(name, expr)| Ok((name, sql_value(expr)?)))
            .collect::<Result<Vec<_>, SqlError>>()?;
        Self::new(table, columns, cells)
    }

    fn cell(&self, column: &str) -> Option<&SqlValue> {
        self.cells
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    fn opt<T>(
        &self,
        column: &str,
        conv: impl Fn(&SqlValue, &str) -> Result<T, SqlError>,
    ) -> Result<Option<T>, SqlError> {
        match self.cell(column) {
            None => Ok(None),
            Some(v) => v.nullable(column, conv),
        }
    }

    fn req<T>(
        &self,
        column: &str,
        conv: impl Fn(&SqlValue, &str) -> Result<T, SqlError>,
    ) -> Result<T, SqlError> {
        self.opt(column, conv)?
            .ok_or_else(|| SqlError::MissingColumn(column.to_string()))
    }
}

fn sql_value(expr: &Expr) -> Result<SqlValue, SqlError> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => match value {
            Value::Null => Ok(SqlValue::Null),
            Value::Boolean(b) => Ok(SqlValue::Bool(*b)),
            Value::SingleQuotedString(s) => Ok(SqlValue::Text(s.clone())),
            Value::Number(n, _) => n
                .parse()
                .map(SqlValue::Int)
                .map_err(|e| SqlError::Parse(format!("bad integer {n}: {e}"))),
            other => Err(SqlError::Parse(format!("unsupported literal {other}"))),
        },
        Expr::UnaryOp {
            op: ast::UnaryOperator::Minus,
            expr,
        } => match sql_value(expr)? {
            SqlValue::Int(n) => Ok(SqlValue::Int(-n)),
            other => Err(SqlError::Parse(format!("cannot negate {other:?}"))),
        },
        Expr::Nested(inner) => sql_value(inner),
        _ => Err(SqlError::Parse(format!("expected literal, got {expr}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => sql_value(right)?.ulid("id"),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    MissingColumn(String),
    BadValue { column: String, message: String },
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "unknown column {c} in {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::MissingColumn(col) => write!(f, "missing value for {col}"),
            SqlError::BadValue { column, message } => write!(f, "{column}: {message}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const OTHER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    #[test]
    fn parse_insert_facility() {
        let sql = format!("INSERT INTO facilities (id, name, kind) VALUES ('{ID}', 'Main Pitch', 'pitch')");
        match parse_sql(&sql).unwrap() {
            Command::InsertFacility { id, name, kind } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(name, "Main Pitch");
                assert_eq!(kind, FacilityKind::Pitch);
            }
            cmd => panic!("expected InsertFacility, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_positional_without_id() {
        let sql = "INSERT INTO facilities VALUES (NULL, 'Hall', 'hall')";
        assert!(matches!(
            parse_sql(sql).unwrap(),
            Command::InsertFacility { kind: FacilityKind::Hall, .. }
        ));
    }

    #[test]
    fn parse_rename_facility() {
        let sql = format!("UPDATE facilities SET name = 'Stadium' WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::RenameFacility { name, .. } => assert_eq!(name, "Stadium"),
            cmd => panic!("expected RenameFacility, got {cmd:?}"),
        }
        let sql = format!("UPDATE facilities SET kind = 'gym' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn(_))));
    }

    #[test]
    fn parse_insert_team() {
        let sql = format!(
            "INSERT INTO teams (name, usual_day, usual_time, usual_facility, is_flexible) \
             VALUES ('U14 Boys', 'tue', 1080, '{ID}', false)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertTeam { team } => {
                assert_eq!(team.name, "U14 Boys");
                assert_eq!(team.usual_day, Some(Weekday::Tue));
                assert_eq!(team.usual_time, Some(1080));
                assert_eq!(team.usual_facility.map(|f| f.to_string()).as_deref(), Some(ID));
                assert!(!team.is_flexible);
                assert_eq!(team.age_group, None);
            }
            cmd => panic!("expected InsertTeam, got {cmd:?}"),
        }
    }

    #[test]
    fn team_update_can_clear_optional_fields() {
        let sql = format!("UPDATE teams SET usual_facility = NULL, age_group = 'U14' WHERE id = '{ID}'");
        let Command::UpdateTeam { set, .. } = parse_sql(&sql).unwrap() else {
            panic!("expected UpdateTeam");
        };
        let mut team = Team::new(Ulid::new(), "U14 Boys");
        team.usual_facility = Some(Ulid::new());
        apply_team(&mut team, &set).unwrap();
        assert_eq!(team.usual_facility, None);
        assert_eq!(team.age_group.as_deref(), Some("U14"));
        assert_eq!(team.name, "U14 Boys");
    }

    #[test]
    fn parse_insert_event() {
        let sql = format!(
            r#"INSERT INTO events (id, title, facility_id, start, "end", kind, is_fixed) VALUES ('{ID}', 'Senior Match', '{OTHER}', 1000, 2000, 'match', true)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertEvent { draft } => {
                assert_eq!(draft.id.to_string(), ID);
                assert_eq!(draft.facility_id.to_string(), OTHER);
                assert_eq!(draft.start, 1000);
                assert_eq!(draft.end, Some(2000));
                assert_eq!(draft.kind, EventKind::Match);
                assert!(draft.is_fixed);
                assert_eq!(draft.status, BookingStatus::Draft);
            }
            cmd => panic!("expected InsertEvent, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_event_without_end() {
        let sql = format!(
            "INSERT INTO events (title, facility_id, start, kind) VALUES ('League', '{OTHER}', 1000, 'match')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertEvent { draft } => assert_eq!(draft.end, None),
            cmd => panic!("expected InsertEvent, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_batch_insert_events() {
        let sql = format!(
            r#"INSERT INTO events (title, facility_id, start, "end", kind) VALUES ('A', '{ID}', 1000, 2000, 'meeting'), ('B', '{ID}', 3000, 4000, 'meeting')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::BatchInsertEvents { drafts } => {
                assert_eq!(drafts.len(), 2);
                assert_eq!(drafts[1].start, 3000);
                assert_ne!(drafts[0].id, drafts[1].id);
            }
            cmd => panic!("expected BatchInsertEvents, got {cmd:?}"),
        }
    }

    #[test]
    fn batch_errors_name_the_row() {
        let sql = format!(
            r#"INSERT INTO events (title, facility_id, start, "end", kind) VALUES ('A', '{ID}', 1000, 2000, 'meeting'), ('B', '{ID}', 3000, 4000, 'rave')"#
        );
        let err = parse_sql(&sql).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn event_update_cancels() {
        let sql = format!("UPDATE events SET status = 'cancelled' WHERE id = '{ID}'");
        let Command::UpdateEvent { id, set } = parse_sql(&sql).unwrap() else {
            panic!("expected UpdateEvent");
        };
        assert_eq!(id.to_string(), ID);
        let mut draft = BookingDraft::new(Ulid::new(), "x", EventKind::Meeting, 1000);
        apply_event(&mut draft, &set).unwrap();
        assert_eq!(draft.status, BookingStatus::Cancelled);
    }

    #[test]
    fn parse_insert_request() {
        let sql = format!(
            "INSERT INTO requests (team_id, kind, recurrence, preferred_days, earliest_start, latest_end, priority, schedule_from, schedule_until) \
             VALUES ('{ID}', 'juvenile_training', 'weekly', 'tue,thu', 1020, 1200, 'high', 1000, 9000)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertRequest { draft } => {
                assert_eq!(draft.kind, EventKind::JuvenileTraining);
                assert_eq!(draft.recurrence, Recurrence::Weekly);
                assert!(draft.preferred_days.contains(Weekday::Thu));
                assert!(!draft.preferred_days.contains(Weekday::Mon));
                assert_eq!(draft.preferred_window, TimeWindow::new(1020, 1200));
                assert_eq!(draft.priority, Priority::High);
                assert_eq!(draft.schedule, Span::new(1000, 9000));
                assert_eq!(draft.duration_minutes, None);
            }
            cmd => panic!("expected InsertRequest, got {cmd:?}"),
        }
    }

    #[test]
    fn missing_required_column() {
        let sql = format!("INSERT INTO requests (team_id, kind) VALUES ('{ID}', 'match')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn(c)) if c == "schedule_from"));
    }

    #[test]
    fn unknown_column_and_bad_tag() {
        let sql = "INSERT INTO facilities (name, colour) VALUES ('Hall', 'red')";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn("facilities", _))));
        let sql = "INSERT INTO facilities (name, kind) VALUES ('Hall', 'velodrome')";
        assert!(matches!(parse_sql(sql), Err(SqlError::BadValue { .. })));
    }

    #[test]
    fn parse_deletes() {
        let delete = |table: &str| parse_sql(&format!("DELETE FROM {table} WHERE id = '{ID}'")).unwrap();
        assert!(matches!(delete("facilities"), Command::DeleteFacility { .. }));
        assert!(matches!(delete("teams"), Command::DeleteTeam { .. }));
        assert!(matches!(delete("events"), Command::DeleteEvent { .. }));
        assert!(matches!(delete("requests"), Command::DeleteRequest { .. }));
        assert!(matches!(
            parse_sql("DELETE FROM events"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_select_events_window() {
        let sql = format!(r#"SELECT * FROM events WHERE facility_id = '{ID}' AND start >= 1000 AND "end" <= 2000"#);
        match parse_sql(&sql).unwrap() {
            Command::SelectEvents { facility_id, window } => {
                assert_eq!(facility_id.map(|f| f.to_string()).as_deref(), Some(ID));
                assert_eq!(window, Some(Span::new(1000, 2000)));
            }
            cmd => panic!("expected SelectEvents, got {cmd:?}"),
        }
        assert!(matches!(
            parse_sql("SELECT * FROM events"),
            Ok(Command::SelectEvents { facility_id: None, window: None })
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM events WHERE start >= 1000"),
            Err(SqlError::MissingFilter("end"))
        ));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            r#"SELECT * FROM availability WHERE facility_id = '{ID}' AND start >= 1000 AND "end" <= 2000 AND min_duration = 1800000"#
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailability {
                facility_id,
                window,
                min_duration,
            } => {
                assert_eq!(facility_id.to_string(), ID);
                assert_eq!(window, Span::new(1000, 2000));
                assert_eq!(min_duration, Some(1_800_000));
            }
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_schedule_solve() {
        assert!(matches!(
            parse_sql("SELECT * FROM schedule_solve").unwrap(),
            Command::ScheduleSolve { horizon: None }
        ));
        match parse_sql(r#"SELECT * FROM schedule_solve WHERE start >= 10 AND "end" <= 20"#).unwrap() {
            Command::ScheduleSolve { horizon } => assert_eq!(horizon, Some(Span::new(10, 20))),
            cmd => panic!("expected ScheduleSolve, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_schedule_allocate_options() {
        let sql = "SELECT * FROM schedule_allocate WHERE budget_ms = 500 AND mode = 'replan' AND apply = true";
        match parse_sql(sql).unwrap() {
            Command::ScheduleAllocate {
                horizon,
                budget,
                mode,
                apply,
            } => {
                assert_eq!(horizon, None);
                assert_eq!(budget, Some(Duration::from_millis(500)));
                assert_eq!(mode, SolveMode::Replan);
                assert!(apply);
            }
            cmd => panic!("expected ScheduleAllocate, got {cmd:?}"),
        }
        assert!(matches!(
            parse_sql("SELECT * FROM schedule_allocate").unwrap(),
            Command::ScheduleAllocate { mode: SolveMode::Allocation, apply: false, .. }
        ));
    }

    #[test]
    fn unknown_filter_is_rejected() {
        assert!(matches!(
            parse_sql("SELECT * FROM schedule_solve WHERE colour = 'red'"),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn quoted_parameters_parse_as_numbers() {
        // Bound parameters from the extended protocol arrive as quoted text.
        let sql = format!(r#"SELECT * FROM availability WHERE facility_id = '{ID}' AND start >= '1000' AND "end" <= '2000'"#);
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability { window, .. } if window == Span::new(1000, 2000)
        ));
    }

    #[test]
    fn select_table_accepts_placeholders() {
        assert_eq!(
            select_table("SELECT * FROM availability WHERE facility_id = $1").as_deref(),
            Some("availability")
        );
        assert_eq!(select_table("DELETE FROM events WHERE id = $1"), None);
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("SELECT * FROM foobar"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn script_keeps_statement_order() {
        let cmds = parse_script(
            "INSERT INTO facilities (name, kind) VALUES ('Hall', 'hall'); SELECT * FROM facilities;",
        )
        .unwrap();
        assert_eq!(cmds.len(), 2);
        assert!(matches!(cmds[0], Command::InsertFacility { .. }));
        assert!(matches!(cmds[1], Command::SelectFacilities));
        assert!(matches!(
            parse_sql("SELECT * FROM teams; SELECT * FROM teams"),
            Err(SqlError::Unsupported(_))
        ));
    }
}
