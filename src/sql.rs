use sqlparser::ast::{
    self, Expr, FromTable, FunctionArg, FunctionArgExpr, FunctionArguments, ObjectNamePart,
    SelectItem, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;
use crate::schedule::{Ms, SlotDate, SlotTime};

/// Parsed command from SQL input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    InsertSlot {
        spec: SlotSpec,
    },
    InsertBulkSlots {
        specs: Vec<SlotSpec>,
    },
    UpdateSlot {
        id: Ulid,
        patch: SlotPatch,
    },
    DeleteSlot {
        id: Ulid,
    },
    BlockSlot {
        id: Ulid,
        reason: String,
    },
    UnblockSlot {
        id: Ulid,
    },
    Decrement {
        id: Ulid,
        quantity: i64,
    },
    DecrementWithLock {
        id: Ulid,
        quantity: i64,
    },
    Increment {
        id: Ulid,
        quantity: i64,
    },
    SelectAvailability {
        experience_id: Ulid,
        range: DateRange,
        cutoff_hours: Option<i64>,
    },
    SelectSlotById {
        id: Ulid,
    },
    SelectSlots {
        experience_id: Option<Ulid>,
    },
    SelectAuditByEntity {
        entity_id: Ulid,
    },
    SelectAuditByActor {
        actor_id: String,
    },
    SelectAuditByRange {
        start: Ms,
        end: Ms,
        entity_type: Option<String>,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
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

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "slots" {
        return Err(SqlError::UnknownTable(table));
    }

    let rows = extract_all_insert_rows(insert)?;
    let mut specs = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        specs.push(
            parse_slot_row(row).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
        );
    }

    if specs.len() == 1 {
        Ok(Command::InsertSlot {
            spec: specs.pop().expect("one spec"),
        })
    } else {
        Ok(Command::InsertBulkSlots { specs })
    }
}

/// One VALUES row: (id, experience_id, date, time, total_capacity[, price_override]).
fn parse_slot_row(row: &[Expr]) -> Result<SlotSpec, SqlError> {
    if row.len() < 5 {
        return Err(SqlError::WrongArity("slots", 5, row.len()));
    }
    Ok(SlotSpec {
        id: parse_ulid_expr(&row[0])?,
        experience_id: parse_ulid_expr(&row[1])?,
        date: parse_date_expr(&row[2])?,
        time: parse_time_expr(&row[3])?,
        total_capacity: parse_u32(&row[4])?,
        price_override: if row.len() >= 6 {
            parse_i64_or_null(&row[5])?
        } else {
            None
        },
    })
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let name = table_factor_name(&table.relation)?;
    if name != "slots" {
        return Err(SqlError::UnknownTable(name));
    }
    let id = extract_where_id(selection)?;

    let mut patch = SlotPatch::default();
    for assignment in assignments {
        let col = assignment_column(&assignment.target)?;
        match col.as_str() {
            "total_capacity" => patch.total_capacity = Some(parse_u32(&assignment.value)?),
            "date" => patch.date = Some(parse_date_expr(&assignment.value)?),
            "time" => patch.time = Some(parse_time_expr(&assignment.value)?),
            "price_override" => {
                patch.price_override = Some(parse_i64_or_null(&assignment.value)?)
            }
            other => return Err(SqlError::Parse(format!("cannot SET column {other}"))),
        }
    }
    Ok(Command::UpdateSlot { id, patch })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "slots" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(&delete.selection)?;
    Ok(Command::DeleteSlot { id })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    // FROM-less SELECT means a function call: the stored-procedure surface.
    if select.from.is_empty() {
        let expr = match select.projection.first() {
            Some(SelectItem::UnnamedExpr(e)) | Some(SelectItem::ExprWithAlias { expr: e, .. }) => e,
            _ => return Err(SqlError::Parse("SELECT without FROM or function".into())),
        };
        return parse_function_call(expr);
    }

    let table = table_factor_name(&select.from[0].relation)?;
    match table.as_str() {
        "availability" => parse_select_availability(&select.selection),
        "slots" => parse_select_slots(&select.selection),
        "audit_log" => parse_select_audit(&select.selection),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_function_call(expr: &Expr) -> Result<Command, SqlError> {
    let func = match expr {
        Expr::Function(f) => f,
        _ => return Err(SqlError::Parse("expected a function call".into())),
    };
    let name = object_name_last(&func.name)
        .ok_or_else(|| SqlError::Parse("empty function name".into()))?;
    let args = function_args(func)?;

    let arity = |n: usize| -> Result<(), SqlError> {
        if args.len() < n {
            Err(SqlError::WrongArity("function arguments", n, args.len()))
        } else {
            Ok(())
        }
    };

    match name.as_str() {
        "decrement_slot_inventory" => {
            arity(2)?;
            Ok(Command::Decrement {
                id: parse_ulid_expr(args[0])?,
                quantity: parse_i64_expr(args[1])?,
            })
        }
        "decrement_slot_inventory_with_lock" => {
            arity(2)?;
            Ok(Command::DecrementWithLock {
                id: parse_ulid_expr(args[0])?,
                quantity: parse_i64_expr(args[1])?,
            })
        }
        "increment_slot_inventory" => {
            arity(2)?;
            Ok(Command::Increment {
                id: parse_ulid_expr(args[0])?,
                quantity: parse_i64_expr(args[1])?,
            })
        }
        "block_slot" => {
            arity(2)?;
            Ok(Command::BlockSlot {
                id: parse_ulid_expr(args[0])?,
                reason: parse_string_expr(args[1])?,
            })
        }
        "unblock_slot" => {
            arity(1)?;
            Ok(Command::UnblockSlot {
                id: parse_ulid_expr(args[0])?,
            })
        }
        _ => Err(SqlError::UnknownFunction(name)),
    }
}

fn parse_select_availability(selection: &Option<Expr>) -> Result<Command, SqlError> {
    let (mut experience_id, mut start, mut end, mut cutoff_hours) = (None, None, None, None);
    if let Some(expr) = selection {
        walk_availability_filters(expr, &mut experience_id, &mut start, &mut end, &mut cutoff_hours)?;
    }

    Ok(Command::SelectAvailability {
        experience_id: experience_id.ok_or(SqlError::MissingFilter("experience_id"))?,
        range: DateRange {
            start: start.ok_or(SqlError::MissingFilter("date >="))?,
            end: end.ok_or(SqlError::MissingFilter("date <="))?,
        },
        cutoff_hours,
    })
}

fn walk_availability_filters(
    expr: &Expr,
    experience_id: &mut Option<Ulid>,
    start: &mut Option<SlotDate>,
    end: &mut Option<SlotDate>,
    cutoff_hours: &mut Option<i64>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                walk_availability_filters(left, experience_id, start, end, cutoff_hours)?;
                walk_availability_filters(right, experience_id, start, end, cutoff_hours)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("experience_id") => *experience_id = Some(parse_ulid_expr(right)?),
                Some("cutoff_hours") => *cutoff_hours = Some(parse_i64_expr(right)?),
                _ => {}
            },
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("date") {
                    *start = Some(parse_date_expr(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("date") {
                    *end = Some(parse_date_expr(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_select_slots(selection: &Option<Expr>) -> Result<Command, SqlError> {
    let Some(expr) = selection else {
        return Ok(Command::SelectSlots { experience_id: None });
    };
    if let Expr::BinaryOp {
        left,
        op: ast::BinaryOperator::Eq,
        right,
    } = expr
    {
        match expr_column_name(left).as_deref() {
            Some("id") => {
                return Ok(Command::SelectSlotById {
                    id: parse_ulid_expr(right)?,
                })
            }
            Some("experience_id") => {
                return Ok(Command::SelectSlots {
                    experience_id: Some(parse_ulid_expr(right)?),
                })
            }
            _ => {}
        }
    }
    Err(SqlError::MissingFilter("id or experience_id"))
}

fn parse_select_audit(selection: &Option<Expr>) -> Result<Command, SqlError> {
    let mut entity_id = None;
    let mut actor_id = None;
    let mut start = None;
    let mut end = None;
    let mut entity_type = None;
    if let Some(expr) = selection {
        walk_audit_filters(
            expr,
            &mut entity_id,
            &mut actor_id,
            &mut start,
            &mut end,
            &mut entity_type,
        )?;
    }

    if let Some(entity_id) = entity_id {
        return Ok(Command::SelectAuditByEntity { entity_id });
    }
    if let Some(actor_id) = actor_id {
        return Ok(Command::SelectAuditByActor { actor_id });
    }
    if start.is_some() || end.is_some() {
        return Ok(Command::SelectAuditByRange {
            start: start.unwrap_or(0),
            end: end.unwrap_or(i64::MAX),
            entity_type,
        });
    }
    Err(SqlError::MissingFilter("entity_id, actor_id, or created_at"))
}

fn walk_audit_filters(
    expr: &Expr,
    entity_id: &mut Option<Ulid>,
    actor_id: &mut Option<String>,
    start: &mut Option<Ms>,
    end: &mut Option<Ms>,
    entity_type: &mut Option<String>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                walk_audit_filters(left, entity_id, actor_id, start, end, entity_type)?;
                walk_audit_filters(right, entity_id, actor_id, start, end, entity_type)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("entity_id") => *entity_id = Some(parse_ulid_expr(right)?),
                Some("actor_id") => *actor_id = Some(parse_string_expr(right)?),
                Some("entity_type") => *entity_type = Some(parse_string_expr(right)?),
                _ => {}
            },
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("created_at") {
                    *start = Some(parse_i64_expr(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("created_at") {
                    *end = Some(parse_i64_expr(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
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

fn assignment_column(target: &ast::AssignmentTarget) -> Result<String, SqlError> {
    match target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported SET target".into())),
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
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn function_args(func: &ast::Function) -> Result<Vec<&Expr>, SqlError> {
    let list = match &func.args {
        FunctionArguments::List(list) => list,
        _ => return Err(SqlError::Parse("expected function argument list".into())),
    };
    list.args
        .iter()
        .map(|arg| match arg {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Ok(e),
            _ => Err(SqlError::Parse("unsupported function argument".into())),
        })
        .collect()
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr) {
        Ok(s.clone())
    } else {
        Err(SqlError::Parse(format!("expected string, got {expr:?}")))
    }
}

fn parse_date_expr(expr: &Expr) -> Result<SlotDate, SqlError> {
    parse_string_expr(expr)?
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad date: {e}")))
}

fn parse_time_expr(expr: &Expr) -> Result<SlotTime, SqlError> {
    parse_string_expr(expr)?
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad time: {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        Ok(None)
    } else {
        Ok(Some(parse_i64_expr(expr)?))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownFunction(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownFunction(name) => write!(f, "unknown function: {name}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const EID: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    #[test]
    fn parse_insert_slot() {
        let sql = format!(
            "INSERT INTO slots (id, experience_id, date, time, total_capacity) \
             VALUES ('{ID}', '{EID}', '2026-06-01', '10:00', 12)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertSlot { spec } => {
                assert_eq!(spec.id.to_string(), ID);
                assert_eq!(spec.experience_id.to_string(), EID);
                assert_eq!(spec.date.to_string(), "2026-06-01");
                assert_eq!(spec.time.to_string(), "10:00");
                assert_eq!(spec.total_capacity, 12);
                assert_eq!(spec.price_override, None);
            }
            _ => panic!("expected InsertSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_slot_with_price() {
        let sql = format!(
            "INSERT INTO slots (id, experience_id, date, time, total_capacity, price_override) \
             VALUES ('{ID}', '{EID}', '2026-06-01', '10:00', 12, 4500)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertSlot { spec } => assert_eq!(spec.price_override, Some(4500)),
            cmd => panic!("expected InsertSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_slot_null_price() {
        let sql = format!(
            "INSERT INTO slots (id, experience_id, date, time, total_capacity, price_override) \
             VALUES ('{ID}', '{EID}', '2026-06-01', '10:00', 12, NULL)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertSlot { spec } => assert_eq!(spec.price_override, None),
            cmd => panic!("expected InsertSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_multi_row_insert_is_bulk() {
        let sql = format!(
            "INSERT INTO slots (id, experience_id, date, time, total_capacity) VALUES \
             ('{ID}', '{EID}', '2026-06-01', '10:00', 12), \
             ('{EID}', '{EID}', '2026-06-01', '14:00', 8)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBulkSlots { specs } => {
                assert_eq!(specs.len(), 2);
                assert_eq!(specs[1].time.to_string(), "14:00");
            }
            cmd => panic!("expected InsertBulkSlots, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_short_row_rejected() {
        let sql = format!("INSERT INTO slots (id) VALUES ('{ID}')");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_update_slot() {
        let sql = format!(
            "UPDATE slots SET total_capacity = 8, date = '2026-06-03', \
             price_override = NULL WHERE id = '{ID}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateSlot { id, patch } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(patch.total_capacity, Some(8));
                assert_eq!(patch.date.unwrap().to_string(), "2026-06-03");
                assert_eq!(patch.time, None);
                assert_eq!(patch.price_override, Some(None));
            }
            cmd => panic!("expected UpdateSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_unknown_column_rejected() {
        let sql = format!("UPDATE slots SET available = 3 WHERE id = '{ID}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_delete_slot() {
        let sql = format!("DELETE FROM slots WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::DeleteSlot { id } => assert_eq!(id.to_string(), ID),
            cmd => panic!("expected DeleteSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_decrement_function() {
        let sql = format!("SELECT decrement_slot_inventory('{ID}', 2)");
        match parse_sql(&sql).unwrap() {
            Command::Decrement { id, quantity } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(quantity, 2);
            }
            cmd => panic!("expected Decrement, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_decrement_with_lock_function() {
        let sql = format!("SELECT decrement_slot_inventory_with_lock('{ID}', 1)");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::DecrementWithLock { quantity: 1, .. }
        ));
    }

    #[test]
    fn parse_increment_function() {
        let sql = format!("SELECT increment_slot_inventory('{ID}', 3)");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::Increment { quantity: 3, .. }
        ));
    }

    #[test]
    fn parse_negative_quantity_passes_through() {
        // Validation is the engine's job; the parser only extracts the value.
        let sql = format!("SELECT decrement_slot_inventory('{ID}', -2)");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::Decrement { quantity: -2, .. }
        ));
    }

    #[test]
    fn parse_block_and_unblock_functions() {
        let sql = format!("SELECT block_slot('{ID}', 'maintenance')");
        match parse_sql(&sql).unwrap() {
            Command::BlockSlot { id, reason } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(reason, "maintenance");
            }
            cmd => panic!("expected BlockSlot, got {cmd:?}"),
        }

        let sql = format!("SELECT unblock_slot('{ID}')");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::UnblockSlot { .. }));
    }

    #[test]
    fn parse_unknown_function_rejected() {
        let sql = format!("SELECT drop_all_slots('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownFunction(_))));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE experience_id = '{EID}' \
             AND date >= '2026-06-01' AND date <= '2026-06-30'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailability {
                experience_id,
                range,
                cutoff_hours,
            } => {
                assert_eq!(experience_id.to_string(), EID);
                assert_eq!(range.start.to_string(), "2026-06-01");
                assert_eq!(range.end.to_string(), "2026-06-30");
                assert_eq!(cutoff_hours, None);
            }
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_with_cutoff() {
        let sql = format!(
            "SELECT * FROM availability WHERE experience_id = '{EID}' \
             AND date >= '2026-06-01' AND date <= '2026-06-30' AND cutoff_hours = 24"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailability { cutoff_hours, .. } => {
                assert_eq!(cutoff_hours, Some(24));
            }
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_requires_range() {
        let sql = format!("SELECT * FROM availability WHERE experience_id = '{EID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter(_))));
    }

    #[test]
    fn parse_select_slot_by_id() {
        let sql = format!("SELECT * FROM slots WHERE id = '{ID}'");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::SelectSlotById { .. }
        ));
    }

    #[test]
    fn parse_select_slots_variants() {
        assert_eq!(
            parse_sql("SELECT * FROM slots").unwrap(),
            Command::SelectSlots {
                experience_id: None
            }
        );
        let sql = format!("SELECT * FROM slots WHERE experience_id = '{EID}'");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::SelectSlots {
                experience_id: Some(_)
            }
        ));
    }

    #[test]
    fn parse_select_audit_by_entity() {
        let sql = format!("SELECT * FROM audit_log WHERE entity_id = '{ID}'");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::SelectAuditByEntity { .. }
        ));
    }

    #[test]
    fn parse_select_audit_by_actor() {
        let sql = "SELECT * FROM audit_log WHERE actor_id = 'vendor-7'";
        match parse_sql(sql).unwrap() {
            Command::SelectAuditByActor { actor_id } => assert_eq!(actor_id, "vendor-7"),
            cmd => panic!("expected SelectAuditByActor, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_audit_by_range() {
        let sql = "SELECT * FROM audit_log WHERE created_at >= 1000 \
                   AND created_at <= 2000 AND entity_type = 'slot'";
        match parse_sql(sql).unwrap() {
            Command::SelectAuditByRange {
                start,
                end,
                entity_type,
            } => {
                assert_eq!(start, 1000);
                assert_eq!(end, 2000);
                assert_eq!(entity_type.as_deref(), Some("slot"));
            }
            cmd => panic!("expected SelectAuditByRange, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_audit_without_filter_rejected() {
        assert!(matches!(
            parse_sql("SELECT * FROM audit_log"),
            Err(SqlError::MissingFilter(_))
        ));
    }

    #[test]
    fn parse_listen() {
        let sql = "LISTEN experience_01ARZ3NDEKTSV4RRFFQ69G5FAV;";
        match parse_sql(sql).unwrap() {
            Command::Listen { channel } => {
                assert_eq!(channel, "experience_01ARZ3NDEKTSV4RRFFQ69G5FAV");
            }
            cmd => panic!("expected Listen, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_unknown_table_rejected() {
        assert!(matches!(
            parse_sql("SELECT * FROM bookings"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_garbage_rejected() {
        assert!(parse_sql("NOT SQL AT ALL").is_err());
    }
}
