//! MySQL connection implementation

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use keel_core::{
    Connection, KeelError, QueryResult, Result, Row, StatementResult, Value,
};
use mysql_async::{Conn, Row as MySqlRow, consts::ColumnType, prelude::*};
use tokio::sync::Mutex;

/// One physical MySQL session.
///
/// Pooling, health checking and reconnection live above the driver, so this
/// wraps a single `Conn` rather than a `mysql_async::Pool`. The connection
/// manager guarantees exclusive use while leased; the mutex exists because
/// `Conn` methods need `&mut` behind the shared trait object.
pub struct MySqlConnection {
    conn: Mutex<Option<Conn>>,
    closed: AtomicBool,
}

impl MySqlConnection {
    pub(crate) fn new(conn: Conn) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            closed: AtomicBool::new(false),
        }
    }

    /// Map a driver error to the keel taxonomy and, for connection-level
    /// failures, mark this session unusable so the pool drops it.
    fn note_error(&self, context: &str, err: mysql_async::Error) -> KeelError {
        let mapped = classify_mysql_error(context, err);
        if matches!(mapped, KeelError::Connection(_)) {
            self.closed.store(true, Ordering::SeqCst);
        }
        mapped
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    fn driver_name(&self) -> &str {
        "mysql"
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| KeelError::Connection("connection is closed".into()))?;

        let mysql_rows: Vec<MySqlRow> = conn
            .exec(sql, to_mysql_params(params))
            .await
            .map_err(|e| self.note_error("query failed", e))?;

        let mut column_names = Vec::new();
        let mut column_types = Vec::new();
        if let Some(first_row) = mysql_rows.first() {
            for col in first_row.columns_ref() {
                column_names.push(col.name_str().to_string());
                column_types.push(col.column_type());
            }
        }

        let mut rows = Vec::with_capacity(mysql_rows.len());
        for mysql_row in mysql_rows {
            let mut values = Vec::with_capacity(column_names.len());
            for idx in 0..column_names.len() {
                let mysql_val: mysql_async::Value =
                    mysql_row.as_ref(idx).cloned().unwrap_or(mysql_async::Value::NULL);
                let col_type = column_types
                    .get(idx)
                    .copied()
                    .unwrap_or(ColumnType::MYSQL_TYPE_STRING);
                values.push(mysql_value_to_value(mysql_val, col_type));
            }
            rows.push(Row::new(column_names.clone(), values));
        }

        tracing::debug!(row_count = rows.len(), "query executed");
        Ok(QueryResult {
            columns: column_names,
            rows,
            affected_rows: conn.affected_rows(),
            last_insert_id: conn.last_insert_id(),
            execution_time_ms: 0,
        })
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| KeelError::Connection("connection is closed".into()))?;

        conn.exec_drop(sql, to_mysql_params(params))
            .await
            .map_err(|e| self.note_error("statement failed", e))?;

        let affected_rows = conn.affected_rows();
        tracing::debug!(affected_rows, "statement executed");
        Ok(StatementResult {
            affected_rows,
            last_insert_id: conn.last_insert_id(),
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| KeelError::Connection("connection is closed".into()))?;
        conn.ping()
            .await
            .map_err(|e| self.note_error("ping failed", e))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let conn = { self.conn.lock().await.take() };
        if let Some(conn) = conn {
            conn.disconnect()
                .await
                .map_err(|e| classify_mysql_error("disconnect failed", e))?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Bind keel values as positional statement parameters
fn to_mysql_params(params: &[Value]) -> mysql_async::Params {
    if params.is_empty() {
        return mysql_async::Params::Empty;
    }
    mysql_async::Params::Positional(params.iter().map(value_to_mysql).collect())
}

fn value_to_mysql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(v) => mysql_async::Value::Int(i64::from(*v)),
        Value::Int64(v) => mysql_async::Value::Int(*v),
        Value::UInt64(v) => mysql_async::Value::UInt(*v),
        Value::Float64(v) => mysql_async::Value::Double(*v),
        Value::String(v) => mysql_async::Value::Bytes(v.clone().into_bytes()),
        Value::Bytes(v) => mysql_async::Value::Bytes(v.clone()),
        Value::Date(d) => mysql_async::Value::Date(
            d.year() as u16,
            d.month() as u8,
            d.day() as u8,
            0,
            0,
            0,
            0,
        ),
        Value::DateTime(dt) => mysql_async::Value::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.and_utc().timestamp_subsec_micros(),
        ),
        Value::Json(v) => mysql_async::Value::Bytes(v.to_string().into_bytes()),
    }
}

/// Convert a mysql_async value to a keel value, using column type metadata
/// to correctly interpret byte strings from the text protocol.
fn mysql_value_to_value(val: mysql_async::Value, col_type: ColumnType) -> Value {
    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => match col_type {
                ColumnType::MYSQL_TYPE_TINY
                | ColumnType::MYSQL_TYPE_SHORT
                | ColumnType::MYSQL_TYPE_LONG
                | ColumnType::MYSQL_TYPE_LONGLONG
                | ColumnType::MYSQL_TYPE_INT24
                | ColumnType::MYSQL_TYPE_YEAR => {
                    s.parse::<i64>().map(Value::Int64).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_FLOAT
                | ColumnType::MYSQL_TYPE_DOUBLE
                | ColumnType::MYSQL_TYPE_DECIMAL
                | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                    s.parse::<f64>().map(Value::Float64).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_JSON => serde_json::from_str(&s)
                    .map(Value::Json)
                    .unwrap_or(Value::String(s)),
                _ => Value::String(s),
            },
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql_async::Value::Int(i) => Value::Int64(i),
        mysql_async::Value::UInt(u) => Value::UInt64(u),
        mysql_async::Value::Float(f) => Value::Float64(f64::from(f)),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            if hour == 0 && min == 0 && sec == 0 && micro == 0 {
                match chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32) {
                    Some(date) => Value::Date(date),
                    None => Value::String(format!("{:04}-{:02}-{:02}", year, month, day)),
                }
            } else {
                let dt = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .and_then(|d| d.and_hms_micro_opt(hour as u32, min as u32, sec as u32, micro));
                match dt {
                    Some(dt) => Value::DateTime(dt),
                    None => Value::String(format!(
                        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                        year, month, day, hour, min, sec
                    )),
                }
            }
        }
        mysql_async::Value::Time(negative, days, hours, mins, secs, micros) => {
            let total_hours = (days as u32) * 24 + (hours as u32);
            let sign = if negative { "-" } else { "" };
            Value::String(format!(
                "{}{:02}:{:02}:{:02}.{:06}",
                sign, total_hours, mins, secs, micros
            ))
        }
    }
}

/// Server error codes that indicate the session (not the statement) is
/// broken: connection refused/aborted, server shutting down, link timeouts.
fn is_connection_error_code(code: u16) -> bool {
    matches!(
        code,
        1040 | 1042 | 1043 | 1053 | 1152 | 1159 | 1161 | 2002 | 2003 | 2006 | 2013
    )
}

/// Fold a mysql_async error into the keel taxonomy.
///
/// IO and protocol failures mean the session is gone and the pool should
/// rebuild; server errors are statement-level unless the code says the
/// session itself died.
pub(crate) fn classify_mysql_error(context: &str, err: mysql_async::Error) -> KeelError {
    match err {
        mysql_async::Error::Io(e) => KeelError::Connection(format!("{}: {}", context, e)),
        mysql_async::Error::Driver(e) => KeelError::Connection(format!("{}: {}", context, e)),
        mysql_async::Error::Server(ref server) if is_connection_error_code(server.code) => {
            KeelError::Connection(format!("{}: {}", context, err))
        }
        mysql_async::Error::Server(e) => KeelError::Statement(format!("{}: {}", context, e)),
        other => KeelError::Connection(format!("{}: {}", context, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(code: u16) -> mysql_async::Error {
        mysql_async::Error::Server(mysql_async::ServerError {
            code,
            message: "boom".into(),
            state: "HY000".into(),
        })
    }

    #[test]
    fn test_statement_errors_stay_statement_level() {
        // 1062 = duplicate key
        let err = classify_mysql_error("insert", server_error(1062));
        assert!(matches!(err, KeelError::Statement(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_session_death_codes_are_connection_level() {
        for code in [1040, 2006, 2013] {
            let err = classify_mysql_error("query", server_error(code));
            assert!(matches!(err, KeelError::Connection(_)), "code {}", code);
            assert!(err.is_transient());
        }
    }

    #[test]
    fn test_params_are_bound_positionally() {
        let params = to_mysql_params(&[Value::Int64(7), Value::String("a".into())]);
        match params {
            mysql_async::Params::Positional(values) => {
                assert_eq!(values[0], mysql_async::Value::Int(7));
                assert_eq!(values[1], mysql_async::Value::Bytes(b"a".to_vec()));
            }
            other => panic!("expected positional params, got {:?}", other),
        }
        assert!(matches!(to_mysql_params(&[]), mysql_async::Params::Empty));
    }

    #[test]
    fn test_text_protocol_integers_decode_by_column_type() {
        let value = mysql_value_to_value(
            mysql_async::Value::Bytes(b"42".to_vec()),
            ColumnType::MYSQL_TYPE_LONGLONG,
        );
        assert_eq!(value, Value::Int64(42));

        let value = mysql_value_to_value(
            mysql_async::Value::Bytes(b"42".to_vec()),
            ColumnType::MYSQL_TYPE_VAR_STRING,
        );
        assert_eq!(value, Value::String("42".into()));
    }

    #[test]
    fn test_json_columns_decode_to_json() {
        let value = mysql_value_to_value(
            mysql_async::Value::Bytes(br#"{"a":1}"#.to_vec()),
            ColumnType::MYSQL_TYPE_JSON,
        );
        assert_eq!(value, Value::Json(serde_json::json!({"a": 1})));
    }

    #[test]
    fn test_date_and_datetime_decode() {
        let value = mysql_value_to_value(
            mysql_async::Value::Date(2024, 3, 15, 0, 0, 0, 0),
            ColumnType::MYSQL_TYPE_DATE,
        );
        assert!(matches!(value, Value::Date(_)));

        let value = mysql_value_to_value(
            mysql_async::Value::Date(2024, 3, 15, 10, 30, 0, 0),
            ColumnType::MYSQL_TYPE_DATETIME,
        );
        assert!(matches!(value, Value::DateTime(_)));
    }
}
