//! MySQL execution and result projection

use std::time::Duration;

use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Row, Value as MySqlValue};
use serde_json::{json, Value};
use tokio::time::timeout;

use crate::error::QueryError;
use warden_proto::{DbCredentials, QueryField, QueryResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) async fn execute(
    creds: &DbCredentials,
    local_port: u16,
    sql: &str,
    params: &[Value],
) -> Result<QueryResult, QueryError> {
    let opts = OptsBuilder::default()
        .ip_or_hostname("127.0.0.1")
        .tcp_port(local_port)
        .user(Some(creds.username.clone()))
        .pass(Some(creds.password.clone()))
        .db_name(Some(creds.database.clone()))
        // Never upgrade a loopback address to a unix socket: the bridge is
        // TCP only.
        .prefer_socket(false);

    let mut conn = timeout(CONNECT_TIMEOUT, Conn::new(Opts::from(opts)))
        .await
        .map_err(|_| QueryError::ConnectTimeout)?
        .map_err(|e| QueryError::Connect(e.to_string()))?;

    let result = run_statement(&mut conn, sql, params).await;

    let _ = conn.disconnect().await;
    result
}

pub(crate) async fn run_statement(
    conn: &mut Conn,
    sql: &str,
    params: &[Value],
) -> Result<QueryResult, QueryError> {
    if params.is_empty() {
        let rows = conn
            .query_iter(sql)
            .await
            .map_err(|e| QueryError::Driver(e.to_string()))?;
        collect_result(rows).await
    } else {
        let bound = Params::Positional(params.iter().map(json_to_mysql_param).collect());
        let rows = conn
            .exec_iter(sql, bound)
            .await
            .map_err(|e| QueryError::Driver(e.to_string()))?;
        collect_result(rows).await
    }
}

async fn collect_result<'a, 't, P>(
    mut result: mysql_async::QueryResult<'a, 't, P>,
) -> Result<QueryResult, QueryError>
where
    P: Protocol,
{
    let columns = result.columns().map(|c| c.to_vec()).unwrap_or_default();
    let rows: Vec<Row> = result
        .collect()
        .await
        .map_err(|e| QueryError::Driver(e.to_string()))?;

    let fields: Vec<QueryField> = columns
        .iter()
        .map(|column| QueryField {
            name: column.name_str().to_string(),
            data_type: (column.column_type() as u8).to_string(),
        })
        .collect();

    let row_count = if fields.is_empty() {
        result.affected_rows()
    } else {
        rows.len() as u64
    };

    let projected = rows
        .iter()
        .map(|row| {
            (0..fields.len())
                .map(|idx| row.as_ref(idx).map(mysql_value_to_json).unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    Ok(QueryResult {
        fields,
        rows: projected,
        row_count,
    })
}

fn json_to_mysql_param(value: &Value) -> MySqlValue {
    match value {
        Value::Null => MySqlValue::NULL,
        Value::Bool(b) => MySqlValue::Int(i64::from(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => MySqlValue::Int(i),
            (None, Some(u)) => MySqlValue::UInt(u),
            _ => MySqlValue::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => MySqlValue::Bytes(s.clone().into_bytes()),
        other => MySqlValue::Bytes(other.to_string().into_bytes()),
    }
}

fn mysql_value_to_json(value: &MySqlValue) -> Value {
    match value {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Bytes(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        MySqlValue::Int(i) => json!(i),
        MySqlValue::UInt(u) => json!(u),
        MySqlValue::Float(f) => json!(f),
        MySqlValue::Double(d) => json!(d),
        MySqlValue::Date(year, month, day, hour, minute, second, micros) => {
            if *hour == 0 && *minute == 0 && *second == 0 && *micros == 0 {
                Value::String(format!("{year:04}-{month:02}-{day:02}"))
            } else if *micros == 0 {
                Value::String(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
                ))
            } else {
                Value::String(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
                ))
            }
        }
        MySqlValue::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if *negative { "-" } else { "" };
            let total_hours = *days * 24 + u32::from(*hours);
            if *micros == 0 {
                Value::String(format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}"))
            } else {
                Value::String(format!(
                    "{sign}{total_hours:02}:{minutes:02}:{seconds:02}.{micros:06}"
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_projection() {
        assert_eq!(mysql_value_to_json(&MySqlValue::NULL), Value::Null);
        assert_eq!(mysql_value_to_json(&MySqlValue::Int(-7)), json!(-7));
        assert_eq!(mysql_value_to_json(&MySqlValue::UInt(7)), json!(7));
        assert_eq!(
            mysql_value_to_json(&MySqlValue::Bytes(b"abc".to_vec())),
            json!("abc")
        );
    }

    #[test]
    fn test_date_and_time_rendering() {
        assert_eq!(
            mysql_value_to_json(&MySqlValue::Date(2024, 3, 9, 0, 0, 0, 0)),
            json!("2024-03-09")
        );
        assert_eq!(
            mysql_value_to_json(&MySqlValue::Date(2024, 3, 9, 13, 5, 7, 0)),
            json!("2024-03-09 13:05:07")
        );
        assert_eq!(
            mysql_value_to_json(&MySqlValue::Time(true, 1, 2, 3, 4, 0)),
            json!("-26:03:04")
        );
    }

    #[test]
    fn test_param_mapping() {
        assert_eq!(json_to_mysql_param(&json!(null)), MySqlValue::NULL);
        assert_eq!(json_to_mysql_param(&json!(true)), MySqlValue::Int(1));
        assert_eq!(json_to_mysql_param(&json!(5)), MySqlValue::Int(5));
        assert_eq!(
            json_to_mysql_param(&json!("x")),
            MySqlValue::Bytes(b"x".to_vec())
        );
        assert_eq!(
            json_to_mysql_param(&json!([1, 2])),
            MySqlValue::Bytes(b"[1,2]".to_vec())
        );
    }
}
