//! Full-refresh load of a cleaned table into PostgreSQL.
//!
//! One connection, one transaction: the schema is created if needed, the
//! destination table is dropped and recreated from the [`TableSpec`], then
//! every row goes in through the same parameterized `INSERT`. Postgres DDL is
//! transactional, so a failure anywhere rolls back to the previous table.
//! The connection is closed on both the success and failure paths.

use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use sqlx::{
    Connection, PgConnection, Postgres, Transaction,
    postgres::{PgArguments, PgConnectOptions},
    query::Query,
};

use crate::{
    data::{Value, parse_naive_date, parse_naive_datetime},
    error::LoadError,
    normalize::CleanTable,
    schema::{SqlType, TableSpec},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub table: String,
    pub rows_inserted: usize,
}

/// A cell converted to the Rust type its destination column binds as.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Text(Option<String>),
    Timestamp(Option<NaiveDateTime>),
    Date(Option<NaiveDate>),
    Bigint(Option<i64>),
    Double(Option<f64>),
    Boolean(Option<bool>),
}

impl BindValue {
    fn null(sql_type: SqlType) -> Self {
        match sql_type {
            SqlType::Text => BindValue::Text(None),
            SqlType::Timestamp => BindValue::Timestamp(None),
            SqlType::Date => BindValue::Date(None),
            SqlType::Bigint => BindValue::Bigint(None),
            SqlType::Double => BindValue::Double(None),
            SqlType::Boolean => BindValue::Boolean(None),
        }
    }

    fn bind<'q>(
        self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            BindValue::Text(v) => query.bind(v),
            BindValue::Timestamp(v) => query.bind(v),
            BindValue::Date(v) => query.bind(v),
            BindValue::Bigint(v) => query.bind(v),
            BindValue::Double(v) => query.bind(v),
            BindValue::Boolean(v) => query.bind(v),
        }
    }
}

fn mismatch(row: usize, column: &str, sql_type: SqlType, value: &Value) -> LoadError {
    LoadError::TypeMismatch {
        row,
        column: column.to_string(),
        expected: sql_type.describe(),
        value: value.as_display(),
    }
}

fn convert(
    row: usize,
    column: &str,
    sql_type: SqlType,
    value: &Value,
) -> Result<BindValue, LoadError> {
    let fail = || mismatch(row, column, sql_type, value);
    let bound = match (sql_type, value) {
        (SqlType::Text, value) => BindValue::Text(Some(value.as_display())),
        (SqlType::Timestamp, Value::DateTime(dt)) => BindValue::Timestamp(Some(*dt)),
        (SqlType::Timestamp, Value::Date(d)) => {
            BindValue::Timestamp(Some(d.and_hms_opt(0, 0, 0).ok_or_else(fail)?))
        }
        (SqlType::Timestamp, Value::Text(s)) => {
            BindValue::Timestamp(Some(parse_naive_datetime(s).map_err(|_| fail())?))
        }
        (SqlType::Date, Value::Date(d)) => BindValue::Date(Some(*d)),
        (SqlType::Date, Value::DateTime(dt)) => BindValue::Date(Some(dt.date())),
        (SqlType::Date, Value::Text(s)) => {
            BindValue::Date(Some(parse_naive_date(s).map_err(|_| fail())?))
        }
        (SqlType::Bigint, Value::Text(s)) => {
            BindValue::Bigint(Some(s.trim().parse::<i64>().map_err(|_| fail())?))
        }
        (SqlType::Double, Value::Text(s)) => {
            BindValue::Double(Some(s.trim().parse::<f64>().map_err(|_| fail())?))
        }
        (SqlType::Boolean, Value::Text(s)) => {
            let parsed = match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => true,
                "false" | "f" | "no" | "n" | "0" => false,
                _ => return Err(fail()),
            };
            BindValue::Boolean(Some(parsed))
        }
        (SqlType::Bigint | SqlType::Double | SqlType::Boolean, _) => return Err(fail()),
    };
    Ok(bound)
}

/// Converts every row into bind values in spec column order.
///
/// Spec columns the table does not carry bind as null; table columns the
/// spec does not list are ignored. Row numbers in errors are 1-based.
pub fn prepare_rows(spec: &TableSpec, table: &CleanTable) -> Result<Vec<Vec<BindValue>>, LoadError> {
    let sources = spec
        .columns
        .iter()
        .map(|column| table.column_index(&column.name))
        .collect::<Vec<_>>();
    for (column, source) in spec.columns.iter().zip(&sources) {
        if source.is_none() {
            debug!("Column '{}' absent from export; loading nulls", column.name);
        }
    }

    table
        .rows()
        .iter()
        .enumerate()
        .map(|(idx, record)| {
            spec.columns
                .iter()
                .zip(&sources)
                .map(|(column, source)| {
                    match source.and_then(|i| record.values().get(i)).and_then(Option::as_ref) {
                        Some(value) => convert(idx + 1, &column.name, column.sql_type, value),
                        None => Ok(BindValue::null(column.sql_type)),
                    }
                })
                .collect()
        })
        .collect()
}

/// Replaces `spec`'s table with the contents of `table`.
pub async fn replace_table(
    options: &PgConnectOptions,
    spec: &TableSpec,
    table: &CleanTable,
) -> Result<LoadSummary, LoadError> {
    // Conversion happens before connecting so a bad value never opens a transaction.
    let rows = prepare_rows(spec, table)?;

    let mut conn = PgConnection::connect_with(options)
        .await
        .map_err(LoadError::Connect)?;
    let outcome = refresh(&mut conn, spec, rows).await;
    let closed = conn.close().await.map_err(LoadError::Close);
    let summary = outcome?;
    closed?;
    Ok(summary)
}

async fn refresh(
    conn: &mut PgConnection,
    spec: &TableSpec,
    rows: Vec<Vec<BindValue>>,
) -> Result<LoadSummary, LoadError> {
    let mut tx = conn.begin().await.map_err(|source| LoadError::Statement {
        statement: "BEGIN".to_string(),
        source,
    })?;
    let outcome = write_table(&mut tx, spec, rows).await;
    match outcome {
        Ok(summary) => {
            tx.commit().await.map_err(LoadError::Commit)?;
            info!(
                "Loaded {} row(s) into {}",
                summary.rows_inserted, summary.table
            );
            Ok(summary)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("Rollback after failed load also failed: {rollback_err}");
            }
            Err(err)
        }
    }
}

async fn write_table(
    tx: &mut Transaction<'_, Postgres>,
    spec: &TableSpec,
    rows: Vec<Vec<BindValue>>,
) -> Result<LoadSummary, LoadError> {
    for statement in spec.refresh_statements() {
        debug!("Executing: {statement}");
        sqlx::query(&statement)
            .execute(&mut **tx)
            .await
            .map_err(|source| LoadError::Statement {
                statement: statement.clone(),
                source,
            })?;
    }

    let insert = spec.insert_sql();
    let mut inserted = 0usize;
    for (idx, values) in rows.into_iter().enumerate() {
        let query = values
            .into_iter()
            .fold(sqlx::query::<Postgres>(&insert), |query, value| value.bind(query));
        query
            .execute(&mut **tx)
            .await
            .map_err(|source| LoadError::Insert {
                row: idx + 1,
                source,
            })?;
        inserted += 1;
    }

    Ok(LoadSummary {
        table: format!("{}.{}", spec.schema, spec.table),
        rows_inserted: inserted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSpec;

    fn spec(columns: &[(&str, SqlType)]) -> TableSpec {
        TableSpec {
            schema: "university".into(),
            table: "admission".into(),
            columns: columns
                .iter()
                .map(|(name, ty)| ColumnSpec::new(*name, *ty))
                .collect(),
        }
    }

    #[test]
    fn prepare_rows_follows_spec_order_and_fills_nulls() {
        let spec = spec(&[
            ("start", SqlType::Timestamp),
            ("full_name", SqlType::Text),
            ("scholarships", SqlType::Text),
        ]);
        let started = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let table = CleanTable::new(
            vec!["full_name".into(), "start".into(), "extra".into()],
            vec![vec![
                Some(Value::Text("Jane Doe".into())),
                Some(Value::DateTime(started)),
                Some(Value::Text("ignored".into())),
            ]],
        );
        let rows = prepare_rows(&spec, &table).unwrap();
        assert_eq!(
            rows,
            vec![vec![
                BindValue::Timestamp(Some(started)),
                BindValue::Text(Some("Jane Doe".into())),
                BindValue::Text(None),
            ]]
        );
    }

    #[test]
    fn text_columns_accept_coerced_values() {
        let date = NaiveDate::from_ymd_opt(2001, 7, 4).unwrap();
        let bound = convert(1, "date_of_birth", SqlType::Text, &Value::Date(date)).unwrap();
        assert_eq!(bound, BindValue::Text(Some("2001-07-04".into())));
    }

    #[test]
    fn unparseable_typed_value_is_a_mismatch() {
        let err = convert(3, "start", SqlType::Timestamp, &Value::Text("soon".into()))
            .unwrap_err();
        match err {
            LoadError::TypeMismatch {
                row,
                column,
                expected,
                value,
            } => {
                assert_eq!(row, 3);
                assert_eq!(column, "start");
                assert_eq!(expected, "timestamp");
                assert_eq!(value, "soon");
            }
            other => panic!("expected type mismatch, got {other:?}"),
        }
    }

    #[test]
    fn numeric_and_boolean_columns_parse_text() {
        assert_eq!(
            convert(1, "age", SqlType::Bigint, &Value::Text(" 19 ".into())).unwrap(),
            BindValue::Bigint(Some(19))
        );
        assert_eq!(
            convert(1, "score", SqlType::Double, &Value::Text("3.5".into())).unwrap(),
            BindValue::Double(Some(3.5))
        );
        assert_eq!(
            convert(1, "sponsored", SqlType::Boolean, &Value::Text("Yes".into())).unwrap(),
            BindValue::Boolean(Some(true))
        );
        assert!(convert(1, "sponsored", SqlType::Boolean, &Value::Text("maybe".into())).is_err());
    }
}
