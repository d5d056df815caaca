//! Parameterized statement execution over a borrowed connection.

use super::connection::ConnectionHealth;
use super::error::{DbError, Result};
use crate::logging::{DbLogData, LogShipper};
use sqlx::mysql::{MySqlArguments, MySqlRow};
use sqlx::query::{Query, QueryAs};
use sqlx::{FromRow, MySql, MySqlConnection};
use std::time::Instant;

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        QueryParam::Int(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        QueryParam::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        QueryParam::Text(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        QueryParam::Text(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(QueryParam::Null)
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOutcome {
    pub last_insert_id: i64,
    pub rows_affected: u64,
}

/// Tables addressable by [`Session::get_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    User,
    Menu,
    Franchise,
    Store,
    DinerOrder,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::User => "user",
            Table::Menu => "menu",
            Table::Franchise => "franchise",
            Table::Store => "store",
            Table::DinerOrder => "dinerOrder",
        }
    }
}

fn bind_query<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &'q [QueryParam],
) -> Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::Text(v) => query.bind(v.as_str()),
            QueryParam::Null => query.bind(None::<String>),
        };
    }
    query
}

fn bind_query_as<'q, O>(
    mut query: QueryAs<'q, MySql, O, MySqlArguments>,
    params: &'q [QueryParam],
) -> QueryAs<'q, MySql, O, MySqlArguments> {
    for param in params {
        query = match param {
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::Text(v) => query.bind(v.as_str()),
            QueryParam::Null => query.bind(None::<String>),
        };
    }
    query
}

/// Runs statements against one connection (or transaction) and reports each
/// to the log shipper. Values are always bound, never spliced.
pub struct Session<'c> {
    conn: &'c mut MySqlConnection,
    shipper: Option<&'c LogShipper>,
    health: Option<&'c ConnectionHealth>,
}

impl<'c> Session<'c> {
    pub fn new(conn: &'c mut MySqlConnection, shipper: Option<&'c LogShipper>) -> Self {
        Self {
            conn,
            shipper,
            health: None,
        }
    }

    /// Report lost-connection failures to `health`.
    pub fn with_health(mut self, health: &'c ConnectionHealth) -> Self {
        self.health = Some(health);
        self
    }

    fn observe<T>(&self, result: sqlx::Result<T>) -> Result<T> {
        let result = result.map_err(DbError::from);
        match self.health {
            Some(health) => health.observe(result),
            None => result,
        }
    }

    pub fn connection(&mut self) -> &mut MySqlConnection {
        &mut *self.conn
    }

    pub async fn fetch_all<T>(&mut self, sql: &str, params: &[QueryParam]) -> Result<Vec<T>>
    where
        T: for<'r> FromRow<'r, MySqlRow> + Send + Unpin,
    {
        let started = Instant::now();
        let result = bind_query_as(sqlx::query_as::<MySql, T>(sql), params)
            .fetch_all(&mut *self.conn)
            .await;
        self.record(sql, params, started, result.as_ref().ok().map(|rows| rows.len() as u64));
        self.observe(result)
    }

    pub async fn fetch_optional<T>(&mut self, sql: &str, params: &[QueryParam]) -> Result<Option<T>>
    where
        T: for<'r> FromRow<'r, MySqlRow> + Send + Unpin,
    {
        let started = Instant::now();
        let result = bind_query_as(sqlx::query_as::<MySql, T>(sql), params)
            .fetch_optional(&mut *self.conn)
            .await;
        self.record(
            sql,
            params,
            started,
            result.as_ref().ok().map(|row| row.is_some() as u64),
        );
        self.observe(result)
    }

    pub async fn fetch_rows(&mut self, sql: &str, params: &[QueryParam]) -> Result<Vec<MySqlRow>> {
        let started = Instant::now();
        let result = bind_query(sqlx::query(sql), params)
            .fetch_all(&mut *self.conn)
            .await;
        self.record(sql, params, started, result.as_ref().ok().map(|rows| rows.len() as u64));
        self.observe(result)
    }

    pub async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> Result<QueryOutcome> {
        let started = Instant::now();
        let result = bind_query(sqlx::query(sql), params)
            .execute(&mut *self.conn)
            .await;
        self.record(sql, params, started, result.as_ref().ok().map(|r| r.rows_affected()));
        let done = self.observe(result)?;
        Ok(QueryOutcome {
            last_insert_id: done.last_insert_id() as i64,
            rows_affected: done.rows_affected(),
        })
    }

    /// Look up the `id` of the row in `table` whose `field` equals `value`.
    ///
    /// `field` is spliced into the statement and must be a fixed column name.
    pub async fn get_id(&mut self, table: Table, field: &'static str, value: i64) -> Result<i64> {
        let sql = format!("SELECT id FROM {} WHERE {}=?", table.as_str(), field);
        let row: Option<(i64,)> = self.fetch_optional(&sql, &[value.into()]).await?;
        row.map(|(id,)| id)
            .ok_or_else(|| DbError::not_found(format!("{} not found", table.as_str())))
    }

    fn record(&self, sql: &str, params: &[QueryParam], started: Instant, row_count: Option<u64>) {
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            sql = %sql.trim(),
            params = params.len(),
            duration_ms,
            rows = ?row_count,
            "statement executed"
        );
        if let Some(shipper) = self.shipper {
            shipper.db(DbLogData {
                query: sql.trim().to_string(),
                param_count: params.len(),
                duration_ms,
                row_count,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_from_values() {
        assert_eq!(QueryParam::from(3_i64), QueryParam::Int(3));
        assert_eq!(QueryParam::from("x"), QueryParam::Text("x".into()));
        assert_eq!(QueryParam::from(None::<String>), QueryParam::Null);
        assert_eq!(QueryParam::from(Some(1.5_f64)), QueryParam::Float(1.5));
    }

    #[test]
    fn table_names() {
        assert_eq!(Table::DinerOrder.as_str(), "dinerOrder");
        assert_eq!(Table::Menu.as_str(), "menu");
    }
}
