//! Connection-managed data layer.
//!
//! [`Database`] wraps a [`ConnectionManager`] and exposes the domain
//! operations (users, menu, orders, franchises). Every operation takes the
//! single connection through a lease, so overlapping callers queue instead
//! of racing, and releases it on every exit path, which re-arms the idle
//! close.

mod connection;
pub mod error;
mod franchises;
mod idle_timer;
mod menu;
mod orders;
pub mod schema;
mod session;
mod users;

pub use connection::{ConnectionHealth, ConnectionLease, ConnectionManager};
pub use error::{DbError, Result};
pub use idle_timer::IdleTimer;
pub use orders::page_offset;
pub use session::{QueryOutcome, QueryParam, Session, Table};
pub use users::token_signature;

use crate::config::DbConfig;
use crate::logging::LogShipper;
use crate::model::{NewUser, Role, UserRole};
use futures::FutureExt;
use sqlx::mysql::MySqlRow;
use sqlx::MySqlConnection;
use tracing::info;

/// Credentials of the account created by `db.seed_admin`.
pub const DEFAULT_ADMIN_EMAIL: &str = "a@jwt.com";
const DEFAULT_ADMIN_NAME: &str = "常用名字";
const DEFAULT_ADMIN_PASSWORD: &str = "admin";

#[derive(Debug)]
pub struct Database {
    manager: ConnectionManager,
    list_per_page: u32,
    shipper: Option<LogShipper>,
}

impl Database {
    /// Construct the data layer and start bootstrapping the schema.
    ///
    /// Must be called from within a tokio runtime. Operations issued before
    /// bootstrap completes wait for it.
    pub fn new(config: DbConfig) -> Self {
        Self::with_log_shipper(config, None)
    }

    pub fn with_log_shipper(config: DbConfig, shipper: Option<LogShipper>) -> Self {
        let seed_admin = config.seed_admin;
        let manager = ConnectionManager::new(config.connection, move |conn| {
            bootstrap(conn, seed_admin).boxed()
        });

        Self {
            manager,
            list_per_page: config.list_per_page,
            shipper,
        }
    }

    pub fn list_per_page(&self) -> u32 {
        self.list_per_page
    }

    /// Resolves once schema bootstrap has finished; `false` if it failed.
    pub async fn wait_initialized(&self) -> bool {
        self.manager.initialized().await
    }

    /// Take the connection for a sequence of statements. Hold the lease no
    /// longer than needed: other operations wait for it.
    pub async fn acquire_connection(&self) -> Result<ConnectionLease> {
        self.manager.acquire(self.shipper.clone()).await
    }

    /// Run a read statement with bound parameters.
    pub async fn run_query(&self, sql: &str, params: &[QueryParam]) -> Result<Vec<MySqlRow>> {
        let mut lease = self.acquire_connection().await?;
        lease.session().fetch_rows(sql, params).await
    }

    /// Run a write statement with bound parameters.
    pub async fn execute(&self, sql: &str, params: &[QueryParam]) -> Result<QueryOutcome> {
        let mut lease = self.acquire_connection().await?;
        lease.session().execute(sql, params).await
    }

    /// Id of the row in `table` whose `field` equals `value`, or `NotFound`.
    pub async fn fetch_by_id(&self, table: Table, field: &'static str, value: i64) -> Result<i64> {
        let mut lease = self.acquire_connection().await?;
        lease.session().get_id(table, field, value).await
    }

    pub async fn is_connection_alive(&self) -> bool {
        self.manager.is_alive().await
    }

    pub async fn close_connection_now(&self) {
        self.manager.close_now().await
    }

    pub fn idle_close_pending(&self) -> bool {
        self.manager.idle_timer_armed()
    }
}

async fn bootstrap(conn: &mut MySqlConnection, seed_admin: bool) -> Result<()> {
    if !seed_admin {
        return Ok(());
    }

    let admin = NewUser {
        name: DEFAULT_ADMIN_NAME.to_string(),
        email: DEFAULT_ADMIN_EMAIL.to_string(),
        password: DEFAULT_ADMIN_PASSWORD.to_string(),
        roles: vec![UserRole::new(Role::Admin)],
    };

    match users::insert_user(&mut Session::new(conn, None), &admin).await {
        Ok(user) => {
            info!(user_id = user.id, "Seeded default admin");
            Ok(())
        }
        Err(DbError::Conflict(_)) => Ok(()),
        Err(e) => Err(e),
    }
}
