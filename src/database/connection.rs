//! Single reclaimable MySQL connection.
//!
//! [`ConnectionManager`] owns at most one live connection. It is opened
//! lazily, handed out through a [`ConnectionLease`] that serializes access,
//! and closed by an [`IdleTimer`] once no lease has been taken for the
//! configured connect timeout. Dropping a lease re-arms the timer, so every
//! operation resets the idle period on all exit paths.

use super::error::{DbError, Result};
use super::idle_timer::IdleTimer;
use super::schema;
use super::session::Session;
use crate::config::ConnectionConfig;
use crate::logging::LogShipper;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::{ConnectOptions, Connection, MySqlConnection};
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

type Slot = Arc<Mutex<Option<MySqlConnection>>>;

/// Set when a statement fails because the session itself was lost. The next
/// acquire discards the handle instead of handing it out again.
#[derive(Debug, Default)]
pub struct ConnectionHealth {
    lost: AtomicBool,
}

impl ConnectionHealth {
    /// Pass `result` through, remembering a lost connection.
    pub fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(DbError::Connection(_)) = &result {
            self.lost.store(true, Ordering::Release);
        }
        result
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn take_lost(&self) -> bool {
        self.lost.swap(false, Ordering::AcqRel)
    }
}

pub struct ConnectionManager {
    config: ConnectionConfig,
    slot: Slot,
    idle_timer: Arc<IdleTimer>,
    health: Arc<ConnectionHealth>,
    initialized: Shared<BoxFuture<'static, bool>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("idle_timer_armed", &self.idle_timer.is_armed())
            .finish()
    }
}

impl ConnectionManager {
    /// Create the manager and start bootstrapping immediately.
    ///
    /// `bootstrap` runs on the first connection (not yet bound to a database)
    /// after the database and tables exist; the connection is kept for reuse.
    /// Must be called from within a tokio runtime.
    pub fn new<F>(config: ConnectionConfig, bootstrap: F) -> Self
    where
        F: for<'c> FnOnce(&'c mut MySqlConnection) -> BoxFuture<'c, Result<()>> + Send + 'static,
    {
        let slot: Slot = Arc::new(Mutex::new(None));
        let idle_timer = Arc::new(IdleTimer::new());

        let task = tokio::spawn(initialize(
            config.clone(),
            slot.clone(),
            idle_timer.clone(),
            bootstrap,
        ));
        let initialized = task
            .map(|joined| joined.unwrap_or(false))
            .boxed()
            .shared();

        Self {
            config,
            slot,
            idle_timer,
            health: Arc::new(ConnectionHealth::default()),
            initialized,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.config.connect_timeout()
    }

    /// Wait for bootstrap to finish. Returns whether it succeeded.
    pub async fn initialized(&self) -> bool {
        self.initialized.clone().await
    }

    /// Wait for bootstrap, cancel the idle timer, and hand out the connection,
    /// opening it first if needed. Concurrent callers queue on the lease.
    pub async fn acquire(&self, shipper: Option<LogShipper>) -> Result<ConnectionLease> {
        self.initialized().await;

        let mut slot = self.slot.clone().lock_owned().await;
        // Only disarm once the slot is ours: a timer already past its sleep is
        // then either finished or still waiting for the lock, never mid-close.
        self.idle_timer.disarm();

        if self.health.take_lost() && slot.take().is_some() {
            warn!(database = %self.config.database, "Discarded lost database connection");
        }

        if slot.is_none() {
            *slot = Some(connect(&self.config, true).await?);
            debug!(database = %self.config.database, "Opened database connection");
        }

        let conn = OwnedMutexGuard::try_map(slot, |slot| slot.as_mut())
            .map_err(|_| DbError::Connection("connection slot empty".to_string()))?;

        Ok(ConnectionLease {
            conn,
            slot: self.slot.clone(),
            idle_timer: self.idle_timer.clone(),
            idle_after: self.idle_timeout(),
            health: self.health.clone(),
            shipper,
        })
    }

    /// Probe the connection with a ping. Never fails; a missing or broken
    /// connection reports `false`. Waits for any outstanding lease.
    pub async fn is_alive(&self) -> bool {
        let mut slot = self.slot.lock().await;
        match slot.as_mut() {
            Some(conn) => match conn.ping().await {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, "Connection ping failed");
                    false
                }
            },
            None => false,
        }
    }

    /// Cancel the idle timer and close the connection now.
    pub async fn close_now(&self) {
        self.idle_timer.disarm();
        close_if_alive(self.slot.clone()).await;
    }

    pub fn idle_timer_armed(&self) -> bool {
        self.idle_timer.is_armed()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.idle_timer.disarm();
    }
}

/// Exclusive access to the managed connection for the duration of one
/// operation. Dropping the lease schedules the idle close.
pub struct ConnectionLease {
    conn: OwnedMappedMutexGuard<Option<MySqlConnection>, MySqlConnection>,
    slot: Slot,
    idle_timer: Arc<IdleTimer>,
    idle_after: Duration,
    health: Arc<ConnectionHealth>,
    shipper: Option<LogShipper>,
}

impl ConnectionLease {
    pub fn session(&mut self) -> Session<'_> {
        Session::new(&mut *self.conn, self.shipper.as_ref()).with_health(&self.health)
    }

    pub fn shipper(&self) -> Option<&LogShipper> {
        self.shipper.as_ref()
    }

    /// Split into the raw connection, the shipper and the health flag, for
    /// callers that open a transaction and still want statements logged.
    pub fn parts(&mut self) -> (&mut MySqlConnection, Option<&LogShipper>, &ConnectionHealth) {
        (&mut *self.conn, self.shipper.as_ref(), &self.health)
    }
}

impl Deref for ConnectionLease {
    type Target = MySqlConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for ConnectionLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        // The guard is released right after this body, before the timer can
        // reach its lock.
        schedule_idle_close(&self.idle_timer, self.idle_after, self.slot.clone());
    }
}

fn schedule_idle_close(timer: &IdleTimer, after: Duration, slot: Slot) {
    timer.arm(after, close_if_alive(slot));
}

fn close_if_alive(slot: Slot) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let mut slot = slot.lock().await;
        let Some(mut conn) = slot.take() else {
            return;
        };

        match conn.ping().await {
            Ok(()) => {
                if let Err(e) = conn.close().await {
                    debug!(error = %e, "Error while closing idle connection");
                }
                debug!("Closed idle database connection");
            }
            Err(e) => {
                // Already gone; dropping the handle is all that is left.
                debug!(error = %e, "Idle connection was already closed");
            }
        }
    }
}

fn connect_options(config: &ConnectionConfig, select_database: bool) -> MySqlConnectOptions {
    let options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .disable_statement_logging();

    if select_database {
        options.database(&config.database)
    } else {
        options
    }
}

async fn connect(config: &ConnectionConfig, select_database: bool) -> Result<MySqlConnection> {
    let options = connect_options(config, select_database);
    match tokio::time::timeout(config.connect_timeout(), options.connect()).await {
        Ok(result) => result.map_err(|e| DbError::Connection(e.to_string())),
        Err(_) => Err(DbError::Connection(format!(
            "timed out after {}ms connecting to {}:{}",
            config.connect_timeout_ms, config.host, config.port
        ))),
    }
}

async fn initialize<F>(
    config: ConnectionConfig,
    slot: Slot,
    idle_timer: Arc<IdleTimer>,
    bootstrap: F,
) -> bool
where
    F: for<'c> FnOnce(&'c mut MySqlConnection) -> BoxFuture<'c, Result<()>> + Send + 'static,
{
    let mut guard = slot.lock().await;

    let result = async {
        let mut conn = connect(&config, false).await?;
        schema::create_database(&mut conn, &config.database).await?;
        schema::create_tables(&mut conn).await?;
        bootstrap(&mut conn).await?;
        Ok::<_, DbError>(conn)
    }
    .await;

    let ok = match result {
        Ok(conn) => {
            *guard = Some(conn);
            info!(database = %config.database, "Database initialized");
            true
        }
        Err(e) => {
            error!(
                error = %e,
                connection = ?config,
                "Error initializing database"
            );
            false
        }
    };

    drop(guard);
    schedule_idle_close(&idle_timer, config.connect_timeout(), slot);

    if !ok {
        warn!("Continuing without a bootstrapped database; operations will surface driver errors");
    }
    ok
}

/// Open a transaction on a leased connection.
pub async fn begin(conn: &mut MySqlConnection) -> Result<sqlx::Transaction<'_, sqlx::MySql>> {
    conn.begin().await.map_err(DbError::from)
}
