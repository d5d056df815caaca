use super::connection::begin;
use super::error::{DbError, Result};
use super::session::{QueryParam, Session, Table};
use super::Database;
use crate::model::{Franchise, FranchiseAdmin, Role, Store, User};
use tracing::{error, warn};

async fn load_admins(session: &mut Session<'_>, franchise_id: i64) -> Result<Vec<FranchiseAdmin>> {
    session
        .fetch_all(
            "SELECT u.id, u.name, u.email FROM userRole AS ur JOIN user AS u ON u.id=ur.userId WHERE ur.objectId=? AND ur.role='franchisee' ORDER BY u.id",
            &[franchise_id.into()],
        )
        .await
}

async fn load_stores(session: &mut Session<'_>, franchise_id: i64) -> Result<Vec<Store>> {
    session
        .fetch_all(
            "SELECT id, franchiseId, name FROM store WHERE franchiseId=? ORDER BY id",
            &[franchise_id.into()],
        )
        .await
}

async fn fill_franchise(session: &mut Session<'_>, franchise: &mut Franchise) -> Result<()> {
    franchise.admins = load_admins(session, franchise.id).await?;
    franchise.stores = load_stores(session, franchise.id).await?;
    Ok(())
}

fn franchise_from_row((id, name): (i64, String)) -> Franchise {
    Franchise {
        id,
        name,
        admins: Vec::new(),
        stores: Vec::new(),
    }
}

async fn remove_franchise(session: &mut Session<'_>, franchise_id: i64) -> Result<()> {
    session
        .execute("DELETE FROM store WHERE franchiseId=?", &[franchise_id.into()])
        .await?;
    session
        .execute(
            "DELETE FROM userRole WHERE objectId=? AND role='franchisee'",
            &[franchise_id.into()],
        )
        .await?;
    session
        .execute("DELETE FROM franchise WHERE id=?", &[franchise_id.into()])
        .await?;
    Ok(())
}

fn is_unique_violation(e: &DbError) -> bool {
    match e {
        DbError::Query(sqlx::Error::Database(db)) => db.is_unique_violation(),
        _ => false,
    }
}

impl Database {
    /// Create a franchise owned by the given admins. Every admin email must
    /// belong to an existing user; otherwise nothing is written.
    pub async fn create_franchise(&self, franchise: &Franchise) -> Result<Franchise> {
        let mut lease = self.acquire_connection().await?;
        let mut session = lease.session();

        let mut admins = Vec::with_capacity(franchise.admins.len());
        for admin in &franchise.admins {
            let found: Option<(i64, String)> = session
                .fetch_optional(
                    "SELECT id, name FROM user WHERE email=? LIMIT 1",
                    &[admin.email.as_str().into()],
                )
                .await?;
            let (id, name) = found.ok_or_else(|| {
                DbError::not_found(format!(
                    "unknown user for franchise admin {} provided",
                    admin.email
                ))
            })?;
            admins.push(FranchiseAdmin {
                id,
                name,
                email: admin.email.clone(),
            });
        }

        let inserted = session
            .execute(
                "INSERT INTO franchise (name) VALUES (?)",
                &[franchise.name.as_str().into()],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DbError::conflict(format!("franchise {} already exists", franchise.name))
                } else {
                    e
                }
            })?;
        let franchise_id = inserted.last_insert_id;

        for admin in &admins {
            session
                .execute(
                    "INSERT INTO userRole (userId, role, objectId) VALUES (?, ?, ?)",
                    &[
                        admin.id.into(),
                        Role::Franchisee.as_str().into(),
                        franchise_id.into(),
                    ],
                )
                .await?;
        }

        Ok(Franchise {
            id: franchise_id,
            name: franchise.name.clone(),
            admins,
            stores: Vec::new(),
        })
    }

    /// Remove a franchise together with its stores and franchisee roles.
    ///
    /// All-or-nothing: on any failure the transaction is rolled back and the
    /// caller sees a generic `Internal` error; the cause is only logged.
    pub async fn delete_franchise(&self, franchise_id: i64) -> Result<()> {
        let mut lease = self.acquire_connection().await?;
        let (conn, shipper, health) = lease.parts();
        let mut tx = health.observe(begin(conn).await)?;

        let mut session = Session::new(&mut *tx, shipper).with_health(health);
        let result = remove_franchise(&mut session, franchise_id).await;
        let result = match result {
            Ok(()) => health.observe(tx.commit().await.map_err(DbError::from)),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, franchise_id, "Rollback failed");
                }
                Err(e)
            }
        };

        result.map_err(|e| {
            error!(error = %e, franchise_id, "Unable to delete franchise");
            DbError::Internal("unable to delete franchise".to_string())
        })
    }

    /// List every franchise with its stores. Admins also see each
    /// franchise's admins.
    pub async fn get_franchises(&self, auth_user: Option<&User>) -> Result<Vec<Franchise>> {
        let is_admin = auth_user.is_some_and(|user| user.has_role(Role::Admin));

        let mut lease = self.acquire_connection().await?;
        let mut session = lease.session();

        let rows: Vec<(i64, String)> = session
            .fetch_all("SELECT id, name FROM franchise ORDER BY id", &[])
            .await?;

        let mut franchises = Vec::with_capacity(rows.len());
        for row in rows {
            let mut franchise = franchise_from_row(row);
            if is_admin {
                fill_franchise(&mut session, &mut franchise).await?;
            } else {
                franchise.stores = load_stores(&mut session, franchise.id).await?;
            }
            franchises.push(franchise);
        }
        Ok(franchises)
    }

    /// Franchises in which `user_id` holds the franchisee role.
    pub async fn get_user_franchises(&self, user_id: i64) -> Result<Vec<Franchise>> {
        let mut lease = self.acquire_connection().await?;
        let mut session = lease.session();

        let ids: Vec<(i64,)> = session
            .fetch_all(
                "SELECT objectId FROM userRole WHERE role='franchisee' AND userId=?",
                &[user_id.into()],
            )
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(",");
        let params: Vec<QueryParam> = ids.into_iter().map(|(id,)| id.into()).collect();
        let sql = format!(
            "SELECT id, name FROM franchise WHERE id IN ({}) ORDER BY id",
            placeholders
        );
        let rows: Vec<(i64, String)> = session.fetch_all(&sql, &params).await?;

        let mut franchises = Vec::with_capacity(rows.len());
        for row in rows {
            let mut franchise = franchise_from_row(row);
            fill_franchise(&mut session, &mut franchise).await?;
            franchises.push(franchise);
        }
        Ok(franchises)
    }

    /// A single franchise with admins and stores.
    pub async fn get_franchise(&self, franchise_id: i64) -> Result<Franchise> {
        let mut lease = self.acquire_connection().await?;
        let mut session = lease.session();

        let row: Option<(i64, String)> = session
            .fetch_optional(
                "SELECT id, name FROM franchise WHERE id=?",
                &[franchise_id.into()],
            )
            .await?;
        let mut franchise =
            franchise_from_row(row.ok_or_else(|| DbError::not_found("franchise not found"))?);
        fill_franchise(&mut session, &mut franchise).await?;
        Ok(franchise)
    }

    pub async fn create_store(&self, franchise_id: i64, name: &str) -> Result<Store> {
        let mut lease = self.acquire_connection().await?;
        let mut session = lease.session();

        let franchise_id = session.get_id(Table::Franchise, "id", franchise_id).await?;
        let inserted = session
            .execute(
                "INSERT INTO store (franchiseId, name) VALUES (?, ?)",
                &[franchise_id.into(), name.into()],
            )
            .await?;

        Ok(Store {
            id: inserted.last_insert_id,
            franchise_id,
            name: name.to_string(),
        })
    }

    /// Delete a store of the given franchise. Deleting a missing store is a
    /// no-op.
    pub async fn delete_store(&self, franchise_id: i64, store_id: i64) -> Result<()> {
        let mut lease = self.acquire_connection().await?;
        lease
            .session()
            .execute(
                "DELETE FROM store WHERE franchiseId=? AND id=?",
                &[franchise_id.into(), store_id.into()],
            )
            .await?;
        Ok(())
    }
}
