use super::connection::begin;
use super::error::{DbError, Result};
use super::session::{Session, Table};
use super::Database;
use crate::model::{DinerOrder, OrderItem, OrdersPage, User};
use chrono::NaiveDateTime;
use tracing::warn;

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    #[sqlx(rename = "franchiseId")]
    franchise_id: i64,
    #[sqlx(rename = "storeId")]
    store_id: i64,
    date: NaiveDateTime,
}

/// Zero-based row offset of a 1-based `page`. Page 0 is rejected.
pub fn page_offset(page: u32, per_page: u32) -> Result<u64> {
    if page == 0 {
        return Err(DbError::InvalidInput("page must be at least 1".to_string()));
    }
    Ok(u64::from(page - 1) * u64::from(per_page))
}

async fn insert_order(
    session: &mut Session<'_>,
    diner_id: i64,
    order: &DinerOrder,
) -> Result<DinerOrder> {
    let inserted = session
        .execute(
            "INSERT INTO dinerOrder (dinerId, franchiseId, storeId, date) VALUES (?, ?, ?, NOW())",
            &[diner_id.into(), order.franchise_id.into(), order.store_id.into()],
        )
        .await?;
    let order_id = inserted.last_insert_id;

    for item in &order.items {
        let menu_id = session.get_id(Table::Menu, "id", item.menu_id).await?;
        session
            .execute(
                "INSERT INTO orderItem (orderId, menuId, description, price) VALUES (?, ?, ?, ?)",
                &[
                    order_id.into(),
                    menu_id.into(),
                    item.description.as_str().into(),
                    item.price.into(),
                ],
            )
            .await?;
    }

    let date: Option<(NaiveDateTime,)> = session
        .fetch_optional("SELECT date FROM dinerOrder WHERE id=?", &[order_id.into()])
        .await?;

    Ok(DinerOrder {
        id: order_id,
        date: date.map(|(date,)| date),
        ..order.clone()
    })
}

impl Database {
    /// One page of `user`'s orders, oldest first, each with its items.
    pub async fn get_orders(&self, user: &User, page: u32) -> Result<OrdersPage> {
        let per_page = self.list_per_page();
        let offset = page_offset(page, per_page)?;

        let mut lease = self.acquire_connection().await?;
        let mut session = lease.session();

        let rows: Vec<OrderRow> = session
            .fetch_all(
                "SELECT id, franchiseId, storeId, date FROM dinerOrder WHERE dinerId=? ORDER BY id LIMIT ?, ?",
                &[user.id.into(), (offset as i64).into(), i64::from(per_page).into()],
            )
            .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let items: Vec<OrderItem> = session
                .fetch_all(
                    "SELECT id, menuId, description, price FROM orderItem WHERE orderId=? ORDER BY id",
                    &[row.id.into()],
                )
                .await?;
            orders.push(DinerOrder {
                id: row.id,
                franchise_id: row.franchise_id,
                store_id: row.store_id,
                date: Some(row.date),
                items,
            });
        }

        Ok(OrdersPage {
            diner_id: user.id,
            orders,
            page,
        })
    }

    /// Record an order and its items atomically. Every item must reference
    /// an existing menu entry.
    pub async fn add_diner_order(&self, user: &User, order: &DinerOrder) -> Result<DinerOrder> {
        let mut lease = self.acquire_connection().await?;
        let (conn, shipper, health) = lease.parts();
        let mut tx = health.observe(begin(conn).await)?;

        let mut session = Session::new(&mut *tx, shipper).with_health(health);
        let result = insert_order(&mut session, user.id, order).await;
        match result {
            Ok(created) => {
                health.observe(tx.commit().await.map_err(DbError::from))?;
                Ok(created)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Failed to roll back order insert");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_page_starts_at_zero() {
        assert_eq!(page_offset(1, 10).unwrap(), 0);
        assert_eq!(page_offset(2, 10).unwrap(), 10);
        assert_eq!(page_offset(5, 3).unwrap(), 12);
    }

    #[test]
    fn page_zero_is_invalid() {
        let err = page_offset(0, 10).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn large_pages_do_not_overflow() {
        assert_eq!(
            page_offset(u32::MAX, u32::MAX).unwrap(),
            u64::from(u32::MAX - 1) * u64::from(u32::MAX)
        );
    }
}
