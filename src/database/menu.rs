use super::error::Result;
use super::Database;
use crate::model::MenuItem;

impl Database {
    pub async fn get_menu(&self) -> Result<Vec<MenuItem>> {
        let mut lease = self.acquire_connection().await?;
        lease
            .session()
            .fetch_all(
                "SELECT id, title, description, image, price FROM menu ORDER BY id",
                &[],
            )
            .await
    }

    /// Insert a menu item and return it with its assigned id.
    pub async fn add_menu_item(&self, item: &MenuItem) -> Result<MenuItem> {
        let mut lease = self.acquire_connection().await?;
        let inserted = lease
            .session()
            .execute(
                "INSERT INTO menu (title, description, image, price) VALUES (?, ?, ?, ?)",
                &[
                    item.title.as_str().into(),
                    item.description.as_str().into(),
                    item.image.as_str().into(),
                    item.price.into(),
                ],
            )
            .await?;

        Ok(MenuItem {
            id: inserted.last_insert_id,
            ..item.clone()
        })
    }
}
