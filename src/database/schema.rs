use sqlx::{Executor, MySqlConnection};

/// Table definitions, in dependency order. Every statement is idempotent.
pub const TABLE_CREATE_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS user (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        email VARCHAR(255) NOT NULL,
        password_hash VARCHAR(255) NOT NULL,
        INDEX (email)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS menu (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        title VARCHAR(255) NOT NULL,
        description TEXT NOT NULL,
        image VARCHAR(1024) NOT NULL,
        price DOUBLE NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS franchise (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        name VARCHAR(255) NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS store (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        franchiseId BIGINT NOT NULL,
        name VARCHAR(255) NOT NULL,
        FOREIGN KEY (franchiseId) REFERENCES franchise(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS userRole (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        userId BIGINT NOT NULL,
        role VARCHAR(32) NOT NULL,
        objectId BIGINT NOT NULL,
        FOREIGN KEY (userId) REFERENCES user(id),
        INDEX (objectId)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS auth (
        token VARCHAR(512) PRIMARY KEY,
        userId BIGINT NOT NULL,
        FOREIGN KEY (userId) REFERENCES user(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dinerOrder (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        dinerId BIGINT NOT NULL,
        franchiseId BIGINT NOT NULL,
        storeId BIGINT NOT NULL,
        date DATETIME NOT NULL,
        INDEX (date),
        INDEX (dinerId),
        INDEX (franchiseId),
        INDEX (storeId)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orderItem (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        orderId BIGINT NOT NULL,
        menuId BIGINT NOT NULL,
        description VARCHAR(255) NOT NULL,
        price DOUBLE NOT NULL,
        FOREIGN KEY (orderId) REFERENCES dinerOrder(id),
        FOREIGN KEY (menuId) REFERENCES menu(id)
    )
    "#,
];

/// Create the database if needed and select it on `conn`.
///
/// `database` is spliced into the statement, so callers must pass a
/// validated identifier (see `AppConfig::validate`).
pub async fn create_database(conn: &mut MySqlConnection, database: &str) -> sqlx::Result<()> {
    let sql = format!("CREATE DATABASE IF NOT EXISTS `{}`", database);
    conn.execute(sql.as_str()).await?;
    use_database(conn, database).await
}

pub async fn use_database(conn: &mut MySqlConnection, database: &str) -> sqlx::Result<()> {
    let sql = format!("USE `{}`", database);
    conn.execute(sql.as_str()).await?;
    Ok(())
}

pub async fn create_tables(conn: &mut MySqlConnection) -> sqlx::Result<()> {
    for statement in TABLE_CREATE_STATEMENTS {
        conn.execute(*statement).await?;
    }
    Ok(())
}
