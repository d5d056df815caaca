use super::error::{DbError, Result};
use super::session::{Session, Table};
use super::Database;
use crate::model::{NewUser, Role, User, UserRole};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    email: String,
    password_hash: String,
}

#[derive(sqlx::FromRow)]
struct RoleRow {
    role: String,
    #[sqlx(rename = "objectId")]
    object_id: i64,
}

/// Revocable identity of a session token: its third dot-separated segment,
/// or the empty string when there is none.
pub fn token_signature(token: &str) -> &str {
    token.split('.').nth(2).unwrap_or("")
}

async fn hash_password(password: &str) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| DbError::Hashing(e.to_string()))
    })
    .await
    .map_err(|e| DbError::Hashing(e.to_string()))?
}

async fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash).map_err(|e| DbError::Hashing(e.to_string()))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|e| DbError::Hashing(e.to_string()))?
}

async fn find_by_email(session: &mut Session<'_>, email: &str) -> Result<Option<UserRow>> {
    session
        .fetch_optional(
            "SELECT id, name, email, password_hash FROM user WHERE email=? LIMIT 1",
            &[email.into()],
        )
        .await
}

async fn load_roles(session: &mut Session<'_>, user_id: i64) -> Result<Vec<UserRole>> {
    let rows: Vec<RoleRow> = session
        .fetch_all(
            "SELECT role, objectId FROM userRole WHERE userId=? ORDER BY id",
            &[user_id.into()],
        )
        .await?;

    rows.into_iter()
        .map(|row| {
            let role = row
                .role
                .parse::<Role>()
                .map_err(|_| DbError::Internal(format!("unknown role '{}'", row.role)))?;
            Ok(UserRole {
                role,
                object_id: row.object_id,
            })
        })
        .collect()
}

async fn load_user(session: &mut Session<'_>, user_id: i64) -> Result<User> {
    let row: Option<(i64, String, String)> = session
        .fetch_optional(
            "SELECT id, name, email FROM user WHERE id=?",
            &[user_id.into()],
        )
        .await?;
    let (id, name, email) = row.ok_or_else(|| DbError::not_found("unknown user"))?;
    let roles = load_roles(session, id).await?;

    Ok(User {
        id,
        name,
        email,
        roles,
    })
}

/// Insert a user and its roles. Shared by registration and admin seeding.
pub(super) async fn insert_user(session: &mut Session<'_>, user: &NewUser) -> Result<User> {
    if find_by_email(session, &user.email).await?.is_some() {
        return Err(DbError::conflict("user already exists"));
    }

    // Resolve role targets before writing anything.
    let mut roles = Vec::with_capacity(user.roles.len());
    for role in &user.roles {
        let object_id = match role.role {
            Role::Franchisee => {
                session
                    .get_id(Table::Franchise, "id", role.object_id)
                    .await?
            }
            Role::Diner | Role::Admin => 0,
        };
        roles.push(UserRole {
            role: role.role,
            object_id,
        });
    }

    let password_hash = hash_password(&user.password).await?;
    let inserted = session
        .execute(
            "INSERT INTO user (name, email, password_hash) VALUES (?, ?, ?)",
            &[
                user.name.as_str().into(),
                user.email.as_str().into(),
                password_hash.into(),
            ],
        )
        .await?;
    let user_id = inserted.last_insert_id;

    for role in &roles {
        session
            .execute(
                "INSERT INTO userRole (userId, role, objectId) VALUES (?, ?, ?)",
                &[user_id.into(), role.role.as_str().into(), role.object_id.into()],
            )
            .await?;
    }

    Ok(User {
        id: user_id,
        name: user.name.clone(),
        email: user.email.clone(),
        roles,
    })
}

impl Database {
    /// Register a user. Fails with `Conflict` when the email is taken and
    /// `NotFound` when a franchisee role names a missing franchise.
    pub async fn add_user(&self, user: &NewUser) -> Result<User> {
        let mut lease = self.acquire_connection().await?;
        insert_user(&mut lease.session(), user).await
    }

    /// Authenticate by email and password. Any mismatch is `NotFound`.
    pub async fn get_user(&self, email: &str, password: &str) -> Result<User> {
        let mut lease = self.acquire_connection().await?;
        let mut session = lease.session();

        let row = find_by_email(&mut session, email)
            .await?
            .ok_or_else(|| DbError::not_found("unknown user"))?;
        if !verify_password(password, &row.password_hash).await? {
            return Err(DbError::not_found("unknown user"));
        }

        let roles = load_roles(&mut session, row.id).await?;
        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            roles,
        })
    }

    /// Update email and/or password. Absent fields keep their stored value.
    pub async fn update_user(
        &self,
        user_id: i64,
        email: Option<&str>,
        password: Option<&str>,
    ) -> Result<User> {
        let password_hash = match password {
            Some(password) => Some(hash_password(password).await?),
            None => None,
        };

        let mut lease = self.acquire_connection().await?;
        let mut session = lease.session();

        if let Some(email) = email {
            if let Some(existing) = find_by_email(&mut session, email).await? {
                if existing.id != user_id {
                    return Err(DbError::conflict("email already in use"));
                }
            }
        }

        session
            .execute(
                "UPDATE user SET email = COALESCE(?, email), password_hash = COALESCE(?, password_hash) WHERE id = ?",
                &[email.into(), password_hash.into(), user_id.into()],
            )
            .await?;

        load_user(&mut session, user_id).await
    }

    /// Record `token` as an active session for `user_id`.
    pub async fn login_user(&self, user_id: i64, token: &str) -> Result<()> {
        let signature = token_signature(token);
        let mut lease = self.acquire_connection().await?;
        lease
            .session()
            .execute(
                "INSERT INTO auth (token, userId) VALUES (?, ?) ON DUPLICATE KEY UPDATE userId = VALUES(userId)",
                &[signature.into(), user_id.into()],
            )
            .await?;
        Ok(())
    }

    pub async fn is_logged_in(&self, token: &str) -> Result<bool> {
        let signature = token_signature(token);
        let mut lease = self.acquire_connection().await?;
        let row: Option<(i64,)> = lease
            .session()
            .fetch_optional("SELECT userId FROM auth WHERE token=?", &[signature.into()])
            .await?;
        Ok(row.is_some())
    }

    pub async fn logout_user(&self, token: &str) -> Result<()> {
        let signature = token_signature(token);
        let mut lease = self.acquire_connection().await?;
        lease
            .session()
            .execute("DELETE FROM auth WHERE token=?", &[signature.into()])
            .await?;
        Ok(())
    }

    /// Number of distinct users holding at least one session.
    pub async fn get_active_users_count(&self) -> Result<i64> {
        let mut lease = self.acquire_connection().await?;
        let row: Option<(i64,)> = lease
            .session()
            .fetch_optional("SELECT COUNT(DISTINCT userId) AS count FROM auth", &[])
            .await?;
        Ok(row.map(|(count,)| count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_third_segment() {
        assert_eq!(token_signature("header.payload.signature"), "signature");
        assert_eq!(token_signature("a.b.c.d"), "c");
    }

    #[test]
    fn short_tokens_have_empty_signature() {
        assert_eq!(token_signature("header.payload"), "");
        assert_eq!(token_signature("opaque"), "");
        assert_eq!(token_signature(""), "");
    }

    #[tokio::test]
    async fn password_hash_verifies() {
        let hash = hash_password("diner").await.unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(!hash.contains("diner"));
        assert!(verify_password("diner", &hash).await.unwrap());
        assert!(!verify_password("dinner", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_hash_is_an_error() {
        let err = verify_password("x", "not-a-hash").await.unwrap_err();
        assert!(matches!(err, DbError::Hashing(_)));
    }
}
