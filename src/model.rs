//! Domain records exchanged with the data layer.
//!
//! Field names serialize in camelCase to match the JSON the HTTP layer emits.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role a user holds, stored as a lowercase string in `userRole.role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Diner,
    Franchisee,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Diner => "diner",
            Role::Franchisee => "franchisee",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "diner" => Ok(Role::Diner),
            "franchisee" => Ok(Role::Franchisee),
            "admin" => Ok(Role::Admin),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRole {
    pub role: Role,
    /// Franchise id for [`Role::Franchisee`], otherwise 0.
    #[serde(default)]
    pub object_id: i64,
}

impl UserRole {
    pub fn new(role: Role) -> Self {
        Self { role, object_id: 0 }
    }
}

/// A user as returned by the data layer. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub roles: Vec<UserRole>,
}

impl User {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.iter().any(|r| r.role == role)
    }
}

/// Registration input.
#[derive(Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub roles: Vec<UserRole>,
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("roles", &self.roles)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    #[serde(default)]
    pub id: i64,
    pub title: String,
    pub description: String,
    pub image: String,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FranchiseAdmin {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    #[sqlx(rename = "franchiseId", default)]
    pub franchise_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Franchise {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub admins: Vec<FranchiseAdmin>,
    #[serde(default)]
    pub stores: Vec<Store>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    #[serde(default)]
    pub id: i64,
    #[sqlx(rename = "menuId")]
    pub menu_id: i64,
    pub description: String,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DinerOrder {
    #[serde(default)]
    pub id: i64,
    pub franchise_id: i64,
    pub store_id: i64,
    #[serde(default)]
    pub date: Option<NaiveDateTime>,
    pub items: Vec<OrderItem>,
}

impl DinerOrder {
    pub fn total_price(&self) -> f64 {
        self.items.iter().map(|item| item.price).sum()
    }
}

/// One page of a diner's order history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdersPage {
    pub diner_id: i64,
    pub orders: Vec<DinerOrder>,
    pub page: u32,
}
