//! Domain model structs persisted in the marketplace database.

use bazaar_shared::types::{TransactionOrigin, TransactionStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account. The password hash never leaves the store.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct User {
    /// Lower-case username, unique case-insensitively.
    pub username: String,
    pub display_name: String,
    pub bio: String,
    pub profile_picture: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

/// Profile page: user fields plus derived data.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Profile {
    pub user: User,
    /// Mean of every person rating this user has received; 0 when unrated.
    pub avg_rating: f64,
    /// Products with quantity > 0.
    pub current_products: Vec<Product>,
    /// Products that sold out (quantity == 0) but were not deleted.
    pub previous_products: Vec<Product>,
}

/// Partial profile update. `None` leaves the column unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileChanges {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub profile_picture: Option<Vec<u8>>,
}

// ---------------------------------------------------------------------------
// Product
// ---------------------------------------------------------------------------

/// A catalog row, identified by `(name, seller)`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Product {
    pub name: String,
    pub seller: String,
    pub description: String,
    pub price: f64,
    pub quantity: i64,
    /// Running mean of product ratings.
    pub rating: f64,
    pub rating_count: i64,
    pub image: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

/// Input for [`Database::upsert_product`](crate::Database::upsert_product).
#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub name: String,
    pub seller: String,
    /// `None` keeps the stored image on restock.
    pub image: Option<Vec<u8>>,
    pub description: String,
    pub price: f64,
    pub quantity: i64,
}

/// Result of listing a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// A new row was inserted.
    Created { quantity: i64 },
    /// The quantity was merged into an existing row.
    Restocked { quantity: i64 },
}

impl Upsert {
    pub fn quantity(self) -> i64 {
        match self {
            Upsert::Created { quantity } | Upsert::Restocked { quantity } => quantity,
        }
    }
}

/// Owner edit of an existing product; quantity is absolute.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductChanges {
    pub quantity: i64,
    pub price: f64,
    pub description: String,
    /// `None` keeps the stored image.
    pub image: Option<Vec<u8>>,
}

/// One row of the sales ledger.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Sale {
    pub seller: String,
    pub product: String,
    pub buyer: String,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A single chat message.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: i64,
    pub sender: String,
    pub receiver: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

// ---------------------------------------------------------------------------
// Transactions & ratings
// ---------------------------------------------------------------------------

/// A purchase transaction (domain sense, not a database transaction).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Transaction {
    pub id: String,
    pub buyer: String,
    pub seller: String,
    pub product: String,
    pub date: String,
    pub quantity: i64,
    pub status: TransactionStatus,
    pub origin: TransactionOrigin,
    pub created_at: DateTime<Utc>,
}

/// Input for [`Database::create_transaction`](crate::Database::create_transaction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub buyer: String,
    pub seller: String,
    pub product: String,
    pub date: String,
    pub quantity: i64,
    pub origin: TransactionOrigin,
}

/// Scores given when a purchase is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchaseScores {
    /// Score for the product, folded into its running mean.
    pub product: i64,
    /// Score for the counterpart person.
    pub person: i64,
}

/// A rating submitted outside of transaction completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingInput {
    pub product_name: String,
    pub seller: String,
    pub buyer: String,
    pub scores: PurchaseScores,
}

/// Outcome of a settled purchase.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub transaction: Transaction,
    /// Stock left on the shelf after the decrement (may be 0).
    pub remaining: i64,
    /// New running mean, when scores were supplied.
    pub new_rating: Option<f64>,
}
