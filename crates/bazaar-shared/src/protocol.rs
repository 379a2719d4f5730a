//! Request codes and the JSON payloads exchanged over a marketplace
//! connection.
//!
//! The byte-level framing lives in [`crate::codec`]; this module only
//! describes *what* each request carries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::TransactionStatus;

/// Kind of one request field, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// 1024-byte null-padded text.
    Short,
    /// 4096-byte null-padded text.
    Body,
    /// 16-byte big-endian length followed by that many bytes.
    Blob,
}

use FieldKind::{Blob, Body, Short};

/// Every request code the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    ListCatalog,
    ListProduct,
    ProductDetail,
    ListOwnSales,
    PollUnread,
    ChatHistory,
    SendMessage,
    RegisterPort,
    Logout,
    Conversations,
    SellerProducts,
    ProposeTransaction,
    ListTransactions,
    RespondTransaction,
    CompleteTransaction,
    PresenceCheck,
    StoreMessage,
    GetProfile,
    UpdateProfile,
    StoreReceived,
    PollFromUser,
    SubmitRating,
    DeleteProduct,
    AlreadyPurchased,
    DecrementStock,
    OpenChat,
    CloseChat,
    ChatStatus,
    HasUnread,
    MarkRead,
    UpdateProfileFor,
    EditProduct,
}

/// Wire code, opcode and request schema, one row per request.
const OPCODE_TABLE: &[(&str, Opcode, &[FieldKind])] = &[
    ("1", Opcode::ListCatalog, &[]),
    ("2", Opcode::ListProduct, &[Blob]),
    ("3", Opcode::ProductDetail, &[Short]),
    ("4", Opcode::ListOwnSales, &[]),
    ("5", Opcode::PollUnread, &[]),
    ("6", Opcode::ChatHistory, &[Short]),
    ("7", Opcode::SendMessage, &[Short, Body]),
    ("8", Opcode::RegisterPort, &[Short]),
    ("9", Opcode::Logout, &[]),
    ("10", Opcode::Conversations, &[]),
    ("11", Opcode::SellerProducts, &[Short]),
    ("12", Opcode::ProposeTransaction, &[Blob]),
    ("13", Opcode::ListTransactions, &[Short]),
    ("14", Opcode::RespondTransaction, &[Short, Short]),
    ("15", Opcode::CompleteTransaction, &[Short, Short, Short, Short]),
    ("16", Opcode::PresenceCheck, &[Short]),
    ("17", Opcode::StoreMessage, &[Short, Body]),
    ("18", Opcode::GetProfile, &[Short]),
    ("19", Opcode::UpdateProfile, &[Blob]),
    ("20", Opcode::StoreReceived, &[Short, Body]),
    ("21", Opcode::PollFromUser, &[Short]),
    ("22", Opcode::SubmitRating, &[Blob]),
    ("23", Opcode::DeleteProduct, &[Short]),
    ("24", Opcode::AlreadyPurchased, &[Short]),
    ("25", Opcode::DecrementStock, &[Blob]),
    ("26", Opcode::OpenChat, &[Short]),
    ("27", Opcode::CloseChat, &[Short]),
    ("28", Opcode::ChatStatus, &[Short]),
    ("29", Opcode::HasUnread, &[Short]),
    ("30", Opcode::MarkRead, &[Short]),
    ("31", Opcode::UpdateProfileFor, &[Blob]),
    ("32", Opcode::EditProduct, &[Blob]),
];

impl Opcode {
    /// Look up a wire code. Unknown codes yield `None` and are ignored by
    /// the server.
    pub fn from_code(code: &str) -> Option<Self> {
        OPCODE_TABLE
            .iter()
            .find(|(c, _, _)| *c == code)
            .map(|(_, op, _)| *op)
    }

    pub fn code(self) -> &'static str {
        self.row().0
    }

    /// Fields the client sends after the opcode, in order.
    pub fn schema(self) -> &'static [FieldKind] {
        self.row().2
    }

    fn row(self) -> &'static (&'static str, Opcode, &'static [FieldKind]) {
        // Every variant has exactly one row; the table test enforces it.
        OPCODE_TABLE
            .iter()
            .find(|(_, op, _)| *op == self)
            .unwrap_or(&OPCODE_TABLE[0])
    }

    pub fn all() -> impl Iterator<Item = Opcode> {
        OPCODE_TABLE.iter().map(|(_, op, _)| *op)
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Product listing or restock request (opcode 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductListing {
    pub name: String,
    /// Base64 image, or `None` to keep / omit the image.
    #[serde(default)]
    pub image: Option<String>,
    pub description: String,
    pub price: f64,
    pub quantity: i64,
}

/// One catalog row: `[name, rating, price, image_b64]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry(pub String, pub f64, pub f64, pub Option<String>);

/// Full catalog grouped by seller (opcode 1).
pub type Catalog = BTreeMap<String, Vec<CatalogEntry>>;

/// Fixed product fields of a product-detail response (opcode 3). The image
/// follows as a separate raw blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDetail {
    pub name: String,
    pub seller: String,
    pub description: String,
    pub price: f64,
    pub quantity: i64,
    pub rating: f64,
    pub rating_count: i64,
}

/// A product on a seller's shelf (opcode 11).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerProduct {
    pub name: String,
    pub rating: f64,
    pub price: f64,
    pub image: Option<String>,
    pub quantity: i64,
}

/// Owner edit of an existing product (opcode 32). Quantity is absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductEdit {
    pub product_name: String,
    pub quantity: i64,
    pub price: f64,
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// One entry of the seller's sales ledger (opcode 4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub product: String,
    pub buyer: String,
    pub recorded_at: String,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// One chat message as `[sender, body, timestamp]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine(pub String, pub String, pub String);

impl ChatLine {
    pub fn sender(&self) -> &str {
        &self.0
    }

    pub fn body(&self) -> &str {
        &self.1
    }

    pub fn timestamp(&self) -> &str {
        &self.2
    }
}

// ---------------------------------------------------------------------------
// Transactions & ratings
// ---------------------------------------------------------------------------

/// Buyer proposal (opcode 12).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub buyer: String,
    pub seller: String,
    pub product: String,
    pub date: String,
    pub quantity: i64,
}

/// Transaction record as listed by opcode 13.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionView {
    pub id: String,
    pub buyer: String,
    pub seller: String,
    pub product: String,
    pub date: String,
    pub quantity: i64,
    pub status: TransactionStatus,
}

/// Rating submission (opcode 22).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSubmission {
    pub product_name: String,
    pub seller: String,
    pub buyer: String,
    pub product_rating: i64,
    pub seller_rating: i64,
}

fn one() -> i64 {
    1
}

/// Legacy stock decrement after a chat CONFIRM (opcode 25).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub product_name: String,
    pub seller: String,
    #[serde(default = "one")]
    pub quantity: i64,
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// Product summary on a profile page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileProduct {
    pub product_name: String,
    pub price: f64,
    pub rating: f64,
    pub rating_count: i64,
    pub quantity: i64,
}

/// Public profile (opcode 18).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub display_name: String,
    pub profile_picture: Option<String>,
    pub bio: String,
    pub avg_rating: f64,
    pub current_products: Vec<ProfileProduct>,
    pub previous_products: Vec<ProfileProduct>,
}

/// Profile changes (opcodes 19 and 31). Absent fields stay unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    /// Only meaningful for opcode 31, where it must name the session user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, alias = "real_name")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    /// Base64 picture.
    #[serde(default)]
    pub profile_picture: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_opcode_table_is_consistent() {
        let codes: HashSet<_> = OPCODE_TABLE.iter().map(|(c, _, _)| *c).collect();
        let ops: HashSet<_> = Opcode::all().collect();
        assert_eq!(codes.len(), OPCODE_TABLE.len());
        assert_eq!(ops.len(), OPCODE_TABLE.len());

        for op in Opcode::all() {
            assert_eq!(Opcode::from_code(op.code()), Some(op));
        }
    }

    #[test]
    fn test_unknown_codes() {
        assert_eq!(Opcode::from_code("b"), None);
        assert_eq!(Opcode::from_code("99"), None);
        assert_eq!(Opcode::from_code(""), None);
    }

    #[test]
    fn test_schemas() {
        assert!(Opcode::ListCatalog.schema().is_empty());
        assert_eq!(
            Opcode::SendMessage.schema(),
            &[FieldKind::Short, FieldKind::Body]
        );
        assert_eq!(Opcode::CompleteTransaction.schema().len(), 4);
    }

    #[test]
    fn test_catalog_entry_is_a_json_array() {
        let entry = CatalogEntry("Widget".into(), 4.5, 9.99, None);
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"["Widget",4.5,9.99,null]"#);
    }

    #[test]
    fn test_purchase_request_defaults_quantity() {
        let req: PurchaseRequest =
            serde_json::from_str(r#"{"product_name":"Widget","seller":"sam"}"#).unwrap();
        assert_eq!(req.quantity, 1);
    }

    #[test]
    fn test_profile_update_accepts_real_name() {
        let update: ProfileUpdate = serde_json::from_str(r#"{"real_name":"Sam"}"#).unwrap();
        assert_eq!(update.display_name.as_deref(), Some("Sam"));
        assert_eq!(update.bio, None);
    }
}
