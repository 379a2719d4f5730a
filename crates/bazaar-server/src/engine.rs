//! Transaction engine: proposals, seller answers, completion and the chat
//! interceptor.
//!
//! Stock only ever moves through [`Database::complete_transaction`] and
//! [`Database::confirm_purchase`]; the chat interceptor changes transaction
//! status and nothing else.
//!
//! [`Database::complete_transaction`]: bazaar_store::Database::complete_transaction
//! [`Database::confirm_purchase`]: bazaar_store::Database::confirm_purchase

use bazaar_shared::constants::{CONFIRM_TOKEN, DENY_TOKEN, PROPOSAL_MARKER};
use bazaar_shared::protocol::{Proposal, PurchaseRequest, RatingSubmission};
use bazaar_shared::types::{normalize_username, validate_score, Decision, TransactionOrigin};
use bazaar_store::{
    ChatMessage, NewTransaction, PurchaseScores, RatingInput, Settlement, StoreError, Transaction,
};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::store::Store;

/// What the chat interceptor did with a stored message.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEffect {
    /// A free-text proposal became a pending transaction.
    Proposed(Transaction),
    /// A seller's CONFIRM or DENY answered the newest chat proposal.
    Resolved(Transaction),
}

/// Outcome of a completion request, which depends on who sent it.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// The buyer completed the sale and rated the product and the seller.
    Settled(Settlement),
    /// The seller rated the buyer of an already completed sale.
    BuyerRated(Transaction),
}

/// Fields pulled out of a free-text proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedProposal {
    pub product: String,
    pub quantity: i64,
    pub date: String,
}

#[derive(Debug, Clone)]
pub struct Engine {
    store: Store,
}

impl Engine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Record an explicit proposal. The requester must be the named buyer.
    pub async fn propose(
        &self,
        requester: &str,
        proposal: Proposal,
    ) -> Result<Transaction, ServerError> {
        let buyer = normalize_username(&proposal.buyer);
        if buyer != requester {
            return Err(ServerError::Forbidden(format!(
                "{requester} cannot propose on behalf of {buyer}"
            )));
        }

        let new = NewTransaction {
            buyer,
            seller: normalize_username(&proposal.seller),
            product: proposal.product.trim().to_string(),
            date: proposal.date.trim().to_string(),
            quantity: proposal.quantity,
            origin: TransactionOrigin::Explicit,
        };
        self.store.call(move |db| db.create_transaction(&new)).await
    }

    /// A seller's answer to a pending transaction.
    pub async fn respond(
        &self,
        actor: &str,
        id: &str,
        decision: Decision,
    ) -> Result<Transaction, ServerError> {
        let (actor, id) = (actor.to_string(), id.to_string());
        self.store
            .call(move |db| db.set_transaction_status(&id, &actor, decision.target_status()))
            .await
    }

    /// Completion request for transaction `id`. From the buyer it settles an
    /// approved transaction with both scores. From the seller it rates the
    /// buyer of a completed one with the person score. `product`, when not
    /// empty, must name the transaction's product.
    pub async fn complete(
        &self,
        actor: &str,
        id: &str,
        product: &str,
        scores: PurchaseScores,
    ) -> Result<Completion, ServerError> {
        validate_score(scores.person)?;

        let (actor, id, product) = (actor.to_string(), id.to_string(), product.to_string());
        let completion = self
            .store
            .call(move |db| {
                let txn = db.get_transaction(&id)?;
                if !product.is_empty() && txn.product != product {
                    return Err(StoreError::Invalid(format!(
                        "transaction {id} is for {}, not {product}",
                        txn.product
                    )));
                }
                if txn.seller.eq_ignore_ascii_case(&actor) {
                    db.rate_buyer(&id, &actor, scores.person)
                        .map(Completion::BuyerRated)
                } else {
                    db.complete_transaction(&id, &actor, Some(scores))
                        .map(Completion::Settled)
                }
            })
            .await?;

        if let Completion::BuyerRated(txn) = &completion {
            info!(id = %txn.id, buyer = %txn.buyer, "seller rated buyer");
        }
        Ok(completion)
    }

    /// The buyer's follow-up after a chat CONFIRM, or a purchase made with no
    /// proposal at all.
    pub async fn confirm_purchase(
        &self,
        buyer: &str,
        request: PurchaseRequest,
    ) -> Result<Settlement, ServerError> {
        let buyer = buyer.to_string();
        let seller = normalize_username(&request.seller);
        let product = request.product_name.trim().to_string();
        let quantity = request.quantity;
        self.store
            .call(move |db| db.confirm_purchase(&buyer, &seller, &product, quantity))
            .await
    }

    /// Rate a purchase outside transaction completion. The requester must be
    /// the named buyer and must have bought the product from that seller.
    pub async fn submit_rating(
        &self,
        requester: &str,
        submission: RatingSubmission,
    ) -> Result<f64, ServerError> {
        let buyer = normalize_username(&submission.buyer);
        if buyer != requester {
            return Err(ServerError::Forbidden(format!(
                "{requester} cannot rate on behalf of {buyer}"
            )));
        }
        let input = RatingInput {
            product_name: submission.product_name.trim().to_string(),
            seller: normalize_username(&submission.seller),
            buyer,
            scores: PurchaseScores {
                product: validate_score(submission.product_rating)?,
                person: validate_score(submission.seller_rating)?,
            },
        };

        self.store
            .call(move |db| {
                if !db.already_purchased(&input.buyer, &input.seller, &input.product_name)? {
                    return Err(StoreError::Forbidden(format!(
                        "{} has not bought {} from {}",
                        input.buyer, input.product_name, input.seller
                    )));
                }
                db.submit_rating(&input)
            })
            .await
    }

    /// Transactions of `user`, optionally only those with `other`.
    pub async fn list(
        &self,
        user: &str,
        other: Option<&str>,
    ) -> Result<Vec<Transaction>, ServerError> {
        let user = user.to_string();
        let other = other.map(str::to_string);
        self.store
            .call(move |db| db.transactions_between(&user, other.as_deref()))
            .await
    }

    /// Inspect a message that was just stored. Failures are logged and never
    /// reach the sender.
    pub async fn on_chat_message(&self, message: &ChatMessage) -> Option<ChatEffect> {
        let outcome = if let Some(decision) = parse_reply(&message.body) {
            // The seller answers the buyer's newest chat proposal.
            let (seller, buyer) = (message.sender.clone(), message.receiver.clone());
            self.store
                .call(move |db| db.resolve_chat_proposal(&seller, &buyer, decision))
                .await
                .map(|resolved| resolved.map(ChatEffect::Resolved))
        } else if let Some(parsed) = parse_proposal(&message.body) {
            let new = NewTransaction {
                buyer: message.sender.clone(),
                seller: message.receiver.clone(),
                product: parsed.product,
                date: parsed.date,
                quantity: parsed.quantity,
                origin: TransactionOrigin::Chat,
            };
            self.store
                .call(move |db| db.create_transaction(&new))
                .await
                .map(|txn| Some(ChatEffect::Proposed(txn)))
        } else {
            return None;
        };

        match outcome {
            Ok(Some(effect)) => {
                match &effect {
                    ChatEffect::Proposed(txn) => info!(
                        id = %txn.id,
                        buyer = %txn.buyer,
                        seller = %txn.seller,
                        "Chat proposal recorded"
                    ),
                    ChatEffect::Resolved(txn) => info!(
                        id = %txn.id,
                        status = %txn.status,
                        "Chat proposal answered"
                    ),
                }
                Some(effect)
            }
            Ok(None) => {
                debug!(
                    from = %message.sender,
                    to = %message.receiver,
                    "Chat reply with no pending proposal"
                );
                None
            }
            Err(e) => {
                warn!(
                    from = %message.sender,
                    to = %message.receiver,
                    error = %e,
                    "Chat interceptor failed"
                );
                None
            }
        }
    }
}

/// `CONFIRM` or `DENY` as the whole message, case-insensitive.
pub fn parse_reply(body: &str) -> Option<Decision> {
    let body = body.trim();
    if body.eq_ignore_ascii_case(CONFIRM_TOKEN) {
        Some(Decision::Approve)
    } else if body.eq_ignore_ascii_case(DENY_TOKEN) {
        Some(Decision::Decline)
    } else {
        None
    }
}

/// Extract product, quantity and date from a message containing the
/// proposal marker. A missing product makes the message unusable; a
/// missing or unreadable quantity counts as 1 and a missing date as today.
pub fn parse_proposal(body: &str) -> Option<ParsedProposal> {
    if !body.contains(PROPOSAL_MARKER) {
        return None;
    }

    let field = |key: &str| {
        body.lines().find_map(|line| {
            let (_, value) = line.split_once(key)?;
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        })
    };

    let product = field("Product:")?;
    let quantity = field("Quantity:")
        .and_then(|q| q.parse::<i64>().ok())
        .unwrap_or(1);
    let date = field("Date:").unwrap_or_else(|| Utc::now().date_naive().to_string());

    Some(ParsedProposal {
        product,
        quantity,
        date,
    })
}

#[cfg(test)]
mod tests {
    use bazaar_shared::types::TransactionStatus;
    use bazaar_store::{Database, NewProduct};

    use super::*;

    const PROPOSAL: &str = "📋 PURCHASE PROPOSAL\n\
                            ━━━━━━━━━━━━━━\n\
                            Product: Widget\n\
                            Quantity: 2\n\
                            Date: 2024-06-01\n\
                            Location: Main Gate\n\
                            ━━━━━━━━━━━━━━\n\
                            Type CONFIRM to accept or DENY to reject";

    fn engine() -> (tempfile::TempDir, Store, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("engine.db")).unwrap();
        db.create_user("sam", "pw", "Sam").unwrap();
        db.create_user("bob", "pw", "Bob").unwrap();
        db.upsert_product(&NewProduct {
            name: "Widget".into(),
            seller: "sam".into(),
            image: None,
            description: "w".into(),
            price: 4.0,
            quantity: 3,
        })
        .unwrap();
        let store = Store::new(db);
        (dir, store.clone(), Engine::new(store))
    }

    fn message(sender: &str, receiver: &str, body: &str, store: &Store) -> ChatMessage {
        store.database().store_message(sender, receiver, body).unwrap()
    }

    fn quantity(store: &Store) -> i64 {
        store
            .database()
            .product("Widget", Some("sam"))
            .unwrap()
            .quantity
    }

    #[test]
    fn test_parse_proposal() {
        let parsed = parse_proposal(PROPOSAL).unwrap();
        assert_eq!(parsed.product, "Widget");
        assert_eq!(parsed.quantity, 2);
        assert_eq!(parsed.date, "2024-06-01");

        let sparse = parse_proposal("PURCHASE PROPOSAL\nProduct: Lamp").unwrap();
        assert_eq!(sparse.quantity, 1);
        assert!(!sparse.date.is_empty());

        assert_eq!(parse_proposal("PURCHASE PROPOSAL\nQuantity: 2"), None);
        assert_eq!(parse_proposal("Product: Widget"), None);
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply(" confirm \n"), Some(Decision::Approve));
        assert_eq!(parse_reply("DENY"), Some(Decision::Decline));
        assert_eq!(parse_reply("I confirm"), None);
    }

    #[tokio::test]
    async fn test_confirm_then_decrement_applies_once() {
        let (_dir, store, engine) = engine();

        let proposal = message("bob", "sam", PROPOSAL, &store);
        let Some(ChatEffect::Proposed(txn)) = engine.on_chat_message(&proposal).await else {
            panic!("proposal not recorded");
        };
        assert_eq!(txn.status, TransactionStatus::Pending);
        assert_eq!(txn.quantity, 2);

        let confirm = message("sam", "bob", "CONFIRM", &store);
        let Some(ChatEffect::Resolved(approved)) = engine.on_chat_message(&confirm).await else {
            panic!("confirm not applied");
        };
        assert_eq!(approved.id, txn.id);
        assert_eq!(approved.status, TransactionStatus::Approved);
        assert_eq!(quantity(&store), 3);

        let settlement = engine
            .confirm_purchase(
                "bob",
                PurchaseRequest {
                    product_name: "Widget".into(),
                    seller: "sam".into(),
                    quantity: 1,
                },
            )
            .await
            .unwrap();
        assert_eq!(settlement.transaction.id, txn.id);
        assert_eq!(quantity(&store), 1);
        assert_eq!(store.database().sales_for_seller("sam").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_buyer_cannot_confirm_own_proposal() {
        let (_dir, store, engine) = engine();
        let proposal = message("bob", "sam", PROPOSAL, &store);
        engine.on_chat_message(&proposal).await.unwrap();

        // CONFIRM from the buyer looks for proposals where bob is the seller.
        let confirm = message("bob", "sam", "CONFIRM", &store);
        assert_eq!(engine.on_chat_message(&confirm).await, None);
        assert_eq!(
            store.database().latest_proposal("bob", "sam").unwrap().map(|t| t.status),
            Some(TransactionStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_propose_and_complete() {
        let (_dir, store, engine) = engine();
        let proposal = Proposal {
            buyer: "Bob".into(),
            seller: "sam".into(),
            product: "Widget".into(),
            date: "tomorrow".into(),
            quantity: 1,
        };

        assert!(matches!(
            engine.propose("sam", proposal.clone()).await,
            Err(ServerError::Forbidden(_))
        ));
        let txn = engine.propose("bob", proposal).await.unwrap();

        assert!(matches!(
            engine.respond("bob", &txn.id, Decision::Approve).await,
            Err(ServerError::Forbidden(_))
        ));
        engine.respond("sam", &txn.id, Decision::Approve).await.unwrap();

        let scores = PurchaseScores {
            product: 5,
            person: 4,
        };
        assert!(matches!(
            engine.complete("bob", &txn.id, "Gadget", scores).await,
            Err(ServerError::Protocol(_))
        ));
        // The seller has nothing to rate before the sale completes.
        assert!(matches!(
            engine.complete("sam", &txn.id, "Widget", scores).await,
            Err(ServerError::Protocol(_))
        ));

        let settlement = match engine.complete("bob", &txn.id, "Widget", scores).await {
            Ok(Completion::Settled(settlement)) => settlement,
            other => panic!("expected a settlement, got {other:?}"),
        };
        assert_eq!(settlement.new_rating, Some(5.0));
        assert_eq!(quantity(&store), 2);

        assert!(matches!(
            engine.complete("bob", &txn.id, "Widget", scores).await,
            Err(ServerError::Conflict(_))
        ));

        let buyer_score = PurchaseScores {
            product: 2,
            person: 2,
        };
        match engine.complete("SAM", &txn.id, "", buyer_score).await {
            Ok(Completion::BuyerRated(rated)) => assert_eq!(rated.id, txn.id),
            other => panic!("expected a buyer rating, got {other:?}"),
        }
        assert!(matches!(
            engine.complete("sam", &txn.id, "Widget", buyer_score).await,
            Err(ServerError::Conflict(_))
        ));
        assert_eq!(quantity(&store), 2);
    }

    #[tokio::test]
    async fn test_rating_requires_purchase() {
        let (_dir, store, engine) = engine();
        let submission = RatingSubmission {
            product_name: "Widget".into(),
            seller: "sam".into(),
            buyer: "bob".into(),
            product_rating: 4,
            seller_rating: 5,
        };

        assert!(matches!(
            engine.submit_rating("bob", submission.clone()).await,
            Err(ServerError::Forbidden(_))
        ));
        store.database().record_purchase("bob", "sam", "Widget").unwrap();
        assert!(matches!(
            engine.submit_rating("sam", submission.clone()).await,
            Err(ServerError::Forbidden(_))
        ));
        assert_eq!(engine.submit_rating("bob", submission).await.unwrap(), 4.0);

        // Rating never adds to the sales ledger.
        assert_eq!(store.database().sales_for_seller("sam").unwrap().len(), 1);
    }
}
