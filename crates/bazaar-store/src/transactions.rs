//! Purchase transactions and the settle path.
//!
//! Every stock decrement that results from a sale goes through
//! [`settle_in`], reached either by completing an approved transaction or by
//! confirming a purchase for which no transaction was proposed. Both run in a
//! single immediate transaction: the status change, the sales-ledger row,
//! the decrement and the optional ratings commit together or not at all.

use bazaar_shared::constants::TRANSACTION_ID_LEN;
use bazaar_shared::types::{Decision, TransactionOrigin, TransactionStatus};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::database::{now_timestamp, parse_timestamp, Database};
use crate::error::{not_found, Result, StoreError};
use crate::models::{NewTransaction, PurchaseScores, Settlement, Transaction};
use crate::products::{decrement_in, record_purchase_in};
use crate::ratings::{apply_ratings_in, rate_person_in};

const TRANSACTION_COLUMNS: &str =
    "id, buyer, seller, product, date, quantity, status, origin, created_at";

/// Attempts at drawing an unused id before giving up.
const ID_ATTEMPTS: usize = 8;

impl Database {
    /// Record a pending proposal from `buyer` to `seller`.
    pub fn create_transaction(&self, new: &NewTransaction) -> Result<Transaction> {
        if new.quantity < 1 {
            return Err(StoreError::Invalid(format!("quantity {}", new.quantity)));
        }
        if new.buyer.eq_ignore_ascii_case(&new.seller) {
            return Err(StoreError::Invalid("buyer and seller are the same user".into()));
        }

        let txn = self.write_tx(|tx| {
            product_exists_in(tx, &new.product, &new.seller)?;
            insert_in(tx, new, TransactionStatus::Pending)
        })?;

        tracing::debug!(
            id = %txn.id,
            buyer = %txn.buyer,
            seller = %txn.seller,
            product = %txn.product,
            origin = txn.origin.as_str(),
            "created transaction"
        );
        Ok(txn)
    }

    pub fn get_transaction(&self, id: &str) -> Result<Transaction> {
        get_in(&self.conn()?, id)
    }

    /// Approve or decline a pending transaction. Only the seller may answer;
    /// completion goes through [`Database::complete_transaction`].
    pub fn set_transaction_status(
        &self,
        id: &str,
        actor: &str,
        to: TransactionStatus,
    ) -> Result<Transaction> {
        if to == TransactionStatus::Completed {
            return Err(StoreError::Invalid(
                "completion requires settling the purchase".into(),
            ));
        }

        let txn = self.write_tx(|tx| {
            let txn = get_in(tx, id)?;
            if !txn.seller.eq_ignore_ascii_case(actor) {
                return Err(StoreError::Forbidden(format!(
                    "{actor} is not the seller of {id}"
                )));
            }
            transition_in(tx, txn, to)
        })?;

        tracing::debug!(id = %txn.id, status = %txn.status, "transaction status changed");
        Ok(txn)
    }

    /// Transactions `user` takes part in, newest first, optionally limited to
    /// those with `other`.
    pub fn transactions_between(&self, user: &str, other: Option<&str>) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions
             WHERE (buyer = ?1 AND (?2 IS NULL OR seller = ?2))
                OR (seller = ?1 AND (?2 IS NULL OR buyer = ?2))
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![user, other], row_to_transaction)?;

        let mut txns = Vec::new();
        for row in rows {
            txns.push(row?);
        }
        Ok(txns)
    }

    /// Newest pending proposal `buyer` made to `seller` through chat.
    pub fn latest_proposal(&self, buyer: &str, seller: &str) -> Result<Option<Transaction>> {
        latest_pending_chat_in(&self.conn()?, buyer, seller)
    }

    /// Apply a seller's chat answer to the newest pending chat proposal from
    /// `buyer`. Returns `None` when there is nothing to answer.
    pub fn resolve_chat_proposal(
        &self,
        seller: &str,
        buyer: &str,
        decision: Decision,
    ) -> Result<Option<Transaction>> {
        let resolved = self.write_tx(|tx| match latest_pending_chat_in(tx, buyer, seller)? {
            Some(txn) => transition_in(tx, txn, decision.target_status()).map(Some),
            None => Ok(None),
        })?;

        if let Some(txn) = &resolved {
            tracing::debug!(id = %txn.id, status = %txn.status, "resolved chat proposal");
        }
        Ok(resolved)
    }

    /// Complete an approved transaction on behalf of its buyer: the sale is
    /// recorded, stock is decremented by the agreed quantity and, when given,
    /// the scores are folded into the ledgers.
    pub fn complete_transaction(
        &self,
        id: &str,
        buyer: &str,
        scores: Option<PurchaseScores>,
    ) -> Result<Settlement> {
        let settlement = self.write_tx(|tx| {
            let txn = get_in(tx, id)?;
            if !txn.buyer.eq_ignore_ascii_case(buyer) {
                return Err(StoreError::Forbidden(format!(
                    "{buyer} is not the buyer of {id}"
                )));
            }
            settle_in(tx, txn, scores)
        })?;

        tracing::info!(
            id = %settlement.transaction.id,
            remaining = settlement.remaining,
            "completed transaction"
        );
        Ok(settlement)
    }

    /// The seller's rating of the buyer of a completed transaction. Each
    /// transaction takes one such rating.
    pub fn rate_buyer(&self, id: &str, seller: &str, score: i64) -> Result<Transaction> {
        let txn = self.write_tx(|tx| {
            let txn = get_in(tx, id)?;
            if !txn.seller.eq_ignore_ascii_case(seller) {
                return Err(StoreError::Forbidden(format!(
                    "{seller} is not the seller of {id}"
                )));
            }
            if txn.status != TransactionStatus::Completed {
                return Err(StoreError::Invalid(format!(
                    "transaction {id} is {}",
                    txn.status
                )));
            }
            rate_person_in(tx, &txn.buyer, &txn.seller, score, Some(&txn.id))?;
            Ok(txn)
        })?;

        tracing::debug!(id = %txn.id, buyer = %txn.buyer, score, "seller rated buyer");
        Ok(txn)
    }

    /// Confirm a purchase that was agreed outside an explicit completion.
    ///
    /// The newest approved transaction for `(buyer, seller, product)` is
    /// completed when one exists. Otherwise the purchase is recorded as a
    /// direct transaction that is completed on creation.
    pub fn confirm_purchase(
        &self,
        buyer: &str,
        seller: &str,
        product: &str,
        quantity: i64,
    ) -> Result<Settlement> {
        if buyer.eq_ignore_ascii_case(seller) {
            return Err(StoreError::Invalid("buyer and seller are the same user".into()));
        }

        let settlement = self.write_tx(|tx| {
            let approved = tx
                .query_row(
                    &format!(
                        "SELECT {TRANSACTION_COLUMNS} FROM transactions
                         WHERE buyer = ?1 AND seller = ?2 AND product = ?3 AND status = 'approved'
                         ORDER BY created_at DESC, rowid DESC
                         LIMIT 1"
                    ),
                    params![buyer, seller, product],
                    row_to_transaction,
                )
                .optional()?;

            match approved {
                Some(txn) => settle_in(tx, txn, None),
                None => {
                    if quantity < 1 {
                        return Err(StoreError::Invalid(format!("quantity {quantity}")));
                    }
                    let remaining = decrement_in(tx, product, seller, quantity)?;
                    record_purchase_in(tx, buyer, seller, product)?;
                    let txn = insert_in(
                        tx,
                        &NewTransaction {
                            buyer: buyer.to_string(),
                            seller: seller.to_string(),
                            product: product.to_string(),
                            date: Utc::now().date_naive().to_string(),
                            quantity,
                            origin: TransactionOrigin::Direct,
                        },
                        TransactionStatus::Completed,
                    )?;
                    Ok(Settlement {
                        transaction: txn,
                        remaining,
                        new_rating: None,
                    })
                }
            }
        })?;

        tracing::info!(
            id = %settlement.transaction.id,
            origin = settlement.transaction.origin.as_str(),
            remaining = settlement.remaining,
            "confirmed purchase"
        );
        Ok(settlement)
    }
}

/// The single stock-decrementing settle step for an existing transaction.
fn settle_in(
    conn: &Connection,
    txn: Transaction,
    scores: Option<PurchaseScores>,
) -> Result<Settlement> {
    if !txn.status.can_transition_to(TransactionStatus::Completed) {
        return Err(StoreError::IllegalTransition {
            from: txn.status,
            to: TransactionStatus::Completed,
        });
    }

    let remaining = decrement_in(conn, &txn.product, &txn.seller, txn.quantity)?;
    record_purchase_in(conn, &txn.buyer, &txn.seller, &txn.product)?;
    let new_rating = match scores {
        Some(scores) => Some(apply_ratings_in(
            conn,
            &txn.product,
            &txn.seller,
            &txn.buyer,
            scores,
            Some(&txn.id),
        )?),
        None => None,
    };
    let transaction = transition_in(conn, txn, TransactionStatus::Completed)?;

    Ok(Settlement {
        transaction,
        remaining,
        new_rating,
    })
}

fn transition_in(conn: &Connection, txn: Transaction, to: TransactionStatus) -> Result<Transaction> {
    if !txn.status.can_transition_to(to) {
        return Err(StoreError::IllegalTransition {
            from: txn.status,
            to,
        });
    }
    conn.execute(
        "UPDATE transactions SET status = ?2 WHERE id = ?1",
        params![txn.id, to.as_str()],
    )?;
    Ok(Transaction { status: to, ..txn })
}

fn insert_in(
    conn: &Connection,
    new: &NewTransaction,
    status: TransactionStatus,
) -> Result<Transaction> {
    let created = now_timestamp();
    for _ in 0..ID_ATTEMPTS {
        let id = new_transaction_id();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO transactions
                 (id, buyer, seller, product, date, quantity, status, origin, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                new.buyer,
                new.seller,
                new.product,
                new.date,
                new.quantity,
                status.as_str(),
                new.origin.as_str(),
                created,
            ],
        )?;
        if inserted == 1 {
            return Ok(Transaction {
                id,
                buyer: new.buyer.clone(),
                seller: new.seller.clone(),
                product: new.product.clone(),
                date: new.date.clone(),
                quantity: new.quantity,
                status,
                origin: new.origin,
                created_at: parse_timestamp(8, &created)?,
            });
        }
    }
    Err(StoreError::AlreadyExists)
}

fn new_transaction_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(TRANSACTION_ID_LEN);
    id
}

fn get_in(conn: &Connection, id: &str) -> Result<Transaction> {
    conn.query_row(
        &format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?1"),
        params![id],
        row_to_transaction,
    )
    .map_err(not_found)
}

fn latest_pending_chat_in(
    conn: &Connection,
    buyer: &str,
    seller: &str,
) -> Result<Option<Transaction>> {
    let txn = conn
        .query_row(
            &format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions
                 WHERE buyer = ?1 AND seller = ?2 AND status = 'pending' AND origin = 'chat'
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1"
            ),
            params![buyer, seller],
            row_to_transaction,
        )
        .optional()?;
    Ok(txn)
}

fn product_exists_in(conn: &Connection, product: &str, seller: &str) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM products WHERE product_name = ?1 AND seller = ?2)",
        params![product, seller],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::NotFound)
    }
}

fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    let status: String = row.get(6)?;
    let origin: String = row.get(7)?;
    let created: String = row.get(8)?;

    let conversion = |idx: usize, e: bazaar_shared::ProtocolError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    };

    Ok(Transaction {
        id: row.get(0)?,
        buyer: row.get(1)?,
        seller: row.get(2)?,
        product: row.get(3)?,
        date: row.get(4)?,
        quantity: row.get(5)?,
        status: status.parse().map_err(|e| conversion(6, e))?,
        origin: origin.parse().map_err(|e| conversion(7, e))?,
        created_at: parse_timestamp(8, &created)?,
    })
}
