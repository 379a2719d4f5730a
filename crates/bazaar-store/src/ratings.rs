use bazaar_shared::constants::{MAX_SCORE, MIN_SCORE};
use rusqlite::{params, Connection};

use crate::database::{now_timestamp, Database};
use crate::error::{not_found, Result, StoreError};
use crate::models::{PurchaseScores, RatingInput};

/// Fold one more score into a running mean.
pub fn running_mean(old_mean: f64, old_count: i64, score: i64) -> f64 {
    (old_mean * old_count as f64 + score as f64) / (old_count + 1) as f64
}

impl Database {
    /// Append a product rating and a person rating for the seller, and fold
    /// the product score into the product's running mean. Returns the new
    /// mean.
    ///
    /// No purchase record is written here; the caller decides whether the
    /// buyer is entitled to rate.
    pub fn submit_rating(&self, input: &RatingInput) -> Result<f64> {
        let mean = self.write_tx(|tx| {
            apply_ratings_in(
                tx,
                &input.product_name,
                &input.seller,
                &input.buyer,
                input.scores,
                None,
            )
        })?;
        tracing::debug!(
            product = %input.product_name,
            seller = %input.seller,
            buyer = %input.buyer,
            rating = mean,
            "recorded rating"
        );
        Ok(mean)
    }
}

pub(crate) fn check_score(score: i64) -> Result<()> {
    if (MIN_SCORE..=MAX_SCORE).contains(&score) {
        Ok(())
    } else {
        Err(StoreError::Invalid(format!("score {score}")))
    }
}

/// Write both ledger rows and update the product aggregate inside an open
/// transaction. `transaction_id` ties the seller's person rating to the sale
/// it was given for.
pub(crate) fn apply_ratings_in(
    conn: &Connection,
    product: &str,
    seller: &str,
    buyer: &str,
    scores: PurchaseScores,
    transaction_id: Option<&str>,
) -> Result<f64> {
    check_score(scores.product)?;
    check_score(scores.person)?;

    let (old_mean, old_count): (f64, i64) = conn
        .query_row(
            "SELECT rating, rating_count FROM products
             WHERE product_name = ?1 AND seller = ?2",
            params![product, seller],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(not_found)?;

    let mean = running_mean(old_mean, old_count, scores.product);
    conn.execute(
        "UPDATE products SET rating = ?3, rating_count = ?4
         WHERE product_name = ?1 AND seller = ?2",
        params![product, seller, mean, old_count + 1],
    )?;

    let now = now_timestamp();
    conn.execute(
        "INSERT INTO product_ratings (product_name, seller, buyer, rating, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![product, seller, buyer, scores.product, now],
    )?;
    rate_person_in(conn, seller, buyer, scores.person, transaction_id)?;

    Ok(mean)
}

/// Append one person rating. A second rating by the same rater for the same
/// transaction is [`StoreError::AlreadyExists`].
pub(crate) fn rate_person_in(
    conn: &Connection,
    rated_user: &str,
    rated_by: &str,
    score: i64,
    transaction_id: Option<&str>,
) -> Result<()> {
    check_score(score)?;
    let inserted = conn.execute(
        "INSERT INTO person_ratings (rated_user, rating, rated_by, created_at, transaction_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![rated_user, score, rated_by, now_timestamp(), transaction_id],
    );
    match inserted {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(StoreError::AlreadyExists)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::temp_db;
    use crate::models::NewProduct;

    fn rate(db: &Database, product: i64, person: i64) -> Result<f64> {
        db.submit_rating(&RatingInput {
            product_name: "Widget".into(),
            seller: "sam".into(),
            buyer: "bob".into(),
            scores: PurchaseScores { product, person },
        })
    }

    #[test]
    fn test_running_mean() {
        assert_eq!(running_mean(0.0, 0, 4), 4.0);
        assert_eq!(running_mean(4.0, 1, 2), 3.0);
        assert!((running_mean(3.0, 2, 5) - 11.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_submit_rating_updates_aggregate() {
        let (_dir, db) = temp_db();
        db.upsert_product(&NewProduct {
            name: "Widget".into(),
            seller: "sam".into(),
            image: None,
            description: "w".into(),
            price: 1.0,
            quantity: 1,
        })
        .unwrap();

        assert_eq!(rate(&db, 4, 5).unwrap(), 4.0);
        assert_eq!(rate(&db, 2, 5).unwrap(), 3.0);

        let widget = db.product("Widget", Some("sam")).unwrap();
        assert_eq!(widget.rating, 3.0);
        assert_eq!(widget.rating_count, 2);

        // Rating alone never touches the sales ledger.
        assert!(!db.already_purchased("bob", "sam", "Widget").unwrap());
    }

    #[test]
    fn test_out_of_range_scores_change_nothing() {
        let (_dir, db) = temp_db();
        db.upsert_product(&NewProduct {
            name: "Widget".into(),
            seller: "sam".into(),
            image: None,
            description: "w".into(),
            price: 1.0,
            quantity: 1,
        })
        .unwrap();

        assert!(matches!(rate(&db, 0, 3), Err(StoreError::Invalid(_))));
        assert!(matches!(rate(&db, 3, 6), Err(StoreError::Invalid(_))));
        assert_eq!(db.product("Widget", Some("sam")).unwrap().rating_count, 0);
    }

    #[test]
    fn test_rating_unknown_product() {
        let (_dir, db) = temp_db();
        assert!(matches!(rate(&db, 3, 3), Err(StoreError::NotFound)));
    }
}
