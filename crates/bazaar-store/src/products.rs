use rusqlite::{params, Connection, OptionalExtension};

use crate::database::{now_timestamp, parse_timestamp, Database};
use crate::error::{not_found, Result, StoreError};
use crate::models::{NewProduct, Product, ProductChanges, Sale, Upsert};

const PRODUCT_COLUMNS: &str = "product_name, seller, description, price, quantity, rating, \
                               rating_count, image, created_at";

impl Database {
    /// List a product, or restock it when `(name, seller)` already exists.
    ///
    /// A restock adds `quantity` to the shelf, replaces description and price,
    /// and replaces the image only when one is supplied. A fresh listing
    /// needs at least one unit.
    pub fn upsert_product(&self, product: &NewProduct) -> Result<Upsert> {
        if product.name.trim().is_empty() {
            return Err(StoreError::Invalid("empty product name".into()));
        }
        if product.price.is_nan() || product.price < 0.0 {
            return Err(StoreError::Invalid(format!("price {}", product.price)));
        }
        if product.quantity < 0 {
            return Err(StoreError::Invalid(format!("quantity {}", product.quantity)));
        }

        let outcome = self.write_tx(|tx| {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT quantity FROM products WHERE product_name = ?1 AND seller = ?2",
                    params![product.name, product.seller],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                Some(current) => {
                    let quantity = current.checked_add(product.quantity).ok_or_else(|| {
                        StoreError::Invalid(format!(
                            "restocking {} by {} overflows the quantity",
                            product.name, product.quantity
                        ))
                    })?;
                    tx.execute(
                        "UPDATE products
                         SET quantity = ?3, description = ?4, price = ?5,
                             image = COALESCE(?6, image)
                         WHERE product_name = ?1 AND seller = ?2",
                        params![
                            product.name,
                            product.seller,
                            quantity,
                            product.description,
                            product.price,
                            product.image,
                        ],
                    )?;
                    Ok(Upsert::Restocked { quantity })
                }
                None => {
                    if product.quantity < 1 {
                        return Err(StoreError::Invalid(
                            "a new listing needs at least one unit".into(),
                        ));
                    }
                    tx.execute(
                        "INSERT INTO products
                             (product_name, seller, description, price, quantity, image, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            product.name,
                            product.seller,
                            product.description,
                            product.price,
                            product.quantity,
                            product.image,
                            now_timestamp(),
                        ],
                    )?;
                    tx.execute(
                        "INSERT OR IGNORE INTO product_owners (seller, product_name)
                         VALUES (?1, ?2)",
                        params![product.seller, product.name],
                    )?;
                    Ok(Upsert::Created {
                        quantity: product.quantity,
                    })
                }
            }
        })?;

        tracing::debug!(
            product = %product.name,
            seller = %product.seller,
            quantity = outcome.quantity(),
            "listed product"
        );
        Ok(outcome)
    }

    /// Take `quantity` units off the shelf and return what remains.
    pub fn decrement_stock(&self, name: &str, seller: &str, quantity: i64) -> Result<i64> {
        self.write_tx(|tx| decrement_in(tx, name, seller, quantity))
    }

    /// Append a row to the sales ledger.
    pub fn record_purchase(&self, buyer: &str, seller: &str, product: &str) -> Result<()> {
        record_purchase_in(&self.conn()?, buyer, seller, product)
    }

    pub fn already_purchased(&self, buyer: &str, seller: &str, product: &str) -> Result<bool> {
        already_purchased_in(&self.conn()?, buyer, seller, product)
    }

    /// Sales ledger of one seller, oldest first.
    pub fn sales_for_seller(&self, seller: &str) -> Result<Vec<Sale>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT seller, product_name, buyer, recorded_at
             FROM purchases WHERE seller = ?1 ORDER BY recorded_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![seller], |row| {
            let recorded: String = row.get(3)?;
            Ok(Sale {
                seller: row.get(0)?,
                product: row.get(1)?,
                buyer: row.get(2)?,
                recorded_at: parse_timestamp(3, &recorded)?,
            })
        })?;

        let mut sales = Vec::new();
        for row in rows {
            sales.push(row?);
        }
        Ok(sales)
    }

    /// Remove one of `seller`'s products together with its ownership entry.
    /// Other sellers' rows with the same name are untouched.
    pub fn delete_product(&self, name: &str, seller: &str) -> Result<()> {
        self.write_tx(|tx| {
            let affected = tx.execute(
                "DELETE FROM products WHERE product_name = ?1 AND seller = ?2",
                params![name, seller],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound);
            }
            tx.execute(
                "DELETE FROM product_owners WHERE seller = ?1 AND product_name = ?2",
                params![seller, name],
            )?;
            Ok(())
        })?;
        tracing::debug!(product = %name, seller = %seller, "deleted product");
        Ok(())
    }

    /// Owner edit: absolute quantity, price and description; the image is
    /// replaced only when supplied.
    pub fn edit_product(&self, owner: &str, name: &str, changes: &ProductChanges) -> Result<()> {
        if changes.quantity < 0 {
            return Err(StoreError::Invalid(format!("quantity {}", changes.quantity)));
        }
        if changes.price.is_nan() || changes.price < 0.0 {
            return Err(StoreError::Invalid(format!("price {}", changes.price)));
        }

        let affected = self.conn()?.execute(
            "UPDATE products
             SET quantity = ?3, price = ?4, description = ?5, image = COALESCE(?6, image)
             WHERE product_name = ?1 AND seller = ?2",
            params![
                name,
                owner,
                changes.quantity,
                changes.price,
                changes.description,
                changes.image,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        tracing::debug!(product = %name, seller = %owner, "edited product");
        Ok(())
    }

    /// Look a product up by name and, when known, seller. Without a seller
    /// the oldest in-stock listing of that name wins, falling back to the
    /// oldest sold-out one.
    pub fn product(&self, name: &str, seller: Option<&str>) -> Result<Product> {
        let conn = self.conn()?;
        let found = match seller {
            Some(seller) => conn.query_row(
                &format!(
                    "SELECT {PRODUCT_COLUMNS} FROM products
                     WHERE product_name = ?1 AND seller = ?2"
                ),
                params![name, seller],
                row_to_product,
            ),
            None => conn.query_row(
                &format!(
                    "SELECT {PRODUCT_COLUMNS} FROM products
                     WHERE product_name = ?1
                     ORDER BY quantity > 0 DESC, created_at ASC
                     LIMIT 1"
                ),
                params![name],
                row_to_product,
            ),
        };
        found.map_err(not_found)
    }

    /// Everything currently in stock, ordered by seller then name.
    pub fn catalog(&self) -> Result<Vec<Product>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products
             WHERE quantity > 0
             ORDER BY seller ASC, product_name ASC"
        ))?;
        let rows = stmt.query_map([], row_to_product)?;

        let mut products = Vec::new();
        for row in rows {
            products.push(row?);
        }
        Ok(products)
    }

    /// Every row of one seller, sold-out ones included.
    pub fn seller_products(&self, seller: &str) -> Result<Vec<Product>> {
        products_of_seller(&self.conn()?, seller)
    }
}

pub(crate) fn products_of_seller(conn: &Connection, seller: &str) -> Result<Vec<Product>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products
         WHERE seller = ?1
         ORDER BY product_name ASC"
    ))?;
    let rows = stmt.query_map(params![seller], row_to_product)?;

    let mut products = Vec::new();
    for row in rows {
        products.push(row?);
    }
    Ok(products)
}

/// Decrement inside an open transaction. Nothing is written unless the
/// shelf holds at least `quantity` units.
pub(crate) fn decrement_in(
    conn: &Connection,
    name: &str,
    seller: &str,
    quantity: i64,
) -> Result<i64> {
    if quantity < 1 {
        return Err(StoreError::Invalid(format!("quantity {quantity}")));
    }

    let available: i64 = conn
        .query_row(
            "SELECT quantity FROM products WHERE product_name = ?1 AND seller = ?2",
            params![name, seller],
            |row| row.get(0),
        )
        .map_err(not_found)?;

    if available < quantity {
        return Err(StoreError::InsufficientStock {
            requested: quantity,
            available,
        });
    }

    let remaining = available - quantity;
    conn.execute(
        "UPDATE products SET quantity = ?3 WHERE product_name = ?1 AND seller = ?2",
        params![name, seller, remaining],
    )?;
    tracing::debug!(product = %name, seller = %seller, remaining, "decremented stock");
    Ok(remaining)
}

pub(crate) fn record_purchase_in(
    conn: &Connection,
    buyer: &str,
    seller: &str,
    product: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO purchases (seller, product_name, buyer, recorded_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![seller, product, buyer, now_timestamp()],
    )?;
    Ok(())
}

pub(crate) fn already_purchased_in(
    conn: &Connection,
    buyer: &str,
    seller: &str,
    product: &str,
) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM purchases
             WHERE buyer = ?1 AND seller = ?2 AND product_name = ?3
         )",
        params![buyer, seller, product],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn row_to_product(row: &rusqlite::Row<'_>) -> rusqlite::Result<Product> {
    let created: String = row.get(8)?;
    Ok(Product {
        name: row.get(0)?,
        seller: row.get(1)?,
        description: row.get(2)?,
        price: row.get(3)?,
        quantity: row.get(4)?,
        rating: row.get(5)?,
        rating_count: row.get(6)?,
        image: row.get(7)?,
        created_at: parse_timestamp(8, &created)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::database::test_support::temp_db;

    fn listing(name: &str, seller: &str, quantity: i64) -> NewProduct {
        NewProduct {
            name: name.into(),
            seller: seller.into(),
            image: None,
            description: format!("{name} from {seller}"),
            price: 9.5,
            quantity,
        }
    }

    #[test]
    fn test_widget_scenario() {
        let (_dir, db) = temp_db();

        assert_eq!(
            db.upsert_product(&listing("Widget", "sam", 3)).unwrap(),
            Upsert::Created { quantity: 3 }
        );
        assert_eq!(
            db.upsert_product(&listing("Widget", "sam", 2)).unwrap(),
            Upsert::Restocked { quantity: 5 }
        );
        assert_eq!(db.seller_products("sam").unwrap().len(), 1);

        assert_eq!(db.decrement_stock("Widget", "sam", 4).unwrap(), 1);
        assert!(matches!(
            db.decrement_stock("Widget", "sam", 2),
            Err(StoreError::InsufficientStock {
                requested: 2,
                available: 1
            })
        ));
        assert_eq!(db.product("Widget", Some("sam")).unwrap().quantity, 1);
    }

    #[test]
    fn test_restock_keeps_image_unless_replaced() {
        let (_dir, db) = temp_db();
        let mut first = listing("Lamp", "sam", 1);
        first.image = Some(vec![0xFF, 0xD8]);
        db.upsert_product(&first).unwrap();

        let mut again = listing("Lamp", "sam", 1);
        again.description = "brighter".into();
        again.price = 12.0;
        db.upsert_product(&again).unwrap();

        let lamp = db.product("Lamp", Some("sam")).unwrap();
        assert_eq!(lamp.image, Some(vec![0xFF, 0xD8]));
        assert_eq!(lamp.description, "brighter");
        assert_eq!(lamp.price, 12.0);
        assert_eq!(lamp.quantity, 2);
    }

    #[test]
    fn test_restock_overflow_is_rejected() {
        let (_dir, db) = temp_db();
        db.upsert_product(&listing("Widget", "sam", i64::MAX - 1))
            .unwrap();

        let mut again = listing("Widget", "sam", 5);
        again.price = 1.0;
        assert!(matches!(
            db.upsert_product(&again),
            Err(StoreError::Invalid(_))
        ));

        let widget = db.product("Widget", Some("sam")).unwrap();
        assert_eq!(widget.quantity, i64::MAX - 1);
        assert_eq!(widget.price, 9.5);
    }

    #[test]
    fn test_listing_validation() {
        let (_dir, db) = temp_db();
        assert!(matches!(
            db.upsert_product(&listing("Widget", "sam", 0)),
            Err(StoreError::Invalid(_))
        ));
        let mut negative = listing("Widget", "sam", 1);
        negative.price = -1.0;
        assert!(matches!(
            db.upsert_product(&negative),
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            db.decrement_stock("Widget", "sam", 1),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_catalog_hides_sold_out() {
        let (_dir, db) = temp_db();
        db.upsert_product(&listing("Widget", "sam", 1)).unwrap();
        db.upsert_product(&listing("Gadget", "sam", 2)).unwrap();
        db.upsert_product(&listing("Widget", "ann", 4)).unwrap();
        db.decrement_stock("Widget", "sam", 1).unwrap();

        let catalog = db.catalog().unwrap();
        let names: Vec<_> = catalog
            .iter()
            .map(|p| (p.seller.as_str(), p.name.as_str()))
            .collect();
        assert_eq!(names, vec![("ann", "Widget"), ("sam", "Gadget")]);

        // Sold-out rows still exist for the seller's profile.
        assert_eq!(db.seller_products("sam").unwrap().len(), 2);
    }

    #[test]
    fn test_product_lookup_without_seller() {
        let (_dir, db) = temp_db();
        db.upsert_product(&listing("Widget", "sam", 1)).unwrap();
        db.upsert_product(&listing("Widget", "ann", 1)).unwrap();
        db.decrement_stock("Widget", "sam", 1).unwrap();

        assert_eq!(db.product("Widget", None).unwrap().seller, "ann");
        assert_eq!(db.product("Widget", Some("SAM")).unwrap().seller, "sam");
        assert!(matches!(
            db.product("Nothing", None),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_delete_is_owner_scoped() {
        let (_dir, db) = temp_db();
        db.upsert_product(&listing("Widget", "sam", 1)).unwrap();
        db.upsert_product(&listing("Widget", "ann", 1)).unwrap();

        db.delete_product("Widget", "sam").unwrap();
        assert!(matches!(
            db.delete_product("Widget", "sam"),
            Err(StoreError::NotFound)
        ));
        assert!(db.product("Widget", Some("ann")).is_ok());

        let owners: i64 = db
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM product_owners", [], |row| row.get(0))
            .unwrap();
        assert_eq!(owners, 1);
    }

    #[test]
    fn test_edit_product() {
        let (_dir, db) = temp_db();
        db.upsert_product(&listing("Widget", "sam", 5)).unwrap();

        let changes = ProductChanges {
            quantity: 2,
            price: 3.0,
            description: "smaller".into(),
            image: None,
        };
        db.edit_product("sam", "Widget", &changes).unwrap();
        assert!(matches!(
            db.edit_product("ann", "Widget", &changes),
            Err(StoreError::NotFound)
        ));

        let widget = db.product("Widget", Some("sam")).unwrap();
        assert_eq!(widget.quantity, 2);
        assert_eq!(widget.price, 3.0);
        assert_eq!(widget.description, "smaller");
    }

    #[test]
    fn test_sales_ledger() {
        let (_dir, db) = temp_db();
        assert!(!db.already_purchased("bob", "sam", "Widget").unwrap());
        db.record_purchase("bob", "sam", "Widget").unwrap();
        db.record_purchase("cat", "sam", "Gadget").unwrap();

        assert!(db.already_purchased("BOB", "sam", "Widget").unwrap());
        assert!(!db.already_purchased("bob", "sam", "Gadget").unwrap());

        let sales = db.sales_for_seller("sam").unwrap();
        assert_eq!(sales.len(), 2);
        assert_eq!(sales[0].buyer, "bob");
        assert_eq!(sales[1].product, "Gadget");
    }

    #[test]
    fn test_concurrent_decrement_at_quantity_one() {
        let (_dir, db) = temp_db();
        db.upsert_product(&listing("Widget", "sam", 1)).unwrap();
        let db = Arc::new(db);

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let db = Arc::clone(&db);
                thread::spawn(move || db.decrement_stock("Widget", "sam", 1))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(StoreError::InsufficientStock { .. }))));
        assert_eq!(db.product("Widget", Some("sam")).unwrap().quantity, 0);
    }
}
