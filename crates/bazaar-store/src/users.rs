use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rusqlite::{params, OptionalExtension};

use crate::database::{now_timestamp, parse_timestamp, Database};
use crate::error::{not_found, Result, StoreError};
use crate::models::{Profile, ProfileChanges, User};
use crate::products::products_of_seller;

impl Database {
    /// Register a new account. Fails with [`StoreError::AlreadyExists`] when
    /// the username collides case-insensitively with an existing one.
    pub fn create_user(&self, username: &str, password: &str, display_name: &str) -> Result<User> {
        if username.is_empty() {
            return Err(StoreError::Invalid("empty username".into()));
        }
        if password.is_empty() {
            return Err(StoreError::Invalid("empty password".into()));
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| StoreError::PasswordHash(e.to_string()))?
            .to_string();
        let now = now_timestamp();

        // The primary key is NOCASE, so the insert itself is the uniqueness
        // check; no read-then-write window exists.
        let inserted = self.conn()?.execute(
            "INSERT INTO users (username, password_hash, display_name, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![username, password_hash, display_name, now],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::AlreadyExists);
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(user = %username, "created user");
        self.get_user(username)
    }

    pub fn user_exists(&self, username: &str) -> Result<bool> {
        let exists = self.conn()?.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
            params![username],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Check a password against the stored hash. Unknown users verify as
    /// `false`.
    pub fn verify_credentials(&self, username: &str, password: &str) -> Result<bool> {
        let stored: Option<String> = self
            .conn()?
            .query_row(
                "SELECT password_hash FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;

        let Some(stored) = stored else {
            return Ok(false);
        };

        let parsed = match PasswordHash::new(&stored) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(user = %username, error = %e, "unparseable password hash");
                return Ok(false);
            }
        };

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    pub fn get_user(&self, username: &str) -> Result<User> {
        self.conn()?
            .query_row(
                "SELECT username, display_name, bio, profile_picture, created_at
                 FROM users WHERE username = ?1",
                params![username],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// Profile page for `username`: account fields, the mean of the person
    /// ratings received, and the seller's current and sold-out products.
    pub fn get_profile(&self, username: &str) -> Result<Profile> {
        let user = self.get_user(username)?;
        let conn = self.conn()?;

        let avg_rating: Option<f64> = conn.query_row(
            "SELECT AVG(rating) FROM person_ratings WHERE rated_user = ?1",
            params![username],
            |row| row.get(0),
        )?;

        let (current_products, previous_products) = products_of_seller(&conn, username)?
            .into_iter()
            .partition(|p| p.quantity > 0);

        Ok(Profile {
            user,
            avg_rating: avg_rating.unwrap_or(0.0),
            current_products,
            previous_products,
        })
    }

    pub fn update_profile(&self, username: &str, changes: &ProfileChanges) -> Result<()> {
        let affected = self.conn()?.execute(
            "UPDATE users
             SET display_name = COALESCE(?2, display_name),
                 bio = COALESCE(?3, bio),
                 profile_picture = COALESCE(?4, profile_picture)
             WHERE username = ?1",
            params![
                username,
                changes.display_name,
                changes.bio,
                changes.profile_picture,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        tracing::debug!(user = %username, "updated profile");
        Ok(())
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let created: String = row.get(4)?;
    Ok(User {
        username: row.get(0)?,
        display_name: row.get(1)?,
        bio: row.get(2)?,
        profile_picture: row.get(3)?,
        created_at: parse_timestamp(4, &created)?,
    })
}
