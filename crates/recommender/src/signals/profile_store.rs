//! PostgreSQL-backed interest profiles
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE user_interests (
//!     user_id BIGINT NOT NULL,
//!     interest TEXT NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     PRIMARY KEY (user_id, interest)
//! );
//! ```

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, instrument};

use super::ProfileSource;
use crate::config::DatabaseConfig;
use crate::types::{InterestProfile, UserId};

pub struct PostgresInterestStore {
    pool: PgPool,
}

impl PostgresInterestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_sec))
            .connect(&config.url)
            .await
            .context("Failed to connect to interest store")?;

        Ok(Self::new(pool))
    }

    /// Replace a user's interests
    pub async fn set_interests(&self, user_id: UserId, interests: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM user_interests WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear interests")?;

        for interest in interests {
            sqlx::query(
                r#"
                INSERT INTO user_interests (user_id, interest)
                VALUES ($1, $2)
                ON CONFLICT (user_id, interest) DO UPDATE SET updated_at = NOW()
                "#,
            )
            .bind(user_id)
            .bind(interest)
            .execute(&mut *tx)
            .await
            .context("Failed to store interest")?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProfileSource for PostgresInterestStore {
    #[instrument(skip(self))]
    async fn interests(&self, user_id: UserId) -> Result<InterestProfile> {
        let rows = sqlx::query(
            r#"
            SELECT interest
            FROM user_interests
            WHERE user_id = $1
            ORDER BY interest
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load user interests")?;

        let interests = rows
            .iter()
            .map(|row| row.get::<String, _>("interest"))
            .filter(|interest| !interest.trim().is_empty())
            .collect();

        let profile = InterestProfile { user_id, interests };
        debug!(interests = profile.interests.len(), "Loaded interest profile");
        Ok(profile)
    }
}
