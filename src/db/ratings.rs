//! Player ratings directory.
//!
//! Every player has a skill rating used to balance teams. Players never
//! rated by an admin get the configured default.

use super::{Database, DbError};
use crate::state::{ActorId, Rating};
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::SqlitePool;

/// A stored rating row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRating {
    pub actor_id: ActorId,
    pub rating: Rating,
    pub updated_at: i64,
}

/// Repository for rating operations.
pub struct RatingRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RatingRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Stored rating for a player, if an admin ever set one.
    pub async fn get(&self, actor_id: ActorId) -> Result<Option<Rating>, DbError> {
        let rating = sqlx::query_scalar::<_, Rating>(
            "SELECT rating FROM player_ratings WHERE actor_id = ?",
        )
        .bind(actor_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(rating)
    }

    /// Insert or replace a player's rating.
    pub async fn set(&self, actor_id: ActorId, rating: Rating) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO player_ratings (actor_id, rating, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(actor_id) DO UPDATE SET
                rating = excluded.rating,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(actor_id)
        .bind(rating)
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// All stored ratings, highest first.
    pub async fn list(&self) -> Result<Vec<PlayerRating>, DbError> {
        let rows = sqlx::query_as::<_, (i64, i32, i64)>(
            "SELECT actor_id, rating, updated_at FROM player_ratings ORDER BY rating DESC, actor_id",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(actor_id, rating, updated_at)| PlayerRating {
                actor_id,
                rating,
                updated_at,
            })
            .collect())
    }
}

/// Source of player ratings for the dispatcher.
#[async_trait]
pub trait RatingProvider: Send + Sync {
    /// Stored rating for a player, `None` when never set.
    async fn rating(&self, actor_id: ActorId) -> Result<Option<Rating>, DbError>;

    /// Record a rating chosen by an admin.
    async fn set_rating(&self, actor_id: ActorId, rating: Rating) -> Result<(), DbError>;
}

#[async_trait]
impl RatingProvider for Database {
    async fn rating(&self, actor_id: ActorId) -> Result<Option<Rating>, DbError> {
        self.ratings().get(actor_id).await
    }

    async fn set_rating(&self, actor_id: ActorId, rating: Rating) -> Result<(), DbError> {
        self.ratings().set(actor_id, rating).await
    }
}

/// In-process ratings, for tests and deployments without a database.
#[derive(Debug, Default)]
pub struct MemoryRatings {
    ratings: DashMap<ActorId, Rating>,
}

impl MemoryRatings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed ratings up front.
    pub fn with_ratings(ratings: impl IntoIterator<Item = (ActorId, Rating)>) -> Self {
        Self {
            ratings: ratings.into_iter().collect(),
        }
    }
}

#[async_trait]
impl RatingProvider for MemoryRatings {
    async fn rating(&self, actor_id: ActorId) -> Result<Option<Rating>, DbError> {
        Ok(self.ratings.get(&actor_id).map(|r| *r))
    }

    async fn set_rating(&self, actor_id: ActorId, rating: Rating) -> Result<(), DbError> {
        self.ratings.insert(actor_id, rating);
        Ok(())
    }
}
