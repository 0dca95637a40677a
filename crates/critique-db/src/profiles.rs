//! Dimensional profile repository implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use critique_core::{
    new_v7, Dimension, DimensionScores, DimensionalProfile, Error, ProfileMetadata,
    ProfileRepository, Result, UpsertProfileRequest,
};

const PROFILE_COLUMNS: &str = "id, advisor_id, image_path, \
     composition, lighting, focus, color, isolation, depth, balance, emotion, \
     comments, title, date_taken, location, significance, technique_tags, \
     overall_grade, working_set, created_at, updated_at";

/// PostgreSQL implementation of ProfileRepository.
pub struct PgProfileRepository {
    pool: Pool<Postgres>,
}

impl PgProfileRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_profile_row(row: sqlx::postgres::PgRow) -> Result<DimensionalProfile> {
        let mut scores = DimensionScores::default();
        for dim in Dimension::ALL {
            scores.set(dim, row.get::<Option<f64>, _>(dim.as_str()));
        }

        let comments: BTreeMap<Dimension, String> =
            serde_json::from_value(row.get::<serde_json::Value, _>("comments"))?;
        let tags: Vec<String> = row.get("technique_tags");

        Ok(DimensionalProfile {
            id: row.get("id"),
            advisor_id: row.get("advisor_id"),
            image_path: row.get("image_path"),
            scores,
            comments,
            metadata: ProfileMetadata {
                title: row.get("title"),
                date: row.get("date_taken"),
                location: row.get("location"),
                significance: row.get("significance"),
                technique_tags: tags.into_iter().collect(),
            },
            overall_grade: row.get("overall_grade"),
            working_set: row.get("working_set"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl ProfileRepository for PgProfileRepository {
    async fn put(&self, req: UpsertProfileRequest) -> Result<DimensionalProfile> {
        req.validate()?;
        let grade = req.effective_grade();
        let now = Utc::now();
        let comments = serde_json::to_value(&req.comments)?;
        let tags: Vec<String> = req.metadata.technique_tags.iter().cloned().collect();

        // An older stamp never overwrites a newer one; the row that is
        // current after the statement is what the caller gets back.
        let sql = format!(
            "INSERT INTO dimensional_profile ({PROFILE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                     $17, $18, $19, $20, $20) \
             ON CONFLICT (advisor_id, image_path) DO UPDATE SET \
                composition = EXCLUDED.composition, lighting = EXCLUDED.lighting, \
                focus = EXCLUDED.focus, color = EXCLUDED.color, \
                isolation = EXCLUDED.isolation, depth = EXCLUDED.depth, \
                balance = EXCLUDED.balance, emotion = EXCLUDED.emotion, \
                comments = EXCLUDED.comments, title = EXCLUDED.title, \
                date_taken = EXCLUDED.date_taken, location = EXCLUDED.location, \
                significance = EXCLUDED.significance, \
                technique_tags = EXCLUDED.technique_tags, \
                overall_grade = EXCLUDED.overall_grade, \
                working_set = EXCLUDED.working_set, \
                updated_at = EXCLUDED.updated_at \
             WHERE dimensional_profile.updated_at <= EXCLUDED.updated_at \
             RETURNING {PROFILE_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(new_v7())
            .bind(&req.advisor_id)
            .bind(&req.image_path)
            .bind(req.scores.composition)
            .bind(req.scores.lighting)
            .bind(req.scores.focus)
            .bind(req.scores.color)
            .bind(req.scores.isolation)
            .bind(req.scores.depth)
            .bind(req.scores.balance)
            .bind(req.scores.emotion)
            .bind(comments)
            .bind(&req.metadata.title)
            .bind(&req.metadata.date)
            .bind(&req.metadata.location)
            .bind(&req.metadata.significance)
            .bind(&tags)
            .bind(&grade)
            .bind(req.working_set)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        let profile = match row {
            Some(row) => Self::parse_profile_row(row)?,
            None => self
                .get(&req.advisor_id, &req.image_path)
                .await?
                .ok_or_else(|| {
                    Error::Internal(format!(
                        "profile {}/{} vanished during upsert",
                        req.advisor_id, req.image_path
                    ))
                })?,
        };

        debug!(
            subsystem = "database",
            component = "profiles",
            op = "put",
            advisor_id = %profile.advisor_id,
            image_path = %profile.image_path,
            working_set = profile.working_set,
            "Profile stored"
        );
        Ok(profile)
    }

    async fn get(&self, advisor_id: &str, image_path: &str) -> Result<Option<DimensionalProfile>> {
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM dimensional_profile \
             WHERE advisor_id = $1 AND image_path = $2"
        );
        let row = sqlx::query(&sql)
            .bind(advisor_id)
            .bind(image_path)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_profile_row).transpose()
    }

    async fn scan(
        &self,
        advisor_id: &str,
        exclude_paths: &[String],
    ) -> Result<Vec<DimensionalProfile>> {
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM dimensional_profile \
             WHERE advisor_id = $1 AND NOT working_set \
               AND NOT (image_path = ANY($2)) \
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(advisor_id)
            .bind(exclude_paths)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_profile_row).collect()
    }

    async fn count_references(&self, advisor_id: &str, exclude_paths: &[String]) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM dimensional_profile \
             WHERE advisor_id = $1 AND NOT working_set AND NOT (image_path = ANY($2))",
        )
        .bind(advisor_id)
        .bind(exclude_paths)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }
}
