use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::db::{HouseholdCatalog, OwnedBook, StoreError};

/// Reads a household's books from the catalog's `books` table.
#[derive(Clone)]
pub struct PgHouseholdCatalog {
    pool: PgPool,
}

impl PgHouseholdCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HouseholdCatalog for PgHouseholdCatalog {
    async fn owned_books(&self, household_id: &str) -> Result<Vec<OwnedBook>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT title, author, series
            FROM books
            WHERE family_id = $1
            "#,
        )
        .bind(household_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(OwnedBook {
                    title: r.try_get("title")?,
                    author: r.try_get("author")?,
                    series: r.try_get("series")?,
                })
            })
            .collect()
    }
}
