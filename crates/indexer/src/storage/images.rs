//! Uploaded image metadata.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{CollectibleImage, Storage};

fn row_to_image(row: &SqliteRow) -> Result<CollectibleImage> {
    Ok(CollectibleImage {
        rfid_hash: row.try_get("rfid_hash")?,
        url: row.try_get("url")?,
        width: row.try_get::<i64, _>("width")? as u32,
        height: row.try_get::<i64, _>("height")? as u32,
        created_at: row.try_get::<i64, _>("created_at")? as u64,
    })
}

impl Storage {
    /// Record (or replace) the image associated with a collectible.
    pub async fn upsert_collectible_image(&self, image: &CollectibleImage) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO collectible_images (rfid_hash, url, width, height, created_at)
VALUES (?, ?, ?, ?, ?)
ON CONFLICT (rfid_hash) DO UPDATE SET
    url = excluded.url,
    width = excluded.width,
    height = excluded.height,
    created_at = excluded.created_at
"#,
        )
        .bind(image.rfid_hash.to_ascii_lowercase())
        .bind(&image.url)
        .bind(image.width as i64)
        .bind(image.height as i64)
        .bind(image.created_at as i64)
        .execute(self.pool())
        .await
        .context("Failed to upsert collectible image")?;

        Ok(())
    }

    /// Fetch the image row for a collectible (case-insensitive key).
    pub async fn collectible_image(&self, rfid_hash: &str) -> Result<Option<CollectibleImage>> {
        let row = sqlx::query(
            "SELECT rfid_hash, url, width, height, created_at \
             FROM collectible_images WHERE rfid_hash = ?",
        )
        .bind(rfid_hash.to_ascii_lowercase())
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch collectible image")?;

        row.as_ref().map(row_to_image).transpose()
    }
}
