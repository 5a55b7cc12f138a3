//! Collectible projection queries.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use super::{Collectible, Storage};

const UPSERT_SQL: &str = r#"
INSERT INTO collectibles (
    rfid_hash, rfid, token_id, owner, authenticity_hash,
    burned, redeemed, last_event, last_update_block, last_update_tx
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (rfid_hash) DO UPDATE SET
    rfid = excluded.rfid,
    token_id = excluded.token_id,
    owner = excluded.owner,
    authenticity_hash = excluded.authenticity_hash,
    burned = excluded.burned,
    redeemed = excluded.redeemed,
    last_event = excluded.last_event,
    last_update_block = excluded.last_update_block,
    last_update_tx = excluded.last_update_tx
"#;

const SELECT_COLUMNS: &str = r#"
SELECT rfid_hash, rfid, token_id, owner, authenticity_hash,
       burned, redeemed, last_event, last_update_block, last_update_tx
FROM collectibles
"#;

fn row_to_collectible(row: &SqliteRow) -> Result<Collectible> {
    Ok(Collectible {
        rfid_hash: row.try_get("rfid_hash")?,
        rfid: row.try_get("rfid")?,
        token_id: row.try_get("token_id")?,
        owner: row.try_get("owner")?,
        authenticity_hash: row.try_get("authenticity_hash")?,
        burned: row.try_get::<i64, _>("burned")? != 0,
        redeemed: row.try_get::<i64, _>("redeemed")? != 0,
        last_event: row.try_get("last_event")?,
        last_update_block: row.try_get::<i64, _>("last_update_block")? as u64,
        last_update_tx: row.try_get("last_update_tx")?,
    })
}

/// Upsert a collectible row through any executor. The key is stored
/// lowercased so lookups are case-insensitive by construction.
pub async fn upsert_collectible<'e, E>(executor: E, collectible: &Collectible) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(UPSERT_SQL)
        .bind(collectible.rfid_hash.to_ascii_lowercase())
        .bind(&collectible.rfid)
        .bind(&collectible.token_id)
        .bind(&collectible.owner)
        .bind(&collectible.authenticity_hash)
        .bind(collectible.burned as i64)
        .bind(collectible.redeemed as i64)
        .bind(&collectible.last_event)
        .bind(collectible.last_update_block as i64)
        .bind(&collectible.last_update_tx)
        .execute(executor)
        .await
        .context("Failed to upsert collectible")?;

    Ok(())
}

impl Storage {
    /// Upsert a collectible through the pool.
    pub async fn upsert_collectible(&self, collectible: &Collectible) -> Result<()> {
        upsert_collectible(self.pool(), collectible).await
    }

    /// Fetch a collectible by rfid hash (case-insensitive).
    pub async fn collectible_by_rfid_hash(&self, rfid_hash: &str) -> Result<Option<Collectible>> {
        let sql = format!("{} WHERE rfid_hash = ? LIMIT 1", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(rfid_hash.to_ascii_lowercase())
            .fetch_optional(self.pool())
            .await
            .context("Failed to fetch collectible by rfid hash")?;

        row.as_ref().map(row_to_collectible).transpose()
    }

    /// Fetch the collectible linked to an NFT token id, if any.
    pub async fn collectible_by_token_id(&self, token_id: &str) -> Result<Option<Collectible>> {
        let sql = format!("{} WHERE token_id = ? LIMIT 1", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(token_id)
            .fetch_optional(self.pool())
            .await
            .context("Failed to fetch collectible by token id")?;

        row.as_ref().map(row_to_collectible).transpose()
    }

    /// All collectibles.
    pub async fn all_collectibles(&self) -> Result<Vec<Collectible>> {
        let rows = sqlx::query(SELECT_COLUMNS)
            .fetch_all(self.pool())
            .await
            .context("Failed to fetch collectibles")?;

        rows.iter().map(row_to_collectible).collect()
    }

    /// Collectibles currently owned by an address (case-insensitive).
    pub async fn collectibles_by_owner(&self, owner: &str) -> Result<Vec<Collectible>> {
        let sql = format!("{} WHERE LOWER(owner) = LOWER(?)", SELECT_COLUMNS);
        let rows = sqlx::query(&sql)
            .bind(owner)
            .fetch_all(self.pool())
            .await
            .context("Failed to fetch collectibles by owner")?;

        rows.iter().map(row_to_collectible).collect()
    }

    /// Whether a collectible with this rfid hash exists (case-insensitive).
    pub async fn rfid_hash_exists(&self, rfid_hash: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM collectibles WHERE rfid_hash = ?")
                .bind(rfid_hash.to_ascii_lowercase())
                .fetch_one(self.pool())
                .await
                .context("Failed to check rfid hash existence")?;

        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::setup_storage;
    use super::*;

    fn sample(rfid_hash: &str, owner: &str) -> Collectible {
        Collectible {
            rfid_hash: rfid_hash.to_string(),
            rfid: Some("TAG-001".to_string()),
            token_id: Some("5".to_string()),
            owner: Some(owner.to_string()),
            authenticity_hash: Some("0xdoc".to_string()),
            burned: false,
            redeemed: false,
            last_event: "CollectibleRegistered".to_string(),
            last_update_block: 3,
            last_update_tx: "0xbbb".to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_stores_key_lowercased() {
        let (storage, _dir) = setup_storage().await;

        storage
            .upsert_collectible(&sample("0xABCDEF", "0xowner"))
            .await
            .unwrap();

        let fetched = storage
            .collectible_by_rfid_hash("0xAbCdEf")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.rfid_hash, "0xabcdef");

        assert!(storage.rfid_hash_exists("0xABCDEF").await.unwrap());
        assert!(!storage.rfid_hash_exists("0xother").await.unwrap());
    }

    #[tokio::test]
    async fn lookup_by_token_id_and_owner() {
        let (storage, _dir) = setup_storage().await;

        storage
            .upsert_collectible(&sample("0xaaa", "0xAlice"))
            .await
            .unwrap();
        let mut other = sample("0xbbb", "0xBob");
        other.token_id = Some("9".to_string());
        storage.upsert_collectible(&other).await.unwrap();

        let by_token = storage.collectible_by_token_id("9").await.unwrap().unwrap();
        assert_eq!(by_token.rfid_hash, "0xbbb");

        let owned = storage.collectibles_by_owner("0xALICE").await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].rfid_hash, "0xaaa");

        assert_eq!(storage.all_collectibles().await.unwrap().len(), 2);
    }
}
