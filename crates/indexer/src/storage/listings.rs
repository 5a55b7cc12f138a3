//! Listing projection queries.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use super::{Listing, Storage};

const UPSERT_SQL: &str = r#"
INSERT INTO listings (
    nft, token_id, seller, price, buyer, active,
    last_event, last_update_block, last_update_tx
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (nft, token_id) DO UPDATE SET
    seller = excluded.seller,
    price = excluded.price,
    buyer = excluded.buyer,
    active = excluded.active,
    last_event = excluded.last_event,
    last_update_block = excluded.last_update_block,
    last_update_tx = excluded.last_update_tx
"#;

const SELECT_COLUMNS: &str = r#"
SELECT nft, token_id, seller, price, buyer, active,
       last_event, last_update_block, last_update_tx
FROM listings
"#;

fn row_to_listing(row: &SqliteRow) -> Result<Listing> {
    Ok(Listing {
        nft: row.try_get("nft")?,
        token_id: row.try_get("token_id")?,
        seller: row.try_get("seller")?,
        price: row.try_get("price")?,
        buyer: row.try_get("buyer")?,
        active: row.try_get::<i64, _>("active")? != 0,
        last_event: row.try_get("last_event")?,
        last_update_block: row.try_get::<i64, _>("last_update_block")? as u64,
        last_update_tx: row.try_get("last_update_tx")?,
    })
}

/// Upsert a listing row through any executor (pool or open transaction).
/// Latest write wins on every column. The nft key is stored lowercased
/// so mixed-case writers can never split one listing across two rows.
pub async fn upsert_listing<'e, E>(executor: E, listing: &Listing) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(UPSERT_SQL)
        .bind(listing.nft.to_ascii_lowercase())
        .bind(&listing.token_id)
        .bind(&listing.seller)
        .bind(&listing.price)
        .bind(&listing.buyer)
        .bind(listing.active as i64)
        .bind(&listing.last_event)
        .bind(listing.last_update_block as i64)
        .bind(&listing.last_update_tx)
        .execute(executor)
        .await
        .context("Failed to upsert listing")?;

    Ok(())
}

impl Storage {
    /// Upsert a listing through the pool.
    pub async fn upsert_listing(&self, listing: &Listing) -> Result<()> {
        upsert_listing(self.pool(), listing).await
    }

    /// Fetch a listing by its `(nft, token_id)` key, active or not.
    pub async fn get_listing(&self, nft: &str, token_id: &str) -> Result<Option<Listing>> {
        let sql = format!("{} WHERE nft = ? AND token_id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(nft.to_ascii_lowercase())
            .bind(token_id)
            .fetch_optional(self.pool())
            .await
            .context("Failed to fetch listing")?;

        row.as_ref().map(row_to_listing).transpose()
    }

    /// All currently active listings, most recently updated first.
    pub async fn active_listings(&self) -> Result<Vec<Listing>> {
        let sql = format!(
            "{} WHERE active = 1 ORDER BY last_update_block DESC, last_update_tx DESC",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .fetch_all(self.pool())
            .await
            .context("Failed to fetch active listings")?;

        rows.iter().map(row_to_listing).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::setup_storage;
    use super::*;

    fn sample(nft: &str, token_id: &str, active: bool) -> Listing {
        Listing {
            nft: nft.to_string(),
            token_id: token_id.to_string(),
            seller: "0xseller".to_string(),
            price: "1000".to_string(),
            buyer: None,
            active,
            last_event: "CollectibleListed".to_string(),
            last_update_block: 10,
            last_update_tx: "0xaaa".to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_inserts_then_replaces() {
        let (storage, _dir) = setup_storage().await;

        let listing = sample("0xnft", "1", true);
        storage.upsert_listing(&listing).await.unwrap();

        let mut updated = listing.clone();
        updated.price = "2000".to_string();
        updated.last_event = "CollectiblePriceUpdated".to_string();
        updated.last_update_block = 11;
        storage.upsert_listing(&updated).await.unwrap();

        let fetched = storage.get_listing("0xnft", "1").await.unwrap().unwrap();
        assert_eq!(fetched, updated);

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.listing_count, 1);
    }

    #[tokio::test]
    async fn active_listings_excludes_inactive_rows() {
        let (storage, _dir) = setup_storage().await;

        storage.upsert_listing(&sample("0xnft", "1", true)).await.unwrap();
        storage.upsert_listing(&sample("0xnft", "2", false)).await.unwrap();

        let active = storage.active_listings().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token_id, "1");
    }

    #[tokio::test]
    async fn get_listing_lowercases_the_nft_key() {
        let (storage, _dir) = setup_storage().await;

        storage.upsert_listing(&sample("0xabcd", "7", true)).await.unwrap();

        let fetched = storage.get_listing("0xABCD", "7").await.unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn upsert_stores_the_nft_key_lowercased() {
        let (storage, _dir) = setup_storage().await;

        storage.upsert_listing(&sample("0xABCD", "7", true)).await.unwrap();

        let fetched = storage.get_listing("0xabcd", "7").await.unwrap().unwrap();
        assert_eq!(fetched.nft, "0xabcd");

        // A mixed-case writer lands on the same row, not a second one.
        storage.upsert_listing(&sample("0xAbCd", "7", false)).await.unwrap();
        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.listing_count, 1);
        assert!(!storage.get_listing("0xabcd", "7").await.unwrap().unwrap().active);
    }
}
