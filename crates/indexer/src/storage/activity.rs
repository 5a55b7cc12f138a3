//! Activity trail queries.
//!
//! One row per applied domain event. `UNIQUE(tx, log_index)` plus
//! `ON CONFLICT DO NOTHING` makes re-delivery of the same log a no-op,
//! which is what keeps backfill/live overlap and replay idempotent.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use super::{ActivityEvent, Collectible, Storage};

const INSERT_SQL: &str = r#"
INSERT INTO activity_events (
    contract, event_name, rfid_hash, nft, token_id,
    seller, buyer, owner, price, block, tx, log_index, created_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (tx, log_index) DO NOTHING
"#;

const SELECT_COLUMNS: &str = r#"
SELECT contract, event_name, rfid_hash, nft, token_id,
       seller, buyer, owner, price, block, tx, log_index, created_at
FROM activity_events
"#;

fn row_to_activity(row: &SqliteRow) -> Result<ActivityEvent> {
    Ok(ActivityEvent {
        contract: row.try_get("contract")?,
        event_name: row.try_get("event_name")?,
        rfid_hash: row.try_get("rfid_hash")?,
        nft: row.try_get("nft")?,
        token_id: row.try_get("token_id")?,
        seller: row.try_get("seller")?,
        buyer: row.try_get("buyer")?,
        owner: row.try_get("owner")?,
        price: row.try_get("price")?,
        block: row.try_get::<i64, _>("block")? as u64,
        tx: row.try_get("tx")?,
        log_index: row.try_get::<i64, _>("log_index")? as u64,
        created_at: row.try_get::<i64, _>("created_at")? as u64,
    })
}

/// Append an activity row through any executor. Duplicate `(tx, log_index)`
/// pairs are silently ignored.
pub async fn insert_activity<'e, E>(executor: E, event: &ActivityEvent) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(INSERT_SQL)
        .bind(&event.contract)
        .bind(&event.event_name)
        .bind(&event.rfid_hash)
        .bind(&event.nft)
        .bind(&event.token_id)
        .bind(&event.seller)
        .bind(&event.buyer)
        .bind(&event.owner)
        .bind(&event.price)
        .bind(event.block as i64)
        .bind(&event.tx)
        .bind(event.log_index as i64)
        .bind(event.created_at as i64)
        .execute(executor)
        .await
        .context("Failed to insert activity event")?;

    Ok(())
}

/// A collectible with its full oldest-first event trail.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CollectibleDetails {
    /// The collectible row, if the key resolved to one.
    pub collectible: Option<Collectible>,
    /// Activity rows matching the collectible's token id or rfid hash.
    pub events: Vec<ActivityEvent>,
}

impl Storage {
    /// Append an activity row through the pool.
    pub async fn insert_activity(&self, event: &ActivityEvent) -> Result<()> {
        insert_activity(self.pool(), event).await
    }

    /// Activity rows where the address appears as seller, buyer or owner,
    /// newest first.
    pub async fn activity_by_address(&self, address: &str) -> Result<Vec<ActivityEvent>> {
        let sql = format!(
            r#"{}
WHERE LOWER(seller) = LOWER(?)
   OR LOWER(buyer) = LOWER(?)
   OR LOWER(owner) = LOWER(?)
ORDER BY block DESC, log_index DESC"#,
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(address)
            .bind(address)
            .bind(address)
            .fetch_all(self.pool())
            .await
            .context("Failed to fetch activity by address")?;

        rows.iter().map(row_to_activity).collect()
    }

    /// Collectible details keyed by NFT token id: the collectible row plus
    /// every activity row matching its token id or rfid hash, oldest first.
    pub async fn collectible_details_by_token_id(
        &self,
        token_id: &str,
    ) -> Result<CollectibleDetails> {
        let collectible = self.collectible_by_token_id(token_id).await?;
        let rfid_hash = collectible
            .as_ref()
            .map(|c| c.rfid_hash.clone())
            .unwrap_or_default();

        let sql = format!(
            r#"{}
WHERE token_id = ?
   OR (rfid_hash IS NOT NULL AND LOWER(rfid_hash) = ?)
ORDER BY block ASC, log_index ASC"#,
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(token_id)
            .bind(&rfid_hash)
            .fetch_all(self.pool())
            .await
            .context("Failed to fetch collectible event trail")?;

        Ok(CollectibleDetails {
            collectible,
            events: rows.iter().map(row_to_activity).collect::<Result<_>>()?,
        })
    }

    /// Collectible details keyed by rfid hash (case-insensitive).
    pub async fn collectible_details_by_rfid_hash(
        &self,
        rfid_hash: &str,
    ) -> Result<CollectibleDetails> {
        let norm = rfid_hash.to_ascii_lowercase();
        let collectible = self.collectible_by_rfid_hash(&norm).await?;
        let token_id = collectible
            .as_ref()
            .and_then(|c| c.token_id.clone())
            .unwrap_or_default();

        let sql = format!(
            r#"{}
WHERE (rfid_hash IS NOT NULL AND LOWER(rfid_hash) = ?)
   OR (token_id IS NOT NULL AND token_id = ?)
ORDER BY block ASC, log_index ASC"#,
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(&norm)
            .bind(&token_id)
            .fetch_all(self.pool())
            .await
            .context("Failed to fetch collectible event trail")?;

        Ok(CollectibleDetails {
            collectible,
            events: rows.iter().map(row_to_activity).collect::<Result<_>>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::setup_storage;
    use super::*;

    fn sample(tx: &str, log_index: u64, block: u64) -> ActivityEvent {
        ActivityEvent {
            contract: "market".to_string(),
            event_name: "CollectibleListed".to_string(),
            rfid_hash: None,
            nft: Some("0xnft".to_string()),
            token_id: Some("1".to_string()),
            seller: Some("0xSeller".to_string()),
            buyer: None,
            owner: None,
            price: Some("100".to_string()),
            block,
            tx: tx.to_string(),
            log_index,
            created_at: 1,
        }
    }

    #[tokio::test]
    async fn duplicate_tx_log_index_is_ignored() {
        let (storage, _dir) = setup_storage().await;

        storage.insert_activity(&sample("0x01", 0, 5)).await.unwrap();
        storage.insert_activity(&sample("0x01", 0, 5)).await.unwrap();
        storage.insert_activity(&sample("0x01", 1, 5)).await.unwrap();

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.activity_count, 2);
    }

    #[tokio::test]
    async fn activity_by_address_matches_any_role_newest_first() {
        let (storage, _dir) = setup_storage().await;

        storage.insert_activity(&sample("0x01", 0, 5)).await.unwrap();

        let mut purchase = sample("0x02", 0, 8);
        purchase.event_name = "CollectiblePurchased".to_string();
        purchase.buyer = Some("0xseller".to_string()); // same address, buyer role
        storage.insert_activity(&purchase).await.unwrap();

        let mut unrelated = sample("0x03", 0, 9);
        unrelated.seller = Some("0xother".to_string());
        storage.insert_activity(&unrelated).await.unwrap();

        let activity = storage.activity_by_address("0xSELLER").await.unwrap();
        assert_eq!(activity.len(), 2);
        assert_eq!(activity[0].tx, "0x02");
        assert_eq!(activity[1].tx, "0x01");
    }

    #[tokio::test]
    async fn details_trail_joins_token_id_and_rfid_hash() {
        let (storage, _dir) = setup_storage().await;

        // Registry event carries only the rfid hash.
        let mut registered = sample("0x01", 0, 1);
        registered.contract = "registry".to_string();
        registered.event_name = "CollectibleRegistered".to_string();
        registered.nft = None;
        registered.token_id = None;
        registered.rfid_hash = Some("0xhash".to_string());
        storage.insert_activity(&registered).await.unwrap();

        // NFT link event carries both.
        let mut linked = sample("0x02", 0, 2);
        linked.contract = "nft".to_string();
        linked.event_name = "RFIDLinked".to_string();
        linked.rfid_hash = Some("0xhash".to_string());
        linked.token_id = Some("7".to_string());
        storage.insert_activity(&linked).await.unwrap();

        // Market event carries only the token id.
        let mut listed = sample("0x03", 0, 3);
        listed.token_id = Some("7".to_string());
        storage.insert_activity(&listed).await.unwrap();

        storage
            .upsert_collectible(&Collectible {
                rfid_hash: "0xhash".to_string(),
                rfid: None,
                token_id: Some("7".to_string()),
                owner: None,
                authenticity_hash: None,
                burned: false,
                redeemed: false,
                last_event: "RFIDLinked".to_string(),
                last_update_block: 2,
                last_update_tx: "0x02".to_string(),
            })
            .await
            .unwrap();

        let details = storage.collectible_details_by_token_id("7").await.unwrap();
        assert!(details.collectible.is_some());
        let names: Vec<&str> = details.events.iter().map(|e| e.event_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["CollectibleRegistered", "RFIDLinked", "CollectibleListed"]
        );

        let by_hash = storage
            .collectible_details_by_rfid_hash("0xHASH")
            .await
            .unwrap();
        assert_eq!(by_hash.events.len(), 3);
    }
}
