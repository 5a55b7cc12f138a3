//! State reducer: decoded events into projections.
//!
//! Transitions are pure functions over the previous aggregate; the only
//! side effects live in [`apply_event`], which pairs the aggregate upsert
//! with the activity append in a single SQLite transaction. Replaying the
//! same event stream from any point always converges to the same state.

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::events::{now_ms, DecodedEvent, DomainEvent};
use crate::storage::{
    activity::insert_activity, collectibles::upsert_collectible, listings::upsert_listing,
    ActivityEvent, Collectible, Listing, Storage,
};

/// Compute the next listing state for a market event.
///
/// `None` means "write nothing": price updates and cancels for unknown
/// listings are dropped rather than synthesized. A purchase with no prior
/// listing synthesizes one, already closed, so the sale is still recorded.
pub fn listing_transition(
    prev: Option<&Listing>,
    event: &DomainEvent,
    meta: &DecodedEvent,
) -> Option<Listing> {
    match event {
        DomainEvent::Listed {
            nft,
            token_id,
            seller,
            price,
        } => Some(Listing {
            nft: nft.clone(),
            token_id: token_id.clone(),
            seller: seller.clone(),
            price: price.clone(),
            buyer: None,
            active: true,
            last_event: meta.event.clone(),
            last_update_block: meta.block,
            last_update_tx: meta.tx.clone(),
        }),

        DomainEvent::PriceUpdated { new_price, .. } => prev.map(|existing| Listing {
            price: new_price.clone(),
            last_event: meta.event.clone(),
            last_update_block: meta.block,
            last_update_tx: meta.tx.clone(),
            ..existing.clone()
        }),

        DomainEvent::Canceled { .. } => prev.map(|existing| Listing {
            active: false,
            last_event: meta.event.clone(),
            last_update_block: meta.block,
            last_update_tx: meta.tx.clone(),
            ..existing.clone()
        }),

        DomainEvent::Purchased {
            nft,
            token_id,
            seller,
            buyer,
            price,
        } => {
            let base = prev.cloned().unwrap_or_else(|| Listing {
                nft: nft.clone(),
                token_id: token_id.clone(),
                seller: seller.clone(),
                price: price.clone(),
                buyer: None,
                active: true,
                last_event: String::new(),
                last_update_block: 0,
                last_update_tx: String::new(),
            });
            Some(Listing {
                price: price.clone(),
                buyer: Some(buyer.clone()),
                active: false,
                last_event: meta.event.clone(),
                last_update_block: meta.block,
                last_update_tx: meta.tx.clone(),
                ..base
            })
        }

        _ => None,
    }
}

/// Compute the next collectible state for a registry/NFT event.
///
/// The caller resolves the aggregate key first (for mints that means a
/// tokenId to rfidHash lookup); this function only merges fields. The
/// `burned`/`redeemed` flags are never unset except by a fresh
/// registration, which restarts the lifecycle.
pub fn collectible_transition(
    prev: Option<&Collectible>,
    event: &DomainEvent,
    meta: &DecodedEvent,
) -> Option<Collectible> {
    let base = |rfid_hash: &str| {
        let mut c = prev
            .cloned()
            .unwrap_or_else(|| Collectible::blank(rfid_hash));
        c.last_event = meta.event.clone();
        c.last_update_block = meta.block;
        c.last_update_tx = meta.tx.clone();
        c
    };

    match event {
        DomainEvent::Registered {
            rfid_hash,
            owner,
            authenticity_hash,
            rfid,
        } => {
            let mut c = base(rfid_hash);
            c.rfid = Some(rfid.clone());
            c.authenticity_hash = Some(authenticity_hash.clone());
            c.owner = Some(owner.clone());
            c.burned = false;
            c.redeemed = false;
            Some(c)
        }

        DomainEvent::OwnershipTransferred {
            rfid_hash,
            new_owner,
            rfid,
            ..
        } => {
            let mut c = base(rfid_hash);
            c.rfid = Some(rfid.clone());
            c.owner = Some(new_owner.clone());
            Some(c)
        }

        DomainEvent::Redeemed { rfid_hash, rfid } => {
            let mut c = base(rfid_hash);
            c.rfid = Some(rfid.clone());
            c.redeemed = true;
            Some(c)
        }

        DomainEvent::RfidLinked {
            rfid_hash,
            token_id,
            owner,
            rfid,
        } => {
            let mut c = base(rfid_hash);
            c.token_id = Some(token_id.clone());
            c.owner = Some(owner.clone());
            c.rfid = Some(rfid.clone());
            Some(c)
        }

        // Only reached when the caller resolved the token to a known
        // collectible; unlinked mints stay activity-only.
        DomainEvent::Minted { token_id, owner } => {
            let existing = prev?;
            let mut c = base(&existing.rfid_hash);
            c.token_id = Some(token_id.clone());
            c.owner = Some(owner.clone());
            Some(c)
        }

        DomainEvent::Burned {
            rfid_hash,
            token_id,
            owner,
        } => {
            let mut c = base(rfid_hash);
            c.token_id = Some(token_id.clone());
            c.owner = Some(owner.clone());
            c.burned = true;
            Some(c)
        }

        _ => None,
    }
}

/// Build the denormalized activity row for a domain event.
///
/// Exactly one row per applied event; `Ignored` yields none.
pub fn activity_for(event: &DomainEvent, meta: &DecodedEvent) -> Option<ActivityEvent> {
    let mut row = ActivityEvent {
        contract: meta.contract.as_str().to_string(),
        event_name: meta.event.clone(),
        rfid_hash: None,
        nft: None,
        token_id: None,
        seller: None,
        buyer: None,
        owner: None,
        price: None,
        block: meta.block,
        tx: meta.tx.clone(),
        log_index: meta.log_index,
        created_at: now_ms(),
    };

    match event {
        DomainEvent::Listed {
            nft,
            token_id,
            seller,
            price,
        } => {
            row.nft = Some(nft.clone());
            row.token_id = Some(token_id.clone());
            row.seller = Some(seller.clone());
            row.price = Some(price.clone());
        }
        DomainEvent::PriceUpdated {
            nft,
            token_id,
            new_price,
        } => {
            row.nft = Some(nft.clone());
            row.token_id = Some(token_id.clone());
            row.price = Some(new_price.clone());
        }
        DomainEvent::Canceled { nft, token_id } => {
            row.nft = Some(nft.clone());
            row.token_id = Some(token_id.clone());
        }
        DomainEvent::Purchased {
            nft,
            token_id,
            seller,
            buyer,
            price,
        } => {
            row.nft = Some(nft.clone());
            row.token_id = Some(token_id.clone());
            row.seller = Some(seller.clone());
            row.buyer = Some(buyer.clone());
            row.price = Some(price.clone());
        }
        DomainEvent::Registered {
            rfid_hash, owner, ..
        } => {
            row.rfid_hash = Some(rfid_hash.clone());
            row.owner = Some(owner.clone());
        }
        DomainEvent::OwnershipTransferred {
            rfid_hash,
            new_owner,
            ..
        } => {
            row.rfid_hash = Some(rfid_hash.clone());
            row.owner = Some(new_owner.clone());
        }
        DomainEvent::Redeemed { rfid_hash, .. } => {
            row.rfid_hash = Some(rfid_hash.clone());
        }
        DomainEvent::RfidLinked {
            rfid_hash,
            token_id,
            owner,
            ..
        } => {
            row.rfid_hash = Some(rfid_hash.clone());
            row.token_id = Some(token_id.clone());
            row.owner = Some(owner.clone());
        }
        DomainEvent::Minted { token_id, owner } => {
            row.token_id = Some(token_id.clone());
            row.owner = Some(owner.clone());
        }
        DomainEvent::Burned {
            rfid_hash,
            token_id,
            owner,
        } => {
            row.rfid_hash = Some(rfid_hash.clone());
            row.token_id = Some(token_id.clone());
            row.owner = Some(owner.clone());
        }
        DomainEvent::Ignored => return None,
    }

    Some(row)
}

/// Apply one decoded event to the database.
///
/// Idempotent: applying the same `(tx, log_index)` twice leaves the same
/// state (the aggregate upsert converges, the activity insert is ignored
/// on conflict). Events that reduce to nothing are silent no-ops.
pub async fn apply_event(storage: &Storage, event: &DecodedEvent) -> Result<()> {
    let domain = DomainEvent::from_decoded(event);
    if matches!(domain, DomainEvent::Ignored) {
        debug!(event = %event.event, contract = %event.contract, "Ignoring non-state event");
        return Ok(());
    }

    match &domain {
        DomainEvent::Listed { nft, token_id, .. }
        | DomainEvent::PriceUpdated { nft, token_id, .. }
        | DomainEvent::Canceled { nft, token_id }
        | DomainEvent::Purchased { nft, token_id, .. } => {
            let prev = storage.get_listing(nft, token_id).await?;
            let next = listing_transition(prev.as_ref(), &domain, event);

            let Some(listing) = next else {
                // PriceUpdated / Canceled for a listing we never saw.
                debug!(
                    event = %event.event, nft = %nft, token_id = %token_id,
                    "No listing to update; dropping"
                );
                return Ok(());
            };

            let activity = activity_for(&domain, event);
            persist(storage, Aggregate::Listing(listing), activity).await
        }

        DomainEvent::Minted { token_id, .. } => {
            let prev = storage.collectible_by_token_id(token_id).await?;
            let next = collectible_transition(prev.as_ref(), &domain, event);
            let activity = activity_for(&domain, event);
            match next {
                Some(c) => persist(storage, Aggregate::Collectible(c), activity).await,
                None => {
                    // Token not linked to any rfid hash yet: keep the trail,
                    // the RFIDLinked event will create the aggregate.
                    debug!(token_id = %token_id, "Mint for unlinked token; activity only");
                    match activity {
                        Some(row) => storage.insert_activity(&row).await,
                        None => Ok(()),
                    }
                }
            }
        }

        DomainEvent::Registered { rfid_hash, .. }
        | DomainEvent::OwnershipTransferred { rfid_hash, .. }
        | DomainEvent::Redeemed { rfid_hash, .. }
        | DomainEvent::RfidLinked { rfid_hash, .. }
        | DomainEvent::Burned { rfid_hash, .. } => {
            let prev = storage.collectible_by_rfid_hash(rfid_hash).await?;

            if let DomainEvent::OwnershipTransferred { old_owner, .. } = &domain {
                if let Some(recorded) = prev.as_ref().and_then(|c| c.owner.as_deref()) {
                    if !recorded.eq_ignore_ascii_case(old_owner) {
                        warn!(
                            rfid_hash = %rfid_hash,
                            recorded_owner = %recorded,
                            event_old_owner = %old_owner,
                            "Ownership transfer oldOwner does not match recorded owner; trusting the event"
                        );
                    }
                }
            }

            let next = collectible_transition(prev.as_ref(), &domain, event);
            let activity = activity_for(&domain, event);
            match next {
                Some(c) => persist(storage, Aggregate::Collectible(c), activity).await,
                None => Ok(()),
            }
        }

        DomainEvent::Ignored => Ok(()),
    }
}

enum Aggregate {
    Listing(Listing),
    Collectible(Collectible),
}

/// Write the aggregate and its activity row atomically.
async fn persist(
    storage: &Storage,
    aggregate: Aggregate,
    activity: Option<ActivityEvent>,
) -> Result<()> {
    let mut tx = storage
        .pool()
        .begin()
        .await
        .context("Failed to begin reducer transaction")?;

    match &aggregate {
        Aggregate::Listing(listing) => upsert_listing(&mut *tx, listing).await?,
        Aggregate::Collectible(collectible) => upsert_collectible(&mut *tx, collectible).await?,
    }

    if let Some(row) = &activity {
        insert_activity(&mut *tx, row).await?;
    }

    tx.commit()
        .await
        .context("Failed to commit reducer transaction")?;

    Ok(())
}
