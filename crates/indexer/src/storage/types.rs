//! Row types shared between the storage layer, the reducer and the API.
//!
//! Serde renames follow the JSON casing the read API exposes.

use serde::{Deserialize, Serialize};

/// A marketplace listing projection, keyed by `(nft, token_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    /// NFT contract address (lowercase)
    pub nft: String,
    /// Token id, decimal string
    pub token_id: String,
    /// Seller address (lowercase)
    pub seller: String,
    /// Price in wei, decimal string
    pub price: String,
    /// Buyer address once purchased
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer: Option<String>,
    /// Whether the listing is currently purchasable
    pub active: bool,
    /// Name of the event that produced this row state
    pub last_event: String,
    /// Block of that event
    pub last_update_block: u64,
    /// Transaction hash of that event
    pub last_update_tx: String,
}

/// A collectible lifecycle projection, keyed by lowercased rfid hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collectible {
    /// keccak hash of the RFID tag (lowercase 0x-hex)
    pub rfid_hash: String,
    /// Plain RFID tag, when an event carried it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rfid: Option<String>,
    /// Linked NFT token id, decimal string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    /// Current owner address (lowercase)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Authenticity document hash
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticity_hash: Option<String>,
    /// Token was burned (monotonic)
    pub burned: bool,
    /// Collectible was redeemed (monotonic)
    pub redeemed: bool,
    /// Name of the event that produced this row state
    pub last_event: String,
    /// Block of that event
    pub last_update_block: u64,
    /// Transaction hash of that event
    pub last_update_tx: String,
}

impl Collectible {
    /// Blank aggregate for a hash seen for the first time.
    pub fn blank(rfid_hash: &str) -> Self {
        Self {
            rfid_hash: rfid_hash.to_ascii_lowercase(),
            rfid: None,
            token_id: None,
            owner: None,
            authenticity_hash: None,
            burned: false,
            redeemed: false,
            last_event: String::new(),
            last_update_block: 0,
            last_update_tx: String::new(),
        }
    }
}

/// One denormalized activity row per applied domain event.
///
/// `(tx, log_index)` is unique; re-inserting the same pair is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    /// Source contract tag ("registry"/"nft"/"market")
    pub contract: String,
    /// Decoded event name
    pub event_name: String,
    /// RFID hash, for registry/NFT events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rfid_hash: Option<String>,
    /// NFT contract address, for market events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nft: Option<String>,
    /// Token id, decimal string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    /// Seller address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller: Option<String>,
    /// Buyer address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer: Option<String>,
    /// Owner address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Price in wei, decimal string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    /// Block number of the event
    pub block: u64,
    /// Transaction hash
    pub tx: String,
    /// Log index within the block
    pub log_index: u64,
    /// Insertion timestamp, unix ms
    pub created_at: u64,
}

/// Uploaded image metadata for a collectible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectibleImage {
    /// Lowercased rfid hash this image belongs to
    pub rfid_hash: String,
    /// Public URL of the stored image
    pub url: String,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Upload timestamp, unix ms
    pub created_at: u64,
}
