//! Log decoding for the three curio contracts.
//!
//! A raw log is decoded only against the interface of the contract that
//! emitted it. Decoding failure is data, not an error: logs that match no
//! known signature become the `Unparsed` sentinel event, which is recorded
//! in the JSONL streams but never reaches the reducer.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::{Address, B256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use serde::{Deserialize, Serialize};

pub(crate) mod abi {
    use alloy::sol;

    sol! {
        // CollectibleRegistryV1
        event RegistryConfigured(address indexed nft, address indexed marketplace);
        event CollectibleRegistered(bytes32 indexed rfidHash, address indexed initialOwner, bytes32 authenticityHash, string rfid);
        event CollectibleOwnershipTransferred(bytes32 indexed rfidHash, address indexed oldOwner, address indexed newOwner, string rfid);
        event CollectibleRedeemed(bytes32 indexed rfidHash, string rfid);

        // CollectibleNFTV1
        event MintedNFT(uint256 indexed tokenId, address indexed owner);
        event RFIDLinked(bytes32 indexed rfidHash, uint256 indexed tokenId, address indexed owner, string rfid);
        event CollectibleBurned(bytes32 indexed rfidHash, uint256 indexed tokenId, address indexed owner);
        event PointsAdded(address indexed user, uint256 points);
        event AdminSetPoints(address indexed user, uint256 points);
        event TierThresholdsUpdated(uint256 silver, uint256 gold);
        event MarketplaceSet(address indexed marketplace);
        event RegistrySet(address indexed registry);

        // CollectibleMarketV1
        event PaymentTokenSet(address indexed paymentToken);
        event FeeConfigUpdated(address indexed feeRecipient, uint256 feeBps);
        event CollectibleListed(address indexed nft, uint256 indexed tokenId, address indexed seller, uint256 price);
        event CollectibleCanceled(address indexed nft, uint256 indexed tokenId);
        event CollectiblePriceUpdated(address indexed nft, uint256 indexed tokenId, uint256 newPrice);
        event CollectiblePurchased(address indexed nft, uint256 indexed tokenId, address indexed seller, address buyer, uint256 price);
        event Paused(address account);
        event Unpaused(address account);
    }
}

/// Sentinel event name for logs that match no known signature.
pub const UNPARSED_EVENT: &str = "Unparsed";

/// Which of the three known contracts emitted a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceContract {
    /// CollectibleRegistryV1 (authenticity + high-level ownership)
    Registry,
    /// CollectibleNFTV1 (mint / RFID link / burn, plus loyalty)
    Nft,
    /// CollectibleMarketV1 (listings)
    Market,
}

impl SourceContract {
    /// Stable lowercase tag used in JSONL lines and database rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceContract::Registry => "registry",
            SourceContract::Nft => "nft",
            SourceContract::Market => "market",
        }
    }
}

impl fmt::Display for SourceContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceContract {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registry" => Ok(SourceContract::Registry),
            "nft" => Ok(SourceContract::Nft),
            "market" => Ok(SourceContract::Market),
            _ => Err(format!("Unknown source contract: {}", s)),
        }
    }
}

/// Current unix time in milliseconds, used as the observation timestamp.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Forensic record of a log exactly as observed, written before decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLogRecord {
    /// Observation timestamp (unix ms).
    #[serde(rename = "t")]
    pub observed_at: u64,
    /// Transaction hash (0x-hex).
    pub tx: String,
    /// Block number.
    pub block: u64,
    /// Emitting contract address (0x-hex, lowercase).
    pub address: String,
    /// Log index within the block.
    #[serde(rename = "logIndex")]
    pub log_index: u64,
    /// First topic, if any.
    pub topic0: Option<String>,
    /// Raw data payload (0x-hex).
    pub data: String,
}

impl RawLogRecord {
    /// Capture a raw log before any decoding is attempted.
    pub fn from_log(log: &Log) -> Self {
        Self {
            observed_at: now_ms(),
            tx: log
                .transaction_hash
                .map(|h| format!("{h:#x}"))
                .unwrap_or_default(),
            block: log.block_number.unwrap_or_default(),
            address: format!("{:#x}", log.inner.address),
            log_index: log.log_index.unwrap_or_default(),
            topic0: log.inner.data.topics().first().map(|t| format!("{t:#x}")),
            data: format!("0x{}", hex::encode(&log.inner.data.data)),
        }
    }
}

/// A decoded event, the unit both the JSONL streams and the reducer consume.
///
/// Integer arguments are decimal strings and byte/address arguments are
/// lowercase 0x-hex strings, so no precision is lost in serialization.
/// `(tx, log_index)` uniquely identifies an event; re-delivery of the same
/// pair is idempotent downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedEvent {
    /// Observation timestamp (unix ms).
    #[serde(rename = "t")]
    pub observed_at: u64,
    /// Source contract tag.
    pub contract: SourceContract,
    /// Event name, or [`UNPARSED_EVENT`].
    pub event: String,
    /// Named arguments, stringified.
    pub args: BTreeMap<String, String>,
    /// Transaction hash (0x-hex).
    pub tx: String,
    /// Block number.
    pub block: u64,
    /// Log index within the block.
    #[serde(rename = "logIndex")]
    pub log_index: u64,
}

fn hex_addr(a: Address) -> String {
    format!("{a:#x}")
}

fn hex_b256(h: B256) -> String {
    format!("{h:#x}")
}

/// Decode a log against the given contract's interface only.
///
/// Never fails: logs matching no signature (or with malformed data) come
/// back as the `Unparsed` sentinel carrying the raw topics and data.
pub fn decode_log(contract: SourceContract, log: &Log) -> DecodedEvent {
    let (event, args) = match contract {
        SourceContract::Registry => decode_registry(log),
        SourceContract::Nft => decode_nft(log),
        SourceContract::Market => decode_market(log),
    }
    .unwrap_or_else(|| unparsed(log));

    DecodedEvent {
        observed_at: now_ms(),
        contract,
        event,
        args,
        tx: log
            .transaction_hash
            .map(|h| format!("{h:#x}"))
            .unwrap_or_default(),
        block: log.block_number.unwrap_or_default(),
        log_index: log.log_index.unwrap_or_default(),
    }
}

fn unparsed(log: &Log) -> (String, BTreeMap<String, String>) {
    let mut args = BTreeMap::new();
    let topics: Vec<String> = log
        .inner
        .data
        .topics()
        .iter()
        .map(|t| format!("{t:#x}"))
        .collect();
    args.insert("topics".to_string(), topics.join(","));
    args.insert(
        "data".to_string(),
        format!("0x{}", hex::encode(&log.inner.data.data)),
    );
    (UNPARSED_EVENT.to_string(), args)
}

type NamedArgs = Option<(String, BTreeMap<String, String>)>;

fn named(name: &str, pairs: Vec<(&str, String)>) -> NamedArgs {
    let mut args = BTreeMap::new();
    for (k, v) in pairs {
        args.insert(k.to_string(), v);
    }
    Some((name.to_string(), args))
}

fn decode_registry(log: &Log) -> NamedArgs {
    let topic0 = *log.inner.data.topics().first()?;

    if topic0 == abi::CollectibleRegistered::SIGNATURE_HASH {
        let ev = abi::CollectibleRegistered::decode_log(log.as_ref(), true).ok()?.data;
        return named(
            "CollectibleRegistered",
            vec![
                ("rfidHash", hex_b256(ev.rfidHash)),
                ("initialOwner", hex_addr(ev.initialOwner)),
                ("authenticityHash", hex_b256(ev.authenticityHash)),
                ("rfid", ev.rfid),
            ],
        );
    }
    if topic0 == abi::CollectibleOwnershipTransferred::SIGNATURE_HASH {
        let ev = abi::CollectibleOwnershipTransferred::decode_log(log.as_ref(), true)
            .ok()?
            .data;
        return named(
            "CollectibleOwnershipTransferred",
            vec![
                ("rfidHash", hex_b256(ev.rfidHash)),
                ("oldOwner", hex_addr(ev.oldOwner)),
                ("newOwner", hex_addr(ev.newOwner)),
                ("rfid", ev.rfid),
            ],
        );
    }
    if topic0 == abi::CollectibleRedeemed::SIGNATURE_HASH {
        let ev = abi::CollectibleRedeemed::decode_log(log.as_ref(), true).ok()?.data;
        return named(
            "CollectibleRedeemed",
            vec![("rfidHash", hex_b256(ev.rfidHash)), ("rfid", ev.rfid)],
        );
    }
    if topic0 == abi::RegistryConfigured::SIGNATURE_HASH {
        let ev = abi::RegistryConfigured::decode_log(log.as_ref(), true).ok()?.data;
        return named(
            "RegistryConfigured",
            vec![
                ("nft", hex_addr(ev.nft)),
                ("marketplace", hex_addr(ev.marketplace)),
            ],
        );
    }

    None
}

fn decode_nft(log: &Log) -> NamedArgs {
    let topic0 = *log.inner.data.topics().first()?;

    if topic0 == abi::MintedNFT::SIGNATURE_HASH {
        let ev = abi::MintedNFT::decode_log(log.as_ref(), true).ok()?.data;
        return named(
            "MintedNFT",
            vec![
                ("tokenId", ev.tokenId.to_string()),
                ("owner", hex_addr(ev.owner)),
            ],
        );
    }
    if topic0 == abi::RFIDLinked::SIGNATURE_HASH {
        let ev = abi::RFIDLinked::decode_log(log.as_ref(), true).ok()?.data;
        return named(
            "RFIDLinked",
            vec![
                ("rfidHash", hex_b256(ev.rfidHash)),
                ("tokenId", ev.tokenId.to_string()),
                ("owner", hex_addr(ev.owner)),
                ("rfid", ev.rfid),
            ],
        );
    }
    if topic0 == abi::CollectibleBurned::SIGNATURE_HASH {
        let ev = abi::CollectibleBurned::decode_log(log.as_ref(), true).ok()?.data;
        return named(
            "CollectibleBurned",
            vec![
                ("rfidHash", hex_b256(ev.rfidHash)),
                ("tokenId", ev.tokenId.to_string()),
                ("owner", hex_addr(ev.owner)),
            ],
        );
    }
    if topic0 == abi::PointsAdded::SIGNATURE_HASH {
        let ev = abi::PointsAdded::decode_log(log.as_ref(), true).ok()?.data;
        return named(
            "PointsAdded",
            vec![
                ("user", hex_addr(ev.user)),
                ("points", ev.points.to_string()),
            ],
        );
    }
    if topic0 == abi::AdminSetPoints::SIGNATURE_HASH {
        let ev = abi::AdminSetPoints::decode_log(log.as_ref(), true).ok()?.data;
        return named(
            "AdminSetPoints",
            vec![
                ("user", hex_addr(ev.user)),
                ("points", ev.points.to_string()),
            ],
        );
    }
    if topic0 == abi::TierThresholdsUpdated::SIGNATURE_HASH {
        let ev = abi::TierThresholdsUpdated::decode_log(log.as_ref(), true).ok()?.data;
        return named(
            "TierThresholdsUpdated",
            vec![
                ("silver", ev.silver.to_string()),
                ("gold", ev.gold.to_string()),
            ],
        );
    }
    if topic0 == abi::MarketplaceSet::SIGNATURE_HASH {
        let ev = abi::MarketplaceSet::decode_log(log.as_ref(), true).ok()?.data;
        return named("MarketplaceSet", vec![("marketplace", hex_addr(ev.marketplace))]);
    }
    if topic0 == abi::RegistrySet::SIGNATURE_HASH {
        let ev = abi::RegistrySet::decode_log(log.as_ref(), true).ok()?.data;
        return named("RegistrySet", vec![("registry", hex_addr(ev.registry))]);
    }

    None
}

fn decode_market(log: &Log) -> NamedArgs {
    let topic0 = *log.inner.data.topics().first()?;

    if topic0 == abi::CollectibleListed::SIGNATURE_HASH {
        let ev = abi::CollectibleListed::decode_log(log.as_ref(), true).ok()?.data;
        return named(
            "CollectibleListed",
            vec![
                ("nft", hex_addr(ev.nft)),
                ("tokenId", ev.tokenId.to_string()),
                ("seller", hex_addr(ev.seller)),
                ("price", ev.price.to_string()),
            ],
        );
    }
    if topic0 == abi::CollectiblePriceUpdated::SIGNATURE_HASH {
        let ev = abi::CollectiblePriceUpdated::decode_log(log.as_ref(), true).ok()?.data;
        return named(
            "CollectiblePriceUpdated",
            vec![
                ("nft", hex_addr(ev.nft)),
                ("tokenId", ev.tokenId.to_string()),
                ("newPrice", ev.newPrice.to_string()),
            ],
        );
    }
    if topic0 == abi::CollectibleCanceled::SIGNATURE_HASH {
        let ev = abi::CollectibleCanceled::decode_log(log.as_ref(), true).ok()?.data;
        return named(
            "CollectibleCanceled",
            vec![
                ("nft", hex_addr(ev.nft)),
                ("tokenId", ev.tokenId.to_string()),
            ],
        );
    }
    if topic0 == abi::CollectiblePurchased::SIGNATURE_HASH {
        let ev = abi::CollectiblePurchased::decode_log(log.as_ref(), true).ok()?.data;
        return named(
            "CollectiblePurchased",
            vec![
                ("nft", hex_addr(ev.nft)),
                ("tokenId", ev.tokenId.to_string()),
                ("seller", hex_addr(ev.seller)),
                ("buyer", hex_addr(ev.buyer)),
                ("price", ev.price.to_string()),
            ],
        );
    }
    if topic0 == abi::PaymentTokenSet::SIGNATURE_HASH {
        let ev = abi::PaymentTokenSet::decode_log(log.as_ref(), true).ok()?.data;
        return named(
            "PaymentTokenSet",
            vec![("paymentToken", hex_addr(ev.paymentToken))],
        );
    }
    if topic0 == abi::FeeConfigUpdated::SIGNATURE_HASH {
        let ev = abi::FeeConfigUpdated::decode_log(log.as_ref(), true).ok()?.data;
        return named(
            "FeeConfigUpdated",
            vec![
                ("feeRecipient", hex_addr(ev.feeRecipient)),
                ("feeBps", ev.feeBps.to_string()),
            ],
        );
    }
    if topic0 == abi::Paused::SIGNATURE_HASH {
        let ev = abi::Paused::decode_log(log.as_ref(), true).ok()?.data;
        return named("Paused", vec![("account", hex_addr(ev.account))]);
    }
    if topic0 == abi::Unpaused::SIGNATURE_HASH {
        let ev = abi::Unpaused::decode_log(log.as_ref(), true).ok()?.data;
        return named("Unpaused", vec![("account", hex_addr(ev.account))]);
    }

    None
}

/// Typed view of a [`DecodedEvent`] for the reducer.
///
/// Event names that carry no projection-relevant state (loyalty, config,
/// pause) map to `Ignored`, as does anything with missing arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// CollectibleListed
    Listed {
        nft: String,
        token_id: String,
        seller: String,
        price: String,
    },
    /// CollectiblePriceUpdated
    PriceUpdated {
        nft: String,
        token_id: String,
        new_price: String,
    },
    /// CollectibleCanceled
    Canceled { nft: String, token_id: String },
    /// CollectiblePurchased
    Purchased {
        nft: String,
        token_id: String,
        seller: String,
        buyer: String,
        price: String,
    },
    /// CollectibleRegistered
    Registered {
        rfid_hash: String,
        owner: String,
        authenticity_hash: String,
        rfid: String,
    },
    /// CollectibleOwnershipTransferred
    OwnershipTransferred {
        rfid_hash: String,
        old_owner: String,
        new_owner: String,
        rfid: String,
    },
    /// CollectibleRedeemed
    Redeemed { rfid_hash: String, rfid: String },
    /// RFIDLinked
    RfidLinked {
        rfid_hash: String,
        token_id: String,
        owner: String,
        rfid: String,
    },
    /// MintedNFT
    Minted { token_id: String, owner: String },
    /// CollectibleBurned
    Burned {
        rfid_hash: String,
        token_id: String,
        owner: String,
    },
    /// Anything else, including `Unparsed`.
    Ignored,
}

impl DomainEvent {
    /// Build the typed view from a decoded event.
    ///
    /// Addresses and hashes are normalized to lowercase here so replayed
    /// lines from other tooling reduce identically to live-decoded ones.
    pub fn from_decoded(ev: &DecodedEvent) -> DomainEvent {
        let arg = |k: &str| ev.args.get(k).cloned();
        let low = |k: &str| ev.args.get(k).map(|v| v.to_ascii_lowercase());

        match (ev.contract, ev.event.as_str()) {
            (SourceContract::Market, "CollectibleListed") => {
                match (low("nft"), arg("tokenId"), low("seller"), arg("price")) {
                    (Some(nft), Some(token_id), Some(seller), Some(price)) => DomainEvent::Listed {
                        nft,
                        token_id,
                        seller,
                        price,
                    },
                    _ => DomainEvent::Ignored,
                }
            }
            (SourceContract::Market, "CollectiblePriceUpdated") => {
                match (low("nft"), arg("tokenId"), arg("newPrice")) {
                    (Some(nft), Some(token_id), Some(new_price)) => DomainEvent::PriceUpdated {
                        nft,
                        token_id,
                        new_price,
                    },
                    _ => DomainEvent::Ignored,
                }
            }
            (SourceContract::Market, "CollectibleCanceled") => {
                match (low("nft"), arg("tokenId")) {
                    (Some(nft), Some(token_id)) => DomainEvent::Canceled { nft, token_id },
                    _ => DomainEvent::Ignored,
                }
            }
            (SourceContract::Market, "CollectiblePurchased") => {
                match (
                    low("nft"),
                    arg("tokenId"),
                    low("seller"),
                    low("buyer"),
                    arg("price"),
                ) {
                    (Some(nft), Some(token_id), Some(seller), Some(buyer), Some(price)) => {
                        DomainEvent::Purchased {
                            nft,
                            token_id,
                            seller,
                            buyer,
                            price,
                        }
                    }
                    _ => DomainEvent::Ignored,
                }
            }
            (SourceContract::Registry, "CollectibleRegistered") => {
                match (
                    low("rfidHash"),
                    low("initialOwner"),
                    low("authenticityHash"),
                    arg("rfid"),
                ) {
                    (Some(rfid_hash), Some(owner), Some(authenticity_hash), Some(rfid)) => {
                        DomainEvent::Registered {
                            rfid_hash,
                            owner,
                            authenticity_hash,
                            rfid,
                        }
                    }
                    _ => DomainEvent::Ignored,
                }
            }
            (SourceContract::Registry, "CollectibleOwnershipTransferred") => {
                match (
                    low("rfidHash"),
                    low("oldOwner"),
                    low("newOwner"),
                    arg("rfid"),
                ) {
                    (Some(rfid_hash), Some(old_owner), Some(new_owner), Some(rfid)) => {
                        DomainEvent::OwnershipTransferred {
                            rfid_hash,
                            old_owner,
                            new_owner,
                            rfid,
                        }
                    }
                    _ => DomainEvent::Ignored,
                }
            }
            (SourceContract::Registry, "CollectibleRedeemed") => {
                match (low("rfidHash"), arg("rfid")) {
                    (Some(rfid_hash), Some(rfid)) => DomainEvent::Redeemed { rfid_hash, rfid },
                    _ => DomainEvent::Ignored,
                }
            }
            (SourceContract::Nft, "RFIDLinked") => {
                match (low("rfidHash"), arg("tokenId"), low("owner"), arg("rfid")) {
                    (Some(rfid_hash), Some(token_id), Some(owner), Some(rfid)) => {
                        DomainEvent::RfidLinked {
                            rfid_hash,
                            token_id,
                            owner,
                            rfid,
                        }
                    }
                    _ => DomainEvent::Ignored,
                }
            }
            (SourceContract::Nft, "MintedNFT") => match (arg("tokenId"), low("owner")) {
                (Some(token_id), Some(owner)) => DomainEvent::Minted { token_id, owner },
                _ => DomainEvent::Ignored,
            },
            (SourceContract::Nft, "CollectibleBurned") => {
                match (low("rfidHash"), arg("tokenId"), low("owner")) {
                    (Some(rfid_hash), Some(token_id), Some(owner)) => DomainEvent::Burned {
                        rfid_hash,
                        token_id,
                        owner,
                    },
                    _ => DomainEvent::Ignored,
                }
            }
            _ => DomainEvent::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{LogData, U256};

    fn rpc_log(address: Address, data: LogData, block: u64, log_index: u64) -> Log {
        Log {
            inner: alloy::primitives::Log { address, data },
            block_hash: None,
            block_number: Some(block),
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(0xaa)),
            transaction_index: Some(0),
            log_index: Some(log_index),
            removed: false,
        }
    }

    #[test]
    fn decodes_listed_event_with_decimal_price() {
        let ev = abi::CollectibleListed {
            nft: Address::repeat_byte(0x11),
            tokenId: U256::from(7u64),
            seller: Address::repeat_byte(0x22),
            price: U256::from(1_500_000_000_000_000_000u128),
        };
        let log = rpc_log(Address::repeat_byte(0x33), ev.encode_log_data(), 100, 2);

        let decoded = decode_log(SourceContract::Market, &log);
        assert_eq!(decoded.event, "CollectibleListed");
        assert_eq!(decoded.block, 100);
        assert_eq!(decoded.log_index, 2);
        assert_eq!(decoded.args["tokenId"], "7");
        assert_eq!(decoded.args["price"], "1500000000000000000");
        assert!(decoded.args["nft"].starts_with("0x1111"));
        assert!(decoded.args["seller"].starts_with("0x2222"));
    }

    #[test]
    fn decodes_registered_event_with_rfid_string() {
        let ev = abi::CollectibleRegistered {
            rfidHash: B256::repeat_byte(0xab),
            initialOwner: Address::repeat_byte(0x44),
            authenticityHash: B256::repeat_byte(0xcd),
            rfid: "TAG-001".to_string(),
        };
        let log = rpc_log(Address::repeat_byte(0x55), ev.encode_log_data(), 50, 0);

        let decoded = decode_log(SourceContract::Registry, &log);
        assert_eq!(decoded.event, "CollectibleRegistered");
        assert_eq!(decoded.args["rfid"], "TAG-001");
        assert_eq!(
            decoded.args["rfidHash"],
            format!("{:#x}", B256::repeat_byte(0xab))
        );
    }

    #[test]
    fn unknown_signature_falls_back_to_unparsed() {
        let data = LogData::new_unchecked(vec![B256::repeat_byte(0x01)], vec![1, 2, 3].into());
        let log = rpc_log(Address::repeat_byte(0x66), data, 10, 1);

        let decoded = decode_log(SourceContract::Market, &log);
        assert_eq!(decoded.event, UNPARSED_EVENT);
        assert!(decoded.args.contains_key("topics"));
        assert_eq!(decoded.args["data"], "0x010203");
    }

    #[test]
    fn decoding_never_crosses_contracts() {
        // A market Listed log decoded as a registry log must be Unparsed.
        let ev = abi::CollectibleListed {
            nft: Address::repeat_byte(0x11),
            tokenId: U256::from(1u64),
            seller: Address::repeat_byte(0x22),
            price: U256::from(10u64),
        };
        let log = rpc_log(Address::repeat_byte(0x33), ev.encode_log_data(), 1, 0);

        let decoded = decode_log(SourceContract::Registry, &log);
        assert_eq!(decoded.event, UNPARSED_EVENT);
    }

    #[test]
    fn domain_event_from_decoded_lowercases_addresses() {
        let mut args = BTreeMap::new();
        args.insert("nft".to_string(), "0xAABB000000000000000000000000000000000011".to_string());
        args.insert("tokenId".to_string(), "9".to_string());
        args.insert("seller".to_string(), "0xCC00000000000000000000000000000000000022".to_string());
        args.insert("price".to_string(), "50".to_string());

        let decoded = DecodedEvent {
            observed_at: 0,
            contract: SourceContract::Market,
            event: "CollectibleListed".to_string(),
            args,
            tx: "0xdead".to_string(),
            block: 1,
            log_index: 0,
        };

        match DomainEvent::from_decoded(&decoded) {
            DomainEvent::Listed { nft, seller, .. } => {
                assert_eq!(nft, "0xaabb000000000000000000000000000000000011");
                assert_eq!(seller, "0xcc00000000000000000000000000000000000022");
            }
            other => panic!("expected Listed, got {:?}", other),
        }
    }

    #[test]
    fn loyalty_and_config_events_are_ignored_by_the_reducer_view() {
        let ev = abi::PointsAdded {
            user: Address::repeat_byte(0x01),
            points: U256::from(5u64),
        };
        let log = rpc_log(Address::repeat_byte(0x02), ev.encode_log_data(), 3, 0);

        let decoded = decode_log(SourceContract::Nft, &log);
        assert_eq!(decoded.event, "PointsAdded");
        assert_eq!(DomainEvent::from_decoded(&decoded), DomainEvent::Ignored);
    }

    #[test]
    fn decoded_event_round_trips_as_jsonl() {
        let ev = abi::MintedNFT {
            tokenId: U256::from(12u64),
            owner: Address::repeat_byte(0x07),
        };
        let log = rpc_log(Address::repeat_byte(0x08), ev.encode_log_data(), 77, 4);
        let decoded = decode_log(SourceContract::Nft, &log);

        let line = serde_json::to_string(&decoded).unwrap();
        assert!(line.contains("\"contract\":\"nft\""));
        assert!(line.contains("\"logIndex\":4"));

        let back: DecodedEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back, decoded);
    }
}
