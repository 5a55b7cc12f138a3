use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use curio_api::server::{build_app, ApiRuntimeConfig};
use curio_indexer::config::Config;
use curio_indexer::eventlog::EventLogs;
use curio_indexer::events::{DecodedEvent, SourceContract};
use curio_indexer::storage::{ActivityEvent, Collectible, Listing, Storage};

const NFT_ADDR: &str = "0x2222222222222222222222222222222222222222";
const SELLER: &str = "0x00000000000000000000000000000000000000aa";
const OWNER: &str = "0x00000000000000000000000000000000000000bb";
const RFID_HASH: &str = "0xababababababababababababababababababababababababababababababab00";

fn test_config(temp: &TempDir) -> Config {
    let db_path = temp.path().join("curio-smoke.db");
    let data_dir = temp.path().join("data");
    let toml = format!(
        r#"
[network]
http_url = "http://localhost:8545"
chain_id = 421614

[contracts]
registry = "0x1111111111111111111111111111111111111111"
nft = "{NFT_ADDR}"
market = "0x3333333333333333333333333333333333333333"

[database]
url = "sqlite://{db}"

[storage]
data_dir = "{data}"
"#,
        db = db_path.display(),
        data = data_dir.display(),
    );
    Config::from_toml_str(&toml).expect("valid test config")
}

async fn seed(config: &Config) {
    let storage = Storage::from_config(&config.database)
        .await
        .expect("storage connect");
    storage.run_migrations().await.expect("migrations");

    storage
        .upsert_listing(&Listing {
            nft: NFT_ADDR.to_string(),
            token_id: "7".to_string(),
            seller: SELLER.to_string(),
            price: "1500000000000000000".to_string(),
            buyer: None,
            active: true,
            last_event: "CollectibleListed".to_string(),
            last_update_block: 120,
            last_update_tx: "0xt1".to_string(),
        })
        .await
        .expect("seed listing");

    storage
        .upsert_collectible(&Collectible {
            rfid_hash: RFID_HASH.to_string(),
            rfid: Some("TAG-001".to_string()),
            token_id: Some("7".to_string()),
            owner: Some(OWNER.to_string()),
            authenticity_hash: None,
            burned: false,
            redeemed: false,
            last_event: "RFIDLinked".to_string(),
            last_update_block: 110,
            last_update_tx: "0xt0".to_string(),
        })
        .await
        .expect("seed collectible");

    storage
        .insert_activity(&ActivityEvent {
            contract: "nft".to_string(),
            event_name: "RFIDLinked".to_string(),
            rfid_hash: Some(RFID_HASH.to_string()),
            nft: None,
            token_id: Some("7".to_string()),
            seller: None,
            buyer: None,
            owner: Some(OWNER.to_string()),
            price: None,
            block: 110,
            tx: "0xt0".to_string(),
            log_index: 0,
            created_at: 1,
        })
        .await
        .expect("seed activity");

    let logs = EventLogs::open(&config.storage.data_dir).expect("open event logs");
    for i in 0..3u64 {
        logs.append_decoded(&DecodedEvent {
            observed_at: i,
            contract: SourceContract::Market,
            event: "CollectibleListed".to_string(),
            args: Default::default(),
            tx: format!("0x{:02x}", i),
            block: 100 + i,
            log_index: 0,
        })
        .expect("seed event log");
    }

    storage.close().await;
}

async fn get_json(app: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("request should succeed");

    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn read_endpoints_serve_seeded_projections() {
    let temp = TempDir::new().expect("tempdir");
    let config = test_config(&temp);
    seed(&config).await;

    let app = build_app(&ApiRuntimeConfig::for_test(config))
        .await
        .expect("build in-process app");

    let (status, health) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["chainId"], 421614);
    assert_eq!(health["nft"], NFT_ADDR);

    let (status, listings) = get_json(&app, "/listings").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listings["count"], 1);
    assert_eq!(listings["listings"][0]["tokenId"], "7");
    assert_eq!(listings["listings"][0]["price"], "1500000000000000000");

    let (status, collectibles) = get_json(&app, "/collectibles").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(collectibles["count"], 1);
    assert_eq!(collectibles["collectibles"][0]["rfidHash"], RFID_HASH);
    // No image uploaded yet.
    assert!(collectibles["collectibles"][0]["imageUrl"].is_null());

    let (status, by_owner) = get_json(&app, &format!("/owner/{}", OWNER.to_uppercase())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_owner["count"], 1);

    let (status, activity) = get_json(&app, &format!("/activity/{}", OWNER)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(activity["count"], 1);
    assert_eq!(activity["events"][0]["eventName"], "RFIDLinked");

    let (status, details) = get_json(&app, "/collectible/by-token/7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["collectible"]["rfidHash"], RFID_HASH);
    assert_eq!(details["events"].as_array().map(|e| e.len()), Some(1));

    let (status, details) =
        get_json(&app, &format!("/collectible/by-rfid-hash/{}", RFID_HASH)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["collectible"]["tokenId"], "7");

    let (status, exists) =
        get_json(&app, &format!("/admin/rfid-hash-exists/{}", RFID_HASH)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(exists["exists"], true);

    let (status, missing) = get_json(
        &app,
        "/admin/rfid-hash-exists/0x0000000000000000000000000000000000000000000000000000000000000001",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(missing["exists"], false);
}

#[tokio::test]
async fn recent_events_clamps_limit_and_selects_streams() {
    let temp = TempDir::new().expect("tempdir");
    let config = test_config(&temp);
    seed(&config).await;

    let app = build_app(&ApiRuntimeConfig::for_test(config))
        .await
        .expect("build in-process app");

    let (status, recent) = get_json(&app, "/events/recent?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recent["contract"], "all");
    assert_eq!(recent["count"], 2);
    // Oldest-first tail: the last two of three seeded events.
    assert_eq!(recent["events"][0]["block"], 101);
    assert_eq!(recent["events"][1]["block"], 102);

    let (status, market) = get_json(&app, "/events/recent?contract=market").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(market["contract"], "market");
    assert_eq!(market["count"], 3);

    // The registry stream exists but holds nothing.
    let (status, registry) = get_json(&app, "/events/recent?contract=registry").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(registry["count"], 0);

    // Unknown contract values fall back to the combined stream.
    let (status, fallback) = get_json(&app, "/events/recent?contract=bogus&limit=500").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fallback["contract"], "all");
    assert_eq!(fallback["count"], 3);
}

#[tokio::test]
async fn image_upload_links_and_serves_the_file() {
    let temp = TempDir::new().expect("tempdir");
    let config = test_config(&temp);
    seed(&config).await;

    let app = build_app(&ApiRuntimeConfig::for_test(config))
        .await
        .expect("build in-process app");

    let boundary = "curio-test-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"photo.jpg\"\r\n\
         Content-Type: image/jpeg\r\n\r\n\
         not-really-a-jpeg\r\n\
         --{boundary}--\r\n"
    );

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/admin/collectibles/{}/image", RFID_HASH))
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .expect("build upload request"),
        )
        .await
        .expect("upload should succeed");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("upload body")
        .to_bytes();
    let uploaded: serde_json::Value = serde_json::from_slice(&bytes).expect("decode upload");
    assert_eq!(uploaded["rfidHash"], RFID_HASH);
    let url = uploaded["url"].as_str().expect("url string");
    assert!(url.ends_with(".jpg"));

    // The collectibles view now carries the image URL.
    let (status, collectibles) = get_json(&app, "/collectibles").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(collectibles["collectibles"][0]["imageUrl"], url);

    // The stored file is served back under /images.
    let path = url
        .split("/images/")
        .nth(1)
        .map(|f| format!("/images/{}", f))
        .expect("image path");
    let served = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(path)
                .body(Body::empty())
                .expect("build image request"),
        )
        .await
        .expect("image request should succeed");
    assert_eq!(served.status(), StatusCode::OK);
    let served_bytes = served
        .into_body()
        .collect()
        .await
        .expect("image body")
        .to_bytes();
    assert_eq!(&served_bytes[..], b"not-really-a-jpeg");

    // A missing file field is a 400, not a 500.
    let empty_body = format!("--{boundary}--\r\n");
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/admin/collectibles/{}/image", RFID_HASH))
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(empty_body))
                .expect("build empty upload"),
        )
        .await
        .expect("empty upload should respond");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
