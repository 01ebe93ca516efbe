//! Tiered content storage: inline, bucket and file spill

use newswire_crawler::storage::{CompressionPreset, Storage};
use tempfile::TempDir;

async fn storage() -> (Storage, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let storage = Storage::open(dir.path()).await.expect("open storage");
    (storage, dir)
}

/// Pseudo-random bytes that no codec can shrink much
fn incompressible(len: usize) -> Vec<u8> {
    let mut state = 0x9e3779b97f4a7c15u64;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

#[tokio::test]
async fn small_bodies_round_trip_inline() {
    let (storage, _dir) = storage().await;
    let body = b"<html><body>tiny</body></html>".to_vec();
    let content_ref = storage
        .put_content(body.clone(), CompressionPreset::Gzip(6))
        .await
        .expect("put");
    let stored = storage.get_content(content_ref).await.expect("get");
    assert_eq!(stored.bytes, body);
    assert_eq!(stored.compression, CompressionPreset::Gzip(6));
}

#[tokio::test]
async fn medium_bodies_land_in_the_bucket_tier() {
    let (storage, _dir) = storage().await;
    let body = incompressible(100 * 1024);
    let content_ref = storage
        .put_content(body.clone(), CompressionPreset::Zstd(3))
        .await
        .expect("put");
    let stored = storage.get_content(content_ref).await.expect("get");
    assert_eq!(stored.bytes, body);
}

#[tokio::test]
async fn large_bodies_spill_to_files() {
    let (storage, dir) = storage().await;
    let body = incompressible(2 * 1024 * 1024);
    let content_ref = storage
        .put_content(body.clone(), CompressionPreset::None)
        .await
        .expect("put");
    let stored = storage.get_content(content_ref).await.expect("get");
    assert_eq!(stored.bytes.len(), body.len());
    assert_eq!(stored.bytes, body);

    // The spill landed under the content directory.
    let spill_files = std::fs::read_dir(dir.path().join("content"))
        .expect("read content dir")
        .count();
    assert!(spill_files >= 1, "expected a spill file, found {spill_files}");
}

#[tokio::test]
async fn all_presets_round_trip_through_storage() {
    let (storage, _dir) = storage().await;
    let body = b"The five boxing wizards jump quickly. ".repeat(200);
    for name in ["none", "gzip-1", "gzip-9", "brotli-2", "brotli-9", "zstd-3", "zstd-19"] {
        let preset = CompressionPreset::by_name(name).expect(name);
        let content_ref = storage
            .put_content(body.clone(), preset)
            .await
            .expect("put");
        let stored = storage.get_content(content_ref).await.expect("get");
        assert_eq!(stored.bytes, body, "round trip failed for {name}");
    }
}

#[tokio::test]
async fn unknown_content_ref_is_invalid_input() {
    let (storage, _dir) = storage().await;
    let missing = storage
        .get_content(newswire_crawler::storage::ContentRef(999_999))
        .await;
    assert!(missing.is_err());
}
