//! URL interning identity across equivalent raw forms

use newswire_crawler::storage::Storage;
use newswire_crawler::urlstore::{CanonicalPolicy, UrlStore};
use tempfile::TempDir;

async fn store() -> (UrlStore, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let storage = Storage::open(dir.path()).await.expect("open storage");
    (
        UrlStore::new(storage.pool().clone(), CanonicalPolicy::default()),
        dir,
    )
}

#[tokio::test]
async fn equivalent_forms_intern_to_one_id() {
    let (store, _dir) = store().await;
    let a = store
        .intern("https://Example.COM:443/news?b=2&a=1#frag")
        .await
        .expect("intern");
    let b = store
        .intern("https://example.com/news?a=1&b=2")
        .await
        .expect("intern");
    assert_eq!(a, b);

    let c = store
        .intern("https://example.com/other")
        .await
        .expect("intern");
    assert_ne!(a, c);
}

#[tokio::test]
async fn tracking_params_do_not_split_identity() {
    let (store, _dir) = store().await;
    let a = store
        .intern("https://example.com/story?utm_source=mail&id=7")
        .await
        .expect("intern");
    let b = store
        .intern("https://example.com/story?id=7&fbclid=xyz")
        .await
        .expect("intern");
    assert_eq!(a, b);
}

#[tokio::test]
async fn intern_of_resolve_is_identity() {
    let (store, _dir) = store().await;
    let id = store
        .intern("https://example.com/a/index.html?z=1&y=2")
        .await
        .expect("intern");
    let canonical = store.resolve(id).await.expect("resolve");
    let again = store.intern(&canonical).await.expect("re-intern");
    assert_eq!(id, again);
}

#[tokio::test]
async fn host_of_returns_lowercased_host() {
    let (store, _dir) = store().await;
    let id = store
        .intern("https://News.Example.ORG/section")
        .await
        .expect("intern");
    assert_eq!(store.host_of(id).await.expect("host"), "news.example.org");
}

#[tokio::test]
async fn malformed_urls_are_rejected() {
    let (store, _dir) = store().await;
    assert!(store.intern("not a url").await.is_err());
    assert!(store.intern("ftp://example.com/file").await.is_err());
    assert!(store.intern("https:///nohost").await.is_err());
}

#[tokio::test]
async fn ids_survive_store_reopen() {
    let dir = TempDir::new().expect("tempdir");
    let first_id = {
        let storage = Storage::open(dir.path()).await.expect("open");
        let store = UrlStore::new(storage.pool().clone(), CanonicalPolicy::default());
        store
            .intern("https://example.com/durable")
            .await
            .expect("intern")
    };
    let storage = Storage::open(dir.path()).await.expect("reopen");
    let store = UrlStore::new(storage.pool().clone(), CanonicalPolicy::default());
    let second_id = store
        .intern("https://example.com/durable")
        .await
        .expect("intern");
    assert_eq!(first_id, second_id);
}
