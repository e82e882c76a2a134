//! A small file service: users, their file trees and the shared blob pool,
//! all behind one cache store.
//!
//! Pick the cache with `DAO_CACHE_CONFIG`, e.g.
//! `DAO_CACHE_CONFIG='{"type":"redis","url":"redis://localhost:6379"}'`.
//! Set `RUST_LOG=dao_cache=debug` to watch coalescing and invalidation.

use std::sync::Arc;

use dao_cache::{
    CacheConfig, Column, MokaStoreConfig, Operator, Params, RepositoryPool, Repository,
    SqliteStorage, UserBasic, UserRepository,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cache_config = match std::env::var("DAO_CACHE_CONFIG") {
        Ok(json) => serde_json::from_str(&json)?,
        Err(_) => CacheConfig::Moka(MokaStoreConfig::default()),
    };
    let store = cache_config.build().await?;

    let storage = Arc::new(SqliteStorage::connect("sqlite::memory:").await?);
    storage.create_table::<UserBasic>().await?;
    storage.create_table::<UserRepository>().await?;
    storage.create_table::<RepositoryPool>().await?;

    // One store shared by every table; prefixes keep the keys apart.
    let users = Repository::<UserBasic, _>::new(storage.clone(), store.clone());
    let files = Repository::<UserRepository, _>::new(storage.clone(), store.clone());
    let pool = Repository::<RepositoryPool, _>::new(storage, store);

    let mut alice = UserBasic {
        identity: "u-alice".into(),
        name: "alice".into(),
        email: "alice@example.com".into(),
        ..Default::default()
    };
    users.create(&mut alice).await?;
    println!("Created user {} with id {}", alice.name, alice.model.id);

    // Upload: the blob and the file node land together or not at all.
    let mut tx = pool.begin().await?;
    let mut blob = RepositoryPool {
        identity: "blob-1".into(),
        hash: "9e107d9d372bb6826bd81d3542a419d6".into(),
        name: "report".into(),
        ext: ".pdf".into(),
        size: 48_213,
        path: "/blobs/9e/107d".into(),
        ..Default::default()
    };
    pool.create_by_tx(&mut tx, &mut blob).await?;
    pool.commit(tx).await?;

    let mut ids = Vec::new();
    for (name, ext) in [("report", ".pdf"), ("notes", ".txt"), ("todo", ".txt")] {
        let mut node = UserRepository {
            identity: format!("node-{}", name),
            user_identity: alice.identity.clone(),
            repository_identity: blob.identity.clone(),
            name: name.into(),
            ext: ext.into(),
            ..Default::default()
        };
        files.create(&mut node).await?;
        ids.push(node.model.id);
    }

    // First read goes to SQLite, the second is served from cache.
    let user = users.get_by_id(alice.model.id).await?;
    let again = users.get_by_id(alice.model.id).await?;
    println!("Loaded {:?} twice, same record: {}", user.name, user == again);

    // A missing id leaves a placeholder behind.
    match users.get_by_id(9_999).await {
        Err(e) if e.is_not_found() => println!("User 9999 not found (placeholder cached)"),
        other => println!("Unexpected lookup result: {:?}", other),
    }

    let mut lookup = ids.clone();
    lookup.push(9_999);
    let found = files.get_by_ids(&lookup).await?;
    println!("Batch lookup of {} ids found {}", lookup.len(), found.len());

    let mut rename = UserRepository {
        name: "notes-final".into(),
        ..Default::default()
    };
    rename.model.id = ids[1];
    files.update_by_id(&rename).await?;
    println!("Renamed to {}", files.get_by_id(ids[1]).await?.name);

    let params = Params::new(0, 10)
        .sort("name")
        .column(Column::new("user_identity", alice.identity.as_str()))
        .column(Column::new("ext", ".txt").op(Operator::Like));
    let (page, total) = files.get_by_columns(&params).await?;
    println!("{} text files:", total);
    for node in &page {
        println!("  {}{}", node.name, node.ext);
    }

    files.delete_by_id(ids[2]).await?;
    let (_, total) = files.get_by_columns(&params).await?;
    println!("{} text files after delete", total);

    Ok(())
}
