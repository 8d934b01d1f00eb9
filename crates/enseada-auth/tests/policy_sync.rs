use std::sync::Arc;
use std::time::Duration;

use enseada_auth::policy::PolicyChange;
use enseada_auth::prelude::*;
use enseada_auth::{AuthConfig, AuthDeps, PasswordConfig, SyncConfig};
use enseada_db_memory::InMemoryDocumentStore;
use tokio::sync::broadcast::error::TryRecvError;

const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(2);

async fn replica(store: &InMemoryDocumentStore, sync: SyncConfig) -> AuthModule {
    let module = unstarted_replica(store, sync).await;
    module.start(&Context::background()).await.unwrap();
    module
}

async fn unstarted_replica(store: &InMemoryDocumentStore, sync: SyncConfig) -> AuthModule {
    let ctx = Context::background();
    AuthModule::new(
        &ctx,
        AuthDeps {
            store: Arc::new(store.clone()),
            config: AuthConfig {
                password: PasswordConfig::for_testing(),
                sync,
                ..AuthConfig::default()
            },
        },
    )
    .await
    .unwrap()
}

/// Polls `check` until it holds or the convergence timeout passes.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + CONVERGENCE_TIMEOUT;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn permission_granted_on_one_replica_reaches_the_other() {
    let store = InMemoryDocumentStore::new();
    let a = replica(&store, SyncConfig::for_testing()).await;
    let b = replica(&store, SyncConfig::for_testing()).await;
    let ctx = Context::background();

    assert!(!b.enforcer().enforce("bob", "res:1", "read"));

    assert!(a
        .enforcer()
        .add_permission_for_user(&ctx, "bob", "res:1", "read")
        .await
        .unwrap());
    assert!(a.enforcer().enforce("bob", "res:1", "read"));

    let converged = eventually(|| b.enforcer().enforce("bob", "res:1", "read")).await;
    assert!(converged, "replica b never saw the new permission");

    assert!(a
        .enforcer()
        .delete_permission_for_user(&ctx, "bob", "res:1", "read")
        .await
        .unwrap());
    let revoked = eventually(|| !b.enforcer().enforce("bob", "res:1", "read")).await;
    assert!(revoked, "replica b kept a deleted permission");

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn role_grants_propagate_through_inheritance() {
    let store = InMemoryDocumentStore::new();
    let a = replica(&store, SyncConfig::for_testing()).await;
    let b = replica(&store, SyncConfig::for_testing()).await;
    let ctx = Context::background();

    a.enforcer()
        .transaction(&ctx, |tx| {
            tx.add_permission_for_user("admin", "repos:*", "*");
            tx.add_role_for_user("carol", "admin");
            Ok(())
        })
        .await
        .unwrap();

    let converged =
        eventually(|| b.enforcer().enforce("carol", "repos:maven/central", "write")).await;
    assert!(converged);
    assert_eq!(b.enforcer().get_roles_for_user("carol"), vec!["admin"]);
    assert!(!b.enforcer().enforce("dave", "repos:maven/central", "write"));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn batch_is_saved_once_and_reloaded_once() {
    let store = InMemoryDocumentStore::new();
    let sync = SyncConfig {
        debounce: Duration::from_millis(150),
        ..SyncConfig::for_testing()
    };
    let a = replica(&store, sync.clone()).await;
    let b = replica(&store, sync).await;
    let ctx = Context::background();
    let mut local = a.notifier().subscribe();

    let granted = a
        .enforcer()
        .transaction(&ctx, |tx| {
            let mut added = 0;
            for n in 0..10 {
                if tx.add_permission_for_user("bulk", &format!("res:{n}"), "read") {
                    added += 1;
                }
            }
            Ok(added)
        })
        .await
        .unwrap();
    assert_eq!(granted, 10);

    let converged = eventually(|| {
        (0..10).all(|n| b.enforcer().enforce("bulk", &format!("res:{n}"), "read"))
    })
    .await;
    assert!(converged);

    // let trailing feed records drain through the debounce window
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(b.reload_service().stats().successful_reloads, 1);

    let mut saved = 0;
    loop {
        match local.try_recv() {
            Ok(PolicyChange::Saved) => saved += 1,
            Ok(_) => {}
            Err(TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    assert_eq!(saved, 1);
    assert_eq!(a.reload_service().stats().local_updates, 1);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn empty_batch_persists_nothing() {
    let store = InMemoryDocumentStore::new();
    let a = replica(&store, SyncConfig::for_testing()).await;
    let ctx = Context::background();

    let value = a
        .enforcer()
        .transaction(&ctx, |tx| Ok(tx.table().len()))
        .await
        .unwrap();
    assert_eq!(value, 0);
    assert_eq!(store.document_count("acl").unwrap(), 0);
    assert_eq!(a.reload_service().stats().local_updates, 0);

    a.stop().await;
}

#[tokio::test]
async fn replica_recovers_after_feed_disconnect() {
    let store = InMemoryDocumentStore::new();
    let a = replica(&store, SyncConfig::for_testing()).await;
    let b = replica(&store, SyncConfig::for_testing()).await;
    let ctx = Context::background();

    store.disconnect_feeds("acl").unwrap();
    a.enforcer()
        .add_permission_for_user(&ctx, "eve", "res:2", "read")
        .await
        .unwrap();

    let converged = eventually(|| b.enforcer().enforce("eve", "res:2", "read")).await;
    assert!(converged);
    assert!(b.watcher().stats().reconnects >= 1);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn stopped_replica_no_longer_follows_the_store() {
    let store = InMemoryDocumentStore::new();
    let a = replica(&store, SyncConfig::for_testing()).await;
    let b = replica(&store, SyncConfig::for_testing()).await;
    let ctx = Context::background();

    tokio::time::timeout(Duration::from_secs(1), b.stop())
        .await
        .expect("stop should not hang");
    assert!(b.reload_service().is_shutting_down());

    a.enforcer()
        .add_permission_for_user(&ctx, "frank", "res:3", "read")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!b.enforcer().enforce("frank", "res:3", "read"));

    // an explicit load still sees the shared state
    b.enforcer().load_policy(&ctx).await.unwrap();
    assert!(b.enforcer().enforce("frank", "res:3", "read"));

    a.stop().await;
}

#[tokio::test]
async fn new_replica_starts_with_existing_policy() {
    let store = InMemoryDocumentStore::new();
    let a = replica(&store, SyncConfig::for_testing()).await;
    let ctx = Context::background();

    a.enforcer()
        .add_role_for_user(&ctx, "grace", "reader")
        .await
        .unwrap();
    a.enforcer()
        .add_permission_for_user(&ctx, "reader", "docs:*", "read")
        .await
        .unwrap();

    let late = replica(&store, SyncConfig::for_testing()).await;
    assert!(late.enforcer().enforce("grace", "docs:guide", "read"));
    assert!(!late.enforcer().enforce("grace", "docs:guide", "write"));

    a.stop().await;
    late.stop().await;
}

#[tokio::test]
async fn change_between_init_and_start_is_not_lost() {
    let store = InMemoryDocumentStore::new();
    let a = replica(&store, SyncConfig::for_testing()).await;
    let ctx = Context::background();

    a.enforcer()
        .add_permission_for_user(&ctx, "bob", "res:1", "read")
        .await
        .unwrap();

    let b = unstarted_replica(&store, SyncConfig::for_testing()).await;
    assert!(b.enforcer().enforce("bob", "res:1", "read"));

    a.enforcer()
        .delete_permission_for_user(&ctx, "bob", "res:1", "read")
        .await
        .unwrap();
    a.enforcer()
        .add_permission_for_user(&ctx, "bob", "res:2", "write")
        .await
        .unwrap();

    b.start(&ctx).await.unwrap();
    assert!(!b.enforcer().enforce("bob", "res:1", "read"));
    assert!(b.enforcer().enforce("bob", "res:2", "write"));

    a.enforcer()
        .add_permission_for_user(&ctx, "bob", "res:3", "read")
        .await
        .unwrap();
    let followed = eventually(|| b.enforcer().enforce("bob", "res:3", "read")).await;
    assert!(followed, "replica b stopped following the feed after start");

    a.stop().await;
    b.stop().await;
}
