#![allow(clippy::unwrap_used)]
// End-to-end scenarios against a full in-memory core.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use mycontroller_core::auth::LoginRequest;
use mycontroller_core::backup::{BackupEngine, startup_import};
use mycontroller_core::bus::{Bus, topic};
use mycontroller_core::config::{CoreConfig, Directories};
use mycontroller_core::model::{
    Collection, Entity, Event, EventType, Field, Gateway, Handler, Node, ServiceToken, Settings,
    Source, Status, User,
};
use mycontroller_core::service::{
    ResourceApi, ResourceService, StateReporter, Worker, WorkerError, WorkerRegistry, service_name,
};
use mycontroller_core::storage::{
    MemoryStorage, MemoryStorageConfig, Pagination, StorageFormat, write_dump,
};
use mycontroller_core::{AuthService, CoreContext, DeletionEngine, EntityApi};

// ── Helpers ─────────────────────────────────────────────────────────

fn core(root: &Path) -> Arc<CoreContext> {
    let directories = Directories::under(root);
    let storage = MemoryStorageConfig {
        dump_enabled: true,
        dump_interval: Duration::ZERO,
        dump_dir: directories.storage.join("memory"),
        dump_formats: vec![StorageFormat::Json],
    };
    let engine = MemoryStorage::start(storage.clone());
    let config = CoreConfig {
        directories,
        storage,
        ..CoreConfig::default()
    };
    CoreContext::new(config, Bus::default(), engine)
}

async fn count(ctx: &CoreContext, collection: Collection) -> u64 {
    ctx.storage
        .find(collection, &[], &Pagination::unbounded())
        .await
        .unwrap()
        .count
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn event_sink(ctx: &CoreContext, topic: &str) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    ctx.bus.subscribe(topic, move |msg| {
        let tx = tx.clone();
        async move {
            if let Ok(event) = msg.decode::<Event>() {
                let _ = tx.send(event);
            }
        }
    });
    rx
}

#[derive(Default)]
struct Lifecycle {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

struct CountingWorker(Arc<Lifecycle>);

#[async_trait]
impl Worker for CountingWorker {
    async fn start(&mut self) -> Result<(), WorkerError> {
        self.0.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), WorkerError> {
        self.0.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn counting_registry(lifecycle: &Arc<Lifecycle>) -> WorkerRegistry<Gateway> {
    let lifecycle = Arc::clone(lifecycle);
    WorkerRegistry::new().with(
        "counting",
        move |_: &Gateway, _: StateReporter<Gateway>| -> Result<Box<dyn Worker>, WorkerError> {
            Ok(Box::new(CountingWorker(Arc::clone(&lifecycle))))
        },
    )
}

fn counting_gateway(id: &str, enabled: bool) -> Gateway {
    Gateway {
        id: id.into(),
        enabled,
        provider: json!({ "type": "counting" }),
        ..Gateway::default()
    }
}

// ── Cascade delete ──────────────────────────────────────────────────

#[tokio::test]
async fn test_gateway_delete_cascades_through_the_tree() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = core(dir.path());
    let engine = DeletionEngine::start(Arc::clone(&ctx));

    EntityApi::<Gateway>::new(Arc::clone(&ctx))
        .save(Gateway {
            id: "gw1".into(),
            ..Gateway::default()
        })
        .await
        .unwrap();
    let nodes = EntityApi::<Node>::new(Arc::clone(&ctx));
    for node in ["n1", "n2"] {
        nodes
            .save(Node {
                id: Node::storage_id("gw1", node),
                gateway_id: "gw1".into(),
                node_id: node.into(),
                ..Node::default()
            })
            .await
            .unwrap();
    }
    EntityApi::<Source>::new(Arc::clone(&ctx))
        .save(Source {
            id: Source::storage_id("gw1", "n1", "s1"),
            gateway_id: "gw1".into(),
            node_id: "n1".into(),
            source_id: "s1".into(),
            ..Source::default()
        })
        .await
        .unwrap();
    let fields = EntityApi::<Field>::new(Arc::clone(&ctx));
    for field in ["temperature", "humidity", "battery"] {
        fields
            .save(Field {
                id: Field::storage_id("gw1", "n1", "s1", field),
                gateway_id: "gw1".into(),
                node_id: "n1".into(),
                source_id: "s1".into(),
                field_id: field.into(),
                ..Field::default()
            })
            .await
            .unwrap();
    }

    let mut events = event_sink(&ctx, topic::ALL_EVENTS);
    EntityApi::<Gateway>::new(Arc::clone(&ctx))
        .delete(&["gw1".to_owned()])
        .await
        .unwrap();

    let mut deleted_children = 0;
    let collect = tokio::time::timeout(Duration::from_secs(1), async {
        while deleted_children < 6 {
            let event = events.recv().await.unwrap();
            if event.event_type == EventType::Deleted && event.entity_type != Collection::Gateway
            {
                deleted_children += 1;
            }
        }
    })
    .await;
    assert!(collect.is_ok(), "saw only {deleted_children} child deletions");

    for collection in [Collection::Node, Collection::Source, Collection::Field] {
        assert_eq!(count(&ctx, collection).await, 0, "{collection} not empty");
    }
    engine.stop().await;
}

// ── Backup / restore ────────────────────────────────────────────────

async fn seed_ten<T: Entity>(ctx: &Arc<CoreContext>, build: impl Fn(usize) -> T) {
    let api = EntityApi::<T>::new(Arc::clone(ctx));
    for i in 0..10 {
        api.save(build(i)).await.unwrap();
    }
}

async fn snapshot(ctx: &CoreContext, collection: Collection) -> Vec<(String, Value)> {
    ctx.storage
        .find(collection, &[], &Pagination::unbounded())
        .await
        .unwrap()
        .data
        .into_iter()
        .map(|row| (row["id"].as_str().unwrap().to_owned(), row["modifiedOn"].clone()))
        .collect()
}

#[tokio::test]
async fn test_backup_restore_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = core(dir.path());
    seed_ten(&ctx, |i| Gateway {
        id: format!("gw{i}"),
        ..Gateway::default()
    })
    .await;
    seed_ten(&ctx, |i| Node {
        id: Node::storage_id("gw0", &format!("n{i}")),
        gateway_id: "gw0".into(),
        node_id: format!("n{i}"),
        ..Node::default()
    })
    .await;
    seed_ten(&ctx, |i| Field {
        id: format!("field{i}"),
        ..Field::default()
    })
    .await;
    seed_ten(&ctx, |i| User {
        id: format!("u{i}"),
        username: format!("user{i}"),
        password: "$argon2id$v=19$stored".into(),
        ..User::default()
    })
    .await;
    seed_ten(&ctx, |i| Handler {
        id: format!("h{i}"),
        ..Handler::default()
    })
    .await;
    seed_ten(&ctx, |i| Settings {
        id: format!("s{i}"),
        spec: json!({ "n": i }),
        ..Settings::default()
    })
    .await;

    let seeded = [
        Collection::Gateway,
        Collection::Node,
        Collection::Field,
        Collection::User,
        Collection::Handler,
        Collection::Settings,
    ];
    let mut before = Vec::new();
    for collection in seeded {
        before.push(snapshot(&ctx, collection).await);
    }

    let engine = BackupEngine::new(Arc::clone(&ctx));
    let exported = engine
        .export(&dir.path().join("backups"), "mc_backup", StorageFormat::Json)
        .await
        .unwrap();
    ctx.storage.clear_database().await.unwrap();
    assert_eq!(count(&ctx, Collection::Gateway).await, 0);

    let report = engine.restore(&exported.bundle).await.unwrap();
    for (collection, rows) in seeded.iter().zip(&before) {
        assert_eq!(report.rows[collection.as_ref()], 10);
        assert_eq!(&snapshot(&ctx, *collection).await, rows);
    }
    let user = EntityApi::<User>::new(Arc::clone(&ctx))
        .get_by_id("u3")
        .await
        .unwrap();
    assert_eq!(user.password, "$argon2id$v=19$stored");
}

// ── Resource services ───────────────────────────────────────────────

#[tokio::test]
async fn test_reload_restarts_worker_once() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = core(dir.path());
    let lifecycle = Arc::new(Lifecycle::default());
    let service = ResourceService::start(
        service_name::GATEWAY,
        Arc::clone(&ctx),
        counting_registry(&lifecycle),
    );
    let api = ResourceApi::<Gateway>::new(Arc::clone(&ctx), service_name::GATEWAY);
    api.entities()
        .save(counting_gateway("gw1", false))
        .await
        .unwrap();

    api.enable(&["gw1".to_owned()]).await.unwrap();
    let entities = api.entities();
    let is_up = move || async move {
        entities.get_by_id("gw1").await.unwrap().state.status == Status::Up
    };
    assert!(eventually(is_up).await);

    api.reload(&["gw1".to_owned()]).unwrap();
    let counts = &lifecycle;
    assert!(eventually(move || async move { counts.starts.load(Ordering::SeqCst) == 2 }).await);
    assert!(eventually(is_up).await);
    assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 2);
    assert_eq!(lifecycle.stops.load(Ordering::SeqCst), 1);
    assert_eq!(service.live_ids().await, vec!["gw1"]);
    service.shutdown().await;
}

#[tokio::test]
async fn test_load_all_starts_enabled_gateways() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = core(dir.path());
    let lifecycle = Arc::new(Lifecycle::default());
    let service = ResourceService::start(
        service_name::GATEWAY,
        Arc::clone(&ctx),
        counting_registry(&lifecycle),
    );
    let api = ResourceApi::<Gateway>::new(Arc::clone(&ctx), service_name::GATEWAY);
    for (id, enabled) in [("gw1", true), ("gw2", false), ("gw3", true)] {
        api.entities()
            .save(counting_gateway(id, enabled))
            .await
            .unwrap();
    }

    let live = &service;
    api.load_all().unwrap();
    assert!(eventually(move || async move { live.live_ids().await.len() == 2 }).await);
    assert_eq!(service.live_ids().await, vec!["gw1", "gw3"]);

    api.unload_all().unwrap();
    assert!(eventually(move || async move { live.live_ids().await.is_empty() }).await);
    assert_eq!(lifecycle.stops.load(Ordering::SeqCst), 2);
    service.shutdown().await;
}

// ── Auth ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_service_token_login_then_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = core(dir.path());
    let auth = AuthService::new(Arc::clone(&ctx));
    let user = auth
        .save_user(
            User {
                id: "u".into(),
                username: "automation".into(),
                full_name: "Automation".into(),
                ..User::default()
            },
            Some("s3cret"),
        )
        .await
        .unwrap();

    let created = auth
        .create_service_token(ServiceToken {
            user_id: user.id.clone(),
            name: "ci".into(),
            expires_on: Some(Utc::now() + TimeDelta::days(30)),
            ..ServiceToken::default()
        })
        .await
        .unwrap();

    let request = LoginRequest {
        token: created.presented.clone(),
        ..LoginRequest::default()
    };
    let response = auth.login(&request).await.unwrap();
    assert_eq!(response.user_id, "u");
    let claims = auth.jwt().verify(&response.token, Utc::now()).unwrap();
    assert_eq!(claims.user_id, "u");

    let mut token = created.token;
    token.expires_on = Some(Utc::now() - TimeDelta::days(1));
    auth.service_tokens().save(token).await.unwrap();

    let err = auth.login(&request).await.unwrap_err();
    let err = mycontroller_core::CoreError::from(err);
    assert_eq!(err.status_code(), 401);

    let mut inbound = http::Request::builder()
        .uri("/api/gateway")
        .header(http::header::AUTHORIZATION, created.presented.as_str())
        .body(())
        .unwrap();
    assert!(auth.authenticate(&mut inbound).await.is_err());
}

// ── Bus pause ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_paused_bus_discards_events() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = core(dir.path());
    let mut events = event_sink(&ctx, &topic::event(Collection::Field));

    ctx.bus.pause_publish();
    for i in 0..5 {
        let event = Event::new(
            Collection::Field,
            EventType::Updated,
            json!({ "id": format!("f{i}") }),
        );
        ctx.bus.post_event(&event).unwrap();
    }
    ctx.bus.resume_publish();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());

    // Publishing works again after resume.
    ctx.bus
        .post_event(&Event::new(
            Collection::Field,
            EventType::Updated,
            json!({ "id": "after" }),
        ))
        .unwrap();
    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.entity_str("id"), Some("after"));
}

// ── Startup import ──────────────────────────────────────────────────

#[tokio::test]
async fn test_startup_import_reads_every_dump_file() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = core(dir.path());
    let dump_dir = ctx.config.storage.dump_dir.clone();

    let users: Vec<Value> = (0..120)
        .map(|i| {
            json!({
                "id": format!("user-{i:03}"),
                "username": format!("user{i}"),
                "modifiedOn": "2026-01-02T03:04:05Z",
            })
        })
        .collect();
    let files = write_dump(&dump_dir, "user", &users, StorageFormat::Json)
        .await
        .unwrap();
    assert_eq!(files, 3);

    assert_eq!(startup_import(&ctx).await.unwrap(), 120);
    let found = ctx
        .storage
        .find(Collection::User, &[], &Pagination::page(1000, 0))
        .await
        .unwrap();
    assert_eq!(found.count, 120);
    assert_eq!(found.data[0]["modifiedOn"], "2026-01-02T03:04:05Z");
}
