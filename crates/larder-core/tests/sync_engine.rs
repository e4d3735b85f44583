//! End-to-end synchronization passes against an in-memory libSQL store and
//! the in-process remote.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use larder_core::config::{PullMode, SyncConfig};
use larder_core::models::{FieldValue, RecordId, RecordVersion, SyncRecord};
use larder_core::remote::{InMemoryRemote, RemoteOp};
use larder_core::services::LocalStore;
use larder_core::session::AccountSession;
use larder_core::state::SyncState;
use larder_core::sync::{
    LocalStoreAdapter, RecordDescriptor, RemoteRow, RemoteTableService, SyncError, SyncOrchestrator,
    SyncStage, TableRegistry, INVENTORY_ITEMS, PRODUCTS, RECIPES,
};
use pretty_assertions::assert_eq;
use serde_json::json;

struct Harness {
    engine: Arc<SyncOrchestrator<LocalStore, InMemoryRemote>>,
    local: Arc<LocalStore>,
    remote: Arc<InMemoryRemote>,
}

async fn harness(config: SyncConfig) -> Harness {
    let registry = TableRegistry::larder_default();
    let local = Arc::new(LocalStore::open_in_memory(&registry).await.unwrap());
    let remote = Arc::new(InMemoryRemote::new());
    let engine = Arc::new(SyncOrchestrator::new(
        Arc::clone(&local),
        Arc::clone(&remote),
        registry,
        config,
    ));
    Harness {
        engine,
        local,
        remote,
    }
}

fn fields(pairs: &[(&str, FieldValue)]) -> BTreeMap<String, FieldValue> {
    pairs
        .iter()
        .map(|(name, value)| ((*name).to_string(), value.clone()))
        .collect()
}

fn id(value: &str) -> RecordId {
    value.parse().unwrap()
}

async fn write_milk(local: &LocalStore) -> SyncRecord {
    local
        .write_record(
            &PRODUCTS,
            "u1",
            Some(id("p1")),
            fields(&[("name", "Milk".into())]),
        )
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_a_dirty_row_is_pushed_and_cleaned() {
    let h = harness(SyncConfig::default()).await;
    write_milk(&h.local).await;

    let report = h.engine.sync_all("u1").await.unwrap();

    let remote_row = h.remote.row("products", "p1").unwrap();
    assert_eq!(remote_row.get("owner_id"), Some(&json!("u1")));
    assert_eq!(remote_row.get("name"), Some(&json!("Milk")));
    assert!(!remote_row.contains_key("dirty"));

    let local_row = h.local.get_record(&PRODUCTS, &id("p1")).await.unwrap().unwrap();
    assert!(!local_row.dirty);
    assert_eq!(report.pushed, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_b_remote_rows_are_pulled_clean() {
    let h = harness(SyncConfig::default()).await;
    h.remote.seed(
        "products",
        json!({"id": "p1", "owner_id": "u1", "updated_at": "2024-01-01T00:00:00Z", "name": "Milk"}),
    );
    h.remote.seed(
        "products",
        json!({"id": "p2", "owner_id": "u1", "updated_at": "2024-01-02T00:00:00Z", "name": "Bread", "brand": "Baker"}),
    );
    h.remote.seed(
        "products",
        json!({"id": "p3", "owner_id": "u2", "updated_at": "2024-01-03T00:00:00Z", "name": "Eggs"}),
    );

    let report = h.engine.sync_all("u1").await.unwrap();

    let mut rows = h.local.list_records(&PRODUCTS).await.unwrap();
    rows.sort_by(|left, right| left.id.cmp(&right.id));
    assert_eq!(
        rows.iter().map(|row| row.id.as_str()).collect::<Vec<_>>(),
        vec!["p1", "p2"]
    );
    assert!(rows.iter().all(|row| !row.dirty));
    assert!(rows.iter().all(|row| row.owner_id.as_deref() == Some("u1")));
    assert_eq!(rows[1].field("brand"), &FieldValue::from("Baker"));
    assert_eq!(report.pulled, 2);
    assert_eq!(report.pushed, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_c_push_failure_aborts_the_pass() {
    let h = harness(SyncConfig::default()).await;
    write_milk(&h.local).await;
    let stock = h
        .local
        .write_record(
            &INVENTORY_ITEMS,
            "u1",
            None,
            fields(&[
                ("product_id", "p1".into()),
                ("quantity", 1.5.into()),
                ("unit", "l".into()),
                ("opened", false.into()),
            ]),
        )
        .await
        .unwrap();
    let recipe = h
        .local
        .write_record(
            &RECIPES,
            "u1",
            None,
            fields(&[("title", "Pancakes".into()), ("favorite", true.into())]),
        )
        .await
        .unwrap();
    h.remote
        .fail("inventory_items", RemoteOp::Upsert, None, "connection reset");

    let error = h.engine.sync_all("u1").await.unwrap_err();

    assert!(matches!(error, SyncError::Remote { ref table, .. } if table == "inventory_items"));
    assert!(error.is_transient());
    assert_eq!(
        h.local.get_record(&INVENTORY_ITEMS, &stock.id).await.unwrap(),
        Some(stock)
    );
    assert_eq!(
        h.local.get_record(&RECIPES, &recipe.id).await.unwrap(),
        Some(recipe)
    );
    assert!(h
        .remote
        .calls()
        .iter()
        .all(|call| call.table == "products" || call.table == "inventory_items"));
    assert!(h.remote.rows("recipes").is_empty());

    // Tables before the failure keep their committed state
    let milk = h.local.get_record(&PRODUCTS, &id("p1")).await.unwrap().unwrap();
    assert!(!milk.dirty);
    assert!(matches!(h.engine.state(), SyncState::Aborted { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_pass_is_retried_verbatim_next_time() {
    let h = harness(SyncConfig::default()).await;
    write_milk(&h.local).await;
    h.remote.fail("products", RemoteOp::Upsert, Some(503), "unavailable");

    assert!(h.engine.sync_all("u1").await.is_err());
    assert_eq!(h.local.find_dirty(&PRODUCTS).await.unwrap().len(), 1);

    h.remote.clear_failures();
    let report = h.engine.sync_all("u1").await.unwrap();
    assert_eq!(report.pushed, 1);
    assert!(h.local.find_dirty(&PRODUCTS).await.unwrap().is_empty());
    assert_eq!(h.engine.state(), SyncState::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_failure_keeps_pushed_rows_clean_and_stops() {
    let h = harness(SyncConfig::default()).await;
    write_milk(&h.local).await;
    h.remote.fail("products", RemoteOp::Query, Some(500), "boom");

    let error = h.engine.sync_all("u1").await.unwrap_err();
    assert!(matches!(error, SyncError::Remote { status: Some(500), .. }));
    assert!(h.remote.row("products", "p1").is_some());
    assert!(h.local.find_dirty(&PRODUCTS).await.unwrap().is_empty());
    assert!(h
        .remote
        .calls()
        .iter()
        .all(|call| call.table == "products"));
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_remote_row_aborts_with_translation_error() {
    let h = harness(SyncConfig::default()).await;
    h.remote.seed(
        "products",
        json!({"id": "p1", "owner_id": "u1", "updated_at": "2024-01-01T00:00:00Z", "name": null}),
    );

    let error = h.engine.sync_all("u1").await.unwrap_err();
    assert!(matches!(error, SyncError::Translation { ref id, .. } if id == "p1"));
    assert!(h.local.list_records(&PRODUCTS).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_copy_wins_over_clean_local_row() {
    let h = harness(SyncConfig::default()).await;
    write_milk(&h.local).await;
    h.engine.sync_all("u1").await.unwrap();

    // Another device edits the row
    h.remote.seed(
        "products",
        json!({"id": "p1", "owner_id": "u1", "updated_at": "2030-01-01T00:00:00Z", "name": "Skimmed milk", "brand": "Alpine"}),
    );
    h.engine.sync_all("u1").await.unwrap();

    let local_row = h.local.get_record(&PRODUCTS, &id("p1")).await.unwrap().unwrap();
    assert_eq!(local_row.field("name"), &FieldValue::from("Skimmed milk"));
    assert_eq!(local_row.field("brand"), &FieldValue::from("Alpine"));
    assert!(!local_row.dirty);
    assert!(h.local.list_conflicts(10).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_over_dirty_row_overwrites_and_records_conflict() {
    let h = harness(SyncConfig::default()).await;
    let local_row = write_milk(&h.local).await;
    h.remote.seed(
        "products",
        json!({"id": "p1", "owner_id": "u1", "updated_at": "2024-01-01T00:00:00Z", "name": "Remote milk"}),
    );

    let pulled = h.engine.pull_table(&PRODUCTS, "u1").await.unwrap();
    assert_eq!(pulled, 1);

    let stored = h.local.get_record(&PRODUCTS, &id("p1")).await.unwrap().unwrap();
    assert_eq!(stored.field("name"), &FieldValue::from("Remote milk"));
    assert!(!stored.dirty);

    let conflicts = h.local.list_conflicts(10).await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].record_id, "p1");
    assert_eq!(conflicts[0].local_updated_at, local_row.updated_at);
    assert_eq!(conflicts[0].strategy, "remote_wins");
}

#[tokio::test(flavor = "multi_thread")]
async fn clear_local_data_empties_every_table() {
    let h = harness(SyncConfig::default()).await;
    write_milk(&h.local).await;
    h.remote.seed(
        "recipes",
        json!({"id": "r1", "owner_id": "u1", "updated_at": 1, "title": "Soup", "favorite": false}),
    );
    h.engine.sync_all("u1").await.unwrap();
    h.local
        .write_record(&PRODUCTS, "u1", None, fields(&[("name", "Bread".into())]))
        .await
        .unwrap();

    h.engine.clear_local_data().await.unwrap();

    for descriptor in h.engine.registry().iter() {
        assert!(h.local.find_dirty(descriptor).await.unwrap().is_empty());
        assert!(h.local.list_records(descriptor).await.unwrap().is_empty());
    }
    assert!(h.local.list_conflicts(10).await.unwrap().is_empty());
    // The remote keeps the account's data
    assert!(h.remote.row("recipes", "r1").is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn next_account_never_sees_previous_rows() {
    let h = harness(SyncConfig::default()).await;
    write_milk(&h.local).await;
    h.engine.sync_all("u1").await.unwrap();
    h.engine.clear_local_data().await.unwrap();

    h.remote.seed(
        "products",
        json!({"id": "p9", "owner_id": "u2", "updated_at": 5, "name": "Tea"}),
    );
    h.engine.sync_all("u2").await.unwrap();

    let rows = h.local.list_records(&PRODUCTS).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].owner_id.as_deref(), Some("u2"));
}

#[tokio::test(flavor = "multi_thread")]
async fn overlapping_pass_is_rejected() {
    let h = harness(SyncConfig::default()).await;
    write_milk(&h.local).await;
    h.remote.set_latency(Duration::from_millis(300));

    let first = {
        let engine = Arc::clone(&h.engine);
        tokio::spawn(async move { engine.sync_all("u1").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.engine.is_running());
    assert!(matches!(
        h.engine.sync_all("u1").await,
        Err(SyncError::InProgress)
    ));
    assert!(matches!(
        h.engine.push_table(&PRODUCTS, "u1").await,
        Err(SyncError::InProgress)
    ));
    assert!(first.await.unwrap().is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_remote_times_out_and_keeps_rows_dirty() {
    let h = harness(SyncConfig::default().with_request_timeout(Duration::from_millis(50))).await;
    write_milk(&h.local).await;
    h.remote.set_latency(Duration::from_millis(500));

    let error = h.engine.sync_all("u1").await.unwrap_err();

    assert!(matches!(
        error,
        SyncError::Timeout {
            ref table,
            stage: SyncStage::Push
        } if table == "products"
    ));
    assert_eq!(h.local.find_dirty(&PRODUCTS).await.unwrap().len(), 1);
    assert!(h.remote.rows("products").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn incremental_pull_sends_watermark_after_first_pass() {
    let h = harness(SyncConfig::default().with_pull_mode(PullMode::Incremental)).await;
    h.remote.seed(
        "products",
        json!({"id": "p1", "owner_id": "u1", "updated_at": "2024-03-01T10:00:00.250Z", "name": "Milk"}),
    );

    h.engine.sync_all("u1").await.unwrap();
    h.engine.sync_all("u1").await.unwrap();

    let product_queries = h
        .remote
        .calls()
        .into_iter()
        .filter(|call| call.table == "products" && call.op == RemoteOp::Query)
        .map(|call| call.since)
        .collect::<Vec<_>>();
    // Latest pulled updated_at minus the default five minute overlap
    let since = DateTime::<Utc>::from_timestamp_millis(1_709_287_200_250 - 300_000);
    assert_eq!(product_queries, vec![None, since]);

    // Other tables have pulled nothing yet and keep scanning fully
    assert!(h
        .remote
        .calls()
        .iter()
        .filter(|call| call.table == "recipes")
        .all(|call| call.since.is_none()));

    h.engine.clear_local_data().await.unwrap();
    h.engine.sync_all("u1").await.unwrap();
    let last_products_query = h
        .remote
        .calls()
        .into_iter()
        .filter(|call| call.table == "products" && call.op == RemoteOp::Query)
        .last()
        .unwrap();
    assert_eq!(last_products_query.since, None);
    assert_eq!(h.local.list_records(&PRODUCTS).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn incremental_pull_picks_up_rows_stamped_behind_the_watermark() {
    let h = harness(SyncConfig::default().with_pull_mode(PullMode::Incremental)).await;
    h.remote.seed(
        "products",
        json!({"id": "p1", "owner_id": "u1", "updated_at": "2024-03-01T10:00:00.250Z", "name": "Milk"}),
    );
    h.engine.sync_all("u1").await.unwrap();

    // Written by a device whose clock runs two minutes behind
    h.remote.seed(
        "products",
        json!({"id": "p2", "owner_id": "u1", "updated_at": "2024-03-01T09:58:00Z", "name": "Bread"}),
    );
    let report = h.engine.sync_all("u1").await.unwrap();
    assert_eq!(report.pulled, 2);

    let bread = h.local.get_record(&PRODUCTS, &id("p2")).await.unwrap().unwrap();
    assert_eq!(bread.field("name"), &FieldValue::from("Bread"));
    assert!(!bread.dirty);
}

#[tokio::test(flavor = "multi_thread")]
async fn full_pull_mode_never_sends_watermark() {
    let h = harness(SyncConfig::default()).await;
    h.remote.seed(
        "products",
        json!({"id": "p1", "owner_id": "u1", "updated_at": 10, "name": "Milk"}),
    );
    h.engine.sync_all("u1").await.unwrap();
    h.engine.sync_all("u1").await.unwrap();
    assert!(h.remote.calls().iter().all(|call| call.since.is_none()));
}

#[tokio::test(flavor = "multi_thread")]
async fn clear_local_data_stops_an_in_flight_pass() {
    let h = harness(SyncConfig::default()).await;
    write_milk(&h.local).await;
    h.remote.seed(
        "products",
        json!({"id": "p2", "owner_id": "u1", "updated_at": 1, "name": "Bread"}),
    );
    h.remote.set_latency(Duration::from_millis(200));

    let pass = {
        let engine = Arc::clone(&h.engine);
        tokio::spawn(async move { engine.sync_all("u1").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.engine.clear_local_data().await.unwrap();

    assert!(matches!(pass.await.unwrap(), Err(SyncError::Cancelled)));
    for descriptor in h.engine.registry().iter() {
        assert!(h.local.list_records(descriptor).await.unwrap().is_empty());
    }
    // The push that was already on the wire landed
    assert!(h.remote.row("products", "p1").is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn pass_queued_while_clearing_does_not_repopulate() {
    let h = harness(SyncConfig::default()).await;
    let session = AccountSession::new(Arc::clone(&h.engine));
    write_milk(&h.local).await;
    h.remote.seed(
        "products",
        json!({"id": "p2", "owner_id": "u1", "updated_at": 1, "name": "Bread"}),
    );
    h.remote.set_latency(Duration::from_millis(200));

    let pass = {
        let engine = Arc::clone(&h.engine);
        tokio::spawn(async move { engine.sync_all("u1").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let clear = {
        let engine = Arc::clone(&h.engine);
        tokio::spawn(async move { engine.clear_local_data().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let queued = session
        .notify_changes("u1")
        .expect("nothing was queued yet");

    clear.await.unwrap().unwrap();
    queued.await.unwrap();
    assert!(matches!(pass.await.unwrap(), Err(SyncError::Cancelled)));

    for descriptor in h.engine.registry().iter() {
        assert!(h.local.list_records(descriptor).await.unwrap().is_empty());
    }
    assert!(h
        .remote
        .calls()
        .iter()
        .all(|call| call.op != RemoteOp::Query));
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_owner_is_rejected_before_any_call() {
    let h = harness(SyncConfig::default()).await;
    write_milk(&h.local).await;
    assert!(matches!(
        h.engine.sync_all("").await,
        Err(SyncError::MissingOwner)
    ));
    assert!(h.remote.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn notify_changes_coalesces_and_runs_after_current_pass() {
    let h = harness(SyncConfig::default()).await;
    let session = AccountSession::new(Arc::clone(&h.engine));
    h.remote.set_latency(Duration::from_millis(100));

    let running = {
        let engine = Arc::clone(&h.engine);
        tokio::spawn(async move { engine.sync_all("u1").await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    write_milk(&h.local).await;
    let queued = session.notify_changes("u1").expect("first notify queues a pass");
    assert!(session.notify_changes("u1").is_none());

    running.await.unwrap().unwrap();
    queued.await.unwrap();

    assert!(h.local.find_dirty(&PRODUCTS).await.unwrap().is_empty());
    assert!(h.remote.row("products", "p1").is_some());

    // Once the queued pass has started, new changes queue again
    let again = session.notify_changes("u1");
    assert!(again.is_some());
    again.unwrap().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn notify_changes_swallows_errors() {
    let h = harness(SyncConfig::default()).await;
    let session = AccountSession::new(Arc::clone(&h.engine));
    write_milk(&h.local).await;
    h.remote.fail("products", RemoteOp::Upsert, Some(503), "unavailable");

    session.notify_changes("u1").unwrap().await.unwrap();
    assert_eq!(h.local.find_dirty(&PRODUCTS).await.unwrap().len(), 1);

    h.remote.clear_failures();
    let report = session.sync_now("u1").await.unwrap();
    assert_eq!(report.pushed, 1);
}

/// Wraps the real store to inject a crash before `mark_clean` or a
/// concurrent local write right after `find_dirty`.
struct FlakyLocal {
    inner: LocalStore,
    crash_before_mark_clean: AtomicBool,
    rewrite_after_read: Mutex<Option<(RecordId, BTreeMap<String, FieldValue>)>>,
}

impl FlakyLocal {
    fn new(inner: LocalStore) -> Self {
        Self {
            inner,
            crash_before_mark_clean: AtomicBool::new(false),
            rewrite_after_read: Mutex::new(None),
        }
    }
}

impl LocalStoreAdapter for FlakyLocal {
    async fn find_dirty(&self, descriptor: &RecordDescriptor) -> larder_core::Result<Vec<SyncRecord>> {
        let dirty = self.inner.find_dirty(descriptor).await?;
        let rewrite = self.rewrite_after_read.lock().unwrap().take();
        if let Some((id, fields)) = rewrite {
            self.inner
                .write_record(descriptor, "u1", Some(id), fields)
                .await?;
        }
        Ok(dirty)
    }

    async fn mark_clean(
        &self,
        descriptor: &RecordDescriptor,
        versions: &[RecordVersion],
    ) -> larder_core::Result<usize> {
        if self.crash_before_mark_clean.swap(false, Ordering::SeqCst) {
            return Err(larder_core::Error::Database("simulated crash".into()));
        }
        self.inner.mark_clean(descriptor, versions).await
    }

    async fn upsert_many(
        &self,
        descriptor: &RecordDescriptor,
        records: &[SyncRecord],
    ) -> larder_core::Result<usize> {
        self.inner.upsert_many(descriptor, records).await
    }

    async fn clear_all(&self, registry: &TableRegistry) -> larder_core::Result<()> {
        self.inner.clear_all(registry).await
    }
}

async fn flaky_engine() -> (
    SyncOrchestrator<FlakyLocal, InMemoryRemote>,
    Arc<FlakyLocal>,
    Arc<InMemoryRemote>,
) {
    let registry = TableRegistry::new(vec![PRODUCTS]).unwrap();
    let store = LocalStore::open_in_memory(&registry).await.unwrap();
    let local = Arc::new(FlakyLocal::new(store));
    let remote = Arc::new(InMemoryRemote::new());
    let engine = SyncOrchestrator::new(
        Arc::clone(&local),
        Arc::clone(&remote),
        registry,
        SyncConfig::default(),
    );
    (engine, local, remote)
}

#[tokio::test(flavor = "multi_thread")]
async fn replayed_push_after_crash_is_idempotent() {
    let (engine, local, remote) = flaky_engine().await;
    write_milk(&local.inner).await;
    local.crash_before_mark_clean.store(true, Ordering::SeqCst);

    assert!(matches!(
        engine.sync_all("u1").await,
        Err(SyncError::Local(_))
    ));
    assert_eq!(remote.rows("products").len(), 1);
    assert_eq!(local.inner.find_dirty(&PRODUCTS).await.unwrap().len(), 1);

    let report = engine.sync_all("u1").await.unwrap();
    assert_eq!(report.pushed, 1);
    assert_eq!(remote.rows("products").len(), 1);
    assert_eq!(
        remote.row("products", "p1").unwrap().get("name"),
        Some(&json!("Milk"))
    );
    assert!(local.inner.find_dirty(&PRODUCTS).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn row_rewritten_during_push_stays_dirty() {
    let (engine, local, remote) = flaky_engine().await;
    write_milk(&local.inner).await;
    *local.rewrite_after_read.lock().unwrap() =
        Some((id("p1"), fields(&[("name", "Oat milk".into())])));

    let pushed = engine.push_table(&PRODUCTS, "u1").await.unwrap();
    assert_eq!(pushed, 1);
    assert_eq!(
        remote.row("products", "p1").unwrap().get("name"),
        Some(&json!("Milk"))
    );

    let dirty = local.inner.find_dirty(&PRODUCTS).await.unwrap();
    assert_eq!(dirty.len(), 1);
    assert_eq!(dirty[0].field("name"), &FieldValue::from("Oat milk"));

    engine.push_table(&PRODUCTS, "u1").await.unwrap();
    assert_eq!(
        remote.row("products", "p1").unwrap().get("name"),
        Some(&json!("Oat milk"))
    );
    assert!(local.inner.find_dirty(&PRODUCTS).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn full_pass_overwrites_row_rewritten_during_push_and_logs_it() {
    let (engine, local, remote) = flaky_engine().await;
    write_milk(&local.inner).await;
    *local.rewrite_after_read.lock().unwrap() =
        Some((id("p1"), fields(&[("name", "Oat milk".into())])));

    let report = engine.sync_all("u1").await.unwrap();
    assert_eq!(report.pushed, 1);
    assert_eq!(report.pulled, 1);
    assert_eq!(
        remote.row("products", "p1").unwrap().get("name"),
        Some(&json!("Milk"))
    );

    // The rewrite is lost to the pull, but visibly
    let row = local.inner.get_record(&PRODUCTS, &id("p1")).await.unwrap().unwrap();
    assert_eq!(row.field("name"), &FieldValue::from("Milk"));
    assert!(!row.dirty);

    let conflicts = local.inner.list_conflicts(10).await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].table_name, "products");
    assert_eq!(conflicts[0].record_id, "p1");
    assert_eq!(conflicts[0].strategy, "remote_wins");
}

/// A remote that ignores the owner filter.
struct LeakyRemote(InMemoryRemote);

impl RemoteTableService for LeakyRemote {
    async fn upsert(&self, table: &str, rows: &[RemoteRow]) -> larder_core::sync::SyncResult<()> {
        self.0.upsert(table, rows).await
    }

    async fn query_by_owner(
        &self,
        table: &str,
        _owner_id: &str,
        _since: Option<DateTime<Utc>>,
    ) -> larder_core::sync::SyncResult<Vec<RemoteRow>> {
        Ok(self.0.rows(table))
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn rows_of_another_owner_are_refused() {
    let registry = TableRegistry::new(vec![PRODUCTS]).unwrap();
    let local = Arc::new(LocalStore::open_in_memory(&registry).await.unwrap());
    let inner = InMemoryRemote::new();
    inner.seed(
        "products",
        json!({"id": "p9", "owner_id": "u2", "updated_at": 1, "name": "Eggs"}),
    );
    let engine = SyncOrchestrator::new(
        Arc::clone(&local),
        Arc::new(LeakyRemote(inner)),
        registry,
        SyncConfig::default(),
    );

    let error = engine.sync_all("u1").await.unwrap_err();
    assert!(error.to_string().contains("another owner"));
    assert!(local.list_records(&PRODUCTS).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn state_subscribers_see_the_final_state() {
    let h = harness(SyncConfig::default()).await;
    let mut states = h.engine.subscribe();
    write_milk(&h.local).await;

    h.engine.sync_all("u1").await.unwrap();
    assert_eq!(*states.borrow_and_update(), SyncState::Idle);

    h.remote.fail("products", RemoteOp::Query, Some(500), "boom");
    assert!(h.engine.sync_all("u1").await.is_err());
    assert!(states.has_changed().unwrap());
    assert!(matches!(
        &*states.borrow_and_update(),
        SyncState::Aborted { error } if error.contains("boom")
    ));
}
