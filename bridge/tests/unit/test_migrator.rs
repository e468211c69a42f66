//! Content migration tests

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use vercelwp::errors::MigrationError;
use vercelwp::filesys::dir::Dir;
use vercelwp::migrate::datastore::{Datastore, MemoryDatastore, Record, ScanQuery, Table};
use vercelwp::migrate::migrator::{ContentMigrator, MigrationCursor};
use vercelwp::rewrite::{ReplacementSpec, UrlRewriteEngine};
use vercelwp::storage::settings::MigrationSettings;
use vercelwp::storage::site::SiteSettingsStore;

use crate::support::{t0, ManualClock};

const OLD: &str = "https://old.example.com";
const NEW: &str = "https://new.example.com";

struct Fixture {
    migrator: ContentMigrator,
    store: Arc<MemoryDatastore>,
    site: Arc<SiteSettingsStore>,
    dir: Dir,
}

impl Fixture {
    async fn new(settings: MigrationSettings) -> Self {
        let store = Arc::new(MemoryDatastore::new());
        Self::with_store(store.clone(), store, settings).await
    }

    async fn with_store(
        store: Arc<MemoryDatastore>,
        datastore: Arc<dyn Datastore>,
        settings: MigrationSettings,
    ) -> Self {
        let dir = Dir::create_temp_dir("vercelwp-migrate").await.unwrap();
        let site = Arc::new(SiteSettingsStore::new(dir.file("site.json")));
        let migrator = ContentMigrator::new(
            datastore,
            UrlRewriteEngine::new(),
            site.clone(),
            Arc::new(ManualClock::new(t0())),
            settings,
        );
        Self {
            migrator,
            store,
            site,
            dir,
        }
    }

    async fn field(&self, table: Table, id: u64, name: &str) -> String {
        self.store.get(table, id).await.unwrap().fields[name].clone()
    }
}

fn spec() -> ReplacementSpec {
    ReplacementSpec::new(OLD, NEW)
}

fn post(id: u64, body: &str) -> Record {
    Record::new(id, None, &[("post_content", body)])
}

fn option(id: u64, name: &str, value: &str) -> Record {
    Record::new(id, Some(name), &[("option_value", value)])
}

#[tokio::test]
async fn test_apply_rewrites_plain_and_serialized_records() {
    let f = Fixture::new(MigrationSettings::default()).await;
    let serialized = "a:1:{s:4:\"link\";s:25:\"https://old.example.com/x\";}";
    f.store
        .insert(Table::Posts, post(1, "visit https://old.example.com/page"))
        .await;
    f.store
        .insert(
            Table::PostMeta,
            Record::new(1, Some("_links"), &[("meta_value", serialized)]),
        )
        .await;

    let report = f.migrator.apply(&spec()).await.unwrap();

    assert_eq!(report.total_changed, 2);
    assert_eq!(report.posts.changed, 1);
    assert_eq!(report.post_meta.changed, 1);
    assert!(report.is_complete());
    assert_eq!(
        f.field(Table::Posts, 1, "post_content").await,
        "visit https://new.example.com/page"
    );
    assert_eq!(
        f.field(Table::PostMeta, 1, "meta_value").await,
        "a:1:{s:4:\"link\";s:25:\"https://new.example.com/x\";}"
    );

    // Nothing left to do on a second run
    let again = f.migrator.apply(&spec()).await.unwrap();
    assert_eq!(again.total_matched, 0);
    assert_eq!(again.total_changed, 0);

    f.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_apply_rewrites_http_and_trailing_slash_variants() {
    let f = Fixture::new(MigrationSettings::default()).await;
    f.store
        .insert(
            Table::Comments,
            Record::new(
                1,
                None,
                &[("comment_content", "old link http://old.example.com/ here")],
            ),
        )
        .await;

    let report = f.migrator.apply(&spec()).await.unwrap();
    assert_eq!(report.comments.changed, 1);
    assert_eq!(
        f.field(Table::Comments, 1, "comment_content").await,
        "old link https://new.example.com/ here"
    );

    f.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_new_url_extending_old_url_is_applied_once() {
    let f = Fixture::new(MigrationSettings::default()).await;
    f.store
        .insert(Table::Posts, post(1, "https://old.example.com/about/"))
        .await;

    let spec = ReplacementSpec::new(OLD, "https://old.example.com/blog");
    f.migrator.apply(&spec).await.unwrap();
    assert_eq!(
        f.field(Table::Posts, 1, "post_content").await,
        "https://old.example.com/blog/about/"
    );

    f.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_scheme_switch_to_longer_url_is_applied_once() {
    let f = Fixture::new(MigrationSettings::default()).await;
    f.store
        .insert(Table::Posts, post(1, "see https://x.example.com/p and http://x.example.com/"))
        .await;

    let spec = ReplacementSpec::new("https://x.example.com", "http://x.example.com/sub");
    let report = f.migrator.apply(&spec).await.unwrap();
    assert_eq!(report.total_changed, 1);
    assert_eq!(
        f.field(Table::Posts, 1, "post_content").await,
        "see http://x.example.com/sub/p and http://x.example.com/sub/"
    );

    f.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_bare_and_protocol_relative_hosts_are_counted_not_rewritten() {
    let f = Fixture::new(MigrationSettings::default()).await;
    let relative = "<img src=\"//old.example.com/a.png\">";
    f.store.insert(Table::Posts, post(1, relative)).await;
    f.store.insert(Table::Posts, post(2, "visit old.example.com/page")).await;
    f.store.insert(Table::Posts, post(3, "unrelated")).await;

    let preview = f.migrator.preview(&spec()).await.unwrap();
    assert_eq!(preview.posts.matched, 2);
    assert_eq!(preview.total_matched, 2);

    let report = f.migrator.apply(&spec()).await.unwrap();
    assert_eq!(report.total_matched, 2);
    assert_eq!(report.total_changed, 0);
    assert_eq!(f.field(Table::Posts, 1, "post_content").await, relative);
    assert_eq!(
        f.field(Table::Posts, 2, "post_content").await,
        "visit old.example.com/page"
    );

    f.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_protected_options_are_never_rewritten() {
    let f = Fixture::new(MigrationSettings::default()).await;
    let protected = [
        "siteurl",
        "home",
        "admin_email",
        "bsr_data",
        "vercel_wp_preview_settings",
    ];
    for (id, name) in protected.iter().enumerate() {
        f.store
            .insert(Table::Options, option(id as u64 + 1, name, OLD))
            .await;
    }
    f.store
        .insert(Table::Options, option(10, "widget_text", "a:1:{i:0;s:23:\"https://old.example.com\";}"))
        .await;
    f.store
        .insert(Table::Options, option(11, "theme_mods_site", "logo at https://old.example.com/logo.png"))
        .await;
    f.store
        .insert(
            Table::PostMeta,
            Record::new(1, Some("vercel_wp_preview_url"), &[("meta_value", OLD)]),
        )
        .await;

    let preview = f.migrator.preview(&spec()).await.unwrap();
    assert_eq!(preview.widgets.matched, 1);
    assert_eq!(preview.customizer.matched, 1);
    assert_eq!(preview.options.matched, 0);
    assert_eq!(preview.post_meta.matched, 0);

    let report = f.migrator.apply(&spec()).await.unwrap();
    assert_eq!(report.total_changed, 2);
    assert_eq!(report.widgets.changed, 1);
    assert_eq!(report.customizer.changed, 1);

    for id in 1..=protected.len() as u64 {
        assert_eq!(f.field(Table::Options, id, "option_value").await, OLD);
    }
    assert_eq!(f.field(Table::PostMeta, 1, "meta_value").await, OLD);

    f.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_preview_is_read_only() {
    let f = Fixture::new(MigrationSettings::default()).await;
    f.store.insert(Table::Posts, post(1, "at https://old.example.com")).await;
    f.store.insert(Table::Posts, post(2, "unrelated")).await;

    let report = f.migrator.preview(&spec()).await.unwrap();
    assert_eq!(report.posts.matched, 1);
    assert_eq!(report.total_matched, 1);
    assert_eq!(report.total_changed, 0);
    assert_eq!(
        f.field(Table::Posts, 1, "post_content").await,
        "at https://old.example.com"
    );

    f.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_ceiling_returns_cursor_and_resumes() {
    let settings = MigrationSettings {
        batch_size: 2,
        max_records_per_run: 3,
        json_values: false,
    };
    let f = Fixture::new(settings).await;
    for id in 1..=5 {
        f.store
            .insert(Table::Posts, post(id, &format!("{}/{}", OLD, id)))
            .await;
    }

    let first = f.migrator.apply(&spec()).await.unwrap();
    assert_eq!(first.records_processed, 3);
    assert_eq!(first.total_changed, 3);
    assert_eq!(
        first.cursor,
        Some(MigrationCursor {
            table: Table::Posts,
            after_id: 3
        })
    );
    assert!(!first.is_complete());

    let second = f.migrator.apply_from(&spec(), first.cursor).await.unwrap();
    assert_eq!(second.records_processed, 2);
    assert_eq!(second.total_changed, 2);
    assert!(second.is_complete());

    for id in 1..=5 {
        assert_eq!(
            f.field(Table::Posts, id, "post_content").await,
            format!("{}/{}", NEW, id)
        );
    }

    f.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_ceiling_on_last_record_reports_complete() {
    let settings = MigrationSettings {
        batch_size: 10,
        max_records_per_run: 2,
        json_values: false,
    };
    let f = Fixture::new(settings).await;
    f.store.insert(Table::Posts, post(1, OLD)).await;
    f.store.insert(Table::Posts, post(2, OLD)).await;

    let report = f.migrator.apply(&spec()).await.unwrap();
    assert_eq!(report.total_changed, 2);
    assert!(report.is_complete());

    f.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_case_insensitive_match() {
    let f = Fixture::new(MigrationSettings::default()).await;
    f.store
        .insert(Table::Posts, post(1, "HTTPS://OLD.EXAMPLE.COM/x"))
        .await;

    let report = f.migrator.apply(&spec()).await.unwrap();
    assert_eq!(report.total_changed, 0);

    let report = f
        .migrator
        .apply(&spec().case_insensitive(true))
        .await
        .unwrap();
    assert_eq!(report.total_changed, 1);
    assert_eq!(
        f.field(Table::Posts, 1, "post_content").await,
        "https://new.example.com/x"
    );

    f.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_invalid_input_is_rejected() {
    let f = Fixture::new(MigrationSettings::default()).await;
    assert!(matches!(
        f.migrator.apply(&ReplacementSpec::new("", NEW)).await,
        Err(MigrationError::InvalidInput(_))
    ));
    assert!(matches!(
        f.migrator.preview(&ReplacementSpec::new(OLD, "https://old.example.com/")).await,
        Err(MigrationError::InvalidInput(_))
    ));

    f.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_production_url_change_waits_for_confirmation() {
    let f = Fixture::new(MigrationSettings::default()).await;
    f.site
        .update(|s| s.production_url = "https://old.example.com/".to_string())
        .await
        .unwrap();
    f.store.insert(Table::Posts, post(1, OLD)).await;

    let report = f.migrator.apply(&spec()).await.unwrap();
    assert!(report.pending_canonical_update);

    let site = f.site.load().await.unwrap();
    assert_eq!(site.production_url(), Some(OLD));
    let pending = site.pending_production_url_update.unwrap();
    assert_eq!(pending.old_url, OLD);
    assert_eq!(pending.new_url, NEW);
    assert_eq!(pending.recorded_at, t0());

    let applied = f.migrator.apply_pending_canonical_update().await.unwrap();
    assert_eq!(applied.new_url, NEW);

    let site = f.site.load().await.unwrap();
    assert_eq!(site.production_url(), Some(NEW));
    assert!(site.pending_production_url_update.is_none());

    assert_eq!(
        f.migrator.apply_pending_canonical_update().await,
        Err(MigrationError::NoPendingUpdate)
    );

    f.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_no_pending_update_for_other_urls() {
    let f = Fixture::new(MigrationSettings::default()).await;
    f.site
        .update(|s| s.production_url = "https://www.example.com".to_string())
        .await
        .unwrap();
    f.store.insert(Table::Posts, post(1, OLD)).await;

    let report = f.migrator.apply(&spec()).await.unwrap();
    assert_eq!(report.total_changed, 1);
    assert!(!report.pending_canonical_update);
    assert!(f.site.load().await.unwrap().pending_production_url_update.is_none());

    f.dir.delete().await.unwrap();
}

/// Datastore whose scans take a while
struct SlowStore(Arc<MemoryDatastore>);

#[async_trait]
impl Datastore for SlowStore {
    async fn scan(&self, query: &ScanQuery) -> Result<Vec<Record>, MigrationError> {
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.0.scan(query).await
    }

    async fn update(
        &self,
        table: Table,
        id: u64,
        fields: BTreeMap<String, String>,
    ) -> Result<(), MigrationError> {
        self.0.update(table, id, fields).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_apply_is_rejected() {
    let store = Arc::new(MemoryDatastore::new());
    store.insert(Table::Posts, post(1, OLD)).await;
    let slow = Arc::new(SlowStore(store.clone()));
    let f = Fixture::with_store(store, slow, MigrationSettings::default()).await;

    let (a, b) = (spec(), spec());
    let (first, second) = tokio::join!(f.migrator.apply(&a), f.migrator.apply(&b));
    assert_eq!(first.unwrap().total_changed, 1);
    assert_eq!(second, Err(MigrationError::AlreadyRunning));

    f.dir.delete().await.unwrap();
}
