//! Site-wide URL migration over the content tables

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::MigrationError;
use crate::migrate::datastore::{Datastore, Record, ScanQuery, Table};
use crate::rewrite::{ReplacementSpec, Replacements, UrlRewriteEngine};
use crate::storage::settings::MigrationSettings;
use crate::storage::site::{PendingCanonicalUpdate, SiteSettingsStore};
use crate::utils::{trim_url, Clock};

/// Prefix of this system's own settings keys, never rewritten
pub const OWN_SETTINGS_PREFIX: &str = "vercel_wp_preview_";

/// Options that would break the install if rewritten
pub const EXCLUDED_OPTIONS: [&str; 7] = [
    "siteurl",
    "home",
    "admin_email",
    "_transient_bsr_results",
    "bsr_profiles",
    "bsr_update_site_url",
    "bsr_data",
];

const WIDGET_PREFIX: &str = "widget_";
const CUSTOMIZER_PREFIX: &str = "theme_mods_";

/// Logical area a record is reported under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    Posts,
    PostMeta,
    Comments,
    Options,
    Widgets,
    Customizer,
}

impl Area {
    /// Classify a record, `None` when it is excluded
    pub fn of(table: Table, record: &Record) -> Option<Area> {
        let key = record.key();
        match table {
            Table::Posts => Some(Area::Posts),
            Table::Comments => Some(Area::Comments),
            Table::PostMeta if key.starts_with(OWN_SETTINGS_PREFIX) => None,
            Table::PostMeta => Some(Area::PostMeta),
            Table::Options if key.starts_with(OWN_SETTINGS_PREFIX) => None,
            Table::Options if EXCLUDED_OPTIONS.contains(&key) => None,
            Table::Options if key.starts_with(WIDGET_PREFIX) => Some(Area::Widgets),
            Table::Options if key.starts_with(CUSTOMIZER_PREFIX) => Some(Area::Customizer),
            Table::Options => Some(Area::Options),
        }
    }
}

/// Matched and changed record counts for one area
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaCount {
    pub matched: usize,
    pub changed: usize,
}

/// Where an interrupted run resumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationCursor {
    pub table: Table,
    pub after_id: u64,
}

/// Per-area counts of one preview or apply run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub posts: AreaCount,
    pub post_meta: AreaCount,
    pub comments: AreaCount,
    pub options: AreaCount,
    pub widgets: AreaCount,
    pub customizer: AreaCount,
    pub total_matched: usize,
    pub total_changed: usize,
    pub records_processed: usize,
    /// Set when the per-run ceiling stopped the run early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<MigrationCursor>,
    /// A canonical URL update now waits for confirmation
    pub pending_canonical_update: bool,
}

impl MigrationReport {
    pub fn is_complete(&self) -> bool {
        self.cursor.is_none()
    }

    fn area_mut(&mut self, area: Area) -> &mut AreaCount {
        match area {
            Area::Posts => &mut self.posts,
            Area::PostMeta => &mut self.post_meta,
            Area::Comments => &mut self.comments,
            Area::Options => &mut self.options,
            Area::Widgets => &mut self.widgets,
            Area::Customizer => &mut self.customizer,
        }
    }

    fn record(&mut self, area: Area, changed: bool) {
        let count = self.area_mut(area);
        count.matched += 1;
        self.total_matched += 1;
        if changed {
            self.area_mut(area).changed += 1;
            self.total_changed += 1;
        }
    }
}

/// One search variant and what it becomes.
///
/// `replace` is `None` for variants that only select records to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub search: String,
    pub replace: Option<String>,
}

/// Search variants of an old URL: with and without trailing slash, as given
/// and under both schemes. Each maps to the new URL in the same shape.
///
/// A scheme-qualified old URL also yields its protocol-relative `//host` and
/// bare `host` forms. Those select records for counting but are never
/// replaced, so a bare host never rewrites the inside of a qualified URL.
pub fn search_variants(old_url: &str, new_url: &str) -> Vec<Variant> {
    let old = trim_url(old_url);
    let new = trim_url(new_url);
    let old_bare = strip_scheme(old);
    let new_bare = strip_scheme(new);

    let mut candidates = Vec::new();
    if !old_bare.is_empty() {
        for scheme in ["https://", "http://"] {
            candidates.push(format!("{}{}", scheme, old_bare));
            candidates.push(format!("{}{}/", scheme, old_bare));
        }
    }
    candidates.push(old.to_string());
    candidates.push(format!("{}/", old));

    let mut variants: Vec<Variant> = Vec::new();
    for search in candidates {
        if search == "/" || variants.iter().any(|v| v.search == search) {
            continue;
        }
        let target = if has_scheme(&search) { new } else { new_bare };
        let replace = if search.ends_with('/') {
            format!("{}/", target)
        } else {
            target.to_string()
        };
        variants.push(Variant {
            search,
            replace: Some(replace),
        });
    }

    if has_scheme(old) && !old_bare.is_empty() {
        for search in [format!("//{}", old_bare), old_bare.to_string()] {
            variants.push(Variant {
                search,
                replace: None,
            });
        }
    }
    variants
}

fn strip_scheme(url: &str) -> &str {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
}

fn has_scheme(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

/// Batched, resumable URL migration
pub struct ContentMigrator {
    store: Arc<dyn Datastore>,
    engine: UrlRewriteEngine,
    site: Arc<SiteSettingsStore>,
    clock: Arc<dyn Clock>,
    settings: MigrationSettings,
    running: Mutex<()>,
}

impl ContentMigrator {
    pub fn new(
        store: Arc<dyn Datastore>,
        engine: UrlRewriteEngine,
        site: Arc<SiteSettingsStore>,
        clock: Arc<dyn Clock>,
        settings: MigrationSettings,
    ) -> Self {
        Self {
            store,
            engine,
            site,
            clock,
            settings,
            running: Mutex::new(()),
        }
    }

    /// Count records per area that contain any search variant. Read only.
    pub async fn preview(&self, spec: &ReplacementSpec) -> Result<MigrationReport, MigrationError> {
        let variants = validate(spec)?;
        let mut report = MigrationReport::default();

        for table in Table::ALL {
            let mut after_id = 0;
            loop {
                let batch = self.scan(table, after_id, &variants, spec).await?;
                let full = batch.len() == self.batch_size();

                for record in &batch {
                    after_id = record.id;
                    report.records_processed += 1;
                    if let Some(area) = Area::of(table, record) {
                        report.record(area, false);
                    }
                }
                if !full {
                    break;
                }
            }
        }

        debug!("Migration preview matched {} records", report.total_matched);
        Ok(report)
    }

    /// Rewrite matching records from the start
    pub async fn apply(&self, spec: &ReplacementSpec) -> Result<MigrationReport, MigrationError> {
        self.apply_from(spec, None).await
    }

    /// Rewrite matching records, resuming after `cursor`.
    ///
    /// Stops after the per-run ceiling and returns a cursor to continue from.
    pub async fn apply_from(
        &self,
        spec: &ReplacementSpec,
        cursor: Option<MigrationCursor>,
    ) -> Result<MigrationReport, MigrationError> {
        let variants = validate(spec)?;
        let _running = self
            .running
            .try_lock()
            .map_err(|_| MigrationError::AlreadyRunning)?;

        info!(
            "Migrating content URLs ({} search variants, resuming: {})",
            variants.len(),
            cursor.is_some()
        );

        let replacements = Replacements::new(
            variants
                .iter()
                .filter_map(|v| Some((v.search.clone(), v.replace.clone()?))),
            spec.case_insensitive,
        );
        let ceiling = self.settings.max_records_per_run.max(1);
        let mut report = MigrationReport::default();
        let start_table = cursor.map(|c| c.table);
        let mut tables = Table::ALL
            .iter()
            .copied()
            .skip_while(|t| start_table.is_some_and(|start| *t != start));

        'tables: while let Some(table) = tables.next() {
            let mut after_id = match cursor {
                Some(c) if c.table == table => c.after_id,
                _ => 0,
            };

            loop {
                if report.records_processed >= ceiling {
                    if self.has_more(table, after_id, &variants, spec).await?
                        || self.any_remaining(tables.clone(), &variants, spec).await?
                    {
                        report.cursor = Some(MigrationCursor { table, after_id });
                    }
                    break 'tables;
                }

                let batch = self.scan(table, after_id, &variants, spec).await?;
                if batch.is_empty() {
                    continue 'tables;
                }
                let take = batch.len().min(ceiling - report.records_processed);
                let exhausted = batch.len() < self.batch_size() && take == batch.len();
                debug!("Processing {:?} batch of {} records", table, take);

                for record in batch.into_iter().take(take) {
                    after_id = record.id;
                    report.records_processed += 1;
                    let Some(area) = Area::of(table, &record) else {
                        continue;
                    };
                    let changed = self.rewrite_record(table, record, &replacements).await;
                    report.record(area, changed);
                }

                if exhausted {
                    continue 'tables;
                }
            }
        }

        if report.total_changed > 0 {
            report.pending_canonical_update = self.record_pending_update(spec).await?;
        }

        info!(
            "Migration run changed {} of {} matched records{}",
            report.total_changed,
            report.total_matched,
            if report.cursor.is_some() {
                " (partial)"
            } else {
                ""
            }
        );
        Ok(report)
    }

    /// Make the pending canonical URL change effective
    pub async fn apply_pending_canonical_update(
        &self,
    ) -> Result<PendingCanonicalUpdate, MigrationError> {
        let mut applied = None;
        self.site
            .update(|site| {
                if let Some(pending) = site.pending_production_url_update.take() {
                    site.production_url = pending.new_url.clone();
                    applied = Some(pending);
                }
            })
            .await
            .map_err(|e| MigrationError::Store(e.to_string()))?;

        let applied = applied.ok_or(MigrationError::NoPendingUpdate)?;
        info!(
            "Production URL changed from {} to {}",
            applied.old_url, applied.new_url
        );
        Ok(applied)
    }

    /// Rewrite one record's columns and persist them if anything changed.
    ///
    /// Store failures are logged and count as unchanged so one bad record
    /// does not abort the run.
    async fn rewrite_record(
        &self,
        table: Table,
        record: Record,
        replacements: &Replacements,
    ) -> bool {
        let mut updates = BTreeMap::new();
        for (name, value) in &record.fields {
            let rewritten = self.engine.rewrite_all(value, replacements);
            if rewritten.value != *value {
                updates.insert(name.clone(), rewritten.value);
            }
        }

        if updates.is_empty() {
            return false;
        }

        match self.store.update(table, record.id, updates).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to update {:?} record {}: {}", table, record.id, e);
                false
            }
        }
    }

    /// Store `old -> new` for confirmation when `old` is the production URL
    async fn record_pending_update(&self, spec: &ReplacementSpec) -> Result<bool, MigrationError> {
        let old_url = trim_url(&spec.search_url).to_string();
        let new_url = trim_url(&spec.replace_url).to_string();
        let now = self.clock.now();

        let mut recorded = false;
        self.site
            .update(|site| {
                if site.production_url() == Some(old_url.as_str()) {
                    site.pending_production_url_update = Some(PendingCanonicalUpdate {
                        old_url: old_url.clone(),
                        new_url: new_url.clone(),
                        recorded_at: now,
                    });
                    recorded = true;
                }
            })
            .await
            .map_err(|e| MigrationError::Store(e.to_string()))?;

        if recorded {
            info!("Production URL update {} -> {} awaits confirmation", old_url, new_url);
        }
        Ok(recorded)
    }

    async fn scan(
        &self,
        table: Table,
        after_id: u64,
        variants: &[Variant],
        spec: &ReplacementSpec,
    ) -> Result<Vec<Record>, MigrationError> {
        self.store
            .scan(&ScanQuery {
                table,
                after_id,
                limit: self.batch_size(),
                needles: variants.iter().map(|v| v.search.clone()).collect(),
                case_insensitive: spec.case_insensitive,
            })
            .await
    }

    async fn has_more(
        &self,
        table: Table,
        after_id: u64,
        variants: &[Variant],
        spec: &ReplacementSpec,
    ) -> Result<bool, MigrationError> {
        Ok(!self.scan(table, after_id, variants, spec).await?.is_empty())
    }

    async fn any_remaining<I>(
        &self,
        tables: I,
        variants: &[Variant],
        spec: &ReplacementSpec,
    ) -> Result<bool, MigrationError>
    where
        I: Iterator<Item = Table>,
    {
        for table in tables {
            if self.has_more(table, 0, variants, spec).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn batch_size(&self) -> usize {
        self.settings.batch_size.max(1)
    }
}

fn validate(spec: &ReplacementSpec) -> Result<Vec<Variant>, MigrationError> {
    let old = trim_url(spec.search_url.trim());
    let new = trim_url(spec.replace_url.trim());
    if old.is_empty() || new.is_empty() {
        return Err(MigrationError::InvalidInput(
            "old and new URLs are required".to_string(),
        ));
    }
    if old == new {
        return Err(MigrationError::InvalidInput(
            "old and new URLs are identical".to_string(),
        ));
    }
    Ok(search_variants(old, new))
}
