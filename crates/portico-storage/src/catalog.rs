//! Extension catalog.
//!
//! Durable registry of installed extensions and their host-UI
//! associations (menu links, profile-widget placements). Slug uniqueness
//! is enforced atomically inside a single write transaction: a
//! duplicate-slug registration fails without partial side effects.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use portico_core::{ExtensionType, UiMode};

use crate::error::{Error, Result};

// Extensions table: key = extension id, value = ExtensionRecord (serialized)
const EXTENSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("extensions");
// Slug uniqueness index: key = slug, value = extension id
const SLUGS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("extension_slugs");
// Associations: key = record id, value = serialized record
const MENU_LINKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("menu_links");
const WIDGETS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("widget_placements");

/// One installed extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionRecord {
    /// Stable identifier.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// URL-safe slug, globally unique and immutable once assigned.
    pub slug: String,

    /// Semantic version string.
    pub version: String,

    /// Extension category.
    pub extension_type: ExtensionType,

    /// UI presentation mode.
    #[serde(default)]
    pub ui_mode: UiMode,

    /// Filesystem location of extracted assets.
    #[serde(default)]
    pub assets_path: String,

    /// Structured manifest as uploaded.
    #[serde(default)]
    pub manifest: serde_json::Value,

    /// Free-form configuration blob.
    #[serde(default)]
    pub config: serde_json::Value,

    /// Declared event-name subscriptions.
    #[serde(default)]
    pub subscriptions: Vec<String>,

    /// Whether the extension should be live in the loader.
    pub enabled: bool,

    /// Install timestamp (unix seconds).
    pub installed_at: i64,

    /// Last-updated timestamp (unix seconds).
    pub updated_at: i64,
}

impl ExtensionRecord {
    /// Create a new record with a generated id.
    pub fn new(
        name: impl Into<String>,
        slug: impl Into<String>,
        version: impl Into<String>,
        extension_type: ExtensionType,
    ) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            slug: slug.into(),
            version: version.into(),
            extension_type,
            ui_mode: UiMode::None,
            assets_path: String::new(),
            manifest: serde_json::Value::Null,
            config: serde_json::Value::Null,
            subscriptions: Vec::new(),
            enabled: false,
            installed_at: now,
            updated_at: now,
        }
    }

    /// Builder: set UI mode.
    pub fn with_ui_mode(mut self, ui_mode: UiMode) -> Self {
        self.ui_mode = ui_mode;
        self
    }

    /// Builder: set the assets location.
    pub fn with_assets_path(mut self, path: impl Into<String>) -> Self {
        self.assets_path = path.into();
        self
    }

    /// Builder: set the manifest.
    pub fn with_manifest(mut self, manifest: serde_json::Value) -> Self {
        self.manifest = manifest;
        self
    }

    /// Builder: set the configuration blob.
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Builder: set the subscriptions list.
    pub fn with_subscriptions(mut self, subscriptions: Vec<String>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    /// Update the timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().timestamp();
    }

    /// Validate the record.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.is_empty() {
            return Err("Extension ID cannot be empty".to_string());
        }
        if self.name.is_empty() {
            return Err("Extension name cannot be empty".to_string());
        }
        if self.slug.is_empty() {
            return Err("Extension slug cannot be empty".to_string());
        }
        if self.version.is_empty() {
            return Err("Version cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Partial update applied by [`CatalogStore::update`]. The slug is
/// deliberately absent: slugs are immutable once assigned.
#[derive(Debug, Clone, Default)]
pub struct ExtensionUpdate {
    pub name: Option<String>,
    pub version: Option<String>,
    pub extension_type: Option<ExtensionType>,
    pub ui_mode: Option<UiMode>,
    pub assets_path: Option<String>,
    pub manifest: Option<serde_json::Value>,
    pub config: Option<serde_json::Value>,
    pub subscriptions: Option<Vec<String>>,
    pub enabled: Option<bool>,
}

/// Menu entry association.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuLinkRecord {
    pub id: String,
    pub extension_id: String,
    pub label: String,
    pub url: String,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub config: serde_json::Value,
    pub created_at: i64,
}

impl MenuLinkRecord {
    /// Create a new menu link with a generated id.
    pub fn new(
        extension_id: impl Into<String>,
        label: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            extension_id: extension_id.into(),
            label: label.into(),
            url: url.into(),
            position: 0,
            config: serde_json::Value::Null,
            created_at: Utc::now().timestamp(),
        }
    }

    /// Builder: set the menu position.
    pub fn with_position(mut self, position: i32) -> Self {
        self.position = position;
        self
    }
}

/// Dashboard widget placement association.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetPlacementRecord {
    pub id: String,
    pub extension_id: String,
    /// Host dashboard zone the widget renders into.
    pub zone: String,
    #[serde(default)]
    pub position: i32,
    #[serde(default = "default_widget_span")]
    pub width: i32,
    #[serde(default = "default_widget_span")]
    pub height: i32,
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Value,
    pub created_at: i64,
}

fn default_widget_span() -> i32 {
    1
}

impl WidgetPlacementRecord {
    /// Create a new placement with a generated id.
    pub fn new(extension_id: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            extension_id: extension_id.into(),
            zone: zone.into(),
            position: 0,
            width: 1,
            height: 1,
            enabled: true,
            config: serde_json::Value::Null,
            created_at: Utc::now().timestamp(),
        }
    }

    /// Builder: set position and size.
    pub fn with_geometry(mut self, position: i32, width: i32, height: i32) -> Self {
        self.position = position;
        self.width = width;
        self.height = height;
        self
    }
}

/// Listing filter.
#[derive(Debug, Clone, Default)]
pub struct CatalogFilter {
    pub extension_type: Option<ExtensionType>,
    pub enabled: Option<bool>,
}

/// Catalog-wide statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogStatistics {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub by_type: HashMap<String, usize>,
    pub menu_links: usize,
    pub widget_placements: usize,
}

/// The durable extension catalog.
pub struct CatalogStore {
    db: Arc<Database>,
}

impl CatalogStore {
    /// Open (or create) the catalog database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = if path.exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(EXTENSIONS_TABLE)?;
            let _ = write_txn.open_table(SLUGS_TABLE)?;
            let _ = write_txn.open_table(MENU_LINKS_TABLE)?;
            let _ = write_txn.open_table(WIDGETS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // ========== Extensions ==========

    /// Register a new extension. Fails with [`Error::DuplicateSlug`] when
    /// the slug is already taken, leaving no partial side effects.
    pub fn register(&self, record: &ExtensionRecord) -> Result<ExtensionRecord> {
        record
            .validate()
            .map_err(Error::InvalidInput)?;

        let mut record = record.clone();
        record.touch();

        let write_txn = self.db.begin_write()?;
        {
            let mut slugs = write_txn.open_table(SLUGS_TABLE)?;
            let taken = slugs.get(record.slug.as_str())?.is_some();
            if taken {
                return Err(Error::DuplicateSlug(record.slug.clone()));
            }
            slugs.insert(record.slug.as_str(), record.id.as_str())?;

            let mut extensions = write_txn.open_table(EXTENSIONS_TABLE)?;
            let value = serde_json::to_vec(&record)?;
            extensions.insert(record.id.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(record)
    }

    /// Apply a partial update to an extension.
    pub fn update(&self, id: &str, update: ExtensionUpdate) -> Result<ExtensionRecord> {
        let write_txn = self.db.begin_write()?;
        let record = {
            let mut extensions = write_txn.open_table(EXTENSIONS_TABLE)?;

            let mut record: ExtensionRecord = {
                let guard = extensions
                    .get(id)?
                    .ok_or_else(|| Error::NotFound(format!("extension {}", id)))?;
                serde_json::from_slice(guard.value())?
            };

            if let Some(name) = update.name {
                record.name = name;
            }
            if let Some(version) = update.version {
                record.version = version;
            }
            if let Some(extension_type) = update.extension_type {
                record.extension_type = extension_type;
            }
            if let Some(ui_mode) = update.ui_mode {
                record.ui_mode = ui_mode;
            }
            if let Some(assets_path) = update.assets_path {
                record.assets_path = assets_path;
            }
            if let Some(manifest) = update.manifest {
                record.manifest = manifest;
            }
            if let Some(config) = update.config {
                record.config = config;
            }
            if let Some(subscriptions) = update.subscriptions {
                record.subscriptions = subscriptions;
            }
            if let Some(enabled) = update.enabled {
                record.enabled = enabled;
            }
            record.touch();

            let value = serde_json::to_vec(&record)?;
            extensions.insert(id, value.as_slice())?;
            record
        };
        write_txn.commit()?;
        Ok(record)
    }

    /// Mark an extension enabled.
    pub fn enable(&self, id: &str) -> Result<ExtensionRecord> {
        self.update(
            id,
            ExtensionUpdate {
                enabled: Some(true),
                ..Default::default()
            },
        )
    }

    /// Mark an extension disabled.
    pub fn disable(&self, id: &str) -> Result<ExtensionRecord> {
        self.update(
            id,
            ExtensionUpdate {
                enabled: Some(false),
                ..Default::default()
            },
        )
    }

    /// Hard-delete an extension, cascading to its menu-link and
    /// widget-placement associations.
    pub fn unregister(&self, id: &str) -> Result<ExtensionRecord> {
        let write_txn = self.db.begin_write()?;
        let record = {
            let mut extensions = write_txn.open_table(EXTENSIONS_TABLE)?;
            let record: ExtensionRecord = {
                let guard = extensions
                    .remove(id)?
                    .ok_or_else(|| Error::NotFound(format!("extension {}", id)))?;
                serde_json::from_slice(guard.value())?
            };

            let mut slugs = write_txn.open_table(SLUGS_TABLE)?;
            slugs.remove(record.slug.as_str())?;

            let mut menu_links = write_txn.open_table(MENU_LINKS_TABLE)?;
            for key in association_keys_for(&menu_links, id)? {
                menu_links.remove(key.as_str())?;
            }

            let mut widgets = write_txn.open_table(WIDGETS_TABLE)?;
            for key in association_keys_for(&widgets, id)? {
                widgets.remove(key.as_str())?;
            }

            record
        };
        write_txn.commit()?;
        Ok(record)
    }

    /// Load an extension by id.
    pub fn find_by_id(&self, id: &str) -> Result<Option<ExtensionRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EXTENSIONS_TABLE)?;
        match table.get(id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Load an extension by slug.
    pub fn find_by_slug(&self, slug: &str) -> Result<Option<ExtensionRecord>> {
        let read_txn = self.db.begin_read()?;
        let slugs = read_txn.open_table(SLUGS_TABLE)?;
        let id = match slugs.get(slug)? {
            Some(guard) => guard.value().to_string(),
            None => return Ok(None),
        };
        let extensions = read_txn.open_table(EXTENSIONS_TABLE)?;
        match extensions.get(id.as_str())? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List extensions matching the filter.
    pub fn find_all(&self, filter: &CatalogFilter) -> Result<Vec<ExtensionRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EXTENSIONS_TABLE)?;

        let mut records = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            let record: ExtensionRecord = serde_json::from_slice(value.value())?;
            if let Some(extension_type) = filter.extension_type {
                if record.extension_type != extension_type {
                    continue;
                }
            }
            if let Some(enabled) = filter.enabled {
                if record.enabled != enabled {
                    continue;
                }
            }
            records.push(record);
        }
        records.sort_by(|a, b| a.installed_at.cmp(&b.installed_at).then(a.slug.cmp(&b.slug)));
        Ok(records)
    }

    /// List enabled extensions.
    pub fn find_enabled(&self) -> Result<Vec<ExtensionRecord>> {
        self.find_all(&CatalogFilter {
            enabled: Some(true),
            ..Default::default()
        })
    }

    // ========== Menu links ==========

    /// Add a menu-link association. The referenced extension must exist.
    pub fn add_menu_link(&self, record: &MenuLinkRecord) -> Result<MenuLinkRecord> {
        if self.find_by_id(&record.extension_id)?.is_none() {
            return Err(Error::NotFound(format!(
                "extension {}",
                record.extension_id
            )));
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(MENU_LINKS_TABLE)?;
            let value = serde_json::to_vec(record)?;
            table.insert(record.id.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(record.clone())
    }

    /// Remove a menu link by id. Returns whether it existed.
    pub fn remove_menu_link(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(MENU_LINKS_TABLE)?;
            let existed = table.remove(id)?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(existed)
    }

    /// List menu links, optionally scoped to one extension.
    pub fn list_menu_links(&self, extension_id: Option<&str>) -> Result<Vec<MenuLinkRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MENU_LINKS_TABLE)?;

        let mut records = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            let record: MenuLinkRecord = serde_json::from_slice(value.value())?;
            if let Some(extension_id) = extension_id {
                if record.extension_id != extension_id {
                    continue;
                }
            }
            records.push(record);
        }
        records.sort_by_key(|r| r.position);
        Ok(records)
    }

    // ========== Widget placements ==========

    /// Add a widget placement. The referenced extension must exist.
    pub fn add_widget_placement(
        &self,
        record: &WidgetPlacementRecord,
    ) -> Result<WidgetPlacementRecord> {
        if self.find_by_id(&record.extension_id)?.is_none() {
            return Err(Error::NotFound(format!(
                "extension {}",
                record.extension_id
            )));
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(WIDGETS_TABLE)?;
            let value = serde_json::to_vec(record)?;
            table.insert(record.id.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(record.clone())
    }

    /// Remove a widget placement by id. Returns whether it existed.
    pub fn remove_widget_placement(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(WIDGETS_TABLE)?;
            let existed = table.remove(id)?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(existed)
    }

    /// List widget placements, optionally scoped to one extension.
    pub fn list_widget_placements(
        &self,
        extension_id: Option<&str>,
    ) -> Result<Vec<WidgetPlacementRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WIDGETS_TABLE)?;

        let mut records = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            let record: WidgetPlacementRecord = serde_json::from_slice(value.value())?;
            if let Some(extension_id) = extension_id {
                if record.extension_id != extension_id {
                    continue;
                }
            }
            records.push(record);
        }
        records.sort_by_key(|r| r.position);
        Ok(records)
    }

    // ========== Statistics ==========

    /// Catalog-wide statistics.
    pub fn statistics(&self) -> Result<CatalogStatistics> {
        let all = self.find_all(&CatalogFilter::default())?;

        let by_type = all.iter().fold(HashMap::new(), |mut acc, record| {
            *acc.entry(record.extension_type.as_str().to_string())
                .or_insert(0) += 1;
            acc
        });
        let enabled = all.iter().filter(|r| r.enabled).count();
        let menu_links = self.list_menu_links(None)?.len();
        let widget_placements = self.list_widget_placements(None)?.len();

        Ok(CatalogStatistics {
            total: all.len(),
            enabled,
            disabled: all.len() - enabled,
            by_type,
            menu_links,
            widget_placements,
        })
    }
}

/// Collect association keys belonging to one extension. Keys are
/// collected before removal because redb tables cannot be mutated while
/// iterating.
fn association_keys_for<T>(table: &T, extension_id: &str) -> Result<Vec<String>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    #[derive(Deserialize)]
    struct ExtensionRef {
        extension_id: String,
    }

    let mut keys = Vec::new();
    for item in table.iter()? {
        let (key, value) = item?;
        let parsed: ExtensionRef = serde_json::from_slice(value.value())?;
        if parsed.extension_id == extension_id {
            keys.push(key.value().to_string());
        }
    }
    Ok(keys)
}
