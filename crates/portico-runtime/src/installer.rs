//! Extension installer.
//!
//! Per upload: extract the archive into a scratch directory, read and
//! validate the manifest there, resolve the slug (the manifest's declared
//! name wins over the caller-declared name so slugs stay stable across
//! re-uploads), stage any server-side sources into an isolated
//! per-extension directory, then register the result in the catalog and
//! announce it on the bus.
//!
//! Re-installing an existing slug is last-writer-wins, staged before the
//! swap: the new version must extract and validate completely before the
//! old version's files are touched. Validation problems are collected and
//! returned as a list, never as a first-error bail-out. Scratch
//! directories are removed on every path, success or failure.

use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use portico_core::{slugify, EventBus, ExtensionManifest, ExtensionType, PluginFactoryRegistry};
use portico_storage::{CatalogFilter, CatalogStore, ExtensionRecord, ExtensionUpdate};

use crate::error::{Result, RuntimeError};
use crate::loader::PluginLoader;
use crate::paths::RuntimePaths;

/// Result of one install attempt.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub success: bool,
    /// Catalog id of the installed extension, on success.
    pub extension_id: Option<String>,
    /// Human-readable summary.
    pub message: String,
    /// Collected validation/processing errors, on failure.
    pub errors: Vec<String>,
    /// Non-fatal findings (unregistered controller, route collisions).
    pub warnings: Vec<String>,
}

impl InstallOutcome {
    fn failure(message: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            success: false,
            extension_id: None,
            message: message.into(),
            errors,
            warnings: Vec::new(),
        }
    }
}

/// Installer of uploaded extension archives.
pub struct ExtensionInstaller {
    bus: EventBus,
    catalog: Arc<CatalogStore>,
    loader: Arc<PluginLoader>,
    factories: Arc<PluginFactoryRegistry>,
    paths: RuntimePaths,
}

impl ExtensionInstaller {
    /// Create an installer.
    pub fn new(
        bus: EventBus,
        catalog: Arc<CatalogStore>,
        loader: Arc<PluginLoader>,
        factories: Arc<PluginFactoryRegistry>,
        paths: RuntimePaths,
    ) -> Self {
        Self {
            bus,
            catalog,
            loader,
            factories,
            paths,
        }
    }

    /// Install an uploaded zip archive.
    ///
    /// Never panics and never returns a hard error to the caller: every
    /// failure is folded into an [`InstallOutcome`] with its collected
    /// error list.
    pub async fn install(
        &self,
        archive: &[u8],
        declared_name: &str,
        declared_type: ExtensionType,
        config: Option<serde_json::Value>,
    ) -> InstallOutcome {
        match self
            .try_install(archive, declared_name, declared_type, config)
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(error = %error, "extension installation failed");
                InstallOutcome::failure("installation failed", vec![error.to_string()])
            }
        }
    }

    async fn try_install(
        &self,
        archive: &[u8],
        declared_name: &str,
        declared_type: ExtensionType,
        config: Option<serde_json::Value>,
    ) -> Result<InstallOutcome> {
        self.paths.ensure()?;

        if archive.is_empty() {
            return Ok(InstallOutcome::failure(
                "invalid archive",
                vec!["archive is empty".to_string()],
            ));
        }

        // Scratch lives inside the assets root so the final commit is a
        // plain rename on the same filesystem. The TempDir removes
        // whatever is left of it on every exit path.
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(self.paths.assets_root())?;
        let package_dir = staging.path().join("package");
        fs::create_dir_all(&package_dir)?;

        let mut zip = match zip::ZipArchive::new(Cursor::new(archive)) {
            Ok(zip) => zip,
            Err(error) => {
                return Ok(InstallOutcome::failure(
                    "invalid archive",
                    vec![format!("archive could not be read: {}", error)],
                ));
            }
        };
        if let Err(error) = zip.extract(&package_dir) {
            return Ok(InstallOutcome::failure(
                "extraction failed",
                vec![format!("archive could not be extracted: {}", error)],
            ));
        }

        // The manifest is read from scratch, before any commitment to a
        // final slug.
        let manifest_path = package_dir.join("manifest.json");
        let manifest = if manifest_path.is_file() {
            let bytes = fs::read(&manifest_path)?;
            match ExtensionManifest::from_slice(&bytes) {
                Ok(manifest) => Some(manifest),
                Err(error) => {
                    return Ok(InstallOutcome::failure(
                        "invalid manifest",
                        vec![format!("manifest.json could not be parsed: {}", error)],
                    ));
                }
            }
        } else {
            None
        };

        let mut errors = Vec::new();
        if let Some(manifest) = &manifest {
            errors.extend(manifest.validate());
        }
        let manifest_name = manifest
            .as_ref()
            .map(|m| m.name.trim())
            .filter(|name| !name.is_empty());
        if manifest_name.is_none() && declared_name.trim().is_empty() {
            errors.push("extension name is required".to_string());
        }
        if !errors.is_empty() {
            return Ok(InstallOutcome::failure("extension validation failed", errors));
        }

        let resolved_name = manifest_name.unwrap_or(declared_name.trim()).to_string();
        let slug = slugify(&resolved_name);
        if slug.is_empty() {
            return Ok(InstallOutcome::failure(
                "extension validation failed",
                vec![format!("name '{}' produces an empty slug", resolved_name)],
            ));
        }

        let version = manifest
            .as_ref()
            .map(|m| m.version.clone())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "0.1.0".to_string());
        let extension_type = manifest
            .as_ref()
            .and_then(|m| m.extension_type)
            .unwrap_or(declared_type);
        let ui_mode = manifest.as_ref().map(|m| m.ui.mode).unwrap_or_default();
        let subscriptions = manifest
            .as_ref()
            .map(|m| m.events.subscribes.clone())
            .unwrap_or_default();
        let manifest_value = match &manifest {
            Some(manifest) => serde_json::to_value(manifest)?,
            None => serde_json::Value::Null,
        };
        let config_value = config
            .or_else(|| manifest.as_ref().map(|m| m.config.clone()))
            .unwrap_or(serde_json::Value::Null);

        let mut warnings = Vec::new();
        if let Some(manifest) = &manifest {
            if manifest.backend.enabled {
                if let Some(controller) = manifest.backend.controller_name.as_deref() {
                    if !self.factories.contains(controller) {
                        let warning = format!(
                            "backend controller '{}' is not registered with the host; the extension will load as a stub",
                            controller
                        );
                        tracing::warn!(slug = %slug, "{}", warning);
                        warnings.push(warning);
                    }
                }
                warnings.extend(self.route_collisions(&slug, manifest)?);
            }
        }

        let existing = self.catalog.find_by_slug(&slug)?;
        let assets_dir = self.paths.assets_dir(&slug);
        let backend_dir = self.paths.backend_dir(&slug);

        // Everything validated in scratch. Swap: drop the previous
        // version's files, then move the staged package into place.
        if assets_dir.exists() {
            fs::remove_dir_all(&assets_dir)?;
        }
        if backend_dir.exists() {
            fs::remove_dir_all(&backend_dir)?;
        }
        fs::rename(&package_dir, &assets_dir)?;

        // Placed files are rolled back if anything below fails.
        let placed = scopeguard::guard(
            (assets_dir.clone(), backend_dir.clone()),
            |(assets, backend)| {
                let _ = fs::remove_dir_all(assets);
                let _ = fs::remove_dir_all(backend);
            },
        );

        if let Some(manifest) = &manifest {
            if manifest.backend.enabled {
                let source = assets_dir.join(
                    manifest
                        .backend
                        .controller_path
                        .as_deref()
                        .unwrap_or("backend"),
                );
                if source.is_dir() {
                    copy_dir_recursive(&source, &backend_dir)?;
                }
            }
        }

        let record = match &existing {
            Some(existing) => self.catalog.update(
                &existing.id,
                ExtensionUpdate {
                    name: Some(resolved_name.clone()),
                    version: Some(version.clone()),
                    extension_type: Some(extension_type),
                    ui_mode: Some(ui_mode),
                    assets_path: Some(assets_dir.display().to_string()),
                    manifest: Some(manifest_value),
                    config: Some(config_value),
                    subscriptions: Some(subscriptions),
                    enabled: None,
                },
            )?,
            None => {
                let record = ExtensionRecord::new(&resolved_name, &slug, &version, extension_type)
                    .with_ui_mode(ui_mode)
                    .with_assets_path(assets_dir.display().to_string())
                    .with_manifest(manifest_value)
                    .with_config(config_value)
                    .with_subscriptions(subscriptions);
                self.catalog.register(&record)?
            }
        };

        scopeguard::ScopeGuard::into_inner(placed);

        // A live superseded instance picks up the new version right away.
        if existing.is_some() && self.loader.is_loaded(&record.id).await {
            if let Err(error) = self.loader.reload(&record.id).await {
                tracing::warn!(slug = %slug, error = %error, "reload after re-install failed");
            }
        }

        self.bus
            .publish_from(
                "installer",
                "extension.installed",
                serde_json::json!({
                    "extension_id": record.id,
                    "slug": record.slug,
                    "name": record.name,
                    "version": record.version,
                }),
            )
            .await;

        tracing::info!(
            slug = %record.slug,
            version = %record.version,
            superseded = existing.is_some(),
            "extension installed"
        );

        Ok(InstallOutcome {
            success: true,
            extension_id: Some(record.id.clone()),
            message: format!("Extension '{}' v{} installed", record.name, record.version),
            errors: Vec::new(),
            warnings,
        })
    }

    /// Full uninstall: unload, remove the catalog row (cascading its
    /// associations), and delete on-disk assets and staged backend code.
    pub async fn uninstall(&self, id: &str) -> Result<ExtensionRecord> {
        let record = self
            .catalog
            .find_by_id(id)?
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;

        if self.loader.is_loaded(id).await {
            if let Err(error) = self.loader.unload(id).await {
                tracing::warn!(slug = %record.slug, error = %error, "unload during uninstall failed");
            }
        }

        let record = self.catalog.unregister(id)?;

        for dir in [
            self.paths.assets_dir(&record.slug),
            self.paths.backend_dir(&record.slug),
        ] {
            if dir.exists() {
                if let Err(error) = fs::remove_dir_all(&dir) {
                    tracing::warn!(path = %dir.display(), error = %error, "failed to remove extension files");
                }
            }
        }

        self.bus
            .publish_from(
                "installer",
                "extension.uninstalled",
                serde_json::json!({"extension_id": record.id, "slug": record.slug}),
            )
            .await;

        tracing::info!(slug = %record.slug, "extension uninstalled");
        Ok(record)
    }

    fn route_collisions(&self, slug: &str, manifest: &ExtensionManifest) -> Result<Vec<String>> {
        let mut collisions = Vec::new();
        let installed = self.catalog.find_all(&CatalogFilter::default())?;

        for other in installed.iter().filter(|record| record.slug != slug) {
            let other_manifest: ExtensionManifest =
                match serde_json::from_value(other.manifest.clone()) {
                    Ok(manifest) => manifest,
                    Err(_) => continue,
                };
            if !other_manifest.backend.enabled {
                continue;
            }
            for route in &manifest.backend.routes {
                for other_route in &other_manifest.backend.routes {
                    if route.method.eq_ignore_ascii_case(&other_route.method)
                        && route.path == other_route.path
                    {
                        collisions.push(format!(
                            "route {} {} is already claimed by extension '{}'",
                            route.method.to_uppercase(),
                            route.path,
                            other.slug
                        ));
                    }
                }
            }
        }
        Ok(collisions)
    }
}

fn copy_dir_recursive(source: &Path, target: &Path) -> std::io::Result<()> {
    fs::create_dir_all(target)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let entry_target = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &entry_target)?;
        } else {
            fs::copy(entry.path(), &entry_target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_archive(files: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, content) in files {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn manifest_json(name: &str, version: &str) -> String {
        serde_json::json!({
            "name": name,
            "version": version,
            "type": "auth",
            "events": {"subscribes": ["auth.after_register"]}
        })
        .to_string()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        paths: RuntimePaths,
        catalog: Arc<CatalogStore>,
        installer: ExtensionInstaller,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let paths = RuntimePaths::new(dir.path().join("data"));
        paths.ensure().unwrap();
        let bus = EventBus::new();
        let catalog = Arc::new(CatalogStore::open(paths.catalog_db()).unwrap());
        let factories = Arc::new(PluginFactoryRegistry::new());
        let loader = Arc::new(PluginLoader::new(
            bus.clone(),
            catalog.clone(),
            factories.clone(),
        ));
        let installer =
            ExtensionInstaller::new(bus, catalog.clone(), loader, factories, paths.clone());
        Fixture {
            _dir: dir,
            paths,
            catalog,
            installer,
        }
    }

    fn no_staging_leftovers(paths: &RuntimePaths) -> bool {
        fs::read_dir(paths.assets_root())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .all(|entry| !entry.file_name().to_string_lossy().starts_with(".staging-"))
    }

    #[tokio::test]
    async fn test_install_with_manifest() {
        let fx = fixture();
        let archive = build_archive(&[
            ("manifest.json", &manifest_json("welcome-email", "1.0.0")),
            ("ui/index.html", "<h1>hi</h1>"),
        ]);

        let outcome = fx
            .installer
            .install(&archive, "Welcome Email", ExtensionType::Auth, None)
            .await;
        assert!(outcome.success, "{:?}", outcome.errors);

        let record = fx.catalog.find_by_slug("welcome-email").unwrap().unwrap();
        assert_eq!(record.version, "1.0.0");
        assert!(!record.enabled);
        assert_eq!(record.subscriptions, vec!["auth.after_register"]);
        assert!(fx.paths.assets_dir("welcome-email").join("ui/index.html").is_file());
        assert!(no_staging_leftovers(&fx.paths));
    }

    #[tokio::test]
    async fn test_manifest_name_wins_over_declared_name() {
        let fx = fixture();
        let archive = build_archive(&[("manifest.json", &manifest_json("welcome-email", "1.0.0"))]);

        let outcome = fx
            .installer
            .install(&archive, "Something Else Entirely", ExtensionType::Auth, None)
            .await;
        assert!(outcome.success);
        assert!(fx.catalog.find_by_slug("welcome-email").unwrap().is_some());
        assert!(fx.catalog.find_by_slug("something-else-entirely").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_version_collected() {
        let fx = fixture();
        let archive = build_archive(&[(
            "manifest.json",
            &serde_json::json!({"name": "broken"}).to_string(),
        )]);

        let outcome = fx
            .installer
            .install(&archive, "Broken", ExtensionType::Widget, None)
            .await;
        assert!(!outcome.success);
        assert!(outcome
            .errors
            .contains(&"manifest.version is required".to_string()));
        assert!(fx.catalog.find_by_slug("broken").unwrap().is_none());
        assert!(!fx.paths.assets_dir("broken").exists());
        assert!(no_staging_leftovers(&fx.paths));
    }

    #[tokio::test]
    async fn test_garbage_archive_rejected() {
        let fx = fixture();
        let outcome = fx
            .installer
            .install(b"not a zip at all", "X", ExtensionType::Widget, None)
            .await;
        assert!(!outcome.success);
        assert!(!outcome.errors.is_empty());
        assert!(no_staging_leftovers(&fx.paths));
    }

    #[tokio::test]
    async fn test_reinstall_supersedes_previous_version() {
        let fx = fixture();

        let v1 = build_archive(&[
            ("manifest.json", &manifest_json("welcome-email", "1.0.0")),
            ("old-asset.txt", "v1"),
        ]);
        let outcome = fx
            .installer
            .install(&v1, "Welcome Email", ExtensionType::Auth, None)
            .await;
        let first_id = outcome.extension_id.unwrap();

        let v2 = build_archive(&[
            ("manifest.json", &manifest_json("welcome-email", "2.0.0")),
            ("new-asset.txt", "v2"),
        ]);
        let outcome = fx
            .installer
            .install(&v2, "Welcome Email", ExtensionType::Auth, None)
            .await;
        assert!(outcome.success);
        // Same logical extension: id and slug survive the re-upload.
        assert_eq!(outcome.extension_id.as_deref(), Some(first_id.as_str()));

        let all = fx.catalog.find_all(&CatalogFilter::default()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].version, "2.0.0");

        let assets = fx.paths.assets_dir("welcome-email");
        assert!(assets.join("new-asset.txt").is_file());
        assert!(!assets.join("old-asset.txt").exists());
    }

    #[tokio::test]
    async fn test_unregistered_controller_warns_but_installs() {
        let fx = fixture();
        let archive = build_archive(&[(
            "manifest.json",
            &serde_json::json!({
                "name": "hooks",
                "version": "1.0.0",
                "backend": {"enabled": true, "controller_name": "NoSuchController"}
            })
            .to_string(),
        )]);

        let outcome = fx
            .installer
            .install(&archive, "Hooks", ExtensionType::Api, None)
            .await;
        assert!(outcome.success);
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.contains("NoSuchController")));
        assert!(fx.catalog.find_by_slug("hooks").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_backend_sources_staged_outside_assets() {
        let fx = fixture();
        let archive = build_archive(&[
            (
                "manifest.json",
                &serde_json::json!({
                    "name": "hooks",
                    "version": "1.0.0",
                    "backend": {"enabled": true, "controller_name": "HooksController"}
                })
                .to_string(),
            ),
            ("backend/controller.js", "module.exports = {};"),
        ]);

        let outcome = fx
            .installer
            .install(&archive, "Hooks", ExtensionType::Api, None)
            .await;
        assert!(outcome.success);
        assert!(fx
            .paths
            .backend_dir("hooks")
            .join("controller.js")
            .is_file());
    }

    #[tokio::test]
    async fn test_route_collision_warning() {
        let fx = fixture();
        let first = build_archive(&[(
            "manifest.json",
            &serde_json::json!({
                "name": "first",
                "version": "1.0.0",
                "backend": {
                    "enabled": true,
                    "controller_name": "C1",
                    "routes": [{"method": "GET", "path": "/shared"}]
                }
            })
            .to_string(),
        )]);
        fx.installer
            .install(&first, "First", ExtensionType::Api, None)
            .await;

        let second = build_archive(&[(
            "manifest.json",
            &serde_json::json!({
                "name": "second",
                "version": "1.0.0",
                "backend": {
                    "enabled": true,
                    "controller_name": "C2",
                    "routes": [{"method": "get", "path": "/shared"}]
                }
            })
            .to_string(),
        )]);
        let outcome = fx
            .installer
            .install(&second, "Second", ExtensionType::Api, None)
            .await;
        assert!(outcome.success);
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.contains("/shared") && w.contains("first")));
    }

    #[tokio::test]
    async fn test_uninstall_removes_everything() {
        let fx = fixture();
        let archive = build_archive(&[
            ("manifest.json", &manifest_json("welcome-email", "1.0.0")),
            ("backend/x.js", ""),
        ]);
        let outcome = fx
            .installer
            .install(&archive, "Welcome Email", ExtensionType::Auth, None)
            .await;
        let id = outcome.extension_id.unwrap();

        fx.catalog
            .add_menu_link(&portico_storage::MenuLinkRecord::new(
                &id,
                "Welcome",
                "/ext/welcome-email",
            ))
            .unwrap();

        fx.installer.uninstall(&id).await.unwrap();

        assert!(fx.catalog.find_by_id(&id).unwrap().is_none());
        assert!(fx.catalog.list_menu_links(None).unwrap().is_empty());
        assert!(!fx.paths.assets_dir("welcome-email").exists());
        assert!(!fx.paths.backend_dir("welcome-email").exists());
    }

    #[tokio::test]
    async fn test_uninstall_unknown_extension() {
        let fx = fixture();
        assert!(matches!(
            fx.installer.uninstall("missing").await,
            Err(RuntimeError::NotFound(_))
        ));
    }
}
