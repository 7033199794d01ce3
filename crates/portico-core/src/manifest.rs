//! Extension manifest model.
//!
//! A packaged extension ships a `manifest.json` at the root of its
//! archive declaring its identity, event subscriptions, UI entry point,
//! and backend routes. Validation collects the complete list of problems
//! instead of failing on the first one, so an operator sees everything
//! wrong with an upload at once.

use serde::{Deserialize, Serialize};

/// Extension category. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionType {
    Widget,
    MenuItem,
    Payment,
    Auth,
    Content,
    System,
    User,
    Api,
}

impl ExtensionType {
    /// String form used in storage keys and API payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Widget => "widget",
            Self::MenuItem => "menu_item",
            Self::Payment => "payment",
            Self::Auth => "auth",
            Self::Content => "content",
            Self::System => "system",
            Self::User => "user",
            Self::Api => "api",
        }
    }

    /// All known categories.
    pub fn all() -> &'static [ExtensionType] {
        &[
            Self::Widget,
            Self::MenuItem,
            Self::Payment,
            Self::Auth,
            Self::Content,
            Self::System,
            Self::User,
            Self::Api,
        ]
    }
}

impl std::fmt::Display for ExtensionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExtensionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "widget" => Ok(Self::Widget),
            "menu_item" => Ok(Self::MenuItem),
            "payment" => Ok(Self::Payment),
            "auth" => Ok(Self::Auth),
            "content" => Ok(Self::Content),
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "api" => Ok(Self::Api),
            other => Err(format!("unknown extension type: {}", other)),
        }
    }
}

/// How an extension presents itself in the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiMode {
    /// Rendered inside the host UI.
    Embedded,
    /// Linked out to an external URL.
    External,
    /// No UI presentation.
    #[default]
    None,
}

/// Declared event subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestEvents {
    /// Topic names (or single-segment wildcard patterns) to subscribe.
    #[serde(default)]
    pub subscribes: Vec<String>,
}

/// Declared UI entry point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestUi {
    #[serde(default)]
    pub mode: UiMode,
    /// Relative path of the UI entry asset inside the archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
}

/// One declared HTTP route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSpec {
    /// HTTP method (GET, POST, ...).
    pub method: String,
    /// Route path, relative to the extension gateway.
    pub path: String,
    /// Handler method name on the controller. Defaults to `handle`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

impl RouteSpec {
    /// Handler method name, defaulted.
    pub fn handler_name(&self) -> &str {
        self.handler.as_deref().unwrap_or("handle")
    }
}

/// Declared server-side behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestBackend {
    /// Whether the extension ships server-side behavior at all.
    #[serde(default)]
    pub enabled: bool,
    /// Relative path of server sources inside the archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_path: Option<String>,
    /// Name of the controller in the host's factory registration table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_name: Option<String>,
    /// Declared routes.
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
}

/// The extension manifest (`manifest.json` at the archive root).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtensionManifest {
    #[serde(default)]
    pub name: String,

    /// Semantic version. Must start with `MAJOR.MINOR.PATCH`.
    #[serde(default)]
    pub version: String,

    /// Extension category.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub extension_type: Option<ExtensionType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Default configuration blob.
    #[serde(default)]
    pub config: serde_json::Value,

    #[serde(default)]
    pub events: ManifestEvents,

    #[serde(default)]
    pub ui: ManifestUi,

    #[serde(default)]
    pub backend: ManifestBackend,
}

impl ExtensionManifest {
    /// Parse a manifest from raw bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Validate the manifest, returning the complete list of problems.
    /// An empty list means the manifest is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("manifest.name is required".to_string());
        }
        if self.version.trim().is_empty() {
            errors.push("manifest.version is required".to_string());
        } else if !has_semver_prefix(&self.version) {
            errors.push(format!(
                "manifest.version must start with MAJOR.MINOR.PATCH, got \"{}\"",
                self.version
            ));
        }

        if self.backend.enabled {
            if self.backend.controller_name.is_none() {
                errors.push(
                    "manifest.backend.controller_name is required when backend is enabled"
                        .to_string(),
                );
            }
            for (index, route) in self.backend.routes.iter().enumerate() {
                if route.method.trim().is_empty() {
                    errors.push(format!("manifest.backend.routes[{}].method is required", index));
                }
                if route.path.trim().is_empty() {
                    errors.push(format!("manifest.backend.routes[{}].path is required", index));
                } else if !route.path.starts_with('/') {
                    errors.push(format!(
                        "manifest.backend.routes[{}].path must start with '/'",
                        index
                    ));
                }
            }
        }

        for (index, topic) in self.events.subscribes.iter().enumerate() {
            if topic.trim().is_empty() {
                errors.push(format!("manifest.events.subscribes[{}] is empty", index));
            }
        }

        errors
    }

    /// Parse the version as strict semver, when it is one.
    pub fn semantic_version(&self) -> Option<semver::Version> {
        semver::Version::parse(&self.version).ok()
    }
}

/// Check for a leading `MAJOR.MINOR.PATCH` numeric triple.
fn has_semver_prefix(version: &str) -> bool {
    let core: &str = version
        .split(|c: char| c == '-' || c == '+')
        .next()
        .unwrap_or("");
    let mut parts = core.split('.');
    for _ in 0..3 {
        match parts.next() {
            Some(part) if !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()) => {}
            _ => return false,
        }
    }
    true
}

/// Derive a URL-safe slug from an extension name: lowercase, runs of
/// non-alphanumerics collapsed to single hyphens, trimmed.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Welcome Email"), "welcome-email");
        assert_eq!(slugify("  My--Cool  Widget! "), "my-cool-widget");
        assert_eq!(slugify("already-slugged"), "already-slugged");
        assert_eq!(slugify("Ünïcode"), "n-code");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_validate_missing_fields() {
        let manifest = ExtensionManifest::default();
        let errors = manifest.validate();
        assert!(errors.contains(&"manifest.name is required".to_string()));
        assert!(errors.contains(&"manifest.version is required".to_string()));
    }

    #[test]
    fn test_validate_bad_version() {
        let manifest = ExtensionManifest {
            name: "x".into(),
            version: "1.0".into(),
            ..Default::default()
        };
        let errors = manifest.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("MAJOR.MINOR.PATCH"));
    }

    #[test]
    fn test_validate_accepts_prerelease_suffix() {
        let manifest = ExtensionManifest {
            name: "x".into(),
            version: "1.2.3-beta.1".into(),
            ..Default::default()
        };
        assert!(manifest.validate().is_empty());
    }

    #[test]
    fn test_validate_backend_requires_controller() {
        let manifest = ExtensionManifest {
            name: "x".into(),
            version: "1.0.0".into(),
            backend: ManifestBackend {
                enabled: true,
                routes: vec![RouteSpec {
                    method: "GET".into(),
                    path: "status".into(),
                    handler: None,
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        let errors = manifest.validate();
        assert!(errors
            .iter()
            .any(|e| e.contains("backend.controller_name is required")));
        assert!(errors.iter().any(|e| e.contains("must start with '/'")));
    }

    #[test]
    fn test_parse_full_manifest() {
        let json = serde_json::json!({
            "name": "welcome-email",
            "version": "1.0.0",
            "type": "auth",
            "description": "Sends a welcome message on registration",
            "events": {"subscribes": ["auth.after_register"]},
            "backend": {
                "enabled": true,
                "controller_name": "WelcomeEmailController",
                "routes": [{"method": "GET", "path": "/status"}]
            }
        });
        let manifest = ExtensionManifest::from_slice(json.to_string().as_bytes()).unwrap();
        assert_eq!(manifest.extension_type, Some(ExtensionType::Auth));
        assert_eq!(manifest.events.subscribes, vec!["auth.after_register"]);
        assert_eq!(manifest.backend.routes[0].handler_name(), "handle");
        assert!(manifest.validate().is_empty());
        assert_eq!(manifest.semantic_version().unwrap().major, 1);
    }

    #[test]
    fn test_extension_type_round_trip() {
        for ty in ExtensionType::all() {
            let parsed: ExtensionType = ty.as_str().parse().unwrap();
            assert_eq!(parsed, *ty);
        }
        assert!("gadget".parse::<ExtensionType>().is_err());
    }
}
