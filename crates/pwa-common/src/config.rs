//! Worker configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::{PwaError, Result};

/// Role of the store populated from the precache manifest.
pub const APP_SHELL_ROLE: &str = "app-shell";

/// Role of the store written by the fetch strategies at runtime.
pub const RUNTIME_ROLE: &str = "runtime";

/// Top-level worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwConfig {
    /// The application's own origin; same-origin requests use network-first
    pub origin: Url,

    /// Cache versioning
    pub version: VersionConfig,

    /// Precache manifest, resolved against `origin`
    pub precache: Vec<String>,

    /// Document served to navigations when both network and cache miss
    pub app_shell: String,

    /// Remote data-refresh endpoint, resolved against `origin`
    pub refresh_endpoint: String,

    /// Tag of the one-shot background sync
    pub sync_tag: String,

    /// Tag of the periodic sync
    pub periodic_sync_tag: String,

    /// URL schemes that are never intercepted
    pub bypass_schemes: Vec<String>,

    /// Notification defaults and presentation
    pub notification: NotificationDefaults,

    /// Per-request network timeout in seconds
    pub request_timeout_secs: u64,
}

/// Cache versioning configuration
///
/// Passed explicitly into the lifecycle manager; exactly one tag is current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConfig {
    /// Generation tag, e.g. "v2.0"
    pub tag: String,

    /// Store roles owned by this generation
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    /// Title used when the push payload has none
    pub title: String,

    /// Body used when the push payload has none
    pub body: String,

    /// Target URL used when the push payload has none
    pub url: String,

    pub icon: String,

    pub badge: String,

    /// Vibration pattern in milliseconds
    pub vibrate: Vec<u32>,

    /// Raise a confirmation notification after a successful refresh
    pub notify_on_refresh: bool,

    pub refresh_title: String,

    pub refresh_body: String,
}

impl VersionConfig {
    /// Create a versioning config with the standard role set.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            roles: vec![APP_SHELL_ROLE.to_string(), RUNTIME_ROLE.to_string()],
        }
    }

    /// Store name for a role: `<role>-<tag>`.
    pub fn cache_name(&self, role: &str) -> String {
        format!("{}-{}", role, self.tag)
    }

    pub fn app_shell_cache(&self) -> String {
        self.cache_name(APP_SHELL_ROLE)
    }

    pub fn runtime_cache(&self) -> String {
        self.cache_name(RUNTIME_ROLE)
    }

    /// Every store name belonging to this generation.
    pub fn cache_names(&self) -> Vec<String> {
        self.roles.iter().map(|role| self.cache_name(role)).collect()
    }

    /// Whether a store name belongs to this generation.
    pub fn owns(&self, cache_name: &str) -> bool {
        self.roles.iter().any(|role| self.cache_name(role) == cache_name)
    }
}

impl SwConfig {
    /// Load configuration from a JSON file; missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.version.tag.trim().is_empty() {
            return Err(PwaError::Config("version tag must not be empty".into()));
        }
        for required in [APP_SHELL_ROLE, RUNTIME_ROLE] {
            if !self.version.roles.iter().any(|r| r == required) {
                return Err(PwaError::Config(format!("missing cache role {required:?}")));
            }
        }
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(PwaError::Config(format!(
                "origin must be http(s): {}",
                self.origin
            )));
        }
        Ok(())
    }

    /// Resolve a manifest entry or configured path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        Ok(self.origin.join(path)?)
    }

    /// Absolute URLs of the precache manifest, in order.
    pub fn precache_urls(&self) -> Result<Vec<Url>> {
        self.precache.iter().map(|entry| self.resolve(entry)).collect()
    }

    pub fn app_shell_url(&self) -> Result<Url> {
        self.resolve(&self.app_shell)
    }

    pub fn refresh_url(&self) -> Result<Url> {
        self.resolve(&self.refresh_endpoint)
    }
}

impl Default for SwConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:8080/").expect("static origin URL is valid"),
            version: VersionConfig::new("v1.0"),
            precache: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/offline.html".to_string(),
                "/manifest.json".to_string(),
                "/icon-192.png".to_string(),
                "/icon-512.png".to_string(),
                "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css"
                    .to_string(),
                "https://fonts.googleapis.com/css2?family=Poppins:wght@300;400;500;600;700&family=Roboto:wght@400;500;700&display=swap"
                    .to_string(),
            ],
            app_shell: "/offline.html".to_string(),
            refresh_endpoint: "/api/sync".to_string(),
            sync_tag: "refresh-data".to_string(),
            periodic_sync_tag: "periodic-sync".to_string(),
            bypass_schemes: vec!["chrome-extension".to_string()],
            notification: NotificationDefaults::default(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self::new("v1.0")
    }
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "Monitoring Babinsa".to_string(),
            body: "Ada update baru dari sistem monitoring".to_string(),
            url: "/".to_string(),
            icon: "/icon-192.png".to_string(),
            badge: "/icon-96.png".to_string(),
            vibrate: vec![200, 100, 200],
            notify_on_refresh: true,
            refresh_title: "Data tersinkronisasi".to_string(),
            refresh_body: "Data monitoring telah diperbarui".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cache_names_follow_role_tag_scheme() {
        let version = VersionConfig::new("v2.0");
        assert_eq!(version.app_shell_cache(), "app-shell-v2.0");
        assert_eq!(version.runtime_cache(), "runtime-v2.0");
        assert_eq!(
            version.cache_names(),
            vec!["app-shell-v2.0".to_string(), "runtime-v2.0".to_string()]
        );
    }

    #[test]
    fn test_owns_only_current_generation() {
        let version = VersionConfig::new("v2.0");
        assert!(version.owns("runtime-v2.0"));
        assert!(!version.owns("runtime-v1.0"));
        assert!(!version.owns("babinsa-monitoring-v1.0"));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = SwConfig::default();
        config.validate().unwrap();
        assert!(config.precache.contains(&config.app_shell));
    }

    #[test]
    fn test_resolve_against_origin() {
        let config = SwConfig::default();
        assert_eq!(
            config.refresh_url().unwrap().as_str(),
            "http://localhost:8080/api/sync"
        );
        let urls = config.precache_urls().unwrap();
        assert_eq!(urls.len(), config.precache.len());
        assert_eq!(urls[6].host_str(), Some("cdnjs.cloudflare.com"));
    }

    #[test]
    fn test_validate_rejects_empty_tag() {
        let config = SwConfig {
            version: VersionConfig::new("  "),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PwaError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_missing_role() {
        let config = SwConfig {
            version: VersionConfig {
                tag: "v3".to_string(),
                roles: vec![RUNTIME_ROLE.to_string()],
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"origin": "https://babinsa.example/", "version": {{"tag": "v2.0", "roles": ["app-shell", "runtime"]}}}}"#
        )
        .unwrap();

        let config = SwConfig::from_file(file.path()).unwrap();
        assert_eq!(config.origin.as_str(), "https://babinsa.example/");
        assert_eq!(config.version.tag, "v2.0");
        assert_eq!(config.sync_tag, "refresh-data");
        assert_eq!(config.notification.title, "Monitoring Babinsa");
    }
}
