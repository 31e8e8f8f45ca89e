use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};
use std::time::Duration;

use crate::pdf::{
    DEFAULT_CACHE_SIZE, DEFAULT_PREFETCH_PAGE_LIMIT, DEFAULT_WORKERS, FINAL_SCALE, PREVIEW_SCALE,
    RenderConfig,
};
use crate::watermark::DEFAULT_BASE_LABEL;

pub const CURRENT_VERSION: u32 = 2;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "pagevault";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_watermark_label")]
    pub watermark_label: String,

    #[serde(default = "default_preview_scale")]
    pub preview_scale: f32,

    #[serde(default = "default_final_scale")]
    pub final_scale: f32,

    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,

    #[serde(default = "default_preview_timeout_ms")]
    pub preview_timeout_ms: u64,

    #[serde(default = "default_final_timeout_ms")]
    pub final_timeout_ms: u64,

    #[serde(default = "default_upgrade_delay_ms")]
    pub upgrade_delay_ms: u64,

    #[serde(default = "default_prefetch_delay_ms")]
    pub prefetch_delay_ms: u64,

    #[serde(default = "default_notice_duration_ms")]
    pub notice_duration_ms: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Documents with at least this many pages are never prefetched
    #[serde(default = "default_prefetch_page_limit")]
    pub prefetch_page_limit: u32,

    #[serde(default = "default_render_workers")]
    pub render_workers: usize,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_watermark_label() -> String {
    DEFAULT_BASE_LABEL.to_string()
}

fn default_preview_scale() -> f32 {
    PREVIEW_SCALE
}

fn default_final_scale() -> f32 {
    FINAL_SCALE
}

fn default_metadata_timeout_ms() -> u64 {
    10_000
}

fn default_preview_timeout_ms() -> u64 {
    5_000
}

fn default_final_timeout_ms() -> u64 {
    12_000
}

fn default_upgrade_delay_ms() -> u64 {
    500
}

fn default_prefetch_delay_ms() -> u64 {
    1_500
}

fn default_notice_duration_ms() -> u64 {
    2_000
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_SIZE
}

fn default_prefetch_page_limit() -> u32 {
    DEFAULT_PREFETCH_PAGE_LIMIT
}

fn default_render_workers() -> usize {
    DEFAULT_WORKERS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            watermark_label: default_watermark_label(),
            preview_scale: default_preview_scale(),
            final_scale: default_final_scale(),
            metadata_timeout_ms: default_metadata_timeout_ms(),
            preview_timeout_ms: default_preview_timeout_ms(),
            final_timeout_ms: default_final_timeout_ms(),
            upgrade_delay_ms: default_upgrade_delay_ms(),
            prefetch_delay_ms: default_prefetch_delay_ms(),
            notice_duration_ms: default_notice_duration_ms(),
            cache_capacity: default_cache_capacity(),
            prefetch_page_limit: default_prefetch_page_limit(),
            render_workers: default_render_workers(),
        }
    }
}

impl Settings {
    /// Runtime render configuration; nonsensical values fall back to defaults
    #[must_use]
    pub fn render_config(&self) -> RenderConfig {
        let scale = |value: f32, default: f32| {
            if value.is_finite() && value > 0.0 {
                value
            } else {
                default
            }
        };

        // Zero means unset for the sizes.
        let or_default = |value: usize, default: usize| if value == 0 { default } else { value };

        let (preview_ms, metadata_ms, final_ms) = if self.timeouts_are_ordered() {
            (
                self.preview_timeout_ms,
                self.metadata_timeout_ms,
                self.final_timeout_ms,
            )
        } else {
            warn!(
                "Timeouts must satisfy 0 < preview < metadata < final, got {}/{}/{} ms; using defaults",
                self.preview_timeout_ms, self.metadata_timeout_ms, self.final_timeout_ms
            );
            (
                default_preview_timeout_ms(),
                default_metadata_timeout_ms(),
                default_final_timeout_ms(),
            )
        };

        RenderConfig {
            preview_scale: scale(self.preview_scale, PREVIEW_SCALE),
            final_scale: scale(self.final_scale, FINAL_SCALE),
            metadata_timeout: Duration::from_millis(metadata_ms),
            preview_timeout: Duration::from_millis(preview_ms),
            final_timeout: Duration::from_millis(final_ms),
            upgrade_delay: Duration::from_millis(self.upgrade_delay_ms),
            prefetch_delay: Duration::from_millis(self.prefetch_delay_ms),
            notice_duration: Duration::from_millis(self.notice_duration_ms),
            cache_capacity: or_default(self.cache_capacity, DEFAULT_CACHE_SIZE).max(2),
            prefetch_page_limit: self.prefetch_page_limit,
            render_workers: or_default(self.render_workers, DEFAULT_WORKERS),
        }
    }

    fn timeouts_are_ordered(&self) -> bool {
        0 < self.preview_timeout_ms
            && self.preview_timeout_ms < self.metadata_timeout_ms
            && self.metadata_timeout_ms < self.final_timeout_ms
    }
}

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::default()));

fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load settings from the user config directory, writing defaults when absent
pub fn load_settings() {
    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return;
    };
    if path.exists() {
        load_settings_from_path(&path);
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        if let Ok(settings) = SETTINGS.read() {
            save_settings_to_file(&settings, &path);
        }
    }
}

/// Load settings from an explicit file, e.g. `--config`
pub fn load_settings_from_path(path: &Path) {
    match fs::read_to_string(path) {
        Ok(content) => match parse_settings(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                    save_settings_to_file(&settings, path);
                }

                if let Ok(mut global) = SETTINGS.write() {
                    *global = settings;
                }
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
        }
    }
}

pub fn parse_settings(content: &str) -> Result<Settings, serde_yaml::Error> {
    serde_yaml::from_str::<Settings>(content)
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    // Keys added since the file was written already took their serde
    // defaults; only the version needs bumping.
    settings.version = CURRENT_VERSION;
}

fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    let content = generate_settings_yaml(settings);

    match fs::write(path, content) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();

    content.push_str(HEADER_TEMPLATE);
    content.push_str(&format!("version: {}\n", settings.version));
    content.push_str(&format!(
        "watermark_label: \"{}\"\n",
        settings.watermark_label.replace('"', "\\\"")
    ));
    content.push('\n');

    content.push_str("# Render scale per tier, as a multiple of the page's point size\n");
    content.push_str(&format!("preview_scale: {}\n", settings.preview_scale));
    content.push_str(&format!("final_scale: {}\n", settings.final_scale));
    content.push('\n');

    content.push_str("# Time budgets in milliseconds\n");
    content.push_str(&format!(
        "metadata_timeout_ms: {}\n",
        settings.metadata_timeout_ms
    ));
    content.push_str(&format!(
        "preview_timeout_ms: {}\n",
        settings.preview_timeout_ms
    ));
    content.push_str(&format!("final_timeout_ms: {}\n", settings.final_timeout_ms));
    content.push_str(&format!("upgrade_delay_ms: {}\n", settings.upgrade_delay_ms));
    content.push_str(&format!(
        "prefetch_delay_ms: {}\n",
        settings.prefetch_delay_ms
    ));
    content.push_str(&format!(
        "notice_duration_ms: {}\n",
        settings.notice_duration_ms
    ));
    content.push('\n');

    content.push_str(&format!("cache_capacity: {}\n", settings.cache_capacity));
    content.push_str(&format!(
        "prefetch_page_limit: {}\n",
        settings.prefetch_page_limit
    ));
    content.push_str(&format!("render_workers: {}\n", settings.render_workers));

    content
}

const HEADER_TEMPLATE: &str = r#"# ============================================================================
# pagevault settings
# ============================================================================
# Missing keys fall back to their defaults. Keep the preview timeout below
# the metadata timeout and the metadata timeout below the final timeout.

"#;

// Public API for accessing/modifying settings

#[must_use]
pub fn current() -> Settings {
    SETTINGS.read().map(|s| s.clone()).unwrap_or_default()
}

#[must_use]
pub fn render_config() -> RenderConfig {
    current().render_config()
}

#[must_use]
pub fn get_watermark_label() -> String {
    SETTINGS
        .read()
        .map(|s| s.watermark_label.clone())
        .unwrap_or_else(|_| default_watermark_label())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_match_render_defaults() {
        assert_eq!(Settings::default().render_config(), RenderConfig::default());
    }

    #[test]
    fn generated_yaml_round_trips() {
        let mut settings = Settings::default();
        settings.watermark_label = "Acme \"Confidential\"".to_string();
        settings.final_timeout_ms = 9_000;

        let yaml = generate_settings_yaml(&settings);
        assert!(yaml.starts_with("# ===="));
        assert_eq!(parse_settings(&yaml).unwrap(), settings);
    }

    #[test]
    fn missing_keys_take_defaults() {
        let settings = parse_settings("version: 2\nrender_workers: 4\n").unwrap();
        assert_eq!(settings.render_workers, 4);
        assert_eq!(settings.watermark_label, "4Csecure");
        assert_eq!(settings.final_timeout_ms, 12_000);
    }

    #[test]
    fn invalid_values_are_sanitised() {
        let settings = Settings {
            preview_scale: -1.0,
            final_scale: f32::NAN,
            cache_capacity: 0,
            render_workers: 0,
            ..Settings::default()
        };
        let config = settings.render_config();
        assert_eq!(config.preview_scale, PREVIEW_SCALE);
        assert_eq!(config.final_scale, FINAL_SCALE);
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_SIZE);
        assert_eq!(config.render_workers, DEFAULT_WORKERS);

        let tiny = Settings {
            cache_capacity: 1,
            render_workers: 3,
            ..Settings::default()
        };
        assert_eq!(tiny.render_config().cache_capacity, 2);
        assert_eq!(tiny.render_config().render_workers, 3);
    }

    #[test]
    fn timeouts_out_of_order_fall_back_to_defaults() {
        let defaults = RenderConfig::default();
        for (preview, metadata, final_ms) in [
            (0, 10_000, 12_000),
            (6_000, 5_000, 12_000),
            (1_000, 20_000, 15_000),
            (5_000, 5_000, 12_000),
        ] {
            let config = Settings {
                preview_timeout_ms: preview,
                metadata_timeout_ms: metadata,
                final_timeout_ms: final_ms,
                ..Settings::default()
            }
            .render_config();
            assert_eq!(config.preview_timeout, defaults.preview_timeout);
            assert_eq!(config.metadata_timeout, defaults.metadata_timeout);
            assert_eq!(config.final_timeout, defaults.final_timeout);
        }

        let config = Settings {
            preview_timeout_ms: 1_000,
            metadata_timeout_ms: 2_000,
            final_timeout_ms: 3_000,
            ..Settings::default()
        }
        .render_config();
        assert_eq!(config.preview_timeout, Duration::from_millis(1_000));
        assert_eq!(config.metadata_timeout, Duration::from_millis(2_000));
        assert_eq!(config.final_timeout, Duration::from_millis(3_000));
    }

    #[test]
    fn migration_bumps_the_version_and_keeps_values() {
        let mut settings = parse_settings("version: 1\nrender_workers: 3\n").unwrap();
        migrate_settings(&mut settings);
        assert_eq!(settings.version, CURRENT_VERSION);
        assert_eq!(settings.render_workers, 3);
        assert_eq!(settings.cache_capacity, DEFAULT_CACHE_SIZE);
    }

    #[test]
    #[serial]
    fn loading_a_file_updates_the_global_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "version: 1\nwatermark_label: \"Acme\"\nrender_workers: 0\n").unwrap();

        load_settings_from_path(&path);
        assert_eq!(get_watermark_label(), "Acme");
        assert_eq!(render_config().render_workers, DEFAULT_WORKERS);

        // The migrated file is written back at the current version.
        let rewritten = parse_settings(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rewritten.version, CURRENT_VERSION);

        if let Ok(mut global) = SETTINGS.write() {
            *global = Settings::default();
        }
    }

    #[test]
    #[serial]
    fn unparsable_file_keeps_previous_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "render_workers: [not a number\n").unwrap();

        load_settings_from_path(&path);
        assert_eq!(current(), Settings::default());
    }
}
