//! Process-wide configuration resolution.
//!
//! Precedence, highest first: explicit builder overrides, environment
//! variables, built-in defaults — the same layering `R2eConfig::load` uses
//! in `r2e-core/src/config/mod.rs`, collapsed here to env-only since
//! `Root` has no YAML file format of its own (config *file* loading is a
//! separate concern, delegated to the `config` `PathRegistry`).

use kern_cache::Microcache;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct RootConfigOverrides {
    pub root: Option<PathBuf>,
    pub debug: Option<bool>,
    pub config_root: Option<PathBuf>,
    pub doc_root: Option<PathBuf>,
    pub base_url: Option<String>,
    pub cdn_url: Option<String>,
    pub locale: Option<String>,
    pub timezone: Option<String>,
    pub lang: Option<String>,
    pub salt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RootConfig {
    pub root: PathBuf,
    pub debug: bool,
    pub config_root: PathBuf,
    pub doc_root: Option<PathBuf>,
    pub base_url: Option<String>,
    pub cdn_url: Option<String>,
    pub locale: String,
    pub timezone: String,
    pub lang: String,
    /// `None` until resolved — `SALT` may not be set, in which case the
    /// caller finalizes it via [`RootConfig::finalize_salt`] once the
    /// microcache backend exists.
    pub salt: Option<String>,
    pub apcu_rows: Option<usize>,
    pub apcu_value_size: Option<usize>,
    pub apcu_sqlite_path: Option<PathBuf>,
}

const SALT_CACHE_KEY: &str = "kern_core:machine_salt";
const SALT_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 365);

impl RootConfig {
    /// Resolve from environment variables, layering `overrides` on top.
    pub fn resolve(overrides: RootConfigOverrides) -> Self {
        let root = overrides
            .root
            .or_else(|| std::env::var("ROOT").ok().map(PathBuf::from))
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

        let debug = overrides
            .debug
            .unwrap_or_else(|| std::env::var("DEBUG").map(|v| !v.is_empty()).unwrap_or(false));

        let config_root = overrides
            .config_root
            .or_else(|| std::env::var("CONFIG_ROOT").ok().map(PathBuf::from))
            .unwrap_or_else(|| root.join("_config"));

        let doc_root = overrides
            .doc_root
            .or_else(|| std::env::var("DOC_ROOT").ok().map(PathBuf::from));

        let base_url =
            overrides.base_url.or_else(|| std::env::var("BASE_URL").ok());

        let cdn_url = overrides
            .cdn_url
            .or_else(|| std::env::var("CDN_URL").ok())
            .or_else(|| base_url.clone());

        let locale = overrides
            .locale
            .or_else(|| std::env::var("LOCALE").ok())
            .unwrap_or_else(|| "en".to_string());

        let timezone = overrides
            .timezone
            .or_else(|| std::env::var("TIMEZONE").ok())
            .unwrap_or_else(|| "UTC".to_string());

        let lang = overrides
            .lang
            .or_else(|| std::env::var("LANG").ok())
            .unwrap_or_else(|| locale.clone());

        let salt = overrides.salt.or_else(|| std::env::var("SALT").ok());

        let apcu_rows = std::env::var("APCU_ROWS").ok().and_then(|v| v.parse().ok());
        let apcu_value_size = std::env::var("APCU_VALUE_SIZE").ok().and_then(|v| v.parse().ok());
        let apcu_sqlite_path = std::env::var("APCU_SQLITE_PATH").ok().map(PathBuf::from);

        Self {
            root,
            debug,
            config_root,
            doc_root,
            base_url,
            cdn_url,
            locale,
            timezone,
            lang,
            salt,
            apcu_rows,
            apcu_value_size,
            apcu_sqlite_path,
        }
    }

    /// If `SALT` wasn't set by the environment or a builder override,
    /// derive a per-installation value from the local hostname plus a
    /// random component generated once and cached for as long as the
    /// microcache backend retains it.
    pub async fn finalize_salt(&mut self, cache: &Microcache) {
        if self.salt.is_some() {
            return;
        }
        let hostname = hostname_fingerprint();
        let random_component: String = cache
            .entry(
                SALT_CACHE_KEY,
                || async move { format!("{:032x}", rand::random::<u128>()) },
                Some(SALT_TTL),
            )
            .await
            .unwrap_or_else(|_| format!("{:032x}", rand::random::<u128>()));
        self.salt = Some(format!("{hostname}:{random_component}"));
    }
}

fn hostname_fingerprint() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string())
}
