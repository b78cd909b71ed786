use std::path::PathBuf;

/// Locales the pipeline ships model variants for.
pub const SUPPORTED_LOCALES: &[&str] = &["en-US", "fr-FR"];

pub const DEFAULT_LOCALE: &str = "en-US";
pub const DEFAULT_PORT: u16 = 2010;
pub const DEFAULT_MODEL_PATH: &str = "models/aria-model.json";
pub const DEFAULT_PUBLIC_DIR: &str = "public";

/// Operating mode. `dev` enables permissive cross-origin socket access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    Dev,
    Production,
}

impl RunMode {
    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Production => "production",
        }
    }
}

/// Recoverable configuration problems, surfaced as warnings at startup.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigWarning {
    #[error("unsupported locale {requested:?}, falling back to {fallback:?} (supported: {supported})")]
    UnsupportedLocale {
        requested: String,
        fallback: String,
        supported: String,
    },
    #[error("invalid port {value:?}, using {fallback}")]
    InvalidPort { value: String, fallback: u16 },
}

/// Environment-style process configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub mode: RunMode,
    pub host: String,
    pub port: u16,
    pub locale: String,
    pub model_path: PathBuf,
    pub public_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: RunMode::Production,
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            locale: DEFAULT_LOCALE.into(),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            public_dir: PathBuf::from(DEFAULT_PUBLIC_DIR),
        }
    }
}

impl Config {
    /// Read configuration from `ARIA_*` environment variables.
    pub fn from_env() -> (Self, Vec<ConfigWarning>) {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup (test seam).
    pub fn from_lookup<F>(get: F) -> (Self, Vec<ConfigWarning>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        let mode = match get("ARIA_MODE").as_deref() {
            Some("dev") => RunMode::Dev,
            _ => RunMode::Production,
        };

        let host = get("ARIA_HOST").unwrap_or_else(|| "0.0.0.0".into());

        let port = match get("ARIA_PORT") {
            None => DEFAULT_PORT,
            Some(raw) => match raw.parse() {
                Ok(port) => port,
                Err(_) => {
                    warnings.push(ConfigWarning::InvalidPort {
                        value: raw,
                        fallback: DEFAULT_PORT,
                    });
                    DEFAULT_PORT
                }
            },
        };

        let locale = match get("ARIA_LOCALE") {
            None => DEFAULT_LOCALE.into(),
            Some(requested) if SUPPORTED_LOCALES.contains(&requested.as_str()) => requested,
            Some(requested) => {
                warnings.push(ConfigWarning::UnsupportedLocale {
                    requested,
                    fallback: DEFAULT_LOCALE.into(),
                    supported: SUPPORTED_LOCALES.join(", "),
                });
                DEFAULT_LOCALE.into()
            }
        };

        let model_path = get("ARIA_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH));

        let public_dir = get("ARIA_PUBLIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PUBLIC_DIR));

        (
            Self {
                mode,
                host,
                port,
                locale,
                model_path,
                public_dir,
            },
            warnings,
        )
    }
}
