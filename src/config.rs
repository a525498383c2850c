//! Service configuration
//!
//! Everything is read from environment variables once at startup. Missing
//! variables take their defaults; values that are present but unparseable
//! fail startup with [`Error::Config`].

use crate::engine::LaunchConfig;
use crate::pool::PoolConfig;
use crate::{DimensionLimits, Error, RenderDefaults, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub render: RenderSettings,
    pub engine: EngineSettings,
    pub storage: StorageSettings,
}

impl ServiceConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let render_defaults = RenderSettings::default();
        let render = RenderSettings {
            default_width: parse_or(&lookup, "RENDER_DEFAULT_WIDTH", render_defaults.default_width)?,
            default_height: parse_or(&lookup, "RENDER_DEFAULT_HEIGHT", render_defaults.default_height)?,
            default_scale: parse_or(&lookup, "RENDER_DEFAULT_SCALE", render_defaults.default_scale)?,
            max_width: parse_or(&lookup, "RENDER_MAX_WIDTH", render_defaults.max_width)?,
            max_height: parse_or(&lookup, "RENDER_MAX_HEIGHT", render_defaults.max_height)?,
            timeout: millis_or(&lookup, "RENDER_TIMEOUT_MS", render_defaults.timeout)?,
            settle_delay: millis_or(&lookup, "RENDER_SETTLE_MS", render_defaults.settle_delay)?,
        };

        let engine_defaults = EngineSettings::default();
        let engine = EngineSettings {
            executable: non_empty(&lookup, "CHROME_PATH").map(PathBuf::from),
            pool_size: parse_or(&lookup, "ENGINE_POOL_SIZE", engine_defaults.pool_size)?,
            max_concurrent_contexts: parse_opt(&lookup, "ENGINE_MAX_CONTEXTS")?,
            launch_timeout: millis_or(&lookup, "ENGINE_LAUNCH_TIMEOUT_MS", engine_defaults.launch_timeout)?,
            idle_timeout: engine_defaults.idle_timeout,
            warmup: parse_or(&lookup, "ENGINE_WARMUP", engine_defaults.warmup)?,
        };

        let storage = StorageSettings {
            bucket: non_empty(&lookup, "AWS_S3_BUCKET").unwrap_or_default(),
            region: non_empty(&lookup, "AWS_REGION").unwrap_or_else(|| StorageSettings::default().region),
            endpoint: non_empty(&lookup, "AWS_ENDPOINT_URL"),
            public_url_template: non_empty(&lookup, "AWS_PUBLIC_URL_TEMPLATE"),
            access_key_id: non_empty(&lookup, "AWS_ACCESS_KEY_ID"),
            secret_access_key: non_empty(&lookup, "AWS_SECRET_ACCESS_KEY"),
        };

        let config = Self { render, engine, storage };
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would only fail later.
    pub fn validate(&self) -> Result<()> {
        if self.render.max_width == 0 || self.render.max_height == 0 {
            return Err(Error::Config("RENDER_MAX_WIDTH and RENDER_MAX_HEIGHT must be at least 1".into()));
        }
        if self.render.timeout.is_zero() {
            return Err(Error::Config("RENDER_TIMEOUT_MS must be greater than 0".into()));
        }
        if self.engine.pool_size == 0 {
            return Err(Error::Config("ENGINE_POOL_SIZE must be at least 1".into()));
        }
        if self.engine.max_concurrent_contexts == Some(0) {
            return Err(Error::Config("ENGINE_MAX_CONTEXTS must be at least 1".into()));
        }
        if let Some(endpoint) = &self.storage.endpoint {
            url::Url::parse(endpoint)
                .map_err(|e| Error::Config(format!("AWS_ENDPOINT_URL {:?} is not a valid URL: {}", endpoint, e)))?;
        }
        Ok(())
    }
}

/// Request defaults, limits, and timing
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub default_width: i64,
    pub default_height: i64,
    pub default_scale: f64,
    pub max_width: u32,
    pub max_height: u32,
    /// Deadline for everything engine-facing in one capture
    pub timeout: Duration,
    /// Pause between quiescence and snapshot
    pub settle_delay: Duration,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            default_width: 1024,
            default_height: 768,
            default_scale: 1.0,
            max_width: 4096,
            max_height: 4096,
            timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(100),
        }
    }
}

impl RenderSettings {
    pub fn defaults(&self) -> RenderDefaults {
        RenderDefaults {
            width: self.default_width,
            height: self.default_height,
            scale: self.default_scale,
        }
    }

    pub fn limits(&self) -> DimensionLimits {
        DimensionLimits {
            max_width: self.max_width,
            max_height: self.max_height,
            ..DimensionLimits::default()
        }
    }
}

/// Browser pool settings
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub executable: Option<PathBuf>,
    pub pool_size: usize,
    pub max_concurrent_contexts: Option<usize>,
    pub launch_timeout: Duration,
    pub idle_timeout: Duration,
    /// Launch every engine at startup instead of on first request
    pub warmup: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let launch = LaunchConfig::default();
        Self {
            executable: None,
            pool_size: 1,
            max_concurrent_contexts: None,
            launch_timeout: launch.launch_timeout,
            idle_timeout: launch.idle_timeout,
            warmup: false,
        }
    }
}

impl EngineSettings {
    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            executable: self.executable.clone(),
            launch_timeout: self.launch_timeout,
            idle_timeout: self.idle_timeout,
            ..LaunchConfig::default()
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            launch: self.launch_config(),
            size: self.pool_size,
            max_concurrent_contexts: self.max_concurrent_contexts,
        }
    }
}

/// Object storage settings
#[derive(Clone, PartialEq)]
pub struct StorageSettings {
    /// Empty means storage is not configured
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack)
    pub endpoint: Option<String>,
    /// Public URL with `{bucket}`, `{region}` and `{key}` placeholders
    pub public_url_template: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
            public_url_template: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl StorageSettings {
    pub fn is_configured(&self) -> bool {
        !self.bucket.trim().is_empty()
    }
}

// Keeps credentials out of logs.
impl fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageSettings")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("public_url_template", &self.public_url_template)
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| "<redacted>"))
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_opt<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match non_empty(lookup, key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(None),
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    Ok(parse_opt(lookup, key)?.unwrap_or(default))
}

fn millis_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt::<F, u64>(lookup, key)?
        .map(Duration::from_millis)
        .unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServiceConfig> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServiceConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.render, RenderSettings::default());
        assert_eq!(config.engine, EngineSettings::default());
        assert_eq!(config.storage, StorageSettings::default());
        assert!(!config.storage.is_configured());
        assert_eq!(config.render.defaults(), RenderDefaults::default());
    }

    #[test]
    fn variables_override_defaults() {
        let config = load(&[
            ("RENDER_MAX_WIDTH", "2000"),
            ("RENDER_TIMEOUT_MS", "1500"),
            ("RENDER_SETTLE_MS", "0"),
            ("ENGINE_POOL_SIZE", "3"),
            ("ENGINE_MAX_CONTEXTS", "8"),
            ("ENGINE_WARMUP", "true"),
            ("CHROME_PATH", "/usr/bin/chromium"),
            ("AWS_S3_BUCKET", "renders"),
            ("AWS_REGION", "eu-west-1"),
            ("AWS_ENDPOINT_URL", "http://localhost:9000"),
        ])
        .unwrap();

        assert_eq!(config.render.limits().max_width, 2000);
        assert_eq!(config.render.timeout, Duration::from_millis(1500));
        assert!(config.render.settle_delay.is_zero());

        let pool = config.engine.pool_config();
        assert_eq!(pool.size, 3);
        assert_eq!(pool.max_concurrent_contexts, Some(8));
        assert_eq!(pool.launch.executable, Some(PathBuf::from("/usr/bin/chromium")));
        assert!(config.engine.warmup);

        assert!(config.storage.is_configured());
        assert_eq!(config.storage.region, "eu-west-1");
        assert_eq!(config.storage.endpoint.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn bad_values_fail_startup() {
        assert!(matches!(load(&[("RENDER_MAX_WIDTH", "wide")]), Err(Error::Config(_))));
        assert!(matches!(load(&[("ENGINE_POOL_SIZE", "0")]), Err(Error::Config(_))));
        assert!(matches!(load(&[("AWS_ENDPOINT_URL", "not a url")]), Err(Error::Config(_))));
    }

    #[test]
    fn credentials_are_redacted() {
        let settings = StorageSettings {
            secret_access_key: Some("hunter2".into()),
            ..Default::default()
        };
        assert!(!format!("{:?}", settings).contains("hunter2"));
    }
}
