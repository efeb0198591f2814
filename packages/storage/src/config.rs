//! Where queue documents live.

use std::path::PathBuf;

use crate::StoreError;

/// Backend family, reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    S3,
    Filesystem,
    Memory,
}

impl StoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreKind::S3 => "s3",
            StoreKind::Filesystem => "filesystem",
            StoreKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub virtual_hosted_style: bool,
}

#[derive(Debug, Clone)]
pub enum StoreBackend {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Key prefix placed in front of every queue document.
    pub prefix: Option<String>,
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            prefix: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StoreBackend::Filesystem { root: root.into() },
            prefix: None,
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: StoreBackend::S3(cfg),
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = non_empty(prefix.into());
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `JOBQUEUE_STORE` picks the backend: `s3`, `filesystem` (default) or `memory`
    /// - `JOBQUEUE_STORE_ROOT` is the filesystem root (default `./data/queues`)
    /// - `JOBQUEUE_STORE_PREFIX` is an optional key prefix
    ///
    /// The S3 backend reads `S3_BUCKET` (required), `AWS_REGION`,
    /// `S3_ENDPOINT`, `S3_ALLOW_HTTP`, `S3_VIRTUAL_HOSTED_STYLE` and the usual
    /// `AWS_*` credentials.
    pub fn from_env() -> Result<Self, StoreError> {
        let config = match env("JOBQUEUE_STORE").as_deref() {
            Some("s3") => Self::s3(s3_from_env()?),
            Some("memory" | "mem") => Self::memory(),
            Some("filesystem" | "fs") | None => Self::filesystem(
                env("JOBQUEUE_STORE_ROOT").map_or_else(|| PathBuf::from("./data/queues"), PathBuf::from),
            ),
            Some(other) => {
                return Err(StoreError::InvalidConfig(format!(
                    "unsupported JOBQUEUE_STORE={other} (expected s3|filesystem|memory)"
                )));
            }
        };
        Ok(Self {
            prefix: env("JOBQUEUE_STORE_PREFIX"),
            ..config
        })
    }
}

/// Trimmed, non-empty value of `name`.
fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(non_empty)
}

pub(crate) fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn env_flag(name: &str) -> Result<Option<bool>, StoreError> {
    let Some(raw) = env(name) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(Some(true)),
        "0" | "false" | "no" | "n" => Ok(Some(false)),
        _ => Err(StoreError::InvalidConfig(format!(
            "invalid boolean for {name}={raw} (expected true/false)"
        ))),
    }
}

fn s3_from_env() -> Result<S3Config, StoreError> {
    let bucket = env("S3_BUCKET").ok_or_else(|| {
        StoreError::InvalidConfig("S3_BUCKET is required for the s3 backend".into())
    })?;
    let endpoint = env("S3_ENDPOINT");
    let allow_http = env_flag("S3_ALLOW_HTTP")?.unwrap_or_else(|| {
        endpoint
            .as_deref()
            .is_some_and(|e| e.to_ascii_lowercase().starts_with("http://"))
    });

    Ok(S3Config {
        bucket,
        region: env("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
        endpoint,
        allow_http,
        access_key_id: env("AWS_ACCESS_KEY_ID"),
        secret_access_key: env("AWS_SECRET_ACCESS_KEY"),
        session_token: env("AWS_SESSION_TOKEN"),
        virtual_hosted_style: env_flag("S3_VIRTUAL_HOSTED_STYLE")?.unwrap_or(false),
    })
}

pub(crate) fn build_s3(cfg: S3Config) -> Result<object_store::aws::AmazonS3, StoreError> {
    let mut builder = object_store::aws::AmazonS3Builder::new()
        .with_bucket_name(cfg.bucket)
        .with_region(cfg.region)
        .with_virtual_hosted_style_request(cfg.virtual_hosted_style)
        .with_allow_http(cfg.allow_http);

    if let Some(endpoint) = cfg.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if let Some(key) = cfg.access_key_id {
        builder = builder.with_access_key_id(key);
    }
    if let Some(secret) = cfg.secret_access_key {
        builder = builder.with_secret_access_key(secret);
    }
    if let Some(token) = cfg.session_token {
        builder = builder.with_token(token);
    }

    Ok(builder.build()?)
}
