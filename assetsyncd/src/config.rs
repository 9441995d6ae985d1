use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::sync::model::DEFAULT_LICENSE_TYPE;
use crate::sync::resolver::RecoveryFolderPolicy;
use crate::sync::transfer::DEFAULT_UPLOAD_CONCURRENCY;

const DEFAULT_MAX_RETRIES: u64 = 3;
const DEFAULT_RETRY_BASE_MS: u64 = 1000;
const CACHE_DIR_NAME: &str = "assetsync";
const CACHE_FILE_NAME: &str = "cache.db";

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Authoritative project store. `None` runs against the local cache only.
    pub remote_url: Option<String>,
    pub api_key: String,
    pub blob_url: Option<String>,
    pub cache_db: PathBuf,
    pub max_retries: u32,
    pub retry_base: Duration,
    pub recovery_policy: RecoveryFolderPolicy,
    pub license_type: String,
    pub upload_concurrency: usize,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = dirs::home_dir();
        let cache_db = match non_empty(&lookup, "ASSETSYNC_CACHE_DB") {
            Some(value) => expand_with_home(&value, home.as_deref()),
            None => default_cache_db(),
        };
        let recovery_policy = match non_empty(&lookup, "ASSETSYNC_RECOVERY_POLICY") {
            Some(value) => value
                .parse::<RecoveryFolderPolicy>()
                .map_err(anyhow::Error::msg)
                .context("invalid ASSETSYNC_RECOVERY_POLICY")?,
            None => RecoveryFolderPolicy::default(),
        };
        let max_retries = read_u64(&lookup, "ASSETSYNC_MAX_RETRIES", DEFAULT_MAX_RETRIES);
        let retry_base =
            Duration::from_millis(read_u64(&lookup, "ASSETSYNC_RETRY_BASE_MS", DEFAULT_RETRY_BASE_MS));
        let upload_concurrency = read_u64(
            &lookup,
            "ASSETSYNC_UPLOAD_CONCURRENCY",
            DEFAULT_UPLOAD_CONCURRENCY as u64,
        );

        Ok(Self {
            remote_url: non_empty(&lookup, "ASSETSYNC_REMOTE_URL"),
            api_key: lookup("ASSETSYNC_API_KEY").unwrap_or_default(),
            blob_url: non_empty(&lookup, "ASSETSYNC_BLOB_URL"),
            cache_db,
            max_retries: u32::try_from(max_retries).unwrap_or(u32::MAX),
            retry_base,
            recovery_policy,
            license_type: non_empty(&lookup, "ASSETSYNC_LICENSE")
                .unwrap_or_else(|| DEFAULT_LICENSE_TYPE.to_string()),
            upload_concurrency: usize::try_from(upload_concurrency)
                .unwrap_or(DEFAULT_UPLOAD_CONCURRENCY),
        })
    }
}

fn non_empty<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn expand_with_home(value: &str, home: Option<&Path>) -> PathBuf {
    match (value, home) {
        ("~", Some(home)) => home.to_path_buf(),
        (value, Some(home)) if value.starts_with("~/") => home.join(&value[2..]),
        (value, _) => PathBuf::from(value),
    }
}

fn default_cache_db() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(CACHE_DIR_NAME)
        .join(CACHE_FILE_NAME)
}
