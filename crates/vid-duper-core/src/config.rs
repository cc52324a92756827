use crate::cluster::CandidateStrategy;
use crate::error::Error;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::Path;
use std::thread;
use std::time::Duration;

pub const DEFAULT_THRESHOLD: f64 = 0.8;
pub const DEFAULT_SAMPLE_COUNT: usize = 10;
pub const DEFAULT_CACHE_PATH: &str = "vid_duper_cache.db";

pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "avi", "mkv", "mov", "wmv", "flv", "webm", "3gp",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub root_paths: Vec<String>,
    pub ignore_patterns: Vec<String>,
    /// Similarity cutoff in [0, 1]; higher is stricter.
    pub threshold: f64,
    /// Worker pool size for the hashing phase.
    pub thread_count: usize,
    /// Frames sampled per video.
    pub sample_count: usize,
    pub cache_enabled: bool,
    pub cache_path: String,
    /// Extension allow-list, compared case-insensitively without the dot.
    pub extensions: Vec<String>,
    pub decode_timeout_secs: Option<u64>,
    /// When set, only compare videos whose first-frame hash shares this many
    /// leading bits. Faster, but links across buckets are missed.
    pub bucket_prefix_bits: Option<u32>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            root_paths: Vec::new(),
            ignore_patterns: Vec::new(),
            threshold: DEFAULT_THRESHOLD,
            thread_count: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            sample_count: DEFAULT_SAMPLE_COUNT,
            cache_enabled: true,
            cache_path: DEFAULT_CACHE_PATH.to_string(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            decode_timeout_secs: None,
            bucket_prefix_bits: None,
        }
    }
}

impl AppConfig {
    /// Reject out-of-range values before a scan starts.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(Error::InvalidConfiguration(format!(
                "threshold must be within [0.0, 1.0], got {}",
                self.threshold
            )));
        }
        if self.thread_count == 0 {
            return Err(Error::InvalidConfiguration(
                "thread_count must be a positive integer".to_string(),
            ));
        }
        if self.sample_count == 0 {
            return Err(Error::InvalidConfiguration(
                "sample_count must be a positive integer".to_string(),
            ));
        }
        if let Some(bits) = self.bucket_prefix_bits {
            if bits == 0 || bits > 64 {
                return Err(Error::InvalidConfiguration(format!(
                    "bucket_prefix_bits must be within 1..=64, got {}",
                    bits
                )));
            }
        }
        if self.decode_timeout_secs == Some(0) {
            return Err(Error::InvalidConfiguration(
                "decode_timeout_secs must be positive when set".to_string(),
            ));
        }
        if self.cache_enabled && self.cache_path.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "cache_path must not be empty when the cache is enabled".to_string(),
            ));
        }
        Ok(())
    }

    pub fn candidate_strategy(&self) -> CandidateStrategy {
        match self.bucket_prefix_bits {
            Some(bits) => CandidateStrategy::FirstFramePrefix { bits },
            None => CandidateStrategy::Exhaustive,
        }
    }

    pub fn decode_timeout(&self) -> Option<Duration> {
        self.decode_timeout_secs.map(Duration::from_secs)
    }
}

/// Load `Config.*` from the working directory (optional), overlaid by
/// `VID_DUPER_*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("VID_DUPER")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("root_paths")
                .with_list_parse_key("ignore_patterns")
                .with_list_parse_key("extensions"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        let mut should_add = true;

        // A new dir may swallow several earlier, narrower roots.
        result.retain(|res_dir| !Path::new(res_dir).starts_with(dir_path) || res_dir == &dir);

        for res_dir in &result {
            if dir_path.starts_with(Path::new(res_dir)) {
                should_add = false;
                break;
            }
        }

        if should_add {
            result.push(dir);
        }
    }

    result
}
