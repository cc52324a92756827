pub mod cache;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod error;
pub mod handle;
pub mod hasher;
pub mod model;
pub mod progress;
pub mod sampler;
pub mod scanner;

pub use cache::{CacheStats, CacheStore};
pub use cluster::{
    cluster, similarity, CandidateStrategy, DuplicateGroup, GroupMember, LinkedPair,
    QualityDifference,
};
pub use config::AppConfig;
pub use engine::{ScanEngine, ScanReport, ScanTimings, SkippedFile};
pub use error::{DecodeError, Error};
pub use handle::{cancel, get_result, poll_progress, start_scan, ScanHandle};
pub use hasher::HashComputer;
pub use model::{FileRecord, Fingerprint, Signature, VideoKind, VideoMeta};
pub use progress::{ProgressReporter, ScanPhase, ScanProgress, SilentReporter};
pub use sampler::{Deadline, FfmpegSampler, FrameSampler, SampledFrame, SampledVideo};
