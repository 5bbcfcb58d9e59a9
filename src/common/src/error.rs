use thiserror::Error;

/// Fatal configuration problems. Nothing here is retried; a malformed
/// template or missing bucket aborts the invocation immediately.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no asset_bucket configured (config file or SSM_ACQUIRE_ASSET_BUCKET)")]
    MissingAssetBucket,

    #[error("config file {0} could not be read: {1}")]
    Unreadable(String, String),

    #[error("config file {0} is malformed: {1}")]
    Malformed(String, String),
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("command plan for {0} is malformed: {1}")]
    Malformed(&'static str, String),

    #[error("command plan for {0} has no entry for distro {1}")]
    UnknownDistro(&'static str, &'static str),
}
