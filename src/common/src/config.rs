use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_CONFIG_FILE_LOCATION_FROM_HOME: &str = ".config/ssm-acquire/config.toml";
const DEFAULT_YARA_RULE_DIR_FROM_HOME: &str = ".yarafiles";
const DEFAULT_WORK_ROOT: &str = "/tmp";
const DEFAULT_SESSION_DURATION_SECS: i32 = 3600;
const DEFAULT_CONTAINER_WAIT_SECS: u64 = 600;
const DEFAULT_ANALYSIS_IMAGE: &str = "threatresponse/rekall:latest";

/// Plugins run against every capture unless overridden in the config file.
const DEFAULT_PLUGINS: [&str; 5] = ["psaux", "pstree", "netstat", "ifconfig", "pidhashtable"];

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ConfigFile {
    pub asset_bucket: Option<String>,
    pub yara_rule_dir: Option<String>,
    pub ssm_acquire_role_arn: Option<String>,
    pub mfa_serial_number: Option<String>,
    pub assume_role_session_duration: Option<i32>,
    pub work_root: Option<String>,
    pub analysis_image: Option<String>,
    pub analysis_plugins: Option<Vec<String>>,
    pub container_wait_secs: Option<u64>,
}

/// Resolved, read-only process configuration. Built once at startup and
/// passed by reference into every component constructor.
#[derive(Clone, Debug)]
pub struct Config {
    pub asset_bucket: String,
    pub yara_rule_dir: PathBuf,
    pub role_arn: Option<String>,
    pub mfa_serial_number: Option<String>,
    pub session_duration_secs: i32,
    pub work_root: PathBuf,
    pub analysis_image: String,
    pub analysis_plugins: Vec<String>,
    pub container_wait_secs: u64,
}

pub struct ConfigManager;

impl ConfigManager {
    fn get_config_path() -> Option<PathBuf> {
        match homedir::get_my_home() {
            Ok(Some(path)) => Some(path.join(DEFAULT_CONFIG_FILE_LOCATION_FROM_HOME)),
            _ => None,
        }
    }

    fn default_yara_rule_dir() -> PathBuf {
        match homedir::get_my_home() {
            Ok(Some(path)) => path.join(DEFAULT_YARA_RULE_DIR_FROM_HOME),
            _ => PathBuf::from(DEFAULT_YARA_RULE_DIR_FROM_HOME),
        }
    }

    pub fn load_config() -> Result<Config, ConfigError> {
        let file = match Self::get_config_path() {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(&path).map_err(|e| {
                    ConfigError::Unreadable(path.display().to_string(), e.to_string())
                })?;
                toml::from_str(&contents)
                    .map_err(|e| ConfigError::Malformed(path.display().to_string(), e.to_string()))?
            }
            _ => ConfigFile::default(),
        };
        Self::resolve(file)
    }

    /// Environment variables win over the config file so one-off runs can be
    /// pointed at a different bucket without editing it.
    fn resolve(file: ConfigFile) -> Result<Config, ConfigError> {
        let asset_bucket = env::var("SSM_ACQUIRE_ASSET_BUCKET")
            .ok()
            .or(file.asset_bucket)
            .ok_or(ConfigError::MissingAssetBucket)?;

        let yara_rule_dir = env::var("SSM_ACQUIRE_YARA_RULE_DIR")
            .ok()
            .or(file.yara_rule_dir)
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_yara_rule_dir);

        let role_arn = env::var("SSM_ACQUIRE_ROLE_ARN")
            .ok()
            .or(file.ssm_acquire_role_arn)
            .filter(|arn| arn != "None" && !arn.is_empty());

        let mfa_serial_number = env::var("SSM_ACQUIRE_MFA_SERIAL_NUMBER")
            .ok()
            .or(file.mfa_serial_number)
            .filter(|serial| serial != "None" && !serial.is_empty());

        Ok(Config {
            asset_bucket,
            yara_rule_dir,
            role_arn,
            mfa_serial_number,
            session_duration_secs: file
                .assume_role_session_duration
                .unwrap_or(DEFAULT_SESSION_DURATION_SECS),
            work_root: file
                .work_root
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_ROOT)),
            analysis_image: file
                .analysis_image
                .unwrap_or_else(|| DEFAULT_ANALYSIS_IMAGE.to_string()),
            analysis_plugins: file
                .analysis_plugins
                .unwrap_or_else(|| DEFAULT_PLUGINS.iter().map(|s| s.to_string()).collect()),
            container_wait_secs: file.container_wait_secs.unwrap_or(DEFAULT_CONTAINER_WAIT_SECS),
        })
    }
}
