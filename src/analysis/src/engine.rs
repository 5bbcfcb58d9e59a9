//! Containerized analysis fan-out. One job per configured plugin runs
//! against the downloaded capture, all launched before any is awaited; a
//! conditional signature scan follows. Every job is removed whatever its
//! outcome, and one job's failure never blocks the rest of the batch.

use std::path::PathBuf;
use std::time::Duration;

use futures_util::future::join_all;
use thiserror::Error;

use acquire_aws::s3::{ObjectStore, TransferError};
use acquire_common::config::Config;

use crate::runtime::{Bind, ContainerHandle, ContainerRuntime, JobError, JobSpec, RuntimeError};

const CONTAINER_FILES_DIR: &str = "/files";
const CONTAINER_RULES_DIR: &str = "/opt/yarascan";
const CAPTURE_FILE: &str = "capture.aff4";
const PROFILE_SUFFIX: &str = ".zip";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no analysis profile archive (*{PROFILE_SUFFIX}) found in {0}")]
    MissingProfile(String),

    #[error("profile conversion did not complete: {0}")]
    ProfileConversion(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

/// Recorded result of one analysis job. Failures and timeouts land here
/// instead of aborting sibling jobs.
#[derive(Debug)]
pub struct JobOutcome {
    pub plugin: String,
    pub wait: Result<i64, JobError>,
    pub logs: Option<String>,
}

impl JobOutcome {
    pub fn completed(&self) -> bool {
        matches!(self.wait, Ok(0))
    }
}

struct AnalysisJob {
    plugin: String,
    handle: Box<dyn ContainerHandle>,
}

pub struct AnalysisEngine<'a, R: ContainerRuntime, S: ObjectStore> {
    runtime: &'a R,
    store: &'a S,
    config: &'a Config,
    instance_id: &'a str,
}

impl<'a, R: ContainerRuntime, S: ObjectStore> AnalysisEngine<'a, R, S> {
    pub fn new(runtime: &'a R, store: &'a S, config: &'a Config, instance_id: &'a str) -> Self {
        Self {
            runtime,
            store,
            config,
            instance_id,
        }
    }

    fn working_area(&self) -> PathBuf {
        self.config.work_root.join(self.instance_id)
    }

    fn wait_bound(&self) -> Duration {
        Duration::from_secs(self.config.container_wait_secs)
    }

    fn output_file_name(&self, plugin: &str) -> String {
        format!("{plugin}-{}-output.json", self.instance_id)
    }

    /// Runs the full pipeline: profile conversion, plugin fan-out, result
    /// upload, then the conditional signature scan.
    pub async fn run(&self) -> Result<Vec<JobOutcome>, AnalysisError> {
        if let Err(e) = self.runtime.pull(&self.config.analysis_image).await {
            // A locally cached image is still usable.
            tracing::warn!(image = %self.config.analysis_image, error = %e, "image pull failed");
        }

        let profile_archive = self.find_profile_archive()?;
        let profile_json = profile_json_name(&profile_archive);
        self.convert_profile(&profile_archive, &profile_json).await?;

        let outcomes = self.run_plugins(&profile_json).await;
        self.upload_results().await;
        self.run_yara_scan(&profile_json).await?;

        tracing::info!(instance_id = self.instance_id, "analysis plugin run complete");
        Ok(outcomes)
    }

    /// The working area holds exactly one profile archive, produced by the
    /// build stage and fetched alongside the capture.
    fn find_profile_archive(&self) -> Result<String, AnalysisError> {
        let area = self.working_area();
        let mut entries: Vec<String> = std::fs::read_dir(&area)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(PROFILE_SUFFIX))
            .collect();
        entries.sort();
        entries
            .into_iter()
            .next()
            .ok_or_else(|| AnalysisError::MissingProfile(area.display().to_string()))
    }

    fn files_bind(&self) -> Bind {
        Bind {
            host: self.working_area(),
            container: CONTAINER_FILES_DIR.to_string(),
        }
    }

    /// Converts the zipped profile to the json form the plugin jobs consume.
    /// Awaited to completion before any plugin launches so none of them race
    /// the converted profile's creation.
    async fn convert_profile(
        &self,
        profile_archive: &str,
        profile_json: &str,
    ) -> Result<(), AnalysisError> {
        tracing::info!(profile_archive, "converting analysis profile archive to json");
        let spec = JobSpec {
            image: self.config.analysis_image.clone(),
            command: vec![
                "rekall".to_string(),
                "convert_profile".to_string(),
                format!("{CONTAINER_FILES_DIR}/{profile_archive}"),
                format!("{CONTAINER_FILES_DIR}/{profile_json}"),
            ],
            binds: vec![self.files_bind()],
        };

        let handle = self.runtime.run(spec).await?;
        let waited = handle.wait(self.wait_bound()).await;
        if let Err(e) = handle.remove().await {
            tracing::error!(error = %e, "failed to remove profile conversion container");
        }
        match waited {
            Ok(code) => {
                if code != 0 {
                    tracing::warn!(code, "profile conversion exited non-zero");
                }
                tracing::info!("profile converted from zip to json");
                Ok(())
            }
            Err(e) => Err(AnalysisError::ProfileConversion(e.to_string())),
        }
    }

    /// Fire all plugin jobs, then wait on all of them. A launch failure is
    /// recorded as that plugin's outcome; the rest still run.
    async fn run_plugins(&self, profile_json: &str) -> Vec<JobOutcome> {
        tracing::info!(
            plugins = ?self.config.analysis_plugins,
            "beginning analysis of the memory sample"
        );

        let mut jobs = Vec::new();
        let mut outcomes = Vec::new();
        for plugin in &self.config.analysis_plugins {
            tracing::info!(%plugin, "launching plugin against {CAPTURE_FILE}");
            let spec = JobSpec {
                image: self.config.analysis_image.clone(),
                command: self.plugin_command(plugin, profile_json),
                binds: vec![self.files_bind()],
            };
            match self.runtime.run(spec).await {
                Ok(handle) => jobs.push(AnalysisJob {
                    plugin: plugin.clone(),
                    handle,
                }),
                Err(e) => {
                    tracing::error!(%plugin, error = %e, "plugin job failed to launch");
                    outcomes.push(JobOutcome {
                        plugin: plugin.clone(),
                        wait: Err(JobError::Wait(format!("launch failed: {e}"))),
                        logs: None,
                    });
                }
            }
        }

        let bound = self.wait_bound();
        let waited = join_all(jobs.into_iter().map(|job| self.settle(job, bound))).await;
        outcomes.extend(waited);
        outcomes
    }

    /// Wait, capture logs, remove. Removal runs in every arm; skipping it on
    /// timeout would leak the container.
    async fn settle(&self, job: AnalysisJob, bound: Duration) -> JobOutcome {
        tracing::info!(plugin = %job.plugin, "waiting for analysis to complete");
        let wait = job.handle.wait(bound).await;
        match &wait {
            Ok(code) => tracing::info!(plugin = %job.plugin, code = *code, "analysis job finished"),
            Err(e) => tracing::error!(plugin = %job.plugin, error = %e, "analysis job failed"),
        }

        let logs = match job.handle.logs().await {
            Ok(logs) => Some(logs),
            Err(e) => {
                tracing::warn!(plugin = %job.plugin, error = %e, "could not fetch job logs");
                None
            }
        };

        if let Err(e) = job.handle.remove().await {
            tracing::error!(plugin = %job.plugin, error = %e, "failed to remove job container");
        }

        JobOutcome {
            plugin: job.plugin,
            wait,
            logs,
        }
    }

    fn plugin_command(&self, plugin: &str, profile_json: &str) -> Vec<String> {
        vec![
            "rekall".to_string(),
            "-f".to_string(),
            format!("{CONTAINER_FILES_DIR}/{CAPTURE_FILE}"),
            "--profile".to_string(),
            format!("{CONTAINER_FILES_DIR}/{profile_json}"),
            plugin.to_string(),
            "--format=json".to_string(),
            format!(
                "--output={CONTAINER_FILES_DIR}/{}",
                self.output_file_name(plugin)
            ),
        ]
    }

    /// Upload is attempted for every expected output, including those whose
    /// job failed or timed out; a missing file surfaces as a per-artifact
    /// error without aborting the batch.
    async fn upload_results(&self) {
        let area = self.working_area();
        for plugin in &self.config.analysis_plugins {
            let file_name = self.output_file_name(plugin);
            let src = area.join(&file_name);
            let key = format!("{}/{file_name}", self.instance_id);
            tracing::info!(%plugin, key = %key, "uploading plugin results");
            if let Err(e) = self.store.upload(&src, &key).await {
                tracing::error!(
                    instance_id = self.instance_id,
                    %plugin,
                    error = %e,
                    "result upload failed"
                );
            }
        }
    }

    /// One signature-scan job per rule file, mounting both the working area
    /// and the rule directory. Skipped with a notice when no rules exist.
    pub async fn run_yara_scan(&self, profile_json: &str) -> Result<(), AnalysisError> {
        let rule_dir = &self.config.yara_rule_dir;
        let rules = match std::fs::read_dir(rule_dir) {
            Ok(entries) => {
                let mut rules: Vec<String> = entries
                    .filter_map(|entry| entry.ok())
                    .filter_map(|entry| entry.file_name().into_string().ok())
                    .collect();
                rules.sort();
                rules
            }
            Err(_) => Vec::new(),
        };

        if rules.is_empty() {
            tracing::info!(rule_dir = %rule_dir.display(), "no yara rules found, skipping signature scan");
            return Ok(());
        }

        for rule in rules {
            tracing::info!(rule, "running signature scan");
            let spec = JobSpec {
                image: self.config.analysis_image.clone(),
                command: self.yara_command(&rule, profile_json),
                binds: vec![
                    self.files_bind(),
                    Bind {
                        host: rule_dir.clone(),
                        container: CONTAINER_RULES_DIR.to_string(),
                    },
                ],
            };
            let handle = match self.runtime.run(spec).await {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::error!(rule, error = %e, "signature scan job failed to launch");
                    continue;
                }
            };

            match handle.wait(self.wait_bound()).await {
                Ok(code) => tracing::info!(rule, code, "signature scan finished"),
                Err(e) => tracing::error!(rule, error = %e, "signature scan failed"),
            }
            match handle.logs().await {
                Ok(logs) => tracing::debug!(rule, logs, "signature scan output"),
                Err(e) => tracing::warn!(rule, error = %e, "could not fetch signature scan logs"),
            }
            if let Err(e) = handle.remove().await {
                tracing::error!(rule, error = %e, "failed to remove signature scan container");
            }
        }
        Ok(())
    }

    fn yara_command(&self, rule: &str, profile_json: &str) -> Vec<String> {
        vec![
            "rekall".to_string(),
            "-f".to_string(),
            format!("{CONTAINER_FILES_DIR}/{CAPTURE_FILE}"),
            "--profile".to_string(),
            format!("{CONTAINER_FILES_DIR}/{profile_json}"),
            "yarascan".to_string(),
            "--yara_file".to_string(),
            format!("{CONTAINER_RULES_DIR}/{rule}"),
            "--format=json".to_string(),
            format!(
                "--output={CONTAINER_FILES_DIR}/{}",
                self.output_file_name(&format!("yara-scan-{rule}"))
            ),
        ]
    }
}

/// `profile.zip` converts to `profile.json`, matching the names the build
/// stage produces.
fn profile_json_name(archive: &str) -> String {
    let stem = archive.strip_suffix("zip").unwrap_or(archive);
    format!("{stem}json")
}
