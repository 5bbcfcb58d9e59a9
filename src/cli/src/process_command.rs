//! Mode dispatch for one CLI invocation. Configuration and credentials are
//! resolved once; each requested mode then runs in turn. A failing stage is
//! logged and does not stop independent modes from being attempted.

use anyhow::{Context, Result};

use acquire_analysis::engine::AnalysisEngine;
use acquire_analysis::fetcher::ArtifactFetcher;
use acquire_analysis::runtime::DockerRuntime;
use acquire_aws::clients;
use acquire_aws::policy;
use acquire_aws::s3::S3Client;
use acquire_aws::ssm::SdkSsm;
use acquire_aws::sts::{SdkSts, StsManager, TerminalPrompt};
use acquire_common::config::{Config, ConfigManager};
use acquire_common::types::Credentials;

use crate::acquisition::AcquisitionSequencer;
use crate::commands::Cli;

pub async fn process_cli(cli: Cli) -> Result<()> {
    tracing::info!("initializing ssm-acquire");

    if !cli.any_mode_selected() {
        tracing::warn!("no mode selected, nothing to do");
        return Ok(());
    }

    let config = ConfigManager::load_config().context("loading configuration")?;

    // One scoped policy and one credential negotiation cover every mode in
    // this invocation.
    let scoped_policy = policy::get_limited_policy(&cli.instance_id, &config.asset_bucket)
        .context("generating limited scope policy")?;
    let sts = SdkSts::new(clients::sts_client(&cli.region).await);
    let manager = StsManager::new(sts, TerminalPrompt, &config, &scoped_policy);
    let credentials = manager
        .authenticate()
        .await
        .context("credential negotiation failed")?;

    let mut failed_stages = 0usize;

    if cli.acquire || cli.build || cli.interrogate {
        let ssm = SdkSsm::new(clients::ssm_client(&credentials, &cli.region));
        let sequencer =
            AcquisitionSequencer::new(ssm, &config, &credentials, &cli.instance_id);

        if cli.acquire {
            if let Err(e) = sequencer.acquire().await {
                tracing::error!(instance_id = cli.instance_id, error = %e, "acquire mode failed");
                failed_stages += 1;
            }
        }

        if cli.build {
            if let Err(e) = sequencer.build().await {
                tracing::error!(instance_id = cli.instance_id, error = %e, "build mode failed");
                failed_stages += 1;
            }
        }

        if cli.interrogate {
            if let Err(e) = sequencer.interrogate().await {
                tracing::error!(instance_id = cli.instance_id, error = %e, "interrogate mode failed");
                failed_stages += 1;
            }
        }
    }

    if cli.analyze {
        tracing::info!("analysis mode active");
        if let Err(e) = run_analysis(&cli, &config, &credentials).await {
            tracing::error!(instance_id = cli.instance_id, error = %e, "analyze mode failed");
            failed_stages += 1;
        } else {
            tracing::info!("analysis complete, result dumps have been added to the asset store");
        }
    }

    if failed_stages > 0 {
        tracing::warn!(failed_stages, "ssm-acquire completed with failed stages");
    } else {
        tracing::info!("ssm-acquire has completed successfully");
    }
    Ok(())
}

async fn run_analysis(cli: &Cli, config: &Config, credentials: &Credentials) -> Result<()> {
    let store = S3Client::new(
        clients::s3_client(credentials, &cli.region),
        &config.asset_bucket,
    );
    let runtime = DockerRuntime::connect().context("connecting to the container runtime")?;

    let fetcher = ArtifactFetcher::new(&store, &config.work_root);
    fetcher
        .download_incident_data(&cli.instance_id)
        .await
        .context("downloading incident data")?;

    let engine = AnalysisEngine::new(&runtime, &store, config, &cli.instance_id);
    engine.run().await.context("running analysis plugins")?;
    Ok(())
}
