//! Remote command dispatch and polling. Dispatch starts an asynchronous
//! run-shell-script invocation on the target host; completion is observed by
//! polling the command service until a terminal status appears or the
//! overall bound elapses. Terminal failures are never retried here.

use std::time::Duration;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tokio::time::Instant;

use acquire_common::plans::CommandPlan;
use acquire_common::types::CommandStatus;

pub const RUN_SHELL_SCRIPT_DOCUMENT: &str = "AWS-RunShellScript";

#[derive(Debug, Error)]
pub enum SsmError {
    #[error("remote command service rejected dispatch for {instance_id}: {message}")]
    Dispatch { instance_id: String, message: String },

    #[error("status check failed for command {command_id}: {message}")]
    Poll { command_id: String, message: String },

    #[error("command {command_id} not terminal after {elapsed_secs}s")]
    PollTimeout { command_id: String, elapsed_secs: u64 },

    #[error("{stage} step on {instance_id} ended with terminal status {status}")]
    CommandFailed {
        stage: &'static str,
        instance_id: String,
        status: CommandStatus,
    },
}

/// Handle for one dispatched remote command.
#[derive(Clone, Debug)]
pub struct CommandInvocation {
    pub command_id: String,
    pub instance_id: String,
}

#[async_trait]
pub trait SsmOps {
    async fn send_command(
        &self,
        instance_id: &str,
        comment: &str,
        commands: &[String],
    ) -> Result<CommandInvocation, SsmError>;

    async fn invocation_status(
        &self,
        invocation: &CommandInvocation,
    ) -> Result<CommandStatus, SsmError>;
}

pub struct SdkSsm {
    client: aws_sdk_ssm::Client,
}

impl SdkSsm {
    pub fn new(client: aws_sdk_ssm::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SsmOps for SdkSsm {
    async fn send_command(
        &self,
        instance_id: &str,
        comment: &str,
        commands: &[String],
    ) -> Result<CommandInvocation, SsmError> {
        let response = self
            .client
            .send_command()
            .instance_ids(instance_id)
            .document_name(RUN_SHELL_SCRIPT_DOCUMENT)
            .comment(comment)
            .parameters("commands", commands.to_vec())
            .send()
            .await
            .map_err(|e| SsmError::Dispatch {
                instance_id: instance_id.to_string(),
                message: e.to_string(),
            })?;

        let command_id = response
            .command()
            .and_then(|c| c.command_id())
            .ok_or_else(|| SsmError::Dispatch {
                instance_id: instance_id.to_string(),
                message: "send_command response carried no command id".to_string(),
            })?;

        Ok(CommandInvocation {
            command_id: command_id.to_string(),
            instance_id: instance_id.to_string(),
        })
    }

    async fn invocation_status(
        &self,
        invocation: &CommandInvocation,
    ) -> Result<CommandStatus, SsmError> {
        let response = self
            .client
            .get_command_invocation()
            .command_id(&invocation.command_id)
            .instance_id(&invocation.instance_id)
            .send()
            .await
            .map_err(|e| SsmError::Poll {
                command_id: invocation.command_id.clone(),
                message: e.to_string(),
            })?;

        let status = response.status().ok_or_else(|| SsmError::Poll {
            command_id: invocation.command_id.clone(),
            message: "get_command_invocation response carried no status".to_string(),
        })?;

        status.as_str().parse().map_err(|message| SsmError::Poll {
            command_id: invocation.command_id.clone(),
            message,
        })
    }
}

/// Cadence for poll-to-terminal loops. The settle delay gives the command
/// service time to register the invocation before the first status check.
#[derive(Clone, Copy, Debug)]
pub struct PollSettings {
    pub settle: Duration,
    pub interval: Duration,
    pub max_elapsed: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(2),
            interval: Duration::from_millis(500),
            max_elapsed: Duration::from_secs(3600),
        }
    }
}

pub struct SsmCommandDriver<C: SsmOps> {
    ops: C,
}

impl<C: SsmOps> SsmCommandDriver<C> {
    pub fn new(ops: C) -> Self {
        Self { ops }
    }

    /// Initiates asynchronous execution of the plan on the target host.
    /// Does not block for completion.
    pub async fn dispatch(
        &self,
        plan: &CommandPlan,
        instance_id: &str,
    ) -> Result<CommandInvocation, SsmError> {
        let comment = format!("Incident response step execution for: {instance_id}");
        tracing::debug!(
            instance_id,
            plan = plan.kind.name(),
            commands = plan.commands.len(),
            "dispatching remote command"
        );
        self.ops
            .send_command(instance_id, &comment, &plan.commands)
            .await
    }

    /// Single non-blocking status check. Non-terminal states map to `None`;
    /// safe to call repeatedly.
    pub async fn poll(
        &self,
        invocation: &CommandInvocation,
    ) -> Result<Option<CommandStatus>, SsmError> {
        let status = self.ops.invocation_status(invocation).await?;
        Ok(status.is_terminal().then_some(status))
    }

    /// Polls on a fixed cadence until a terminal status is observed or the
    /// overall bound elapses. The returned status is whatever the command
    /// service last reported; callers branch on Success themselves.
    pub async fn poll_to_terminal(
        &self,
        invocation: &CommandInvocation,
        settings: &PollSettings,
    ) -> Result<CommandStatus, SsmError> {
        tokio::time::sleep(settings.settle).await;

        let spinner = progress_spinner(&invocation.instance_id);
        let started = Instant::now();
        loop {
            if let Some(status) = self.poll(invocation).await? {
                spinner.finish_and_clear();
                tracing::debug!(
                    command_id = %invocation.command_id,
                    %status,
                    "terminal status observed"
                );
                return Ok(status);
            }
            if started.elapsed() >= settings.max_elapsed {
                spinner.finish_and_clear();
                return Err(SsmError::PollTimeout {
                    command_id: invocation.command_id.clone(),
                    elapsed_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(settings.interval).await;
        }
    }
}

fn progress_spinner(instance_id: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("static spinner template"),
    );
    spinner.set_message(format!("waiting on {instance_id}"));
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}
