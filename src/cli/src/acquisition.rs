//! Stage sequencing for the acquisition-side modes. Each stage renders its
//! plan, dispatches it, polls to a terminal status, and branches on Success.
//! Transfer only runs after Acquire reports Success; Build and Interrogate
//! are independent stages.

use anyhow::Result;

use acquire_aws::ssm::{PollSettings, SsmCommandDriver, SsmError, SsmOps};
use acquire_common::config::Config;
use acquire_common::plans::{self, CommandPlan, PlanBindings};
use acquire_common::types::Credentials;

pub struct AcquisitionSequencer<'a, C: SsmOps> {
    driver: SsmCommandDriver<C>,
    config: &'a Config,
    credentials: &'a Credentials,
    instance_id: &'a str,
    settings: PollSettings,
}

impl<'a, C: SsmOps> AcquisitionSequencer<'a, C> {
    pub fn new(
        ops: C,
        config: &'a Config,
        credentials: &'a Credentials,
        instance_id: &'a str,
    ) -> Self {
        Self {
            driver: SsmCommandDriver::new(ops),
            config,
            credentials,
            instance_id,
            settings: PollSettings::default(),
        }
    }

    pub fn with_poll_settings(mut self, settings: PollSettings) -> Self {
        self.settings = settings;
        self
    }

    fn bindings(&self) -> PlanBindings<'_> {
        PlanBindings {
            credentials: self.credentials,
            bucket: &self.config.asset_bucket,
            instance_id: self.instance_id,
        }
    }

    /// Memory sample first, then transfer to the asset store. The transfer
    /// stage is the one hard ordering dependency in the system and only
    /// dispatches after Acquire reports Success.
    pub async fn acquire(&self) -> Result<()> {
        let plan = plans::load_acquire()?;
        tracing::info!(
            instance_id = self.instance_id,
            "memory dump in progress, please wait"
        );
        self.run_stage("acquire", &plan).await?;

        tracing::info!("proceeding to copy off the data to the asset store");
        let transfer = plans::load_transfer(&self.bindings())?;
        self.run_stage("transfer", &transfer).await?;
        tracing::info!(instance_id = self.instance_id, "transfer sequence complete");
        Ok(())
    }

    pub async fn build(&self) -> Result<()> {
        let plan = plans::load_build(&self.bindings())?;
        tracing::info!(
            instance_id = self.instance_id,
            "attempting to build an analysis profile"
        );
        self.run_stage("build", &plan).await?;
        tracing::info!(
            instance_id = self.instance_id,
            "profile build complete, a zip has been added to the asset store"
        );
        Ok(())
    }

    pub async fn interrogate(&self) -> Result<()> {
        let plan = plans::load_interrogate(&self.bindings())?;
        tracing::info!(
            instance_id = self.instance_id,
            "interrogating the instance with osquery"
        );
        self.run_stage("interrogate", &plan).await?;
        tracing::info!(
            instance_id = self.instance_id,
            "interrogation complete, results added to the asset store"
        );
        Ok(())
    }

    /// Dispatch, poll to terminal, branch. The observed terminal status is
    /// authoritative; anything but Success fails the stage.
    async fn run_stage(&self, stage: &'static str, plan: &CommandPlan) -> Result<(), SsmError> {
        let invocation = self.driver.dispatch(plan, self.instance_id).await?;
        let status = self
            .driver
            .poll_to_terminal(&invocation, &self.settings)
            .await?;

        if status.is_success() {
            tracing::info!(stage, %status, "stage completed");
            Ok(())
        } else {
            Err(SsmError::CommandFailed {
                stage,
                instance_id: self.instance_id.to_string(),
                status,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use acquire_aws::ssm::CommandInvocation;
    use acquire_common::types::CommandStatus;

    struct StubSsm {
        /// Status reported for each dispatched command, in dispatch order.
        statuses: Vec<CommandStatus>,
        dispatched: Mutex<Vec<Vec<String>>>,
        dispatch_count: AtomicUsize,
    }

    impl StubSsm {
        fn new(statuses: Vec<CommandStatus>) -> Self {
            Self {
                statuses,
                dispatched: Mutex::new(Vec::new()),
                dispatch_count: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl<'a> SsmOps for &'a StubSsm {
        async fn send_command(
            &self,
            instance_id: &str,
            _comment: &str,
            commands: &[String],
        ) -> Result<CommandInvocation, SsmError> {
            let index = self.dispatch_count.fetch_add(1, Ordering::SeqCst);
            self.dispatched.lock().unwrap().push(commands.to_vec());
            Ok(CommandInvocation {
                command_id: format!("cmd-{index}"),
                instance_id: instance_id.to_string(),
            })
        }

        async fn invocation_status(
            &self,
            invocation: &CommandInvocation,
        ) -> Result<CommandStatus, SsmError> {
            let index: usize = invocation
                .command_id
                .strip_prefix("cmd-")
                .unwrap()
                .parse()
                .unwrap();
            Ok(self.statuses[index])
        }
    }

    fn fast_settings() -> PollSettings {
        PollSettings {
            settle: Duration::ZERO,
            interval: Duration::from_millis(1),
            max_elapsed: Duration::from_secs(5),
        }
    }

    fn test_config() -> Config {
        Config {
            asset_bucket: "dummy-bucket".into(),
            yara_rule_dir: "/nonexistent".into(),
            role_arn: None,
            mfa_serial_number: None,
            session_duration_secs: 3600,
            work_root: "/tmp".into(),
            analysis_image: "threatresponse/rekall:latest".into(),
            analysis_plugins: vec![],
            container_wait_secs: 600,
        }
    }

    fn test_credentials() -> Credentials {
        Credentials {
            access_key_id: "AKIATEST".into(),
            secret_access_key: "secret".into(),
            session_token: "token".into(),
            expiration: None,
        }
    }

    #[tokio::test]
    async fn failed_acquire_never_dispatches_transfer() {
        let ssm = StubSsm::new(vec![CommandStatus::Failed]);
        let config = test_config();
        let credentials = test_credentials();
        let sequencer = AcquisitionSequencer::new(&ssm, &config, &credentials, "i-abc123")
            .with_poll_settings(fast_settings());

        let err = sequencer.acquire().await.unwrap_err();
        assert_eq!(ssm.dispatch_count.load(Ordering::SeqCst), 1);
        let message = format!("{err:#}");
        assert!(message.contains("Failed"), "unexpected error: {message}");
    }

    #[tokio::test]
    async fn successful_acquire_dispatches_transfer_with_scoped_bindings() {
        let ssm = StubSsm::new(vec![CommandStatus::Success, CommandStatus::Success]);
        let config = test_config();
        let credentials = test_credentials();
        let sequencer = AcquisitionSequencer::new(&ssm, &config, &credentials, "i-abc123")
            .with_poll_settings(fast_settings());

        sequencer.acquire().await.unwrap();

        let dispatched = ssm.dispatched.lock().unwrap();
        assert_eq!(dispatched.len(), 2);
        let transfer = dispatched[1].join("\n");
        assert!(transfer.contains("dummy-bucket"));
        assert!(transfer.contains("i-abc123"));
        assert!(transfer.contains("AKIATEST"));
    }

    #[tokio::test]
    async fn build_is_a_single_stage() {
        let ssm = StubSsm::new(vec![CommandStatus::Success]);
        let config = test_config();
        let credentials = test_credentials();
        let sequencer = AcquisitionSequencer::new(&ssm, &config, &credentials, "i-abc123")
            .with_poll_settings(fast_settings());

        sequencer.build().await.unwrap();
        assert_eq!(ssm.dispatch_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_interrogate_surfaces_the_observed_status() {
        let ssm = StubSsm::new(vec![CommandStatus::Cancelled]);
        let config = test_config();
        let credentials = test_credentials();
        let sequencer = AcquisitionSequencer::new(&ssm, &config, &credentials, "i-abc123")
            .with_poll_settings(fast_settings());

        let err = sequencer.interrogate().await.unwrap_err();
        assert!(format!("{err:#}").contains("Cancelled"));
    }
}
