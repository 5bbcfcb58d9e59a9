//! Scoped-credential negotiation. Four paths over two configuration bits
//! (response role configured, MFA configured), each calling exactly one STS
//! primitive. Rejections surface immediately; nothing here retries.

use async_trait::async_trait;
use thiserror::Error;

use acquire_common::config::Config;
use acquire_common::types::Credentials;

/// Fixed session name for assumed response roles.
const SESSION_NAME: &str = "ssm-acquire";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential service rejected the request: {0}")]
    Rejected(String),

    #[error("credential service returned no credentials")]
    EmptyCredentials,

    #[error("failed to read MFA token: {0}")]
    MfaPrompt(String),
}

#[derive(Clone, Debug)]
pub struct MfaChallenge {
    pub serial_number: String,
    pub token_code: String,
}

/// Source of the interactive second factor. Injected so negotiation logic is
/// testable without a human at the terminal; prompting blocks until input.
pub trait MfaTokenSource {
    fn mfa_token(&self) -> Result<String, AuthError>;
}

/// Prompts on the controlling terminal.
pub struct TerminalPrompt;

impl MfaTokenSource for TerminalPrompt {
    fn mfa_token(&self) -> Result<String, AuthError> {
        dialoguer::Input::<String>::new()
            .with_prompt("Please enter your MFA token")
            .interact_text()
            .map_err(|e| AuthError::MfaPrompt(e.to_string()))
    }
}

#[async_trait]
pub trait StsOps {
    async fn get_session_token(
        &self,
        duration_secs: i32,
        mfa: Option<&MfaChallenge>,
    ) -> Result<Credentials, AuthError>;

    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
        duration_secs: i32,
        policy_json: &str,
        mfa: Option<&MfaChallenge>,
    ) -> Result<Credentials, AuthError>;
}

pub struct SdkSts {
    client: aws_sdk_sts::Client,
}

impl SdkSts {
    pub fn new(client: aws_sdk_sts::Client) -> Self {
        Self { client }
    }

    fn convert(
        credentials: Option<&aws_sdk_sts::types::Credentials>,
    ) -> Result<Credentials, AuthError> {
        let credentials = credentials.ok_or(AuthError::EmptyCredentials)?;
        let expiration = chrono::DateTime::from_timestamp(
            credentials.expiration().secs(),
            credentials.expiration().subsec_nanos(),
        );
        Ok(Credentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expiration,
        })
    }
}

#[async_trait]
impl StsOps for SdkSts {
    async fn get_session_token(
        &self,
        duration_secs: i32,
        mfa: Option<&MfaChallenge>,
    ) -> Result<Credentials, AuthError> {
        let mut request = self.client.get_session_token().duration_seconds(duration_secs);
        if let Some(mfa) = mfa {
            request = request
                .serial_number(&mfa.serial_number)
                .token_code(&mfa.token_code);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AuthError::Rejected(e.to_string()))?;
        Self::convert(response.credentials())
    }

    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
        duration_secs: i32,
        policy_json: &str,
        mfa: Option<&MfaChallenge>,
    ) -> Result<Credentials, AuthError> {
        let mut request = self
            .client
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .duration_seconds(duration_secs)
            .policy(policy_json);
        if let Some(mfa) = mfa {
            request = request
                .serial_number(&mfa.serial_number)
                .token_code(&mfa.token_code);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AuthError::Rejected(e.to_string()))?;
        Self::convert(response.credentials())
    }
}

/// Negotiates short-lived credentials for one run, scoped by the limited
/// policy when a response role is configured.
pub struct StsManager<'a, C: StsOps, P: MfaTokenSource> {
    ops: C,
    prompt: P,
    role_arn: Option<&'a str>,
    mfa_serial: Option<&'a str>,
    duration_secs: i32,
    scoped_policy: &'a str,
}

impl<'a, C: StsOps, P: MfaTokenSource> StsManager<'a, C, P> {
    pub fn new(ops: C, prompt: P, config: &'a Config, scoped_policy: &'a str) -> Self {
        Self {
            ops,
            prompt,
            role_arn: config.role_arn.as_deref(),
            mfa_serial: config.mfa_serial_number.as_deref(),
            duration_secs: config.session_duration_secs,
            scoped_policy,
        }
    }

    pub async fn authenticate(&self) -> Result<Credentials, AuthError> {
        match (self.role_arn, self.mfa_serial) {
            (Some(role_arn), Some(serial)) => {
                tracing::info!(role_arn, mfa_serial = serial, "assuming response role with MFA");
                let challenge = self.challenge(serial)?;
                self.ops
                    .assume_role(
                        role_arn,
                        SESSION_NAME,
                        self.duration_secs,
                        self.scoped_policy,
                        Some(&challenge),
                    )
                    .await
            }
            (Some(role_arn), None) => {
                tracing::info!(role_arn, "assuming response role");
                self.ops
                    .assume_role(
                        role_arn,
                        SESSION_NAME,
                        self.duration_secs,
                        self.scoped_policy,
                        None,
                    )
                    .await
            }
            (None, Some(serial)) => {
                tracing::info!(mfa_serial = serial, "no response role configured, requesting session token with MFA");
                let challenge = self.challenge(serial)?;
                self.ops
                    .get_session_token(self.duration_secs, Some(&challenge))
                    .await
            }
            (None, None) => {
                tracing::info!("no response role configured, requesting session token with ambient credentials");
                self.ops.get_session_token(self.duration_secs, None).await
            }
        }
    }

    fn challenge(&self, serial: &str) -> Result<MfaChallenge, AuthError> {
        Ok(MfaChallenge {
            serial_number: serial.to_string(),
            token_code: self.prompt.mfa_token()?,
        })
    }
}
