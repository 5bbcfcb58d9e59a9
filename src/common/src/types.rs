use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

/// Short-lived credentials negotiated with STS. Held in memory for the
/// lifetime of one CLI invocation and never written to disk.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: Option<DateTime<Utc>>,
}

impl fmt::Debug for Credentials {
    // Keys must not leak into logs, so Debug only exposes the expiry.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

/// Status of a remote command invocation as reported by SSM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    InProgress,
    Delayed,
    Cancelling,
    Success,
    Failed,
    Cancelled,
    TimedOut,
}

impl CommandStatus {
    /// Terminal statuses never transition again; everything else means the
    /// command service is still working and the caller should poll again.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            CommandStatus::Pending
                | CommandStatus::InProgress
                | CommandStatus::Delayed
                | CommandStatus::Cancelling
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandStatus::Success)
    }
}

impl FromStr for CommandStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(CommandStatus::Pending),
            "InProgress" => Ok(CommandStatus::InProgress),
            "Delayed" => Ok(CommandStatus::Delayed),
            "Cancelling" => Ok(CommandStatus::Cancelling),
            "Success" => Ok(CommandStatus::Success),
            "Failed" => Ok(CommandStatus::Failed),
            "Cancelled" => Ok(CommandStatus::Cancelled),
            "TimedOut" => Ok(CommandStatus::TimedOut),
            other => Err(format!("unrecognized command status: {other}")),
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandStatus::Pending => "Pending",
            CommandStatus::InProgress => "InProgress",
            CommandStatus::Delayed => "Delayed",
            CommandStatus::Cancelling => "Cancelling",
            CommandStatus::Success => "Success",
            CommandStatus::Failed => "Failed",
            CommandStatus::Cancelled => "Cancelled",
            CommandStatus::TimedOut => "TimedOut",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_terminal_statuses() {
        for status in [
            CommandStatus::Pending,
            CommandStatus::InProgress,
            CommandStatus::Delayed,
            CommandStatus::Cancelling,
        ] {
            assert!(!status.is_terminal(), "{status} should be non-terminal");
        }
    }

    #[test]
    fn terminal_statuses() {
        for status in [
            CommandStatus::Success,
            CommandStatus::Failed,
            CommandStatus::Cancelled,
            CommandStatus::TimedOut,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
        assert!(CommandStatus::Success.is_success());
        assert!(!CommandStatus::Failed.is_success());
    }

    #[test]
    fn parses_wire_strings() {
        assert_eq!(
            "InProgress".parse::<CommandStatus>().unwrap(),
            CommandStatus::InProgress
        );
        assert!("Unknown".parse::<CommandStatus>().is_err());
    }

    #[test]
    fn credentials_debug_hides_keys() {
        let creds = Credentials {
            access_key_id: "AKIAEXAMPLE".to_string(),
            secret_access_key: "super-secret".to_string(),
            session_token: "token".to_string(),
            expiration: None,
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("AKIAEXAMPLE"));
        assert!(!rendered.contains("super-secret"));
    }
}
