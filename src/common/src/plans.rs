//! Command-plan templates: ordered shell command lists for each remote
//! operation, keyed by distro. Templates ship inside the binary; rendering
//! substitutes the scoped credentials and storage coordinates.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use crate::error::PlanError;
use crate::types::Credentials;

const ACQUIRE_PLAN: &str = include_str!("plans/acquire.toml");
const TRANSFER_PLAN: &str = include_str!("plans/transfer.toml");
const BUILD_PLAN: &str = include_str!("plans/build.toml");
const INTERROGATE_PLAN: &str = include_str!("plans/interrogate.toml");

// Only Amazon Linux 2 plans ship today.
// TODO: resolve the target distro from the interrogate output instead.
const DISTRO: &str = "amzn2";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanKind {
    Acquire,
    Transfer,
    Build,
    Interrogate,
}

impl PlanKind {
    pub fn name(&self) -> &'static str {
        match self {
            PlanKind::Acquire => "acquire",
            PlanKind::Transfer => "transfer",
            PlanKind::Build => "build",
            PlanKind::Interrogate => "interrogate",
        }
    }

    fn template(&self) -> &'static str {
        match self {
            PlanKind::Acquire => ACQUIRE_PLAN,
            PlanKind::Transfer => TRANSFER_PLAN,
            PlanKind::Build => BUILD_PLAN,
            PlanKind::Interrogate => INTERROGATE_PLAN,
        }
    }
}

/// An ordered list of opaque shell commands for one remote operation.
#[derive(Clone)]
pub struct CommandPlan {
    pub kind: PlanKind,
    pub commands: Vec<String>,
}

impl fmt::Debug for CommandPlan {
    // Rendered commands can carry session credentials; never print them.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandPlan")
            .field("kind", &self.kind)
            .field("commands", &self.commands.len())
            .finish()
    }
}

#[derive(Deserialize)]
struct PlanFile {
    distros: HashMap<String, DistroCommands>,
}

#[derive(Deserialize)]
struct DistroCommands {
    commands: Vec<String>,
}

/// Values substituted into a plan template before dispatch.
pub struct PlanBindings<'a> {
    pub credentials: &'a Credentials,
    pub bucket: &'a str,
    pub instance_id: &'a str,
}

impl PlanBindings<'_> {
    fn apply(&self, command: &str) -> String {
        command
            .replace("{{ssm_acquire_access_key}}", &self.credentials.access_key_id)
            .replace(
                "{{ssm_acquire_secret_key}}",
                &self.credentials.secret_access_key,
            )
            .replace(
                "{{ssm_acquire_session_token}}",
                &self.credentials.session_token,
            )
            .replace("{{ssm_acquire_s3_bucket}}", self.bucket)
            .replace("{{ssm_acquire_instance_id}}", self.instance_id)
    }
}

fn parse(kind: PlanKind) -> Result<Vec<String>, PlanError> {
    let file: PlanFile = toml::from_str(kind.template())
        .map_err(|e| PlanError::Malformed(kind.name(), e.to_string()))?;
    file.distros
        .get(DISTRO)
        .map(|d| d.commands.clone())
        .ok_or(PlanError::UnknownDistro(kind.name(), DISTRO))
}

/// The acquire plan takes no bindings; the memory sample never leaves the
/// host during this step.
pub fn load_acquire() -> Result<CommandPlan, PlanError> {
    Ok(CommandPlan {
        kind: PlanKind::Acquire,
        commands: parse(PlanKind::Acquire)?,
    })
}

pub fn load_transfer(bindings: &PlanBindings<'_>) -> Result<CommandPlan, PlanError> {
    render(PlanKind::Transfer, bindings)
}

pub fn load_build(bindings: &PlanBindings<'_>) -> Result<CommandPlan, PlanError> {
    render(PlanKind::Build, bindings)
}

pub fn load_interrogate(bindings: &PlanBindings<'_>) -> Result<CommandPlan, PlanError> {
    render(PlanKind::Interrogate, bindings)
}

fn render(kind: PlanKind, bindings: &PlanBindings<'_>) -> Result<CommandPlan, PlanError> {
    let commands = parse(kind)?
        .iter()
        .map(|command| bindings.apply(command))
        .collect();
    Ok(CommandPlan { kind, commands })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_credentials() -> Credentials {
        Credentials {
            access_key_id: "AKIATEST".to_string(),
            secret_access_key: "sekrit".to_string(),
            session_token: "tok123".to_string(),
            expiration: None,
        }
    }

    #[test]
    fn acquire_plan_parses() {
        let plan = load_acquire().unwrap();
        assert_eq!(plan.kind, PlanKind::Acquire);
        assert!(!plan.commands.is_empty());
    }

    #[test]
    fn transfer_plan_substitutes_all_placeholders() {
        let creds = test_credentials();
        let plan = load_transfer(&PlanBindings {
            credentials: &creds,
            bucket: "dummy-bucket",
            instance_id: "i-abc123",
        })
        .unwrap();

        let joined = plan.commands.join("\n");
        assert!(!joined.contains("{{"), "unsubstituted placeholder: {joined}");
        assert!(joined.contains("dummy-bucket"));
        assert!(joined.contains("i-abc123"));
        assert!(joined.contains("AKIATEST"));
    }

    #[test]
    fn build_and_interrogate_plans_render() {
        let creds = test_credentials();
        let bindings = PlanBindings {
            credentials: &creds,
            bucket: "dummy-bucket",
            instance_id: "i-abc123",
        };
        for plan in [load_build(&bindings).unwrap(), load_interrogate(&bindings).unwrap()] {
            assert!(!plan.commands.is_empty());
            assert!(!plan.commands.join("\n").contains("{{"));
        }
    }

    #[test]
    fn debug_never_prints_commands() {
        let creds = test_credentials();
        let plan = load_transfer(&PlanBindings {
            credentials: &creds,
            bucket: "dummy-bucket",
            instance_id: "i-abc123",
        })
        .unwrap();
        let rendered = format!("{plan:?}");
        assert!(!rendered.contains("sekrit"));
        assert!(!rendered.contains("tok123"));
    }
}
