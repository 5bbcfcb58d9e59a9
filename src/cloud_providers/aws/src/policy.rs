//! Builds the least-privilege policy attached to the assumed response role:
//! object writes limited to the instance's namespace, command dispatch
//! limited to the instance itself.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const POLICY_TEMPLATE: &str = include_str!("policies/instance-scoped-policy.json");

/// Statements recognized by Sid during scoping. STMT4 is the bucket-wide
/// read statement used by the analyze mode.
const BUCKET_WIDE_SID: &str = "STMT4";

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy template is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("policy statement {0} has fewer resource slots than expected")]
    ShortResourceList(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyFile {
    #[serde(rename = "PolicyDocument")]
    pub policy_document: PolicyDocument,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Statement")]
    pub statement: Vec<PolicyStatement>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyStatement {
    #[serde(rename = "Sid")]
    pub sid: String,
    #[serde(rename = "Effect")]
    pub effect: String,
    #[serde(rename = "Action")]
    pub action: Vec<String>,
    #[serde(rename = "Resource")]
    pub resource: Vec<String>,
}

pub fn generate_arn_for_instance(instance_id: &str) -> String {
    format!("arn:aws:ec2:*:*:instance/{instance_id}")
}

/// Scopes the embedded template to one instance and one bucket namespace and
/// serializes it for the assume-role call.
pub fn get_limited_policy(instance_id: &str, bucket: &str) -> Result<String, PolicyError> {
    let file: PolicyFile = serde_json::from_str(POLICY_TEMPLATE)?;
    let document = scope_document(file.policy_document, instance_id, bucket)?;
    let rendered = serde_json::to_string(&document)?;
    tracing::debug!(instance_id, "limited scope policy generated for assume-role");
    Ok(rendered)
}

/// Substitution is positional: only resource slots 0 and 1 of a matched
/// statement change, and statement order is preserved.
pub fn scope_document(
    mut document: PolicyDocument,
    instance_id: &str,
    bucket: &str,
) -> Result<PolicyDocument, PolicyError> {
    for statement in document.statement.iter_mut() {
        let first_action = statement.action.first().map(String::as_str).unwrap_or("");

        if first_action == "s3:PutObject" {
            require_slots(statement, 2)?;
            statement.resource[0] = format!("arn:aws:s3:::{bucket}/{instance_id}");
            statement.resource[1] = format!("arn:aws:s3:::{bucket}/{instance_id}/*");
        } else if first_action.starts_with("ssm:Send") {
            require_slots(statement, 2)?;
            statement.resource[1] = generate_arn_for_instance(instance_id);
        } else if statement.sid == BUCKET_WIDE_SID {
            require_slots(statement, 2)?;
            statement.resource[0] = format!("arn:aws:s3:::{bucket}");
            statement.resource[1] = format!("arn:aws:s3:::{bucket}/*");
        }
    }
    Ok(document)
}

fn require_slots(statement: &PolicyStatement, n: usize) -> Result<(), PolicyError> {
    if statement.resource.len() < n {
        return Err(PolicyError::ShortResourceList(statement.sid.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> PolicyDocument {
        serde_json::from_str::<PolicyFile>(POLICY_TEMPLATE)
            .unwrap()
            .policy_document
    }

    #[test]
    fn statement_count_and_order_preserved() {
        let before = template();
        let sids: Vec<String> = before.statement.iter().map(|s| s.sid.clone()).collect();

        let after = scope_document(before, "i-abc123", "dummy-bucket").unwrap();
        let scoped_sids: Vec<String> = after.statement.iter().map(|s| s.sid.clone()).collect();

        assert_eq!(sids, scoped_sids);
    }

    #[test]
    fn object_write_statement_scoped_to_instance_namespace() {
        let doc = scope_document(template(), "i-abc123", "dummy-bucket").unwrap();
        let put = &doc.statement[0];
        assert_eq!(put.resource[0], "arn:aws:s3:::dummy-bucket/i-abc123");
        assert_eq!(put.resource[1], "arn:aws:s3:::dummy-bucket/i-abc123/*");
    }

    #[test]
    fn command_send_statement_scoped_to_instance_arn() {
        let doc = scope_document(template(), "i-abc123", "dummy-bucket").unwrap();
        let send = &doc.statement[1];
        // Slot 0 (the run-shell-script document) is untouched.
        assert_eq!(send.resource[0], "arn:aws:ssm:*:*:document/AWS-RunShellScript");
        assert_eq!(send.resource[1], "arn:aws:ec2:*:*:instance/i-abc123");
    }

    #[test]
    fn bucket_wide_statement_scoped_to_bucket() {
        let doc = scope_document(template(), "i-abc123", "dummy-bucket").unwrap();
        let wide = &doc.statement[3];
        assert_eq!(wide.resource[0], "arn:aws:s3:::dummy-bucket");
        assert_eq!(wide.resource[1], "arn:aws:s3:::dummy-bucket/*");
    }

    #[test]
    fn unmatched_statements_untouched() {
        let before = template();
        let read_before = before.statement[2].clone();
        let doc = scope_document(before, "i-abc123", "dummy-bucket").unwrap();
        assert_eq!(doc.statement[2].resource, read_before.resource);
        assert_eq!(doc.statement[2].action, read_before.action);
    }

    #[test]
    fn short_resource_list_is_a_configuration_error() {
        let mut doc = template();
        doc.statement[0].resource.truncate(1);
        let err = scope_document(doc, "i-abc123", "dummy-bucket").unwrap_err();
        assert!(matches!(err, PolicyError::ShortResourceList(_)));
    }

    #[test]
    fn rendered_policy_is_json() {
        let rendered = get_limited_policy("i-abc123", "dummy-bucket").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["Version"], "2012-10-17");
        assert_eq!(parsed["Statement"].as_array().unwrap().len(), 4);
    }
}
