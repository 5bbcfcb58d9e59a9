//! SDK client construction. STS starts from the ambient credential chain;
//! every downstream client is built from the credentials negotiated for the
//! run, so the scoped policy applies to all of them.

use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::SharedCredentialsProvider;

use acquire_common::types::Credentials;

pub async fn sts_client(region: &str) -> aws_sdk_sts::Client {
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await;
    aws_sdk_sts::Client::new(&config)
}

fn scoped_provider(credentials: &Credentials) -> SharedCredentialsProvider {
    SharedCredentialsProvider::new(aws_credential_types::Credentials::from_keys(
        credentials.access_key_id.clone(),
        credentials.secret_access_key.clone(),
        Some(credentials.session_token.clone()),
    ))
}

pub fn ssm_client(credentials: &Credentials, region: &str) -> aws_sdk_ssm::Client {
    let config = aws_sdk_ssm::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .credentials_provider(scoped_provider(credentials))
        .build();
    aws_sdk_ssm::Client::from_conf(config)
}

pub fn s3_client(credentials: &Credentials, region: &str) -> aws_sdk_s3::Client {
    let config = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .credentials_provider(scoped_provider(credentials))
        .build();
    aws_sdk_s3::Client::from_conf(config)
}
