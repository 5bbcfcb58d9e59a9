pub mod clients;
pub mod policy;
pub mod s3;
pub mod ssm;
pub mod sts;
