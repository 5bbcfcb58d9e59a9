use clap::Parser;

#[derive(Parser, Debug)]
#[clap(
    name = "ssm-acquire",
    about = "A rapid evidence preservation tool for Amazon EC2",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Cli {
    /// The instance you would like to operate on
    #[clap(long)]
    pub instance_id: String,

    /// The AWS region where the instance can be found
    #[clap(long, default_value = "us-west-2")]
    pub region: String,

    /// Use linpmem to acquire a memory sample and preserve it in the asset store
    #[clap(long)]
    pub acquire: bool,

    /// Build an analysis profile matching the instance's kernel
    #[clap(long)]
    pub build: bool,

    /// Preserve rapid-forensics osquery output from the instance
    #[clap(long)]
    pub interrogate: bool,

    /// Run containerized analysis plugins against a preserved capture
    #[clap(long)]
    pub analyze: bool,
}

impl Cli {
    pub fn any_mode_selected(&self) -> bool {
        self.acquire || self.build || self.interrogate || self.analyze
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_defaults_to_us_west_2() {
        let cli = Cli::parse_from(["ssm-acquire", "--instance-id", "i-abc123", "--acquire"]);
        assert_eq!(cli.region, "us-west-2");
        assert!(cli.acquire);
        assert!(cli.any_mode_selected());
    }

    #[test]
    fn modes_default_off() {
        let cli = Cli::parse_from(["ssm-acquire", "--instance-id", "i-abc123"]);
        assert!(!cli.any_mode_selected());
    }
}
