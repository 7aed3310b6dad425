use std::time::Duration;

use clap::Parser;

use crate::sequencer::{GenerateRequest, DEFAULT_MAX_IDS};
use crate::strategy::StrategyKind;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Comma-separated list of coordination service endpoints (host:port)
    #[arg(short = 'z', long)]
    pub connect: String,

    /// Strategy used to pick a new sequence id
    #[arg(short, long, value_enum, default_value_t = StrategyKind::FirstAvailable)]
    pub strategy: StrategyKind,

    /// Instance to assign an id to [default: this instance]
    #[arg(short, long)]
    pub instance_id: Option<String>,

    /// Autoscaling group to assign within [default: the instance's group]
    #[arg(short, long)]
    pub group: Option<String>,

    /// Number of ids the group may use
    #[arg(short, long, default_value_t = DEFAULT_MAX_IDS, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_ids: u32,

    /// AWS region used to look up group membership
    #[arg(short, long, default_value = "us-east-1")]
    pub region: String,

    /// Give up if no id has been assigned after this many seconds
    #[arg(short, long)]
    pub timeout_secs: Option<u64>,
}

impl Cli {
    pub fn generate_request(&self) -> GenerateRequest {
        GenerateRequest {
            instance_id: self.instance_id.clone(),
            group: self.group.clone(),
            strategy: self.strategy,
            max_ids: self.max_ids,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
