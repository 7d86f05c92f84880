mod cmd;
mod logging;
mod output;
mod prompt;

use clap::{ArgGroup, Parser};
use plsync_core::config::PolicyFile;
use plsync_core::junos::MAX_ROLLBACK_MINUTES;
use plsync_core::paths;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "plsync",
    about = "Render BGP prefix lists with bgpq4 and deploy them to Junos routers with commit confirmed",
    version,
    group(ArgGroup::new("action").args(["apply", "commit", "status"]))
)]
struct Cli {
    /// Policy file
    #[arg(short = 'c', long, env = "PLSYNC_CONFIG", default_value = paths::POLICY_FILE)]
    config: PathBuf,

    /// Directory for rendered configurations
    #[arg(long, default_value = paths::GENERATED_DIR)]
    output_dir: PathBuf,

    /// Directory holding the pending-commit database
    #[arg(long, env = "PLSYNC_STATE_DIR", default_value = paths::STATE_DIR)]
    state_dir: PathBuf,

    /// Directory for plsync.log
    #[arg(long, default_value = paths::LOG_DIR)]
    log_dir: PathBuf,

    /// Render, then push to every router with commit confirmed
    #[arg(long)]
    apply: bool,

    /// Confirm pending commits on ROUTER (address or hostname), or on all routers
    #[arg(long, value_name = "ROUTER|all", num_args = 0..=1, default_missing_value = "all")]
    commit: Option<String>,

    /// Show pending commits, for one router or all
    #[arg(long, value_name = "ROUTER", num_args = 0..=1, default_missing_value = "all")]
    status: Option<String>,

    /// Automatic rollback window for --apply, in minutes
    #[arg(
        long,
        default_value_t = plsync_core::controller::DEFAULT_ROLLBACK_MINUTES,
        value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_ROLLBACK_MINUTES))
    )]
    rollback_minutes: u32,

    /// SSH username (falls back to the policy file, then PLSYNC_USERNAME)
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// SSH password; visible in the process list, prefer PLSYNC_PASSWORD or the prompt
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// SSH port for every router, overriding the policy file
    #[arg(long)]
    port: Option<u16>,

    /// Seconds to wait for bgpq4 per policy
    #[arg(long, default_value_t = 60, value_name = "SECS")]
    generator_timeout: u64,

    /// Seconds to wait for a device to finish one operation
    #[arg(long, default_value_t = 300, value_name = "SECS")]
    device_timeout: u64,

    /// Output as JSON
    #[arg(long, short = 'j')]
    json: bool,
}

impl Cli {
    fn is_device_operation(&self) -> bool {
        self.apply || self.commit.is_some()
    }

    fn context(&self) -> cmd::Context {
        cmd::Context {
            config: self.config.clone(),
            output_dir: self.output_dir.clone(),
            state_dir: self.state_dir.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            port: self.port,
            generator_timeout: Duration::from_secs(self.generator_timeout),
            device_timeout: Duration::from_secs(self.device_timeout),
            rollback_minutes: self.rollback_minutes,
            json: self.json,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = PolicyFile::load(&cli.config)
        .ok()
        .and_then(|f| f.global.log_level)
        .and_then(|l| l.parse::<tracing::Level>().ok())
        .unwrap_or(if cli.is_device_operation() {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        });
    logging::init(&cli.log_dir, default_level);

    let ctx = cli.context();
    let result = if cli.apply {
        cmd::apply::run(&ctx)
    } else if let Some(target) = cli.commit.as_deref() {
        cmd::commit::run(&ctx, target)
    } else if let Some(target) = cli.status.as_deref() {
        cmd::status::run(&ctx, target)
    } else {
        cmd::generate::run(&ctx)
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            // Print the full error chain (anyhow's alternate Display)
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    }
}
