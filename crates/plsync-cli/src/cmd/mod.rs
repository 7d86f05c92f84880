pub mod apply;
pub mod commit;
pub mod generate;
pub mod status;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use plsync_core::config::{Inventory, PolicyFile, WarnLevel};
use plsync_core::controller::DeploymentController;
use plsync_core::credentials::RouterCredentials;
use plsync_core::paths;
use plsync_core::ssh::SshTransport;
use plsync_core::store::PendingCommitStore;
use tracing::warn;

use crate::prompt::PromptingCredentials;

/// Settings shared by every mode, taken from the command line.
pub struct Context {
    pub config: PathBuf,
    pub output_dir: PathBuf,
    pub state_dir: PathBuf,
    pub username: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
    pub generator_timeout: Duration,
    pub device_timeout: Duration,
    pub rollback_minutes: u32,
    pub json: bool,
}

impl Context {
    /// Load, validate and resolve the policy file. Error-level findings are
    /// fatal; warnings are logged.
    pub fn load_inventory(&self) -> anyhow::Result<Inventory> {
        let file = PolicyFile::load(&self.config)
            .with_context(|| format!("cannot load policy file {}", self.config.display()))?;
        for w in file.validate() {
            if w.level == WarnLevel::Warning {
                warn!("{}", w.message);
            }
        }
        let mut inventory = file
            .resolve()
            .with_context(|| format!("invalid policy file {}", self.config.display()))?;
        if let Some(port) = self.port {
            for rp in &mut inventory.routers {
                rp.router.port = port;
            }
        }
        Ok(inventory)
    }

    /// Like [`Context::load_inventory`], but an absent policy file yields an
    /// empty inventory. Confirmation and status work from the store alone.
    pub fn load_inventory_if_present(&self) -> anyhow::Result<Inventory> {
        if !self.config.exists() {
            return Ok(Inventory::default());
        }
        self.load_inventory()
    }

    /// Open the store and build a controller over SSH, purging stale
    /// entries first.
    pub fn open_controller(&self) -> anyhow::Result<DeploymentController> {
        let db_path = paths::commits_db_path(&self.state_dir);
        let store = PendingCommitStore::open(&db_path)
            .with_context(|| format!("cannot open pending-commit store {}", db_path.display()))?;

        let transport = match SshTransport::detect() {
            Ok(t) => t,
            Err(e) => {
                warn!("{e}; device operations will fail");
                SshTransport::with_binaries("ssh", None)
            }
        }
        .command_timeout(self.device_timeout);

        let credentials = PromptingCredentials::new(RouterCredentials::new(
            self.username.clone(),
            self.password.clone(),
        ));

        let controller =
            DeploymentController::new(store, Arc::new(transport), Arc::new(credentials))
                .default_rollback_minutes(self.rollback_minutes);

        for entry in controller.sweep().context("stale-entry sweep failed")? {
            eprintln!(
                "WARNING: purged stale {} commit on {} ({}), deadline was {}; verify the device",
                entry.state,
                entry.router,
                entry.hostname,
                crate::output::timestamp(entry.deadline)
            );
        }
        Ok(controller)
    }
}
