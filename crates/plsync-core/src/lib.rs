pub mod commit;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod generator;
pub mod io;
pub mod junos;
pub mod paths;
pub mod process;
pub mod render;
pub mod ssh;
pub mod store;
pub mod transport;
pub mod types;

pub use error::{PlsyncError, Result};
