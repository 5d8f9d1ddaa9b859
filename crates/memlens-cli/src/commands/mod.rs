//! CLI command implementations.

pub mod class;
pub mod classes;
pub mod object;
pub mod singleton;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use memlens_core::{Config, Inspector, SnapshotTransport};
use tracing::{info, warn};

/// Inspector over a loaded snapshot, plus the config it was built from
pub struct Context {
    pub config: Config,
    pub inspector: Inspector,
}

impl Context {
    pub fn open(snapshot: &Path, config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => {
                let config = Config::load(path)
                    .with_context(|| format!("failed to load config {}", path.display()))?;
                info!("Loaded config from {}", path.display());
                config
            }
            None => {
                warn!("No config given, using default layout");
                Config::default()
            }
        };

        let transport = SnapshotTransport::load(snapshot)
            .with_context(|| format!("failed to load snapshot {}", snapshot.display()))?;
        info!(
            "Loaded snapshot {} ({} regions)",
            snapshot.display(),
            transport.region_count()
        );

        let inspector = Inspector::new(Arc::new(transport), &config);
        Ok(Self { config, inspector })
    }
}
