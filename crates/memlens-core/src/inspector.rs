use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::objects::ObjectGraphWalker;
use crate::reset::ResetSignal;
use crate::scatter::ScatterEngine;
use crate::singleton::SingletonCache;
use crate::transport::Transport;
use crate::types::TypeResolver;

/// Everything needed to inspect one target, wired to one transport and one
/// reset signal.
///
/// Owns no global state: two inspectors over two transports never share
/// caches.
pub struct Inspector {
    engine: Arc<ScatterEngine>,
    types: Arc<TypeResolver>,
    objects: Arc<ObjectGraphWalker>,
    singletons: SingletonCache,
    reset: ResetSignal,
}

impl Inspector {
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Self {
        let reset = ResetSignal::new();
        let engine = Arc::new(ScatterEngine::new(transport, config.gate));
        let types = Arc::new(TypeResolver::new(
            Arc::clone(&engine),
            config.type_table.clone(),
            reset.clone(),
        ));
        let objects = Arc::new(ObjectGraphWalker::new(
            Arc::clone(&engine),
            config.object_list.clone(),
        ));
        let singletons = SingletonCache::new(Arc::clone(&types), Arc::clone(&objects), reset.clone())
            .with_specs(config.singletons.clone());

        Self {
            engine,
            types,
            objects,
            singletons,
            reset,
        }
    }

    pub fn engine(&self) -> &Arc<ScatterEngine> {
        &self.engine
    }

    pub fn types(&self) -> &TypeResolver {
        &self.types
    }

    pub fn objects(&self) -> &ObjectGraphWalker {
        &self.objects
    }

    pub fn singletons(&self) -> &SingletonCache {
        &self.singletons
    }

    /// Handle for code that detects target restarts on its own
    pub fn reset_signal(&self) -> ResetSignal {
        self.reset.clone()
    }

    /// The target restarted or reloaded: drop every cached table, snapshot
    /// and singleton address.
    pub fn reset(&self) {
        let epoch = self.reset.fire();
        self.types.invalidate();
        self.singletons.clear();
        info!("Dropped cached target state (epoch {})", epoch);
    }
}
