//! Engine facade bundling the registry, hooks and configuration.
//!
//! # Responsibility
//! - Freeze the schema registry and hook table after startup.
//! - Hand out mapper, resolver and migration views borrowing that state.
//!
//! # Invariants
//! - An `Engine` is immutable; share it across threads through `Arc`.
//! - Sessions are never owned by the engine; every operation names its
//!   executor explicitly.

use crate::config::EngineConfig;
use crate::db::migrate::MigrationEngine;
use crate::error::OrmResult;
use crate::hooks::HookDispatcher;
use crate::relation::resolver::RelationResolver;
use crate::repo::record_mapper::RecordMapper;
use crate::schema::registry::SchemaRegistry;
use crate::tx::Executor;
use log::info;

#[derive(Debug)]
pub struct Engine {
    registry: SchemaRegistry,
    hooks: HookDispatcher,
    config: EngineConfig,
}

impl Engine {
    /// Builds an engine from a populated registry and hook table.
    ///
    /// # Errors
    /// - `InvalidConfig` when `config` is unusable.
    pub fn new(
        registry: SchemaRegistry,
        hooks: HookDispatcher,
        config: EngineConfig,
    ) -> OrmResult<Self> {
        config.validate()?;
        info!(
            "event=engine_init module=engine status=ok models={} cursor_batch_size={} after_hook_policy={:?}",
            registry.len(),
            config.cursor_batch_size,
            config.after_hook_policy
        );
        Ok(Self {
            registry,
            hooks,
            config,
        })
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn hooks(&self) -> &HookDispatcher {
        &self.hooks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn records(&self) -> RecordMapper<'_> {
        RecordMapper::new(&self.registry, &self.hooks, &self.config)
    }

    pub fn relations(&self) -> RelationResolver<'_> {
        RelationResolver::new(&self.registry, &self.config)
    }

    pub fn migrations(&self) -> MigrationEngine<'_> {
        MigrationEngine::new(&self.registry)
    }

    /// Brings the schema of every registered model up to date.
    pub fn auto_migrate(&self, exec: &dyn Executor) -> OrmResult<usize> {
        self.migrations().auto_migrate(exec)
    }
}

#[cfg(test)]
mod tests {
    use super::Engine;
    use crate::config::EngineConfig;
    use crate::error::OrmError;
    use crate::hooks::HookDispatcher;
    use crate::schema::registry::SchemaRegistry;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn engine_is_shareable_across_threads() {
        assert_send_sync::<Engine>();
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            cursor_batch_size: 0,
            ..EngineConfig::default()
        };
        let err = Engine::new(SchemaRegistry::new(), HookDispatcher::new(), config).unwrap_err();
        assert!(matches!(err, OrmError::InvalidConfig(_)));
    }
}
