//! Lifecycle hooks around create, update and delete.
//!
//! # Responsibility
//! - Store at most one callback per (model, point), registered explicitly.
//! - Invoke callbacks and tag their failures with model and point.
//!
//! # Invariants
//! - A Before-hook failure aborts the operation before any storage write.
//! - An After-hook failure is reported after the write; the dispatcher never
//!   undoes the write. Rolling back is the caller's call through its
//!   transaction (or `AfterHookPolicy::RollbackOnly`).

use crate::error::{OrmError, OrmResult, ValidationError, ValidationErrorKind};
use crate::model::record::Record;
use crate::schema::registry::SchemaRegistry;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Error type returned by hook callbacks.
pub type HookFailure = Box<dyn Error + Send + Sync>;

/// Callback signature. Before-hooks may rewrite the record.
pub type HookFn = Arc<dyn Fn(&mut Record) -> Result<(), HookFailure> + Send + Sync>;

/// Named extension points of the write lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HookPoint {
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
}

impl HookPoint {
    pub fn is_before(self) -> bool {
        matches!(
            self,
            Self::BeforeCreate | Self::BeforeUpdate | Self::BeforeDelete
        )
    }
}

impl Display for HookPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::BeforeCreate => "before_create",
            Self::AfterCreate => "after_create",
            Self::BeforeUpdate => "before_update",
            Self::AfterUpdate => "after_update",
            Self::BeforeDelete => "before_delete",
            Self::AfterDelete => "after_delete",
        })
    }
}

/// Per-model hook table.
#[derive(Default, Clone)]
pub struct HookDispatcher {
    hooks: BTreeMap<(String, HookPoint), HookFn>,
}

impl Debug for HookDispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.hooks.keys()).finish()
    }
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `hook` for `model` at `point`.
    ///
    /// # Errors
    /// - `UnknownModel` when `model` is not registered.
    /// - `Validation(DuplicateHook)` when the slot is already taken.
    pub fn register<F>(
        &mut self,
        registry: &SchemaRegistry,
        model: &str,
        point: HookPoint,
        hook: F,
    ) -> OrmResult<()>
    where
        F: Fn(&mut Record) -> Result<(), HookFailure> + Send + Sync + 'static,
    {
        registry.lookup(model)?;

        let key = (model.to_string(), point);
        if self.hooks.contains_key(&key) {
            return Err(ValidationError::new(model, ValidationErrorKind::DuplicateHook(point)).into());
        }

        debug!("event=hook_register module=hooks status=ok model={model} point={point}");
        self.hooks.insert(key, Arc::new(hook));
        Ok(())
    }

    pub fn has_hook(&self, model: &str, point: HookPoint) -> bool {
        self.hooks.contains_key(&(model.to_string(), point))
    }

    /// Runs the hook for `(model, point)`, if any.
    pub fn dispatch(&self, point: HookPoint, record: &mut Record) -> OrmResult<()> {
        let Some(hook) = self.hooks.get(&(record.model().to_string(), point)) else {
            return Ok(());
        };

        hook(record).map_err(|source| {
            warn!(
                "event=hook_failed module=hooks status=error model={} point={} mutation_applied={}",
                record.model(),
                point,
                !point.is_before()
            );
            OrmError::Hook {
                model: record.model().to_string(),
                point,
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{HookDispatcher, HookFailure, HookPoint};
    use crate::error::{OrmError, ValidationErrorKind};
    use crate::model::descriptor::ModelDescriptor;
    use crate::model::record::Record;
    use crate::schema::registry::SchemaRegistry;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry
            .register(ModelDescriptor::builder("User").build())
            .unwrap();
        registry
    }

    #[test]
    fn second_hook_for_same_point_is_rejected() {
        let registry = registry();
        let mut hooks = HookDispatcher::new();
        hooks
            .register(&registry, "User", HookPoint::BeforeCreate, |_| Ok(()))
            .unwrap();
        let err = hooks
            .register(&registry, "User", HookPoint::BeforeCreate, |_| Ok(()))
            .unwrap_err();
        assert!(matches!(
            err,
            OrmError::Validation(ref v)
                if v.kind == ValidationErrorKind::DuplicateHook(HookPoint::BeforeCreate)
        ));
        assert!(hooks.has_hook("User", HookPoint::BeforeCreate));
        assert!(!hooks.has_hook("User", HookPoint::AfterCreate));
    }

    #[test]
    fn unknown_model_cannot_get_hooks() {
        let mut hooks = HookDispatcher::new();
        let err = hooks
            .register(&registry(), "Ghost", HookPoint::AfterDelete, |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, OrmError::UnknownModel { ref model } if model == "Ghost"));
    }

    #[test]
    fn failure_is_tagged_with_model_and_point() {
        let registry = registry();
        let mut hooks = HookDispatcher::new();
        hooks
            .register(&registry, "User", HookPoint::BeforeUpdate, |_| {
                Err(HookFailure::from("name is locked"))
            })
            .unwrap();

        let mut record = Record::new("User");
        let err = hooks
            .dispatch(HookPoint::BeforeUpdate, &mut record)
            .unwrap_err();
        match err {
            OrmError::Hook {
                model,
                point,
                source,
            } => {
                assert_eq!(model, "User");
                assert_eq!(point, HookPoint::BeforeUpdate);
                assert_eq!(source.to_string(), "name is locked");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
