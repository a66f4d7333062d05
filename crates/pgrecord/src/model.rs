//! Lifecycle hooks for records, and the table → model registry.
//!
//! A model is any [`ModelHooks`] implementation registered for a table. Records created
//! by a [`Database`](crate::Database) for that table carry the hooks and run them around
//! `save`, `save_all` and `destroy`. Every hook defaults to "pass"; returning `false`
//! aborts the remaining sequence and the operation reports `Ok(false)`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::inflect::singularize;
use crate::record::ActiveRecord;

/// Whether a save inserts a new row or updates an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Update,
}

/// Named extension points around persistence.
#[allow(unused_variables)]
pub trait ModelHooks: Send + Sync {
    fn validate(&self, record: &mut ActiveRecord) -> bool {
        true
    }

    fn validate_insert(&self, record: &mut ActiveRecord) -> bool {
        true
    }

    fn validate_update(&self, record: &mut ActiveRecord) -> bool {
        true
    }

    fn on_before_save(&self, record: &mut ActiveRecord) -> bool {
        true
    }

    fn on_before_insert(&self, record: &mut ActiveRecord) -> bool {
        true
    }

    fn on_before_update(&self, record: &mut ActiveRecord) -> bool {
        true
    }

    fn on_after_save(&self, record: &mut ActiveRecord) -> bool {
        true
    }

    fn on_after_insert(&self, record: &mut ActiveRecord) -> bool {
        true
    }

    fn on_after_update(&self, record: &mut ActiveRecord) -> bool {
        true
    }

    fn on_before_destroy(&self, record: &mut ActiveRecord) -> bool {
        true
    }

    fn on_after_destroy(&self, record: &mut ActiveRecord) -> bool {
        true
    }
}

/// One extension point of [`ModelHooks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Validate,
    ValidateInsert,
    ValidateUpdate,
    BeforeSave,
    BeforeInsert,
    BeforeUpdate,
    AfterSave,
    AfterInsert,
    AfterUpdate,
    BeforeDestroy,
    AfterDestroy,
}

impl Hook {
    /// Hooks run before the row is written by `save`: validation first.
    pub fn before_save(kind: WriteKind) -> [Hook; 4] {
        match kind {
            WriteKind::Insert => [
                Hook::ValidateInsert,
                Hook::Validate,
                Hook::BeforeInsert,
                Hook::BeforeSave,
            ],
            WriteKind::Update => [
                Hook::ValidateUpdate,
                Hook::Validate,
                Hook::BeforeUpdate,
                Hook::BeforeSave,
            ],
        }
    }

    /// Hooks run before `save_all` cascades: before-hooks first, then validation.
    pub fn before_save_all(kind: WriteKind) -> [Hook; 4] {
        match kind {
            WriteKind::Insert => [
                Hook::BeforeInsert,
                Hook::BeforeSave,
                Hook::ValidateInsert,
                Hook::Validate,
            ],
            WriteKind::Update => [
                Hook::BeforeUpdate,
                Hook::BeforeSave,
                Hook::ValidateUpdate,
                Hook::Validate,
            ],
        }
    }

    /// Hooks run after a successful write.
    pub fn after_save(kind: WriteKind) -> [Hook; 2] {
        match kind {
            WriteKind::Insert => [Hook::AfterInsert, Hook::AfterSave],
            WriteKind::Update => [Hook::AfterUpdate, Hook::AfterSave],
        }
    }

    pub fn invoke(self, hooks: &dyn ModelHooks, record: &mut ActiveRecord) -> bool {
        match self {
            Hook::Validate => hooks.validate(record),
            Hook::ValidateInsert => hooks.validate_insert(record),
            Hook::ValidateUpdate => hooks.validate_update(record),
            Hook::BeforeSave => hooks.on_before_save(record),
            Hook::BeforeInsert => hooks.on_before_insert(record),
            Hook::BeforeUpdate => hooks.on_before_update(record),
            Hook::AfterSave => hooks.on_after_save(record),
            Hook::AfterInsert => hooks.on_after_insert(record),
            Hook::AfterUpdate => hooks.on_after_update(record),
            Hook::BeforeDestroy => hooks.on_before_destroy(record),
            Hook::AfterDestroy => hooks.on_after_destroy(record),
        }
    }
}

/// Run `sequence` in order, stopping at the first hook that returns `false`.
pub(crate) fn run_hooks(hooks: &dyn ModelHooks, sequence: &[Hook], record: &mut ActiveRecord) -> bool {
    for hook in sequence {
        if !hook.invoke(hooks, record) {
            tracing::debug!(target: "pgrecord.record", table = record.table(), ?hook, "hook rejected operation");
            return false;
        }
    }
    true
}

type ModelFactory = Box<dyn Fn() -> Arc<dyn ModelHooks> + Send + Sync>;

/// Maps table names to model constructors.
///
/// Tables without an entry get plain records with no hooks.
#[derive(Default)]
pub struct ModelRegistry {
    factories: HashMap<String, ModelFactory>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `table`'s model. Either the table name or its singular
    /// form (`books` or `book`) may be used.
    pub fn register<F>(&mut self, table: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn ModelHooks> + Send + Sync + 'static,
    {
        self.factories.insert(table.into(), Box::new(factory));
    }

    /// Register a `Default`-constructible model type for `table`.
    pub fn register_model<M>(&mut self, table: impl Into<String>)
    where
        M: ModelHooks + Default + 'static,
    {
        self.register(table, || Arc::new(M::default()) as Arc<dyn ModelHooks>);
    }

    pub fn contains(&self, table: &str) -> bool {
        self.factory(table).is_some()
    }

    /// A fresh hooks instance for `table`, if a model is registered.
    pub fn hooks_for(&self, table: &str) -> Option<Arc<dyn ModelHooks>> {
        self.factory(table).map(|factory| factory())
    }

    fn factory(&self, table: &str) -> Option<&ModelFactory> {
        self.factories
            .get(table)
            .or_else(|| self.factories.get(&singularize(table)))
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tables: Vec<_> = self.factories.keys().collect();
        tables.sort();
        f.debug_struct("ModelRegistry").field("tables", &tables).finish()
    }
}
