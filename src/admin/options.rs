use crate::storage::DbOptions;

/// Common options used when opening a database for administrative commands.
#[derive(Clone, Debug)]
pub struct AdminOpenOptions {
    /// Options passed through to [`crate::storage::Lowlevel::open`]; the path
    /// is taken from the command instead.
    pub db: DbOptions,
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for AdminOpenOptions {
    fn default() -> Self {
        Self {
            db: DbOptions::default(),
            create_if_missing: false,
        }
    }
}

impl AdminOpenOptions {
    /// Options that leave the stored schema untouched, for read-only inspection.
    pub fn inspect() -> Self {
        Self {
            db: DbOptions::default().migrate_on_open(false).repair_on_load(false),
            create_if_missing: false,
        }
    }
}
