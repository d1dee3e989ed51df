mod versioned_schema;

pub use versioned_schema::*;

/// Offset added to schema versions stored in `PRAGMA user_version`, so that a
/// foreign database is never mistaken for one of ours.
pub const BASE_DB_VERSION: usize = 7000;
