//! Local caching module for offline crag access.
//!
//! Two independent stores back the offline mode:
//!
//! - `LocalStore`: a versioned SQLite database with three collections
//!   (crag metadata, crag records, images indexed by crag id)
//! - `AssetCache`: whole HTTP responses (photos, tiles, map screenshots)
//!   keyed by request URL
//!
//! Both are soft-fail: reads return `None` and writes return `false` when
//! something goes wrong, after logging the cause.

pub mod assets;
pub mod local_store;

pub use assets::{AssetCache, CachedResponse};
pub use local_store::{LocalStore, SharedStore, StoreError, SCHEMA_VERSION};
