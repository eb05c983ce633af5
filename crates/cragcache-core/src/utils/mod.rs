//! Utility functions for string formatting and slugs.

pub mod format;
pub mod slug;

pub use format::{format_coordinates, truncate_string};
pub use slug::{make_unique_slug, slugify};
