//! Route-line rendering for photo overlays.

pub mod route_line;

pub use route_line::{render_path, stroke_width, RoutePreview};
