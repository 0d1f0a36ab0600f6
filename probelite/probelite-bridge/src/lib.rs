//! Probelite bridge: implements render_api::RenderBackend using probelite-renderer.

mod flatten;
mod plugin;
mod window_backend;

pub use flatten::{flatten_mesh, FlattenedMesh};
pub use plugin::ProbelitePlugin;
pub use window_backend::ProbeliteWindowBackend;
