//! Shared render backend API for Probelite.
//! Defines Extract types and the RenderBackend trait so the host can drive the
//! GPU or CPU probe-field backend through the same code path (prepare + render_frame).

mod extract;
mod backend;

pub use extract::{Camera, ExtractedMesh, ExtractedMeshes, ExtractedView, Light, VERTEX_STRIDE};
pub use backend::{RenderBackend, RenderBackendWindow};
pub use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
