//! Resource streaming and pipeline state compilation core for renderers. This crate re-exports
//! the individual kiln crates behind features.

pub use kiln_api as api;
pub use kiln_base as base;

#[cfg(feature = "framework")]
pub use kiln_framework as framework;

#[cfg(feature = "assets")]
pub use kiln_assets as assets;

#[cfg(feature = "renderer")]
pub use kiln_renderer as renderer;
