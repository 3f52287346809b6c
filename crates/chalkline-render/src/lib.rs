//! Chalkline Render Library
//!
//! Per-tool stroke compositing behind the [`Renderer`] trait.
//! The default implementation rasterizes on the CPU with tiny-skia.

mod renderer;

#[cfg(feature = "skia-renderer")]
mod skia_impl;

pub use renderer::{
    Composite, GRID_COLOR, GRID_SPACING, GridStyle, RenderResult, Renderer, RendererError, ToolStyle,
};

#[cfg(feature = "skia-renderer")]
pub use skia_impl::{PixmapSurface, flatten, paint_background};
