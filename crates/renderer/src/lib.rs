//! Renderer crate for ParticlePaper.
//!
//! The crate glues the settings streams, background image loading and the
//! particle field together behind a per-surface render loop. The overall flow
//! is:
//!
//! ```text
//!   SettingsSource ──▶ EngineEvent ─┐
//!   ImageLoader ─────▶ EngineEvent ─┤
//!                                   ▼
//!   RenderLoopEngine::run_pending ──▶ draw() ──▶ SurfaceFrame ──▶ Canvas
//!          ▲                             │
//!          └──── TaskQueue (frame_delay) ┘
//! ```
//!
//! `RenderLoopEngine` owns the lifecycle and cadence, `ParticleField` owns the
//! simulation, and a `PresentationSurface` hands out the canvas each frame is
//! painted on. `SoftwareSurface` is the in-memory implementation used by the
//! CLI and the tests.

mod engine;
mod loader;
mod particles;
mod runtime;
mod surface;

pub use engine::RenderLoopEngine;
pub use loader::{
    load_center_cropped, uri_to_path, BackgroundImageLoader, ImageRequest, InlineImageLoader,
    LoadError, LoadReply, ThreadedImageLoader,
};
pub use particles::{resolve_line_color, Bounds, Particle, ParticleField, ParticleSimulator};
pub use runtime::{BoxedTimeSource, SteppedTimeSource, SystemTimeSource, TimeSource};
pub use surface::{Bitmap, Canvas, PresentationSurface, SoftwareSurface, SurfaceFrame};
