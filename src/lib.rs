//! Incremental renderer for precompiled paginated vector documents.
//!
//! A [`session::RenderSession`] owns one document's state inside a
//! native rendering kernel; a [`view::DocumentView`] mounts it against
//! a host surface and keeps the per-page layer triples (raster, text
//! selection, annotations) consistent as the artifact mutates and the
//! viewport moves.

pub mod anchors;
pub mod cache;
pub mod clock;
pub mod engine;
pub mod geometry;
pub mod kernel;
pub mod layers;
pub mod pipeline;
pub mod resources;
pub mod session;
pub mod task;
pub mod types;
pub mod view;

pub mod test_utils;

pub use engine::HostGeometry;
pub use kernel::{Kernel, KernelFault, MutateAction, RepaintStage, SessionHandle};
pub use pipeline::RenderError;
pub use session::{RenderSession, SessionError};
pub use view::{AnnotationTarget, DocumentView, MountOptions};
