//! Native boundary for the AprilTag engine.
//!
//! This crate is the only place that touches foreign memory directly:
//! - `#[repr(C)]` mirrors of the engine's structures ([`layout`]),
//! - the entry-point table and library resolution ([`RawApi`], [`Engine`]),
//! - ownership-tagged handles that release each allocation exactly once
//!   ([`Owned`], [`Borrowed`]),
//! - zero-copy views over engine buffers ([`ImageView`], [`MatrixView`], ...).
//!
//! It does **not** know about detections as values or about configuration;
//! those live in `tagscope-core` and `tagscope-detector`.

mod api;
mod error;
mod handle;
pub mod layout;
mod library;
mod view;

pub use api::RawApi;
pub use error::EngineError;
pub use handle::{
    Borrowed, DetectionsKind, DetectorKind, FamilyKind, FamilyListKind, ForeignKind, ImageKind,
    MatrixKind, Owned,
};
pub use library::{
    library_file_name, Engine, EngineOrigin, SearchPaths, LIBRARY_BASE_NAME, LIBRARY_PATH_ENV,
};
pub use view::{ArrayView, ImageView, ImageViewMut, MatrixView, MatrixViewMut};
