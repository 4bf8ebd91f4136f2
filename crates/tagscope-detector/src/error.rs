use tagscope_core::{CameraParamsError, ImageError};
use tagscope_ffi::EngineError;

use crate::options::OptionsError;

#[derive(thiserror::Error, Debug)]
pub enum DetectError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Options(#[from] OptionsError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    CameraParams(#[from] CameraParamsError),

    #[error("tag size must be positive and finite, got {0}")]
    InvalidTagSize(f64),

    #[error("{width}x{height} image exceeds the engine's raster limits")]
    ImageTooLarge { width: usize, height: usize },

    #[error("engine returned a {rows}x{cols} {what}, expected {expected}")]
    UnexpectedShape {
        what: &'static str,
        rows: usize,
        cols: usize,
        expected: &'static str,
    },

    #[error("detector has been destroyed")]
    Destroyed,
}
