//! Error taxonomy shared by the orchestrators.

use std::path::PathBuf;
use thiserror::Error;

/// Input problems detected before the engine is touched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("contrast_image1 is required")]
    MissingPrimaryContrast,

    #[error("if specifying contrast_image{index}, please also specify contrast_type{index}")]
    MissingContrastType { index: usize },

    #[error(
        "{kind} is not a valid contrast type for contrast_type{index}, please choose from the \
         following contrasts provided by the chosen atlas: {}",
        valid.join(", ")
    )]
    UnknownContrastType {
        kind: String,
        index: usize,
        valid: Vec<String>,
    },

    #[error("input volume must be either a path to a NIfTI file or an in-memory volume, got {0}")]
    InvalidVolumeInput(String),

    #[error("no file_name was given and none can be derived from an in-memory input")]
    MissingFileName,

    #[error("volume must be at least 3-dimensional, got shape {0:?}")]
    NotVolumetric(Vec<usize>),

    #[error("volume shape {found:?} does not match the reference shape {expected:?}")]
    ShapeMismatch {
        expected: [usize; 3],
        found: Vec<usize>,
    },

    #[error("unknown topology '{0}', expected one of wcs, wco, 6/18, 6/26, 18/6, 26/6, no")]
    UnknownTopology(String),
}

/// Failures while turning an affine or axis code into the engine orientation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrientationError {
    #[error("axis code '{code}' has no letter for the {pair} axis pair")]
    MissingAxisPair { code: String, pair: &'static str },

    #[error("'{0}' is not an axis letter (expected one of L, R, A, P, I, S)")]
    InvalidLetter(char),

    #[error("axis code must have exactly 3 letters, got '{0}'")]
    BadLength(String),

    #[error("affine column {0} is degenerate and has no dominant world axis")]
    DegenerateAxis(usize),
}

/// Errors surfaced by the external engine or its runtime.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("engine runtime is already initialized")]
    AlreadyInitialized,

    #[error("engine runtime failed to start: {0}")]
    Runtime(String),

    #[error("the underlying engine did not execute cleanly: {0}")]
    Execution(String),

    #[error("engine returned {found} values for '{output}', expected {expected}")]
    BufferLength {
        output: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Problems decoding or encoding a NIfTI-1 file.
#[derive(Error, Debug)]
pub enum NiftiError {
    #[error("not a NIfTI-1 file (sizeof_hdr = {0})")]
    BadHeaderSize(i32),

    #[error("bad NIfTI magic {0:?}")]
    BadMagic([u8; 4]),

    #[error("unsupported NIfTI datatype code {0}")]
    UnsupportedDatatype(i16),

    #[error("file truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("vox_offset {0} does not point inside the file")]
    BadVoxOffset(f32),

    #[error("volume too large for NIfTI-1: {0}")]
    Oversized(String),

    #[error("volumes with {0} dimensions cannot be stored")]
    BadRank(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Orientation(#[from] OrientationError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Nifti(#[from] NiftiError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("time log error: {0}")]
    TimeLog(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
