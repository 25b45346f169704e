//! Errors associated with reading CASA images.

use std::path::PathBuf;

use thiserror::Error;

use super::{geometry::GeometryError, slice::SliceError};
use crate::metadata::MetadataError;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("File {0} not found")]
    NotFound(PathBuf),

    /// Masks are optional; callers may treat this as "no mask".
    #[error("CASA image {image} has no mask '{mask}'")]
    MaskNotFound { image: PathBuf, mask: String },

    #[error("Mask shape {mask:?} doesn't match the image shape {image:?}")]
    MaskShapeMismatch { image: Vec<usize>, mask: Vec<usize> },

    #[error("Couldn't read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} ends inside tile {index} (byte offset {offset})")]
    TruncatedTile {
        path: PathBuf,
        index: usize,
        offset: u64,
    },

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Slice(#[from] SliceError),

    #[error("Tile data didn't fit its shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl ReadError {
    /// Is this the store (or one of its sub-stores) being absent, rather than
    /// being malformed?
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ReadError::NotFound(_) | ReadError::MaskNotFound { .. }
        )
    }

    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> ReadError {
        if source.kind() == std::io::ErrorKind::NotFound {
            ReadError::NotFound(path.to_path_buf())
        } else {
            ReadError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}
