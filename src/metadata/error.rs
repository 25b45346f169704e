//! Errors associated with reading a table's data-management record.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("No data-management record found in {0}; looked for {1}")]
    NoRecord(PathBuf, String),

    #[error("Couldn't read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[cfg(feature = "json")]
    #[error("Couldn't decode JSON record {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[cfg(feature = "yaml")]
    #[error("Couldn't decode YAML record {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("The record in {0} doesn't describe a tiled storage manager")]
    NoTiledDataManager(PathBuf),

    #[error("Data manager '{0}' declares no hypercubes")]
    NoHypercube(String),

    #[error("Restoring beams with {0} Stokes planes aren't supported")]
    MultiStokesBeams(usize),

    #[error("Restoring beam record claims {expected} channels but has {got} beams")]
    BeamCountMismatch { expected: usize, got: usize },

    #[error("Couldn't parse restoring beam key '{0}' as a plane index")]
    BadBeamKey(String),
}
