//! The data-management record of a CASA table.
//!
//! The table system describes how each column is stored with a record of data
//! managers, keyed `*1`, `*2`, and so on. A tiled image has one tiled storage
//! manager holding a single hypercube; that hypercube's cube shape, tile shape
//! and bucket size are all that's needed to find every pixel in the payload
//! file.

mod error;
mod image_info;

pub use error::MetadataError;
pub use image_info::{Beam, BeamInfo, ImageInfo, Quantity};

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use itertools::Itertools;
use log::{debug, trace};
use serde::Deserialize;

/// Data managers that store their column as a hypercube of tiles.
const TILED_MANAGERS: [&str; 4] = [
    "TiledShapeStMan",
    "TiledCellStMan",
    "TiledColumnStMan",
    "TiledDataStMan",
];

/// Everything the table reports about itself that we use: the data-management
/// info and the table keywords.
#[derive(Debug, Clone, Deserialize)]
pub struct TableRecord {
    pub dminfo: BTreeMap<String, DataManagerRecord>,

    #[serde(default)]
    pub keywords: KeywordsRecord,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataManagerRecord {
    #[serde(rename = "TYPE")]
    pub dm_type: String,

    #[serde(rename = "NAME", default)]
    pub name: String,

    /// Used to build the payload file name (`table.f<SEQNR>_TSM0`).
    #[serde(rename = "SEQNR", default)]
    pub seqnr: u32,

    #[serde(rename = "COLUMNS", default)]
    pub columns: Vec<String>,

    #[serde(rename = "SPEC")]
    pub spec: Option<DataManagerSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataManagerSpec {
    #[serde(rename = "DEFAULTTILESHAPE")]
    pub default_tile_shape: Option<Vec<usize>>,

    #[serde(rename = "MAXIMUMCACHESIZE")]
    pub maximum_cache_size: Option<u64>,

    #[serde(rename = "HYPERCUBES", default)]
    pub hypercubes: BTreeMap<String, HypercubeRecord>,
}

/// One hypercube of a tiled storage manager. All shapes are in storage
/// (Fortran) axis order.
#[derive(Debug, Clone, Deserialize)]
pub struct HypercubeRecord {
    #[serde(rename = "CubeShape")]
    pub cube_shape: Vec<usize>,

    #[serde(rename = "TileShape")]
    pub tile_shape: Option<Vec<usize>>,

    #[serde(rename = "CellShape")]
    pub cell_shape: Option<Vec<usize>>,

    #[serde(rename = "BucketSize")]
    pub bucket_size: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeywordsRecord {
    pub units: Option<String>,
    pub imageinfo: Option<ImageInfoRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageInfoRecord {
    pub restoringbeam: Option<RestoringBeamRecord>,
}

/// The table system writes either one beam for the whole image, or a beam per
/// (channel, Stokes) plane.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RestoringBeamRecord {
    Single(BeamRecord),

    PerPlane {
        beams: BTreeMap<String, BTreeMap<String, BeamRecord>>,
        #[serde(rename = "nChannels")]
        n_channels: usize,
        #[serde(rename = "nStokes")]
        n_stokes: usize,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeamRecord {
    pub major: QuantityRecord,
    pub minor: QuantityRecord,
    pub positionangle: QuantityRecord,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuantityRecord {
    pub value: f64,
    pub unit: String,
}

/// The parts of the tiled storage manager the geometry is derived from.
#[derive(Debug, Clone, Copy)]
pub struct TiledCube<'a> {
    pub manager: &'a str,
    pub seqnr: u32,
    pub default_tile_shape: Option<&'a [usize]>,
    pub hypercube: &'a HypercubeRecord,
}

impl TableRecord {
    /// Find the first tiled storage manager (ordered by its `*N` key) and its
    /// first hypercube.
    pub fn tiled_cube(&self, table: &Path) -> Result<TiledCube<'_>, MetadataError> {
        let tiled: Vec<&DataManagerRecord> = sorted_by_star_key(&self.dminfo)
            .into_iter()
            .map(|(_, dm)| dm)
            .filter(|dm| TILED_MANAGERS.contains(&dm.dm_type.as_str()))
            .collect();
        let first = *tiled
            .first()
            .ok_or_else(|| MetadataError::NoTiledDataManager(table.to_path_buf()))?;
        // Prefer a manager that actually holds a hypercube.
        let manager = tiled
            .iter()
            .copied()
            .find(|dm| dm.spec.as_ref().map_or(false, |s| !s.hypercubes.is_empty()))
            .ok_or_else(|| MetadataError::NoHypercube(first.name.clone()))?;
        trace!(
            "Using data manager '{}' ({}) for columns {:?}",
            manager.name,
            manager.dm_type,
            manager.columns
        );

        let spec = manager
            .spec
            .as_ref()
            .ok_or_else(|| MetadataError::NoHypercube(manager.name.clone()))?;
        let (key, hypercube) = sorted_by_star_key(&spec.hypercubes)
            .into_iter()
            .next()
            .ok_or_else(|| MetadataError::NoHypercube(manager.name.clone()))?;
        if spec.hypercubes.len() > 1 {
            debug!(
                "Data manager '{}' has {} hypercubes; using {key}",
                manager.name,
                spec.hypercubes.len()
            );
        }

        Ok(TiledCube {
            manager: &manager.dm_type,
            seqnr: manager.seqnr,
            default_tile_shape: spec.default_tile_shape.as_deref(),
            hypercube,
        })
    }
}

/// Record keys look like `*1`, `*2`, ..., `*10`; order them numerically rather
/// than lexically. Keys that aren't numbered go last.
fn sorted_by_star_key<V>(map: &BTreeMap<String, V>) -> Vec<(&str, &V)> {
    map.iter()
        .map(|(k, v)| (k.as_str(), v))
        .sorted_by_key(|(k, _)| star_index(k).unwrap_or(usize::MAX))
        .collect()
}

pub(crate) fn star_index(key: &str) -> Option<usize> {
    key.strip_prefix('*')?.parse().ok()
}

/// Either something usable, or the reason it isn't.
#[derive(Debug, Clone)]
pub enum Capability<T> {
    Available(T),
    Unavailable(String),
}

impl<T> Capability<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Capability::Available(_))
    }

    pub fn available(self) -> Option<T> {
        match self {
            Capability::Available(t) => Some(t),
            Capability::Unavailable(_) => None,
        }
    }
}

/// The encodings a data-management record may be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    #[cfg(feature = "json")]
    Json,

    #[cfg(feature = "yaml")]
    Yaml,
}

impl RecordFormat {
    pub fn file_name(self) -> &'static str {
        match self {
            #[cfg(feature = "json")]
            RecordFormat::Json => "table.dminfo.json",
            #[cfg(feature = "yaml")]
            RecordFormat::Yaml => "table.dminfo.yaml",
        }
    }

    fn decode<R: Read>(self, reader: R, path: &Path) -> Result<TableRecord, MetadataError> {
        match self {
            #[cfg(feature = "json")]
            RecordFormat::Json => {
                serde_json::from_reader(reader).map_err(|source| MetadataError::Json {
                    path: path.to_path_buf(),
                    source,
                })
            }
            #[cfg(feature = "yaml")]
            RecordFormat::Yaml => {
                serde_yaml::from_reader(reader).map_err(|source| MetadataError::Yaml {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
}

/// Reads data-management records with whichever decoders were compiled in.
/// Discover one with [`MetadataReader::discover`] and hand it to anything that
/// opens a table.
#[derive(Debug, Clone)]
pub struct MetadataReader {
    formats: Vec<RecordFormat>,
}

impl MetadataReader {
    #[allow(unused_mut)]
    pub fn discover() -> Capability<MetadataReader> {
        let mut formats = Vec::new();
        #[cfg(feature = "json")]
        formats.push(RecordFormat::Json);
        #[cfg(feature = "yaml")]
        formats.push(RecordFormat::Yaml);

        if formats.is_empty() {
            Capability::Unavailable(
                "casa_tiles was built without the 'json' or 'yaml' features".to_string(),
            )
        } else {
            debug!("Data-management record formats: {formats:?}");
            Capability::Available(MetadataReader { formats })
        }
    }

    pub fn formats(&self) -> &[RecordFormat] {
        &self.formats
    }

    /// Does `table` contain a record this reader can decode?
    pub fn has_record(&self, table: &Path) -> bool {
        self.formats
            .iter()
            .any(|f| table.join(f.file_name()).is_file())
    }

    pub fn read(&self, table: &Path) -> Result<TableRecord, MetadataError> {
        for format in &self.formats {
            let path = table.join(format.file_name());
            if !path.is_file() {
                continue;
            }
            debug!("Reading data-management record {}", path.display());
            let file = File::open(&path).map_err(|source| MetadataError::Io {
                path: path.clone(),
                source,
            })?;
            return format.decode(BufReader::new(file), &path);
        }

        Err(MetadataError::NoRecord(
            table.to_path_buf(),
            self.formats.iter().map(|f| f.file_name()).join(", "),
        ))
    }
}
