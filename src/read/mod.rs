//! Code for reading tiled CASA images.
//!
//! An image directory holds a data-management record describing one tiled
//! hypercube, and a payload file of tiles. The same layout is repeated for the
//! (optional) mask in a sub-directory.

mod assemble;
mod error;
mod geometry;
mod region;
mod slice;
mod tile;

pub use assemble::{assemble, Chunk, LazyArray};
pub use error::ReadError;
pub use geometry::{GeometryError, TileGeometry};
pub use region::{get_chunk, AxisBounds, BoundsSpec};
pub use slice::{parse_region, AxisSlice, SliceError};
pub use tile::{TileAccessor, TileHandle};

use std::{
    fmt::Debug,
    path::{Path, PathBuf},
    sync::Arc,
};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};
use ndarray::ArrayD;

use crate::metadata::{ImageInfo, MetadataReader, TableRecord};

/// The sub-directory a CASA image keeps its default mask in.
pub const DEFAULT_MASK_NAME: &str = "mask0";

/// A type that can be stored in a payload file.
pub trait Element: Copy + Default + Send + Sync + Debug + 'static {
    /// Bytes per element on disk.
    const SIZE: usize;

    /// Decode `bytes` (a whole number of elements, little-endian).
    fn decode(bytes: &[u8]) -> Vec<Self>;
}

impl Element for f32 {
    const SIZE: usize = 4;

    fn decode(bytes: &[u8]) -> Vec<f32> {
        let mut values = vec![0.0; bytes.len() / Self::SIZE];
        LittleEndian::read_f32_into(&bytes[..values.len() * Self::SIZE], &mut values);
        values
    }
}

/// Mask elements; `true` means the pixel is valid.
impl Element for bool {
    const SIZE: usize = 1;

    fn decode(bytes: &[u8]) -> Vec<bool> {
        bytes.iter().map(|&b| b != 0).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOptions {
    /// Sub-directory of the image holding the mask.
    pub mask_name: String,
}

impl Default for ImageOptions {
    fn default() -> Self {
        ImageOptions {
            mask_name: DEFAULT_MASK_NAME.to_string(),
        }
    }
}

/// One table directory: the image itself, or its mask.
#[derive(Debug, Clone)]
pub struct SubStore<T> {
    dir: PathBuf,
    accessor: TileAccessor<T>,
}

impl<T: Element> SubStore<T> {
    pub fn open(dir: &Path, reader: &MetadataReader) -> Result<SubStore<T>, ReadError> {
        let record = read_record(dir, reader)?;
        SubStore::from_record(dir, &record)
    }

    fn from_record(dir: &Path, record: &TableRecord) -> Result<SubStore<T>, ReadError> {
        let cube = record.tiled_cube(dir)?;
        let geometry = TileGeometry::from_cube(&cube, T::SIZE)?;

        let payload = dir.join(format!("table.f{}_TSM0", cube.seqnr));
        let len = std::fs::metadata(&payload)
            .map_err(|e| ReadError::io(&payload, e))?
            .len();
        if len < geometry.payload_bytes() {
            return Err(GeometryError::PayloadTooShort {
                expected: geometry.payload_bytes(),
                got: len,
            }
            .into());
        }
        debug!("Payload {} ({len} bytes)", payload.display());

        Ok(SubStore {
            dir: dir.to_path_buf(),
            accessor: TileAccessor::new(payload, Arc::new(geometry)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn payload(&self) -> &Path {
        self.accessor.payload()
    }

    pub fn geometry(&self) -> &TileGeometry {
        self.accessor.geometry()
    }

    pub fn accessor(&self) -> &TileAccessor<T> {
        &self.accessor
    }

    /// The whole store as a lazy array. Nothing is read yet.
    pub fn read_full(&self) -> Result<LazyArray<T>, ReadError> {
        assemble(&self.accessor)
    }

    /// Read exactly `slices` (one per logical axis).
    pub fn read_region(&self, slices: &[AxisSlice]) -> Result<ArrayD<T>, ReadError> {
        region::read_region(&self.accessor, slices)
    }
}

fn read_record(dir: &Path, reader: &MetadataReader) -> Result<TableRecord, ReadError> {
    if !dir.is_dir() {
        return Err(ReadError::NotFound(dir.to_path_buf()));
    }
    Ok(reader.read(dir)?)
}

/// A CASA image on disk.
#[derive(Debug, Clone)]
pub struct CasaImage {
    data: SubStore<f32>,
    info: ImageInfo,
    options: ImageOptions,
    reader: MetadataReader,
}

impl CasaImage {
    pub fn open<P: AsRef<Path>>(path: P, reader: &MetadataReader) -> Result<CasaImage, ReadError> {
        CasaImage::open_with(path, reader, ImageOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(
        path: P,
        reader: &MetadataReader,
        options: ImageOptions,
    ) -> Result<CasaImage, ReadError> {
        let path = path.as_ref();
        let record = read_record(path, reader)?;
        let data = SubStore::from_record(path, &record)?;
        let info = ImageInfo::from_keywords(&record.keywords)?;
        info!(
            "Opened CASA image {} with shape {:?}",
            path.display(),
            data.geometry().logical_shape()
        );

        Ok(CasaImage {
            data,
            info,
            options,
            reader: reader.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        self.data.dir()
    }

    pub fn geometry(&self) -> &TileGeometry {
        self.data.geometry()
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn options(&self) -> &ImageOptions {
        &self.options
    }

    /// The logical shape.
    pub fn shape(&self) -> Vec<usize> {
        self.geometry().logical_shape()
    }

    pub fn read_full(&self) -> Result<LazyArray<f32>, ReadError> {
        self.data.read_full()
    }

    pub fn read_region(&self, slices: &[AxisSlice]) -> Result<ArrayD<f32>, ReadError> {
        self.data.read_region(slices)
    }

    fn mask_dir(&self) -> PathBuf {
        self.path().join(&self.options.mask_name)
    }

    pub fn has_mask(&self) -> bool {
        self.reader.has_record(&self.mask_dir())
    }

    /// Open the mask. [`ReadError::MaskNotFound`] if the image doesn't have
    /// one.
    pub fn open_mask(&self) -> Result<SubStore<bool>, ReadError> {
        if !self.has_mask() {
            return Err(ReadError::MaskNotFound {
                image: self.path().to_path_buf(),
                mask: self.options.mask_name.clone(),
            });
        }
        let mask = SubStore::<bool>::open(&self.mask_dir(), &self.reader)?;

        let mask_shape = mask.geometry().logical_shape();
        if mask_shape != self.shape() {
            return Err(ReadError::MaskShapeMismatch {
                image: self.shape(),
                mask: mask_shape,
            });
        }
        Ok(mask)
    }

    pub fn read_mask(&self) -> Result<LazyArray<bool>, ReadError> {
        self.open_mask()?.read_full()
    }

    pub fn read_mask_region(&self, slices: &[AxisSlice]) -> Result<ArrayD<bool>, ReadError> {
        self.open_mask()?.read_region(slices)
    }
}

/// Validate the image at `path` and return its layout.
pub fn open_geometry<P: AsRef<Path>>(
    path: P,
    reader: &MetadataReader,
) -> Result<TileGeometry, ReadError> {
    let store = SubStore::<f32>::open(path.as_ref(), reader)?;
    Ok(store.geometry().clone())
}

/// The whole image at `path`, read lazily.
pub fn read_full<P: AsRef<Path>>(
    path: P,
    reader: &MetadataReader,
) -> Result<LazyArray<f32>, ReadError> {
    SubStore::<f32>::open(path.as_ref(), reader)?.read_full()
}

/// The default mask of the image at `path`, read lazily.
pub fn read_mask<P: AsRef<Path>>(
    path: P,
    reader: &MetadataReader,
) -> Result<LazyArray<bool>, ReadError> {
    CasaImage::open(path, reader)?.read_mask()
}

/// Read exactly `slices` of the image at `path`.
pub fn read_region<P: AsRef<Path>>(
    path: P,
    reader: &MetadataReader,
    slices: &[AxisSlice],
) -> Result<ArrayD<f32>, ReadError> {
    SubStore::<f32>::open(path.as_ref(), reader)?.read_region(slices)
}
