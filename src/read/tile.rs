//! Reading single tiles from the payload file.
//!
//! A tile is read by opening the payload, seeking to the tile's offset, reading
//! exactly one tile's worth of bytes and closing the file again. No file handle
//! outlives a read, so an image with thousands of tiles never holds more than
//! one descriptor per reader.

use std::{
    fs::File,
    io::{ErrorKind, Read, Seek, SeekFrom},
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::trace;
use ndarray::prelude::*;

use super::{Element, ReadError, TileGeometry};

/// Reads tiles of `T` out of one payload file.
#[derive(Debug)]
pub struct TileAccessor<T> {
    payload: Arc<Path>,
    geometry: Arc<TileGeometry>,
    _element: PhantomData<fn() -> T>,
}

// Derived `Clone` would demand `T: Clone` for no reason.
impl<T> Clone for TileAccessor<T> {
    fn clone(&self) -> Self {
        TileAccessor {
            payload: Arc::clone(&self.payload),
            geometry: Arc::clone(&self.geometry),
            _element: PhantomData,
        }
    }
}

impl<T: Element> TileAccessor<T> {
    pub fn new(payload: PathBuf, geometry: Arc<TileGeometry>) -> TileAccessor<T> {
        TileAccessor {
            payload: payload.into(),
            geometry,
            _element: PhantomData,
        }
    }

    pub fn geometry(&self) -> &TileGeometry {
        &self.geometry
    }

    pub fn payload(&self) -> &Path {
        &self.payload
    }

    pub fn offset_of(&self, tile_index: usize) -> u64 {
        self.geometry.tile_offset(tile_index)
    }

    /// The tile's values as stored, i.e. Fortran order over the storage tile
    /// shape.
    pub fn read_raw(&self, tile_index: usize) -> Result<Vec<T>, ReadError> {
        let mut file = open_payload(&self.payload)?;
        read_tile_values(&mut file, &self.payload, &self.geometry, tile_index)
    }

    /// The tile in logical axis order (the storage tile shape reversed).
    pub fn read(&self, tile_index: usize) -> Result<ArrayD<T>, ReadError> {
        let values = self.read_raw(tile_index)?;
        let tile = ArrayD::from_shape_vec(IxDyn(&self.geometry.tile_shape).f(), values)?;
        Ok(tile.reversed_axes())
    }

    /// A tile that hasn't been read yet.
    pub fn handle(&self, tile_index: usize) -> TileHandle<T> {
        TileHandle {
            accessor: self.clone(),
            index: tile_index,
        }
    }
}

/// A reference to a tile. Nothing is read until [`TileHandle::read`].
#[derive(Debug, Clone)]
pub struct TileHandle<T> {
    accessor: TileAccessor<T>,
    index: usize,
}

impl<T: Element> TileHandle<T> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn offset(&self) -> u64 {
        self.accessor.offset_of(self.index)
    }

    pub fn read(&self) -> Result<ArrayD<T>, ReadError> {
        self.accessor.read(self.index)
    }
}

pub(crate) fn open_payload(path: &Path) -> Result<File, ReadError> {
    File::open(path).map_err(|e| ReadError::io(path, e))
}

/// Read one tile's values from an already-open payload.
pub(crate) fn read_tile_values<T: Element>(
    file: &mut File,
    path: &Path,
    geometry: &TileGeometry,
    tile_index: usize,
) -> Result<Vec<T>, ReadError> {
    let offset = geometry.tile_offset(tile_index);
    trace!("Reading tile {tile_index} at byte offset {offset}");

    let mut bytes = vec![0; geometry.tile_bytes()];
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| ReadError::io(path, e))?;
    file.read_exact(&mut bytes).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => ReadError::TruncatedTile {
            path: path.to_path_buf(),
            index: tile_index,
            offset,
        },
        _ => ReadError::io(path, e),
    })?;

    Ok(T::decode(&bytes))
}

/// The single value of a scalar-broadcast payload; its first element.
pub(crate) fn read_scalar<T: Element>(path: &Path) -> Result<T, ReadError> {
    let mut file = open_payload(path)?;
    let mut bytes = vec![0; T::SIZE];
    file.read_exact(&mut bytes).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => ReadError::TruncatedTile {
            path: path.to_path_buf(),
            index: 0,
            offset: 0,
        },
        _ => ReadError::io(path, e),
    })?;
    let value = T::decode(&bytes)[0];
    trace!("Scalar-broadcast value: {value:?}");
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{write_tiled_payload, TempStore};

    #[test]
    fn test_tiles_are_logically_ordered() {
        // Storage shape (4, 2): two tiles of (2, 2).
        let geometry = Arc::new(TileGeometry::new(vec![4, 2], vec![2, 2], 16, 4).unwrap());
        let logical = Array::from_shape_vec((2, 4), (0..8).map(|v| v as f32).collect())
            .unwrap()
            .into_dyn();
        let store = TempStore::new();
        let payload = store.path().join("table.f0_TSM0");
        write_tiled_payload(&payload, &geometry, &logical);

        let accessor = TileAccessor::<f32>::new(payload, geometry);
        assert_eq!(accessor.offset_of(1), 16);

        // Raw values are Fortran-ordered over the storage tile shape.
        assert_eq!(accessor.read_raw(0).unwrap(), [0.0, 1.0, 4.0, 5.0]);

        let tile0 = accessor.read(0).unwrap();
        assert_eq!(tile0, logical.slice(s![.., 0..2]).into_dyn());
        let tile1 = accessor.handle(1).read().unwrap();
        assert_eq!(tile1, logical.slice(s![.., 2..4]).into_dyn());
    }

    #[test]
    fn test_truncated_payload() {
        let geometry = Arc::new(TileGeometry::new(vec![4, 2], vec![2, 2], 16, 4).unwrap());
        let store = TempStore::new();
        let payload = store.path().join("table.f0_TSM0");
        std::fs::write(&payload, [0u8; 20]).unwrap();

        let accessor = TileAccessor::<f32>::new(payload, geometry);
        assert!(accessor.read(0).is_ok());
        assert!(matches!(
            accessor.read(1),
            Err(ReadError::TruncatedTile {
                index: 1,
                offset: 16,
                ..
            })
        ));
    }

    #[test]
    fn test_missing_payload() {
        let geometry = Arc::new(TileGeometry::new(vec![4], vec![4], 16, 4).unwrap());
        let store = TempStore::new();
        let accessor = TileAccessor::<f32>::new(store.path().join("nope"), geometry);
        let result = accessor.read(0);
        assert!(matches!(result, Err(ReadError::NotFound(_))));
    }
}
