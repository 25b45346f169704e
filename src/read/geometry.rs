//! Where every tile lives in the payload file.

use log::{debug, warn};
use thiserror::Error;
use vec1::Vec1;

use crate::metadata::TiledCube;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GeometryError {
    #[error("Tile shape {tile:?} and cube shape {total:?} have different numbers of axes")]
    RankMismatch { tile: Vec<usize>, total: Vec<usize> },

    #[error("Shape {0:?} has a zero-length (or no) axis")]
    EmptyAxis(Vec<usize>),

    #[error("Cannot yet handle bucketsize={bucket} with totalsize={total_elements} and tilesize={tile_elements}")]
    UnsupportedBucketSize {
        bucket: usize,
        total_elements: usize,
        tile_elements: usize,
    },

    #[error("Cube shape {total:?} isn't a whole number of tiles of shape {tile:?}")]
    IrregularTiling { tile: Vec<usize>, total: Vec<usize> },

    #[error("A grid of {grid:?} tiles of shape {tile:?} doesn't cover the cube shape {total:?}")]
    GridMismatch {
        grid: Vec<usize>,
        tile: Vec<usize>,
        total: Vec<usize>,
    },

    #[error("Shape {0:?} has more elements than can be addressed")]
    TooLarge(Vec<usize>),

    #[error("Payload is {got} bytes, but the geometry needs {expected}")]
    PayloadTooShort { expected: u64, got: u64 },
}

impl GeometryError {
    /// Fatal errors say the store is corrupt rather than merely a layout we
    /// don't read.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GeometryError::GridMismatch { .. } | GeometryError::PayloadTooShort { .. }
        )
    }
}

/// The layout of a tiled hypercube. Shapes are in storage order (the first
/// axis varies fastest); logical shapes are the reverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGeometry {
    pub total_shape: Vec1<usize>,
    pub tile_shape: Vec1<usize>,
    pub element_size: usize,
    pub bucket_size: usize,

    /// The whole cube is a single value repeated.
    pub scalar_broadcast: bool,
}

impl TileGeometry {
    /// Validate a hypercube's declared layout for elements of `element_size`
    /// bytes.
    pub fn new(
        total_shape: Vec<usize>,
        tile_shape: Vec<usize>,
        bucket_size: usize,
        element_size: usize,
    ) -> Result<TileGeometry, GeometryError> {
        let total_shape = Vec1::try_from_vec(total_shape)
            .map_err(|_| GeometryError::EmptyAxis(vec![]))?;
        if total_shape.contains(&0) {
            return Err(GeometryError::EmptyAxis(total_shape.into_vec()));
        }
        let total_elements = checked_product(&total_shape)
            .filter(|&n| byte_count(n, element_size).is_some())
            .ok_or_else(|| GeometryError::TooLarge(total_shape.to_vec()))?;

        // The whole cube is one repeated value; the tile shape doesn't matter.
        if Some(bucket_size) == element_size.checked_mul(2) {
            debug!("Bucket size {bucket_size}: scalar broadcast over {total_shape:?}");
            if checked_product(&tile_shape) == Some(2) {
                warn!(
                    "Tile shape {tile_shape:?} also fits bucket size {bucket_size}; \
                     reading the cube as a single repeated value"
                );
            }
            return Ok(TileGeometry {
                tile_shape: total_shape.clone(),
                total_shape,
                element_size,
                bucket_size,
                scalar_broadcast: true,
            });
        }

        let tile_shape =
            Vec1::try_from_vec(tile_shape).map_err(|_| GeometryError::RankMismatch {
                tile: vec![],
                total: total_shape.to_vec(),
            })?;
        if tile_shape.len() != total_shape.len() {
            return Err(GeometryError::RankMismatch {
                tile: tile_shape.into_vec(),
                total: total_shape.into_vec(),
            });
        }
        if tile_shape.contains(&0) {
            return Err(GeometryError::EmptyAxis(tile_shape.into_vec()));
        }
        let tile_elements = checked_product(&tile_shape)
            .filter(|&n| byte_count(n, element_size).is_some())
            .ok_or_else(|| GeometryError::TooLarge(tile_shape.to_vec()))?;

        if Some(bucket_size) != byte_count(tile_elements, element_size)
            && Some(bucket_size) != byte_count(total_elements, element_size)
        {
            return Err(GeometryError::UnsupportedBucketSize {
                bucket: bucket_size,
                total_elements,
                tile_elements,
            });
        }

        if total_shape
            .iter()
            .zip(tile_shape.iter())
            .any(|(&total, &tile)| tile > total || total % tile != 0)
        {
            return Err(GeometryError::IrregularTiling {
                tile: tile_shape.into_vec(),
                total: total_shape.into_vec(),
            });
        }

        Ok(TileGeometry {
            total_shape,
            tile_shape,
            element_size,
            bucket_size,
            scalar_broadcast: false,
        })
    }

    pub(crate) fn from_cube(
        cube: &TiledCube,
        element_size: usize,
    ) -> Result<TileGeometry, GeometryError> {
        let tile_shape = cube
            .default_tile_shape
            .or(cube.hypercube.tile_shape.as_deref())
            .unwrap_or_default()
            .to_vec();
        debug!("Tile shape: {tile_shape:?}");
        debug!("Cube shape: {:?}", cube.hypercube.cube_shape);
        debug!("Bucket size: {}", cube.hypercube.bucket_size);
        TileGeometry::new(
            cube.hypercube.cube_shape.clone(),
            tile_shape,
            cube.hypercube.bucket_size,
            element_size,
        )
    }

    // Every product below is bounded by the total byte count, which `new`
    // checks fits in an `isize`.
    pub fn ndim(&self) -> usize {
        self.total_shape.len()
    }

    pub fn total_elements(&self) -> usize {
        self.total_shape.iter().product()
    }

    pub fn tile_elements(&self) -> usize {
        self.tile_shape.iter().product()
    }

    pub fn tile_bytes(&self) -> usize {
        self.tile_elements() * self.element_size
    }

    /// The number of tiles along each storage axis.
    pub fn stacks(&self) -> Vec<usize> {
        self.total_shape
            .iter()
            .zip(self.tile_shape.iter())
            .map(|(total, tile)| total / tile)
            .collect()
    }

    pub fn num_tiles(&self) -> usize {
        if self.scalar_broadcast {
            0
        } else {
            self.stacks().iter().product()
        }
    }

    /// The shape consumers see; the storage shape reversed.
    pub fn logical_shape(&self) -> Vec<usize> {
        self.total_shape.iter().rev().copied().collect()
    }

    pub fn logical_tile_shape(&self) -> Vec<usize> {
        self.tile_shape.iter().rev().copied().collect()
    }

    pub fn tile_offset(&self, tile_index: usize) -> u64 {
        tile_index as u64 * self.tile_bytes() as u64
    }

    /// The payload must hold at least this many bytes.
    pub fn payload_bytes(&self) -> u64 {
        if self.scalar_broadcast {
            self.element_size as u64
        } else {
            self.num_tiles() as u64 * self.tile_bytes() as u64
        }
    }

    /// Check that the tile grid covers the cube exactly.
    pub(crate) fn check_grid(&self) -> Result<(), GeometryError> {
        let grid = self.stacks();
        let covered = grid.iter().product::<usize>() * self.tile_elements();
        if self.scalar_broadcast || covered == self.total_elements() {
            Ok(())
        } else {
            Err(GeometryError::GridMismatch {
                grid,
                tile: self.tile_shape.to_vec(),
                total: self.total_shape.to_vec(),
            })
        }
    }

    /// Storage-order grid coordinates of a tile; the first axis varies
    /// fastest.
    pub fn tile_coords(&self, mut tile_index: usize) -> Vec<usize> {
        self.stacks()
            .into_iter()
            .map(|n| {
                let c = tile_index % n;
                tile_index /= n;
                c
            })
            .collect()
    }

    pub fn tile_index(&self, coords: &[usize]) -> usize {
        coords
            .iter()
            .zip(self.stacks())
            .rev()
            .fold(0, |acc, (&c, n)| acc * n + c)
    }
}

fn checked_product(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1_usize, |acc, &n| acc.checked_mul(n))
}

/// Bytes taken by `elements` elements, if that's addressable.
fn byte_count(elements: usize, element_size: usize) -> Option<usize> {
    elements
        .checked_mul(element_size)
        .filter(|&bytes| bytes <= isize::MAX as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_geometry() {
        let g = TileGeometry::new(vec![4, 4, 4], vec![2, 2, 2], 32, 4).unwrap();
        assert!(!g.scalar_broadcast);
        assert_eq!(g.stacks(), [2, 2, 2]);
        assert_eq!(g.num_tiles(), 8);
        assert_eq!(g.tile_bytes(), 32);
        assert_eq!(g.tile_offset(0), 0);
        assert_eq!(g.tile_offset(5), 160);
        assert_eq!(g.payload_bytes(), 256);
        assert!(g.check_grid().is_ok());
    }

    #[test]
    fn test_whole_cube_bucket_is_accepted() {
        let g = TileGeometry::new(vec![4, 4, 4], vec![2, 2, 2], 256, 4).unwrap();
        assert_eq!(g.num_tiles(), 8);
    }

    #[test]
    fn test_logical_shape_is_reversed() {
        let g = TileGeometry::new(vec![6, 4, 2], vec![3, 2, 1], 24, 4).unwrap();
        assert_eq!(g.logical_shape(), [2, 4, 6]);
        assert_eq!(g.logical_tile_shape(), [1, 2, 3]);
        assert_eq!(g.stacks(), [2, 2, 2]);
    }

    #[test]
    fn test_scalar_broadcast_sentinel() {
        let g = TileGeometry::new(vec![10, 20, 3], vec![5, 5, 1], 8, 4).unwrap();
        assert!(g.scalar_broadcast);
        assert_eq!(g.num_tiles(), 0);
        assert_eq!(g.payload_bytes(), 4);

        // Masks have 1-byte elements.
        let g = TileGeometry::new(vec![10, 20, 3], vec![5, 5, 1], 2, 1).unwrap();
        assert!(g.scalar_broadcast);
    }

    #[test]
    fn test_irregular_tiling_is_rejected() {
        // 5 isn't a multiple of 2, even though the bucket matches the tiles.
        let result = TileGeometry::new(vec![5, 4], vec![2, 2], 16, 4);
        assert!(matches!(result, Err(GeometryError::IrregularTiling { .. })));

        let result = TileGeometry::new(vec![2, 4], vec![4, 1], 16, 4);
        assert!(matches!(result, Err(GeometryError::IrregularTiling { .. })));
    }

    #[test]
    fn test_bad_bucket_size() {
        let result = TileGeometry::new(vec![4, 4], vec![2, 2], 12, 4);
        assert_eq!(
            result,
            Err(GeometryError::UnsupportedBucketSize {
                bucket: 12,
                total_elements: 16,
                tile_elements: 4
            })
        );
        assert!(!result.unwrap_err().is_fatal());
    }

    #[test]
    fn test_rank_and_empty_axes() {
        assert!(matches!(
            TileGeometry::new(vec![4, 4], vec![2, 2, 1], 16, 4),
            Err(GeometryError::RankMismatch { .. })
        ));
        assert!(matches!(
            TileGeometry::new(vec![4, 0], vec![2, 1], 8, 4),
            Err(GeometryError::EmptyAxis(_))
        ));
        assert!(matches!(
            TileGeometry::new(vec![], vec![], 8, 4),
            Err(GeometryError::EmptyAxis(_))
        ));
    }

    #[test]
    fn test_huge_shapes_are_rejected() {
        let result = TileGeometry::new(
            vec![1 << 40, 1 << 40],
            vec![1 << 20, 1 << 20],
            1 << 42,
            4,
        );
        assert_eq!(
            result,
            Err(GeometryError::TooLarge(vec![1 << 40, 1 << 40]))
        );
        assert!(!result.unwrap_err().is_fatal());

        // The element count fits, but not in bytes.
        let result = TileGeometry::new(vec![1 << 31, 1 << 31], vec![1, 1], 4, 4);
        assert!(matches!(result, Err(GeometryError::TooLarge(_))));

        // Tile shapes are checked too, even before the tiling is.
        let result = TileGeometry::new(vec![4, 4], vec![1 << 40, 1 << 40], 16, 4);
        assert!(matches!(result, Err(GeometryError::TooLarge(_))));

        // Scalar-broadcast cubes still have to be addressable.
        let result = TileGeometry::new(vec![usize::MAX, 2], vec![1, 1], 8, 4);
        assert!(matches!(result, Err(GeometryError::TooLarge(_))));
    }

    #[test]
    fn test_two_element_tiles_read_as_scalar() {
        // The bucket is ambiguous: two elements per tile, or the scalar
        // sentinel. The sentinel wins.
        let g = TileGeometry::new(vec![4, 2], vec![2, 1], 8, 4).unwrap();
        assert!(g.scalar_broadcast);
        assert_eq!(g.tile_shape.as_slice(), [4, 2]);
        assert_eq!(g.num_tiles(), 0);
    }

    #[test]
    fn test_tile_coords_round_trip() {
        let g = TileGeometry::new(vec![4, 6, 2], vec![2, 2, 1], 16, 4).unwrap();
        assert_eq!(g.stacks(), [2, 3, 2]);
        // First axis fastest.
        assert_eq!(g.tile_coords(0), [0, 0, 0]);
        assert_eq!(g.tile_coords(1), [1, 0, 0]);
        assert_eq!(g.tile_coords(2), [0, 1, 0]);
        assert_eq!(g.tile_coords(6), [0, 0, 1]);
        for i in 0..g.num_tiles() {
            assert_eq!(g.tile_index(&g.tile_coords(i)), i);
        }
    }
}
