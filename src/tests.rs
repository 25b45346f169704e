//! Helpers for writing tiled images in tests.

use std::path::Path;

use ndarray::{prelude::*, Slice};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::read::{Element, TileGeometry};

/// A directory that's removed when dropped.
pub(crate) struct TempStore {
    dir: TempDir,
}

impl TempStore {
    pub(crate) fn new() -> TempStore {
        TempStore {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }
}

pub(crate) trait FixtureElement: Element {
    fn encode(self, out: &mut Vec<u8>);
}

impl FixtureElement for f32 {
    fn encode(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl FixtureElement for bool {
    fn encode(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }
}

/// Lay out `logical` as the payload for `geometry`: tiles in storage order,
/// each Fortran-ordered over the storage tile shape.
pub(crate) fn encode_tiles<T: FixtureElement>(
    geometry: &TileGeometry,
    logical: &ArrayD<T>,
) -> Vec<u8> {
    assert_eq!(logical.shape(), geometry.logical_shape().as_slice());
    let tile_shape = geometry.logical_tile_shape();

    let mut out = Vec::with_capacity(geometry.payload_bytes() as usize);
    for i in 0..geometry.num_tiles() {
        let origin: Vec<usize> = geometry
            .tile_coords(i)
            .iter()
            .rev()
            .zip(&tile_shape)
            .map(|(c, t)| c * t)
            .collect();
        let tile = logical.slice_each_axis(|ax| {
            let (o, t) = (origin[ax.axis.index()], tile_shape[ax.axis.index()]);
            Slice::from(o..o + t)
        });
        // Fortran order over the storage axes is C order over the logical ones.
        tile.iter().for_each(|&v| v.encode(&mut out));
    }
    out
}

pub(crate) fn write_tiled_payload<T: FixtureElement>(
    path: &Path,
    geometry: &TileGeometry,
    logical: &ArrayD<T>,
) {
    std::fs::write(path, encode_tiles(geometry, logical)).unwrap();
}

/// A data-management record for one `TiledShapeStMan` hypercube. Shapes are
/// in storage order.
pub(crate) fn dminfo_json(
    cube_shape: &[usize],
    tile_shape: &[usize],
    bucket_size: usize,
    seqnr: u32,
) -> Value {
    json!({
        "*1": {
            "TYPE": "StandardStMan",
            "NAME": "SSM",
            "SEQNR": 99,
            "COLUMNS": ["coords"],
        },
        "*2": {
            "TYPE": "TiledShapeStMan",
            "NAME": "TSM",
            "SEQNR": seqnr,
            "COLUMNS": ["map"],
            "SPEC": {
                "DEFAULTTILESHAPE": tile_shape,
                "MAXIMUMCACHESIZE": 0,
                "HYPERCUBES": {
                    "*1": {
                        "CubeShape": cube_shape,
                        "TileShape": tile_shape,
                        "CellShape": cube_shape,
                        "BucketSize": bucket_size,
                    }
                }
            }
        }
    })
}

pub(crate) fn write_record(dir: &Path, dminfo: Value, keywords: Option<Value>) {
    std::fs::create_dir_all(dir).unwrap();
    let mut record = json!({ "dminfo": dminfo });
    if let Some(keywords) = keywords {
        record["keywords"] = keywords;
    }
    std::fs::write(
        dir.join("table.dminfo.json"),
        serde_json::to_vec_pretty(&record).unwrap(),
    )
    .unwrap();
}

/// Write `logical` as a tiled table in `dir`, with tiles of
/// `logical_tile_shape`.
pub(crate) fn write_table<T: FixtureElement>(
    dir: &Path,
    logical_tile_shape: &[usize],
    logical: &ArrayD<T>,
    keywords: Option<Value>,
) -> TileGeometry {
    let total: Vec<usize> = logical.shape().iter().rev().copied().collect();
    let tile: Vec<usize> = logical_tile_shape.iter().rev().copied().collect();
    let bucket = tile.iter().product::<usize>() * T::SIZE;
    let geometry = TileGeometry::new(total.clone(), tile.clone(), bucket, T::SIZE).unwrap();

    write_record(dir, dminfo_json(&total, &tile, bucket, 0), keywords);
    write_tiled_payload(&dir.join("table.f0_TSM0"), &geometry, logical);
    geometry
}

/// Write a table whose every element is `value`.
pub(crate) fn write_scalar_table<T: FixtureElement>(
    dir: &Path,
    logical_shape: &[usize],
    value: T,
) {
    let total: Vec<usize> = logical_shape.iter().rev().copied().collect();
    write_record(dir, dminfo_json(&total, &total, 2 * T::SIZE, 0), None);
    // The store pads the scalar out to the bucket size.
    let mut bytes = vec![];
    value.encode(&mut bytes);
    value.encode(&mut bytes);
    std::fs::write(dir.join("table.f0_TSM0"), bytes).unwrap();
}

/// A logical array of `shape` holding 0, 1, 2, ... in C order.
pub(crate) fn counting(shape: &[usize]) -> ArrayD<f32> {
    let n = shape.iter().product();
    ArrayD::from_shape_vec(shape, (0..n).map(|v| v as f32).collect()).unwrap()
}
