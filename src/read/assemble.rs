//! Composing the tile grid into one lazily-read array.
//!
//! Tiles are listed in storage order (the first storage axis varies fastest),
//! then grouped into runs along that axis, then runs of runs along the next,
//! until a single block spans the whole image. Storage axis `i` is logical axis
//! `ndim - 1 - i`, so the innermost groups join along the last logical axis.
//! Nothing is read while building; reading a region only touches the tiles that
//! intersect it.

use std::ops::Range;

use log::{debug, trace};
use ndarray::{concatenate, prelude::*, Slice};
use rayon::prelude::*;

use super::{
    slice::{check_rank, AxisSlice, ResolvedAxis, SliceError},
    tile::{read_scalar, TileAccessor, TileHandle},
    Element, GeometryError, ReadError,
};

#[derive(Debug, Clone)]
enum Block<T> {
    Tile {
        handle: TileHandle<T>,
        origin: Vec<usize>,
        shape: Vec<usize>,
    },

    /// Blocks joined end to end along `axis`.
    Concat {
        axis: usize,
        parts: Vec<Block<T>>,
        origin: Vec<usize>,
        shape: Vec<usize>,
    },

    /// Every element is the payload's one scalar.
    Broadcast {
        source: TileAccessor<T>,
        origin: Vec<usize>,
        shape: Vec<usize>,
    },
}

impl<T: Element> Block<T> {
    fn concat(axis: usize, mut parts: Vec<Block<T>>) -> Block<T> {
        if parts.len() == 1 {
            return parts.remove(0);
        }
        let origin = parts[0].origin().to_vec();
        let mut shape = parts[0].shape().to_vec();
        shape[axis] = parts.iter().map(|p| p.shape()[axis]).sum();
        Block::Concat {
            axis,
            parts,
            origin,
            shape,
        }
    }

    fn origin(&self) -> &[usize] {
        match self {
            Block::Tile { origin, .. }
            | Block::Concat { origin, .. }
            | Block::Broadcast { origin, .. } => origin,
        }
    }

    fn shape(&self) -> &[usize] {
        match self {
            Block::Tile { shape, .. }
            | Block::Concat { shape, .. }
            | Block::Broadcast { shape, .. } => shape,
        }
    }

    /// The part of `region` inside this block, or `None` if they don't meet.
    fn clip(&self, region: &[Range<usize>]) -> Option<Vec<Range<usize>>> {
        region
            .iter()
            .zip(self.origin().iter().zip(self.shape()))
            .map(|(r, (&o, &n))| {
                let start = r.start.max(o);
                let end = r.end.min(o + n);
                (start < end).then_some(start..end)
            })
            .collect()
    }

    /// Read a non-empty `region` (absolute logical coordinates, already within
    /// this block).
    fn read_region(&self, region: &[Range<usize>]) -> Result<ArrayD<T>, ReadError> {
        match self {
            Block::Broadcast { source, .. } => {
                let value = read_scalar::<T>(source.payload())?;
                let shape: Vec<usize> = region.iter().map(|r| r.len()).collect();
                Ok(ArrayD::from_elem(shape, value))
            }

            Block::Tile { handle, origin, .. } => {
                let tile = handle.read()?;
                Ok(tile
                    .slice_each_axis(|ax| {
                        let i = ax.axis.index();
                        Slice::from(region[i].start - origin[i]..region[i].end - origin[i])
                    })
                    .to_owned())
            }

            Block::Concat { axis, parts, .. } => {
                let pieces = parts
                    .par_iter()
                    .filter_map(|part| part.clip(region).map(|sub| part.read_region(&sub)))
                    .collect::<Result<Vec<_>, _>>()?;
                trace!("Joining {} blocks along axis {axis}", pieces.len());
                let views: Vec<_> = pieces.iter().map(|p| p.view()).collect();
                Ok(concatenate(Axis(*axis), &views)?)
            }
        }
    }

    fn leaves<'a>(&'a self, out: &mut Vec<Chunk<'a, T>>) {
        match self {
            Block::Concat { parts, .. } => parts.iter().for_each(|p| p.leaves(out)),
            leaf => out.push(Chunk { block: leaf }),
        }
    }
}

/// An image-shaped array whose elements are read from disk only when asked
/// for.
#[derive(Debug, Clone)]
pub struct LazyArray<T> {
    shape: Vec<usize>,
    num_tiles: usize,
    root: Block<T>,
}

/// Build the lazy array over every tile `accessor` can reach.
pub fn assemble<T: Element>(accessor: &TileAccessor<T>) -> Result<LazyArray<T>, ReadError> {
    let geometry = accessor.geometry();
    let shape = geometry.logical_shape();

    if geometry.scalar_broadcast {
        debug!("Broadcasting a single value over {shape:?}");
        return Ok(LazyArray {
            root: Block::Broadcast {
                source: accessor.clone(),
                origin: vec![0; shape.len()],
                shape: shape.clone(),
            },
            shape,
            num_tiles: 0,
        });
    }

    geometry.check_grid()?;
    let ndim = geometry.ndim();
    let stacks = geometry.stacks();
    let num_tiles = geometry.num_tiles();
    let tile_shape = geometry.logical_tile_shape();
    debug!("Assembling {num_tiles} tiles (grid {stacks:?}) into {shape:?}");

    let tiles: Vec<Block<T>> = (0..num_tiles)
        .map(|i| {
            let origin = geometry
                .tile_coords(i)
                .iter()
                .rev()
                .zip(&tile_shape)
                .map(|(c, t)| c * t)
                .collect();
            Block::Tile {
                handle: accessor.handle(i),
                origin,
                shape: tile_shape.clone(),
            }
        })
        .collect();

    let mut blocks = stacks
        .iter()
        .enumerate()
        .fold(tiles, |blocks, (i, &n)| group(blocks, n, ndim - 1 - i));
    if blocks.len() != 1 || blocks[0].shape() != shape.as_slice() {
        return Err(GeometryError::GridMismatch {
            grid: stacks,
            tile: geometry.tile_shape.to_vec(),
            total: geometry.total_shape.to_vec(),
        }
        .into());
    }

    Ok(LazyArray {
        shape,
        num_tiles,
        root: blocks.remove(0),
    })
}

/// Join each consecutive run of `n` blocks along `axis`.
fn group<T: Element>(blocks: Vec<Block<T>>, n: usize, axis: usize) -> Vec<Block<T>> {
    let mut grouped = Vec::with_capacity(blocks.len() / n.max(1));
    let mut blocks = blocks.into_iter().peekable();
    while blocks.peek().is_some() {
        grouped.push(Block::concat(axis, blocks.by_ref().take(n).collect()));
    }
    grouped
}

impl<T: Element> LazyArray<T> {
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Zero for a scalar-broadcast image.
    pub fn num_tiles(&self) -> usize {
        self.num_tiles
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self.root, Block::Broadcast { .. })
    }

    /// The independently-readable pieces of the array, in storage order. Each
    /// is one tile (or the whole array, if it's a broadcast scalar).
    pub fn chunks(&self) -> Vec<Chunk<'_, T>> {
        let mut chunks = Vec::with_capacity(self.num_tiles.max(1));
        self.root.leaves(&mut chunks);
        chunks
    }

    /// Read everything.
    pub fn materialize(&self) -> Result<ArrayD<T>, ReadError> {
        let full: Vec<Range<usize>> = self.shape.iter().map(|&n| 0..n).collect();
        self.read_bounds(&full)
    }

    /// Read the box `region` (one range per logical axis).
    pub fn read_bounds(&self, region: &[Range<usize>]) -> Result<ArrayD<T>, ReadError> {
        if region.len() != self.ndim() {
            return Err(SliceError::RankMismatch {
                got: region.len(),
                ndim: self.ndim(),
            }
            .into());
        }
        for (axis, (r, &len)) in region.iter().zip(&self.shape).enumerate() {
            if r.end > len || r.start > r.end {
                return Err(SliceError::IndexOutOfBounds {
                    axis,
                    index: r.start.max(r.end) as isize,
                    len,
                }
                .into());
            }
        }

        if region.iter().any(|r| r.is_empty()) {
            let shape: Vec<usize> = region.iter().map(|r| r.len()).collect();
            return Ok(ArrayD::from_shape_vec(shape, vec![])?);
        }
        self.root.read_region(region)
    }

    /// Select with numpy rules; integer entries remove their axis.
    pub fn slice(&self, slices: &[AxisSlice]) -> Result<ArrayD<T>, ReadError> {
        check_rank(slices, self.ndim())?;
        let resolved = slices
            .iter()
            .zip(&self.shape)
            .enumerate()
            .map(|(axis, (s, &len))| ResolvedAxis::resolve(s, len, axis))
            .collect::<Result<Vec<_>, _>>()?;

        let bounds: Vec<Range<usize>> = resolved.iter().map(|r| r.bounds()).collect();
        let boxed = self.read_bounds(&bounds)?;
        let mut selected = boxed
            .slice_each_axis(|ax| resolved[ax.axis.index()].within_bounds())
            .to_owned();
        for (axis, r) in resolved.iter().enumerate().rev() {
            if r.collapse {
                selected = selected.index_axis_move(Axis(axis), 0);
            }
        }
        Ok(selected)
    }
}

/// One independently-readable piece of a [`LazyArray`].
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a, T> {
    block: &'a Block<T>,
}

impl<'a, T: Element> Chunk<'a, T> {
    /// Where this chunk starts in the logical array.
    pub fn origin(&self) -> &'a [usize] {
        self.block.origin()
    }

    pub fn shape(&self) -> &'a [usize] {
        self.block.shape()
    }

    pub fn tile_index(&self) -> Option<usize> {
        match self.block {
            Block::Tile { handle, .. } => Some(handle.index()),
            _ => None,
        }
    }

    pub fn read(&self) -> Result<ArrayD<T>, ReadError> {
        match self.block {
            Block::Tile { handle, .. } => handle.read(),
            block => {
                let full: Vec<Range<usize>> = block.shape().iter().map(|&n| 0..n).collect();
                block.read_region(&full)
            }
        }
    }
}
