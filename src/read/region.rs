//! Reading one sub-region with a single call to the store's `getchunk`
//! primitive.
//!
//! `getchunk` takes inclusive bottom-left and top-right corners (BLC/TRC) and
//! an increment per *storage* axis, where `-1` means "from the beginning" for
//! the BLC and "to the end" for the TRC. Slices arrive in logical order with
//! exclusive stops, so they're reversed and converted first.

use std::ops::Range;

use itertools::Itertools;
use log::debug;
use ndarray::{prelude::*, Slice};

use super::{
    slice::{check_rank, wrap_index, AxisSlice, SliceError},
    tile::{open_payload, read_scalar, read_tile_values, TileAccessor},
    Element, ReadError,
};

/// `getchunk` bounds for one storage axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisBounds {
    pub lower: isize,
    pub upper: isize,
    pub step: isize,

    /// The axis was selected with an integer and is removed after the read.
    pub is_integer: bool,

    /// The slice stopped at 0. `getchunk` can't express an empty axis, so
    /// this is applied after the read.
    pub empty: bool,
}

/// `getchunk` bounds for every axis, in storage order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundsSpec {
    pub axes: Vec<AxisBounds>,
}

impl BoundsSpec {
    /// Convert logical-order slices of an array with `logical_shape`.
    pub fn from_slices(
        slices: &[AxisSlice],
        logical_shape: &[usize],
    ) -> Result<BoundsSpec, SliceError> {
        check_rank(slices, logical_shape.len())?;

        let axes = slices
            .iter()
            .zip(logical_shape)
            .enumerate()
            .rev()
            .map(|(axis, (slice, &len))| match *slice {
                AxisSlice::Index(index) => {
                    let i = wrap_index(index, len)
                        .ok_or(SliceError::IndexOutOfBounds { axis, index, len })?
                        as isize;
                    Ok(AxisBounds {
                        lower: i,
                        upper: i,
                        step: 1,
                        is_integer: true,
                        empty: false,
                    })
                }

                AxisSlice::Range { start, stop, step } => {
                    let step = match step.unwrap_or(1) {
                        0 => return Err(SliceError::ZeroStep { axis }),
                        s if s < 0 => return Err(SliceError::NonPositiveStep { axis, step: s }),
                        s => s,
                    };
                    let upper = match stop {
                        None => -1,
                        Some(s) if s >= 1 => s - 1,
                        Some(s) => s,
                    };
                    Ok(AxisBounds {
                        lower: start.unwrap_or(-1),
                        upper,
                        step,
                        is_integer: false,
                        empty: stop == Some(0),
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(BoundsSpec { axes })
    }

    pub fn blc(&self) -> Vec<isize> {
        self.axes.iter().map(|a| a.lower).collect()
    }

    pub fn trc(&self) -> Vec<isize> {
        self.axes.iter().map(|a| a.upper).collect()
    }

    pub fn inc(&self) -> Vec<isize> {
        self.axes.iter().map(|a| a.step).collect()
    }
}

/// The elements `getchunk` selects on one axis: `count` of them from `first`,
/// `inc` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    first: usize,
    inc: usize,
    count: usize,
}

/// The part of a [`Span`] held by one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TileSpan {
    tile: usize,
    /// Index of the first selected element within the tile.
    local_first: usize,
    /// Which of the span's elements these are.
    dest: Range<usize>,
}

impl Span {
    fn new(bounds: &AxisBounds, len: usize) -> Span {
        let len = len as isize;
        let first = bounds.lower.max(0);
        let last = if bounds.upper < 0 || bounds.upper >= len {
            len - 1
        } else {
            bounds.upper
        };
        let count = if bounds.empty || first >= len || last < first {
            0
        } else {
            (last - first) / bounds.step + 1
        };
        Span {
            first: first as usize,
            inc: bounds.step as usize,
            count: count as usize,
        }
    }

    fn tile_spans(&self, tile_len: usize) -> Vec<TileSpan> {
        if self.count == 0 {
            return vec![];
        }
        let last = self.first + (self.count - 1) * self.inc;
        (self.first / tile_len..=last / tile_len)
            .filter_map(|tile| {
                let tile_start = tile * tile_len;
                let m0 = div_ceil(tile_start.saturating_sub(self.first), self.inc);
                let m1 = div_ceil(tile_start + tile_len - self.first, self.inc).min(self.count);
                (m0 < m1).then(|| TileSpan {
                    tile,
                    local_first: self.first + m0 * self.inc - tile_start,
                    dest: m0..m1,
                })
            })
            .collect()
    }
}

fn div_ceil(a: usize, b: usize) -> usize {
    a / b + usize::from(a % b != 0)
}

/// The store's native random-access read. The result is in storage axis
/// order, with integer-selected axes still present (length 1). The payload is
/// opened once, only the tiles holding selected elements are read, and it's
/// closed before returning.
pub fn get_chunk<T: Element>(
    accessor: &TileAccessor<T>,
    bounds: &BoundsSpec,
) -> Result<ArrayD<T>, ReadError> {
    let geometry = accessor.geometry();
    if bounds.axes.len() != geometry.ndim() {
        return Err(SliceError::RankMismatch {
            got: bounds.axes.len(),
            ndim: geometry.ndim(),
        }
        .into());
    }
    if let Some((axis, b)) = bounds.axes.iter().enumerate().find(|(_, b)| b.step <= 0) {
        return Err(SliceError::NonPositiveStep { axis, step: b.step }.into());
    }

    let spans: Vec<Span> = bounds
        .axes
        .iter()
        .zip(geometry.total_shape.iter())
        .map(|(b, &len)| Span::new(b, len))
        .collect();
    let counts: Vec<usize> = spans.iter().map(|s| s.count).collect();
    debug!(
        "getchunk blc={:?} trc={:?} inc={:?} -> {counts:?}",
        bounds.blc(),
        bounds.trc(),
        bounds.inc()
    );

    if counts.contains(&0) {
        return Ok(ArrayD::from_shape_vec(counts, vec![])?);
    }
    if geometry.scalar_broadcast {
        let value = read_scalar::<T>(accessor.payload())?;
        return Ok(ArrayD::from_elem(counts, value));
    }

    let per_axis: Vec<Vec<TileSpan>> = spans
        .iter()
        .zip(geometry.tile_shape.iter())
        .map(|(s, &t)| s.tile_spans(t))
        .collect();

    let mut out = ArrayD::from_elem(counts, T::default());
    let mut file = open_payload(accessor.payload())?;
    // Iterate with the first storage axis fastest so tiles are read in file
    // order.
    for mut combo in per_axis
        .iter()
        .rev()
        .map(|spans| spans.iter())
        .multi_cartesian_product()
    {
        combo.reverse();
        let coords: Vec<usize> = combo.iter().map(|s| s.tile).collect();
        let tile_index = geometry.tile_index(&coords);
        let values =
            read_tile_values::<T>(&mut file, accessor.payload(), geometry, tile_index)?;
        let tile = ArrayViewD::from_shape(IxDyn(&geometry.tile_shape).f(), &values)?;

        let src = tile.slice_each_axis(|ax| {
            let (s, inc) = (combo[ax.axis.index()], spans[ax.axis.index()].inc);
            let end = s.local_first + (s.dest.len() - 1) * inc + 1;
            let step = if s.dest.len() > 1 { inc } else { 1 };
            Slice::new(s.local_first as isize, Some(end as isize), step as isize)
        });
        out.slice_each_axis_mut(|ax| Slice::from(combo[ax.axis.index()].dest.clone()))
            .assign(&src);
    }
    drop(file);

    Ok(out)
}

/// Read exactly the region `slices` (logical order) describes. Integer entries
/// remove their axis; the result is in logical order.
pub fn read_region<T: Element>(
    accessor: &TileAccessor<T>,
    slices: &[AxisSlice],
) -> Result<ArrayD<T>, ReadError> {
    let bounds = BoundsSpec::from_slices(slices, &accessor.geometry().logical_shape())?;
    let mut data = get_chunk(accessor, &bounds)?;

    // Highest axis first, so the remaining axis numbers stay valid.
    for (axis, b) in bounds.axes.iter().enumerate().rev() {
        if b.is_integer {
            data = data.index_axis_move(Axis(axis), 0);
        }
    }
    Ok(data.reversed_axes().as_standard_layout().into_owned())
}
