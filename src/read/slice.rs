//! Per-axis selections, with numpy's slicing rules.

use std::{
    ops::{Range, RangeFull},
    str::FromStr,
};

use ndarray::Slice;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SliceError {
    #[error("Got {got} slice entries for an array with {ndim} axes")]
    RankMismatch { got: usize, ndim: usize },

    #[error("Index {index} is out of bounds for axis {axis} with length {len}")]
    IndexOutOfBounds { axis: usize, index: isize, len: usize },

    #[error("Slice step on axis {axis} can't be zero")]
    ZeroStep { axis: usize },

    #[error("Region reads only step forwards, but axis {axis} has step {step}")]
    NonPositiveStep { axis: usize, step: isize },

    #[error("Couldn't parse '{0}' as a slice")]
    Parse(String),
}

/// What to take from one axis: a single index (which removes the axis from
/// the result) or a `start:stop:step` range where any part may be left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisSlice {
    Index(isize),
    Range {
        start: Option<isize>,
        stop: Option<isize>,
        step: Option<isize>,
    },
}

impl AxisSlice {
    /// `:`
    pub const FULL: AxisSlice = AxisSlice::Range {
        start: None,
        stop: None,
        step: None,
    };

    pub fn range(start: isize, stop: isize) -> AxisSlice {
        AxisSlice::Range {
            start: Some(start),
            stop: Some(stop),
            step: None,
        }
    }

    pub fn is_index(&self) -> bool {
        matches!(self, AxisSlice::Index(_))
    }
}

impl From<isize> for AxisSlice {
    fn from(i: isize) -> Self {
        AxisSlice::Index(i)
    }
}

impl From<Range<isize>> for AxisSlice {
    fn from(r: Range<isize>) -> Self {
        AxisSlice::range(r.start, r.end)
    }
}

impl From<RangeFull> for AxisSlice {
    fn from(_: RangeFull) -> Self {
        AxisSlice::FULL
    }
}

impl FromStr for AxisSlice {
    type Err = SliceError;

    /// Parse `3`, `-1`, `:`, `1:3`, `::2`, `5:1:-1` and friends.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_part = |p: &str| -> Result<Option<isize>, SliceError> {
            let p = p.trim();
            if p.is_empty() {
                Ok(None)
            } else {
                p.parse()
                    .map(Some)
                    .map_err(|_| SliceError::Parse(s.to_string()))
            }
        };

        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [index] => parse_part(index)?
                .map(AxisSlice::Index)
                .ok_or_else(|| SliceError::Parse(s.to_string())),
            [start, stop] => Ok(AxisSlice::Range {
                start: parse_part(start)?,
                stop: parse_part(stop)?,
                step: None,
            }),
            [start, stop, step] => Ok(AxisSlice::Range {
                start: parse_part(start)?,
                stop: parse_part(stop)?,
                step: parse_part(step)?,
            }),
            _ => Err(SliceError::Parse(s.to_string())),
        }
    }
}

/// Parse a comma-separated region like `0:2, :, 3`.
pub fn parse_region(s: &str) -> Result<Vec<AxisSlice>, SliceError> {
    if s.trim().is_empty() {
        return Err(SliceError::Parse(s.to_string()));
    }
    s.split(',').map(str::parse).collect()
}

pub(crate) fn check_rank(slices: &[AxisSlice], ndim: usize) -> Result<(), SliceError> {
    if slices.len() == ndim {
        Ok(())
    } else {
        Err(SliceError::RankMismatch {
            got: slices.len(),
            ndim,
        })
    }
}

/// Wrap a negative index once; `None` if it's still out of bounds.
pub(crate) fn wrap_index(index: isize, len: usize) -> Option<usize> {
    let len = len as isize;
    let i = if index < 0 { index + len } else { index };
    (0..len).contains(&i).then_some(i as usize)
}

/// A selection on one axis of known length: `count` elements starting at
/// `first`, `step` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAxis {
    pub first: usize,
    pub step: isize,
    pub count: usize,

    /// The selection was an integer index; drop the axis afterwards.
    pub collapse: bool,
}

impl ResolvedAxis {
    pub fn resolve(slice: &AxisSlice, len: usize, axis: usize) -> Result<Self, SliceError> {
        match *slice {
            AxisSlice::Index(index) => {
                let first = wrap_index(index, len)
                    .ok_or(SliceError::IndexOutOfBounds { axis, index, len })?;
                Ok(ResolvedAxis {
                    first,
                    step: 1,
                    count: 1,
                    collapse: true,
                })
            }

            AxisSlice::Range { start, stop, step } => {
                let step = step.unwrap_or(1);
                if step == 0 {
                    return Err(SliceError::ZeroStep { axis });
                }
                let len = len as isize;
                let wrap = |v: isize| if v < 0 { v + len } else { v };

                let (start, count) = if step > 0 {
                    let start = start.map_or(0, |v| wrap(v).clamp(0, len));
                    let stop = stop.map_or(len, |v| wrap(v).clamp(0, len));
                    let count = if stop > start {
                        ((stop - start - 1) as usize / step as usize + 1) as isize
                    } else {
                        0
                    };
                    (start, count)
                } else {
                    let start = start.map_or(len - 1, |v| wrap(v).clamp(-1, len - 1));
                    let stop = stop.map_or(-1, |v| wrap(v).clamp(-1, len - 1));
                    let count = if start > stop {
                        ((start - stop - 1) as usize / step.unsigned_abs() + 1) as isize
                    } else {
                        0
                    };
                    (start, count)
                };

                Ok(ResolvedAxis {
                    first: if count > 0 { start as usize } else { 0 },
                    step,
                    count: count as usize,
                    collapse: false,
                })
            }
        }
    }

    pub fn last(&self) -> usize {
        (self.first as isize + self.step * self.count.saturating_sub(1) as isize) as usize
    }

    /// The contiguous range covering every selected element.
    pub fn bounds(&self) -> Range<usize> {
        if self.count == 0 {
            0..0
        } else {
            let (lo, hi) = if self.step > 0 {
                (self.first, self.last())
            } else {
                (self.last(), self.first)
            };
            lo..hi + 1
        }
    }

    /// The selection relative to the start of [`ResolvedAxis::bounds`].
    pub fn within_bounds(&self) -> Slice {
        let Range { start: lo, end: hi } = self.bounds();
        // With at most one element the step is irrelevant, and may be too big
        // for ndarray to negate.
        let step = if self.count > 1 { self.step } else { 1 };
        Slice::new(0, Some((hi - lo) as isize), step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(s: &str, len: usize) -> ResolvedAxis {
        ResolvedAxis::resolve(&s.parse().unwrap(), len, 0).unwrap()
    }

    fn indices(r: ResolvedAxis) -> Vec<usize> {
        (0..r.count)
            .map(|i| (r.first as isize + i as isize * r.step) as usize)
            .collect()
    }

    #[test]
    fn test_parse() {
        assert_eq!("3".parse::<AxisSlice>().unwrap(), AxisSlice::Index(3));
        assert_eq!(" -1 ".parse::<AxisSlice>().unwrap(), AxisSlice::Index(-1));
        assert_eq!(":".parse::<AxisSlice>().unwrap(), AxisSlice::FULL);
        assert_eq!("1:3".parse::<AxisSlice>().unwrap(), AxisSlice::range(1, 3));
        assert_eq!(
            "::2".parse::<AxisSlice>().unwrap(),
            AxisSlice::Range {
                start: None,
                stop: None,
                step: Some(2)
            }
        );
        assert!("".parse::<AxisSlice>().is_err());
        assert!("a:b".parse::<AxisSlice>().is_err());
        assert!("1:2:3:4".parse::<AxisSlice>().is_err());

        assert_eq!(
            parse_region("1:3, 0:2, :").unwrap(),
            [AxisSlice::range(1, 3), AxisSlice::range(0, 2), AxisSlice::FULL]
        );
        assert!(parse_region(" ").is_err());
    }

    #[test]
    fn test_resolve_like_numpy() {
        assert_eq!(indices(resolve(":", 5)), [0, 1, 2, 3, 4]);
        assert_eq!(indices(resolve("1:3", 5)), [1, 2]);
        assert_eq!(indices(resolve("::2", 5)), [0, 2, 4]);
        assert_eq!(indices(resolve("-2:", 5)), [3, 4]);
        assert_eq!(indices(resolve(":-1", 5)), [0, 1, 2, 3]);
        assert_eq!(indices(resolve("::-1", 5)), [4, 3, 2, 1, 0]);
        assert_eq!(indices(resolve("4:0:-2", 5)), [4, 2]);
        assert_eq!(indices(resolve("0:0", 5)), Vec::<usize>::new());
        assert_eq!(indices(resolve("3:1", 5)), Vec::<usize>::new());
        assert_eq!(indices(resolve("2:100", 5)), [2, 3, 4]);
        assert_eq!(indices(resolve("-1", 5)), [4]);
        assert!(resolve("-1", 5).collapse);
    }

    #[test]
    fn test_bounds() {
        let r = resolve("4:0:-2", 5);
        assert_eq!(r.bounds(), 2..5);
        let r = resolve("1::3", 10);
        assert_eq!(indices(r), [1, 4, 7]);
        assert_eq!(r.bounds(), 1..8);
        assert_eq!(resolve("3:3", 10).bounds(), 0..0);
    }

    #[test]
    fn test_huge_steps() {
        let huge = |start, stop, step| AxisSlice::Range {
            start,
            stop,
            step: Some(step),
        };

        let r = ResolvedAxis::resolve(&huge(Some(0), Some(5), isize::MAX), 10, 0).unwrap();
        assert_eq!(indices(r), [0]);
        assert_eq!(r.bounds(), 0..1);
        assert_eq!(r.within_bounds(), Slice::new(0, Some(1), 1));

        let r = ResolvedAxis::resolve(&huge(None, None, isize::MIN), 10, 0).unwrap();
        assert_eq!(indices(r), [9]);
        assert_eq!(r.bounds(), 9..10);
        assert_eq!(r.within_bounds(), Slice::new(0, Some(1), 1));

        let r = ResolvedAxis::resolve(&huge(Some(3), None, isize::MIN + 1), 10, 0).unwrap();
        assert_eq!(indices(r), [3]);

        let r = ResolvedAxis::resolve(&huge(Some(5), Some(5), isize::MAX), 10, 0).unwrap();
        assert_eq!(r.count, 0);
    }

    #[test]
    fn test_bad_slices() {
        assert_eq!(
            ResolvedAxis::resolve(&AxisSlice::Index(5), 5, 2),
            Err(SliceError::IndexOutOfBounds {
                axis: 2,
                index: 5,
                len: 5
            })
        );
        assert!(ResolvedAxis::resolve(&AxisSlice::Index(-6), 5, 0).is_err());
        assert_eq!(
            ResolvedAxis::resolve(
                &AxisSlice::Range {
                    start: None,
                    stop: None,
                    step: Some(0)
                },
                5,
                1
            ),
            Err(SliceError::ZeroStep { axis: 1 })
        );
        assert!(check_rank(&[AxisSlice::FULL], 3).is_err());
    }
}
