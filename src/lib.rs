//! Read tiled CASA images without casacore.
//!
//! A CASA image is a directory holding a table whose pixels are stored as a
//! hypercube of fixed-shape tiles, each tile Fortran-ordered, in one payload
//! file. [`read::CasaImage`] opens one, and gives the pixels back in the
//! *logical* axis order (the reverse of the storage order) either lazily, for
//! the whole image, or eagerly, for a region.
//!
//! ```no_run
//! use casa_tiles::{metadata::MetadataReader, read::{parse_region, CasaImage}};
//!
//! let reader = MetadataReader::discover().available().expect("no record decoders");
//! let image = CasaImage::open("cube.image", &reader).unwrap();
//! let plane = image.read_region(&parse_region("0, :, :").unwrap()).unwrap();
//! ```

pub mod fits;
pub mod metadata;
pub mod read;
#[cfg(test)]
mod tests;

pub use metadata::{Capability, MetadataReader};
pub use read::{AxisSlice, CasaImage, LazyArray, ReadError};
