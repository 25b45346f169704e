//! Writing images out as FITS.

use std::path::Path;

use fitsio::{
    hdu::{FitsHdu, HduInfo},
    images::{ImageDescription, ImageType, WriteImage},
    FitsFile,
};
use log::debug;
use ndarray::ArrayD;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FitsError {
    /// Error when creating a fits file.
    #[error(
        "{source_file}:{source_line}:{source_column}: Couldn't create {fits_filename}: {fits_error}"
    )]
    Create {
        fits_error: Box<fitsio::errors::Error>,
        fits_filename: Box<Path>,
        source_file: &'static str,
        source_line: u32,
        source_column: u32,
    },

    /// Error describing a HDU that couldn't be used as an image (e.g. `HduInfo::ImageInfo`).
    #[error("{source_file}:{source_line}:{source_column}: {fits_filename} HDU {hdu_num}: Tried to use as an image, but not an image")]
    NotImage {
        fits_filename: Box<Path>,
        hdu_num: usize,
        source_file: &'static str,
        source_line: u32,
        source_column: u32,
    },

    /// A generic error associated with the fitsio crate.
    #[error(
        "{source_file}:{source_line}:{source_column}: {fits_filename} HDU '{hdu_description}': {fits_error}"
    )]
    Fitsio {
        fits_error: Box<fitsio::errors::Error>,
        fits_filename: Box<Path>,
        hdu_description: Box<str>,
        source_file: &'static str,
        source_line: u32,
        source_column: u32,
    },
}

/// Create (or replace) a fits file whose primary HDU is an image of
/// `description`.
#[track_caller]
pub(crate) fn fits_create<P: AsRef<Path>>(
    file: P,
    description: &ImageDescription,
) -> Result<FitsFile, FitsError> {
    let caller = std::panic::Location::caller();
    FitsFile::create(file.as_ref())
        .with_custom_primary(description)
        .overwrite()
        .open()
        .map_err(|e| FitsError::Create {
            fits_error: Box::new(e),
            fits_filename: file.as_ref().to_path_buf().into_boxed_path(),
            source_file: caller.file(),
            source_line: caller.line(),
            source_column: caller.column(),
        })
}

#[track_caller]
pub(crate) fn fits_primary_hdu(fits_fptr: &mut FitsFile) -> Result<FitsHdu, FitsError> {
    let caller = std::panic::Location::caller();
    fits_fptr.primary_hdu().map_err(|e| FitsError::Fitsio {
        fits_error: Box::new(e),
        fits_filename: fits_fptr.filename.clone().into_boxed_path(),
        hdu_description: "1".into(),
        source_file: caller.file(),
        source_line: caller.line(),
        source_column: caller.column(),
    })
}

/// Given a FITS file pointer and a HDU, write the image.
#[track_caller]
pub(crate) fn fits_write_image<T: WriteImage>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    data: &[T],
) -> Result<(), FitsError> {
    let caller = std::panic::Location::caller();
    match &hdu.info {
        HduInfo::ImageInfo { .. } => {
            hdu.write_image(fits_fptr, data)
                .map_err(|e| FitsError::Fitsio {
                    fits_error: Box::new(e),
                    fits_filename: fits_fptr.filename.clone().into_boxed_path(),
                    hdu_description: format!("{}", hdu.number + 1).into_boxed_str(),
                    source_file: caller.file(),
                    source_line: caller.line(),
                    source_column: caller.column(),
                })
        }
        _ => Err(FitsError::NotImage {
            fits_filename: fits_fptr.filename.clone().into_boxed_path(),
            hdu_num: hdu.number + 1,
            source_file: caller.file(),
            source_line: caller.line(),
            source_column: caller.column(),
        }),
    }
}

#[track_caller]
pub(crate) fn fits_write_string_key(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
    value: &str,
) -> Result<(), FitsError> {
    let caller = std::panic::Location::caller();
    hdu.write_key(fits_fptr, keyword, value.to_string())
        .map_err(|e| FitsError::Fitsio {
            fits_error: Box::new(e),
            fits_filename: fits_fptr.filename.clone().into_boxed_path(),
            hdu_description: format!("{}", hdu.number + 1).into_boxed_str(),
            source_file: caller.file(),
            source_line: caller.line(),
            source_column: caller.column(),
        })
}

fn write_primary<T: WriteImage>(
    file: &Path,
    shape: &[usize],
    data: &[T],
    data_type: ImageType,
    units: Option<&str>,
) -> Result<(), FitsError> {
    // FITS has no zero-dimensional images.
    let dimensions = if shape.is_empty() { &[1][..] } else { shape };
    debug!("Writing {dimensions:?} image to {}", file.display());

    let description = ImageDescription {
        data_type,
        dimensions,
    };
    let mut fptr = fits_create(file, &description)?;
    let hdu = fits_primary_hdu(&mut fptr)?;
    fits_write_image(&mut fptr, &hdu, data)?;
    if let Some(units) = units {
        fits_write_string_key(&mut fptr, &hdu, "BUNIT", units)?;
    }
    Ok(())
}

/// Write image data (in logical axis order) as the primary HDU of `file`.
pub fn write_image<P: AsRef<Path>>(
    file: P,
    data: &ArrayD<f32>,
    units: Option<&str>,
) -> Result<(), FitsError> {
    let data = data.as_standard_layout();
    let values = data.as_slice().unwrap_or_default();
    write_primary(file.as_ref(), data.shape(), values, ImageType::Float, units)
}

/// Write a mask as unsigned bytes, 1 for valid pixels.
pub fn write_mask<P: AsRef<Path>>(file: P, mask: &ArrayD<bool>) -> Result<(), FitsError> {
    let values: Vec<u8> = mask.iter().map(|&valid| valid as u8).collect();
    write_primary(
        file.as_ref(),
        mask.shape(),
        &values,
        ImageType::UnsignedByte,
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{counting, TempStore};

    fn image_shape(hdu: &FitsHdu) -> Vec<usize> {
        match &hdu.info {
            HduInfo::ImageInfo { shape, .. } => shape.clone(),
            _ => panic!("not an image"),
        }
    }

    #[test]
    fn test_write_image() {
        let store = TempStore::new();
        let file = store.path().join("out.fits");
        let data = counting(&[2, 3, 4]);
        write_image(&file, &data, Some("Jy/beam")).unwrap();

        let mut fptr = FitsFile::open(&file).unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        assert_eq!(image_shape(&hdu), [2, 3, 4]);
        let values: Vec<f32> = hdu.read_image(&mut fptr).unwrap();
        assert_eq!(values, data.iter().copied().collect::<Vec<_>>());
        let units: String = hdu.read_key(&mut fptr, "BUNIT").unwrap();
        assert_eq!(units, "Jy/beam");

        // Existing files are replaced.
        write_image(&file, &counting(&[5]), None).unwrap();
        let mut fptr = FitsFile::open(&file).unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        assert_eq!(image_shape(&hdu), [5]);
        assert!(hdu.read_key::<String>(&mut fptr, "BUNIT").is_err());
    }

    #[test]
    fn test_write_transposed_image() {
        let store = TempStore::new();
        let file = store.path().join("out.fits");
        let data = counting(&[2, 3]).reversed_axes();
        write_image(&file, &data, None).unwrap();

        let mut fptr = FitsFile::open(&file).unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        assert_eq!(image_shape(&hdu), [3, 2]);
        let values: Vec<f32> = hdu.read_image(&mut fptr).unwrap();
        assert_eq!(values, [0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_write_mask() {
        let store = TempStore::new();
        let file = store.path().join("mask.fits");
        let mask = ArrayD::from_shape_vec(vec![2, 2], vec![true, false, false, true]).unwrap();
        write_mask(&file, &mask).unwrap();

        let mut fptr = FitsFile::open(&file).unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        let values: Vec<u8> = hdu.read_image(&mut fptr).unwrap();
        assert_eq!(values, [1, 0, 0, 1]);
    }
}
