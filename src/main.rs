use std::{path::PathBuf, process::exit, thread::scope};

use clap::{AppSettings, Parser, Subcommand};
use crossbeam_channel::{bounded, Receiver, Sender};
use crossbeam_utils::atomic::AtomicCell;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, error, info};
use ndarray::{prelude::*, Slice};
use thiserror::Error;

use casa_tiles::{
    fits::{write_image, write_mask, FitsError},
    metadata::{BeamInfo, Capability, MetadataReader},
    read::{
        parse_region, CasaImage, Element, ImageOptions, LazyArray, ReadError, SliceError,
        DEFAULT_MASK_NAME,
    },
};

#[derive(Parser)]
#[clap(version, about)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(disable_help_subcommand = true)]
#[clap(infer_subcommands = true)]
#[clap(infer_long_args = true)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// The verbosity of the program. Increase by specifying multiple times
    /// (e.g. -vv). The default is to print only high-level information.
    #[clap(short, long, parse(from_occurrences), global = true)]
    verbosity: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Print the layout of a CASA image.
    Info {
        /// The CASA image directory.
        image: PathBuf,

        /// The sub-directory holding the image's mask.
        #[clap(long, default_value_t = String::from(DEFAULT_MASK_NAME))]
        mask_name: String,
    },

    /// Write a CASA image (or a region of it) out as FITS.
    Export {
        /// The CASA image directory.
        image: PathBuf,

        /// The FITS file to be written.
        #[clap(short, long)]
        output: PathBuf,

        /// Only export this region, e.g. "0, :, 100:200". Integer entries
        /// remove their axis.
        #[clap(short, long)]
        region: Option<String>,

        /// Export the mask rather than the data.
        #[clap(long)]
        mask: bool,

        /// The sub-directory holding the image's mask.
        #[clap(long, default_value_t = String::from(DEFAULT_MASK_NAME))]
        mask_name: String,

        /// Disable progress bars.
        #[clap(long)]
        no_progress_bars: bool,
    },
}

#[derive(Error, Debug)]
enum CasaTilesError {
    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Slice(#[from] SliceError),

    #[error(transparent)]
    Fits(#[from] FitsError),

    #[error("A tile-reading thread panicked")]
    Panicked,
}

fn main() {
    let args = Args::parse();
    setup_logging(args.verbosity);

    if let Err(e) = run(args.command) {
        error!("{e}");
        exit(1);
    }
}

fn run(command: Command) -> Result<(), CasaTilesError> {
    let reader = match MetadataReader::discover() {
        Capability::Available(reader) => reader,
        Capability::Unavailable(reason) => return Err(CasaTilesError::Unavailable(reason)),
    };

    match command {
        Command::Info { image, mask_name } => {
            let image = CasaImage::open_with(image, &reader, ImageOptions { mask_name })?;
            print_info(&image);
        }

        Command::Export {
            image,
            output,
            region,
            mask,
            mask_name,
            no_progress_bars,
        } => {
            let image = CasaImage::open_with(image, &reader, ImageOptions { mask_name })?;
            let slices = region.as_deref().map(parse_region).transpose()?;
            if mask {
                let data = match slices {
                    Some(slices) => image.read_mask_region(&slices)?,
                    None => materialize(&image.read_mask()?, no_progress_bars)?,
                };
                write_mask(&output, &data)?;
            } else {
                let data = match slices {
                    Some(slices) => image.read_region(&slices)?,
                    None => materialize(&image.read_full()?, no_progress_bars)?,
                };
                write_image(&output, &data, image.info().units.as_deref())?;
            }
            info!("Wrote {}", output.display());
        }
    }

    Ok(())
}

fn print_info(image: &CasaImage) {
    let geometry = image.geometry();
    info!("CASA image {}", image.path().display());
    info!("Shape: {:?}", image.shape());
    if geometry.scalar_broadcast {
        info!("Every pixel holds the same value");
    } else {
        info!("Tile shape: {:?}", geometry.logical_tile_shape());
        let grid: Vec<usize> = geometry.stacks().into_iter().rev().collect();
        info!("Tile grid: {grid:?} ({} tiles)", geometry.num_tiles());
    }
    info!("Bucket size: {} bytes", geometry.bucket_size);

    let info = image.info();
    info!("Units: {}", info.units.as_deref().unwrap_or("unknown"));
    match &info.beam {
        BeamInfo::None => info!("Beam: none"),
        BeamInfo::Single(beam) => info!(
            "Beam: {} {} x {} {}, PA {} {}",
            beam.major.value,
            beam.major.unit,
            beam.minor.value,
            beam.minor.unit,
            beam.pa.value,
            beam.pa.unit
        ),
        BeamInfo::PerPlane(beams) => info!("Beam: one per plane ({} planes)", beams.len()),
    }

    let mask = &image.options().mask_name;
    if image.has_mask() {
        info!("Mask '{mask}': present");
    } else {
        info!("Mask '{mask}': absent");
    }
}

/// Read every tile of `lazy` on one thread and assemble them on another.
fn materialize<T: Element>(
    lazy: &LazyArray<T>,
    no_progress_bars: bool,
) -> Result<ArrayD<T>, CasaTilesError> {
    let chunks = lazy.chunks();
    let num_chunks = chunks.len();
    debug!("Materializing {num_chunks} chunks");

    let (tx, rx) = bounded(5);
    let error = AtomicCell::new(false);
    let multi_progress = MultiProgress::with_draw_target(if no_progress_bars {
        ProgressDrawTarget::hidden()
    } else {
        ProgressDrawTarget::stdout()
    });
    let style = ProgressStyle::default_bar()
        .template(
            "{msg:17}: [{wide_bar:.blue}] {pos:2}/{len:2} tiles ({elapsed_precise}<{eta_precise})",
        )
        .unwrap()
        .progress_chars("=> ");
    let read_progress = multi_progress.add(
        ProgressBar::new(num_chunks as _)
            .with_style(style.clone())
            .with_position(0)
            .with_message("Reading"),
    );
    let assemble_progress = multi_progress.add(
        ProgressBar::new(num_chunks as _)
            .with_style(style)
            .with_position(0)
            .with_message("Assembling"),
    );
    read_progress.tick();
    assemble_progress.tick();

    scope(|s| {
        let read_handle = s.spawn(|| read_chunks(lazy, tx, &error, read_progress));
        let assemble_handle =
            s.spawn(|| assemble_chunks(lazy.shape(), rx, &error, assemble_progress));

        let read_result = read_handle.join().map_err(|_| CasaTilesError::Panicked)?;
        let data = assemble_handle
            .join()
            .map_err(|_| CasaTilesError::Panicked)?;
        read_result?;
        Ok(data)
    })
}

fn read_chunks<T: Element>(
    lazy: &LazyArray<T>,
    tx: Sender<(Vec<usize>, ArrayD<T>)>,
    error: &AtomicCell<bool>,
    progress: ProgressBar,
) -> Result<(), ReadError> {
    for chunk in lazy.chunks() {
        if error.load() {
            break;
        }
        let data = match chunk.read() {
            Ok(data) => data,
            Err(e) => {
                error.store(true);
                progress.abandon_with_message("Failed");
                return Err(e);
            }
        };
        // The receiver only hangs up if it's stopped early.
        if tx.send((chunk.origin().to_vec(), data)).is_err() {
            break;
        }
        progress.inc(1);
    }
    progress.abandon_with_message("Finished reading");
    Ok(())
}

fn assemble_chunks<T: Element>(
    shape: &[usize],
    rx: Receiver<(Vec<usize>, ArrayD<T>)>,
    error: &AtomicCell<bool>,
    progress: ProgressBar,
) -> ArrayD<T> {
    let mut out = ArrayD::from_elem(shape, T::default());
    for (origin, data) in rx.iter() {
        if error.load() {
            break;
        }
        out.slice_each_axis_mut(|ax| {
            let (o, n) = (origin[ax.axis.index()], data.len_of(ax.axis));
            Slice::from(o..o + n)
        })
        .assign(&data);
        progress.inc(1);
    }
    progress.abandon_with_message("Finished assembling");
    out
}

fn setup_logging(verbosity: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.target(env_logger::Target::Stdout);
    builder.format_target(false);
    match verbosity {
        0 => builder.filter_level(log::LevelFilter::Info),
        1 => builder.filter_level(log::LevelFilter::Debug),
        2 => builder.filter_level(log::LevelFilter::Trace),
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
            builder.format(|buf, record| {
                use std::io::Write;

                let timestamp = buf.timestamp();
                let level = record.level();
                let target = record.target();
                let line = record.line().unwrap_or(0);
                let message = record.args();

                writeln!(buf, "[{timestamp} {level} {target}:{line}] {message}")
            })
        }
    };
    builder.init();
}
