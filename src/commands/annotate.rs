use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::astrometry::xy_to_ra_dec;
use crate::config::{self, Config};
use crate::fffile::{self, FF_NFRAMES};
use crate::fits::{Card, FitsFile, Header};
use crate::platepar::{self, Platepar, RecalibratedSet};
use crate::wcs::{fit_wcs, Projection, DEFAULT_FIT_ORDER};

#[derive(Debug, Clone)]
pub struct AnnotateOptions {
    /// Polynomial order of the WCS fit.
    pub order: usize,
    pub projection: Projection,
    /// Compute everything but leave the files untouched.
    pub dry_run: bool,
}

impl Default for AnnotateOptions {
    fn default() -> Self {
        AnnotateOptions {
            order: DEFAULT_FIT_ORDER,
            projection: Projection::default(),
            dry_run: false,
        }
    }
}

/// Annotate every FF file in a night directory.
///
/// Configuration, the station platepar, and the recalibrated-platepar table
/// are loaded once; each file is then processed independently. A failing
/// file is logged and skipped so the rest of the batch still runs; the
/// result is an error if any file failed.
pub fn annotate_directory(dir: &Path, options: &AnnotateOptions) -> Result<()> {
    let config = config::load(dir);
    let recalibrated = platepar::load_recalibrated(dir);
    let station_platepar = platepar::load_default(dir);

    let ff_files = find_ff_files(dir)?;
    if ff_files.is_empty() {
        info!("No FF files found in {}", dir.display());
        return Ok(());
    }

    let mut failures = 0usize;
    for path in &ff_files {
        info!("Updating {}", path.display());
        if let Err(e) = annotate_file(path, &config, &recalibrated, &station_platepar, options) {
            error!("Failed to annotate {}: {:#}", path.display(), e);
            failures += 1;
        }
    }

    if failures > 0 {
        bail!("{} of {} FF file(s) failed", failures, ff_files.len());
    }
    Ok(())
}

/// All `FF*fits` files in the directory, sorted for stable processing order.
fn find_ff_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = Regex::new(r"^FF.*fits$")?;

    let mut files = Vec::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if pattern.is_match(name) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Add FITS metadata and a fitted WCS to one FF file, rewriting it in place.
pub fn annotate_file(
    path: &Path,
    config: &Config,
    recalibrated: &RecalibratedSet,
    station_platepar: &Platepar,
    options: &AnnotateOptions,
) -> Result<()> {
    let basename = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid file name: {}", path.display()))?;

    let platepar = recalibrated.resolve(basename, station_platepar);

    let start_time = fffile::filename_to_datetime(basename)?;
    let mid_time = fffile::middle_time(start_time, config.fps);

    // Reference star positions come from the station platepar: recalibrated
    // payloads carry updated pointing, not fitted star lists.
    let stars = station_platepar.star_pixels();
    let (star_x, star_y): (Vec<f64>, Vec<f64>) = stars.into_iter().unzip();

    let (star_ra, star_dec) = xy_to_ra_dec(mid_time, &star_x, &star_y, &platepar);

    let x0 = platepar.x_res as f64 / 2.0;
    let y0 = platepar.y_res as f64 / 2.0;
    let (center_ra, center_dec) = xy_to_ra_dec(mid_time, &[x0], &[y0], &platepar);

    let wcs = fit_wcs(
        &star_x,
        &star_y,
        &star_ra,
        &star_dec,
        x0,
        y0,
        center_ra[0],
        center_dec[0],
        options.order,
        options.projection,
    )?;

    let mut fits = FitsFile::open(path)?;
    let metadata = fixed_metadata(config, start_time);

    for hdu in &mut fits.hdus {
        // The first HDU of an FF file has no image and must not get WCS keys
        let mut candidate = if hdu.naxis() == 0 {
            Header::new()
        } else {
            wcs.to_header()
        };
        for card in &metadata {
            candidate.push(card.clone());
        }
        hdu.header.merge_missing(&candidate);
    }

    if options.dry_run {
        info!("Dry run, leaving {} untouched", path.display());
        return Ok(());
    }
    fits.write_to(path)
}

/// The fixed station/observation metadata set stamped into every HDU.
fn fixed_metadata(config: &Config, start_time: NaiveDateTime) -> Vec<Card> {
    vec![
        Card::string("OBSERVER", config.station_id.trim(), None),
        Card::string("INSTRUME", "Global Meteor Network", None),
        Card::real("MJD-OBS", fffile::mjd(start_time), None),
        Card::string("DATE-OBS", &fffile::date_obs(start_time), None),
        Card::int("NFRAMES", FF_NFRAMES as i64, None),
        Card::real("EXPTIME", FF_NFRAMES as f64 / config.fps, None),
        Card::real("SITELONG", round2(config.longitude), None),
        Card::real("SITELAT", round2(config.latitude), None),
    ]
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
