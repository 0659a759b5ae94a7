use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Default station-wide calibration file inside a night directory.
pub const PLATEPAR_FILE: &str = "platepar_cmn2010.cal";

/// Per-image recalibrated platepar table inside a night directory.
pub const RECALIBRATED_FILE: &str = "platepars_all_recalibrated.json";

/// Camera calibration model ("platepar"): the mapping between pixel
/// coordinates and sky coordinates for one camera.
///
/// Field names mirror the on-disk `.cal` JSON format. `star_list` rows are
/// matched reference stars; columns 1 and 2 are the pixel x/y centroids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platepar {
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    #[serde(default)]
    pub elev: f64,

    #[serde(rename = "X_res")]
    pub x_res: u32,
    #[serde(rename = "Y_res")]
    pub y_res: u32,

    /// Reference epoch of the pointing solution, as a Julian date.
    #[serde(rename = "JD")]
    pub jd_ref: f64,
    /// Right ascension of the image center at the reference epoch, degrees.
    #[serde(rename = "RA_d")]
    pub ra_ref: f64,
    /// Declination of the image center, degrees.
    #[serde(rename = "dec_d")]
    pub dec_ref: f64,
    /// Position angle of the image +y axis on the sky, degrees east of north.
    #[serde(default)]
    pub pos_angle_ref: f64,
    /// Plate scale in pixels per degree.
    #[serde(rename = "F_scale")]
    pub f_scale: f64,

    /// Reverse (image to sky) distortion polynomial, x axis. 12 coefficients
    /// of the poly3+radial family.
    #[serde(default)]
    pub x_poly_rev: Vec<f64>,
    /// Reverse (image to sky) distortion polynomial, y axis.
    #[serde(default)]
    pub y_poly_rev: Vec<f64>,

    #[serde(default)]
    pub star_list: Vec<Vec<f64>>,

    #[serde(default)]
    pub station_code: Option<String>,
    #[serde(default = "default_distortion_type")]
    pub distortion_type: String,
}

fn default_distortion_type() -> String {
    "poly3+radial".to_string()
}

impl Default for Platepar {
    fn default() -> Self {
        Platepar {
            lat: 0.0,
            lon: 0.0,
            elev: 0.0,
            x_res: 1280,
            y_res: 720,
            jd_ref: 2451545.0,
            ra_ref: 0.0,
            dec_ref: 45.0,
            pos_angle_ref: 0.0,
            f_scale: 16.0,
            x_poly_rev: vec![0.0; 12],
            y_poly_rev: vec![0.0; 12],
            star_list: Vec::new(),
            station_code: None,
            distortion_type: default_distortion_type(),
        }
    }
}

impl Platepar {
    pub fn read(path: &Path) -> Result<Platepar> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read platepar: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse platepar: {}", path.display()))
    }

    /// Materialize a platepar from an already-parsed JSON payload, as stored
    /// in the recalibrated table.
    pub fn from_value(value: &serde_json::Value) -> Result<Platepar> {
        serde_json::from_value(value.clone()).context("Failed to parse platepar payload")
    }

    /// Pixel centroids of the matched reference stars.
    pub fn star_pixels(&self) -> Vec<(f64, f64)> {
        self.star_list
            .iter()
            .filter(|row| row.len() >= 3)
            .map(|row| (row[1], row[2]))
            .collect()
    }
}

/// Per-image recalibrated platepars, keyed by FF base filename. Loaded once
/// and read-only afterwards.
#[derive(Debug, Default)]
pub struct RecalibratedSet {
    entries: HashMap<String, serde_json::Value>,
}

impl RecalibratedSet {
    pub fn read(path: &Path) -> Result<RecalibratedSet> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read recalibrated platepars: {}", path.display()))?;
        let entries = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse recalibrated platepars: {}", path.display()))?;
        Ok(RecalibratedSet { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pick the calibration to use for one image: the recalibrated entry when
    /// present and parseable, the station default otherwise. Never fails; a
    /// degraded resolution is logged as a warning naming the image.
    pub fn resolve(&self, ff_basename: &str, fallback: &Platepar) -> Platepar {
        match self.entries.get(ff_basename) {
            Some(value) => match Platepar::from_value(value) {
                Ok(platepar) => platepar,
                Err(e) => {
                    warn!(
                        "Unreadable recalibrated platepar for {}, using default: {:#}",
                        ff_basename, e
                    );
                    fallback.clone()
                }
            },
            None => {
                warn!("Using non-recalibrated platepar for {}", ff_basename);
                fallback.clone()
            }
        }
    }
}

/// Load the station-wide default platepar, degrading to the bundled default
/// model with a warning when the file is missing or unreadable.
pub fn load_default(dir: &Path) -> Platepar {
    let path = dir.join(PLATEPAR_FILE);
    match Platepar::read(&path) {
        Ok(platepar) => platepar,
        Err(_) => {
            warn!(
                "Couldn't find {} in {}, using default",
                PLATEPAR_FILE,
                dir.display()
            );
            Platepar::default()
        }
    }
}

/// Load the recalibrated platepar table, degrading to an empty table with a
/// warning when the file is missing.
pub fn load_recalibrated(dir: &Path) -> RecalibratedSet {
    let path = dir.join(RECALIBRATED_FILE);
    match RecalibratedSet::read(&path) {
        Ok(set) => set,
        Err(_) => {
            warn!(
                "Could not find {} in {}",
                RECALIBRATED_FILE,
                dir.display()
            );
            RecalibratedSet::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn platepar_json() -> serde_json::Value {
        json!({
            "lat": 45.317,
            "lon": 13.567,
            "elev": 92.0,
            "X_res": 1280,
            "Y_res": 720,
            "JD": 2459945.5,
            "RA_d": 123.4,
            "dec_d": 56.7,
            "pos_angle_ref": 12.3,
            "F_scale": 14.5,
            "x_poly_rev": vec![0.0; 12],
            "y_poly_rev": vec![0.0; 12],
            "star_list": [[2459945.5, 100.0, 200.0, 5000.0], [2459945.5, 640.0, 360.0, 3000.0]],
            "station_code": "HR000K"
        })
    }

    #[test]
    fn test_parse_cal_json() {
        let platepar = Platepar::from_value(&platepar_json()).unwrap();
        assert_eq!(platepar.x_res, 1280);
        assert_eq!(platepar.ra_ref, 123.4);
        assert_eq!(platepar.distortion_type, "poly3+radial");
        assert_eq!(
            platepar.star_pixels(),
            vec![(100.0, 200.0), (640.0, 360.0)]
        );
    }

    #[test]
    fn test_star_pixels_skips_short_rows() {
        let mut platepar = Platepar::default();
        platepar.star_list = vec![vec![1.0], vec![0.0, 10.0, 20.0]];
        assert_eq!(platepar.star_pixels(), vec![(10.0, 20.0)]);
    }

    #[test]
    fn test_resolve_prefers_recalibrated_entry() {
        let mut entries = HashMap::new();
        entries.insert("FF_A.fits".to_string(), platepar_json());
        let set = RecalibratedSet { entries };

        let fallback = Platepar::default();
        let resolved = set.resolve("FF_A.fits", &fallback);
        assert_eq!(resolved.ra_ref, 123.4);
    }

    #[test]
    fn test_resolve_falls_back_on_missing_entry() {
        let set = RecalibratedSet::default();
        let fallback = Platepar::default();
        let resolved = set.resolve("FF_B.fits", &fallback);
        assert_eq!(resolved.ra_ref, fallback.ra_ref);
    }

    #[test]
    fn test_resolve_falls_back_on_bad_payload() {
        let mut entries = HashMap::new();
        entries.insert("FF_C.fits".to_string(), json!({"X_res": "wide"}));
        let set = RecalibratedSet { entries };

        let fallback = Platepar::default();
        let resolved = set.resolve("FF_C.fits", &fallback);
        assert_eq!(resolved.x_res, fallback.x_res);
    }

    #[test]
    fn test_load_missing_files_degrade() {
        let dir = Path::new("/nonexistent/night/dir");
        assert!(load_recalibrated(dir).is_empty());
        assert_eq!(load_default(dir).x_res, Platepar::default().x_res);
    }
}
