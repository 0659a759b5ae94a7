//! End-to-end test: synthesize a night directory with a config, a platepar,
//! and an FF file, run the annotation pipeline, and check the resulting
//! headers.

use std::fs;
use std::path::Path;

use serde_json::json;
use tempfile::TempDir;

use ff_annotate::commands::{annotate_directory, AnnotateOptions};
use ff_annotate::fits::{Card, FitsFile, Header, Hdu};

const FF_NAME: &str = "FF_XX0001_20230101_000000_000.fits";

/// Absolute separation between two angles in degrees, wrap-safe.
fn angle_diff(a: f64, b: f64) -> f64 {
    ((a - b + 180.0).rem_euclid(360.0) - 180.0).abs()
}

fn write_config(dir: &Path) {
    let text = "\
[System]
stationID: XX0001
latitude: +43.19301
longitude: -81.315555
elevation: 237.0

[Capture]
fps: 25.0
";
    fs::write(dir.join(".config"), text).unwrap();
}

fn write_platepar(dir: &Path) {
    // 36 reference stars on a 6x6 grid: a degree-5 polynomial per axis
    // needs at least 6 distinct coordinate values to stay full rank
    let mut star_list = Vec::new();
    for i in 0..6 {
        for j in 0..6 {
            let x = 100.0 + 200.0 * i as f64;
            let y = 50.0 + 110.0 * j as f64;
            star_list.push(json!([2459945.5, x, y, 4000.0]));
        }
    }

    let platepar = json!({
        "lat": 43.19301,
        "lon": -81.315555,
        "elev": 237.0,
        "X_res": 1280,
        "Y_res": 720,
        "JD": 2459945.5,
        "RA_d": 120.0,
        "dec_d": 40.0,
        "pos_angle_ref": 0.0,
        "F_scale": 16.0,
        "x_poly_rev": vec![0.0; 12],
        "y_poly_rev": vec![0.0; 12],
        "star_list": star_list,
        "station_code": "XX0001",
        "distortion_type": "poly3+radial"
    });
    fs::write(
        dir.join("platepar_cmn2010.cal"),
        serde_json::to_string(&platepar).unwrap(),
    )
    .unwrap();
}

fn write_ff_file(dir: &Path) {
    let mut primary = Header::new();
    primary.push(Card::logical("SIMPLE", true, Some("conforms to FITS standard")));
    primary.push(Card::int("BITPIX", 8, None));
    primary.push(Card::int("NAXIS", 0, None));
    // Pre-existing key: the merge must not overwrite it
    primary.push(Card::string("OBSERVER", "PRESET", None));

    let mut image = Header::new();
    image.push(Card::string("XTENSION", "IMAGE", Some("Image extension")));
    image.push(Card::int("BITPIX", 8, None));
    image.push(Card::int("NAXIS", 2, None));
    image.push(Card::int("NAXIS1", 64, None));
    image.push(Card::int("NAXIS2", 32, None));
    image.push(Card::int("PCOUNT", 0, None));
    image.push(Card::int("GCOUNT", 1, None));

    let fits = FitsFile {
        hdus: vec![
            Hdu::new(primary, Vec::new()),
            Hdu::new(image, vec![0u8; 64 * 32]),
        ],
    };
    fits.write_to(&dir.join(FF_NAME)).unwrap();
}

fn setup_night_dir() -> TempDir {
    let tmp = TempDir::new().unwrap();
    write_config(tmp.path());
    write_platepar(tmp.path());
    write_ff_file(tmp.path());
    tmp
}

#[test]
fn annotates_ff_file_in_place() {
    let tmp = setup_night_dir();
    annotate_directory(tmp.path(), &AnnotateOptions::default()).unwrap();

    let fits = FitsFile::open(&tmp.path().join(FF_NAME)).unwrap();
    assert_eq!(fits.hdus.len(), 2);

    let primary = &fits.hdus[0].header;
    let image = &fits.hdus[1].header;

    // Fixed metadata lands everywhere it was missing
    assert_eq!(
        primary.get_string("INSTRUME").as_deref(),
        Some("Global Meteor Network")
    );
    assert_eq!(primary.get_real("MJD-OBS"), Some(59945.0));
    assert_eq!(
        primary.get_string("DATE-OBS").as_deref(),
        Some("2023-01-01T00:00:00.000")
    );
    assert_eq!(primary.get_int("NFRAMES"), Some(256));
    assert_eq!(primary.get_real("EXPTIME"), Some(10.24));
    assert_eq!(primary.get_real("SITELONG"), Some(-81.32));
    assert_eq!(primary.get_real("SITELAT"), Some(43.19));
    assert_eq!(image.get_string("OBSERVER").as_deref(), Some("XX0001"));

    // Existing keys always win
    assert_eq!(primary.get_string("OBSERVER").as_deref(), Some("PRESET"));

    // The data-less first HDU never receives WCS keywords
    assert!(!primary.contains_key("CRVAL1"));
    assert!(!primary.contains_key("CRPIX1"));
    assert!(!primary.contains_key("CTYPE1"));

    // The image HDU gets the full WCS solution
    assert_eq!(image.get_string("CTYPE1").as_deref(), Some("RA---ZEA-SIP"));
    assert_eq!(image.get_string("CTYPE2").as_deref(), Some("DEC--ZEA-SIP"));
    assert!(image.contains_key("CRVAL1"));
    assert!(image.contains_key("CRVAL2"));
    assert_eq!(image.get_real("CRPIX1"), Some(640.0));
    assert_eq!(image.get_real("CRPIX2"), Some(360.0));
    assert!(image.contains_key("CD1_1"));
    assert_eq!(image.get_int("A_ORDER"), Some(5));

    // The field center points near the platepar reference at the mid-time
    let crval1 = image.get_real("CRVAL1").unwrap();
    let crval2 = image.get_real("CRVAL2").unwrap();
    assert!((crval2 - 40.0).abs() < 0.1, "CRVAL2 = {}", crval2);
    assert!(angle_diff(crval1, 120.0) < 0.1, "CRVAL1 = {}", crval1);

    // Image payload untouched
    assert_eq!(fits.hdus[1].data, vec![0u8; 64 * 32]);
}

#[test]
fn missing_recalibration_entry_matches_default_run() {
    let with_table = setup_night_dir();
    // Table exists but has no entry for our file
    fs::write(
        with_table.path().join("platepars_all_recalibrated.json"),
        "{}",
    )
    .unwrap();

    let without_table = setup_night_dir();

    annotate_directory(with_table.path(), &AnnotateOptions::default()).unwrap();
    annotate_directory(without_table.path(), &AnnotateOptions::default()).unwrap();

    let a = FitsFile::open(&with_table.path().join(FF_NAME)).unwrap();
    let b = FitsFile::open(&without_table.path().join(FF_NAME)).unwrap();
    assert_eq!(a.hdus[1].header, b.hdus[1].header);
}

#[test]
fn recalibrated_entry_shifts_the_solution() {
    let tmp = setup_night_dir();

    // Recalibrated pointing 2 degrees off the station platepar
    let recalibrated = json!({
        FF_NAME: {
            "X_res": 1280,
            "Y_res": 720,
            "JD": 2459945.5,
            "RA_d": 122.0,
            "dec_d": 40.0,
            "pos_angle_ref": 0.0,
            "F_scale": 16.0,
            "x_poly_rev": vec![0.0; 12],
            "y_poly_rev": vec![0.0; 12]
        }
    });
    fs::write(
        tmp.path().join("platepars_all_recalibrated.json"),
        serde_json::to_string(&recalibrated).unwrap(),
    )
    .unwrap();

    annotate_directory(tmp.path(), &AnnotateOptions::default()).unwrap();

    let fits = FitsFile::open(&tmp.path().join(FF_NAME)).unwrap();
    let crval1 = fits.hdus[1].header.get_real("CRVAL1").unwrap();
    assert!(angle_diff(crval1, 122.0) < 0.1, "CRVAL1 = {}", crval1);
}

#[test]
fn missing_config_still_completes() {
    let tmp = TempDir::new().unwrap();
    write_platepar(tmp.path());
    write_ff_file(tmp.path());

    annotate_directory(tmp.path(), &AnnotateOptions::default()).unwrap();

    let fits = FitsFile::open(&tmp.path().join(FF_NAME)).unwrap();
    // Bundled default config still stamps EXPTIME at 25 fps
    assert_eq!(fits.hdus[0].header.get_real("EXPTIME"), Some(10.24));
}

#[test]
fn dry_run_leaves_files_untouched() {
    let tmp = setup_night_dir();
    let before = fs::read(tmp.path().join(FF_NAME)).unwrap();

    let options = AnnotateOptions {
        dry_run: true,
        ..AnnotateOptions::default()
    };
    annotate_directory(tmp.path(), &options).unwrap();

    let after = fs::read(tmp.path().join(FF_NAME)).unwrap();
    assert_eq!(before, after);
}

#[test]
fn non_ff_files_are_ignored() {
    let tmp = setup_night_dir();
    fs::write(tmp.path().join("flat_20230101.fits"), b"not a fits file").unwrap();

    annotate_directory(tmp.path(), &AnnotateOptions::default()).unwrap();
    assert_eq!(
        fs::read(tmp.path().join("flat_20230101.fits")).unwrap(),
        b"not a fits file"
    );
}

#[test]
fn malformed_ff_file_fails_the_batch_but_not_the_rest() {
    let tmp = setup_night_dir();
    fs::write(tmp.path().join("FF_XX0001_20230101_001000_000.fits"), b"garbage").unwrap();

    let err = annotate_directory(tmp.path(), &AnnotateOptions::default()).unwrap_err();
    assert!(err.to_string().contains("1 of 2"));

    // The good file was still annotated
    let fits = FitsFile::open(&tmp.path().join(FF_NAME)).unwrap();
    assert!(fits.hdus[1].header.contains_key("CRVAL1"));
}
