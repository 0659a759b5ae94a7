//! Platepar-based astrometric projection: pixel coordinates to equatorial
//! sky coordinates at a given observation time.
//!
//! Pipeline per point, following the plate model the calibration encodes:
//!
//! ```text
//! pixel → center-relative offset → reverse distortion polynomial
//!       → angular radius (F_scale) + position angle (pos_angle_ref)
//!       → spherical offset from the apparent field center
//! ```
//!
//! The camera is fixed to the Earth, so the apparent field-center RA advances
//! at the sidereal rate from the calibration epoch; declination stays fixed.

use chrono::NaiveDateTime;

use crate::fffile::julian_date;
use crate::platepar::Platepar;

/// Apparent sidereal motion, degrees of RA per day.
const SIDEREAL_DEG_PER_DAY: f64 = 360.98564736629;

/// Project pixel coordinates to (RA, Dec) in degrees under the given
/// calibration model and observation time.
///
/// Pure function of its inputs; `xs` and `ys` must have equal length.
pub fn xy_to_ra_dec(
    time: NaiveDateTime,
    xs: &[f64],
    ys: &[f64],
    platepar: &Platepar,
) -> (Vec<f64>, Vec<f64>) {
    assert_eq!(xs.len(), ys.len(), "pixel coordinate arrays differ in length");

    let jd = julian_date(time);
    let ra_center = normalize_deg(
        platepar.ra_ref + SIDEREAL_DEG_PER_DAY * (jd - platepar.jd_ref),
    );
    let dec_center = platepar.dec_ref;

    let cx = platepar.x_res as f64 / 2.0;
    let cy = platepar.y_res as f64 / 2.0;

    let mut ra_out = Vec::with_capacity(xs.len());
    let mut dec_out = Vec::with_capacity(xs.len());

    for (&x, &y) in xs.iter().zip(ys) {
        let (ux, uy) = apply_reverse_distortion(platepar, x - cx, y - cy);

        let radius_deg = (ux * ux + uy * uy).sqrt() / platepar.f_scale;
        // Position angle east of north; pixel +y points down, so -y is "up"
        // along the pos_angle_ref direction.
        let pa = platepar.pos_angle_ref.to_radians() + ux.atan2(-uy);

        let (ra, dec) = offset_on_sphere(ra_center, dec_center, radius_deg, pa);
        ra_out.push(ra);
        dec_out.push(dec);
    }

    (ra_out, dec_out)
}

/// Correct a center-relative pixel offset with the reverse (image to sky)
/// poly3+radial distortion polynomial. Platepars with missing or truncated
/// coefficient vectors are treated as distortion-free.
fn apply_reverse_distortion(platepar: &Platepar, dx: f64, dy: f64) -> (f64, f64) {
    let px = &platepar.x_poly_rev;
    let py = &platepar.y_poly_rev;
    if px.len() < 12 || py.len() < 12 {
        return (dx, dy);
    }

    let r = (dx * dx + dy * dy).sqrt();
    let ex = poly3_radial(px, dx, dy, r);
    let ey = poly3_radial(py, dx, dy, r);
    (dx + ex, dy + ey)
}

/// Evaluate one axis of the poly3+radial distortion family: a full bivariate
/// cubic plus two radially-weighted terms.
fn poly3_radial(c: &[f64], dx: f64, dy: f64, r: f64) -> f64 {
    c[0] + c[1] * dx
        + c[2] * dy
        + c[3] * dx * dx
        + c[4] * dx * dy
        + c[5] * dy * dy
        + c[6] * dx * dx * dx
        + c[7] * dx * dx * dy
        + c[8] * dx * dy * dy
        + c[9] * dy * dy * dy
        + c[10] * dx * r
        + c[11] * dy * r
}

/// Move `dist_deg` degrees from (`ra0`, `dec0`) along position angle `pa`
/// (radians, east of north) on the celestial sphere.
fn offset_on_sphere(ra0_deg: f64, dec0_deg: f64, dist_deg: f64, pa: f64) -> (f64, f64) {
    let d = dist_deg.to_radians();
    let dec0 = dec0_deg.to_radians();

    let dec = (dec0.sin() * d.cos() + dec0.cos() * d.sin() * pa.cos()).asin();
    let dra = (pa.sin() * d.sin() * dec0.cos()).atan2(d.cos() - dec0.sin() * dec.sin());

    (normalize_deg(ra0_deg + dra.to_degrees()), dec.to_degrees())
}

/// Wrap an angle into [0, 360).
pub fn normalize_deg(angle: f64) -> f64 {
    angle.rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fffile::filename_to_datetime;

    // Platepar whose reference epoch matches FF_XX0001_20230101_000000_000
    fn test_platepar() -> Platepar {
        Platepar {
            jd_ref: 2459945.5,
            ra_ref: 120.0,
            dec_ref: 40.0,
            pos_angle_ref: 0.0,
            f_scale: 16.0,
            ..Platepar::default()
        }
    }

    fn epoch_time() -> NaiveDateTime {
        filename_to_datetime("FF_XX0001_20230101_000000_000.fits").unwrap()
    }

    #[test]
    fn test_center_pixel_maps_to_reference_pointing() {
        let pp = test_platepar();
        let (ra, dec) = xy_to_ra_dec(epoch_time(), &[640.0], &[360.0], &pp);
        assert!((ra[0] - 120.0).abs() < 1e-9, "ra = {}", ra[0]);
        assert!((dec[0] - 40.0).abs() < 1e-9, "dec = {}", dec[0]);
    }

    #[test]
    fn test_pixel_above_center_increases_dec() {
        let pp = test_platepar();
        // 16 px up is 1 degree at f_scale 16
        let (ra, dec) = xy_to_ra_dec(epoch_time(), &[640.0], &[360.0 - 16.0], &pp);
        assert!((dec[0] - 41.0).abs() < 1e-9, "dec = {}", dec[0]);
        assert!((ra[0] - 120.0).abs() < 1e-9, "ra = {}", ra[0]);
    }

    #[test]
    fn test_pixel_right_of_center_increases_ra_at_equator() {
        let mut pp = test_platepar();
        pp.dec_ref = 0.0;
        let (ra, dec) = xy_to_ra_dec(epoch_time(), &[640.0 + 16.0], &[360.0], &pp);
        assert!((ra[0] - 121.0).abs() < 1e-9, "ra = {}", ra[0]);
        assert!(dec[0].abs() < 1e-9, "dec = {}", dec[0]);
    }

    #[test]
    fn test_field_center_tracks_sidereal_rate() {
        let pp = test_platepar();
        let later = filename_to_datetime("FF_XX0001_20230102_000000_000.fits").unwrap();
        let (ra, dec) = xy_to_ra_dec(later, &[640.0], &[360.0], &pp);
        // One solar day later the field center has advanced ~0.9856 deg in RA
        assert!((ra[0] - (120.0 + 0.98564736629)).abs() < 1e-6, "ra = {}", ra[0]);
        assert!((dec[0] - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_distortion_shifts_projection() {
        let mut pp = test_platepar();
        // Constant x offset of 16 px: everything shifts one degree on the sky
        pp.x_poly_rev[0] = 16.0;
        let (ra_d, _) = xy_to_ra_dec(epoch_time(), &[640.0], &[360.0], &pp);

        pp.x_poly_rev[0] = 0.0;
        let (ra_u, _) = xy_to_ra_dec(epoch_time(), &[640.0 + 16.0], &[360.0], &pp);
        assert!((ra_d[0] - ra_u[0]).abs() < 1e-9);
    }

    #[test]
    fn test_projection_is_pure() {
        let pp = test_platepar();
        let a = xy_to_ra_dec(epoch_time(), &[100.0, 200.0], &[50.0, 60.0], &pp);
        let b = xy_to_ra_dec(epoch_time(), &[100.0, 200.0], &[50.0, 60.0], &pp);
        assert_eq!(a, b);
    }
}
