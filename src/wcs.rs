//! Polynomial WCS fitting.
//!
//! Given matched pixel/sky coordinate pairs and an anchor point, fits a
//! zenithal sky projection with SIP polynomial distortion and serializes it
//! into FITS-standard header keywords.
//!
//! The fit works on an anchor-centered projection plane: sky coordinates are
//! projected with an identity CD matrix, a bivariate polynomial in the
//! center-relative pixel offsets is least-squares fitted per plane axis, and
//! the anchor is iteratively moved to the image of the constant term so the
//! final transform passes through it exactly. The linear terms become the CD
//! matrix; higher-order terms become SIP coefficients.

use std::f64::consts::PI;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use nalgebra::{DMatrix, DVector};

use crate::astrometry::normalize_deg;
use crate::fits::{Card, Header};

/// Default polynomial order of the fit.
pub const DEFAULT_FIT_ORDER: usize = 5;

/// Number of anchor-refinement iterations of the fit loop.
const FIT_ITERATIONS: usize = 5;

/// Supported sky projection families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    /// Zenithal equal-area.
    #[default]
    Zea,
    /// Gnomonic (tangent plane).
    Tan,
}

impl Projection {
    pub fn code(&self) -> &'static str {
        match self {
            Projection::Zea => "ZEA",
            Projection::Tan => "TAN",
        }
    }

    /// Native latitude (radians) to radial distance on the projection plane
    /// (degrees).
    fn project(&self, theta: f64) -> f64 {
        let zenith = PI / 2.0 - theta;
        match self {
            Projection::Zea => (360.0 / PI) * (zenith / 2.0).sin(),
            Projection::Tan => (180.0 / PI) * zenith.tan(),
        }
    }

    /// Radial distance on the projection plane (degrees) to native latitude
    /// (radians).
    fn deproject(&self, radius: f64) -> f64 {
        let zenith = match self {
            Projection::Zea => 2.0 * (radius * PI / 360.0).asin(),
            Projection::Tan => (radius * PI / 180.0).atan(),
        };
        PI / 2.0 - zenith
    }
}

impl FromStr for Projection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zea" => Ok(Projection::Zea),
            "tan" => Ok(Projection::Tan),
            _ => Err(format!("Unknown projection: {} (expected zea or tan)", s)),
        }
    }
}

/// A fitted WCS transform: linear CD matrix plus SIP distortion around an
/// anchor pixel/sky pair.
#[derive(Debug, Clone)]
pub struct FittedWcs {
    /// Reference pixel (CRPIX), 0-based image coordinates.
    pub crpix: [f64; 2],
    /// Sky coordinate of the reference pixel (CRVAL), degrees.
    pub crval: [f64; 2],
    /// Linear transformation matrix, degrees per pixel.
    pub cd: [[f64; 2]; 2],
    pub projection: Projection,
    pub order: usize,
    /// SIP forward coefficients, indexed `[p][q]` for the u^p v^q term.
    a_sip: Vec<Vec<f64>>,
    b_sip: Vec<Vec<f64>>,
}

impl FittedWcs {
    /// Evaluate the transform: pixel coordinates to (RA, Dec) degrees.
    ///
    /// The anchor pixel maps to `crval` exactly; SIP terms are all of
    /// order >= 2 and vanish there.
    pub fn pixel_to_world(&self, x: f64, y: f64) -> (f64, f64) {
        let u = x - self.crpix[0];
        let v = y - self.crpix[1];

        let mut du = 0.0;
        let mut dv = 0.0;
        for p in 0..=self.order {
            for q in 0..=self.order - p {
                if p + q < 2 {
                    continue;
                }
                let term = u.powi(p as i32) * v.powi(q as i32);
                du += self.a_sip[p][q] * term;
                dv += self.b_sip[p][q] * term;
            }
        }

        let (uu, vv) = (u + du, v + dv);
        let px = self.cd[0][0] * uu + self.cd[0][1] * vv;
        let py = self.cd[1][0] * uu + self.cd[1][1] * vv;
        plane_to_celestial(self.projection, px, py, self.crval[0], self.crval[1])
    }

    /// Serialize into the FITS-standard WCS keyword set.
    pub fn to_header(&self) -> Header {
        let mut header = Header::default();
        header.push(Card::int("WCSAXES", 2, Some("Number of coordinate axes")));
        header.push(Card::real(
            "CRPIX1",
            self.crpix[0],
            Some("Pixel coordinate of reference point"),
        ));
        header.push(Card::real(
            "CRPIX2",
            self.crpix[1],
            Some("Pixel coordinate of reference point"),
        ));
        for (i, row) in self.cd.iter().enumerate() {
            for (j, &value) in row.iter().enumerate() {
                header.push(Card::real(
                    &format!("CD{}_{}", i + 1, j + 1),
                    value,
                    Some("Coordinate transformation matrix element"),
                ));
            }
        }
        header.push(Card::string("CUNIT1", "deg", Some("Units of coordinate increment and value")));
        header.push(Card::string("CUNIT2", "deg", Some("Units of coordinate increment and value")));
        header.push(Card::string(
            "CTYPE1",
            &format!("RA---{}-SIP", self.projection.code()),
            Some("Right ascension, SIP distortions"),
        ));
        header.push(Card::string(
            "CTYPE2",
            &format!("DEC--{}-SIP", self.projection.code()),
            Some("Declination, SIP distortions"),
        ));
        header.push(Card::real("CRVAL1", self.crval[0], Some("[deg] Coordinate value at reference point")));
        header.push(Card::real("CRVAL2", self.crval[1], Some("[deg] Coordinate value at reference point")));
        header.push(Card::real("LONPOLE", 180.0, Some("[deg] Native longitude of celestial pole")));
        header.push(Card::real("LATPOLE", self.crval[1], Some("[deg] Native latitude of celestial pole")));
        header.push(Card::string("RADESYS", "ICRS", Some("Equatorial coordinate system")));

        header.push(Card::int("A_ORDER", self.order as i64, Some("SIP polynomial order, axis 1")));
        push_sip_coeffs(&mut header, "A", &self.a_sip, self.order);
        header.push(Card::int("B_ORDER", self.order as i64, Some("SIP polynomial order, axis 2")));
        push_sip_coeffs(&mut header, "B", &self.b_sip, self.order);

        header
    }
}

fn push_sip_coeffs(header: &mut Header, axis: &str, coeffs: &[Vec<f64>], order: usize) {
    for p in 0..=order {
        for q in 0..=order - p {
            if p + q < 2 || coeffs[p][q] == 0.0 {
                continue;
            }
            header.push(Card::real(
                &format!("{}_{}_{}", axis, p, q),
                coeffs[p][q],
                Some("SIP distortion coefficient"),
            ));
        }
    }
}

/// Fit a WCS transform through matched pixel (`x`, `y`) and sky (`ra`,
/// `dec`, degrees) coordinates, anchored at pixel (`x0`, `y0`) with sky
/// coordinate (`ra0`, `dec0`).
///
/// Requires at least `(order + 1) * (order + 2) / 2` correspondences (one
/// per polynomial term); fewer points is an error rather than a silently
/// underdetermined fit.
#[allow(clippy::too_many_arguments)]
pub fn fit_wcs(
    x: &[f64],
    y: &[f64],
    ra: &[f64],
    dec: &[f64],
    x0: f64,
    y0: f64,
    ra0: f64,
    dec0: f64,
    order: usize,
    projection: Projection,
) -> Result<FittedWcs> {
    let n = x.len();
    if y.len() != n || ra.len() != n || dec.len() != n {
        bail!("WCS fit input arrays differ in length");
    }
    if order < 1 {
        bail!("WCS fit order must be at least 1");
    }

    // Exponent pairs (x exponent, y exponent) with sum <= order. The linear
    // terms land at indices 1 and order + 1, which the CD extraction below
    // relies on.
    let mut exponents = Vec::new();
    for iy in 0..=order {
        for ix in 0..=order - iy {
            exponents.push((ix, iy));
        }
    }
    let n_terms = exponents.len();
    if n < n_terms {
        bail!(
            "WCS fit of order {} needs at least {} reference stars, got {}",
            order,
            n_terms,
            n
        );
    }

    // Design matrix on anchor-relative pixel offsets
    let mut design = DMatrix::zeros(n, n_terms);
    for i in 0..n {
        let dx = x[i] - x0;
        let dy = y[i] - y0;
        for (j, &(ix, iy)) in exponents.iter().enumerate() {
            design[(i, j)] = dx.powi(ix as i32) * dy.powi(iy as i32);
        }
    }

    let mut anchor_ra = ra0;
    let mut anchor_dec = dec0;
    let mut ax = DVector::zeros(n_terms);
    let mut ay = DVector::zeros(n_terms);

    for _ in 0..FIT_ITERATIONS {
        let mut rx = DVector::zeros(n);
        let mut ry = DVector::zeros(n);
        for i in 0..n {
            let (px, py) = celestial_to_plane(projection, ra[i], dec[i], anchor_ra, anchor_dec);
            rx[i] = px;
            ry[i] = py;
        }

        ax = solve_least_squares(&design, &rx)?;
        ay = solve_least_squares(&design, &ry)?;

        // Move the anchor to the image of the constant term so the fit
        // passes through it exactly.
        let (new_ra, new_dec) =
            plane_to_celestial(projection, ax[0], ay[0], anchor_ra, anchor_dec);
        anchor_ra = new_ra;
        anchor_dec = new_dec;
    }

    let cd = [[ax[1], ax[order + 1]], [ay[1], ay[order + 1]]];
    let det = cd[0][0] * cd[1][1] - cd[0][1] * cd[1][0];
    if det == 0.0 || !det.is_finite() {
        bail!("WCS fit produced a degenerate linear transform");
    }
    let cd_inv = [
        [cd[1][1] / det, -cd[0][1] / det],
        [-cd[1][0] / det, cd[0][0] / det],
    ];

    let mut a_sip = vec![vec![0.0; order + 1]; order + 1];
    let mut b_sip = vec![vec![0.0; order + 1]; order + 1];
    for (j, &(ix, iy)) in exponents.iter().enumerate() {
        if ix + iy >= 2 {
            a_sip[ix][iy] = cd_inv[0][0] * ax[j] + cd_inv[0][1] * ay[j];
            b_sip[ix][iy] = cd_inv[1][0] * ax[j] + cd_inv[1][1] * ay[j];
        }
    }

    Ok(FittedWcs {
        crpix: [x0, y0],
        crval: [anchor_ra, anchor_dec],
        cd,
        projection,
        order,
        a_sip,
        b_sip,
    })
}

/// Least squares via QR, as the reference implementation solves it.
fn solve_least_squares(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    let qr = a.clone().qr();
    let qtb = qr.q().transpose() * b;
    qr.r()
        .solve_upper_triangular(&qtb)
        .ok_or_else(|| anyhow!("Singular design matrix in WCS fit"))
}

/// Project a celestial coordinate onto the projection plane of an
/// anchor-centered zenithal projection with identity CD (plane units are
/// degrees). Native pole at the anchor, LONPOLE = 180.
fn celestial_to_plane(
    projection: Projection,
    ra_deg: f64,
    dec_deg: f64,
    ra0_deg: f64,
    dec0_deg: f64,
) -> (f64, f64) {
    let da = (ra_deg - ra0_deg).to_radians();
    let dec = dec_deg.to_radians();
    let dec0 = dec0_deg.to_radians();

    let phi = PI
        + (-dec.cos() * da.sin())
            .atan2(dec.sin() * dec0.cos() - dec.cos() * dec0.sin() * da.cos());
    let theta = (dec.sin() * dec0.sin() + dec.cos() * dec0.cos() * da.cos()).asin();

    let radius = projection.project(theta);
    (radius * phi.sin(), -radius * phi.cos())
}

/// Inverse of [`celestial_to_plane`].
fn plane_to_celestial(
    projection: Projection,
    px: f64,
    py: f64,
    ra0_deg: f64,
    dec0_deg: f64,
) -> (f64, f64) {
    let radius = (px * px + py * py).sqrt();
    let phi = px.atan2(-py);
    let theta = projection.deproject(radius);

    let dphi = phi - PI;
    let dec0 = dec0_deg.to_radians();

    let dec = (theta.sin() * dec0.sin() + theta.cos() * dec0.cos() * dphi.cos()).asin();
    let da = (-theta.cos() * dphi.sin())
        .atan2(theta.sin() * dec0.cos() - theta.cos() * dec0.sin() * dphi.cos());

    (normalize_deg(ra0_deg + da.to_degrees()), dec.to_degrees())
}
