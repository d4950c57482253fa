//! Spherical geometry helpers: great-circle separations, unit-vector
//! conversions, and the gnomonic tangent-plane projection used for patch
//! centroids.

use nalgebra::Vector3;

/// Exact great-circle separation between two positions, in degrees.
///
/// Haversine formulation, stable for small separations where the dot-product
/// form loses precision. Same formulation as the accelerated grouping path,
/// so borderline pairs evaluate identically on both.
pub fn angular_separation_deg(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let half_ddec = ((dec2 - dec1) * 0.5).to_radians().sin();
    let half_dra = ((ra2 - ra1) * 0.5).to_radians().sin();
    let h = half_ddec * half_ddec
        + dec1.to_radians().cos() * dec2.to_radians().cos() * half_dra * half_dra;
    2.0 * h.sqrt().min(1.0).asin().to_degrees()
}

/// Unit direction vector for (RA, Dec) in degrees.
pub fn radec_to_unit(ra_deg: f64, dec_deg: f64) -> Vector3<f64> {
    let (ra, dec) = (ra_deg.to_radians(), dec_deg.to_radians());
    Vector3::new(dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin())
}

/// (RA, Dec) in degrees for a direction vector, RA wrapped to [0, 360).
pub fn unit_to_radec(v: &Vector3<f64>) -> (f64, f64) {
    let ra = v.y.atan2(v.x).to_degrees().rem_euclid(360.0);
    let dec = (v.z / v.norm()).clamp(-1.0, 1.0).asin().to_degrees();
    (ra, dec)
}

/// Unweighted mean direction of a set of positions, in degrees.
///
/// Computed as the normalized vector sum, which is well defined across the
/// RA seam and at the poles. Falls back to the first position if the vectors
/// cancel (antipodal degeneracy).
pub fn spherical_mean(positions: &[(f64, f64)]) -> (f64, f64) {
    let sum: Vector3<f64> = positions
        .iter()
        .map(|&(ra, dec)| radec_to_unit(ra, dec))
        .sum();
    if sum.norm() < 1e-12 {
        return positions[0];
    }
    unit_to_radec(&sum)
}

/// Gnomonic projection about a fixed center.
///
/// Offsets are in radians on the plane tangent to the sphere at the center,
/// with x increasing towards local east and y towards north.
pub struct TangentPlane {
    center: Vector3<f64>,
    east: Vector3<f64>,
    north: Vector3<f64>,
}

impl TangentPlane {
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        let center = radec_to_unit(ra_deg, dec_deg);
        let ra = ra_deg.to_radians();
        let east = Vector3::new(-ra.sin(), ra.cos(), 0.0);
        let north = center.cross(&east);
        TangentPlane {
            center,
            east,
            north,
        }
    }

    pub fn project(&self, ra_deg: f64, dec_deg: f64) -> (f64, f64) {
        let v = radec_to_unit(ra_deg, dec_deg);
        // Positions at or beyond 90 deg from the center have no gnomonic
        // image; clamp the denominator so they land far out on the plane.
        let d = v.dot(&self.center).max(1e-9);
        (v.dot(&self.east) / d, v.dot(&self.north) / d)
    }

    pub fn deproject(&self, x: f64, y: f64) -> (f64, f64) {
        let v = self.center + self.east * x + self.north * y;
        unit_to_radec(&v)
    }
}

/// Weighted tangent-plane centroid of a set of positions, in degrees.
///
/// Positions are projected about their unweighted spherical mean, averaged
/// with the given weights (non-positive weights contribute nothing), and the
/// mean offset is projected back onto the sphere. If no weight is positive
/// the result is the unweighted centroid. `positions` must be non-empty and
/// the same length as `weights`.
pub fn weighted_centroid(positions: &[(f64, f64)], weights: &[f64]) -> (f64, f64) {
    debug_assert_eq!(positions.len(), weights.len());
    let (ra0, dec0) = spherical_mean(positions);
    let plane = TangentPlane::new(ra0, dec0);

    let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    let (mut x, mut y) = (0.0, 0.0);
    if total > 0.0 {
        for (&(ra, dec), &w) in positions.iter().zip(weights) {
            if w > 0.0 {
                let (px, py) = plane.project(ra, dec);
                x += w * px;
                y += w * py;
            }
        }
        x /= total;
        y /= total;
    } else {
        for &(ra, dec) in positions {
            let (px, py) = plane.project(ra, dec);
            x += px;
            y += py;
        }
        x /= positions.len() as f64;
        y /= positions.len() as f64;
    }
    plane.deproject(x, y)
}
