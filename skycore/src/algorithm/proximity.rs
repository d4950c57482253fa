//! Friends-of-friends proximity grouping: the dispatch between the
//! grid-accelerated path and the in-process all-pairs reference, which must
//! agree on every catalog.

use log::warn;

use crate::error::SkyResult;
#[cfg(not(feature = "accelerate"))]
use crate::error::SkyError;
use crate::geometry::angular_separation_deg;

/// Catalog size from which the accelerated path is preferred; below it the
/// all-pairs scan is cheap enough.
pub(crate) const ACCEL_CUTOFF: usize = 1000;

/// Partitions positions into within-threshold connected components. Group
/// ids are the lowest member index of each component, on both paths.
pub(crate) fn partition(positions: &[(f64, f64)], threshold_deg: f64) -> Vec<usize> {
    if positions.len() >= ACCEL_CUTOFF {
        match accelerated(positions, threshold_deg) {
            Ok(groups) => return groups,
            Err(_) => warn!(
                "spatial accelerator unavailable; using the all-pairs path for {} sources",
                positions.len()
            ),
        }
    }
    reference(positions, threshold_deg)
}

#[cfg(feature = "accelerate")]
fn accelerated(positions: &[(f64, f64)], threshold_deg: f64) -> SkyResult<Vec<usize>> {
    Ok(skygrid::proximity_groups(positions, threshold_deg))
}

#[cfg(not(feature = "accelerate"))]
fn accelerated(_positions: &[(f64, f64)], _threshold_deg: f64) -> SkyResult<Vec<usize>> {
    Err(SkyError::AcceleratorUnavailable)
}

/// All-pairs reference implementation. Quadratic, kept for small catalogs
/// and as the ground truth the accelerated path is tested against.
pub(crate) fn reference(positions: &[(f64, f64)], threshold_deg: f64) -> Vec<usize> {
    let n = positions.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for i in 0..n {
        let (ra1, dec1) = positions[i];
        for j in (i + 1)..n {
            let (ra2, dec2) = positions[j];
            if angular_separation_deg(ra1, dec1, ra2, dec2) <= threshold_deg {
                let ri = find(&mut parent, i);
                let rj = find(&mut parent, j);
                if ri != rj {
                    // Root at the lower index so labels match the
                    // accelerated path without a relabel pass.
                    parent[ri.max(rj)] = ri.min(rj);
                }
            }
        }
    }

    (0..n).map(|i| find(&mut parent, i)).collect()
}
