//! Grid-accelerated friends-of-friends grouping of positions on the
//! celestial sphere.
//!
//! The single entry point, [`proximity_groups`], partitions a catalog of
//! (RA, Dec) positions into transitively-linked groups: two positions belong
//! to the same group when a chain of catalog members connects them with no
//! link longer than the given angular threshold. The naive formulation is an
//! all-pairs great-circle scan; this crate bins positions into a declination-
//! band / RA-cell grid sized by the threshold so that only positions in
//! nearby cells are ever compared, while producing exactly the same
//! connected components as the all-pairs scan.

mod dsu;

use rayon::prelude::*;

use crate::dsu::UnionFind;

/// Exact great-circle separation between two positions, in degrees.
///
/// Haversine formulation, stable for small separations where the dot-product
/// form loses precision.
pub fn angular_separation_deg(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let half_ddec = ((dec2 - dec1) * 0.5).to_radians().sin();
    let half_dra = ((ra2 - ra1) * 0.5).to_radians().sin();
    let h = half_ddec * half_ddec
        + dec1.to_radians().cos() * dec2.to_radians().cos() * half_dra * half_dra;
    2.0 * h.sqrt().min(1.0).asin().to_degrees()
}

/// One declination band of the sparse grid. RA cells are only materialized
/// when occupied.
struct Band {
    num_cells: u64,
    cell_width: f64,
    cells: std::collections::HashMap<u64, Vec<u32>>,
}

struct Grid {
    num_bands: u64,
    band_height: f64,
    bands: std::collections::HashMap<u64, Band>,
}

// Caps keep the index arithmetic finite for degenerate thresholds; the grid
// stays sparse regardless, so they only bound index ranges, not memory.
const MAX_BANDS: f64 = 1e9;
const MAX_CELLS: f64 = 1e9;

impl Grid {
    fn build(positions: &[(f64, f64)], threshold_deg: f64) -> Self {
        let num_bands = (180.0 / threshold_deg).floor().clamp(1.0, MAX_BANDS) as u64;
        let band_height = 180.0 / num_bands as f64;
        let mut grid = Grid {
            num_bands,
            band_height,
            bands: std::collections::HashMap::new(),
        };
        for (i, &(ra, dec)) in positions.iter().enumerate() {
            let b = grid.band_index(dec);
            let band = grid.band_entry(b, threshold_deg);
            let c = band.cell_index(ra);
            band.cells.entry(c).or_default().push(i as u32);
        }
        grid
    }

    fn band_index(&self, dec: f64) -> u64 {
        let b = ((dec + 90.0) / self.band_height).floor();
        (b.max(0.0) as u64).min(self.num_bands - 1)
    }

    fn band_entry(&mut self, b: u64, threshold_deg: f64) -> &mut Band {
        let (num_bands, band_height) = (self.num_bands, self.band_height);
        self.bands.entry(b).or_insert_with(|| {
            let cos_min = band_min_cos(b, b, num_bands, band_height);
            let num_cells = (360.0 * cos_min / threshold_deg)
                .floor()
                .clamp(1.0, MAX_CELLS) as u64;
            Band {
                num_cells,
                cell_width: 360.0 / num_cells as f64,
                cells: std::collections::HashMap::new(),
            }
        })
    }
}

impl Band {
    fn cell_index(&self, ra: f64) -> u64 {
        let c = (ra.rem_euclid(360.0) / self.cell_width).floor();
        (c.max(0.0) as u64).min(self.num_cells - 1)
    }
}

/// Smallest cosine of declination over the union of bands `b_lo..=b_hi`,
/// i.e. the cosine at the edge farthest from the equator.
fn band_min_cos(b_lo: u64, b_hi: u64, num_bands: u64, band_height: f64) -> f64 {
    let lo = -90.0 + b_lo.min(num_bands - 1) as f64 * band_height;
    let hi = (-90.0 + (b_hi + 1) as f64 * band_height).min(90.0);
    let max_abs = lo.abs().max(hi.abs()).min(90.0);
    max_abs.to_radians().cos().max(0.0)
}

/// Within-threshold links from point `i` to points with a larger index,
/// found by scanning the grid cells that can possibly hold a partner.
fn links_of(
    i: u32,
    positions: &[(f64, f64)],
    grid: &Grid,
    threshold_deg: f64,
) -> Vec<(u32, u32)> {
    let (ra, dec) = positions[i as usize];
    let ra = ra.rem_euclid(360.0);
    let b = grid.band_index(dec);
    let sin_half = (threshold_deg * 0.5).to_radians().sin();

    let mut links = Vec::new();
    let b_lo = b.saturating_sub(1);
    let b_hi = (b + 1).min(grid.num_bands - 1);
    for nb in b_lo..=b_hi {
        let band = match grid.bands.get(&nb) {
            Some(band) => band,
            None => continue,
        };
        // RA window wide enough for any partner whose declination falls in
        // the combined span of the two bands; degenerates to the full band
        // near the poles.
        let cos_min = band_min_cos(b.min(nb), b.max(nb), grid.num_bands, grid.band_height);
        let mut scan_cell = |cell: &Vec<u32>| {
            for &j in cell {
                if j > i {
                    let (ra_j, dec_j) = positions[j as usize];
                    if angular_separation_deg(ra, dec, ra_j, dec_j) <= threshold_deg {
                        links.push((i, j));
                    }
                }
            }
        };
        if sin_half >= cos_min {
            for cell in band.cells.values() {
                scan_cell(cell);
            }
            continue;
        }
        let half_window = 2.0 * (sin_half / cos_min).asin().to_degrees();
        let c_lo = ((ra - half_window) / band.cell_width).floor() as i64;
        let c_hi = ((ra + half_window) / band.cell_width).floor() as i64;
        if (c_hi - c_lo + 1) as u64 >= band.num_cells {
            for cell in band.cells.values() {
                scan_cell(cell);
            }
        } else {
            for c in c_lo..=c_hi {
                let c = c.rem_euclid(band.num_cells as i64) as u64;
                if let Some(cell) = band.cells.get(&c) {
                    scan_cell(cell);
                }
            }
        }
    }
    links
}

/// Partitions `positions` (RA, Dec in degrees) into friends-of-friends
/// groups under the great-circle `threshold_deg`.
///
/// Returns one group id per input position; the id of a group is the index
/// of its lowest-indexed member, so ids are stable under input order. The
/// components are identical to those of an all-pairs scan with the same
/// threshold.
///
/// Pure function: no shared state, safe to call concurrently from
/// independent callers. `threshold_deg` must be positive.
pub fn proximity_groups(positions: &[(f64, f64)], threshold_deg: f64) -> Vec<usize> {
    let n = positions.len();
    if n == 0 {
        return Vec::new();
    }
    let grid = Grid::build(positions, threshold_deg);

    let links: Vec<(u32, u32)> = (0..n as u32)
        .into_par_iter()
        .flat_map_iter(|i| links_of(i, positions, &grid, threshold_deg))
        .collect();

    let mut components = UnionFind::new(n);
    for (i, j) in links {
        components.union(i, j);
    }

    // Label every component by its lowest-indexed member.
    let mut first_member = vec![usize::MAX; n];
    let mut groups = vec![0usize; n];
    for i in 0..n {
        let root = components.find(i as u32) as usize;
        if first_member[root] == usize::MAX {
            first_member[root] = i;
        }
        groups[i] = first_member[root];
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    /// All-pairs reference used to check the grid path.
    fn naive_groups(positions: &[(f64, f64)], threshold_deg: f64) -> Vec<usize> {
        let n = positions.len();
        let mut components = UnionFind::new(n);
        for i in 0..n {
            for j in (i + 1)..n {
                let (ra1, dec1) = positions[i];
                let (ra2, dec2) = positions[j];
                if angular_separation_deg(ra1, dec1, ra2, dec2) <= threshold_deg {
                    components.union(i as u32, j as u32);
                }
            }
        }
        let mut first_member = vec![usize::MAX; n];
        let mut groups = vec![0usize; n];
        for i in 0..n {
            let root = components.find(i as u32) as usize;
            if first_member[root] == usize::MAX {
                first_member[root] = i;
            }
            groups[i] = first_member[root];
        }
        groups
    }

    #[test]
    fn test_empty_input() {
        assert!(proximity_groups(&[], 1.0).is_empty());
    }

    #[test]
    fn test_single_position() {
        assert_eq!(proximity_groups(&[(10.0, 20.0)], 0.5), vec![0]);
    }

    #[test]
    fn test_separation_known_values() {
        assert!(angular_separation_deg(10.0, 20.0, 10.0, 20.0) < 1e-12);
        assert!((angular_separation_deg(0.0, 0.0, 90.0, 0.0) - 90.0).abs() < 1e-9);
        assert!((angular_separation_deg(0.0, 90.0, 123.0, -90.0) - 180.0).abs() < 1e-9);
        // Across the RA seam the separation is small, not ~360 deg.
        assert!((angular_separation_deg(359.95, 0.0, 0.05, 0.0) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_transitive_linking() {
        // a-b and b-c are within threshold, a-c is not: one group of three.
        let positions = [(10.0, 0.0), (10.08, 0.0), (10.16, 0.0), (50.0, 0.0)];
        let groups = proximity_groups(&positions, 0.1);
        assert_eq!(groups, vec![0, 0, 0, 3]);
    }

    #[test]
    fn test_groups_across_ra_seam() {
        let positions = [(359.97, 10.0), (0.02, 10.0), (180.0, 10.0)];
        let groups = proximity_groups(&positions, 0.1);
        assert_eq!(groups[0], groups[1]);
        assert_ne!(groups[0], groups[2]);
    }

    #[test]
    fn test_groups_near_pole() {
        // At dec 89.95 a 90 deg RA offset is a small great-circle step.
        let positions = [(0.0, 89.95), (90.0, 89.95), (180.0, 89.95), (0.0, 85.0)];
        let groups = proximity_groups(&positions, 0.2);
        assert_eq!(groups[0], groups[1]);
        assert_eq!(groups[1], groups[2]);
        assert_ne!(groups[0], groups[3]);
    }

    #[test]
    fn test_huge_threshold_single_group() {
        let positions = [(0.0, -89.0), (120.0, 0.0), (240.0, 89.0)];
        let groups = proximity_groups(&positions, 200.0);
        assert_eq!(groups, vec![0, 0, 0]);
    }

    #[test]
    fn test_ids_are_first_member_indices() {
        let positions = [(50.0, 0.0), (10.0, 0.0), (50.01, 0.0), (10.01, 0.0)];
        let groups = proximity_groups(&positions, 0.1);
        assert_eq!(groups, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_matches_naive_on_random_catalogs() {
        let mut rng = StdRng::seed_from_u64(20240917);
        for &threshold in &[0.05, 0.5, 2.0] {
            // Clustered around a handful of centers so that components of
            // several sizes occur, with a sprinkle of isolated positions.
            let mut positions = Vec::new();
            for _ in 0..8 {
                let ra0: f64 = rng.gen_range(0.0..360.0);
                let dec0: f64 = rng.gen_range(-85.0..85.0);
                for _ in 0..150 {
                    positions.push((
                        (ra0 + rng.gen_range(-1.5..1.5)).rem_euclid(360.0),
                        (dec0 + rng.gen_range(-1.5..1.5)).clamp(-90.0, 90.0),
                    ));
                }
            }
            for _ in 0..100 {
                positions.push((rng.gen_range(0.0..360.0), rng.gen_range(-90.0..90.0)));
            }
            assert_eq!(
                proximity_groups(&positions, threshold),
                naive_groups(&positions, threshold),
                "grid/naive mismatch at threshold {}",
                threshold
            );
        }
    }

    #[test]
    fn test_matches_naive_at_seam_and_poles() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut positions = Vec::new();
        for _ in 0..200 {
            positions.push((
                rng.gen_range(-0.5f64..0.5).rem_euclid(360.0),
                rng.gen_range(-5.0..5.0),
            ));
        }
        for _ in 0..200 {
            positions.push((rng.gen_range(0.0..360.0), rng.gen_range(88.0..90.0)));
        }
        for _ in 0..200 {
            positions.push((rng.gen_range(0.0..360.0), rng.gen_range(-90.0..-88.0)));
        }
        for &threshold in &[0.1, 1.0] {
            assert_eq!(
                proximity_groups(&positions, threshold),
                naive_groups(&positions, threshold),
                "grid/naive mismatch at threshold {}",
                threshold
            );
        }
    }
}
