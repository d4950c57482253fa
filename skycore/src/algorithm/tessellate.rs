//! Weighted tessellation: nearest-anchor assignment with iterative
//! flux-weighted anchor relaxation on the sphere (a spherical Lloyd
//! iteration over great-circle distance).

use std::cmp::Reverse;

use itertools::Itertools;
use log::debug;
use ordered_float::OrderedFloat;
use rayon::prelude::*;

use crate::algorithm::grouping::TessellationSeed;
use crate::data::source::Source;
use crate::geometry::{angular_separation_deg, weighted_centroid};

/// Relaxation rounds after which the iteration stops even without
/// convergence, so a flip-flopping assignment cannot loop forever.
pub(crate) const MAX_ITERATIONS: usize = 50;

/// Assigns every source to one anchor. Labels are anchor indices; anchors
/// that attract no sources leave a gap, which the caller renumbers away.
pub(crate) fn partition(sources: &[Source], seed: &TessellationSeed) -> Vec<usize> {
    let positions: Vec<(f64, f64)> = sources
        .iter()
        .map(|s| (s.position.ra, s.position.dec))
        .collect();
    let weights: Vec<f64> = sources.iter().map(|s| s.flux.weight()).collect();

    let mut anchors: Vec<(f64, f64)> = match seed {
        TessellationSeed::Anchors(anchors) => anchors.iter().map(|a| (a.ra, a.dec)).collect(),
        TessellationSeed::Count(num_patches) => seed_brightest(sources, *num_patches),
    };

    let mut assignment = assign(&positions, &anchors);
    for round in 0..MAX_ITERATIONS {
        relax(&mut anchors, &positions, &weights, &assignment);
        let next = assign(&positions, &anchors);
        if next == assignment {
            debug!("tessellation converged after {} rounds", round + 1);
            return next;
        }
        assignment = next;
    }
    debug!("tessellation stopped at the iteration cap");
    assignment
}

/// Anchor positions for a count seed: the K brightest sources by Stokes I,
/// ties broken by insertion order.
fn seed_brightest(sources: &[Source], num_patches: usize) -> Vec<(f64, f64)> {
    sources
        .iter()
        .enumerate()
        .sorted_by_key(|(idx, source)| (Reverse(OrderedFloat(source.flux.i)), *idx))
        .take(num_patches)
        .map(|(_, source)| (source.position.ra, source.position.dec))
        .collect()
}

/// Nearest anchor per position under great-circle distance; ties go to the
/// lowest anchor index.
fn assign(positions: &[(f64, f64)], anchors: &[(f64, f64)]) -> Vec<usize> {
    positions
        .par_iter()
        .map(|&(ra, dec)| {
            let mut best = 0usize;
            let mut best_distance = f64::INFINITY;
            for (anchor_idx, &(anchor_ra, anchor_dec)) in anchors.iter().enumerate() {
                let distance = angular_separation_deg(ra, dec, anchor_ra, anchor_dec);
                if distance < best_distance {
                    best_distance = distance;
                    best = anchor_idx;
                }
            }
            best
        })
        .collect()
}

/// Moves every anchor with members to the flux-weighted centroid of its
/// members; empty anchors stay where they are.
fn relax(
    anchors: &mut [(f64, f64)],
    positions: &[(f64, f64)],
    weights: &[f64],
    assignment: &[usize],
) {
    for (anchor_idx, anchor) in anchors.iter_mut().enumerate() {
        let member_positions: Vec<(f64, f64)> = assignment
            .iter()
            .zip(positions)
            .filter(|(&a, _)| a == anchor_idx)
            .map(|(_, &p)| p)
            .collect();
        if member_positions.is_empty() {
            continue;
        }
        let member_weights: Vec<f64> = assignment
            .iter()
            .zip(weights)
            .filter(|(&a, _)| a == anchor_idx)
            .map(|(_, &w)| w)
            .collect();
        *anchor = weighted_centroid(&member_positions, &member_weights);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::position::SkyPosition;

    fn sources(rows: &[(f64, f64, f64)]) -> Vec<Source> {
        rows.iter()
            .enumerate()
            .map(|(i, &(ra, dec, flux))| {
                Source::point(&format!("src{}", i), SkyPosition::new(ra, dec), flux).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_seed_brightest_orders_by_flux_then_insertion() {
        let sources = sources(&[
            (10.0, 0.0, 1.0),
            (20.0, 0.0, 5.0),
            (30.0, 0.0, 5.0),
            (40.0, 0.0, 2.0),
        ]);
        let anchors = seed_brightest(&sources, 3);
        assert_eq!(anchors[0].0, 20.0);
        assert_eq!(anchors[1].0, 30.0);
        assert_eq!(anchors[2].0, 40.0);
    }

    #[test]
    fn test_two_clumps_split_cleanly() {
        let sources = sources(&[
            (10.0, 0.0, 5.0),
            (10.2, 0.1, 1.0),
            (9.9, -0.1, 1.0),
            (200.0, 40.0, 4.0),
            (200.3, 40.1, 1.0),
        ]);
        let labels = partition(&sources, &TessellationSeed::Count(2));
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn test_every_source_gets_assigned() {
        let sources = sources(&[
            (0.0, 10.0, 1.0),
            (90.0, -10.0, 2.0),
            (180.0, 30.0, 3.0),
            (270.0, -30.0, 4.0),
            (45.0, 0.0, 0.5),
            (135.0, 5.0, 0.1),
        ]);
        let labels = partition(&sources, &TessellationSeed::Count(3));
        assert_eq!(labels.len(), 6);
        assert!(labels.iter().all(|&l| l < 3));
    }

    #[test]
    fn test_explicit_anchors_and_tie_to_lowest_index() {
        let sources = sources(&[(50.0, 0.0, 1.0)]);
        // Both anchors are equidistant from the only source.
        let anchors = TessellationSeed::Anchors(vec![
            SkyPosition::new(49.0, 0.0),
            SkyPosition::new(51.0, 0.0),
        ]);
        let labels = partition(&sources, &anchors);
        assert_eq!(labels, vec![0]);
    }

    #[test]
    fn test_coincident_anchors_keep_lowest() {
        let sources = sources(&[(10.0, 0.0, 1.0), (10.1, 0.0, 1.0)]);
        let anchors = TessellationSeed::Anchors(vec![
            SkyPosition::new(10.0, 0.0),
            SkyPosition::new(10.0, 0.0),
        ]);
        let labels = partition(&sources, &anchors);
        assert_eq!(labels, vec![0, 0]);
    }

    #[test]
    fn test_terminates_on_degenerate_input() {
        // All sources at the same position: must converge, not oscillate.
        let sources = sources(&[(5.0, 5.0, 1.0); 10]);
        let labels = partition(&sources, &TessellationSeed::Count(2));
        assert_eq!(labels.len(), 10);
        assert!(labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn test_faint_companion_follows_bright_anchor() {
        let sources = sources(&[(10.0, 0.0, 100.0), (10.4, 0.0, 1.0), (240.0, -50.0, 50.0)]);
        let labels = partition(&sources, &TessellationSeed::Count(2));
        assert_eq!(labels[0], labels[1]);
        assert_ne!(labels[0], labels[2]);
    }
}
