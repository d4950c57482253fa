use std::collections::HashMap;
use std::fmt;
use std::fmt::{Display, Formatter};

use bincode::{Decode, Encode};
use log::info;
use serde::{Deserialize, Serialize};

use crate::algorithm::{proximity, tessellate};
use crate::data::position::SkyPosition;
use crate::data::table::SkyTable;
use crate::error::{SkyError, SkyResult};

/// Seed of the tessellation algorithm: either a target patch count (anchors
/// start on the brightest sources) or an explicit anchor list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum TessellationSeed {
    Count(usize),
    Anchors(Vec<SkyPosition>),
}

/// The grouping algorithms, as a closed set: adding one means handling it
/// everywhere this enum is matched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum GroupingMethod {
    /// All sources into one patch.
    Single,
    /// Every source into its own patch.
    Every,
    /// Friends-of-friends linking under a great-circle threshold in degrees.
    Threshold { threshold_deg: f64 },
    /// Nearest-anchor tessellation with flux-weighted anchor relaxation.
    Tessellate { seed: TessellationSeed },
}

/// The loosely-typed parameter bag handed over by parset-style drivers;
/// [`GroupingMethod::from_name`] turns it into a validated method.
#[derive(Clone, Debug, Default)]
pub struct GroupingParameters {
    pub threshold: Option<f64>,
    pub num_patches: Option<usize>,
    pub anchors: Option<Vec<SkyPosition>>,
}

/// Outcome of a grouping call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct GroupingResult {
    pub num_patches: usize,
    pub num_ungrouped: usize,
}

impl GroupingMethod {
    /// Resolves an algorithm name plus parameter bag into a method.
    pub fn from_name(name: &str, parameters: &GroupingParameters) -> SkyResult<GroupingMethod> {
        match name.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(GroupingMethod::Single),
            "every" => Ok(GroupingMethod::Every),
            "threshold" => {
                let threshold_deg = parameters.threshold.ok_or_else(|| {
                    SkyError::InvalidParameter(
                        "the threshold algorithm requires a threshold in degrees".to_string(),
                    )
                })?;
                Ok(GroupingMethod::Threshold { threshold_deg })
            }
            "tessellate" => {
                if let Some(anchors) = &parameters.anchors {
                    Ok(GroupingMethod::Tessellate {
                        seed: TessellationSeed::Anchors(anchors.clone()),
                    })
                } else if let Some(num_patches) = parameters.num_patches {
                    Ok(GroupingMethod::Tessellate {
                        seed: TessellationSeed::Count(num_patches),
                    })
                } else {
                    Err(SkyError::InvalidParameter(
                        "the tessellate algorithm requires num_patches or anchors".to_string(),
                    ))
                }
            }
            other => Err(SkyError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    fn validate(&self, num_sources: usize) -> SkyResult<()> {
        match self {
            GroupingMethod::Single | GroupingMethod::Every => Ok(()),
            GroupingMethod::Threshold { threshold_deg } => {
                if threshold_deg.is_finite() && *threshold_deg > 0.0 {
                    Ok(())
                } else {
                    Err(SkyError::InvalidParameter(format!(
                        "threshold must be a positive angle in degrees, got {}",
                        threshold_deg
                    )))
                }
            }
            GroupingMethod::Tessellate {
                seed: TessellationSeed::Count(num_patches),
            } => {
                if *num_patches == 0 {
                    Err(SkyError::InvalidParameter(
                        "tessellation needs at least one patch".to_string(),
                    ))
                } else if *num_patches > num_sources {
                    Err(SkyError::InvalidParameter(format!(
                        "cannot tessellate {} sources into {} patches",
                        num_sources, num_patches
                    )))
                } else {
                    Ok(())
                }
            }
            GroupingMethod::Tessellate {
                seed: TessellationSeed::Anchors(anchors),
            } => {
                if anchors.is_empty() {
                    Err(SkyError::InvalidParameter(
                        "tessellation anchor list is empty".to_string(),
                    ))
                } else if anchors
                    .iter()
                    .any(|a| !a.ra.is_finite() || !a.dec.is_finite())
                {
                    Err(SkyError::InvalidParameter(
                        "tessellation anchors must have finite coordinates".to_string(),
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl Display for GroupingMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            GroupingMethod::Single => write!(f, "single"),
            GroupingMethod::Every => write!(f, "every"),
            GroupingMethod::Threshold { .. } => write!(f, "threshold"),
            GroupingMethod::Tessellate { .. } => write!(f, "tessellate"),
        }
    }
}

/// Runs one grouping algorithm over the whole table.
///
/// Validates first and computes the complete partition before installing
/// it, so a failing call leaves the table untouched.
pub(crate) fn group(table: &mut SkyTable, method: &GroupingMethod) -> SkyResult<GroupingResult> {
    let num_sources = table.len();
    if num_sources == 0 {
        return Err(SkyError::InvalidParameter(
            "cannot group an empty sky table".to_string(),
        ));
    }
    method.validate(num_sources)?;

    let labels = match method {
        GroupingMethod::Single => vec![0; num_sources],
        GroupingMethod::Every => (0..num_sources).collect(),
        GroupingMethod::Threshold { threshold_deg } => {
            let positions: Vec<(f64, f64)> = table
                .sources()
                .iter()
                .map(|s| (s.position.ra, s.position.dec))
                .collect();
            proximity::partition(&positions, *threshold_deg)
        }
        GroupingMethod::Tessellate { seed } => tessellate::partition(table.sources(), seed),
    };

    let result = table.apply_grouping(&canonicalize(&labels));
    info!(
        "Grouped {} sources into {} patches with the {} algorithm",
        num_sources, result.num_patches, method
    );
    Ok(result)
}

/// Renumbers arbitrary group labels into consecutive ids ordered by first
/// occurrence, so patch numbering follows source insertion order no matter
/// which path produced the labels.
fn canonicalize(labels: &[usize]) -> Vec<usize> {
    let mut ids: HashMap<usize, usize> = HashMap::new();
    labels
        .iter()
        .map(|&label| {
            let next = ids.len();
            *ids.entry(label).or_insert(next)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::source::Source;

    fn table(positions: &[(f64, f64)]) -> SkyTable {
        SkyTable::from_sources(
            positions
                .iter()
                .enumerate()
                .map(|(i, &(ra, dec))| {
                    Source::point(&format!("src{}", i), SkyPosition::new(ra, dec), 1.0).unwrap()
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_canonicalize_orders_by_first_occurrence() {
        assert_eq!(canonicalize(&[7, 3, 7, 9, 3]), vec![0, 1, 0, 2, 1]);
    }

    #[test]
    fn test_single_groups_everything() {
        let mut table = table(&[(10.0, 0.0), (200.0, 50.0), (300.0, -80.0)]);
        let result = table.group(&GroupingMethod::Single).unwrap();
        assert_eq!(result.num_patches, 1);
        assert_eq!(result.num_ungrouped, 0);
        assert_eq!(table.patches_of()["Patch_0"].len(), 3);
    }

    #[test]
    fn test_single_is_idempotent() {
        let mut table = table(&[(10.0, 0.0), (200.0, 50.0)]);
        let first = table.group(&GroupingMethod::Single).unwrap();
        let members_first = table.patches_of();
        let second = table.group(&GroupingMethod::Single).unwrap();
        assert_eq!(first, second);
        assert_eq!(members_first, table.patches_of());
    }

    #[test]
    fn test_every_creates_singletons() {
        let mut table = table(&[(10.0, 0.0), (10.0, 0.1), (10.0, 0.2), (10.0, 0.3)]);
        let result = table.group(&GroupingMethod::Every).unwrap();
        assert_eq!(result.num_patches, 4);
        assert_eq!(result.num_ungrouped, 0);
        assert_eq!(table.patches_of()["Patch_2"], vec!["src2"]);
    }

    #[test]
    fn test_threshold_close_catalog_single_patch() {
        // Five sources within 0.01 deg of each other, threshold 0.1 deg.
        let mut table = table(&[
            (120.0, 30.0),
            (120.004, 30.0),
            (120.0, 30.004),
            (120.004, 30.004),
            (120.002, 30.002),
        ]);
        let result = table
            .group(&GroupingMethod::Threshold { threshold_deg: 0.1 })
            .unwrap();
        assert_eq!(result.num_patches, 1);
        assert_eq!(result.num_ungrouped, 0);
    }

    #[test]
    fn test_threshold_spread_catalog_all_separate() {
        // Five sources more than 10 deg apart, threshold 0.1 deg.
        let mut table = table(&[
            (0.0, 0.0),
            (20.0, 0.0),
            (40.0, 0.0),
            (60.0, 0.0),
            (80.0, 0.0),
        ]);
        let result = table
            .group(&GroupingMethod::Threshold { threshold_deg: 0.1 })
            .unwrap();
        assert_eq!(result.num_patches, 5);
    }

    #[test]
    fn test_threshold_patch_numbering_follows_insertion_order() {
        let mut table = table(&[(50.0, 0.0), (10.0, 0.0), (50.01, 0.0), (10.01, 0.0)]);
        table
            .group(&GroupingMethod::Threshold { threshold_deg: 0.1 })
            .unwrap();
        let patches = table.patches_of();
        assert_eq!(patches["Patch_0"], vec!["src0", "src2"]);
        assert_eq!(patches["Patch_1"], vec!["src1", "src3"]);
    }

    #[test]
    fn test_from_name_dispatch() {
        let params = GroupingParameters {
            threshold: Some(0.5),
            ..GroupingParameters::default()
        };
        assert_eq!(
            GroupingMethod::from_name("single", &GroupingParameters::default()).unwrap(),
            GroupingMethod::Single
        );
        assert_eq!(
            GroupingMethod::from_name("Threshold", &params).unwrap(),
            GroupingMethod::Threshold { threshold_deg: 0.5 }
        );
        assert_eq!(
            GroupingMethod::from_name("voronoi", &params).unwrap_err(),
            SkyError::UnsupportedAlgorithm("voronoi".into())
        );
        assert!(matches!(
            GroupingMethod::from_name("threshold", &GroupingParameters::default()),
            Err(SkyError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let mut table = table(&[(10.0, 0.0), (20.0, 0.0)]);
        assert!(matches!(
            table.group(&GroupingMethod::Threshold { threshold_deg: 0.0 }),
            Err(SkyError::InvalidParameter(_))
        ));
        assert!(matches!(
            table.group(&GroupingMethod::Threshold {
                threshold_deg: f64::NAN
            }),
            Err(SkyError::InvalidParameter(_))
        ));
        assert!(matches!(
            table.group(&GroupingMethod::Tessellate {
                seed: TessellationSeed::Count(3)
            }),
            Err(SkyError::InvalidParameter(_))
        ));
        assert!(matches!(
            table.group(&GroupingMethod::Tessellate {
                seed: TessellationSeed::Anchors(Vec::new())
            }),
            Err(SkyError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_group_on_empty_table_rejected() {
        let mut table = SkyTable::new();
        assert!(matches!(
            table.group(&GroupingMethod::Single),
            Err(SkyError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_failed_group_leaves_partition_intact() {
        let mut table = table(&[(10.0, 0.0), (10.01, 0.0), (40.0, 0.0)]);
        table
            .group(&GroupingMethod::Threshold { threshold_deg: 0.1 })
            .unwrap();
        let before = table.patches_of();
        assert!(table
            .group(&GroupingMethod::Threshold { threshold_deg: -1.0 })
            .is_err());
        assert_eq!(table.patches_of(), before);
    }

    #[test]
    fn test_regroup_replaces_previous_partition() {
        let mut table = table(&[(10.0, 0.0), (20.0, 0.0)]);
        table.group(&GroupingMethod::Single).unwrap();
        assert_eq!(table.num_patches(), 1);
        let result = table.group(&GroupingMethod::Every).unwrap();
        assert_eq!(result.num_patches, 2);
        assert_eq!(table.num_patches(), 2);
    }
}
