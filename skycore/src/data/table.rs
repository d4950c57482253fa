use std::collections::{BTreeMap, HashMap};

use itertools::Itertools;
use log::{debug, info};
use ordered_float::OrderedFloat;

use crate::algorithm::grouping::{self, GroupingMethod, GroupingResult};
use crate::data::patch::{CentroidMode, Patch, PatchPosition};
use crate::data::position::SkyPosition;
use crate::data::source::{Membership, Source};
use crate::error::{SkyError, SkyResult};

/// How duplicate rows are identified when two tables are concatenated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MatchMode {
    /// Rows with equal source names are duplicates.
    Name,
    /// A row's nearest neighbour within `radius_deg` is its duplicate.
    Position { radius_deg: f64 },
}

/// How duplicate rows are resolved when two tables are concatenated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeepMode {
    /// Keep both rows; colliding names become `name_1` / `name_2`.
    All,
    /// Keep the row already in the table, drop the incoming one.
    FromSelf,
    /// The incoming row replaces the matched one.
    FromOther,
}

/// The canonical in-memory sky model: a collection of sources and the
/// patches grouping them.
///
/// The table owns its sources and patches exclusively; all mutation goes
/// through methods here so that source membership, the per-patch member
/// lists and the cached patch positions never drift apart. Patches are kept
/// in a sorted map and members in insertion order, so iteration output is
/// reproducible run to run.
#[derive(Clone, Debug, Default)]
pub struct SkyTable {
    pub(crate) sources: Vec<Source>,
    index: HashMap<String, usize>,
    pub(crate) patches: BTreeMap<String, Patch>,
    centroid_mode: CentroidMode,
}

impl SkyTable {
    pub fn new() -> SkyTable {
        SkyTable::default()
    }

    /// Builds a table from catalog rows. Sources carrying a patch name are
    /// wired into that patch. Duplicate names are rejected.
    pub fn from_sources(sources: Vec<Source>) -> SkyResult<SkyTable> {
        let mut table = SkyTable::new();
        for source in sources {
            table.insert_source(source)?;
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn source(&self, name: &str) -> Option<&Source> {
        self.index.get(name).map(|&i| &self.sources[i])
    }

    pub fn num_patches(&self) -> usize {
        self.patches.len()
    }

    pub fn has_patches(&self) -> bool {
        !self.patches.is_empty()
    }

    pub fn patch(&self, name: &str) -> Option<&Patch> {
        self.patches.get(name)
    }

    pub fn centroid_mode(&self) -> CentroidMode {
        self.centroid_mode
    }

    /// Appends one source, honouring any patch name it carries.
    pub fn add_source(&mut self, source: Source) -> SkyResult<()> {
        let name = source.name.clone();
        self.insert_source(source)?;
        debug!("Added source '{}'", name);
        Ok(())
    }

    /// Moves one source into the named patch (created on demand) or, with
    /// `None`, out of any patch. Emptied patches are dropped; both affected
    /// patches get their cached positions invalidated.
    pub fn assign_patch(&mut self, source_name: &str, patch_name: Option<&str>) -> SkyResult<()> {
        let idx = *self
            .index
            .get(source_name)
            .ok_or_else(|| SkyError::UnknownSource(source_name.to_string()))?;
        self.detach(idx);
        if let Some(patch_name) = patch_name {
            self.attach(idx, patch_name);
        }
        Ok(())
    }

    /// The current partition: patch name to member source names, patches in
    /// name order, members in insertion order.
    pub fn patches_of(&self) -> BTreeMap<String, Vec<String>> {
        self.patches
            .iter()
            .map(|(name, patch)| {
                let members = patch
                    .members
                    .iter()
                    .map(|&i| self.sources[i].name.clone())
                    .collect();
                (name.clone(), members)
            })
            .collect()
    }

    /// Clears every patch reference and drops all patches, pinned positions
    /// included.
    pub fn ungroup(&mut self) {
        for source in &mut self.sources {
            source.membership = Membership::Ungrouped;
        }
        self.patches.clear();
        info!("Ungrouped {} sources", self.sources.len());
    }

    /// Regroups the whole table with the given algorithm. This is a full
    /// reassignment: validation happens before anything is touched, and on
    /// success every prior patch is replaced.
    pub fn group(&mut self, method: &GroupingMethod) -> SkyResult<GroupingResult> {
        grouping::group(self, method)
    }

    /// Representative position of the named patch: the pinned position if
    /// one was set, otherwise the cached derived position, recomputed from
    /// the members if stale.
    pub fn patch_position(&mut self, patch_name: &str) -> SkyResult<SkyPosition> {
        let mode = self.centroid_mode;
        let patch = self
            .patches
            .get_mut(patch_name)
            .ok_or_else(|| SkyError::UnknownPatch(patch_name.to_string()))?;
        Ok(patch.resolve(&self.sources, mode))
    }

    /// Resolves every patch position, in patch-name order.
    pub fn patch_positions(&mut self) -> BTreeMap<String, SkyPosition> {
        let mode = self.centroid_mode;
        let sources = &self.sources;
        self.patches
            .iter_mut()
            .map(|(name, patch)| (name.clone(), patch.resolve(sources, mode)))
            .collect()
    }

    /// Pins the patch to an explicit position. A pinned position always wins
    /// over the derived centroid and survives every membership change until
    /// unpinned.
    pub fn pin_patch_position(&mut self, patch_name: &str, position: SkyPosition) -> SkyResult<()> {
        let patch = self
            .patches
            .get_mut(patch_name)
            .ok_or_else(|| SkyError::UnknownPatch(patch_name.to_string()))?;
        patch.position = PatchPosition::Pinned(position);
        Ok(())
    }

    /// Reverts the patch to a derived position, recomputed on the next read.
    pub fn unpin_patch_position(&mut self, patch_name: &str) -> SkyResult<()> {
        let patch = self
            .patches
            .get_mut(patch_name)
            .ok_or_else(|| SkyError::UnknownPatch(patch_name.to_string()))?;
        patch.position = PatchPosition::Derived(None);
        Ok(())
    }

    /// Selects the derived-position estimator and invalidates every cached
    /// derived position. Pinned positions are unaffected.
    pub fn set_centroid_mode(&mut self, mode: CentroidMode) {
        if mode != self.centroid_mode {
            self.centroid_mode = mode;
            for patch in self.patches.values_mut() {
                patch.invalidate();
            }
        }
    }

    /// Merges another table into this one.
    ///
    /// Mirrors the classic sky-model concatenation step: the incoming
    /// table's grouping state is first aligned with this table's (grouped
    /// `every` if only this table has patches, ungrouped if only the
    /// incoming one does), duplicates are identified per `match_mode` and
    /// resolved per `keep`, and incoming members land in same-named patches
    /// created on demand.
    pub fn concatenate(
        &mut self,
        mut other: SkyTable,
        match_mode: MatchMode,
        keep: KeepMode,
    ) -> SkyResult<()> {
        if let MatchMode::Position { radius_deg } = match_mode {
            if !radius_deg.is_finite() || radius_deg <= 0.0 {
                return Err(SkyError::InvalidParameter(format!(
                    "match radius must be positive, got {}",
                    radius_deg
                )));
            }
        }
        if self.has_patches() && !other.has_patches() && !other.is_empty() {
            other.group(&GroupingMethod::Every)?;
        } else if !self.has_patches() && other.has_patches() {
            other.ungroup();
        }

        let num_incoming = other.len();
        let duplicate_of: Vec<Option<usize>> = other
            .sources
            .iter()
            .map(|incoming| self.find_duplicate(incoming, match_mode))
            .collect();

        for (incoming, duplicate) in other.sources.into_iter().zip(duplicate_of) {
            match (duplicate, keep) {
                (Some(_), KeepMode::FromSelf) => {}
                (Some(existing_idx), KeepMode::FromOther) => {
                    self.replace_source(existing_idx, incoming);
                }
                _ => self.insert_renaming_collisions(incoming)?,
            }
        }
        info!(
            "Concatenated {} sources; table now holds {} sources in {} patches",
            num_incoming,
            self.len(),
            self.num_patches()
        );
        Ok(())
    }

    /// Index of the existing row that duplicates `incoming`, if any.
    fn find_duplicate(&self, incoming: &Source, match_mode: MatchMode) -> Option<usize> {
        match match_mode {
            MatchMode::Name => self.index.get(&incoming.name).copied(),
            MatchMode::Position { radius_deg } => self
                .sources
                .iter()
                .position_min_by_key(|existing| {
                    OrderedFloat(existing.position.separation_deg(&incoming.position))
                })
                .filter(|&nearest| {
                    self.sources[nearest]
                        .position
                        .separation_deg(&incoming.position)
                        <= radius_deg
                }),
        }
    }

    /// Overwrites the payload of row `idx` with the incoming row's data and
    /// moves it into the incoming row's patch. The incoming name is adopted
    /// unless another row already holds it.
    fn replace_source(&mut self, idx: usize, incoming: Source) {
        self.detach(idx);
        let current_name = self.sources[idx].name.clone();
        if incoming.name != current_name && !self.index.contains_key(&incoming.name) {
            self.rename_source(idx, &incoming.name);
        }
        let target_patch = incoming.patch_name().map(str::to_string);
        let row = &mut self.sources[idx];
        row.position = incoming.position;
        row.shape = incoming.shape;
        row.flux = incoming.flux;
        row.spectral_index = incoming.spectral_index;
        row.reference_frequency = incoming.reference_frequency;
        if let Some(patch_name) = target_patch {
            self.attach(idx, &patch_name);
        }
    }

    /// Inserts an incoming row; a name collision renames the existing row to
    /// `name_1` and the incoming one to `name_2`.
    fn insert_renaming_collisions(&mut self, mut incoming: Source) -> SkyResult<()> {
        let collision = self.index.get(&incoming.name).copied();
        if let Some(existing) = collision {
            let renamed = format!("{}_1", incoming.name);
            self.rename_source(existing, &renamed);
            incoming.name = format!("{}_2", incoming.name);
        }
        self.insert_source(incoming)?;
        Ok(())
    }

    fn rename_source(&mut self, idx: usize, new_name: &str) {
        let old_name = std::mem::replace(&mut self.sources[idx].name, new_name.to_string());
        self.index.remove(&old_name);
        self.index.insert(new_name.to_string(), idx);
    }

    /// Appends a source row and wires up its patch membership.
    fn insert_source(&mut self, mut source: Source) -> SkyResult<usize> {
        if self.index.contains_key(&source.name) {
            return Err(SkyError::DuplicateSource(source.name));
        }
        let idx = self.sources.len();
        let membership = std::mem::take(&mut source.membership);
        self.index.insert(source.name.clone(), idx);
        self.sources.push(source);
        if let Membership::Grouped(patch_name) = membership {
            self.attach(idx, &patch_name);
        }
        Ok(idx)
    }

    /// Removes source `idx` from its patch, dropping the patch if emptied.
    fn detach(&mut self, idx: usize) {
        if let Membership::Grouped(patch_name) = std::mem::take(&mut self.sources[idx].membership)
        {
            if let Some(patch) = self.patches.get_mut(&patch_name) {
                patch.members.retain(|&member| member != idx);
                patch.invalidate();
                if patch.members.is_empty() {
                    self.patches.remove(&patch_name);
                }
            }
        }
    }

    /// Adds source `idx` to the named patch, creating it on demand.
    fn attach(&mut self, idx: usize, patch_name: &str) {
        self.sources[idx].membership = Membership::Grouped(patch_name.to_string());
        let patch = self
            .patches
            .entry(patch_name.to_string())
            .or_insert_with(|| Patch::new(patch_name));
        patch.members.push(idx);
        patch.invalidate();
    }

    /// Installs a freshly computed partition: one canonical group label per
    /// source, already numbered by first occurrence. Replaces every existing
    /// patch.
    pub(crate) fn apply_grouping(&mut self, labels: &[usize]) -> GroupingResult {
        debug_assert_eq!(labels.len(), self.sources.len());
        self.patches.clear();
        for (idx, &label) in labels.iter().enumerate() {
            let patch_name = format!("Patch_{}", label);
            self.attach(idx, &patch_name);
        }
        GroupingResult {
            num_patches: self.patches.len(),
            num_ungrouped: self
                .sources
                .iter()
                .filter(|s| s.membership == Membership::Ungrouped)
                .count(),
        }
    }
}
