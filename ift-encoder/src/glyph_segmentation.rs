//! Glyph segmentation planning.
//!
//! Given a face and a proposed partition of codepoints into segments, the
//! planner decides which glyphs go into which patch and under what condition
//! each patch must be fetched. The produced plan satisfies the glyph closure
//! requirement: for any subset of segments a client may request, the glyphs
//! delivered by the activated patches cover the face's shaping closure of
//! those codepoints (minus what already ships in the initial font).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use read_fonts::collections::IntSet;
use read_fonts::{FontRef, TableProvider};
use skrifa::GlyphId;

use crate::closure::{ClosureCache, GlyphClosure, SegmentationError};

pub type SegmentIndex = u32;
pub type PatchId = u32;

/// How a condition combines its segments.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConditionKind {
    /// A single segment deterministically maps to the patch.
    Exclusive,
    /// Every listed segment must be present.
    And,
    /// Any listed segment suffices.
    Or,
    /// A conjunction of disjunctions.
    Composite,
    /// Last resort disjunction preserving closure for otherwise uncovered
    /// segments.
    Fallback,
}

/// A conjunctive normal form formula over segment indices paired with the
/// patch it activates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationCondition {
    kind: ConditionKind,
    conjuncts: Vec<BTreeSet<SegmentIndex>>,
    activated: PatchId,
}

impl ActivationCondition {
    /// A condition that activates when the single segment is present.
    pub fn exclusive_segment(index: SegmentIndex, activated: PatchId) -> Self {
        ActivationCondition {
            kind: ConditionKind::Exclusive,
            conjuncts: vec![[index].into()],
            activated,
        }
    }

    /// A condition that activates when every one of the segments is present.
    pub fn and_segments(ids: &BTreeSet<SegmentIndex>, activated: PatchId) -> Self {
        ActivationCondition {
            kind: ConditionKind::And,
            conjuncts: ids.iter().map(|id| [*id].into()).collect(),
            activated,
        }
    }

    /// A condition that activates when any one of the segments is present.
    pub fn or_segments(ids: &BTreeSet<SegmentIndex>, activated: PatchId) -> Self {
        ActivationCondition {
            kind: ConditionKind::Or,
            conjuncts: vec![ids.clone()],
            activated,
        }
    }

    /// A condition that activates when each group has at least one present
    /// segment: `(s11 OR s12 ...) AND (s21 OR ...) AND ...`.
    pub fn composite_condition(groups: &[BTreeSet<SegmentIndex>], activated: PatchId) -> Self {
        ActivationCondition {
            kind: ConditionKind::Composite,
            conjuncts: groups.to_vec(),
            activated,
        }
    }

    /// The last resort condition; an OR over the given segments. An empty
    /// segment set produces a condition that never activates.
    pub fn fallback(ids: &BTreeSet<SegmentIndex>, activated: PatchId) -> Self {
        ActivationCondition {
            kind: ConditionKind::Fallback,
            conjuncts: vec![ids.clone()],
            activated,
        }
    }

    pub fn kind(&self) -> ConditionKind {
        self.kind
    }

    /// The conjunction of disjunctions this condition evaluates.
    pub fn conjuncts(&self) -> &[BTreeSet<SegmentIndex>] {
        &self.conjuncts
    }

    /// The patch to load when the condition is satisfied.
    pub fn activated(&self) -> PatchId {
        self.activated
    }

    pub fn is_exclusive(&self) -> bool {
        self.kind == ConditionKind::Exclusive
    }

    pub fn is_fallback(&self) -> bool {
        self.kind == ConditionKind::Fallback
    }

    /// True when the condition is a single positive literal.
    pub fn is_unitary(&self) -> bool {
        self.conjuncts.len() == 1 && self.conjuncts[0].len() == 1
    }

    /// The set of segments that participate in this condition.
    pub fn triggering_segments(&self) -> BTreeSet<SegmentIndex> {
        self.conjuncts.iter().flatten().copied().collect()
    }

    /// Evaluates the condition against a set of present segments.
    pub fn matches(&self, present: &BTreeSet<SegmentIndex>) -> bool {
        self.conjuncts
            .iter()
            .all(|disjunction| disjunction.iter().any(|s| present.contains(s)))
    }
}

impl Ord for ActivationCondition {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.activated
            .cmp(&other.activated)
            .then_with(|| self.conjuncts.cmp(&other.conjuncts))
            .then_with(|| self.kind.cmp(&other.kind))
    }
}

impl PartialOrd for ActivationCondition {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ActivationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if (")?;
        for (i, group) in self.conjuncts.iter().enumerate() {
            if i > 0 {
                write!(f, " AND ")?;
            }
            write!(f, "(")?;
            for (j, segment) in group.iter().enumerate() {
                if j > 0 {
                    write!(f, " OR ")?;
                }
                write!(f, "s{segment}")?;
            }
            write!(f, ")")?;
        }
        write!(f, ") -> p{}", self.activated)
    }
}

/// Per glyph data sizes used to estimate patch sizes.
#[derive(Debug, Clone, Default)]
pub struct GlyphSizes {
    sizes: Vec<u32>,
}

impl GlyphSizes {
    /// Reads per glyph outline sizes from the face's `loca` table.
    ///
    /// Faces without `glyf`/`loca` report zero for every glyph, which
    /// effectively disables size based patch adjustment.
    pub fn from_font(font: &FontRef<'_>) -> Self {
        let Ok(loca) = font.loca(None) else {
            return Default::default();
        };

        let mut sizes = Vec::new();
        let mut index = 0usize;
        while let (Some(start), Some(end)) = (loca.get_raw(index), loca.get_raw(index + 1)) {
            sizes.push(end.saturating_sub(start));
            index += 1;
        }
        GlyphSizes { sizes }
    }

    pub fn size_of(&self, gid: GlyphId) -> u32 {
        self.sizes
            .get(gid.to_u32() as usize)
            .copied()
            .unwrap_or_default()
    }

    pub fn total(&self, gids: &IntSet<GlyphId>) -> u64 {
        gids.iter().map(|gid| u64::from(self.size_of(gid))).sum()
    }
}

/// Tunables for the planner.
#[derive(Debug, Clone)]
pub struct SegmentationOptions {
    /// Patches estimated below this size are merged into a neighbor.
    pub patch_size_min_bytes: u32,
    /// Patches estimated above this size are split into chunks.
    pub patch_size_max_bytes: u32,
    /// When set, fail with `Unmappable` if more than this many glyphs could
    /// not be placed.
    pub max_unmapped: Option<usize>,
}

impl Default for SegmentationOptions {
    fn default() -> Self {
        SegmentationOptions {
            patch_size_min_bytes: 0,
            patch_size_max_bytes: u32::MAX,
            max_unmapped: None,
        }
    }
}

/// Describes how the glyphs of a face are split into glyph keyed patches and
/// under which conditions each patch loads.
///
/// Immutable once computed.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphSegmentation {
    segments: Vec<IntSet<u32>>,
    patches: BTreeMap<PatchId, IntSet<GlyphId>>,
    conditions: BTreeSet<ActivationCondition>,
    init_font_glyphs: IntSet<GlyphId>,
    unmapped_glyphs: IntSet<GlyphId>,
}

impl GlyphSegmentation {
    /// Analyzes the codepoint segments against the face's glyph closure and
    /// produces a segmentation plan satisfying the closure requirement.
    ///
    /// `initial_segment` is the codepoint set that ships in the initial
    /// font.
    pub fn compute<T: GlyphClosure>(
        closure: &T,
        glyph_sizes: &GlyphSizes,
        initial_segment: IntSet<u32>,
        codepoint_segments: Vec<IntSet<u32>>,
        options: SegmentationOptions,
    ) -> Result<GlyphSegmentation, SegmentationError> {
        let mut cache = ClosureCache::new(closure);
        let init_font_glyphs = cache.closure(&initial_segment)?;

        // Step 1: per segment exclusive glyph sets. E[i] holds the glyphs a
        // segment pulls in on its own, beyond the initial font.
        let mut exclusive: Vec<IntSet<GlyphId>> = Vec::with_capacity(codepoint_segments.len());
        for segment in &codepoint_segments {
            let mut codepoints = initial_segment.clone();
            codepoints.union(segment);
            let mut closed = cache.closure(&codepoints)?;
            closed.remove_all(init_font_glyphs.iter());
            exclusive.push(closed);
        }

        let mut single_activations: BTreeMap<GlyphId, BTreeSet<SegmentIndex>> = BTreeMap::new();
        for (index, glyphs) in exclusive.iter().enumerate() {
            for gid in glyphs.iter() {
                single_activations
                    .entry(gid)
                    .or_default()
                    .insert(index as SegmentIndex);
            }
        }

        // Step 2: pairwise interaction glyphs, those that appear only when
        // both segments of a pair are present.
        let mut pair_activations: BTreeMap<GlyphId, BTreeSet<(SegmentIndex, SegmentIndex)>> =
            BTreeMap::new();
        for i in 0..codepoint_segments.len() {
            for j in (i + 1)..codepoint_segments.len() {
                let mut codepoints = initial_segment.clone();
                codepoints.union(&codepoint_segments[i]);
                codepoints.union(&codepoint_segments[j]);
                let closed = cache.closure(&codepoints)?;

                for gid in closed.iter() {
                    if init_font_glyphs.contains(gid)
                        || exclusive[i].contains(gid)
                        || exclusive[j].contains(gid)
                    {
                        continue;
                    }
                    pair_activations
                        .entry(gid)
                        .or_default()
                        .insert((i as SegmentIndex, j as SegmentIndex));
                }
            }
        }

        // Step 3: group glyphs by the minimal segment sets that produce them.
        let mut and_groups: BTreeMap<BTreeSet<SegmentIndex>, IntSet<GlyphId>> = BTreeMap::new();
        let mut or_groups: BTreeMap<BTreeSet<SegmentIndex>, IntSet<GlyphId>> = BTreeMap::new();
        let mut composite_groups: BTreeMap<Vec<BTreeSet<SegmentIndex>>, IntSet<GlyphId>> =
            BTreeMap::new();
        let mut unmapped_glyphs = IntSet::<GlyphId>::empty();
        let mut fallback_group: BTreeSet<SegmentIndex> = BTreeSet::new();

        let all_gids: BTreeSet<GlyphId> = single_activations
            .keys()
            .chain(pair_activations.keys())
            .copied()
            .collect();
        for gid in all_gids {
            let singles = single_activations.get(&gid);
            let pairs = pair_activations.get(&gid);
            match (singles, pairs) {
                (Some(singles), None) if singles.len() == 1 => {
                    and_groups.entry(singles.clone()).or_default().insert(gid);
                }
                (Some(singles), None) => {
                    or_groups.entry(singles.clone()).or_default().insert(gid);
                }
                (None, Some(pairs)) if pairs.len() == 1 => {
                    let (i, j) = *pairs.first().unwrap();
                    and_groups.entry([i, j].into()).or_default().insert(gid);
                }
                (None, Some(pairs)) => {
                    // Multiple distinct pairs. When they share exactly one
                    // segment the glyph needs that segment plus any of the
                    // others: a composite AND-of-OR. Anything else is outside
                    // the pair analysis bound.
                    let mut members: BTreeSet<SegmentIndex> = BTreeSet::new();
                    let mut common: BTreeSet<SegmentIndex> =
                        pairs.iter().flat_map(|(i, j)| [*i, *j]).collect();
                    for (i, j) in pairs {
                        members.extend([*i, *j]);
                        common.retain(|s| s == i || s == j);
                    }

                    if common.len() == 1 {
                        let core = *common.first().unwrap();
                        let others: BTreeSet<SegmentIndex> =
                            members.into_iter().filter(|s| *s != core).collect();
                        composite_groups
                            .entry(vec![[core].into(), others])
                            .or_default()
                            .insert(gid);
                    } else {
                        unmapped_glyphs.insert(gid);
                        fallback_group.extend(members);
                    }
                }
                (Some(singles), Some(pairs)) => {
                    // Activated both alone and through interactions; the
                    // required formula is beyond what pair analysis can
                    // justify, so route it through the fallback.
                    unmapped_glyphs.insert(gid);
                    fallback_group.extend(singles.iter().copied());
                    fallback_group.extend(pairs.iter().flat_map(|(i, j)| [*i, *j]));
                }
                (None, None) => unreachable!(),
            }
        }

        if let Some(max_unmapped) = options.max_unmapped {
            let unmapped = unmapped_glyphs.len() as usize;
            if unmapped > max_unmapped {
                return Err(SegmentationError::Unmappable(unmapped));
            }
        }

        // Step 4: candidate patches in a stable order; ids are assigned after
        // the size bounds reshape the list.
        let mut candidates: Vec<Candidate> = Vec::new();
        for (segments, gids) in and_groups {
            let kind = if segments.len() == 1 {
                ConditionKind::Exclusive
            } else {
                ConditionKind::And
            };
            candidates.push(Candidate {
                kind,
                conjuncts: segments.iter().map(|s| [*s].into()).collect(),
                gids,
            });
        }
        for (segments, gids) in or_groups {
            candidates.push(Candidate {
                kind: ConditionKind::Or,
                conjuncts: vec![segments],
                gids,
            });
        }
        for (conjuncts, gids) in composite_groups {
            candidates.push(Candidate {
                kind: ConditionKind::Composite,
                conjuncts,
                gids,
            });
        }

        let candidates = apply_size_bounds(candidates, glyph_sizes, &options);

        // Step 5: number the patches from 1 and materialize conditions.
        let mut patches: BTreeMap<PatchId, IntSet<GlyphId>> = BTreeMap::new();
        let mut conditions: BTreeSet<ActivationCondition> = BTreeSet::new();
        let mut referenced: BTreeSet<SegmentIndex> = BTreeSet::new();
        let mut next_patch_id: PatchId = 1;
        for candidate in candidates {
            referenced.extend(candidate.conjuncts.iter().flatten().copied());
            conditions.insert(ActivationCondition {
                kind: candidate.kind,
                conjuncts: candidate.conjuncts,
                activated: next_patch_id,
            });
            patches.insert(next_patch_id, candidate.gids);
            next_patch_id += 1;
        }

        // Step 6: the catch-all. Segments referenced by no condition, plus
        // the observed segments of unmapped glyphs, activate a final patch
        // carrying the unmapped glyphs.
        let mut fallback_segments = fallback_group;
        for index in 0..codepoint_segments.len() as SegmentIndex {
            if !referenced.contains(&index) {
                fallback_segments.insert(index);
            }
        }
        conditions.insert(ActivationCondition::fallback(
            &fallback_segments,
            next_patch_id,
        ));
        patches.insert(next_patch_id, unmapped_glyphs.clone());

        Ok(GlyphSegmentation {
            segments: codepoint_segments,
            patches,
            conditions,
            init_font_glyphs,
            unmapped_glyphs,
        })
    }

    /// The conditions describing how the patches are activated.
    pub fn conditions(&self) -> &BTreeSet<ActivationCondition> {
        &self.conditions
    }

    /// The codepoint segments the condition segment indices refer to.
    pub fn segments(&self) -> &[IntSet<u32>] {
        &self.segments
    }

    /// The glyphs carried by each patch, keyed by the patch id used in the
    /// activation conditions.
    pub fn gid_segments(&self) -> &BTreeMap<PatchId, IntSet<GlyphId>> {
        &self.patches
    }

    /// Glyphs that must ship in the initial font.
    pub fn init_font_glyphs(&self) -> &IntSet<GlyphId> {
        &self.init_font_glyphs
    }

    /// Glyphs whose interactions were too complex to place in a regular
    /// patch; they are carried by the fallback patch.
    pub fn unmapped_glyphs(&self) -> &IntSet<GlyphId> {
        &self.unmapped_glyphs
    }

    /// The union of glyphs delivered by all patches whose condition is
    /// satisfied by the given set of present segments.
    pub fn activated_glyphs(&self, present: &BTreeSet<SegmentIndex>) -> IntSet<GlyphId> {
        let mut out = IntSet::<GlyphId>::empty();
        for condition in &self.conditions {
            if !condition.matches(present) {
                continue;
            }
            if let Some(gids) = self.patches.get(&condition.activated()) {
                out.union(gids);
            }
        }
        out
    }
}

struct Candidate {
    kind: ConditionKind,
    conjuncts: Vec<BTreeSet<SegmentIndex>>,
    gids: IntSet<GlyphId>,
}

impl Candidate {
    /// Serialized size estimate: outline bytes plus an offset entry per
    /// glyph.
    fn estimated_size(&self, glyph_sizes: &GlyphSizes) -> u64 {
        glyph_sizes.total(&self.gids) + 4 * (self.gids.len() + 1)
    }

    /// Merges `other` into this candidate. Identical conditions stay as they
    /// are; differing ones are promoted to the disjunction of all segments of
    /// both, which activates at least as often and so preserves the closure
    /// property.
    fn absorb(&mut self, other: Candidate) {
        self.gids.union(&other.gids);
        if self.conjuncts != other.conjuncts {
            let all: BTreeSet<SegmentIndex> = self
                .conjuncts
                .iter()
                .chain(other.conjuncts.iter())
                .flatten()
                .copied()
                .collect();
            self.conjuncts = vec![all];
            self.kind = ConditionKind::Or;
        }
    }
}

fn apply_size_bounds(
    candidates: Vec<Candidate>,
    glyph_sizes: &GlyphSizes,
    options: &SegmentationOptions,
) -> Vec<Candidate> {
    let min = u64::from(options.patch_size_min_bytes);
    let max = u64::from(options.patch_size_max_bytes).max(1);

    // Undersized patches merge forward, preferring the next candidate with
    // the same condition shape. The target is re-examined when its own turn
    // comes, so chains of small patches collapse together.
    let mut merged: Vec<Candidate> = Vec::new();
    let mut pending: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    for index in 0..pending.len() {
        let candidate = pending[index].take().unwrap();
        if candidate.estimated_size(glyph_sizes) >= min {
            merged.push(candidate);
            continue;
        }

        let target = (index + 1..pending.len())
            .find(|i| pending[*i].as_ref().is_some_and(|c| c.kind == candidate.kind))
            .or_else(|| (index + 1 < pending.len()).then_some(index + 1));
        if let Some(target) = target {
            let mut absorbed = pending[target].take().unwrap();
            absorbed.absorb(candidate);
            pending[target] = Some(absorbed);
        } else if let Some(previous) = merged.last_mut() {
            previous.absorb(candidate);
        } else {
            merged.push(candidate);
        }
    }

    // Oversized patches split into chunks of roughly equal glyph counts, all
    // sharing the original condition so they activate together.
    let mut result: Vec<Candidate> = Vec::new();
    for candidate in merged {
        let size = candidate.estimated_size(glyph_sizes);
        let glyph_count = candidate.gids.len();
        if size <= max || glyph_count <= 1 {
            result.push(candidate);
            continue;
        }

        let chunks = size.div_ceil(max).min(glyph_count);
        let per_chunk = glyph_count.div_ceil(chunks) as usize;
        let gids: Vec<GlyphId> = candidate.gids.iter().collect();
        for chunk in gids.chunks(per_chunk) {
            result.push(Candidate {
                kind: candidate.kind,
                conjuncts: candidate.conjuncts.clone(),
                gids: chunk.iter().copied().collect(),
            });
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closure::ClosureError;
    use crate::testdata::{cps, gids, FakeClosure};

    fn present(indices: &[u32]) -> BTreeSet<SegmentIndex> {
        indices.iter().copied().collect()
    }

    fn compute(
        closure: &FakeClosure,
        initial: &[u32],
        segments: &[&[u32]],
    ) -> GlyphSegmentation {
        compute_with_options(closure, initial, segments, Default::default()).unwrap()
    }

    fn compute_with_options(
        closure: &FakeClosure,
        initial: &[u32],
        segments: &[&[u32]],
        options: SegmentationOptions,
    ) -> Result<GlyphSegmentation, SegmentationError> {
        GlyphSegmentation::compute(
            closure,
            &GlyphSizes::default(),
            cps(initial),
            segments.iter().map(|s| cps(s)).collect(),
            options,
        )
    }

    /// Exhaustively checks the glyph closure requirement: for every subset of
    /// segments, the activated patches must cover the closure of the union of
    /// those segments plus the initial segment, minus the initial font.
    fn check_closure_property(
        segmentation: &GlyphSegmentation,
        closure: &FakeClosure,
        initial: &[u32],
    ) {
        use crate::closure::GlyphClosure;

        let segment_count = segmentation.segments().len();
        for mask in 0u32..(1 << segment_count) {
            let mut selected: BTreeSet<SegmentIndex> = BTreeSet::new();
            let mut codepoints = cps(initial);
            for index in 0..segment_count {
                if mask & (1 << index) != 0 {
                    selected.insert(index as SegmentIndex);
                    codepoints.union(&segmentation.segments()[index]);
                }
            }

            let mut required = closure.glyph_closure(&codepoints).unwrap();
            required.remove_all(segmentation.init_font_glyphs().iter());

            let activated = segmentation.activated_glyphs(&selected);
            for gid in required.iter() {
                assert!(
                    activated.contains(gid),
                    "glyph {gid} missing for segment subset {selected:?}"
                );
            }
        }
    }

    #[test]
    fn disjoint_segments_get_exclusive_patches() {
        // Two scripts with no shaping interaction: each gets an exclusive
        // patch, plus the catch-all.
        let closure = FakeClosure::new(
            &[(0x41, 1), (0x42, 2), (0x43, 3), (0x410, 4), (0x411, 5)],
            &[],
        );
        let segmentation = compute(&closure, &[], &[&[0x41, 0x42, 0x43], &[0x410, 0x411]]);

        assert_eq!(segmentation.init_font_glyphs(), &gids(&[0]));
        assert_eq!(segmentation.gid_segments().len(), 3);
        assert_eq!(segmentation.gid_segments()[&1], gids(&[1, 2, 3]));
        assert_eq!(segmentation.gid_segments()[&2], gids(&[4, 5]));
        assert!(segmentation.gid_segments()[&3].is_empty());

        let conditions: Vec<&ActivationCondition> = segmentation.conditions().iter().collect();
        assert_eq!(conditions.len(), 3);
        assert!(conditions[0].is_exclusive());
        assert_eq!(conditions[0].conjuncts(), &[present(&[0])]);
        assert_eq!(conditions[0].activated(), 1);
        assert!(conditions[1].is_exclusive());
        assert_eq!(conditions[1].conjuncts(), &[present(&[1])]);
        assert!(conditions[2].is_fallback());

        // Requesting only the first segment activates only patch 1.
        assert_eq!(segmentation.activated_glyphs(&present(&[0])), gids(&[1, 2, 3]));
        assert_eq!(segmentation.activated_glyphs(&present(&[1])), gids(&[4, 5]));

        check_closure_property(&segmentation, &closure, &[]);
    }

    #[test]
    fn initial_segment_glyphs_stay_in_the_base_font() {
        let closure = FakeClosure::new(&[(0x41, 1), (0x42, 2)], &[]);
        let segmentation = compute(&closure, &[0x41], &[&[0x41, 0x42]]);

        assert_eq!(segmentation.init_font_glyphs(), &gids(&[0, 1]));
        assert_eq!(segmentation.gid_segments()[&1], gids(&[2]));

        check_closure_property(&segmentation, &closure, &[0x41]);
    }

    #[test]
    fn shared_glyph_becomes_or_patch() {
        // Glyph 7 is reachable from either segment on its own, so it cannot
        // be exclusive to one of them.
        let closure = FakeClosure::new(&[(0x78, 7), (0x61, 1), (0x79, 7)], &[]);
        let segmentation = compute(&closure, &[], &[&[0x78, 0x61], &[0x79]]);

        assert_eq!(segmentation.gid_segments()[&1], gids(&[1]));
        assert_eq!(segmentation.gid_segments()[&2], gids(&[7]));

        let or_condition = segmentation
            .conditions()
            .iter()
            .find(|c| c.activated() == 2)
            .unwrap();
        assert_eq!(or_condition.kind(), ConditionKind::Or);
        assert_eq!(or_condition.conjuncts(), &[present(&[0, 1])]);

        assert_eq!(segmentation.activated_glyphs(&present(&[1])), gids(&[7]));

        check_closure_property(&segmentation, &closure, &[]);
    }

    #[test]
    fn interaction_glyph_gets_and_condition() {
        // Glyph 9 only appears when both segments are present (a ligature).
        let closure = FakeClosure::new(&[(0x66, 1), (0x69, 2)], &[(&[0x66, 0x69], 9)]);
        let segmentation = compute(&closure, &[], &[&[0x66], &[0x69]]);

        assert_eq!(segmentation.gid_segments()[&1], gids(&[1]));
        assert_eq!(segmentation.gid_segments()[&2], gids(&[9]));
        assert_eq!(segmentation.gid_segments()[&3], gids(&[2]));

        let and_condition = segmentation
            .conditions()
            .iter()
            .find(|c| c.activated() == 2)
            .unwrap();
        assert_eq!(and_condition.kind(), ConditionKind::And);
        assert_eq!(
            and_condition.conjuncts(),
            &[present(&[0]), present(&[1])]
        );

        // The ligature patch stays unloaded until both segments are needed.
        assert_eq!(segmentation.activated_glyphs(&present(&[0])), gids(&[1]));
        assert_eq!(
            segmentation.activated_glyphs(&present(&[0, 1])),
            gids(&[1, 2, 9])
        );

        check_closure_property(&segmentation, &closure, &[]);
    }

    #[test]
    fn common_core_pairs_get_composite_condition() {
        // Glyph 8 appears with segments {0,1} and with {0,2}: segment 0 plus
        // any of the others.
        let closure = FakeClosure::new(
            &[(0x61, 1), (0x62, 2), (0x63, 3)],
            &[(&[0x61, 0x62], 8), (&[0x61, 0x63], 8)],
        );
        let segmentation = compute(&closure, &[], &[&[0x61], &[0x62], &[0x63]]);

        let composite = segmentation
            .conditions()
            .iter()
            .find(|c| c.kind() == ConditionKind::Composite)
            .unwrap();
        assert_eq!(
            composite.conjuncts(),
            &[present(&[0]), present(&[1, 2])]
        );
        assert_eq!(segmentation.gid_segments()[&composite.activated()], gids(&[8]));

        assert!(composite.matches(&present(&[0, 1])));
        assert!(composite.matches(&present(&[0, 2])));
        assert!(!composite.matches(&present(&[1, 2])));
        assert!(!composite.matches(&present(&[0])));

        check_closure_property(&segmentation, &closure, &[]);
    }

    #[test]
    fn undeterminable_glyphs_fall_back() {
        // Glyph 8 is produced by segment 0 alone but also by the interaction
        // of segments 1 and 2; no supported formula captures that, so it is
        // unmapped and lands in the catch-all patch.
        let closure = FakeClosure::new(
            &[(0x71, 8), (0x62, 5), (0x63, 6)],
            &[(&[0x62, 0x63], 8)],
        );
        let segmentation = compute(&closure, &[], &[&[0x71], &[0x62], &[0x63]]);

        assert_eq!(segmentation.unmapped_glyphs(), &gids(&[8]));

        let fallback = segmentation
            .conditions()
            .iter()
            .find(|c| c.is_fallback())
            .unwrap();
        assert_eq!(fallback.triggering_segments(), present(&[0, 1, 2]));
        assert_eq!(
            segmentation.gid_segments()[&fallback.activated()],
            gids(&[8])
        );

        check_closure_property(&segmentation, &closure, &[]);
    }

    #[test]
    fn unmapped_threshold_is_enforced() {
        let closure = FakeClosure::new(
            &[(0x71, 8), (0x62, 5), (0x63, 6)],
            &[(&[0x62, 0x63], 8)],
        );
        let result = compute_with_options(
            &closure,
            &[],
            &[&[0x71], &[0x62], &[0x63]],
            SegmentationOptions {
                max_unmapped: Some(0),
                ..Default::default()
            },
        );
        assert_eq!(result, Err(SegmentationError::Unmappable(1)));
    }

    #[test]
    fn undersized_patches_merge() {
        let closure = FakeClosure::new(
            &[(0x41, 1), (0x42, 2), (0x43, 3), (0x410, 4), (0x411, 5)],
            &[],
        );
        let segmentation = compute_with_options(
            &closure,
            &[],
            &[&[0x41, 0x42, 0x43], &[0x410, 0x411]],
            SegmentationOptions {
                patch_size_min_bytes: 10_000,
                ..Default::default()
            },
        )
        .unwrap();

        // Both exclusive candidates collapse into one patch activated by
        // either segment.
        assert_eq!(segmentation.gid_segments()[&1], gids(&[1, 2, 3, 4, 5]));
        let condition = segmentation
            .conditions()
            .iter()
            .find(|c| c.activated() == 1)
            .unwrap();
        assert_eq!(condition.kind(), ConditionKind::Or);
        assert_eq!(condition.conjuncts(), &[present(&[0, 1])]);

        check_closure_property(&segmentation, &closure, &[]);
    }

    #[test]
    fn oversized_patches_split() {
        let closure = FakeClosure::new(
            &[(0x41, 1), (0x42, 2), (0x43, 3), (0x44, 4)],
            &[],
        );
        let segmentation = compute_with_options(
            &closure,
            &[],
            &[&[0x41, 0x42, 0x43, 0x44]],
            SegmentationOptions {
                patch_size_max_bytes: 1,
                ..Default::default()
            },
        )
        .unwrap();

        // Four chunks plus the catch-all; all chunks share one condition so
        // any triggering subset loads them together.
        let chunk_conditions: Vec<&ActivationCondition> = segmentation
            .conditions()
            .iter()
            .filter(|c| !c.is_fallback())
            .collect();
        assert_eq!(chunk_conditions.len(), 4);
        for condition in &chunk_conditions {
            assert_eq!(condition.conjuncts(), &[present(&[0])]);
        }

        let mut total = IntSet::<GlyphId>::empty();
        for condition in &chunk_conditions {
            let chunk = &segmentation.gid_segments()[&condition.activated()];
            assert!(!chunk.iter().any(|gid| total.contains(gid)));
            total.union(chunk);
        }
        assert_eq!(total, gids(&[1, 2, 3, 4]));

        assert_eq!(
            segmentation.activated_glyphs(&present(&[0])),
            gids(&[1, 2, 3, 4])
        );

        check_closure_property(&segmentation, &closure, &[]);
    }

    #[test]
    fn closure_failure_propagates() {
        let closure = FakeClosure::failing();
        let result = compute_with_options(&closure, &[], &[&[0x41]], Default::default());
        assert_eq!(
            result,
            Err(SegmentationError::ClosureFailed(
                "subsetter failure".to_string()
            ))
        );
    }

    #[test]
    fn conditions_are_ordered_by_patch_id() {
        let closure = FakeClosure::new(&[(0x66, 1), (0x69, 2)], &[(&[0x66, 0x69], 9)]);
        let segmentation = compute(&closure, &[], &[&[0x66], &[0x69]]);

        let ids: Vec<PatchId> = segmentation
            .conditions()
            .iter()
            .map(|c| c.activated())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn condition_display() {
        let condition = ActivationCondition::composite_condition(
            &[present(&[0]), present(&[1, 2])],
            7,
        );
        assert_eq!(condition.to_string(), "if ((s0) AND (s1 OR s2)) -> p7");
    }

    #[test]
    fn closure_error_message() {
        assert_eq!(
            ClosureError("boom".to_string()).to_string(),
            "Glyph closure computation failed: boom"
        );
    }
}
