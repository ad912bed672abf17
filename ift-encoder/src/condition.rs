//! Lowering activation conditions to patch map entries.
//!
//! Exclusive conditions collapse into a single coverage entry. Compound
//! conditions are expressed structurally as [`ConditionEntry`] records that
//! reference earlier entries by index; entries that exist only to be
//! referenced carry no activated patch and are ignored by clients. When the
//! structural form cannot be carried by the wire format the plan is instead
//! lowered to redundant coverage entries, which activate a superset of the
//! precise conditions and therefore still satisfy the closure requirement.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use read_fonts::collections::IntSet;

use ift_core::patchmap::{Coverage, PatchEncoding, PatchMap};

use crate::closure::SegmentationError;
use crate::glyph_segmentation::{ActivationCondition, GlyphSegmentation, PatchId, SegmentIndex};

/// One structural condition entry.
///
/// Either a base entry carrying codepoint coverage, or a compound entry
/// referencing earlier entries by index. Entries with no activated patch id
/// exist only to be referenced by later compound entries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConditionEntry {
    pub codepoints: IntSet<u32>,
    pub activated_patch_id: Option<PatchId>,
    /// Indices of prior entries this entry is built from.
    pub child_conditions: BTreeSet<usize>,
    /// True when all children must match rather than any.
    pub conjunctive: bool,
}

/// Converts activation conditions into structural condition entries.
///
/// `segments` maps segment indices to their codepoint sets. Conditions with
/// an empty disjunction (a fallback over nothing) produce no entries.
pub fn activation_conditions_to_condition_entries(
    conditions: &[ActivationCondition],
    segments: &BTreeMap<SegmentIndex, IntSet<u32>>,
) -> Result<Vec<ConditionEntry>, SegmentationError> {
    let mut entries: Vec<ConditionEntry> = Vec::new();
    let mut entry_for_segment: BTreeMap<SegmentIndex, usize> = BTreeMap::new();
    let mut entry_for_disjunction: BTreeMap<BTreeSet<SegmentIndex>, usize> = BTreeMap::new();

    let segment_coverage = |index: SegmentIndex| -> Result<IntSet<u32>, SegmentationError> {
        segments
            .get(&index)
            .cloned()
            .ok_or(SegmentationError::UnknownSegment(index))
    };

    // Pass 1: unitary conditions become directly activated coverage entries
    // which double as base entries for the compound conditions below.
    for condition in conditions {
        if !condition.is_unitary() {
            continue;
        }
        let segment = *condition.conjuncts()[0].first().unwrap();
        entries.push(ConditionEntry {
            codepoints: segment_coverage(segment)?,
            activated_patch_id: Some(condition.activated()),
            ..Default::default()
        });
        entry_for_segment.entry(segment).or_insert(entries.len() - 1);
    }

    // Pass 2: every other referenced segment gets an ignored base entry.
    for condition in conditions {
        if condition.is_unitary() {
            continue;
        }
        for group in condition.conjuncts() {
            for segment in group {
                if entry_for_segment.contains_key(segment) {
                    continue;
                }
                entries.push(ConditionEntry {
                    codepoints: segment_coverage(*segment)?,
                    ..Default::default()
                });
                entry_for_segment.insert(*segment, entries.len() - 1);
            }
        }
    }

    // Pass 3: compound conditions reference the base entries, reusing
    // matching disjunction entries where they already exist.
    for condition in conditions {
        if condition.is_unitary() {
            continue;
        }

        let conjuncts: Vec<&BTreeSet<SegmentIndex>> = condition
            .conjuncts()
            .iter()
            .filter(|group| !group.is_empty())
            .collect();
        if conjuncts.is_empty() {
            // A fallback over no segments never activates; emit nothing.
            continue;
        }

        if conjuncts.len() == 1 {
            let disjunction = conjuncts[0];
            let child_conditions: BTreeSet<usize> = disjunction
                .iter()
                .map(|segment| entry_for_segment[segment])
                .collect();
            entries.push(ConditionEntry {
                activated_patch_id: Some(condition.activated()),
                child_conditions,
                conjunctive: false,
                ..Default::default()
            });
            entry_for_disjunction
                .entry(disjunction.clone())
                .or_insert(entries.len() - 1);
            continue;
        }

        let mut child_conditions: BTreeSet<usize> = BTreeSet::new();
        for group in conjuncts {
            if group.len() == 1 {
                child_conditions.insert(entry_for_segment[group.first().unwrap()]);
                continue;
            }
            if let Some(existing) = entry_for_disjunction.get(group) {
                child_conditions.insert(*existing);
                continue;
            }

            let grouped: BTreeSet<usize> = group
                .iter()
                .map(|segment| entry_for_segment[segment])
                .collect();
            entries.push(ConditionEntry {
                child_conditions: grouped,
                conjunctive: false,
                ..Default::default()
            });
            entry_for_disjunction.insert(group.clone(), entries.len() - 1);
            child_conditions.insert(entries.len() - 1);
        }

        entries.push(ConditionEntry {
            activated_patch_id: Some(condition.activated()),
            child_conditions,
            conjunctive: true,
            ..Default::default()
        });
    }

    Ok(entries)
}

impl GlyphSegmentation {
    /// The segment index to codepoint set mapping used by condition entry
    /// construction.
    pub fn segment_map(&self) -> BTreeMap<SegmentIndex, IntSet<u32>> {
        self.segments()
            .iter()
            .enumerate()
            .map(|(index, codepoints)| (index as SegmentIndex, codepoints.clone()))
            .collect()
    }

    /// Converts this plan's conditions into structural condition entries.
    pub fn to_condition_entries(&self) -> Result<Vec<ConditionEntry>, SegmentationError> {
        let conditions: Vec<ActivationCondition> = self.conditions().iter().cloned().collect();
        activation_conditions_to_condition_entries(&conditions, &self.segment_map())
    }

    /// Lowers the plan into a patch map of redundant coverage entries.
    ///
    /// Each activated condition becomes one entry whose coverage is the union
    /// of the codepoints of every segment it references. For conditions with
    /// multiple conjuncts this activates more often than the precise formula,
    /// never less, trading table size for wire simplicity.
    pub fn to_patch_map(
        &self,
        id: [u32; 4],
        uri_template: &str,
    ) -> Result<PatchMap, SegmentationError> {
        let mut map = PatchMap::new(id, uri_template);
        for condition in self.conditions() {
            let triggering = condition.triggering_segments();
            if triggering.is_empty() {
                // A fallback over no segments can never activate.
                continue;
            }

            let mut codepoints = IntSet::<u32>::empty();
            for segment in triggering {
                let set = self
                    .segments()
                    .get(segment as usize)
                    .ok_or(SegmentationError::UnknownSegment(segment))?;
                codepoints.union(set);
            }

            map.add_entry(
                Coverage::from_codepoints(codepoints),
                condition.activated(),
                PatchEncoding::GlyphKeyedBrotli,
            );
        }
        Ok(map)
    }
}
