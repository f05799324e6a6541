use std::collections::HashMap;

use tracing::debug;

use crate::capability::{Capability, Direction};
use crate::error::{Error, Result};
use opal_format::MediaType;

/// `descriptorIdx`/`simultaneousIdx` sentinel meaning "next available",
/// mirroring H.323's `P_MAX_INDEX` convention (spec §4.2).
pub const NEXT_AVAILABLE: usize = usize::MAX;

/// Level 2: a "cannot operate together" list — exactly one of these ids
/// may be active at a time.
type CannotOperateTogether = Vec<u32>;
/// Level 1: a simultaneous group within a descriptor — its member lists
/// may all be active together.
type SimultaneousGroup = Vec<CannotOperateTogether>;
/// Level 0: an ordered list of descriptors, tried top-down as alternatives.
type Descriptor = SimultaneousGroup;

/// A query for [`CapabilitySet::find`].
#[derive(Debug, Clone)]
pub enum FindQuery<'a> {
    Id(u32),
    Name {
        name: &'a str,
        direction: Option<Direction>,
    },
    MainAndSubType { main_type: MediaType, sub_type: u32 },
}

/// The endpoint's capability catalog: a flat lookup table plus the
/// three-level nested descriptor/simultaneous/alternative structure of
/// spec §3 ("CapabilitySet"). Every id inside the nested lists also
/// appears in `table`; removal deletes from both (spec invariant).
#[derive(Debug, Default)]
pub struct CapabilitySet {
    table: HashMap<u32, Capability>,
    /// Presentation order of the flat table. `Reorder` permutes this
    /// without touching `table`'s keys, satisfying "ids are not
    /// reassigned" (spec §4.2, invariant 5).
    order: Vec<u32>,
    next_id: u32,
    descriptors: Vec<Descriptor>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        CapabilitySet::default()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// `Add(capability)`: appends to the flat table, assigning an id never
    /// reused within this set.
    pub fn add(&mut self, mut capability: Capability) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        capability.id = id;
        debug!(id, format = %capability.format.name, "adding capability");
        self.order.push(id);
        self.table.insert(id, capability);
        id
    }

    /// `Set(descriptorIdx, simultaneousIdx, capability)`: inserts into the
    /// nested structure, adding to the flat table first. `NEXT_AVAILABLE`
    /// in either slot means "next available"; returns the
    /// `(descriptor_idx, simultaneous_idx)` actually used.
    pub fn set(
        &mut self,
        descriptor_idx: usize,
        simultaneous_idx: usize,
        capability: Capability,
    ) -> (usize, u32) {
        let id = self.add(capability);

        let descriptor_idx = if descriptor_idx == NEXT_AVAILABLE {
            self.descriptors.push(Descriptor::new());
            self.descriptors.len() - 1
        } else {
            while self.descriptors.len() <= descriptor_idx {
                self.descriptors.push(Descriptor::new());
            }
            descriptor_idx
        };

        let descriptor = &mut self.descriptors[descriptor_idx];
        let simultaneous_idx = if simultaneous_idx == NEXT_AVAILABLE {
            descriptor.push(CannotOperateTogether::new());
            descriptor.len() - 1
        } else {
            while descriptor.len() <= simultaneous_idx {
                descriptor.push(CannotOperateTogether::new());
            }
            simultaneous_idx
        };

        descriptor[simultaneous_idx].push(id);
        (descriptor_idx, id)
    }

    /// `AddAllByName(name)`: fuzzy, case-insensitive substring match
    /// against every capability in `source`, repeating until exhausted
    /// (spec §4.2). Returns the ids added.
    pub fn add_all_by_name<'a>(
        &mut self,
        name: &str,
        source: impl IntoIterator<Item = &'a Capability>,
    ) -> Vec<u32> {
        let mut added = Vec::new();
        for candidate in source {
            if candidate.name_matches(name) {
                let mut clone = candidate.clone();
                clone.id = 0; // reassigned by add()
                added.push(self.add(clone));
            }
        }
        added
    }

    fn remove_id(&mut self, id: u32) -> bool {
        if self.table.remove(&id).is_none() {
            return false;
        }
        self.order.retain(|&x| x != id);
        for descriptor in &mut self.descriptors {
            for group in descriptor.iter_mut() {
                group.retain(|&x| x != id);
            }
        }
        self.descriptors.retain(|d| !d.is_empty());
        true
    }

    pub fn remove_by_id(&mut self, id: u32) -> bool {
        self.remove_id(id)
    }

    /// Remove all capabilities whose format name fuzzy-matches `name`.
    pub fn remove_by_name(&mut self, name: &str) -> usize {
        let ids: Vec<u32> = self
            .table
            .values()
            .filter(|c| c.name_matches(name))
            .map(|c| c.id)
            .collect();
        let count = ids.len();
        for id in ids {
            self.remove_id(id);
        }
        count
    }

    pub fn remove_all(&mut self) {
        self.table.clear();
        self.order.clear();
        self.descriptors.clear();
    }

    /// `Find`: direction filter applied first (when present), then lowest
    /// id wins among equal candidates (spec §4.2 tie-break rule).
    pub fn find(&self, query: FindQuery<'_>) -> Option<&Capability> {
        match query {
            FindQuery::Id(id) => self.table.get(&id),
            FindQuery::Name { name, direction } => self
                .order
                .iter()
                .filter_map(|id| self.table.get(id))
                .filter(|c| c.name_matches(name))
                .filter(|c| direction.map_or(true, |d| c.direction == d))
                .min_by_key(|c| c.id),
            FindQuery::MainAndSubType {
                main_type,
                sub_type,
            } => self
                .order
                .iter()
                .filter_map(|id| self.table.get(id))
                .filter(|c| c.format.media_type == main_type && c.sub_type == sub_type)
                .min_by_key(|c| c.id),
        }
    }

    pub fn find_non_standard(
        &self,
        needle: &crate::capability::NonStandardData,
        offset: usize,
        length: usize,
    ) -> Option<&Capability> {
        self.order
            .iter()
            .filter_map(|id| self.table.get(id))
            .filter(|c| {
                c.non_standard
                    .as_ref()
                    .is_some_and(|ns| ns.matches_slice(needle, offset, length))
            })
            .min_by_key(|c| c.id)
    }

    /// `Reorder(preferenceList)`: stable partition — matches (by fuzzy
    /// name, in preference-list order) first, then non-matches preserving
    /// their relative order at the tail. Ids are unchanged.
    pub fn reorder(&mut self, preference: &[String]) {
        let mut remaining: Vec<u32> = self.order.clone();
        let mut new_order = Vec::with_capacity(remaining.len());

        for pref in preference {
            let mut i = 0;
            while i < remaining.len() {
                let id = remaining[i];
                let matches = self
                    .table
                    .get(&id)
                    .is_some_and(|c| c.name_matches(pref));
                if matches {
                    new_order.push(id);
                    remaining.remove(i);
                } else {
                    i += 1;
                }
            }
        }
        new_order.extend(remaining);
        self.order = new_order;
    }

    pub fn ordered(&self) -> impl Iterator<Item = &Capability> {
        self.order.iter().filter_map(move |id| self.table.get(id))
    }

    /// `IsAllowed(capA)`: true iff the id is reachable from the nested
    /// descriptor structure at all.
    pub fn is_allowed_single(&self, id: u32) -> bool {
        self.descriptors
            .iter()
            .any(|d| d.iter().any(|g| g.contains(&id)))
    }

    /// `IsAllowed(capA, capB)`: true iff some simultaneous group (level 1)
    /// contains both ids in *different* cannot-operate-together lists
    /// (level 2) — codecs in the same level-2 list are mutually exclusive.
    pub fn is_allowed_pair(&self, a: u32, b: u32) -> bool {
        if a == b {
            return self.is_allowed_single(a);
        }
        for descriptor in &self.descriptors {
            for group in descriptor {
                let has_a = group.contains(&a);
                let has_b = group.contains(&b);
                if has_a && has_b {
                    // same cannot-operate-together list: mutually exclusive
                    return false;
                }
            }
            let a_group = descriptor.iter().find(|g| g.contains(&a));
            let b_group = descriptor.iter().find(|g| g.contains(&b));
            if a_group.is_some() && b_group.is_some() {
                return true;
            }
        }
        false
    }

    /// `Merge(other)`: accepts into this set those entries of `other`
    /// that pass `IsAllowed` against `other`'s own combinations (spec
    /// §4.2), preserving the descriptor/simultaneous/cannot-operate-
    /// together shape those entries came from. A capability in
    /// `other`'s flat table with no nested-list membership is not
    /// reachable via `IsAllowed` and is dropped rather than merged in as
    /// an orphan. Ids are remapped through `self.add`, so a capability
    /// already present in `self` under a different id is merged again
    /// under a new one — this set and `other` do not share an id space.
    pub fn merge(&mut self, other: &CapabilitySet) -> Vec<u32> {
        let mut added = Vec::new();
        for other_descriptor in &other.descriptors {
            let mut new_descriptor = Descriptor::new();
            for group in other_descriptor {
                let mut new_group = CannotOperateTogether::new();
                for &other_id in group {
                    let Some(cap) = other.table.get(&other_id) else {
                        continue;
                    };
                    if !other.is_allowed_single(other_id) {
                        continue;
                    }
                    let mut clone = cap.clone();
                    clone.id = 0;
                    let new_id = self.add(clone);
                    new_group.push(new_id);
                    added.push(new_id);
                }
                if !new_group.is_empty() {
                    new_descriptor.push(new_group);
                }
            }
            if !new_descriptor.is_empty() {
                self.descriptors.push(new_descriptor);
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_format::{MediaFormat, MediaType, PayloadType};
    use std::sync::Arc;

    fn cap(name: &str, media_type: MediaType, sub_type: u32) -> Capability {
        Capability::new(
            0,
            Arc::new(MediaFormat::new(name, media_type, 8000, PayloadType::Static(0))),
            Direction::RxTx,
            sub_type,
        )
    }

    #[test]
    fn add_assigns_unique_ids() {
        let mut set = CapabilitySet::new();
        let id1 = set.add(cap("PCMU", MediaType::Audio, 0));
        let id2 = set.add(cap("PCMA", MediaType::Audio, 1));
        assert_ne!(id1, id2);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn find_by_id_then_remove() {
        let mut set = CapabilitySet::new();
        let id = set.add(cap("PCMU", MediaType::Audio, 0));
        assert!(set.find(FindQuery::Id(id)).is_some());
        assert!(set.remove_by_id(id));
        assert!(set.find(FindQuery::Id(id)).is_none());
    }

    #[test]
    fn fuzzy_name_match() {
        let mut set = CapabilitySet::new();
        set.add(cap("GSM 0610", MediaType::Audio, 0));
        assert!(set
            .find(FindQuery::Name {
                name: "GSM",
                direction: None
            })
            .is_some());
    }

    #[test]
    fn reorder_preserves_ids_and_partitions_stably() {
        let mut set = CapabilitySet::new();
        let pcmu = set.add(cap("PCMU", MediaType::Audio, 0));
        let pcma = set.add(cap("PCMA", MediaType::Audio, 1));
        let gsm = set.add(cap("GSM 0610", MediaType::Audio, 2));

        set.reorder(&["PCMA".to_string(), "PCMU".to_string()]);
        let order: Vec<u32> = set.ordered().map(|c| c.id).collect();
        assert_eq!(order, vec![pcma, pcmu, gsm]);
    }

    #[test]
    fn set_nested_structure_and_is_allowed() {
        let mut set = CapabilitySet::new();
        let pcmu = Capability::new(
            0,
            Arc::new(MediaFormat::new("PCMU", MediaType::Audio, 8000, PayloadType::Static(0))),
            Direction::RxTx,
            0,
        );
        let pcma = Capability::new(
            0,
            Arc::new(MediaFormat::new("PCMA", MediaType::Audio, 8000, PayloadType::Static(8))),
            Direction::RxTx,
            1,
        );
        let (d0, id_pcmu) = set.set(NEXT_AVAILABLE, NEXT_AVAILABLE, pcmu);
        // same descriptor, same simultaneous group, different cannot-operate list
        let (_, id_pcma) = set.set(d0, NEXT_AVAILABLE, pcma);

        assert!(set.is_allowed_pair(id_pcmu, id_pcma));
    }

    #[test]
    fn mutually_exclusive_in_same_list() {
        let mut set = CapabilitySet::new();
        let pcmu_id = set.add(cap("PCMU", MediaType::Audio, 0));
        let pcma_id = set.add(cap("PCMA", MediaType::Audio, 1));
        // force both ids into the same cannot-operate-together list
        set.descriptors.push(vec![vec![pcmu_id, pcma_id]]);
        assert!(!set.is_allowed_pair(pcmu_id, pcma_id));
    }

    #[test]
    fn merge_copies_reachable_entries_and_preserves_pair_compatibility() {
        let mut remote = CapabilitySet::new();
        let pcmu = cap("PCMU", MediaType::Audio, 0);
        let pcma = cap("PCMA", MediaType::Audio, 1);
        let (d0, remote_pcmu) = remote.set(NEXT_AVAILABLE, NEXT_AVAILABLE, pcmu);
        let (_, remote_pcma) = remote.set(d0, NEXT_AVAILABLE, pcma);
        assert!(remote.is_allowed_pair(remote_pcmu, remote_pcma));

        let mut local = CapabilitySet::new();
        let added = local.merge(&remote);
        assert_eq!(added.len(), 2);
        assert!(local.is_allowed_pair(added[0], added[1]));
    }

    #[test]
    fn merge_drops_entries_with_no_nested_structure_membership() {
        let mut remote = CapabilitySet::new();
        remote.add(cap("PCMU", MediaType::Audio, 0)); // orphan: never placed in `set`
        let mut local = CapabilitySet::new();
        let added = local.merge(&remote);
        assert!(added.is_empty());
        assert!(local.is_empty());
    }
}
