//! The access timeline and the hazard evaluator.
//!
//! An [`AccessContext`] holds, for every resource that was accessed, a [`RangeMap`] from linear
//! ranges of the resource to the [`AccessState`] of that range: the last write and the reads
//! made since. Hazards are found by comparing a new access against this state, and barriers
//! only ever add to the set of accesses a recorded access is synchronized with.

use crate::{
    position::{LogicalPosition, ResourceUseTag},
    range_map::RangeMap,
    report::{Hazard, HazardAccess, HazardKind},
    resource::{ResourceKey, Resources},
    sync::{BarrierSet, PipelineStages, StageAccess, StageAccessFlags, SyncScope},
};
use foldhash::HashMap;
use smallvec::SmallVec;
use std::{mem, ops::Range};
use tracing::{debug, trace};

/// Who made an access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ResourceUse {
    pub(crate) tag: ResourceUseTag,
    pub(crate) position: LogicalPosition,
    pub(crate) command_name: &'static str,
}

impl ResourceUse {
    fn hazard_access(&self, access: StageAccess) -> HazardAccess {
        HazardAccess {
            access,
            position: self.position,
            command_name: self.command_name,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct WriteAccess {
    access: StageAccess,
    used: ResourceUse,
    // The stage/access pairs the write has been made visible to.
    barriers: StageAccessFlags,
    // The stages that are ordered after the write, for chaining execution dependencies.
    dependency_chain: PipelineStages,
}

impl WriteAccess {
    fn in_source_scope(&self, scope: &SyncScope) -> bool {
        scope.src_access.contains(self.access) || self.dependency_chain.intersects(scope.src_exec)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct ReadAccess {
    access: StageAccess,
    used: ResourceUse,
    // The stages that are ordered after the read.
    barriers: PipelineStages,
    pending_dependency_chain: PipelineStages,
}

impl ReadAccess {
    fn in_source_scope(&self, src_exec: PipelineStages) -> bool {
        src_exec.intersects(self.access.stage() | self.barriers)
    }
}

/// The accesses made to one range of a resource that later accesses must be synchronized with.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct AccessState {
    last_write: Option<WriteAccess>,
    // At most one read per stage.
    last_reads: SmallVec<[ReadAccess; 2]>,
    pending_write_barriers: StageAccessFlags,
    pending_write_dependency_chain: PipelineStages,
    pending_layout_transition: Option<ResourceUse>,
}

// The earlier side of a hazard found in an `AccessState`.
type Conflict = (HazardKind, StageAccess, ResourceUse);

impl AccessState {
    fn detect_hazard(&self, access: StageAccess) -> Option<Conflict> {
        if access.is_read() {
            let write = self.last_write.as_ref()?;

            if !write.barriers.contains(access) {
                return Some((HazardKind::ReadAfterWrite, write.access, write.used));
            }
        } else if !self.last_reads.is_empty() {
            // Once reads exist the write they read is ordered before them, so only the reads
            // need to be ordered before the new write.
            let stage = access.stage();

            if let Some(read) = self
                .last_reads
                .iter()
                .find(|read| !read.barriers.intersects(stage))
            {
                return Some((HazardKind::WriteAfterRead, read.access, read.used));
            }
        } else if let Some(write) = &self.last_write {
            if !write.barriers.contains(access) {
                return Some((HazardKind::WriteAfterWrite, write.access, write.used));
            }
        }

        None
    }

    fn detect_async_hazard(
        &self,
        access: StageAccess,
        filter: &dyn Fn(&ResourceUse) -> bool,
    ) -> Option<Conflict> {
        let write = self.last_write.as_ref().filter(|write| filter(&write.used));

        if access.is_read() {
            write.map(|write| (HazardKind::ReadRacingWrite, write.access, write.used))
        } else if let Some(write) = write {
            Some((HazardKind::WriteRacingWrite, write.access, write.used))
        } else {
            self.last_reads
                .iter()
                .find(|read| filter(&read.used))
                .map(|read| (HazardKind::WriteRacingRead, read.access, read.used))
        }
    }

    // Checks the write performed by a layout transition against the source scope of its barrier.
    // Records older than `since` are not considered.
    fn detect_barrier_hazard(
        &self,
        scope: &SyncScope,
        tag_limit: Option<ResourceUseTag>,
        since: ResourceUseTag,
    ) -> Option<Conflict> {
        let in_tag_range = |used: &ResourceUse| tag_limit.map_or(true, |limit| used.tag < limit);
        let mut reads = self
            .last_reads
            .iter()
            .filter(|read| read.used.tag >= since)
            .peekable();

        if reads.peek().is_some() {
            reads
                .find(|read| !(in_tag_range(&read.used) && read.in_source_scope(scope.src_exec)))
                .map(|read| (HazardKind::WriteAfterRead, read.access, read.used))
        } else {
            self.last_write
                .as_ref()
                .filter(|write| write.used.tag >= since)
                .filter(|write| !(in_tag_range(&write.used) && write.in_source_scope(scope)))
                .map(|write| (HazardKind::WriteAfterWrite, write.access, write.used))
        }
    }

    fn update(&mut self, access: StageAccess, used: ResourceUse) {
        if access.is_read() {
            let stage = access.stage();
            let read = ReadAccess {
                access,
                used,
                barriers: PipelineStages::empty(),
                pending_dependency_chain: PipelineStages::empty(),
            };

            match self
                .last_reads
                .iter_mut()
                .find(|read| read.access.stage() == stage)
            {
                Some(existing) => *existing = read,
                None => self.last_reads.push(read),
            }
        } else {
            self.last_reads.clear();
            self.last_write = Some(WriteAccess {
                access,
                used,
                barriers: StageAccessFlags::empty(),
                dependency_chain: PipelineStages::empty(),
            });
        }
    }

    fn collect_barrier(
        &mut self,
        scope: &SyncScope,
        tag_limit: Option<ResourceUseTag>,
        layout_transition: Option<ResourceUse>,
    ) {
        let in_tag_range = |used: &ResourceUse| tag_limit.map_or(true, |limit| used.tag < limit);

        if let Some(used) = layout_transition {
            // The transition becomes the last write, visible to the destination scope.
            self.pending_write_barriers |= scope.dst_access;
            self.pending_write_dependency_chain |= scope.dst_exec;
            self.pending_layout_transition = Some(used);
        } else if let (Some(write), None) = (&self.last_write, self.pending_layout_transition) {
            if in_tag_range(&write.used) && write.in_source_scope(scope) {
                self.pending_write_barriers |= scope.dst_access;
                self.pending_write_dependency_chain |= scope.dst_exec;
            }
        }

        if self.pending_layout_transition.is_none() {
            for read in &mut self.last_reads {
                if in_tag_range(&read.used) && read.in_source_scope(scope.src_exec) {
                    read.pending_dependency_chain |= scope.dst_exec;
                }
            }
        }
    }

    fn commit_barriers(&mut self) {
        let barriers = mem::take(&mut self.pending_write_barriers);
        let dependency_chain = mem::take(&mut self.pending_write_dependency_chain);

        if let Some(used) = self.pending_layout_transition.take() {
            self.last_reads.clear();
            self.last_write = Some(WriteAccess {
                access: StageAccess::ImageLayoutTransition,
                used,
                barriers,
                dependency_chain,
            });
        } else {
            if let Some(write) = &mut self.last_write {
                write.barriers |= barriers;
                write.dependency_chain |= dependency_chain;
            }

            for read in &mut self.last_reads {
                read.barriers |= mem::take(&mut read.pending_dependency_chain);
            }
        }
    }

    // Drops the records of accesses that are known to be complete and visible.
    fn forget(&mut self, completed: &dyn Fn(&ResourceUse) -> bool) {
        if self.last_write.as_ref().is_some_and(|write| completed(&write.used)) {
            self.last_write = None;
        }

        self.last_reads.retain(|read| !completed(&read.used));
    }

    // Merges the state of the same range from a timeline running alongside this one. The newer
    // write wins; for the same write the synchronization of both sides is combined.
    fn resolve(&mut self, other: &AccessState) {
        let tag = self.last_write.as_ref().map(|write| write.used.tag);
        let other_tag = other.last_write.as_ref().map(|write| write.used.tag);

        if other_tag > tag {
            self.last_write = other.last_write.clone();
            self.last_reads = other.last_reads.clone();
            return;
        }

        if other_tag < tag {
            return;
        }

        if let (Some(write), Some(other_write)) = (&mut self.last_write, &other.last_write) {
            write.barriers |= other_write.barriers;
            write.dependency_chain |= other_write.dependency_chain;
        }

        for other_read in &other.last_reads {
            let stage = other_read.access.stage();

            match self
                .last_reads
                .iter_mut()
                .find(|read| read.access.stage() == stage)
            {
                Some(read) if other_read.used.tag > read.used.tag => *read = other_read.clone(),
                Some(read) if other_read.used.tag == read.used.tag => {
                    read.barriers |= other_read.barriers;
                }
                Some(_) => {}
                None => self.last_reads.push(other_read.clone()),
            }
        }
    }
}

/// A peer timeline whose accesses are not ordered with the current ones.
pub(crate) struct RacingPeer<'a> {
    pub(crate) context: &'a AccessContext,
    // Selects the records that the peer made, as opposed to ones it inherited from a common
    // ancestor.
    pub(crate) filter: &'a dyn Fn(&ResourceUse) -> bool,
}

/// The access timeline of one queue batch, one command buffer or one subpass.
#[derive(Clone, Debug, Default)]
pub(crate) struct AccessContext {
    maps: HashMap<ResourceKey, RangeMap<u64, AccessState>>,
}

impl AccessContext {
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Forgets every recorded access.
    pub(crate) fn reset(&mut self) {
        self.maps.clear();
    }

    // Returns the map of `key`, creating it with an empty state over the whole resource.
    fn map_mut(
        &mut self,
        resources: &Resources,
        key: ResourceKey,
    ) -> &mut RangeMap<u64, AccessState> {
        self.maps.entry(key).or_insert_with(|| {
            RangeMap::with_range(resources.full_range(key), AccessState::default())
        })
    }

    /// Checks `access` to `ranges` of the resource `key` against the ordered history. Returns
    /// the first hazard found.
    pub(crate) fn detect_hazard(
        &self,
        key: ResourceKey,
        ranges: &[Range<u64>],
        access: StageAccess,
        used: &ResourceUse,
    ) -> Option<Hazard> {
        self.find_conflict(key, ranges, access, used, |state| {
            state.detect_hazard(access)
        })
    }

    /// Checks `access` against the records of an unordered peer that pass `filter`.
    pub(crate) fn detect_async_hazard(
        &self,
        key: ResourceKey,
        ranges: &[Range<u64>],
        access: StageAccess,
        used: &ResourceUse,
        filter: &dyn Fn(&ResourceUse) -> bool,
    ) -> Option<Hazard> {
        self.find_conflict(key, ranges, access, used, |state| {
            state.detect_async_hazard(access, filter)
        })
    }

    /// Checks a layout transition over `ranges` against the source scope of its barrier.
    /// Records older than `since` are not considered.
    pub(crate) fn detect_barrier_hazard(
        &self,
        key: ResourceKey,
        ranges: &[Range<u64>],
        scope: &SyncScope,
        tag_limit: Option<ResourceUseTag>,
        since: ResourceUseTag,
        used: &ResourceUse,
    ) -> Option<Hazard> {
        self.find_conflict(
            key,
            ranges,
            StageAccess::ImageLayoutTransition,
            used,
            |state| state.detect_barrier_hazard(scope, tag_limit, since),
        )
    }

    fn find_conflict(
        &self,
        key: ResourceKey,
        ranges: &[Range<u64>],
        access: StageAccess,
        used: &ResourceUse,
        detect: impl Fn(&AccessState) -> Option<Conflict>,
    ) -> Option<Hazard> {
        let map = self.maps.get(&key)?;

        for range in ranges {
            for (state_range, state) in map.range(range) {
                if let Some((kind, prior_access, prior_used)) = detect(state) {
                    let start = state_range.start.max(range.start);
                    let end = state_range.end.min(range.end);

                    return Some(Hazard {
                        kind,
                        resource: key,
                        range: start..end,
                        prior: prior_used.hazard_access(prior_access),
                        current: used.hazard_access(access),
                    });
                }
            }
        }

        None
    }

    /// Records `access` to `ranges` of the resource `key`.
    pub(crate) fn update_access(
        &mut self,
        resources: &Resources,
        key: ResourceKey,
        ranges: &[Range<u64>],
        access: StageAccess,
        used: ResourceUse,
    ) {
        let map = self.map_mut(resources, key);

        for range in ranges {
            map.split_at(&range.start);
            map.split_at(&range.end);

            for (_, state) in map.range_mut(range) {
                state.update(access, used);
            }
        }
    }

    /// Applies all barriers of one synchronization command. Barriers of the set do not chain
    /// with each other. Layout transitions become the last write, attributed to `used`.
    pub(crate) fn apply_barriers(
        &mut self,
        resources: &Resources,
        barrier_set: &BarrierSet,
        used: ResourceUse,
    ) {
        for barrier in &barrier_set.barriers {
            match &barrier.location {
                None => {
                    trace!(scope = ?barrier.scope, "applying global barrier");

                    for map in self.maps.values_mut() {
                        for state in map.values_mut() {
                            state.collect_barrier(&barrier.scope, barrier.tag_limit, None);
                        }
                    }
                }
                Some(location) => {
                    let key = location.key();

                    if resources.is_gone(key) {
                        debug!(?key, "skipping barrier on a destroyed resource");
                        continue;
                    }

                    let ranges = resources.iter_ranges(location);
                    let layout_transition = barrier.layout_transition.then_some(used);

                    // Only a transition creates state where there was none.
                    let map = if layout_transition.is_some() {
                        self.map_mut(resources, key)
                    } else if let Some(map) = self.maps.get_mut(&key) {
                        map
                    } else {
                        continue;
                    };

                    trace!(?key, ?ranges, scope = ?barrier.scope, "applying barrier");

                    for range in &ranges {
                        map.split_at(&range.start);
                        map.split_at(&range.end);

                        for (_, state) in map.range_mut(range) {
                            state.collect_barrier(
                                &barrier.scope,
                                barrier.tag_limit,
                                layout_transition,
                            );
                        }
                    }
                }
            }
        }

        for map in self.maps.values_mut() {
            for state in map.values_mut() {
                state.commit_barriers();
            }
        }
    }

    /// Imports the records of `other` into `self`, through `scopes` if any are given. Where
    /// both contexts have records for the same range they are merged.
    pub(crate) fn resolve_from(&mut self, other: &AccessContext, scopes: Option<&[SyncScope]>) {
        for (&key, other_map) in &other.maps {
            let map = self.maps.entry(key).or_insert_with(|| {
                let span = other_map.span().unwrap_or(0..0);
                RangeMap::with_range(span, AccessState::default())
            });

            for (range, other_state) in other_map.iter() {
                let mut state = other_state.clone();

                if let Some(scopes) = scopes {
                    for scope in scopes {
                        state.collect_barrier(scope, None, None);
                    }

                    state.commit_barriers();
                }

                // A record may cover more than the map so far, if `other` saw a larger
                // version of the resource.
                if let Some(span) = map.span() {
                    if range.end > span.end {
                        map.insert_vacant(span.end..range.end, AccessState::default());
                    }
                }

                map.split_at(&range.start);
                map.split_at(&range.end);

                for (_, existing) in map.range_mut(&range) {
                    existing.resolve(&state);
                }
            }
        }
    }

    /// Forgets the records of the accesses selected by `completed`. Those accesses have
    /// finished and their writes are visible to all later work, so they can no longer take part
    /// in a hazard.
    pub(crate) fn forget(&mut self, completed: impl Fn(&ResourceUse) -> bool) {
        for map in self.maps.values_mut() {
            for state in map.values_mut() {
                state.forget(&completed);
            }

            map.coalesce();
        }
    }

    /// Merges adjacent ranges with equal states.
    pub(crate) fn coalesce(&mut self) {
        for map in self.maps.values_mut() {
            map.coalesce();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        resource::{BufferCreateInfo, StorageLocation},
        sync::{AccessFlags, ScopedBarrier},
    };

    struct Fixture {
        resources: Resources,
        context: AccessContext,
        key: ResourceKey,
        next_tag: ResourceUseTag,
    }

    impl Fixture {
        fn new() -> Self {
            let mut resources = Resources::default();
            let buffer = resources
                .create_buffer(BufferCreateInfo {
                    size: 256,
                    ..Default::default()
                })
                .unwrap();

            Fixture {
                resources,
                context: AccessContext::default(),
                key: ResourceKey::Buffer(buffer),
                next_tag: 0,
            }
        }

        fn next_use(&mut self) -> ResourceUse {
            let tag = self.next_tag;
            self.next_tag += 1;

            ResourceUse {
                tag,
                position: LogicalPosition {
                    command: tag as u32,
                    ..Default::default()
                },
                command_name: "test",
            }
        }

        fn access(&mut self, range: Range<u64>, access: StageAccess) -> Option<HazardKind> {
            let used = self.next_use();
            let hazard = self
                .context
                .detect_hazard(self.key, &[range.clone()], access, &used)
                .map(|hazard| hazard.kind);
            self.context
                .update_access(&self.resources, self.key, &[range], access, used);

            hazard
        }

        fn barrier(&mut self, scope: SyncScope, range: Option<Range<u64>>) {
            let location = range.map(|range| {
                let ResourceKey::Buffer(buffer) = self.key else {
                    unreachable!()
                };
                StorageLocation::buffer(buffer, range)
            });
            let used = self.next_use();
            let barrier_set = BarrierSet {
                barriers: smallvec::smallvec![ScopedBarrier {
                    scope,
                    location,
                    layout_transition: false,
                    ownership_transfer: None,
                    tag_limit: None,
                }],
            };

            self.context
                .apply_barriers(&self.resources, &barrier_set, used);
        }
    }

    fn transfer_write_to_read() -> SyncScope {
        SyncScope::new(
            PipelineStages::ALL_TRANSFER,
            AccessFlags::TRANSFER_WRITE,
            PipelineStages::ALL_TRANSFER,
            AccessFlags::TRANSFER_READ,
        )
    }

    #[test]
    fn read_after_write() {
        let mut fixture = Fixture::new();
        assert_eq!(fixture.access(0..256, StageAccess::Transfer_TransferWrite), None);
        assert_eq!(
            fixture.access(0..256, StageAccess::Transfer_TransferRead),
            Some(HazardKind::ReadAfterWrite),
        );
    }

    #[test]
    fn barrier_makes_read_safe() {
        let mut fixture = Fixture::new();
        fixture.access(0..256, StageAccess::Transfer_TransferWrite);
        fixture.barrier(transfer_write_to_read(), None);
        assert_eq!(fixture.access(0..256, StageAccess::Transfer_TransferRead), None);

        // The barrier did not make the write visible to shaders.
        assert_eq!(
            fixture.access(0..256, StageAccess::ComputeShader_ShaderStorageRead),
            Some(HazardKind::ReadAfterWrite),
        );
    }

    #[test]
    fn write_after_read_needs_only_execution_dependency() {
        let mut fixture = Fixture::new();
        fixture.access(0..256, StageAccess::ComputeShader_ShaderStorageRead);
        assert_eq!(
            fixture.access(0..256, StageAccess::Transfer_TransferWrite),
            Some(HazardKind::WriteAfterRead),
        );

        let mut fixture = Fixture::new();
        fixture.access(0..256, StageAccess::ComputeShader_ShaderStorageRead);
        fixture.barrier(
            SyncScope::execution(PipelineStages::COMPUTE_SHADER, PipelineStages::ALL_TRANSFER),
            None,
        );
        assert_eq!(fixture.access(0..256, StageAccess::Transfer_TransferWrite), None);
    }

    #[test]
    fn write_after_write() {
        let mut fixture = Fixture::new();
        fixture.access(0..256, StageAccess::Transfer_TransferWrite);
        assert_eq!(
            fixture.access(0..256, StageAccess::Transfer_TransferWrite),
            Some(HazardKind::WriteAfterWrite),
        );

        // An execution-only barrier does not make the first write visible.
        fixture.barrier(
            SyncScope::execution(PipelineStages::ALL_TRANSFER, PipelineStages::ALL_TRANSFER),
            None,
        );
        assert_eq!(
            fixture.access(0..256, StageAccess::Transfer_TransferWrite),
            Some(HazardKind::WriteAfterWrite),
        );
    }

    #[test]
    fn barriers_chain_through_stages() {
        let mut fixture = Fixture::new();
        fixture.access(0..256, StageAccess::Transfer_TransferWrite);
        fixture.barrier(
            SyncScope::new(
                PipelineStages::ALL_TRANSFER,
                AccessFlags::TRANSFER_WRITE,
                PipelineStages::COMPUTE_SHADER,
                AccessFlags::empty(),
            ),
            None,
        );
        // The second barrier has no source access, but chains with the first one.
        fixture.barrier(
            SyncScope::new(
                PipelineStages::COMPUTE_SHADER,
                AccessFlags::empty(),
                PipelineStages::FRAGMENT_SHADER,
                AccessFlags::SHADER_READ,
            ),
            None,
        );
        assert_eq!(
            fixture.access(0..256, StageAccess::FragmentShader_ShaderSampledRead),
            None,
        );

        // Without the chain the second barrier does not apply.
        let mut fixture = Fixture::new();
        fixture.access(0..256, StageAccess::Transfer_TransferWrite);
        fixture.barrier(
            SyncScope::new(
                PipelineStages::COMPUTE_SHADER,
                AccessFlags::empty(),
                PipelineStages::FRAGMENT_SHADER,
                AccessFlags::SHADER_READ,
            ),
            None,
        );
        assert_eq!(
            fixture.access(0..256, StageAccess::FragmentShader_ShaderSampledRead),
            Some(HazardKind::ReadAfterWrite),
        );
    }

    #[test]
    fn barriers_of_one_set_do_not_chain() {
        let mut fixture = Fixture::new();
        fixture.access(0..256, StageAccess::Transfer_TransferWrite);

        let used = fixture.next_use();
        let barrier_set = BarrierSet {
            barriers: [
                SyncScope::new(
                    PipelineStages::ALL_TRANSFER,
                    AccessFlags::TRANSFER_WRITE,
                    PipelineStages::COMPUTE_SHADER,
                    AccessFlags::empty(),
                ),
                SyncScope::new(
                    PipelineStages::COMPUTE_SHADER,
                    AccessFlags::empty(),
                    PipelineStages::FRAGMENT_SHADER,
                    AccessFlags::SHADER_READ,
                ),
            ]
            .into_iter()
            .map(|scope| ScopedBarrier {
                scope,
                location: None,
                layout_transition: false,
                ownership_transfer: None,
                tag_limit: None,
            })
            .collect(),
        };
        fixture
            .context
            .apply_barriers(&fixture.resources, &barrier_set, used);

        assert_eq!(
            fixture.access(0..256, StageAccess::FragmentShader_ShaderSampledRead),
            Some(HazardKind::ReadAfterWrite),
        );
    }

    #[test]
    fn ranged_barrier_covers_only_its_range() {
        let mut fixture = Fixture::new();
        fixture.access(0..256, StageAccess::Transfer_TransferWrite);
        fixture.barrier(transfer_write_to_read(), Some(0..128));

        assert_eq!(fixture.access(0..128, StageAccess::Transfer_TransferRead), None);
        assert_eq!(
            fixture.access(64..192, StageAccess::Transfer_TransferRead),
            Some(HazardKind::ReadAfterWrite),
        );
    }

    #[test]
    fn hazard_range_is_the_overlap() {
        let mut fixture = Fixture::new();
        fixture.access(64..128, StageAccess::Transfer_TransferWrite);

        let used = fixture.next_use();
        let hazard = fixture
            .context
            .detect_hazard(
                fixture.key,
                &[0..100],
                StageAccess::Transfer_TransferRead,
                &used,
            )
            .unwrap();
        assert_eq!(hazard.range, 64..100);
        assert_eq!(hazard.prior.access, StageAccess::Transfer_TransferWrite);
        assert_eq!(hazard.current.access, StageAccess::Transfer_TransferRead);
    }

    #[test]
    fn async_hazards_respect_the_filter() {
        let mut fixture = Fixture::new();
        fixture.access(0..256, StageAccess::Transfer_TransferRead);
        let used = fixture.next_use();

        let everything = |_: &ResourceUse| true;
        let nothing = |_: &ResourceUse| false;

        let hazard = fixture.context.detect_async_hazard(
            fixture.key,
            &[0..256],
            StageAccess::Transfer_TransferWrite,
            &used,
            &everything,
        );
        assert_eq!(hazard.map(|h| h.kind), Some(HazardKind::WriteRacingRead));

        // Reads never race with reads.
        assert!(fixture
            .context
            .detect_async_hazard(
                fixture.key,
                &[0..256],
                StageAccess::Transfer_TransferRead,
                &used,
                &everything,
            )
            .is_none());

        assert!(fixture
            .context
            .detect_async_hazard(
                fixture.key,
                &[0..256],
                StageAccess::Transfer_TransferWrite,
                &used,
                &nothing,
            )
            .is_none());
    }

    #[test]
    fn resolve_keeps_the_newer_write() {
        let mut fixture = Fixture::new();
        let base = fixture.context.clone();

        fixture.access(0..128, StageAccess::Transfer_TransferWrite);
        let left = mem::replace(&mut fixture.context, base);
        fixture.access(64..256, StageAccess::ComputeShader_ShaderStorageWrite);
        let right = fixture.context.clone();

        let mut merged = left.clone();
        merged.resolve_from(&right, None);

        let map = &merged.maps[&fixture.key];
        let write_at = |index: u64| {
            map.get(&index)
                .and_then(|state| state.last_write.as_ref())
                .map(|write| write.access)
        };
        assert_eq!(write_at(0), Some(StageAccess::Transfer_TransferWrite));
        assert_eq!(write_at(100), Some(StageAccess::ComputeShader_ShaderStorageWrite));
        assert_eq!(write_at(200), Some(StageAccess::ComputeShader_ShaderStorageWrite));
    }

    #[test]
    fn forgotten_accesses_cause_no_hazards() {
        let mut fixture = Fixture::new();
        fixture.access(0..256, StageAccess::Transfer_TransferWrite);
        fixture.access(0..128, StageAccess::Transfer_TransferRead);
        fixture.context.forget(|used| used.tag == 0);

        // The read is still recorded and orders nothing before a write.
        assert_eq!(
            fixture.access(0..256, StageAccess::ComputeShader_ShaderStorageWrite),
            Some(HazardKind::WriteAfterRead),
        );

        fixture.context.forget(|_| true);
        assert_eq!(
            fixture.access(0..256, StageAccess::Transfer_TransferRead),
            None,
        );
    }

    #[test]
    fn destroyed_resources_are_skipped_by_barriers() {
        let mut fixture = Fixture::new();
        fixture.access(0..256, StageAccess::Transfer_TransferWrite);

        let ResourceKey::Buffer(buffer) = fixture.key else {
            unreachable!()
        };
        fixture.resources.destroy_buffer(buffer).unwrap();
        fixture.barrier(transfer_write_to_read(), Some(0..256));

        assert_eq!(
            fixture.access(0..256, StageAccess::Transfer_TransferRead),
            Some(HazardKind::ReadAfterWrite),
        );
    }
}
