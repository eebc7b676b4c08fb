//! Turns synchronization commands into the scopes that are applied to the access timeline.

use super::{
    AccessFlags, DependencyInfo, ImageLayout, PipelineStages, QueueFamilyOwnershipTransfer,
    StageAccess, StageAccessFlags,
};
use crate::{
    position::ResourceUseTag,
    render_pass::SubpassDependency,
    resource::StorageLocation,
};
use smallvec::SmallVec;

/// The source and destination scopes of one synchronization edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncScope {
    /// The expanded source stages, including all logically earlier stages.
    pub src_exec: PipelineStages,

    /// The stage/access pairs made available by the edge.
    pub src_access: StageAccessFlags,

    /// The expanded destination stages, including all logically later stages.
    pub dst_exec: PipelineStages,

    /// The stage/access pairs the made available accesses are made visible to.
    pub dst_access: StageAccessFlags,
}

impl SyncScope {
    pub fn new(
        src_stages: PipelineStages,
        src_access: AccessFlags,
        dst_stages: PipelineStages,
        dst_access: AccessFlags,
    ) -> Self {
        SyncScope {
            src_exec: src_stages.with_earlier(),
            src_access: StageAccessFlags::from_masks(src_stages, src_access),
            dst_exec: dst_stages.with_later(),
            dst_access: StageAccessFlags::from_masks(dst_stages, dst_access),
        }
    }

    /// Returns a scope that only orders execution.
    #[inline]
    pub fn execution(src_stages: PipelineStages, dst_stages: PipelineStages) -> Self {
        SyncScope::new(
            src_stages,
            AccessFlags::empty(),
            dst_stages,
            AccessFlags::empty(),
        )
    }

    /// Returns whether a write made with `prior` is made visible to `next` by this scope alone.
    #[inline]
    pub fn covers(&self, prior: StageAccess, next: StageAccess) -> bool {
        self.src_access.contains(prior) && self.dst_access.contains(next)
    }

    /// Returns whether an edge with the scope `next`, recorded after this one, chains with it.
    #[inline]
    pub fn chains_into(&self, next: &SyncScope) -> bool {
        self.dst_exec.intersects(next.src_exec)
    }

    /// Returns the union of two scopes.
    pub fn union(&self, other: &SyncScope) -> SyncScope {
        SyncScope {
            src_exec: self.src_exec | other.src_exec,
            src_access: self.src_access | other.src_access,
            dst_exec: self.dst_exec | other.dst_exec,
            dst_access: self.dst_access | other.dst_access,
        }
    }

    fn without_src(mut self) -> Self {
        self.src_exec = PipelineStages::empty();
        self.src_access = StageAccessFlags::empty();
        self
    }

    fn without_dst(mut self) -> Self {
        self.dst_exec = PipelineStages::empty();
        self.dst_access = StageAccessFlags::empty();
        self
    }
}

/// Which side of a queue family ownership transfer a barrier performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OwnershipTransfer {
    /// The barrier releases ownership: its destination scope is ignored.
    Release,

    /// The barrier acquires ownership: its source scope is ignored, and the transfer itself is
    /// a write to the resource.
    Acquire,
}

impl OwnershipTransfer {
    fn new(
        transfer: Option<QueueFamilyOwnershipTransfer>,
        queue_family_index: u32,
    ) -> Option<Self> {
        let transfer = transfer.filter(|t| t.src_index != t.dst_index)?;

        if transfer.src_index == queue_family_index {
            Some(OwnershipTransfer::Release)
        } else if transfer.dst_index == queue_family_index {
            Some(OwnershipTransfer::Acquire)
        } else {
            None
        }
    }
}

/// A scope restricted to a location and possibly performing a layout transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ScopedBarrier {
    pub(crate) scope: SyncScope,
    // `None` for global memory barriers.
    pub(crate) location: Option<StorageLocation>,
    pub(crate) layout_transition: bool,
    pub(crate) ownership_transfer: Option<OwnershipTransfer>,
    // Only accesses recorded before this tag are in the source scope.
    pub(crate) tag_limit: Option<ResourceUseTag>,
}

impl ScopedBarrier {
    fn global(scope: SyncScope) -> Self {
        ScopedBarrier {
            scope,
            location: None,
            layout_transition: false,
            ownership_transfer: None,
            tag_limit: None,
        }
    }

    /// Returns whether the write performed by the barrier must be checked against its source
    /// scope. The acquiring side of an ownership transfer has no source scope to check.
    #[inline]
    pub(crate) fn checks_source_scope(&self) -> bool {
        self.layout_transition && self.ownership_transfer != Some(OwnershipTransfer::Acquire)
    }
}

/// All barriers of one synchronization command. They are applied together: none of them chains
/// with another one of the same set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct BarrierSet {
    pub(crate) barriers: SmallVec<[ScopedBarrier; 4]>,
}

impl BarrierSet {
    /// Returns the union of the source and destination execution scopes.
    pub(crate) fn exec_scopes(&self) -> (PipelineStages, PipelineStages) {
        self.barriers.iter().fold(
            (PipelineStages::empty(), PipelineStages::empty()),
            |(src, dst), barrier| (src | barrier.scope.src_exec, dst | barrier.scope.dst_exec),
        )
    }

    /// Returns the scopes of the barriers, which must all be global.
    pub(crate) fn global_scopes(&self) -> SmallVec<[SyncScope; 4]> {
        debug_assert!(self.barriers.iter().all(|b| b.location.is_none()));

        self.barriers.iter().map(|barrier| barrier.scope).collect()
    }
}

/// A synchronization primitive whose scopes are applied to the access timeline.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Synchronization<'a> {
    /// A pipeline barrier recorded in a command buffer for a queue of the given family.
    PipelineBarrier {
        dependency_info: &'a DependencyInfo,
        queue_family_index: u32,
    },

    /// The wait side of an event, whose first scope is limited to what the set command could
    /// see.
    EventWait {
        dependency_info: &'a DependencyInfo,
        set_stages: PipelineStages,
        set_tag: ResourceUseTag,
        queue_family_index: u32,
    },

    /// The dependencies of a subpass boundary.
    SubpassDependencies(&'a [SubpassDependency]),

    /// A semaphore signaled after `signal_stages` and waited for before `wait_stages`.
    Semaphore {
        signal_stages: PipelineStages,
        wait_stages: PipelineStages,
    },

    /// A bare execution dependency.
    Execution {
        src_stages: PipelineStages,
        dst_stages: PipelineStages,
    },
}

impl Synchronization<'_> {
    pub(crate) fn resolve(self) -> BarrierSet {
        match self {
            Synchronization::PipelineBarrier {
                dependency_info,
                queue_family_index,
            } => resolve_dependency_info(dependency_info, queue_family_index, None, None),
            Synchronization::EventWait {
                dependency_info,
                set_stages,
                set_tag,
                queue_family_index,
            } => resolve_dependency_info(
                dependency_info,
                queue_family_index,
                Some(set_stages),
                Some(set_tag),
            ),
            Synchronization::SubpassDependencies(dependencies) => BarrierSet {
                barriers: dependencies
                    .iter()
                    .map(|dependency| ScopedBarrier::global(dependency.scope()))
                    .collect(),
            },
            Synchronization::Semaphore {
                signal_stages,
                wait_stages,
            } => {
                let all_access = AccessFlags::MEMORY_READ | AccessFlags::MEMORY_WRITE;

                BarrierSet {
                    barriers: smallvec::smallvec![ScopedBarrier::global(SyncScope::new(
                        signal_stages,
                        all_access,
                        wait_stages,
                        all_access,
                    ))],
                }
            }
            Synchronization::Execution {
                src_stages,
                dst_stages,
            } => BarrierSet {
                barriers: smallvec::smallvec![ScopedBarrier::global(SyncScope::execution(
                    src_stages, dst_stages,
                ))],
            },
        }
    }
}

fn resolve_dependency_info(
    dependency_info: &DependencyInfo,
    queue_family_index: u32,
    set_stages: Option<PipelineStages>,
    tag_limit: Option<ResourceUseTag>,
) -> BarrierSet {
    // The first scope of an event wait only includes the stages the event was set with.
    let src_stages = |stages: PipelineStages| match set_stages {
        Some(set_stages) => stages.expand() & set_stages.expand(),
        None => stages,
    };
    let mut barriers = SmallVec::new();

    for barrier in &dependency_info.memory_barriers {
        barriers.push(ScopedBarrier {
            tag_limit,
            ..ScopedBarrier::global(SyncScope::new(
                src_stages(barrier.src_stages),
                barrier.src_access,
                barrier.dst_stages,
                barrier.dst_access,
            ))
        });
    }

    for barrier in &dependency_info.buffer_memory_barriers {
        let ownership_transfer =
            OwnershipTransfer::new(barrier.queue_family_ownership_transfer, queue_family_index);
        let scope = SyncScope::new(
            src_stages(barrier.src_stages),
            barrier.src_access,
            barrier.dst_stages,
            barrier.dst_access,
        );

        barriers.push(ScopedBarrier {
            scope: restrict_for_ownership_transfer(scope, ownership_transfer),
            location: Some(StorageLocation::buffer(
                barrier.buffer,
                barrier.range.clone(),
            )),
            // Acquiring ownership writes the buffer.
            layout_transition: ownership_transfer == Some(OwnershipTransfer::Acquire),
            ownership_transfer,
            tag_limit,
        });
    }

    for barrier in &dependency_info.image_memory_barriers {
        let ownership_transfer =
            OwnershipTransfer::new(barrier.queue_family_ownership_transfer, queue_family_index);
        let scope = SyncScope::new(
            src_stages(barrier.src_stages),
            barrier.src_access,
            barrier.dst_stages,
            barrier.dst_access,
        );
        let layout_transition = barrier.old_layout != barrier.new_layout
            && barrier.new_layout != ImageLayout::Undefined
            || ownership_transfer == Some(OwnershipTransfer::Acquire);

        barriers.push(ScopedBarrier {
            scope: restrict_for_ownership_transfer(scope, ownership_transfer),
            location: Some(StorageLocation::image(
                barrier.image,
                barrier.subresource_range.clone(),
            )),
            layout_transition,
            ownership_transfer,
            tag_limit,
        });
    }

    BarrierSet { barriers }
}

fn restrict_for_ownership_transfer(
    scope: SyncScope,
    ownership_transfer: Option<OwnershipTransfer>,
) -> SyncScope {
    match ownership_transfer {
        Some(OwnershipTransfer::Release) => scope.without_dst(),
        Some(OwnershipTransfer::Acquire) => scope.without_src(),
        None => scope,
    }
}
