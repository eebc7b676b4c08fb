//! Pipeline stages, memory access types and the barrier declarations that carry them.
//!
//! Every access the validator tracks is a [`StageAccess`]: one valid combination of a single
//! pipeline stage and a single access type. Sets of such pairs ([`StageAccessFlags`]) form the
//! access scopes of barriers, while plain [`PipelineStages`] form their execution scopes.

pub use self::scope::{OwnershipTransfer, SyncScope};
pub(crate) use self::scope::{BarrierSet, ScopedBarrier, Synchronization};
use crate::{
    macros::{vulkan_bitflags, vulkan_enum},
    resource::{Buffer, Image, ImageSubresourceRange},
    DeviceSize, Id, NonExhaustive,
};
use smallvec::SmallVec;
use std::{fmt, ops::Range};

pub(crate) mod scope;

vulkan_bitflags! {
    /// A set of stages in a device queue.
    PipelineStages impl {
        /// Replaces the meta-stages in `self` by the stages they stand for.
        ///
        /// The fine-grained transfer stages are folded into `ALL_TRANSFER`, which is the stage
        /// transfer commands record their accesses in.
        pub fn expand(self) -> Self {
            let mut result = self;

            if self.intersects(PipelineStages::ALL_COMMANDS) {
                result |= ALL_DEVICE_STAGES;
            }

            if self.intersects(PipelineStages::ALL_GRAPHICS) {
                result |= ALL_GRAPHICS_STAGES;
            }

            if self.intersects(PipelineStages::VERTEX_INPUT) {
                result |= PipelineStages::INDEX_INPUT | PipelineStages::VERTEX_ATTRIBUTE_INPUT;
            }

            if self.intersects(PipelineStages::PRE_RASTERIZATION_SHADERS) {
                result |= PipelineStages::VERTEX_SHADER
                    | PipelineStages::TESSELLATION_CONTROL_SHADER
                    | PipelineStages::TESSELLATION_EVALUATION_SHADER
                    | PipelineStages::GEOMETRY_SHADER;
            }

            if self.intersects(TRANSFER_SUBSTAGES) {
                result |= PipelineStages::ALL_TRANSFER;
            }

            result - META_STAGES
        }

        /// Returns the source execution scope of `self`: the expanded stages together with all
        /// stages that are logically earlier.
        pub fn with_earlier(self) -> Self {
            let stages = self.expand();
            let mut result = stages;

            if stages.intersects(PipelineStages::BOTTOM_OF_PIPE) {
                result |= ALL_DEVICE_STAGES;
            }

            for order in STAGE_ORDERS {
                for (index, &stage) in order.iter().enumerate() {
                    if stages.intersects(stage) {
                        for &earlier in &order[..index] {
                            result |= earlier;
                        }
                    }
                }
            }

            if result.intersects(ALL_DEVICE_STAGES) {
                result |= PipelineStages::TOP_OF_PIPE;
            }

            result
        }

        /// Returns the destination execution scope of `self`: the expanded stages together with
        /// all stages that are logically later.
        pub fn with_later(self) -> Self {
            let stages = self.expand();
            let mut result = stages;

            if stages.intersects(PipelineStages::TOP_OF_PIPE) {
                result |= ALL_DEVICE_STAGES;
            }

            for order in STAGE_ORDERS {
                for (index, &stage) in order.iter().enumerate() {
                    if stages.intersects(stage) {
                        for &later in &order[index + 1..] {
                            result |= later;
                        }
                    }
                }
            }

            if result.intersects(ALL_DEVICE_STAGES) {
                result |= PipelineStages::BOTTOM_OF_PIPE;
            }

            result
        }
    }
    = PipelineStageFlags2(u64);

    TOP_OF_PIPE = TOP_OF_PIPE,
    DRAW_INDIRECT = DRAW_INDIRECT,
    VERTEX_INPUT = VERTEX_INPUT,
    VERTEX_SHADER = VERTEX_SHADER,
    TESSELLATION_CONTROL_SHADER = TESSELLATION_CONTROL_SHADER,
    TESSELLATION_EVALUATION_SHADER = TESSELLATION_EVALUATION_SHADER,
    GEOMETRY_SHADER = GEOMETRY_SHADER,
    FRAGMENT_SHADER = FRAGMENT_SHADER,
    EARLY_FRAGMENT_TESTS = EARLY_FRAGMENT_TESTS,
    LATE_FRAGMENT_TESTS = LATE_FRAGMENT_TESTS,
    COLOR_ATTACHMENT_OUTPUT = COLOR_ATTACHMENT_OUTPUT,
    COMPUTE_SHADER = COMPUTE_SHADER,
    ALL_TRANSFER = ALL_TRANSFER,
    BOTTOM_OF_PIPE = BOTTOM_OF_PIPE,
    HOST = HOST,
    ALL_GRAPHICS = ALL_GRAPHICS,
    ALL_COMMANDS = ALL_COMMANDS,
    COPY = COPY,
    RESOLVE = RESOLVE,
    BLIT = BLIT,
    CLEAR = CLEAR,
    INDEX_INPUT = INDEX_INPUT,
    VERTEX_ATTRIBUTE_INPUT = VERTEX_ATTRIBUTE_INPUT,
    PRE_RASTERIZATION_SHADERS = PRE_RASTERIZATION_SHADERS,
    ACCELERATION_STRUCTURE_BUILD = ACCELERATION_STRUCTURE_BUILD_KHR,
}

const META_STAGES: PipelineStages = PipelineStages::ALL_COMMANDS
    .union(PipelineStages::ALL_GRAPHICS)
    .union(PipelineStages::VERTEX_INPUT)
    .union(PipelineStages::PRE_RASTERIZATION_SHADERS)
    .union(TRANSFER_SUBSTAGES);

const TRANSFER_SUBSTAGES: PipelineStages = PipelineStages::COPY
    .union(PipelineStages::RESOLVE)
    .union(PipelineStages::BLIT)
    .union(PipelineStages::CLEAR);

const ALL_GRAPHICS_STAGES: PipelineStages = PipelineStages::DRAW_INDIRECT
    .union(PipelineStages::INDEX_INPUT)
    .union(PipelineStages::VERTEX_ATTRIBUTE_INPUT)
    .union(PipelineStages::VERTEX_SHADER)
    .union(PipelineStages::TESSELLATION_CONTROL_SHADER)
    .union(PipelineStages::TESSELLATION_EVALUATION_SHADER)
    .union(PipelineStages::GEOMETRY_SHADER)
    .union(PipelineStages::EARLY_FRAGMENT_TESTS)
    .union(PipelineStages::FRAGMENT_SHADER)
    .union(PipelineStages::LATE_FRAGMENT_TESTS)
    .union(PipelineStages::COLOR_ATTACHMENT_OUTPUT);

// Everything a queue executes. The host is not part of any queue's pipeline.
const ALL_DEVICE_STAGES: PipelineStages = ALL_GRAPHICS_STAGES
    .union(PipelineStages::TOP_OF_PIPE)
    .union(PipelineStages::BOTTOM_OF_PIPE)
    .union(PipelineStages::COMPUTE_SHADER)
    .union(PipelineStages::ALL_TRANSFER)
    .union(PipelineStages::ACCELERATION_STRUCTURE_BUILD);

// Logical order of the stages of each pipeline type, first to last.
const STAGE_ORDERS: &[&[PipelineStages]] = &[
    &[
        PipelineStages::DRAW_INDIRECT,
        PipelineStages::INDEX_INPUT,
        PipelineStages::VERTEX_ATTRIBUTE_INPUT,
        PipelineStages::VERTEX_SHADER,
        PipelineStages::TESSELLATION_CONTROL_SHADER,
        PipelineStages::TESSELLATION_EVALUATION_SHADER,
        PipelineStages::GEOMETRY_SHADER,
        PipelineStages::EARLY_FRAGMENT_TESTS,
        PipelineStages::FRAGMENT_SHADER,
        PipelineStages::LATE_FRAGMENT_TESTS,
        PipelineStages::COLOR_ATTACHMENT_OUTPUT,
    ],
    &[PipelineStages::DRAW_INDIRECT, PipelineStages::COMPUTE_SHADER],
    &[
        PipelineStages::DRAW_INDIRECT,
        PipelineStages::ACCELERATION_STRUCTURE_BUILD,
    ],
];

vulkan_bitflags! {
    /// A set of memory access types.
    AccessFlags impl {
        /// Replaces the coarse access types in `self` by the fine-grained ones they include.
        pub fn expand(self) -> Self {
            let mut result = self;

            if self.intersects(AccessFlags::MEMORY_READ) {
                result |= ALL_READS;
            }

            if self.intersects(AccessFlags::MEMORY_WRITE) {
                result |= ALL_WRITES;
            }

            if self.intersects(AccessFlags::SHADER_READ) {
                result |= AccessFlags::SHADER_SAMPLED_READ | AccessFlags::SHADER_STORAGE_READ;
            }

            if self.intersects(AccessFlags::SHADER_WRITE) {
                result |= AccessFlags::SHADER_STORAGE_WRITE;
            }

            result
                - (AccessFlags::MEMORY_READ
                    | AccessFlags::MEMORY_WRITE
                    | AccessFlags::SHADER_READ
                    | AccessFlags::SHADER_WRITE)
        }
    }
    = AccessFlags2(u64);

    INDIRECT_COMMAND_READ = INDIRECT_COMMAND_READ,
    INDEX_READ = INDEX_READ,
    VERTEX_ATTRIBUTE_READ = VERTEX_ATTRIBUTE_READ,
    UNIFORM_READ = UNIFORM_READ,
    INPUT_ATTACHMENT_READ = INPUT_ATTACHMENT_READ,
    SHADER_READ = SHADER_READ,
    SHADER_WRITE = SHADER_WRITE,
    COLOR_ATTACHMENT_READ = COLOR_ATTACHMENT_READ,
    COLOR_ATTACHMENT_WRITE = COLOR_ATTACHMENT_WRITE,
    DEPTH_STENCIL_ATTACHMENT_READ = DEPTH_STENCIL_ATTACHMENT_READ,
    DEPTH_STENCIL_ATTACHMENT_WRITE = DEPTH_STENCIL_ATTACHMENT_WRITE,
    TRANSFER_READ = TRANSFER_READ,
    TRANSFER_WRITE = TRANSFER_WRITE,
    HOST_READ = HOST_READ,
    HOST_WRITE = HOST_WRITE,
    MEMORY_READ = MEMORY_READ,
    MEMORY_WRITE = MEMORY_WRITE,
    SHADER_SAMPLED_READ = SHADER_SAMPLED_READ,
    SHADER_STORAGE_READ = SHADER_STORAGE_READ,
    SHADER_STORAGE_WRITE = SHADER_STORAGE_WRITE,
    ACCELERATION_STRUCTURE_READ = ACCELERATION_STRUCTURE_READ_KHR,
    ACCELERATION_STRUCTURE_WRITE = ACCELERATION_STRUCTURE_WRITE_KHR,
}

const ALL_READS: AccessFlags = AccessFlags::INDIRECT_COMMAND_READ
    .union(AccessFlags::INDEX_READ)
    .union(AccessFlags::VERTEX_ATTRIBUTE_READ)
    .union(AccessFlags::UNIFORM_READ)
    .union(AccessFlags::INPUT_ATTACHMENT_READ)
    .union(AccessFlags::COLOR_ATTACHMENT_READ)
    .union(AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ)
    .union(AccessFlags::TRANSFER_READ)
    .union(AccessFlags::HOST_READ)
    .union(AccessFlags::SHADER_SAMPLED_READ)
    .union(AccessFlags::SHADER_STORAGE_READ)
    .union(AccessFlags::ACCELERATION_STRUCTURE_READ);

const ALL_WRITES: AccessFlags = AccessFlags::COLOR_ATTACHMENT_WRITE
    .union(AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
    .union(AccessFlags::TRANSFER_WRITE)
    .union(AccessFlags::HOST_WRITE)
    .union(AccessFlags::SHADER_STORAGE_WRITE)
    .union(AccessFlags::ACCELERATION_STRUCTURE_WRITE);

/// Whether an access reads or writes memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    Write,
}

macro_rules! stage_accesses {
    (
        $(
            $(#[$meta:meta])*
            $name:ident = $stage:expr, $access:expr, $kind:ident;
        )+
    ) => {
        /// A single pipeline stage combined with a single memory access type performed in it.
        #[allow(non_camel_case_types)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum StageAccess {
            $(
                $(#[$meta])*
                $name,
            )+
        }

        impl StageAccess {
            const ALL: &'static [StageAccess] = &[$(StageAccess::$name,)+];

            /// Returns the pipeline stage the access happens in.
            pub const fn stage(self) -> PipelineStages {
                match self {
                    $(StageAccess::$name => $stage,)+
                }
            }

            /// Returns the memory access type.
            pub const fn access(self) -> AccessFlags {
                match self {
                    $(StageAccess::$name => $access,)+
                }
            }

            /// Returns whether the access reads or writes.
            pub const fn kind(self) -> AccessKind {
                match self {
                    $(StageAccess::$name => AccessKind::$kind,)+
                }
            }
        }
    };
}

stage_accesses! {
    DrawIndirect_IndirectCommandRead =
        PipelineStages::DRAW_INDIRECT, AccessFlags::INDIRECT_COMMAND_READ, Read;
    IndexInput_IndexRead = PipelineStages::INDEX_INPUT, AccessFlags::INDEX_READ, Read;
    VertexAttributeInput_VertexAttributeRead =
        PipelineStages::VERTEX_ATTRIBUTE_INPUT, AccessFlags::VERTEX_ATTRIBUTE_READ, Read;
    VertexShader_UniformRead = PipelineStages::VERTEX_SHADER, AccessFlags::UNIFORM_READ, Read;
    VertexShader_ShaderSampledRead =
        PipelineStages::VERTEX_SHADER, AccessFlags::SHADER_SAMPLED_READ, Read;
    VertexShader_ShaderStorageRead =
        PipelineStages::VERTEX_SHADER, AccessFlags::SHADER_STORAGE_READ, Read;
    VertexShader_ShaderStorageWrite =
        PipelineStages::VERTEX_SHADER, AccessFlags::SHADER_STORAGE_WRITE, Write;
    TessellationControlShader_UniformRead =
        PipelineStages::TESSELLATION_CONTROL_SHADER, AccessFlags::UNIFORM_READ, Read;
    TessellationControlShader_ShaderSampledRead =
        PipelineStages::TESSELLATION_CONTROL_SHADER, AccessFlags::SHADER_SAMPLED_READ, Read;
    TessellationControlShader_ShaderStorageRead =
        PipelineStages::TESSELLATION_CONTROL_SHADER, AccessFlags::SHADER_STORAGE_READ, Read;
    TessellationControlShader_ShaderStorageWrite =
        PipelineStages::TESSELLATION_CONTROL_SHADER, AccessFlags::SHADER_STORAGE_WRITE, Write;
    TessellationEvaluationShader_UniformRead =
        PipelineStages::TESSELLATION_EVALUATION_SHADER, AccessFlags::UNIFORM_READ, Read;
    TessellationEvaluationShader_ShaderSampledRead =
        PipelineStages::TESSELLATION_EVALUATION_SHADER, AccessFlags::SHADER_SAMPLED_READ, Read;
    TessellationEvaluationShader_ShaderStorageRead =
        PipelineStages::TESSELLATION_EVALUATION_SHADER, AccessFlags::SHADER_STORAGE_READ, Read;
    TessellationEvaluationShader_ShaderStorageWrite =
        PipelineStages::TESSELLATION_EVALUATION_SHADER, AccessFlags::SHADER_STORAGE_WRITE, Write;
    GeometryShader_UniformRead = PipelineStages::GEOMETRY_SHADER, AccessFlags::UNIFORM_READ, Read;
    GeometryShader_ShaderSampledRead =
        PipelineStages::GEOMETRY_SHADER, AccessFlags::SHADER_SAMPLED_READ, Read;
    GeometryShader_ShaderStorageRead =
        PipelineStages::GEOMETRY_SHADER, AccessFlags::SHADER_STORAGE_READ, Read;
    GeometryShader_ShaderStorageWrite =
        PipelineStages::GEOMETRY_SHADER, AccessFlags::SHADER_STORAGE_WRITE, Write;
    FragmentShader_UniformRead = PipelineStages::FRAGMENT_SHADER, AccessFlags::UNIFORM_READ, Read;
    FragmentShader_InputAttachmentRead =
        PipelineStages::FRAGMENT_SHADER, AccessFlags::INPUT_ATTACHMENT_READ, Read;
    FragmentShader_ShaderSampledRead =
        PipelineStages::FRAGMENT_SHADER, AccessFlags::SHADER_SAMPLED_READ, Read;
    FragmentShader_ShaderStorageRead =
        PipelineStages::FRAGMENT_SHADER, AccessFlags::SHADER_STORAGE_READ, Read;
    FragmentShader_ShaderStorageWrite =
        PipelineStages::FRAGMENT_SHADER, AccessFlags::SHADER_STORAGE_WRITE, Write;
    EarlyFragmentTests_DepthStencilAttachmentRead =
        PipelineStages::EARLY_FRAGMENT_TESTS, AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ, Read;
    EarlyFragmentTests_DepthStencilAttachmentWrite =
        PipelineStages::EARLY_FRAGMENT_TESTS, AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE, Write;
    LateFragmentTests_DepthStencilAttachmentRead =
        PipelineStages::LATE_FRAGMENT_TESTS, AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ, Read;
    LateFragmentTests_DepthStencilAttachmentWrite =
        PipelineStages::LATE_FRAGMENT_TESTS, AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE, Write;
    ColorAttachmentOutput_ColorAttachmentRead =
        PipelineStages::COLOR_ATTACHMENT_OUTPUT, AccessFlags::COLOR_ATTACHMENT_READ, Read;
    ColorAttachmentOutput_ColorAttachmentWrite =
        PipelineStages::COLOR_ATTACHMENT_OUTPUT, AccessFlags::COLOR_ATTACHMENT_WRITE, Write;
    ComputeShader_UniformRead = PipelineStages::COMPUTE_SHADER, AccessFlags::UNIFORM_READ, Read;
    ComputeShader_ShaderSampledRead =
        PipelineStages::COMPUTE_SHADER, AccessFlags::SHADER_SAMPLED_READ, Read;
    ComputeShader_ShaderStorageRead =
        PipelineStages::COMPUTE_SHADER, AccessFlags::SHADER_STORAGE_READ, Read;
    ComputeShader_ShaderStorageWrite =
        PipelineStages::COMPUTE_SHADER, AccessFlags::SHADER_STORAGE_WRITE, Write;
    Transfer_TransferRead = PipelineStages::ALL_TRANSFER, AccessFlags::TRANSFER_READ, Read;
    Transfer_TransferWrite = PipelineStages::ALL_TRANSFER, AccessFlags::TRANSFER_WRITE, Write;
    Host_HostRead = PipelineStages::HOST, AccessFlags::HOST_READ, Read;
    Host_HostWrite = PipelineStages::HOST, AccessFlags::HOST_WRITE, Write;
    AccelerationStructureBuild_AccelerationStructureRead =
        PipelineStages::ACCELERATION_STRUCTURE_BUILD, AccessFlags::ACCELERATION_STRUCTURE_READ, Read;
    AccelerationStructureBuild_AccelerationStructureWrite =
        PipelineStages::ACCELERATION_STRUCTURE_BUILD, AccessFlags::ACCELERATION_STRUCTURE_WRITE, Write;
    /// The write performed by an image layout transition or a queue family ownership
    /// transfer. It belongs to no stage and is never part of an access scope.
    ImageLayoutTransition = PipelineStages::empty(), AccessFlags::empty(), Write;
}

impl StageAccess {
    #[inline]
    pub const fn is_read(self) -> bool {
        matches!(self.kind(), AccessKind::Read)
    }

    #[inline]
    pub const fn is_write(self) -> bool {
        matches!(self.kind(), AccessKind::Write)
    }

    #[inline]
    const fn bit(self) -> u64 {
        1 << self as u8
    }
}

/// A set of [`StageAccess`] pairs.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StageAccessFlags(u64);

impl StageAccessFlags {
    #[inline]
    pub const fn empty() -> Self {
        StageAccessFlags(0)
    }

    /// Builds the access scope of `stages` and `access`: every stage/access pair whose stage is
    /// listed in `stages` and whose access type is listed in `access`, after expanding the
    /// meta-stages and coarse access types. Logically earlier or later stages are not added.
    pub fn from_masks(stages: PipelineStages, access: AccessFlags) -> Self {
        let stages = stages.expand();
        let access = access.expand();
        let mut result = StageAccessFlags::empty();

        for &stage_access in StageAccess::ALL {
            if stages.intersects(stage_access.stage()) && access.intersects(stage_access.access())
            {
                result.insert(stage_access);
            }
        }

        result
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn contains(self, stage_access: StageAccess) -> bool {
        self.0 & stage_access.bit() != 0
    }

    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, stage_access: StageAccess) {
        self.0 |= stage_access.bit();
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        StageAccessFlags(self.0 | other.0)
    }

    /// Returns an iterator over the pairs in the set.
    pub fn iter(self) -> impl Iterator<Item = StageAccess> {
        StageAccess::ALL
            .iter()
            .copied()
            .filter(move |&stage_access| self.contains(stage_access))
    }
}

impl From<StageAccess> for StageAccessFlags {
    #[inline]
    fn from(val: StageAccess) -> Self {
        StageAccessFlags(val.bit())
    }
}

impl std::ops::BitOr for StageAccessFlags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for StageAccessFlags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Debug for StageAccessFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

vulkan_enum! {
    /// The layout of an image subresource.
    ImageLayout = ImageLayout(i32);

    #[default]
    Undefined = UNDEFINED,
    General = GENERAL,
    ColorAttachmentOptimal = COLOR_ATTACHMENT_OPTIMAL,
    DepthStencilAttachmentOptimal = DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    DepthStencilReadOnlyOptimal = DEPTH_STENCIL_READ_ONLY_OPTIMAL,
    ShaderReadOnlyOptimal = SHADER_READ_ONLY_OPTIMAL,
    TransferSrcOptimal = TRANSFER_SRC_OPTIMAL,
    TransferDstOptimal = TRANSFER_DST_OPTIMAL,
    Preinitialized = PREINITIALIZED,
    PresentSrc = PRESENT_SRC_KHR,
}

/// Dependency info for barriers in a pipeline barrier or event wait command.
#[derive(Clone, Debug, Default)]
pub struct DependencyInfo {
    /// Memory barriers for global operations and accesses, not limited to a single resource.
    ///
    /// The default value is empty.
    pub memory_barriers: SmallVec<[MemoryBarrier; 2]>,

    /// Memory barriers for individual buffers.
    ///
    /// The default value is empty.
    pub buffer_memory_barriers: SmallVec<[BufferMemoryBarrier; 8]>,

    /// Memory barriers for individual images.
    ///
    /// The default value is empty.
    pub image_memory_barriers: SmallVec<[ImageMemoryBarrier; 8]>,

    pub _ne: NonExhaustive,
}

impl DependencyInfo {
    /// Returns whether `self` contains no barriers at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.memory_barriers.is_empty()
            && self.buffer_memory_barriers.is_empty()
            && self.image_memory_barriers.is_empty()
    }

    /// Returns the union of the source stages of all barriers.
    pub fn src_stages(&self) -> PipelineStages {
        self.memory_barriers
            .iter()
            .map(|barrier| barrier.src_stages)
            .chain(self.buffer_memory_barriers.iter().map(|b| b.src_stages))
            .chain(self.image_memory_barriers.iter().map(|b| b.src_stages))
            .fold(PipelineStages::empty(), |acc, stages| acc | stages)
    }

    /// Returns the union of the destination stages of all barriers.
    pub fn dst_stages(&self) -> PipelineStages {
        self.memory_barriers
            .iter()
            .map(|barrier| barrier.dst_stages)
            .chain(self.buffer_memory_barriers.iter().map(|b| b.dst_stages))
            .chain(self.image_memory_barriers.iter().map(|b| b.dst_stages))
            .fold(PipelineStages::empty(), |acc, stages| acc | stages)
    }
}

/// A memory barrier that is applied globally.
#[derive(Clone, Debug, Default)]
pub struct MemoryBarrier {
    /// The pipeline stages in the source scope to wait for.
    ///
    /// The default value is [`PipelineStages::empty()`].
    pub src_stages: PipelineStages,

    /// The memory accesses in the source scope to make available and visible.
    ///
    /// The default value is [`AccessFlags::empty()`].
    pub src_access: AccessFlags,

    /// The pipeline stages in the destination scope that must wait for `src_stages`.
    ///
    /// The default value is [`PipelineStages::empty()`].
    pub dst_stages: PipelineStages,

    /// The memory accesses in the destination scope that must wait for `src_access` to be
    /// made available and visible.
    ///
    /// The default value is [`AccessFlags::empty()`].
    pub dst_access: AccessFlags,

    pub _ne: NonExhaustive,
}

impl MemoryBarrier {
    /// Returns a barrier that only creates an execution dependency.
    #[inline]
    pub fn execution(src_stages: PipelineStages, dst_stages: PipelineStages) -> Self {
        MemoryBarrier {
            src_stages,
            dst_stages,
            ..Default::default()
        }
    }
}

/// A memory barrier that is applied to a single buffer.
#[derive(Clone, Debug)]
pub struct BufferMemoryBarrier {
    /// The pipeline stages in the source scope to wait for.
    ///
    /// The default value is [`PipelineStages::empty()`].
    pub src_stages: PipelineStages,

    /// The memory accesses in the source scope to make available and visible.
    ///
    /// The default value is [`AccessFlags::empty()`].
    pub src_access: AccessFlags,

    /// The pipeline stages in the destination scope that must wait for `src_stages`.
    ///
    /// The default value is [`PipelineStages::empty()`].
    pub dst_stages: PipelineStages,

    /// The memory accesses in the destination scope that must wait for `src_access` to be
    /// made available and visible.
    ///
    /// The default value is [`AccessFlags::empty()`].
    pub dst_access: AccessFlags,

    /// For resources created with exclusive sharing mode, transfers ownership between queue
    /// families.
    ///
    /// The default value is `None`.
    pub queue_family_ownership_transfer: Option<QueueFamilyOwnershipTransfer>,

    /// The buffer to apply the barrier to.
    ///
    /// There is no default value.
    pub buffer: Id<Buffer>,

    /// The byte range of `buffer` to apply the barrier to.
    ///
    /// The default value is the whole buffer.
    pub range: Range<DeviceSize>,

    pub _ne: NonExhaustive,
}

impl BufferMemoryBarrier {
    /// Returns a `BufferMemoryBarrier` with the specified `buffer`.
    #[inline]
    pub fn buffer(buffer: Id<Buffer>) -> Self {
        BufferMemoryBarrier {
            src_stages: PipelineStages::empty(),
            src_access: AccessFlags::empty(),
            dst_stages: PipelineStages::empty(),
            dst_access: AccessFlags::empty(),
            queue_family_ownership_transfer: None,
            buffer,
            range: 0..DeviceSize::MAX,
            _ne: NonExhaustive(()),
        }
    }
}

/// A memory barrier that is applied to a single image.
#[derive(Clone, Debug)]
pub struct ImageMemoryBarrier {
    /// The pipeline stages in the source scope to wait for.
    ///
    /// The default value is [`PipelineStages::empty()`].
    pub src_stages: PipelineStages,

    /// The memory accesses in the source scope to make available and visible.
    ///
    /// The default value is [`AccessFlags::empty()`].
    pub src_access: AccessFlags,

    /// The pipeline stages in the destination scope that must wait for `src_stages`.
    ///
    /// The default value is [`PipelineStages::empty()`].
    pub dst_stages: PipelineStages,

    /// The memory accesses in the destination scope that must wait for `src_access` to be
    /// made available and visible.
    ///
    /// The default value is [`AccessFlags::empty()`].
    pub dst_access: AccessFlags,

    /// The layout that the specified `subresource_range` of `image` is expected to be in when
    /// the source scope completes.
    ///
    /// The default value is [`ImageLayout::Undefined`].
    pub old_layout: ImageLayout,

    /// The layout that the specified `subresource_range` of `image` will be transitioned to
    /// before the destination scope begins. If it differs from `old_layout`, the barrier
    /// performs a layout transition, which is a write to the subresources.
    ///
    /// The default value is [`ImageLayout::Undefined`].
    pub new_layout: ImageLayout,

    /// For resources created with exclusive sharing mode, transfers ownership between queue
    /// families.
    ///
    /// The default value is `None`.
    pub queue_family_ownership_transfer: Option<QueueFamilyOwnershipTransfer>,

    /// The image to apply the barrier to.
    ///
    /// There is no default value.
    pub image: Id<Image>,

    /// The subresource range of `image` to apply the barrier to.
    ///
    /// The default value is the whole image.
    pub subresource_range: ImageSubresourceRange,

    pub _ne: NonExhaustive,
}

impl ImageMemoryBarrier {
    /// Returns an `ImageMemoryBarrier` with the specified `image`.
    #[inline]
    pub fn image(image: Id<Image>) -> Self {
        ImageMemoryBarrier {
            src_stages: PipelineStages::empty(),
            src_access: AccessFlags::empty(),
            dst_stages: PipelineStages::empty(),
            dst_access: AccessFlags::empty(),
            old_layout: ImageLayout::Undefined,
            new_layout: ImageLayout::Undefined,
            queue_family_ownership_transfer: None,
            image,
            subresource_range: ImageSubresourceRange::whole(),
            _ne: NonExhaustive(()),
        }
    }
}

/// Specifies a queue family ownership transfer for a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueueFamilyOwnershipTransfer {
    /// The queue family that releases ownership.
    pub src_index: u32,

    /// The queue family that acquires ownership.
    pub dst_index: u32,
}
