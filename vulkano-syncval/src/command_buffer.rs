//! Recording of command buffers.
//!
//! A [`RecordingCommandBuffer`] does not execute anything: every command is reduced to the
//! storage it reads and writes, with the pipeline stage and access type of each access, and to
//! the synchronization commands in between. Structural mistakes, like beginning a render pass
//! twice or copying inside one, are rejected while recording. Everything that depends on the
//! state of the device, like whether an access is synchronized, is found when the command buffer
//! is submitted.

use crate::{
    event::Event,
    render_pass::{ImageView, RenderPass},
    resource::{Buffer, Image, ImageSubresourceRange, StorageLocation},
    sync::{DependencyInfo, PipelineStages, StageAccess},
    DeviceSize, Id, NonExhaustive, ValidationError,
};
use smallvec::{smallvec, SmallVec};
use std::{ops::Range, sync::Arc};

/// The level of a command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandBufferLevel {
    /// Can be submitted to a queue.
    Primary,

    /// Can only be executed by a primary command buffer.
    Secondary,
}

/// The render pass a secondary command buffer is executed in.
#[derive(Clone, Debug)]
pub struct CommandBufferInheritanceRenderPassInfo {
    /// The render pass the command buffer is executed in.
    ///
    /// There is no default value.
    pub render_pass: Arc<RenderPass>,

    /// The subpass the command buffer is executed in.
    ///
    /// The default value is `0`.
    pub subpass: u32,

    pub _ne: NonExhaustive,
}

impl CommandBufferInheritanceRenderPassInfo {
    /// Returns a `CommandBufferInheritanceRenderPassInfo` with the specified `render_pass` and
    /// `subpass`.
    #[inline]
    pub fn subpass(render_pass: Arc<RenderPass>, subpass: u32) -> Self {
        Self {
            render_pass,
            subpass,
            _ne: NonExhaustive(()),
        }
    }
}

/// The context a secondary command buffer is recorded for.
#[derive(Clone, Debug, Default)]
pub struct CommandBufferInheritanceInfo {
    /// If `Some`, the command buffer is executed entirely inside a subpass of a render pass.
    ///
    /// The default value is `None`.
    pub render_pass: Option<CommandBufferInheritanceRenderPassInfo>,

    pub _ne: NonExhaustive,
}

/// One access made by a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceAccess {
    /// The storage that is accessed.
    pub location: StorageLocation,

    /// The stage the access is made in and its type.
    pub access: StageAccess,
}

impl ResourceAccess {
    /// Returns an access to `range` of `buffer`.
    #[inline]
    pub fn buffer(buffer: Id<Buffer>, range: Range<DeviceSize>, access: StageAccess) -> Self {
        ResourceAccess {
            location: StorageLocation::buffer(buffer, range),
            access,
        }
    }

    /// Returns an access to `subresource_range` of `image`.
    #[inline]
    pub fn image(
        image: Id<Image>,
        subresource_range: ImageSubresourceRange,
        access: StageAccess,
    ) -> Self {
        ResourceAccess {
            location: StorageLocation::image(image, subresource_range),
            access,
        }
    }
}

/// Parameters to copy data from a buffer to another buffer.
#[derive(Clone, Debug)]
pub struct CopyBufferInfo {
    /// The buffer to copy from.
    ///
    /// There is no default value.
    pub src_buffer: Id<Buffer>,

    /// The buffer to copy to.
    ///
    /// There is no default value.
    pub dst_buffer: Id<Buffer>,

    /// The regions of both buffers to copy between, specified in bytes.
    ///
    /// The default value is a single region, with zero offsets and the given `size`.
    pub regions: SmallVec<[BufferCopy; 1]>,

    pub _ne: NonExhaustive,
}

impl CopyBufferInfo {
    /// Returns a `CopyBufferInfo` copying the first `size` bytes of `src_buffer` to
    /// `dst_buffer`.
    #[inline]
    pub fn buffers(src_buffer: Id<Buffer>, dst_buffer: Id<Buffer>, size: DeviceSize) -> Self {
        Self {
            src_buffer,
            dst_buffer,
            regions: smallvec![BufferCopy {
                size,
                ..Default::default()
            }],
            _ne: NonExhaustive(()),
        }
    }
}

/// A region of data to copy between buffers.
#[derive(Clone, Debug, Default)]
pub struct BufferCopy {
    /// The offset in bytes from the start of `src_buffer` that copying will start from.
    ///
    /// The default value is `0`.
    pub src_offset: DeviceSize,

    /// The offset in bytes from the start of `dst_buffer` that copying will start from.
    ///
    /// The default value is `0`.
    pub dst_offset: DeviceSize,

    /// The number of bytes to copy.
    ///
    /// The default value is `0`, which must be overridden.
    pub size: DeviceSize,

    pub _ne: NonExhaustive,
}

/// Parameters to copy data from an image to another image.
#[derive(Clone, Debug)]
pub struct CopyImageInfo {
    /// The image to copy from.
    ///
    /// There is no default value.
    pub src_image: Id<Image>,

    /// The image to copy to.
    ///
    /// There is no default value.
    pub dst_image: Id<Image>,

    /// The regions of both images to copy between.
    ///
    /// The default value is a single region, covering every subresource of both images.
    pub regions: SmallVec<[ImageCopy; 1]>,

    pub _ne: NonExhaustive,
}

impl CopyImageInfo {
    /// Returns a `CopyImageInfo` with the specified `src_image` and `dst_image`.
    #[inline]
    pub fn images(src_image: Id<Image>, dst_image: Id<Image>) -> Self {
        Self {
            src_image,
            dst_image,
            regions: smallvec![ImageCopy::default()],
            _ne: NonExhaustive(()),
        }
    }
}

/// A region of data to copy between images. Copies are tracked per subresource.
#[derive(Clone, Debug)]
pub struct ImageCopy {
    /// The subresources of `src_image` to copy from.
    ///
    /// The default value is [`ImageSubresourceRange::whole()`].
    pub src_subresource: ImageSubresourceRange,

    /// The subresources of `dst_image` to copy to.
    ///
    /// The default value is [`ImageSubresourceRange::whole()`].
    pub dst_subresource: ImageSubresourceRange,

    pub _ne: NonExhaustive,
}

impl Default for ImageCopy {
    #[inline]
    fn default() -> Self {
        Self {
            src_subresource: ImageSubresourceRange::whole(),
            dst_subresource: ImageSubresourceRange::whole(),
            _ne: NonExhaustive(()),
        }
    }
}

/// Parameters to copy data from a buffer to an image.
#[derive(Clone, Debug)]
pub struct CopyBufferToImageInfo {
    /// The buffer to copy from.
    ///
    /// There is no default value.
    pub src_buffer: Id<Buffer>,

    /// The image to copy to.
    ///
    /// There is no default value.
    pub dst_image: Id<Image>,

    /// The regions of the buffer and image to copy between.
    ///
    /// The default value is a single region, with the given number of bytes at the start of the
    /// buffer copied to every subresource of the image.
    pub regions: SmallVec<[BufferImageCopy; 1]>,

    pub _ne: NonExhaustive,
}

impl CopyBufferToImageInfo {
    /// Returns a `CopyBufferToImageInfo` with the specified `src_buffer` and `dst_image`.
    #[inline]
    pub fn buffer_image(
        src_buffer: Id<Buffer>,
        dst_image: Id<Image>,
        buffer_size: DeviceSize,
    ) -> Self {
        Self {
            src_buffer,
            dst_image,
            regions: smallvec![BufferImageCopy {
                buffer_size,
                ..Default::default()
            }],
            _ne: NonExhaustive(()),
        }
    }
}

/// Parameters to copy data from an image to a buffer.
#[derive(Clone, Debug)]
pub struct CopyImageToBufferInfo {
    /// The image to copy from.
    ///
    /// There is no default value.
    pub src_image: Id<Image>,

    /// The buffer to copy to.
    ///
    /// There is no default value.
    pub dst_buffer: Id<Buffer>,

    /// The regions of the image and buffer to copy between.
    ///
    /// The default value is a single region, with every subresource of the image copied to the
    /// given number of bytes at the start of the buffer.
    pub regions: SmallVec<[BufferImageCopy; 1]>,

    pub _ne: NonExhaustive,
}

impl CopyImageToBufferInfo {
    /// Returns a `CopyImageToBufferInfo` with the specified `src_image` and `dst_buffer`.
    #[inline]
    pub fn image_buffer(
        src_image: Id<Image>,
        dst_buffer: Id<Buffer>,
        buffer_size: DeviceSize,
    ) -> Self {
        Self {
            src_image,
            dst_buffer,
            regions: smallvec![BufferImageCopy {
                buffer_size,
                ..Default::default()
            }],
            _ne: NonExhaustive(()),
        }
    }
}

/// A region of data to copy between a buffer and an image.
#[derive(Clone, Debug)]
pub struct BufferImageCopy {
    /// The offset in bytes from the start of the buffer.
    ///
    /// The default value is `0`.
    pub buffer_offset: DeviceSize,

    /// The number of bytes of the buffer that hold the texels of the region.
    ///
    /// The default value is `0`, which must be overridden.
    pub buffer_size: DeviceSize,

    /// The subresources of the image.
    ///
    /// The default value is [`ImageSubresourceRange::whole()`].
    pub image_subresource: ImageSubresourceRange,

    pub _ne: NonExhaustive,
}

impl Default for BufferImageCopy {
    #[inline]
    fn default() -> Self {
        Self {
            buffer_offset: 0,
            buffer_size: 0,
            image_subresource: ImageSubresourceRange::whole(),
            _ne: NonExhaustive(()),
        }
    }
}

impl BufferImageCopy {
    fn buffer_range(&self) -> Range<DeviceSize> {
        self.buffer_offset..self.buffer_offset.saturating_add(self.buffer_size)
    }
}

/// Parameters to blit or resolve image data.
#[derive(Clone, Debug)]
pub struct ImageTransferInfo {
    /// The image to read from.
    ///
    /// There is no default value.
    pub src_image: Id<Image>,

    /// The subresources of `src_image` to read.
    ///
    /// The default value is [`ImageSubresourceRange::whole()`].
    pub src_subresource: ImageSubresourceRange,

    /// The image to write to.
    ///
    /// There is no default value.
    pub dst_image: Id<Image>,

    /// The subresources of `dst_image` to write.
    ///
    /// The default value is [`ImageSubresourceRange::whole()`].
    pub dst_subresource: ImageSubresourceRange,

    pub _ne: NonExhaustive,
}

impl ImageTransferInfo {
    /// Returns an `ImageTransferInfo` covering every subresource of `src_image` and
    /// `dst_image`.
    #[inline]
    pub fn images(src_image: Id<Image>, dst_image: Id<Image>) -> Self {
        Self {
            src_image,
            src_subresource: ImageSubresourceRange::whole(),
            dst_image,
            dst_subresource: ImageSubresourceRange::whole(),
            _ne: NonExhaustive(()),
        }
    }
}

/// A command recorded in a command buffer, reduced to what matters for synchronization.
#[derive(Clone, Debug)]
pub(crate) enum Command {
    /// A command that reads and writes storage.
    Access {
        name: &'static str,
        accesses: SmallVec<[ResourceAccess; 4]>,
        // Whether the command also accesses the attachments of the current subpass.
        uses_attachments: bool,
        // If set, the reads and writes of the command must not overlap each other.
        overlap_vuid: Option<&'static str>,
    },
    PipelineBarrier {
        dependency_info: DependencyInfo,
    },
    SetEvent {
        event: Id<Event>,
        stages: PipelineStages,
    },
    ResetEvent {
        event: Id<Event>,
        stages: PipelineStages,
    },
    WaitEvents {
        events: SmallVec<[Id<Event>; 2]>,
        dependency_info: DependencyInfo,
    },
    BeginRenderPass {
        render_pass: Arc<RenderPass>,
        attachments: Vec<ImageView>,
    },
    NextSubpass,
    EndRenderPass,
    ExecuteCommands {
        command_buffers: SmallVec<[Arc<CommandBuffer>; 1]>,
    },
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Command::Access { name, .. } => name,
            Command::PipelineBarrier { .. } => "pipeline_barrier",
            Command::SetEvent { .. } => "set_event",
            Command::ResetEvent { .. } => "reset_event",
            Command::WaitEvents { .. } => "wait_events",
            Command::BeginRenderPass { .. } => "begin_render_pass",
            Command::NextSubpass => "next_subpass",
            Command::EndRenderPass => "end_render_pass",
            Command::ExecuteCommands { .. } => "execute_commands",
        }
    }
}

// The render pass instance being recorded.
#[derive(Clone, Debug)]
struct RenderPassState {
    render_pass: Arc<RenderPass>,
    subpass: u32,
    // Whether the instance was begun in this command buffer, as opposed to inherited.
    begun: bool,
}

/// A command buffer in the recording state.
#[derive(Debug)]
pub struct RecordingCommandBuffer {
    level: CommandBufferLevel,
    queue_family_index: u32,
    inheritance_info: Option<CommandBufferInheritanceInfo>,
    commands: Vec<Command>,
    render_pass: Option<RenderPassState>,
}

impl RecordingCommandBuffer {
    /// Begins recording a primary command buffer for queues of the given family.
    #[inline]
    pub fn primary(queue_family_index: u32) -> Self {
        RecordingCommandBuffer {
            level: CommandBufferLevel::Primary,
            queue_family_index,
            inheritance_info: None,
            commands: Vec::new(),
            render_pass: None,
        }
    }

    /// Begins recording a secondary command buffer for queues of the given family.
    pub fn secondary(
        queue_family_index: u32,
        inheritance_info: CommandBufferInheritanceInfo,
    ) -> Result<Self, Box<ValidationError>> {
        let render_pass = match &inheritance_info.render_pass {
            Some(render_pass_info) => {
                if render_pass_info.subpass >= render_pass_info.render_pass.subpass_count() {
                    return Err(Box::new(ValidationError {
                        context: "inheritance_info.render_pass.subpass".into(),
                        problem: "is not less than the number of subpasses of the render pass"
                            .into(),
                        vuids: &["VUID-VkCommandBufferInheritanceInfo-commandBuffer-06001"],
                    }));
                }

                Some(RenderPassState {
                    render_pass: render_pass_info.render_pass.clone(),
                    subpass: render_pass_info.subpass,
                    begun: false,
                })
            }
            None => None,
        };

        Ok(RecordingCommandBuffer {
            level: CommandBufferLevel::Secondary,
            queue_family_index,
            inheritance_info: Some(inheritance_info),
            commands: Vec::new(),
            render_pass,
        })
    }

    /// Returns the level of the command buffer.
    #[inline]
    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    /// Returns the number of commands recorded so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn add_command(
        &mut self,
        name: &'static str,
        accesses: impl IntoIterator<Item = ResourceAccess>,
    ) {
        self.commands.push(Command::Access {
            name,
            accesses: accesses.into_iter().collect(),
            uses_attachments: false,
            overlap_vuid: None,
        });
    }

    fn validate_outside_render_pass(
        &self,
        vuids: &'static [&'static str],
    ) -> Result<(), Box<ValidationError>> {
        if self.render_pass.is_some() {
            return Err(Box::new(ValidationError {
                problem: "a render pass instance is active".into(),
                vuids,
                ..Default::default()
            }));
        }

        Ok(())
    }

    fn validate_inside_render_pass(
        &self,
        vuids: &'static [&'static str],
    ) -> Result<(), Box<ValidationError>> {
        if self.render_pass.is_none() {
            return Err(Box::new(ValidationError {
                problem: "a render pass instance is not active".into(),
                vuids,
                ..Default::default()
            }));
        }

        Ok(())
    }

    /// Copies data from a buffer to another buffer.
    pub fn copy_buffer(
        &mut self,
        copy_buffer_info: CopyBufferInfo,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_outside_render_pass(&["VUID-vkCmdCopyBuffer2-renderpass"])?;

        let CopyBufferInfo {
            src_buffer,
            dst_buffer,
            regions,
            _ne: _,
        } = copy_buffer_info;

        for (region_index, region) in regions.iter().enumerate() {
            if region.size == 0 {
                return Err(Box::new(ValidationError {
                    context: format!("copy_buffer_info.regions[{}].size", region_index).into(),
                    problem: "is zero".into(),
                    vuids: &["VUID-VkBufferCopy2-size-01988"],
                }));
            }
        }

        let accesses = regions.iter().flat_map(|region| {
            [
                ResourceAccess::buffer(
                    src_buffer,
                    region.src_offset..region.src_offset.saturating_add(region.size),
                    StageAccess::Transfer_TransferRead,
                ),
                ResourceAccess::buffer(
                    dst_buffer,
                    region.dst_offset..region.dst_offset.saturating_add(region.size),
                    StageAccess::Transfer_TransferWrite,
                ),
            ]
        });

        self.commands.push(Command::Access {
            name: "copy_buffer",
            accesses: accesses.collect(),
            uses_attachments: false,
            overlap_vuid: Some("VUID-vkCmdCopyBuffer-pRegions-00117"),
        });

        Ok(self)
    }

    /// Copies data from an image to another image.
    pub fn copy_image(
        &mut self,
        copy_image_info: CopyImageInfo,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_outside_render_pass(&["VUID-vkCmdCopyImage2-renderpass"])?;

        let CopyImageInfo {
            src_image,
            dst_image,
            regions,
            _ne: _,
        } = copy_image_info;

        let accesses = regions.into_iter().flat_map(|region| {
            [
                ResourceAccess::image(
                    src_image,
                    region.src_subresource,
                    StageAccess::Transfer_TransferRead,
                ),
                ResourceAccess::image(
                    dst_image,
                    region.dst_subresource,
                    StageAccess::Transfer_TransferWrite,
                ),
            ]
        });

        self.commands.push(Command::Access {
            name: "copy_image",
            accesses: accesses.collect(),
            uses_attachments: false,
            overlap_vuid: Some("VUID-vkCmdCopyImage-pRegions-00124"),
        });

        Ok(self)
    }

    /// Copies data from a buffer to an image.
    pub fn copy_buffer_to_image(
        &mut self,
        copy_buffer_to_image_info: CopyBufferToImageInfo,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_outside_render_pass(&["VUID-vkCmdCopyBufferToImage2-renderpass"])?;

        let CopyBufferToImageInfo {
            src_buffer,
            dst_image,
            regions,
            _ne: _,
        } = copy_buffer_to_image_info;

        let accesses = regions.into_iter().flat_map(|region| {
            [
                ResourceAccess::buffer(
                    src_buffer,
                    region.buffer_range(),
                    StageAccess::Transfer_TransferRead,
                ),
                ResourceAccess::image(
                    dst_image,
                    region.image_subresource,
                    StageAccess::Transfer_TransferWrite,
                ),
            ]
        });
        self.add_command("copy_buffer_to_image", accesses);

        Ok(self)
    }

    /// Copies data from an image to a buffer.
    pub fn copy_image_to_buffer(
        &mut self,
        copy_image_to_buffer_info: CopyImageToBufferInfo,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_outside_render_pass(&["VUID-vkCmdCopyImageToBuffer2-renderpass"])?;

        let CopyImageToBufferInfo {
            src_image,
            dst_buffer,
            regions,
            _ne: _,
        } = copy_image_to_buffer_info;

        let accesses = regions.into_iter().flat_map(|region| {
            let buffer_range = region.buffer_range();

            [
                ResourceAccess::image(
                    src_image,
                    region.image_subresource,
                    StageAccess::Transfer_TransferRead,
                ),
                ResourceAccess::buffer(
                    dst_buffer,
                    buffer_range,
                    StageAccess::Transfer_TransferWrite,
                ),
            ]
        });
        self.add_command("copy_image_to_buffer", accesses);

        Ok(self)
    }

    /// Fills a range of a buffer with repeated copies of a value.
    pub fn fill_buffer(
        &mut self,
        buffer: Id<Buffer>,
        range: Range<DeviceSize>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_outside_render_pass(&["VUID-vkCmdFillBuffer-renderpass"])?;
        self.add_command(
            "fill_buffer",
            [ResourceAccess::buffer(
                buffer,
                range,
                StageAccess::Transfer_TransferWrite,
            )],
        );

        Ok(self)
    }

    /// Writes `data_size` bytes of data inlined in the command buffer to a buffer.
    pub fn update_buffer(
        &mut self,
        buffer: Id<Buffer>,
        dst_offset: DeviceSize,
        data_size: DeviceSize,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_outside_render_pass(&["VUID-vkCmdUpdateBuffer-renderpass"])?;

        if data_size == 0 || data_size > 65536 {
            return Err(Box::new(ValidationError {
                context: "data_size".into(),
                problem: "is zero, or greater than 65536".into(),
                vuids: &["VUID-vkCmdUpdateBuffer-dataSize-00037"],
            }));
        }

        self.add_command(
            "update_buffer",
            [ResourceAccess::buffer(
                buffer,
                dst_offset..dst_offset.saturating_add(data_size),
                StageAccess::Transfer_TransferWrite,
            )],
        );

        Ok(self)
    }

    /// Clears subresources of a color image.
    pub fn clear_color_image(
        &mut self,
        image: Id<Image>,
        regions: impl IntoIterator<Item = ImageSubresourceRange>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_outside_render_pass(&["VUID-vkCmdClearColorImage-renderpass"])?;
        self.add_command(
            "clear_color_image",
            regions.into_iter().map(|subresource_range| {
                ResourceAccess::image(image, subresource_range, StageAccess::Transfer_TransferWrite)
            }),
        );

        Ok(self)
    }

    /// Clears subresources of a depth/stencil image.
    pub fn clear_depth_stencil_image(
        &mut self,
        image: Id<Image>,
        regions: impl IntoIterator<Item = ImageSubresourceRange>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_outside_render_pass(&["VUID-vkCmdClearDepthStencilImage-renderpass"])?;
        self.add_command(
            "clear_depth_stencil_image",
            regions.into_iter().map(|subresource_range| {
                ResourceAccess::image(image, subresource_range, StageAccess::Transfer_TransferWrite)
            }),
        );

        Ok(self)
    }

    /// Blits an image to another image, with scaling and filtering.
    pub fn blit_image(
        &mut self,
        blit_image_info: ImageTransferInfo,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_outside_render_pass(&["VUID-vkCmdBlitImage2-renderpass"])?;
        self.add_image_transfer("blit_image", blit_image_info);

        Ok(self)
    }

    /// Resolves a multisampled image into a single-sampled image.
    pub fn resolve_image(
        &mut self,
        resolve_image_info: ImageTransferInfo,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_outside_render_pass(&["VUID-vkCmdResolveImage2-renderpass"])?;
        self.add_image_transfer("resolve_image", resolve_image_info);

        Ok(self)
    }

    fn add_image_transfer(&mut self, name: &'static str, info: ImageTransferInfo) {
        let ImageTransferInfo {
            src_image,
            src_subresource,
            dst_image,
            dst_subresource,
            _ne: _,
        } = info;

        self.add_command(
            name,
            [
                ResourceAccess::image(
                    src_image,
                    src_subresource,
                    StageAccess::Transfer_TransferRead,
                ),
                ResourceAccess::image(
                    dst_image,
                    dst_subresource,
                    StageAccess::Transfer_TransferWrite,
                ),
            ],
        );
    }

    /// Runs a compute dispatch that makes the given accesses through its descriptors.
    pub fn dispatch(
        &mut self,
        accesses: impl IntoIterator<Item = ResourceAccess>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_outside_render_pass(&["VUID-vkCmdDispatch-renderpass"])?;
        self.add_command("dispatch", accesses);

        Ok(self)
    }

    /// Runs a compute dispatch whose parameters are read from `indirect_buffer`.
    pub fn dispatch_indirect(
        &mut self,
        indirect_buffer: Id<Buffer>,
        indirect_range: Range<DeviceSize>,
        accesses: impl IntoIterator<Item = ResourceAccess>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_outside_render_pass(&["VUID-vkCmdDispatchIndirect-renderpass"])?;
        self.add_command(
            "dispatch_indirect",
            [ResourceAccess::buffer(
                indirect_buffer,
                indirect_range,
                StageAccess::DrawIndirect_IndirectCommandRead,
            )]
            .into_iter()
            .chain(accesses),
        );

        Ok(self)
    }

    /// Draws primitives. Besides the given accesses, the draw accesses the attachments of the
    /// current subpass.
    pub fn draw(
        &mut self,
        accesses: impl IntoIterator<Item = ResourceAccess>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_inside_render_pass(&["VUID-vkCmdDraw-renderpass"])?;
        self.commands.push(Command::Access {
            name: "draw",
            accesses: accesses.into_iter().collect(),
            uses_attachments: true,
            overlap_vuid: None,
        });

        Ok(self)
    }

    /// Draws primitives whose parameters are read from `indirect_buffer`.
    pub fn draw_indirect(
        &mut self,
        indirect_buffer: Id<Buffer>,
        indirect_range: Range<DeviceSize>,
        accesses: impl IntoIterator<Item = ResourceAccess>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_inside_render_pass(&["VUID-vkCmdDrawIndirect-renderpass"])?;

        let accesses = [ResourceAccess::buffer(
            indirect_buffer,
            indirect_range,
            StageAccess::DrawIndirect_IndirectCommandRead,
        )]
        .into_iter()
        .chain(accesses);

        self.commands.push(Command::Access {
            name: "draw_indirect",
            accesses: accesses.collect(),
            uses_attachments: true,
            overlap_vuid: None,
        });

        Ok(self)
    }

    /// Resets queries of a query pool. The results of a query pool are tracked as a buffer with
    /// one byte per query.
    pub fn reset_query_pool(
        &mut self,
        query_pool: Id<Buffer>,
        queries: Range<u32>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_outside_render_pass(&["VUID-vkCmdResetQueryPool-renderpass"])?;
        self.add_command(
            "reset_query_pool",
            [ResourceAccess::buffer(
                query_pool,
                queries.start.into()..queries.end.into(),
                StageAccess::Transfer_TransferWrite,
            )],
        );

        Ok(self)
    }

    /// Writes a timestamp to a query after `stage`.
    pub fn write_timestamp(
        &mut self,
        query_pool: Id<Buffer>,
        query: u32,
        stage: PipelineStages,
    ) -> Result<&mut Self, Box<ValidationError>> {
        if stage.is_empty() {
            return Err(Box::new(ValidationError {
                context: "stage".into(),
                problem: "is empty".into(),
                vuids: &["VUID-vkCmdWriteTimestamp2-stage-03929"],
            }));
        }

        let query = DeviceSize::from(query);
        self.add_command(
            "write_timestamp",
            [ResourceAccess::buffer(
                query_pool,
                query..query + 1,
                StageAccess::Transfer_TransferWrite,
            )],
        );

        Ok(self)
    }

    /// Copies the results of queries to a buffer, `stride` bytes per query.
    pub fn copy_query_pool_results(
        &mut self,
        query_pool: Id<Buffer>,
        queries: Range<u32>,
        dst_buffer: Id<Buffer>,
        dst_offset: DeviceSize,
        stride: DeviceSize,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_outside_render_pass(&["VUID-vkCmdCopyQueryPoolResults-renderpass"])?;

        let count = DeviceSize::from(queries.end.saturating_sub(queries.start));
        self.add_command(
            "copy_query_pool_results",
            [
                ResourceAccess::buffer(
                    query_pool,
                    queries.start.into()..queries.end.into(),
                    StageAccess::Transfer_TransferRead,
                ),
                ResourceAccess::buffer(
                    dst_buffer,
                    dst_offset..dst_offset.saturating_add(count.saturating_mul(stride)),
                    StageAccess::Transfer_TransferWrite,
                ),
            ],
        );

        Ok(self)
    }

    /// Records an arbitrary command that makes the given accesses.
    pub fn access(
        &mut self,
        name: &'static str,
        accesses: impl IntoIterator<Item = ResourceAccess>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.add_command(name, accesses);

        Ok(self)
    }

    /// Inserts a pipeline barrier.
    pub fn pipeline_barrier(
        &mut self,
        dependency_info: DependencyInfo,
    ) -> Result<&mut Self, Box<ValidationError>> {
        if dependency_info.is_empty() {
            return Ok(self);
        }

        self.commands
            .push(Command::PipelineBarrier { dependency_info });

        Ok(self)
    }

    /// Sets an event once the commands before it have completed `stages`.
    pub fn set_event(
        &mut self,
        event: Id<Event>,
        stages: PipelineStages,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_outside_render_pass(&["VUID-vkCmdSetEvent2-renderpass"])?;
        self.validate_event_stages(stages, &["VUID-vkCmdSetEvent-stageMask-01149"])?;
        self.commands.push(Command::SetEvent { event, stages });

        Ok(self)
    }

    /// Resets an event once the commands before it have completed `stages`.
    pub fn reset_event(
        &mut self,
        event: Id<Event>,
        stages: PipelineStages,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_outside_render_pass(&["VUID-vkCmdResetEvent2-renderpass"])?;
        self.validate_event_stages(stages, &["VUID-vkCmdResetEvent-stageMask-01153"])?;
        self.commands.push(Command::ResetEvent { event, stages });

        Ok(self)
    }

    fn validate_event_stages(
        &self,
        stages: PipelineStages,
        host_vuids: &'static [&'static str],
    ) -> Result<(), Box<ValidationError>> {
        if stages.intersects(PipelineStages::HOST) {
            return Err(Box::new(ValidationError {
                context: "stages".into(),
                problem: "contains `PipelineStages::HOST`".into(),
                vuids: host_vuids,
            }));
        }

        Ok(())
    }

    /// Waits for events to be set, then applies the barriers of `dependency_info`. The source
    /// stages of the barriers must be the stages the events were set with.
    pub fn wait_events(
        &mut self,
        events: impl IntoIterator<Item = Id<Event>>,
        dependency_info: DependencyInfo,
    ) -> Result<&mut Self, Box<ValidationError>> {
        let events: SmallVec<[Id<Event>; 2]> = events.into_iter().collect();

        if events.is_empty() {
            return Err(Box::new(ValidationError {
                context: "events".into(),
                problem: "is empty".into(),
                vuids: &["VUID-vkCmdWaitEvents-eventCount-arraylength"],
            }));
        }

        self.commands.push(Command::WaitEvents {
            events,
            dependency_info,
        });

        Ok(self)
    }

    /// Begins a render pass instance using the given image views as attachments, and enters its
    /// first subpass.
    pub fn begin_render_pass(
        &mut self,
        render_pass: Arc<RenderPass>,
        attachments: Vec<ImageView>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        if self.level != CommandBufferLevel::Primary {
            return Err(Box::new(ValidationError {
                problem: "this command buffer is not a primary command buffer".into(),
                vuids: &["VUID-vkCmdBeginRenderPass2-bufferlevel"],
                ..Default::default()
            }));
        }

        self.validate_outside_render_pass(&["VUID-vkCmdBeginRenderPass2-renderpass"])?;

        if attachments.len() != render_pass.create_info().attachments.len() {
            return Err(Box::new(ValidationError {
                context: "attachments".into(),
                problem: "the number of attachments is not equal to the number of attachments \
                    of the render pass"
                    .into(),
                vuids: &["VUID-VkFramebufferCreateInfo-attachmentCount-00876"],
            }));
        }

        self.render_pass = Some(RenderPassState {
            render_pass: render_pass.clone(),
            subpass: 0,
            begun: true,
        });
        self.commands.push(Command::BeginRenderPass {
            render_pass,
            attachments,
        });

        Ok(self)
    }

    /// Ends the current subpass and enters the next one.
    pub fn next_subpass(&mut self) -> Result<&mut Self, Box<ValidationError>> {
        let Some(render_pass_state) = self.render_pass.as_mut().filter(|state| state.begun)
        else {
            return Err(Box::new(ValidationError {
                problem: "a render pass instance begun in this command buffer is not active"
                    .into(),
                vuids: &["VUID-vkCmdNextSubpass2-renderpass"],
                ..Default::default()
            }));
        };

        if render_pass_state.subpass + 1 >= render_pass_state.render_pass.subpass_count() {
            return Err(Box::new(ValidationError {
                problem: "the current subpass is the last subpass of the render pass".into(),
                vuids: &["VUID-vkCmdNextSubpass2-None-03102"],
                ..Default::default()
            }));
        }

        render_pass_state.subpass += 1;
        self.commands.push(Command::NextSubpass);

        Ok(self)
    }

    /// Ends the render pass instance.
    pub fn end_render_pass(&mut self) -> Result<&mut Self, Box<ValidationError>> {
        let Some(render_pass_state) = self.render_pass.as_ref().filter(|state| state.begun)
        else {
            return Err(Box::new(ValidationError {
                problem: "a render pass instance begun in this command buffer is not active"
                    .into(),
                vuids: &["VUID-vkCmdEndRenderPass2-renderpass"],
                ..Default::default()
            }));
        };

        if render_pass_state.subpass + 1 != render_pass_state.render_pass.subpass_count() {
            return Err(Box::new(ValidationError {
                problem: "the current subpass is not the last subpass of the render pass".into(),
                vuids: &["VUID-vkCmdEndRenderPass2-None-03103"],
                ..Default::default()
            }));
        }

        self.render_pass = None;
        self.commands.push(Command::EndRenderPass);

        Ok(self)
    }

    /// Executes secondary command buffers as part of this one.
    pub fn execute_commands(
        &mut self,
        command_buffers: impl IntoIterator<Item = Arc<CommandBuffer>>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        if self.level != CommandBufferLevel::Primary {
            return Err(Box::new(ValidationError {
                problem: "this command buffer is not a primary command buffer".into(),
                vuids: &["VUID-vkCmdExecuteCommands-bufferlevel"],
                ..Default::default()
            }));
        }

        let command_buffers: SmallVec<[Arc<CommandBuffer>; 1]> =
            command_buffers.into_iter().collect();

        for (command_buffer_index, command_buffer) in command_buffers.iter().enumerate() {
            let context = || format!("command_buffers[{}]", command_buffer_index);

            if command_buffer.level != CommandBufferLevel::Secondary {
                return Err(Box::new(ValidationError {
                    context: context().into(),
                    problem: "is not a secondary command buffer".into(),
                    vuids: &["VUID-vkCmdExecuteCommands-pCommandBuffers-00088"],
                }));
            }

            let inherited = command_buffer
                .inheritance_info
                .as_ref()
                .and_then(|info| info.render_pass.as_ref());

            match (&self.render_pass, inherited) {
                (None, None) => {}
                (Some(state), Some(inherited)) => {
                    if !Arc::ptr_eq(&state.render_pass, &inherited.render_pass)
                        || state.subpass != inherited.subpass
                    {
                        return Err(Box::new(ValidationError {
                            context: context().into(),
                            problem: "was not recorded for the current subpass of the active \
                                render pass instance"
                                .into(),
                            vuids: &["VUID-vkCmdExecuteCommands-pCommandBuffers-06019"],
                        }));
                    }
                }
                (Some(_), None) => {
                    return Err(Box::new(ValidationError {
                        context: context().into(),
                        problem: "was not recorded to be executed inside a render pass \
                            instance, but a render pass instance is active"
                            .into(),
                        vuids: &["VUID-vkCmdExecuteCommands-pCommandBuffers-00096"],
                    }));
                }
                (None, Some(_)) => {
                    return Err(Box::new(ValidationError {
                        context: context().into(),
                        problem: "was recorded to be executed inside a render pass instance, but \
                            no render pass instance is active"
                            .into(),
                        vuids: &["VUID-vkCmdExecuteCommands-pCommandBuffers-00100"],
                    }));
                }
            }
        }

        self.commands
            .push(Command::ExecuteCommands { command_buffers });

        Ok(self)
    }

    /// Ends recording.
    pub fn end(self) -> Result<Arc<CommandBuffer>, Box<ValidationError>> {
        if self.render_pass.as_ref().is_some_and(|state| state.begun) {
            return Err(Box::new(ValidationError {
                problem: "a render pass instance is still active".into(),
                vuids: &["VUID-vkEndCommandBuffer-commandBuffer-00060"],
                ..Default::default()
            }));
        }

        Ok(Arc::new(CommandBuffer {
            level: self.level,
            queue_family_index: self.queue_family_index,
            inheritance_info: self.inheritance_info,
            commands: self.commands,
        }))
    }
}

/// A command buffer that has finished recording.
#[derive(Debug)]
pub struct CommandBuffer {
    level: CommandBufferLevel,
    queue_family_index: u32,
    inheritance_info: Option<CommandBufferInheritanceInfo>,
    pub(crate) commands: Vec<Command>,
}

impl CommandBuffer {
    /// Returns the level of the command buffer.
    #[inline]
    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    /// Returns the queue family the command buffer was recorded for.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Returns the inheritance info of a secondary command buffer.
    #[inline]
    pub fn inheritance_info(&self) -> Option<&CommandBufferInheritanceInfo> {
        self.inheritance_info.as_ref()
    }

    /// Returns the number of recorded commands.
    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Returns every storage location the command buffer, and the secondary command buffers it
    /// executes, name: the accesses of commands, the resources of barriers and the attachments
    /// of render pass instances.
    pub(crate) fn locations(&self) -> Vec<StorageLocation> {
        let mut locations = Vec::new();

        for command in &self.commands {
            match command {
                Command::Access { accesses, .. } => {
                    locations.extend(accesses.iter().map(|access| access.location.clone()));
                }
                Command::PipelineBarrier { dependency_info }
                | Command::WaitEvents {
                    dependency_info, ..
                } => {
                    let DependencyInfo {
                        buffer_memory_barriers,
                        image_memory_barriers,
                        ..
                    } = dependency_info;

                    locations.extend(buffer_memory_barriers.iter().map(|barrier| {
                        StorageLocation::buffer(barrier.buffer, barrier.range.clone())
                    }));
                    locations.extend(image_memory_barriers.iter().map(|barrier| {
                        StorageLocation::image(barrier.image, barrier.subresource_range.clone())
                    }));
                }
                Command::BeginRenderPass { attachments, .. } => {
                    locations.extend(attachments.iter().map(ImageView::location));
                }
                Command::ExecuteCommands { command_buffers } => {
                    for command_buffer in command_buffers {
                        locations.extend(command_buffer.locations());
                    }
                }
                Command::SetEvent { .. }
                | Command::ResetEvent { .. }
                | Command::NextSubpass
                | Command::EndRenderPass => {}
            }
        }

        locations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        render_pass::{
            AttachmentDescription, AttachmentReference, RenderPassCreateInfo, SubpassDescription,
        },
        sync::{BufferMemoryBarrier, ImageLayout},
    };

    // One color attachment, written by `subpass_count` subpasses in a row.
    fn render_pass(subpass_count: usize) -> Arc<RenderPass> {
        RenderPass::new(RenderPassCreateInfo {
            attachments: vec![AttachmentDescription {
                initial_layout: ImageLayout::General,
                final_layout: ImageLayout::General,
                ..Default::default()
            }],
            subpasses: vec![
                SubpassDescription {
                    color_attachments: vec![Some(AttachmentReference::new(
                        0,
                        ImageLayout::General,
                    ))],
                    ..Default::default()
                };
                subpass_count
            ],
            ..Default::default()
        })
        .unwrap()
    }

    fn inside(render_pass: &Arc<RenderPass>, subpass: u32) -> CommandBufferInheritanceInfo {
        CommandBufferInheritanceInfo {
            render_pass: Some(CommandBufferInheritanceRenderPassInfo::subpass(
                render_pass.clone(),
                subpass,
            )),
            ..Default::default()
        }
    }

    fn secondary(inheritance_info: CommandBufferInheritanceInfo) -> Arc<CommandBuffer> {
        RecordingCommandBuffer::secondary(0, inheritance_info)
            .unwrap()
            .end()
            .unwrap()
    }

    fn begun(render_pass: &Arc<RenderPass>) -> RecordingCommandBuffer {
        let mut builder = RecordingCommandBuffer::primary(0);
        builder
            .begin_render_pass(render_pass.clone(), vec![ImageView::whole(Id::new(0))])
            .unwrap();

        builder
    }

    #[test]
    fn execute_commands_levels() {
        let primary = RecordingCommandBuffer::primary(0).end().unwrap();
        let mut builder = RecordingCommandBuffer::primary(0);
        assert_eq!(
            builder.execute_commands([primary]).unwrap_err().vuids,
            &["VUID-vkCmdExecuteCommands-pCommandBuffers-00088"],
        );

        let mut builder = RecordingCommandBuffer::secondary(0, Default::default()).unwrap();
        assert_eq!(
            builder
                .execute_commands([secondary(Default::default())])
                .unwrap_err()
                .vuids,
            &["VUID-vkCmdExecuteCommands-bufferlevel"],
        );

        let mut builder = RecordingCommandBuffer::primary(0);
        builder
            .execute_commands([secondary(Default::default())])
            .unwrap();
        let command_buffer = builder.end().unwrap();
        assert_eq!(command_buffer.len(), 1);
        assert_eq!(command_buffer.level(), CommandBufferLevel::Primary);
    }

    #[test]
    fn execute_commands_render_pass_inheritance() {
        let other_render_pass = render_pass(2);
        let render_pass = render_pass(2);

        let mut builder = RecordingCommandBuffer::primary(0);
        assert_eq!(
            builder
                .execute_commands([secondary(inside(&render_pass, 0))])
                .unwrap_err()
                .vuids,
            &["VUID-vkCmdExecuteCommands-pCommandBuffers-00100"],
        );

        let mut builder = begun(&render_pass);
        assert_eq!(
            builder
                .execute_commands([secondary(Default::default())])
                .unwrap_err()
                .vuids,
            &["VUID-vkCmdExecuteCommands-pCommandBuffers-00096"],
        );
        assert_eq!(
            builder
                .execute_commands([secondary(inside(&render_pass, 1))])
                .unwrap_err()
                .vuids,
            &["VUID-vkCmdExecuteCommands-pCommandBuffers-06019"],
        );
        assert_eq!(
            builder
                .execute_commands([secondary(inside(&other_render_pass, 0))])
                .unwrap_err()
                .vuids,
            &["VUID-vkCmdExecuteCommands-pCommandBuffers-06019"],
        );

        builder
            .execute_commands([secondary(inside(&render_pass, 0))])
            .unwrap()
            .next_subpass()
            .unwrap()
            .execute_commands([secondary(inside(&render_pass, 1))])
            .unwrap()
            .end_render_pass()
            .unwrap();
        assert_eq!(builder.end().unwrap().len(), 5);
    }

    #[test]
    fn secondary_inherits_a_subpass() {
        let render_pass = render_pass(1);

        assert_eq!(
            RecordingCommandBuffer::secondary(0, inside(&render_pass, 1))
                .unwrap_err()
                .vuids,
            &["VUID-VkCommandBufferInheritanceInfo-commandBuffer-06001"],
        );

        // Draws are allowed, but the inherited instance cannot be left.
        let mut builder = RecordingCommandBuffer::secondary(0, inside(&render_pass, 0)).unwrap();
        builder.draw([]).unwrap();
        assert_eq!(
            builder.fill_buffer(Id::new(0), 0..4).unwrap_err().vuids,
            &["VUID-vkCmdFillBuffer-renderpass"],
        );
        assert_eq!(
            builder.end_render_pass().unwrap_err().vuids,
            &["VUID-vkCmdEndRenderPass2-renderpass"],
        );
        assert!(builder.end().is_ok());
    }

    #[test]
    fn subpass_bounds() {
        let render_pass = render_pass(2);

        let mut builder = begun(&render_pass);
        assert_eq!(
            builder.end_render_pass().unwrap_err().vuids,
            &["VUID-vkCmdEndRenderPass2-None-03103"],
        );
        builder.next_subpass().unwrap();
        assert_eq!(
            builder.next_subpass().unwrap_err().vuids,
            &["VUID-vkCmdNextSubpass2-None-03102"],
        );
        assert_eq!(
            builder.end().unwrap_err().vuids,
            &["VUID-vkEndCommandBuffer-commandBuffer-00060"],
        );

        let mut builder = RecordingCommandBuffer::primary(0);
        assert_eq!(
            builder.next_subpass().unwrap_err().vuids,
            &["VUID-vkCmdNextSubpass2-renderpass"],
        );
        assert_eq!(
            builder.draw([]).unwrap_err().vuids,
            &["VUID-vkCmdDraw-renderpass"],
        );
    }

    #[test]
    fn locations_include_barriers_and_attachments() {
        let render_pass = render_pass(1);
        let buffer = Id::new(1);
        let image = Id::new(2);

        let mut inner = RecordingCommandBuffer::secondary(0, Default::default()).unwrap();
        inner
            .pipeline_barrier(DependencyInfo {
                buffer_memory_barriers: smallvec![BufferMemoryBarrier {
                    range: 0..16,
                    ..BufferMemoryBarrier::buffer(buffer)
                }],
                ..Default::default()
            })
            .unwrap();

        let mut builder = RecordingCommandBuffer::primary(0);
        builder
            .execute_commands([inner.end().unwrap()])
            .unwrap()
            .begin_render_pass(render_pass, vec![ImageView::whole(image)])
            .unwrap()
            .end_render_pass()
            .unwrap();

        assert_eq!(
            builder.end().unwrap().locations(),
            vec![
                StorageLocation::buffer(buffer, 0..16),
                StorageLocation::image(image, ImageSubresourceRange::whole()),
            ],
        );
    }
}
