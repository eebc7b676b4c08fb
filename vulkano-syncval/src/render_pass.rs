//! Render passes and the synchronization between their subpasses.
//!
//! Each subpass of a render pass instance gets its own access context. It starts from the
//! context of the command buffer, seen through the external dependencies of the subpass, merged
//! with the contexts of the earlier subpasses it directly depends on, seen through those
//! dependencies. Subpasses that are not connected by any dependency path run concurrently, so
//! their accesses are checked against each other as racing accesses.

use crate::{
    access::{AccessContext, ResourceUse},
    macros::vulkan_enum,
    position::ResourceUseTag,
    report::Hazard,
    resource::{Image, ImageSubresourceRange, ResourceKey, StorageLocation},
    sync::{
        AccessFlags, ImageLayout, PipelineStages, StageAccess, SyncScope, Synchronization,
    },
    Id, NonExhaustive, ValidationError,
};
use foldhash::HashSet;
use smallvec::SmallVec;
use std::{ops::Range, sync::Arc};

/// Describes the attachments, subpasses and dependencies of a render pass.
#[derive(Clone, Debug)]
pub struct RenderPassCreateInfo {
    /// The attachments available to the subpasses.
    ///
    /// The default value is empty.
    pub attachments: Vec<AttachmentDescription>,

    /// The subpasses of the render pass, in execution order.
    ///
    /// The default value is empty, which must be overridden.
    pub subpasses: Vec<SubpassDescription>,

    /// The dependencies between subpasses, and between subpasses and the commands outside of the
    /// render pass instance.
    ///
    /// The default value is empty.
    pub dependencies: Vec<SubpassDependency>,

    pub _ne: NonExhaustive,
}

impl Default for RenderPassCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            attachments: Vec::new(),
            subpasses: Vec::new(),
            dependencies: Vec::new(),
            _ne: NonExhaustive(()),
        }
    }
}

impl RenderPassCreateInfo {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        let &Self {
            ref attachments,
            ref subpasses,
            ref dependencies,
            _ne: _,
        } = self;

        if subpasses.is_empty() {
            return Err(Box::new(ValidationError {
                context: "subpasses".into(),
                problem: "is empty".into(),
                vuids: &["VUID-VkRenderPassCreateInfo2-subpassCount-arraylength"],
            }));
        }

        for (subpass_index, subpass) in subpasses.iter().enumerate() {
            for (attachment, context) in subpass.attachment_references() {
                if attachment.attachment as usize >= attachments.len() {
                    return Err(Box::new(ValidationError {
                        context: format!("subpasses[{}].{}.attachment", subpass_index, context)
                            .into(),
                        problem: "is not less than the number of attachments".into(),
                        vuids: &["VUID-VkRenderPassCreateInfo2-attachment-03051"],
                    }));
                }
            }

            for (preserve_index, &attachment) in subpass.preserve_attachments.iter().enumerate() {
                if attachment as usize >= attachments.len() {
                    return Err(Box::new(ValidationError {
                        context: format!(
                            "subpasses[{}].preserve_attachments[{}]",
                            subpass_index, preserve_index,
                        )
                        .into(),
                        problem: "is not less than the number of attachments".into(),
                        vuids: &["VUID-VkRenderPassCreateInfo2-attachment-03051"],
                    }));
                }
            }

            if !subpass.color_resolve_attachments.is_empty()
                && subpass.color_resolve_attachments.len() != subpass.color_attachments.len()
            {
                return Err(Box::new(ValidationError {
                    context: format!("subpasses[{}].color_resolve_attachments", subpass_index)
                        .into(),
                    problem: "is not empty, but its length is not equal to the length of \
                        `color_attachments`"
                        .into(),
                    ..Default::default()
                }));
            }
        }

        for (dependency_index, dependency) in dependencies.iter().enumerate() {
            let context = || format!("dependencies[{}]", dependency_index);

            match (dependency.source_subpass, dependency.destination_subpass) {
                (None, None) => {
                    return Err(Box::new(ValidationError {
                        context: context().into(),
                        problem: "`source_subpass` and `destination_subpass` are both `None`"
                            .into(),
                        vuids: &["VUID-VkSubpassDependency2-srcSubpass-03085"],
                    }));
                }
                (Some(source_subpass), Some(destination_subpass))
                    if source_subpass > destination_subpass =>
                {
                    return Err(Box::new(ValidationError {
                        context: context().into(),
                        problem: "`source_subpass` is greater than `destination_subpass`".into(),
                        vuids: &["VUID-VkSubpassDependency2-srcSubpass-03084"],
                    }));
                }
                _ => {}
            }

            if dependency
                .source_subpass
                .is_some_and(|subpass| subpass as usize >= subpasses.len())
            {
                return Err(Box::new(ValidationError {
                    context: format!("{}.source_subpass", context()).into(),
                    problem: "is not less than the number of subpasses".into(),
                    vuids: &["VUID-VkRenderPassCreateInfo2-srcSubpass-02526"],
                }));
            }

            if dependency
                .destination_subpass
                .is_some_and(|subpass| subpass as usize >= subpasses.len())
            {
                return Err(Box::new(ValidationError {
                    context: format!("{}.destination_subpass", context()).into(),
                    problem: "is not less than the number of subpasses".into(),
                    vuids: &["VUID-VkRenderPassCreateInfo2-dstSubpass-02527"],
                }));
            }
        }

        Ok(())
    }
}

vulkan_enum! {
    /// What happens to an attachment at the start of the subpass that first uses it.
    LoadOp = AttachmentLoadOp(i32);

    /// The previous contents are read.
    Load = LOAD,

    /// The contents are cleared, which is a write.
    Clear = CLEAR,

    /// The contents become undefined, which is treated as a write.
    #[default]
    DontCare = DONT_CARE,

    /// The contents are not touched.
    None = NONE_EXT,
}

vulkan_enum! {
    /// What happens to an attachment at the end of the subpass that last uses it.
    StoreOp = AttachmentStoreOp(i32);

    /// The contents are written to memory.
    Store = STORE,

    /// The contents may be written or discarded, which is treated as a write.
    #[default]
    DontCare = DONT_CARE,

    /// The contents are not touched.
    None = NONE,
}

/// Describes an attachment of a render pass.
#[derive(Clone, Debug)]
pub struct AttachmentDescription {
    /// What the implementation should do with the attachment at the start of the subpass that
    /// first uses it. It applies to all aspects of the attachment.
    ///
    /// The default value is [`LoadOp::DontCare`].
    pub load_op: LoadOp,

    /// What the implementation should do with the attachment at the end of the subpass that last
    /// uses it. It applies to all aspects of the attachment.
    ///
    /// The default value is [`StoreOp::DontCare`].
    pub store_op: StoreOp,

    /// The layout that the image is in at the start of the render pass.
    ///
    /// The default value is [`ImageLayout::Undefined`].
    pub initial_layout: ImageLayout,

    /// The layout that the image will be transitioned to at the end of the render pass.
    ///
    /// The default value is [`ImageLayout::Undefined`], which must be overridden.
    pub final_layout: ImageLayout,

    pub _ne: NonExhaustive,
}

impl Default for AttachmentDescription {
    #[inline]
    fn default() -> Self {
        Self {
            load_op: LoadOp::default(),
            store_op: StoreOp::default(),
            initial_layout: ImageLayout::default(),
            final_layout: ImageLayout::default(),
            _ne: NonExhaustive(()),
        }
    }
}

/// A reference from a subpass to an attachment.
#[derive(Clone, Debug)]
pub struct AttachmentReference {
    /// The index of the attachment.
    ///
    /// The default value is `0`.
    pub attachment: u32,

    /// The layout the attachment is in during the subpass.
    ///
    /// The default value is [`ImageLayout::Undefined`], which must be overridden.
    pub layout: ImageLayout,

    pub _ne: NonExhaustive,
}

impl AttachmentReference {
    /// Returns a reference to `attachment` in `layout`.
    #[inline]
    pub fn new(attachment: u32, layout: ImageLayout) -> Self {
        Self {
            attachment,
            layout,
            _ne: NonExhaustive(()),
        }
    }
}

/// Describes one subpass of a render pass.
#[derive(Clone, Debug, Default)]
pub struct SubpassDescription {
    /// The attachments read as input attachments by the fragment shader.
    ///
    /// The default value is empty.
    pub input_attachments: Vec<Option<AttachmentReference>>,

    /// The attachments written as color attachments.
    ///
    /// The default value is empty.
    pub color_attachments: Vec<Option<AttachmentReference>>,

    /// The attachments that the color attachments are resolved to at the end of the subpass. If
    /// not empty, it must have the same length as `color_attachments`.
    ///
    /// The default value is empty.
    pub color_resolve_attachments: Vec<Option<AttachmentReference>>,

    /// The depth/stencil attachment, which is tested and written by draws.
    ///
    /// The default value is `None`.
    pub depth_stencil_attachment: Option<AttachmentReference>,

    /// Attachments that are not used by the subpass, but whose contents must be preserved
    /// through it.
    ///
    /// The default value is empty.
    pub preserve_attachments: Vec<u32>,

    pub _ne: NonExhaustive,
}

impl SubpassDescription {
    fn attachment_references(&self) -> impl Iterator<Item = (&AttachmentReference, &'static str)> {
        let input = self.input_attachments.iter().flatten().map(|r| (r, "input_attachments"));
        let color = self.color_attachments.iter().flatten().map(|r| (r, "color_attachments"));
        let resolve = self
            .color_resolve_attachments
            .iter()
            .flatten()
            .map(|r| (r, "color_resolve_attachments"));
        let depth_stencil = self
            .depth_stencil_attachment
            .iter()
            .map(|r| (r, "depth_stencil_attachment"));

        input.chain(color).chain(resolve).chain(depth_stencil)
    }
}

/// A dependency between two subpasses of a render pass, or between a subpass and the commands
/// outside of the render pass instance.
///
/// `None` as a subpass index specifies an external dependency: on commands submitted before the
/// render pass instance began (for `source_subpass`), or on commands submitted after it ends (for
/// `destination_subpass`). The values must not both be `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubpassDependency {
    /// The index of the subpass that writes the data that `destination_subpass` is going to use.
    ///
    /// The default value is `None`.
    pub source_subpass: Option<u32>,

    /// The index of the subpass that reads the data that `source_subpass` wrote.
    ///
    /// The default value is `None`.
    pub destination_subpass: Option<u32>,

    /// The pipeline stages that must be finished on `source_subpass` before the
    /// `destination_stages` of `destination_subpass` can start.
    ///
    /// The default value is [`PipelineStages::empty()`].
    pub source_stages: PipelineStages,

    /// The pipeline stages of `destination_subpass` that must wait for the `source_stages` of
    /// `source_subpass` to be finished.
    ///
    /// The default value is [`PipelineStages::empty()`].
    pub destination_stages: PipelineStages,

    /// The way `source_subpass` accesses the attachments on which we depend.
    ///
    /// The default value is [`AccessFlags::empty()`].
    pub source_access: AccessFlags,

    /// The way `destination_subpass` accesses the attachments on which we depend.
    ///
    /// The default value is [`AccessFlags::empty()`].
    pub destination_access: AccessFlags,

    /// Whether the dependency is framebuffer-local. It does not change what is validated.
    ///
    /// The default value is `false`.
    pub by_region: bool,

    pub _ne: NonExhaustive,
}

impl Default for SubpassDependency {
    #[inline]
    fn default() -> Self {
        Self {
            source_subpass: None,
            destination_subpass: None,
            source_stages: PipelineStages::empty(),
            destination_stages: PipelineStages::empty(),
            source_access: AccessFlags::empty(),
            destination_access: AccessFlags::empty(),
            by_region: false,
            _ne: NonExhaustive(()),
        }
    }
}

impl SubpassDependency {
    /// Returns the synchronization scope of the dependency.
    #[inline]
    pub fn scope(&self) -> SyncScope {
        SyncScope::new(
            self.source_stages,
            self.source_access,
            self.destination_stages,
            self.destination_access,
        )
    }
}

// How the attachments are used over the subpasses of a render pass.
#[derive(Clone, Debug)]
struct AttachmentUse {
    first_subpass: u32,
    last_subpass: u32,
    first_layout: ImageLayout,
    last_layout: ImageLayout,
    is_depth_stencil: bool,
}

/// A validated render pass, with the dependency graph of its subpasses.
#[derive(Debug)]
pub struct RenderPass {
    create_info: RenderPassCreateInfo,
    attachment_uses: Vec<Option<AttachmentUse>>,
    // For every subpass, the subpasses that are ordered before it by a dependency path.
    predecessors: Vec<HashSet<u32>>,
}

impl RenderPass {
    /// Validates `create_info` and builds the dependency graph of the subpasses.
    pub fn new(create_info: RenderPassCreateInfo) -> Result<Arc<RenderPass>, Box<ValidationError>> {
        create_info
            .validate()
            .map_err(|err| err.add_context("create_info"))?;

        let mut attachment_uses: Vec<Option<AttachmentUse>> =
            vec![None; create_info.attachments.len()];

        for (subpass_index, subpass) in create_info.subpasses.iter().enumerate() {
            let subpass_index = subpass_index as u32;
            let depth_stencil = subpass
                .depth_stencil_attachment
                .iter()
                .map(|reference| (reference, true));
            let others = subpass
                .input_attachments
                .iter()
                .chain(&subpass.color_attachments)
                .chain(&subpass.color_resolve_attachments)
                .flatten()
                .map(|reference| (reference, false));

            for (reference, is_depth_stencil) in others.chain(depth_stencil) {
                let attachment_use = &mut attachment_uses[reference.attachment as usize];

                match attachment_use {
                    Some(attachment_use) => {
                        attachment_use.last_subpass = subpass_index;
                        attachment_use.last_layout = reference.layout;
                        attachment_use.is_depth_stencil |= is_depth_stencil;
                    }
                    None => {
                        *attachment_use = Some(AttachmentUse {
                            first_subpass: subpass_index,
                            last_subpass: subpass_index,
                            first_layout: reference.layout,
                            last_layout: reference.layout,
                            is_depth_stencil,
                        });
                    }
                }
            }

            // Preserved contents are stored after the preserving subpass.
            for &attachment in &subpass.preserve_attachments {
                if let Some(attachment_use) = &mut attachment_uses[attachment as usize] {
                    attachment_use.last_subpass = subpass_index;
                }
            }
        }

        let mut predecessors: Vec<HashSet<u32>> = Vec::with_capacity(create_info.subpasses.len());

        for subpass_index in 0..create_info.subpasses.len() as u32 {
            let mut subpass_predecessors = HashSet::default();

            for dependency in &create_info.dependencies {
                if let (Some(source), Some(destination)) =
                    (dependency.source_subpass, dependency.destination_subpass)
                {
                    if destination == subpass_index && source < subpass_index {
                        subpass_predecessors.insert(source);
                        subpass_predecessors.extend(predecessors[source as usize].iter().copied());
                    }
                }
            }

            predecessors.push(subpass_predecessors);
        }

        Ok(Arc::new(RenderPass {
            create_info,
            attachment_uses,
            predecessors,
        }))
    }

    /// Returns the create info the render pass was created with.
    #[inline]
    pub fn create_info(&self) -> &RenderPassCreateInfo {
        &self.create_info
    }

    /// Returns the number of subpasses.
    #[inline]
    pub fn subpass_count(&self) -> u32 {
        self.create_info.subpasses.len() as u32
    }

    /// Returns whether a dependency path leads from subpass `earlier` to subpass `later`.
    #[inline]
    pub fn is_ordered_before(&self, earlier: u32, later: u32) -> bool {
        self.predecessors
            .get(later as usize)
            .is_some_and(|predecessors| predecessors.contains(&earlier))
    }

    // The dependencies from the commands before the render pass into `subpass`. When there are
    // no explicit ones and the subpass is the first to use an attachment, the implicit one
    // applies.
    fn external_dependencies_into(&self, subpass: u32) -> SmallVec<[SubpassDependency; 2]> {
        let explicit: SmallVec<[SubpassDependency; 2]> = self
            .create_info
            .dependencies
            .iter()
            .filter(|d| d.source_subpass.is_none() && d.destination_subpass == Some(subpass))
            .cloned()
            .collect();

        if !explicit.is_empty() || !self.first_uses(subpass).any(|_| true) {
            return explicit;
        }

        smallvec::smallvec![SubpassDependency {
            source_subpass: None,
            destination_subpass: Some(subpass),
            source_stages: PipelineStages::TOP_OF_PIPE,
            destination_stages: PipelineStages::ALL_COMMANDS,
            source_access: AccessFlags::empty(),
            destination_access: AccessFlags::INPUT_ATTACHMENT_READ
                | AccessFlags::COLOR_ATTACHMENT_READ
                | AccessFlags::COLOR_ATTACHMENT_WRITE
                | AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ..Default::default()
        }]
    }

    // The dependencies from `subpass` to the commands after the render pass.
    fn external_dependencies_out(&self, subpass: u32) -> SmallVec<[SubpassDependency; 2]> {
        let explicit: SmallVec<[SubpassDependency; 2]> = self
            .create_info
            .dependencies
            .iter()
            .filter(|d| d.source_subpass == Some(subpass) && d.destination_subpass.is_none())
            .cloned()
            .collect();

        if !explicit.is_empty() || !self.last_uses(subpass).any(|_| true) {
            return explicit;
        }

        smallvec::smallvec![SubpassDependency {
            source_subpass: Some(subpass),
            destination_subpass: None,
            source_stages: PipelineStages::ALL_COMMANDS,
            destination_stages: PipelineStages::BOTTOM_OF_PIPE,
            source_access: AccessFlags::COLOR_ATTACHMENT_WRITE
                | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            destination_access: AccessFlags::empty(),
            ..Default::default()
        }]
    }

    // The dependencies from earlier subpass `source` directly into `destination`.
    fn dependencies_between(
        &self,
        source: u32,
        destination: u32,
    ) -> SmallVec<[SubpassDependency; 2]> {
        self.create_info
            .dependencies
            .iter()
            .filter(|d| {
                d.source_subpass == Some(source) && d.destination_subpass == Some(destination)
            })
            .cloned()
            .collect()
    }

    fn first_uses(&self, subpass: u32) -> impl Iterator<Item = (u32, &AttachmentUse)> {
        self.attachment_uses
            .iter()
            .enumerate()
            .filter_map(move |(index, attachment_use)| {
                attachment_use
                    .as_ref()
                    .filter(|u| u.first_subpass == subpass)
                    .map(|u| (index as u32, u))
            })
    }

    fn last_uses(&self, subpass: u32) -> impl Iterator<Item = (u32, &AttachmentUse)> {
        self.attachment_uses
            .iter()
            .enumerate()
            .filter_map(move |(index, attachment_use)| {
                attachment_use
                    .as_ref()
                    .filter(|u| u.last_subpass == subpass)
                    .map(|u| (index as u32, u))
            })
    }

    /// Returns the accesses a draw in `subpass` makes to the attachments of the subpass.
    pub(crate) fn draw_accesses(&self, subpass: u32) -> SmallVec<[(u32, StageAccess); 8]> {
        let mut accesses = SmallVec::new();
        let Some(description) = self.create_info.subpasses.get(subpass as usize) else {
            return accesses;
        };

        for reference in description.input_attachments.iter().flatten() {
            accesses.push((
                reference.attachment,
                StageAccess::FragmentShader_InputAttachmentRead,
            ));
        }

        for reference in description.color_attachments.iter().flatten() {
            accesses.push((
                reference.attachment,
                StageAccess::ColorAttachmentOutput_ColorAttachmentWrite,
            ));
        }

        if let Some(reference) = &description.depth_stencil_attachment {
            accesses.push((
                reference.attachment,
                StageAccess::EarlyFragmentTests_DepthStencilAttachmentRead,
            ));
            accesses.push((
                reference.attachment,
                StageAccess::LateFragmentTests_DepthStencilAttachmentWrite,
            ));
        }

        accesses
    }

    /// Returns the reads and writes of resolving the color attachments at the end of `subpass`.
    pub(crate) fn resolve_accesses(&self, subpass: u32) -> SmallVec<[(u32, StageAccess); 4]> {
        let mut accesses = SmallVec::new();
        let Some(description) = self.create_info.subpasses.get(subpass as usize) else {
            return accesses;
        };

        for (color, resolve) in description
            .color_attachments
            .iter()
            .zip(&description.color_resolve_attachments)
        {
            if let (Some(color), Some(resolve)) = (color, resolve) {
                accesses.push((
                    color.attachment,
                    StageAccess::ColorAttachmentOutput_ColorAttachmentRead,
                ));
                accesses.push((
                    resolve.attachment,
                    StageAccess::ColorAttachmentOutput_ColorAttachmentWrite,
                ));
            }
        }

        accesses
    }

    /// Returns the attachments first used in `subpass`, with whether their initial layout
    /// transition happens and the access of their load op.
    pub(crate) fn load_operations(
        &self,
        subpass: u32,
    ) -> SmallVec<[AttachmentOperation; 4]> {
        self.first_uses(subpass)
            .map(|(attachment, attachment_use)| {
                let description = &self.create_info.attachments[attachment as usize];
                let access = match (description.load_op, attachment_use.is_depth_stencil) {
                    (LoadOp::None, _) => None,
                    (LoadOp::Load, false) => {
                        Some(StageAccess::ColorAttachmentOutput_ColorAttachmentRead)
                    }
                    (_, false) => Some(StageAccess::ColorAttachmentOutput_ColorAttachmentWrite),
                    (LoadOp::Load, true) => {
                        Some(StageAccess::EarlyFragmentTests_DepthStencilAttachmentRead)
                    }
                    (_, true) => Some(StageAccess::EarlyFragmentTests_DepthStencilAttachmentWrite),
                };

                AttachmentOperation {
                    attachment,
                    layout_transition: description.initial_layout != attachment_use.first_layout
                        && attachment_use.first_layout != ImageLayout::Undefined,
                    access,
                }
            })
            .collect()
    }

    /// Returns the attachments last used in `subpass`, with the access of their store op and
    /// whether their final layout transition happens.
    pub(crate) fn store_operations(
        &self,
        subpass: u32,
    ) -> SmallVec<[AttachmentOperation; 4]> {
        self.last_uses(subpass)
            .map(|(attachment, attachment_use)| {
                let description = &self.create_info.attachments[attachment as usize];
                let access = match (description.store_op, attachment_use.is_depth_stencil) {
                    (StoreOp::None, _) => None,
                    (_, false) => Some(StageAccess::ColorAttachmentOutput_ColorAttachmentWrite),
                    (_, true) => Some(StageAccess::LateFragmentTests_DepthStencilAttachmentWrite),
                };

                AttachmentOperation {
                    attachment,
                    layout_transition: description.final_layout != attachment_use.last_layout
                        && description.final_layout != ImageLayout::Undefined,
                    access,
                }
            })
            .collect()
    }
}

/// An operation on an attachment at a subpass boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AttachmentOperation {
    pub(crate) attachment: u32,
    pub(crate) layout_transition: bool,
    pub(crate) access: Option<StageAccess>,
}

/// An image view used as an attachment of a render pass instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageView {
    /// The image the view belongs to.
    pub image: Id<Image>,

    /// The subresources of `image` the view selects.
    pub subresource_range: ImageSubresourceRange,
}

impl ImageView {
    /// Returns a view of every subresource of `image`.
    #[inline]
    pub fn whole(image: Id<Image>) -> Self {
        ImageView {
            image,
            subresource_range: ImageSubresourceRange::whole(),
        }
    }

    #[inline]
    pub(crate) fn location(&self) -> StorageLocation {
        StorageLocation::image(self.image, self.subresource_range.clone())
    }
}

/// The state of a render pass instance while it is replayed.
#[derive(Debug)]
pub(crate) struct RenderPassReplay {
    pub(crate) render_pass: Arc<RenderPass>,
    pub(crate) attachments: Vec<StorageLocation>,
    pub(crate) subpass: u32,
    // The access contexts of the subpasses started so far.
    contexts: Vec<AccessContext>,
    pub(crate) begin_tag: ResourceUseTag,
}

impl RenderPassReplay {
    pub(crate) fn new(
        render_pass: Arc<RenderPass>,
        attachments: Vec<StorageLocation>,
        begin_tag: ResourceUseTag,
    ) -> Self {
        RenderPassReplay {
            render_pass,
            attachments,
            subpass: 0,
            contexts: Vec::new(),
            begin_tag,
        }
    }

    /// Creates the context of `subpass` from the command buffer context and the contexts of the
    /// subpasses it depends on.
    pub(crate) fn enter_subpass(&mut self, subpass: u32, external: &AccessContext) {
        let mut context = AccessContext::default();

        let dependencies = self.render_pass.external_dependencies_into(subpass);
        let scopes = Synchronization::SubpassDependencies(&dependencies)
            .resolve()
            .global_scopes();
        context.resolve_from(external, Some(&scopes));

        for (source, source_context) in self.contexts.iter().enumerate() {
            let dependencies = self.render_pass.dependencies_between(source as u32, subpass);

            if dependencies.is_empty() {
                continue;
            }

            let scopes = Synchronization::SubpassDependencies(&dependencies)
                .resolve()
                .global_scopes();
            context.resolve_from(source_context, Some(&scopes));
        }

        self.subpass = subpass;
        self.contexts.push(context);
    }

    /// Returns the union of the scopes of every dependency into `subpass`, which guard its
    /// initial layout transitions.
    pub(crate) fn entry_scope(&self, subpass: u32) -> SyncScope {
        let mut scope = SyncScope::default();

        for dependency in self.render_pass.external_dependencies_into(subpass) {
            scope = scope.union(&dependency.scope());
        }

        for source in 0..subpass {
            for dependency in self.render_pass.dependencies_between(source, subpass) {
                scope = scope.union(&dependency.scope());
            }
        }

        scope
    }

    /// Checks the initial layout transition of an attachment first used in `subpass` against
    /// the command buffer context and the earlier subpasses, each through the dependencies that
    /// lead from it into `subpass`.
    pub(crate) fn detect_entry_transition_hazard(
        &self,
        subpass: u32,
        external: &AccessContext,
        key: ResourceKey,
        ranges: &[Range<u64>],
        used: &ResourceUse,
    ) -> Option<Hazard> {
        let external_scope = self
            .render_pass
            .external_dependencies_into(subpass)
            .iter()
            .fold(SyncScope::default(), |scope, dependency| {
                scope.union(&dependency.scope())
            });

        if let Some(hazard) =
            external.detect_barrier_hazard(key, ranges, &external_scope, None, 0, used)
        {
            return Some(hazard);
        }

        // Only the records made inside the render pass instance; the rest was checked above.
        self.contexts
            .iter()
            .enumerate()
            .take(subpass as usize)
            .find_map(|(source, context)| {
                let dependencies = self.render_pass.dependencies_between(source as u32, subpass);

                if dependencies.is_empty() {
                    return None;
                }

                let scope = dependencies
                    .iter()
                    .fold(SyncScope::default(), |scope, dependency| {
                        scope.union(&dependency.scope())
                    });

                context.detect_barrier_hazard(key, ranges, &scope, None, self.begin_tag, used)
            })
    }

    /// Returns the union of the scopes of the dependencies from `subpass` to the commands after
    /// the render pass, which guard its final layout transitions.
    pub(crate) fn exit_scope(&self, subpass: u32) -> SyncScope {
        self.render_pass
            .external_dependencies_out(subpass)
            .iter()
            .fold(SyncScope::default(), |scope, dependency| {
                scope.union(&dependency.scope())
            })
    }

    /// Returns the context of the current subpass.
    pub(crate) fn context(&self) -> &AccessContext {
        &self.contexts[self.subpass as usize]
    }

    pub(crate) fn context_mut(&mut self) -> &mut AccessContext {
        &mut self.contexts[self.subpass as usize]
    }

    /// Returns the earlier subpasses that run concurrently with the current one.
    pub(crate) fn async_subpasses(&self) -> impl Iterator<Item = (u32, &AccessContext)> {
        let subpass = self.subpass;

        self.contexts
            .iter()
            .enumerate()
            .map(|(index, context)| (index as u32, context))
            .filter(move |&(index, _)| {
                index < subpass && !self.render_pass.is_ordered_before(index, subpass)
            })
    }

    /// Resolves the subpass contexts into the command buffer context through their
    /// dependencies to the commands after the render pass.
    pub(crate) fn finish(self, external: &mut AccessContext) {
        for (subpass, context) in self.contexts.iter().enumerate() {
            let dependencies = self.render_pass.external_dependencies_out(subpass as u32);
            let scopes = Synchronization::SubpassDependencies(&dependencies)
                .resolve()
                .global_scopes();
            external.resolve_from(context, Some(&scopes));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color(attachment: u32) -> Option<AttachmentReference> {
        Some(AttachmentReference::new(
            attachment,
            ImageLayout::ColorAttachmentOptimal,
        ))
    }

    fn dependency(source: u32, destination: u32) -> SubpassDependency {
        SubpassDependency {
            source_subpass: Some(source),
            destination_subpass: Some(destination),
            source_stages: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            destination_stages: PipelineStages::FRAGMENT_SHADER,
            source_access: AccessFlags::COLOR_ATTACHMENT_WRITE,
            destination_access: AccessFlags::INPUT_ATTACHMENT_READ,
            ..Default::default()
        }
    }

    fn diamond() -> Arc<RenderPass> {
        RenderPass::new(RenderPassCreateInfo {
            attachments: vec![AttachmentDescription::default(); 3],
            subpasses: vec![
                SubpassDescription {
                    color_attachments: vec![color(0)],
                    ..Default::default()
                },
                SubpassDescription {
                    color_attachments: vec![color(1)],
                    ..Default::default()
                },
                SubpassDescription {
                    color_attachments: vec![color(2)],
                    ..Default::default()
                },
                SubpassDescription {
                    input_attachments: vec![color(1), color(2)],
                    ..Default::default()
                },
            ],
            dependencies: vec![
                dependency(0, 1),
                dependency(0, 2),
                dependency(1, 3),
                dependency(2, 3),
            ],
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn transitive_order() {
        let render_pass = diamond();
        assert!(render_pass.is_ordered_before(0, 1));
        assert!(render_pass.is_ordered_before(0, 3));
        assert!(render_pass.is_ordered_before(1, 3));
        assert!(!render_pass.is_ordered_before(1, 2));
        assert!(!render_pass.is_ordered_before(3, 0));
    }

    #[test]
    fn attachment_uses() {
        let render_pass = diamond();

        let loads = render_pass.load_operations(1);
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].attachment, 1);
        assert!(loads[0].layout_transition);
        assert_eq!(
            loads[0].access,
            Some(StageAccess::ColorAttachmentOutput_ColorAttachmentWrite),
        );

        // Attachments 1 and 2 are last used by the final subpass.
        let stores = render_pass.store_operations(3);
        let attachments: Vec<_> = stores.iter().map(|op| op.attachment).collect();
        assert_eq!(attachments, vec![1, 2]);
        assert!(stores.iter().all(|op| !op.layout_transition));
    }

    #[test]
    fn implicit_external_dependencies() {
        let render_pass = diamond();

        // Every subpass is the first to use an attachment.
        let into = render_pass.external_dependencies_into(0);
        assert_eq!(into.len(), 1);
        assert_eq!(into[0].source_stages, PipelineStages::TOP_OF_PIPE);
        assert!(render_pass.external_dependencies_into(3).is_empty());

        let out = render_pass.external_dependencies_out(0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].destination_stages, PipelineStages::BOTTOM_OF_PIPE);
        assert!(render_pass.external_dependencies_out(1).is_empty());
    }

    #[test]
    fn invalid_create_infos() {
        let err = RenderPass::new(RenderPassCreateInfo {
            attachments: vec![AttachmentDescription::default()],
            subpasses: vec![SubpassDescription::default(); 2],
            dependencies: vec![SubpassDependency {
                source_subpass: Some(1),
                destination_subpass: Some(0),
                ..Default::default()
            }],
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err.vuids, &["VUID-VkSubpassDependency2-srcSubpass-03084"]);

        let err = RenderPass::new(RenderPassCreateInfo {
            subpasses: vec![SubpassDescription {
                color_attachments: vec![color(1)],
                ..Default::default()
            }],
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err.vuids, &["VUID-VkRenderPassCreateInfo2-attachment-03051"]);

        assert!(RenderPass::new(RenderPassCreateInfo::default()).is_err());
    }

    #[test]
    fn default_attachment_operations() {
        let description = AttachmentDescription::default();
        assert_eq!(description.load_op, LoadOp::DontCare);
        assert_eq!(description.store_op, StoreOp::DontCare);
        assert_eq!(description.initial_layout, ImageLayout::Undefined);
        assert_eq!(LoadOp::default() as i32, ash::vk::AttachmentLoadOp::DONT_CARE.as_raw());
    }
}
