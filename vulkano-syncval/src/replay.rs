//! Replays recorded commands against an access context.

use crate::{
    access::{AccessContext, RacingPeer, ResourceUse},
    command_buffer::{Command, CommandBuffer, ResourceAccess},
    event::{Event, EventStates, EventUsageError},
    position::{LogicalPosition, ResourceUseTag},
    render_pass::{ImageView, RenderPass, RenderPassReplay},
    report::{Hazard, Report, UsageError},
    resource::{ResourceKey, Resources, StorageLocation},
    sync::{
        AccessFlags, BarrierSet, DependencyInfo, PipelineStages, ScopedBarrier, StageAccess,
        SyncScope, Synchronization,
    },
    Id,
};
use smallvec::{smallvec, SmallVec};
use std::{ops::Range, sync::Arc};
use tracing::{debug, trace};

// An access of a command, resolved to the linear ranges of its resource.
struct ResolvedAccess {
    location: StorageLocation,
    key: ResourceKey,
    ranges: SmallVec<[Range<u64>; 4]>,
    access: StageAccess,
}

/// Replays the commands of command buffers in order, reporting every hazard and every misuse of
/// events it finds.
pub(crate) struct CommandBufferReplay<'a> {
    resources: &'a Resources,
    events: &'a mut EventStates,
    context: &'a mut AccessContext,
    racing_peers: &'a [RacingPeer<'a>],
    next_tag: &'a mut ResourceUseTag,
    reports: &'a mut Vec<Report>,
    queue_family_index: u32,
    render_pass: Option<RenderPassReplay>,
}

impl<'a> CommandBufferReplay<'a> {
    pub(crate) fn new(
        resources: &'a Resources,
        events: &'a mut EventStates,
        context: &'a mut AccessContext,
        racing_peers: &'a [RacingPeer<'a>],
        next_tag: &'a mut ResourceUseTag,
        reports: &'a mut Vec<Report>,
        queue_family_index: u32,
    ) -> Self {
        CommandBufferReplay {
            resources,
            events,
            context,
            racing_peers,
            next_tag,
            reports,
            queue_family_index,
            render_pass: None,
        }
    }

    /// Replays all commands of a primary command buffer. `position` gives the queue, submission,
    /// batch and command buffer index the commands are attributed to.
    pub(crate) fn replay(&mut self, command_buffer: &CommandBuffer, position: LogicalPosition) {
        for (command_index, command) in command_buffer.commands.iter().enumerate() {
            let position = LogicalPosition {
                command: command_index as u32,
                secondary_command: None,
                ..position
            };

            if let Command::ExecuteCommands { command_buffers } = command {
                let secondary_commands = command_buffers
                    .iter()
                    .flat_map(|command_buffer| command_buffer.commands.iter());

                for (secondary_index, secondary_command) in secondary_commands.enumerate() {
                    self.replay_command(
                        secondary_command,
                        LogicalPosition {
                            secondary_command: Some(secondary_index as u32),
                            ..position
                        },
                    );
                }
            } else {
                self.replay_command(command, position);
            }
        }

        self.context.coalesce();
    }

    fn replay_command(&mut self, command: &Command, position: LogicalPosition) {
        let position = LogicalPosition {
            subpass: self.render_pass.as_ref().map(|render_pass| render_pass.subpass),
            ..position
        };
        let name = command.name();

        match command {
            Command::Access {
                accesses,
                uses_attachments,
                overlap_vuid,
                ..
            } => {
                let used = self.next_use(position, name);
                self.record_accesses(accesses, *uses_attachments, *overlap_vuid, used);
            }
            Command::PipelineBarrier { dependency_info } => {
                let used = self.next_use(position, name);
                self.pipeline_barrier(dependency_info, used);
            }
            &Command::SetEvent { event, stages } => {
                let used = self.next_use(position, name);
                self.with_event(event, used, |event| event.set(stages, used.tag));
            }
            &Command::ResetEvent { event, stages } => {
                let used = self.next_use(position, name);
                self.with_event(event, used, |event| event.reset(stages));
            }
            Command::WaitEvents {
                events,
                dependency_info,
            } => {
                let used = self.next_use(position, name);
                self.wait_events(events, dependency_info, used);
            }
            Command::BeginRenderPass {
                render_pass,
                attachments,
            } => {
                self.begin_render_pass(render_pass, attachments, position);
            }
            Command::NextSubpass => self.next_subpass(position),
            Command::EndRenderPass => self.end_render_pass(position),
            Command::ExecuteCommands { .. } => {
                debug!("skipping nested `execute_commands`");
            }
        }
    }

    fn next_use(&mut self, position: LogicalPosition, command_name: &'static str) -> ResourceUse {
        let tag = *self.next_tag;
        *self.next_tag += 1;

        ResourceUse {
            tag,
            position,
            command_name,
        }
    }

    fn report_usage(&mut self, used: ResourceUse, error: EventUsageError) {
        self.reports.push(Report::Usage(UsageError {
            position: used.position,
            command_name: used.command_name,
            problem: error.problem,
            vuid: error.vuid,
        }));
    }

    fn current_context(&self) -> &AccessContext {
        match &self.render_pass {
            Some(render_pass) => render_pass.context(),
            None => &*self.context,
        }
    }

    fn current_context_mut(&mut self) -> &mut AccessContext {
        match &mut self.render_pass {
            Some(render_pass) => render_pass.context_mut(),
            None => &mut *self.context,
        }
    }

    fn resolve_location(
        &self,
        location: &StorageLocation,
        access: StageAccess,
    ) -> Option<ResolvedAccess> {
        let key = location.key();

        if self.resources.is_gone(key) {
            debug!(?key, "skipping access to a destroyed resource");
            return None;
        }

        let ranges = self.resources.iter_ranges(location);

        if ranges.is_empty() {
            return None;
        }

        Some(ResolvedAccess {
            location: location.clone(),
            key,
            ranges,
            access,
        })
    }

    // Checks an access against the accesses that are not ordered with it: those of earlier
    // subpasses that run concurrently, and those of racing peers.
    fn detect_racing_hazard(
        &self,
        key: ResourceKey,
        ranges: &[Range<u64>],
        access: StageAccess,
        used: &ResourceUse,
    ) -> Option<Hazard> {
        if let Some(render_pass) = &self.render_pass {
            let begin_tag = render_pass.begin_tag;

            for (subpass, context) in render_pass.async_subpasses() {
                let made_by_subpass = move |other: &ResourceUse| {
                    other.position.subpass == Some(subpass) && other.tag >= begin_tag
                };

                if let Some(hazard) =
                    context.detect_async_hazard(key, ranges, access, used, &made_by_subpass)
                {
                    return Some(hazard);
                }
            }
        }

        self.racing_peers.iter().find_map(|peer| {
            peer.context
                .detect_async_hazard(key, ranges, access, used, peer.filter)
        })
    }

    fn detect_hazard(
        &self,
        key: ResourceKey,
        ranges: &[Range<u64>],
        access: StageAccess,
        used: &ResourceUse,
    ) -> Option<Hazard> {
        self.current_context()
            .detect_hazard(key, ranges, access, used)
            .or_else(|| self.detect_racing_hazard(key, ranges, access, used))
    }

    fn record_accesses(
        &mut self,
        accesses: &[ResourceAccess],
        uses_attachments: bool,
        overlap_vuid: Option<&'static str>,
        used: ResourceUse,
    ) {
        let mut resolved: SmallVec<[ResolvedAccess; 8]> = accesses
            .iter()
            .filter_map(|access| self.resolve_location(&access.location, access.access))
            .collect();

        let mut attachment_locations: SmallVec<[StorageLocation; 4]> = SmallVec::new();

        if uses_attachments {
            if let Some(render_pass) = &self.render_pass {
                let draw_accesses = render_pass.render_pass.draw_accesses(render_pass.subpass);

                for (attachment, access) in draw_accesses {
                    let location = &render_pass.attachments[attachment as usize];

                    if let Some(access) = self.resolve_location(location, access) {
                        attachment_locations.push(access.location.clone());
                        resolved.push(access);
                    }
                }
            }
        }

        if let Some(vuid) = overlap_vuid {
            let overlapping = resolved.iter().filter(|a| a.access.is_read()).any(|read| {
                resolved
                    .iter()
                    .filter(|a| a.access.is_write())
                    .any(|write| read.location.overlaps(&write.location))
            });

            if overlapping {
                self.reports.push(Report::Usage(UsageError {
                    position: used.position,
                    command_name: used.command_name,
                    problem: "the source and destination regions overlap in memory".into(),
                    vuid,
                }));
            }
        }

        // All accesses of a command are checked before any is recorded, so that a command does
        // not conflict with itself.
        for access in &resolved {
            if let Some(hazard) =
                self.detect_hazard(access.key, &access.ranges, access.access, &used)
            {
                self.reports.push(Report::Hazard(hazard));
            }
        }

        let resources = self.resources;
        let context = self.current_context_mut();

        for access in &resolved {
            context.update_access(resources, access.key, &access.ranges, access.access, used);
        }

        self.order_attachments(attachment_locations, used);
    }

    // Attachment accesses within a subpass are ordered by rasterization order, so they are made
    // visible to the attachment accesses that follow them. Input attachment reads are not.
    fn order_attachments(
        &mut self,
        locations: impl IntoIterator<Item = StorageLocation>,
        used: ResourceUse,
    ) {
        let attachment_stages = PipelineStages::EARLY_FRAGMENT_TESTS
            | PipelineStages::LATE_FRAGMENT_TESTS
            | PipelineStages::COLOR_ATTACHMENT_OUTPUT;
        let attachment_access = AccessFlags::COLOR_ATTACHMENT_READ
            | AccessFlags::COLOR_ATTACHMENT_WRITE
            | AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        let scope = SyncScope::new(
            attachment_stages | PipelineStages::FRAGMENT_SHADER,
            attachment_access | AccessFlags::INPUT_ATTACHMENT_READ,
            attachment_stages,
            attachment_access,
        );

        let barrier_set = BarrierSet {
            barriers: locations
                .into_iter()
                .map(|location| ScopedBarrier {
                    scope,
                    location: Some(location),
                    layout_transition: false,
                    ownership_transfer: None,
                    tag_limit: None,
                })
                .collect(),
        };

        if barrier_set.barriers.is_empty() {
            return;
        }

        let resources = self.resources;
        self.current_context_mut()
            .apply_barriers(resources, &barrier_set, used);
    }

    // Checks the layout transitions of `barrier_set`, then applies it to the current context.
    fn apply_barrier_set(&mut self, barrier_set: &BarrierSet, used: ResourceUse) {
        for barrier in &barrier_set.barriers {
            if !barrier.layout_transition {
                continue;
            }

            let Some(location) = &barrier.location else {
                continue;
            };
            let Some(resolved) =
                self.resolve_location(location, StageAccess::ImageLayoutTransition)
            else {
                continue;
            };

            let hazard = barrier
                .checks_source_scope()
                .then(|| {
                    self.current_context().detect_barrier_hazard(
                        resolved.key,
                        &resolved.ranges,
                        &barrier.scope,
                        barrier.tag_limit,
                        0,
                        &used,
                    )
                })
                .flatten()
                .or_else(|| {
                    self.detect_racing_hazard(
                        resolved.key,
                        &resolved.ranges,
                        StageAccess::ImageLayoutTransition,
                        &used,
                    )
                });

            if let Some(hazard) = hazard {
                self.reports.push(Report::Hazard(hazard));
            }
        }

        let resources = self.resources;
        self.current_context_mut()
            .apply_barriers(resources, barrier_set, used);
    }

    fn pipeline_barrier(&mut self, dependency_info: &DependencyInfo, used: ResourceUse) {
        let barrier_set = Synchronization::PipelineBarrier {
            dependency_info,
            queue_family_index: self.queue_family_index,
        }
        .resolve();

        self.apply_barrier_set(&barrier_set, used);

        let (src_exec, dst_exec) = barrier_set.exec_scopes();
        self.events.apply_barrier(src_exec, dst_exec);
    }

    fn with_event(
        &mut self,
        event: Id<Event>,
        used: ResourceUse,
        f: impl FnOnce(&mut Event) -> Result<(), EventUsageError>,
    ) {
        let Some(event_state) = self.events.get_mut(event) else {
            debug!(?event, "skipping command on a destroyed event");
            return;
        };

        if let Err(err) = f(event_state) {
            self.report_usage(used, err);
        }
    }

    fn wait_events(
        &mut self,
        events: &[Id<Event>],
        dependency_info: &DependencyInfo,
        used: ResourceUse,
    ) {
        let dst_stages = dependency_info.dst_stages();
        let mut waits: SmallVec<[(PipelineStages, ResourceUseTag); 2]> = SmallVec::new();
        let mut errors: SmallVec<[EventUsageError; 1]> = SmallVec::new();

        for &event in events {
            let Some(event_state) = self.events.get_mut(event) else {
                debug!(?event, "skipping wait on a destroyed event");
                continue;
            };

            match event_state.wait(dst_stages) {
                Ok(set) => waits.push(set),
                Err(err) => errors.push(err),
            }
        }

        for err in errors {
            self.report_usage(used, err);
        }

        if waits.is_empty() {
            return;
        }

        let set_stages = waits
            .iter()
            .fold(PipelineStages::empty(), |stages, &(set_stages, _)| {
                stages | set_stages
            });

        if set_stages != dependency_info.src_stages() {
            self.report_usage(
                used,
                EventUsageError {
                    problem: format!(
                        "the source stages of the barriers ({:?}) are not equal to the union of \
                        the stages the events were set with ({:?})",
                        dependency_info.src_stages(),
                        set_stages,
                    )
                    .into(),
                    vuid: "VUID-vkCmdWaitEvents-srcStageMask-01158",
                },
            );
        }

        let mut barrier_set = BarrierSet::default();

        for (set_stages, set_tag) in waits {
            barrier_set.barriers.extend(
                Synchronization::EventWait {
                    dependency_info,
                    set_stages,
                    set_tag,
                    queue_family_index: self.queue_family_index,
                }
                .resolve()
                .barriers,
            );
        }

        self.apply_barrier_set(&barrier_set, used);
    }

    fn begin_render_pass(
        &mut self,
        render_pass: &Arc<RenderPass>,
        attachments: &[ImageView],
        position: LogicalPosition,
    ) {
        let used = self.next_use(
            LogicalPosition {
                subpass: Some(0),
                ..position
            },
            "begin_render_pass",
        );

        debug!(
            subpasses = render_pass.subpass_count(),
            tag = used.tag,
            "beginning render pass instance",
        );

        self.render_pass = Some(RenderPassReplay::new(
            render_pass.clone(),
            attachments.iter().map(ImageView::location).collect(),
            used.tag,
        ));
        self.enter_subpass(0, used);
    }

    fn next_subpass(&mut self, position: LogicalPosition) {
        let Some(subpass) = self.render_pass.as_ref().map(|render_pass| render_pass.subpass)
        else {
            return;
        };

        let used = self.next_use(position, "next_subpass");
        self.leave_subpass(subpass, used);

        let used = self.next_use(
            LogicalPosition {
                subpass: Some(subpass + 1),
                ..position
            },
            "next_subpass",
        );
        self.enter_subpass(subpass + 1, used);
    }

    fn end_render_pass(&mut self, position: LogicalPosition) {
        let Some(subpass) = self.render_pass.as_ref().map(|render_pass| render_pass.subpass)
        else {
            return;
        };

        let used = self.next_use(position, "end_render_pass");
        self.leave_subpass(subpass, used);

        if let Some(render_pass) = self.render_pass.take() {
            render_pass.finish(self.context);
        }

        debug!(tag = used.tag, "ended render pass instance");
    }

    // Creates the context of `subpass`, then performs the initial layout transitions and the
    // load operations of the attachments it uses first.
    fn enter_subpass(&mut self, subpass: u32, used: ResourceUse) {
        let Some(render_pass) = self.render_pass.as_mut() else {
            return;
        };

        render_pass.enter_subpass(subpass, self.context);
        let operations = render_pass.render_pass.load_operations(subpass);

        for operation in operations {
            let Some(render_pass) = &self.render_pass else {
                return;
            };
            let location = render_pass.attachments[operation.attachment as usize].clone();
            let Some(resolved) =
                self.resolve_location(&location, StageAccess::ImageLayoutTransition)
            else {
                continue;
            };

            if operation.layout_transition {
                let hazard = render_pass
                    .detect_entry_transition_hazard(
                        subpass,
                        self.context,
                        resolved.key,
                        &resolved.ranges,
                        &used,
                    )
                    .or_else(|| {
                        self.detect_racing_hazard(
                            resolved.key,
                            &resolved.ranges,
                            StageAccess::ImageLayoutTransition,
                            &used,
                        )
                    });

                if let Some(hazard) = hazard {
                    self.reports.push(Report::Hazard(hazard));
                }

                trace!(attachment = operation.attachment, "initial layout transition");
                let scope = render_pass.entry_scope(subpass);
                self.apply_attachment_transition(location.clone(), scope, used);
            }

            if let Some(access) = operation.access {
                self.record_load_store(&resolved, access, used);
                self.order_attachments([location], used);
            }
        }
    }

    // Resolves the color attachments of `subpass`, then performs the store operations and the
    // final layout transitions of the attachments it uses last.
    fn leave_subpass(&mut self, subpass: u32, used: ResourceUse) {
        let Some(render_pass) = &self.render_pass else {
            return;
        };

        let resolve_accesses = render_pass.render_pass.resolve_accesses(subpass);
        let resolve_accesses: SmallVec<[ResourceAccess; 4]> = resolve_accesses
            .into_iter()
            .map(|(attachment, access)| ResourceAccess {
                location: render_pass.attachments[attachment as usize].clone(),
                access,
            })
            .collect();

        if !resolve_accesses.is_empty() {
            self.record_accesses(&resolve_accesses, false, None, used);
            self.order_attachments(
                resolve_accesses.into_iter().map(|access| access.location),
                used,
            );
        }

        let Some(render_pass) = &self.render_pass else {
            return;
        };
        let operations = render_pass.render_pass.store_operations(subpass);
        let scope = render_pass.exit_scope(subpass);

        for operation in operations {
            let Some(render_pass) = &self.render_pass else {
                return;
            };
            let location = render_pass.attachments[operation.attachment as usize].clone();
            let Some(resolved) =
                self.resolve_location(&location, StageAccess::ImageLayoutTransition)
            else {
                continue;
            };

            if let Some(access) = operation.access {
                self.record_load_store(&resolved, access, used);
            }

            if operation.layout_transition {
                if let Some(hazard) = self.current_context().detect_barrier_hazard(
                    resolved.key,
                    &resolved.ranges,
                    &scope,
                    None,
                    0,
                    &used,
                ) {
                    self.reports.push(Report::Hazard(hazard));
                }

                trace!(attachment = operation.attachment, "final layout transition");
                self.apply_attachment_transition(location, scope, used);
            }
        }
    }

    fn record_load_store(
        &mut self,
        resolved: &ResolvedAccess,
        access: StageAccess,
        used: ResourceUse,
    ) {
        if let Some(hazard) = self.detect_hazard(resolved.key, &resolved.ranges, access, &used) {
            self.reports.push(Report::Hazard(hazard));
        }

        let resources = self.resources;
        self.current_context_mut().update_access(
            resources,
            resolved.key,
            &resolved.ranges,
            access,
            used,
        );
    }

    fn apply_attachment_transition(
        &mut self,
        location: StorageLocation,
        scope: SyncScope,
        used: ResourceUse,
    ) {
        let barrier_set = BarrierSet {
            barriers: smallvec![ScopedBarrier {
                scope,
                location: Some(location),
                layout_transition: true,
                ownership_transfer: None,
                tag_limit: None,
            }],
        };

        let resources = self.resources;
        self.current_context_mut()
            .apply_barriers(resources, &barrier_set, used);
    }
}
