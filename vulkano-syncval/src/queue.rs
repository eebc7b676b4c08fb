//! Queues, semaphores and the validator that ties everything together.
//!
//! Every submission is replayed against the timeline of its queue. The batches of one
//! submission all start from the timeline the queue had before the submission and are not
//! ordered with each other, nor with the batches of other queues, unless a semaphore links
//! them. Accesses that are not ordered with the current batch are checked as racing.

use crate::{
    access::{AccessContext, RacingPeer, ResourceUse},
    command_buffer::{CommandBuffer, CommandBufferLevel},
    event::{Event, EventStates},
    position::{BatchClock, BatchRef, LogicalPosition, ResourceUseTag},
    replay::CommandBufferReplay,
    report::{Report, UsageError},
    resource::{Buffer, BufferCreateInfo, Image, ImageCreateInfo, Resources},
    sync::{PipelineStages, Synchronization},
    Id, NonExhaustive, ValidationError,
};
use std::sync::Arc;
use tracing::debug;

/// Parameters to create a [`SyncValidator`].
#[derive(Clone, Debug)]
pub struct SyncValidatorCreateInfo {
    /// The queues of the device whose command streams are validated.
    ///
    /// The default value is empty.
    pub queues: Vec<QueueCreateInfo>,

    pub _ne: NonExhaustive,
}

impl Default for SyncValidatorCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            queues: Vec::new(),
            _ne: NonExhaustive(()),
        }
    }
}

/// Parameters of one queue of a [`SyncValidator`].
#[derive(Clone, Debug)]
pub struct QueueCreateInfo {
    /// The queue family the queue belongs to. Command buffers submitted to the queue must have
    /// been recorded for the same family.
    ///
    /// The default value is `0`.
    pub queue_family_index: u32,

    pub _ne: NonExhaustive,
}

impl Default for QueueCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            queue_family_index: 0,
            _ne: NonExhaustive(()),
        }
    }
}

/// A queue known to the validator.
#[derive(Debug)]
pub struct Queue {
    queue_family_index: u32,
    context: AccessContext,
    submit_count: u32,
    batch_count: u32,
    // The batches that are ordered before any batch submitted to this queue from now on.
    ordered_before: BatchClock,
    // The batches ordered before each batch of this queue, indexed by batch.
    batch_clocks: Vec<BatchClock>,
}

impl Queue {
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Returns the number of submissions made to the queue so far.
    #[inline]
    pub fn submit_count(&self) -> u32 {
        self.submit_count
    }

    /// Returns the number of batches submitted to the queue so far.
    #[inline]
    pub fn batch_count(&self) -> u32 {
        self.batch_count
    }
}

/// A binary semaphore known to the validator.
#[derive(Debug, Default)]
pub struct Semaphore {
    signal: Option<SemaphoreSignal>,
    destroyed: bool,
}

// What a batch signaling a semaphore hands to the batch that waits for it.
#[derive(Debug)]
struct SemaphoreSignal {
    batch: BatchRef,
    stages: PipelineStages,
    context: AccessContext,
    ancestors: BatchClock,
}

impl Semaphore {
    /// Returns whether the semaphore has been signaled by a submission and not yet waited for.
    #[inline]
    pub fn is_signal_pending(&self) -> bool {
        self.signal.is_some()
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

/// Parameters for a semaphore signal or wait operation in a submission.
#[derive(Clone, Debug)]
pub struct SemaphoreSubmitInfo {
    /// The semaphore to signal or wait for.
    pub semaphore: Id<Semaphore>,

    /// For a wait operation, the stages of the batch that wait for the semaphore. For a signal
    /// operation, the stages of the batch that must complete before the semaphore is signaled.
    ///
    /// The default value is [`PipelineStages::ALL_COMMANDS`].
    pub stages: PipelineStages,

    pub _ne: NonExhaustive,
}

impl SemaphoreSubmitInfo {
    /// Returns a `SemaphoreSubmitInfo` with the specified `semaphore`.
    #[inline]
    pub fn semaphore(semaphore: Id<Semaphore>) -> Self {
        Self {
            semaphore,
            stages: PipelineStages::ALL_COMMANDS,
            _ne: NonExhaustive(()),
        }
    }

    /// Returns a `SemaphoreSubmitInfo` with the specified `semaphore` and `stages`.
    #[inline]
    pub fn with_stages(semaphore: Id<Semaphore>, stages: PipelineStages) -> Self {
        Self {
            semaphore,
            stages,
            _ne: NonExhaustive(()),
        }
    }
}

/// One batch of a submission.
#[derive(Clone, Debug)]
pub struct SubmitInfo {
    /// The semaphores to wait for before the command buffers of the batch start.
    ///
    /// The default value is empty.
    pub wait_semaphores: Vec<SemaphoreSubmitInfo>,

    /// The primary command buffers to execute.
    ///
    /// The default value is empty.
    pub command_buffers: Vec<Arc<CommandBuffer>>,

    /// The semaphores to signal after the command buffers of the batch complete.
    ///
    /// The default value is empty.
    pub signal_semaphores: Vec<SemaphoreSubmitInfo>,

    pub _ne: NonExhaustive,
}

impl Default for SubmitInfo {
    #[inline]
    fn default() -> Self {
        Self {
            wait_semaphores: Vec::new(),
            command_buffers: Vec::new(),
            signal_semaphores: Vec::new(),
            _ne: NonExhaustive(()),
        }
    }
}

impl SubmitInfo {
    /// Returns a `SubmitInfo` executing `command_buffers`, without any semaphore.
    #[inline]
    pub fn command_buffers(command_buffers: impl IntoIterator<Item = Arc<CommandBuffer>>) -> Self {
        Self {
            command_buffers: command_buffers.into_iter().collect(),
            ..Default::default()
        }
    }
}

/// Replays submissions and reports every access that is not correctly synchronized.
#[derive(Debug)]
pub struct SyncValidator {
    resources: Resources,
    events: EventStates,
    semaphores: Vec<Semaphore>,
    queues: Vec<Queue>,
    next_tag: ResourceUseTag,
}

impl SyncValidator {
    /// Creates a validator with the queues given in `create_info`.
    pub fn new(create_info: SyncValidatorCreateInfo) -> Self {
        let queues = create_info
            .queues
            .iter()
            .map(|queue_info| Queue {
                queue_family_index: queue_info.queue_family_index,
                context: AccessContext::default(),
                submit_count: 0,
                batch_count: 0,
                ordered_before: BatchClock::default(),
                batch_clocks: Vec::new(),
            })
            .collect();

        SyncValidator {
            resources: Resources::default(),
            events: EventStates::default(),
            semaphores: Vec::new(),
            queues,
            next_tag: 0,
        }
    }

    /// Returns the IDs of the queues of the validator.
    pub fn queues(&self) -> impl ExactSizeIterator<Item = Id<Queue>> {
        (0..self.queues.len()).map(Id::new)
    }

    #[inline]
    pub fn queue(&self, id: Id<Queue>) -> Option<&Queue> {
        self.queues.get(id.index())
    }

    #[inline]
    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    #[inline]
    pub fn events(&self) -> &EventStates {
        &self.events
    }

    #[inline]
    pub fn semaphore(&self, id: Id<Semaphore>) -> Option<&Semaphore> {
        self.semaphores.get(id.index()).filter(|s| !s.destroyed)
    }

    pub fn create_buffer(
        &mut self,
        create_info: BufferCreateInfo,
    ) -> Result<Id<Buffer>, Box<ValidationError>> {
        self.resources.create_buffer(create_info)
    }

    pub fn create_image(
        &mut self,
        create_info: ImageCreateInfo,
    ) -> Result<Id<Image>, Box<ValidationError>> {
        self.resources.create_image(create_info)
    }

    /// Destroys a buffer. Recorded accesses to it are ignored from now on.
    pub fn destroy_buffer(&mut self, id: Id<Buffer>) -> Result<(), Box<ValidationError>> {
        self.resources.destroy_buffer(id)
    }

    /// Destroys an image. Recorded accesses to it are ignored from now on.
    pub fn destroy_image(&mut self, id: Id<Image>) -> Result<(), Box<ValidationError>> {
        self.resources.destroy_image(id)
    }

    pub fn create_event(&mut self) -> Id<Event> {
        self.events.create()
    }

    pub fn destroy_event(&mut self, id: Id<Event>) -> Result<(), Box<ValidationError>> {
        self.events.destroy(id)
    }

    /// Sets an event from the host.
    pub fn set_event(&mut self, id: Id<Event>) -> Result<(), Box<ValidationError>> {
        let tag = self.next_tag;
        self.next_tag += 1;
        self.live_event(id)?.host_set(tag);

        Ok(())
    }

    /// Resets an event from the host.
    pub fn reset_event(&mut self, id: Id<Event>) -> Result<(), Box<ValidationError>> {
        self.live_event(id)?.host_reset();

        Ok(())
    }

    fn live_event(&mut self, id: Id<Event>) -> Result<&mut Event, Box<ValidationError>> {
        self.events.get_mut(id).ok_or_else(|| {
            Box::new(ValidationError {
                context: "id".into(),
                problem: "does not refer to a live event".into(),
                ..Default::default()
            })
        })
    }

    pub fn create_semaphore(&mut self) -> Id<Semaphore> {
        let id = Id::new(self.semaphores.len());
        self.semaphores.push(Semaphore::default());

        id
    }

    pub fn destroy_semaphore(&mut self, id: Id<Semaphore>) -> Result<(), Box<ValidationError>> {
        match self.semaphores.get_mut(id.index()) {
            Some(semaphore) if !semaphore.destroyed => {
                semaphore.destroyed = true;
                semaphore.signal = None;

                Ok(())
            }
            _ => Err(Box::new(ValidationError {
                context: "id".into(),
                problem: "does not refer to a live semaphore".into(),
                ..Default::default()
            })),
        }
    }

    fn validate_queue_submit(
        &self,
        queue: Id<Queue>,
        submit_infos: &[SubmitInfo],
    ) -> Result<(), Box<ValidationError>> {
        let Some(queue_state) = self.queue(queue) else {
            return Err(Box::new(ValidationError {
                context: "queue".into(),
                problem: "does not refer to a queue of the validator".into(),
                ..Default::default()
            }));
        };

        for (submit_index, submit_info) in submit_infos.iter().enumerate() {
            let semaphore_infos = submit_info
                .wait_semaphores
                .iter()
                .map(|info| ("wait_semaphores", info))
                .chain(
                    submit_info
                        .signal_semaphores
                        .iter()
                        .map(|info| ("signal_semaphores", info)),
                );

            for (field, semaphore_info) in semaphore_infos {
                if self.semaphore(semaphore_info.semaphore).is_none() {
                    return Err(Box::new(ValidationError {
                        context: format!("submit_infos[{}].{}", submit_index, field).into(),
                        problem: "contains a semaphore that is not live".into(),
                        ..Default::default()
                    }));
                }
            }

            for (index, command_buffer) in submit_info.command_buffers.iter().enumerate() {
                let context =
                    || format!("submit_infos[{}].command_buffers[{}]", submit_index, index);

                if command_buffer.level() != CommandBufferLevel::Primary {
                    return Err(Box::new(ValidationError {
                        context: context().into(),
                        problem: "is not a primary command buffer".into(),
                        vuids: &["VUID-VkSubmitInfo-pCommandBuffers-00075"],
                    }));
                }

                if command_buffer.queue_family_index() != queue_state.queue_family_index {
                    return Err(Box::new(ValidationError {
                        context: context().into(),
                        problem: "was not recorded for the queue family of `queue`".into(),
                        vuids: &["VUID-vkQueueSubmit-pCommandBuffers-00074"],
                    }));
                }

                for location in command_buffer.locations() {
                    self.resources
                        .validate_location(&location)
                        .map_err(|err| err.add_context(context()))?;
                }
            }
        }

        Ok(())
    }

    /// Submits batches of command buffers to `queue` and returns what was found while replaying
    /// them.
    ///
    /// The batches are not ordered with each other unless semaphores order them.
    pub fn queue_submit(
        &mut self,
        queue: Id<Queue>,
        submit_infos: &[SubmitInfo],
    ) -> Result<Vec<Report>, Box<ValidationError>> {
        self.validate_queue_submit(queue, submit_infos)?;

        let SyncValidator {
            resources,
            events,
            semaphores,
            queues,
            next_tag,
        } = self;

        let queue_index = queue.index();
        let queue_family_index = queues[queue_index].queue_family_index;
        let submit = queues[queue_index].submit_count;
        let first_batch = queues[queue_index].batch_count;
        let pre_submit = queues[queue_index].context.clone();
        let ordered_before = queues[queue_index].ordered_before.clone();

        let mut reports = Vec::new();
        let mut finished: Vec<AccessContext> = Vec::with_capacity(submit_infos.len());
        let mut finished_clocks: Vec<BatchClock> = Vec::with_capacity(submit_infos.len());

        for (batch_index, submit_info) in submit_infos.iter().enumerate() {
            let batch_ref = BatchRef {
                queue: queue_index as u32,
                batch: first_batch + batch_index as u32,
            };
            let batch_position = LogicalPosition {
                queue: Some(batch_ref.queue),
                submit,
                batch: batch_ref.batch,
                ..Default::default()
            };
            let mut context = pre_submit.clone();
            let mut ancestors = ordered_before.clone();

            for wait_info in &submit_info.wait_semaphores {
                let Some(semaphore) = semaphores.get_mut(wait_info.semaphore.index()) else {
                    continue;
                };

                match semaphore.signal.take() {
                    Some(signal) => {
                        debug!(
                            signaled_by = ?signal.batch,
                            waited_by = ?batch_ref,
                            "importing semaphore signal",
                        );

                        let scopes = Synchronization::Semaphore {
                            signal_stages: signal.stages,
                            wait_stages: wait_info.stages,
                        }
                        .resolve()
                        .global_scopes();
                        context.resolve_from(&signal.context, Some(&scopes));
                        ancestors.merge(&signal.ancestors);
                        ancestors.insert(signal.batch);
                    }
                    None => reports.push(Report::Usage(UsageError {
                        position: batch_position,
                        command_name: "queue_submit",
                        problem: "a semaphore is waited for, but no signal operation is \
                            pending on it"
                            .into(),
                        vuid: "VUID-vkQueueSubmit-pWaitSemaphores-03238",
                    })),
                }
            }

            {
                let made_by_unordered_batch = |used: &ResourceUse| {
                    used.position
                        .batch_ref()
                        .is_some_and(|other| other != batch_ref && !ancestors.contains(other))
                };
                let racing_peers: Vec<RacingPeer<'_>> = queues
                    .iter()
                    .enumerate()
                    .filter(|&(index, _)| index != queue_index)
                    .map(|(_, other)| &other.context)
                    .chain(finished.iter())
                    .filter(|context| !context.is_empty())
                    .map(|context| RacingPeer {
                        context,
                        filter: &made_by_unordered_batch,
                    })
                    .collect();

                let mut replay = CommandBufferReplay::new(
                    resources,
                    events,
                    &mut context,
                    &racing_peers,
                    next_tag,
                    &mut reports,
                    queue_family_index,
                );

                for (index, command_buffer) in submit_info.command_buffers.iter().enumerate() {
                    replay.replay(
                        command_buffer,
                        LogicalPosition {
                            command_buffer: index as u32,
                            ..batch_position
                        },
                    );
                }
            }

            for signal_info in &submit_info.signal_semaphores {
                let Some(semaphore) = semaphores.get_mut(signal_info.semaphore.index()) else {
                    continue;
                };

                if semaphore.signal.is_some() {
                    reports.push(Report::Usage(UsageError {
                        position: batch_position,
                        command_name: "queue_submit",
                        problem: "a semaphore is signaled, but a signal operation is already \
                            pending on it"
                            .into(),
                        vuid: "VUID-vkQueueSubmit-pSignalSemaphores-03241",
                    }));
                }

                semaphore.signal = Some(SemaphoreSignal {
                    batch: batch_ref,
                    stages: signal_info.stages,
                    context: context.clone(),
                    ancestors: ancestors.clone(),
                });
            }

            finished_clocks.push(ancestors);
            finished.push(context);
        }

        let queue_state = &mut queues[queue_index];
        let mut siblings = finished.into_iter();

        if let Some(mut merged) = siblings.next() {
            for sibling in siblings {
                merged.resolve_from(&sibling, None);
            }

            merged.coalesce();
            queue_state.context = merged;
        }

        let batch_count = submit_infos.len() as u32;
        queue_state
            .ordered_before
            .advance(queue_index as u32, first_batch + batch_count);
        queue_state.batch_clocks.extend(finished_clocks);
        queue_state.submit_count += 1;
        queue_state.batch_count += batch_count;

        debug!(
            queue = queue_index,
            submit,
            batches = batch_count,
            reports = reports.len(),
            "replayed submission",
        );

        Ok(reports)
    }

    /// Waits on the host for `queue` to become idle. Everything submitted to it so far is
    /// ordered before every later submission.
    pub fn queue_wait_idle(&mut self, queue: Id<Queue>) -> Result<(), Box<ValidationError>> {
        let Some(queue_state) = self.queues.get_mut(queue.index()) else {
            return Err(Box::new(ValidationError {
                context: "queue".into(),
                problem: "does not refer to a queue of the validator".into(),
                ..Default::default()
            }));
        };

        queue_state.context.reset();
        let queue_index = queue.index() as u32;
        let batch_count = queue_state.batch_count;

        // Everything the queue did is complete and visible, wherever it has been imported to.
        let completed = |used: &ResourceUse| used.position.queue == Some(queue_index);

        for queue_state in &mut self.queues {
            queue_state.context.forget(completed);
            queue_state.ordered_before.advance(queue_index, batch_count);
        }

        for signal in self.semaphores.iter_mut().filter_map(|s| s.signal.as_mut()) {
            signal.context.forget(completed);
            signal.ancestors.advance(queue_index, batch_count);
        }

        debug!(queue = queue_index, "queue is idle");

        Ok(())
    }

    /// Waits on the host for every queue to become idle.
    pub fn device_wait_idle(&mut self) {
        let batch_counts: Vec<u32> = self.queues.iter().map(|q| q.batch_count).collect();
        let advance_all = |clock: &mut BatchClock| {
            for (queue, &count) in batch_counts.iter().enumerate() {
                clock.advance(queue as u32, count);
            }
        };

        for queue_state in &mut self.queues {
            queue_state.context.reset();
            advance_all(&mut queue_state.ordered_before);
        }

        for signal in self.semaphores.iter_mut().filter_map(|s| s.signal.as_mut()) {
            signal.context.reset();
            advance_all(&mut signal.ancestors);
        }

        debug!("device is idle");
    }

    /// Replays a command buffer on its own, as if it was submitted to an idle queue with every
    /// event unset. Nothing of the validator's state is changed.
    pub fn validate_command_buffer(
        &self,
        command_buffer: &CommandBuffer,
    ) -> Result<Vec<Report>, Box<ValidationError>> {
        for location in command_buffer.locations() {
            self.resources.validate_location(&location)?;
        }

        let mut events = self.events.unset_copy();
        let mut context = AccessContext::default();
        let mut next_tag = 0;
        let mut reports = Vec::new();

        CommandBufferReplay::new(
            &self.resources,
            &mut events,
            &mut context,
            &[],
            &mut next_tag,
            &mut reports,
            command_buffer.queue_family_index(),
        )
        .replay(command_buffer, LogicalPosition::default());

        Ok(reports)
    }

    /// Returns whether the command at `a` is ordered before the command at `b`, by their
    /// positions or by the semaphores and idle waits seen so far.
    pub fn happens_before(&self, a: &LogicalPosition, b: &LogicalPosition) -> bool {
        if a < b {
            return true;
        }

        match (a.batch_ref(), b.batch_ref()) {
            (Some(a), Some(b)) => self
                .queues
                .get(b.queue as usize)
                .and_then(|queue| queue.batch_clocks.get(b.batch as usize))
                .is_some_and(|ancestors| ancestors.contains(a)),
            _ => false,
        }
    }
}
