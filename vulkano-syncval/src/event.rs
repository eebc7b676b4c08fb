//! The set/reset/wait state machine of events.
//!
//! Besides the signal status, every event remembers the last command that operated on it and
//! the stages of the pipeline barriers recorded since, so that a `set` or `reset` that is not
//! ordered after the previous command on the same event can be reported.

use crate::{position::ResourceUseTag, sync::PipelineStages, Id, ValidationError};
use std::borrow::Cow;

/// The signal status of an event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventStatus {
    /// The event was never set, or was reset since.
    #[default]
    Unset,

    /// The event was set by a command after the given stages, and no wait consumed it yet.
    Set {
        stages: PipelineStages,
        tag: ResourceUseTag,
    },

    /// The event was set and then waited for. It can be waited for again.
    WaitConsumed {
        stages: PipelineStages,
        tag: ResourceUseTag,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EventCommandKind {
    Set,
    Reset,
    Wait,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct EventCommand {
    kind: EventCommandKind,
    stages: PipelineStages,
}

/// An event known to the validator.
#[derive(Clone, Debug, Default)]
pub struct Event {
    status: EventStatus,
    last_command: Option<EventCommand>,
    // Destination stages of the barriers that are ordered after `last_command`.
    barriers: PipelineStages,
    destroyed: bool,
}

/// A problem with the order of commands on an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct EventUsageError {
    pub(crate) problem: Cow<'static, str>,
    pub(crate) vuid: &'static str,
}

impl Event {
    /// Returns the signal status of the event.
    #[inline]
    pub fn status(&self) -> EventStatus {
        self.status
    }

    /// Returns whether the event has been destroyed.
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    // Whether a command with `stages` is ordered after the last command on the event.
    fn has_barrier(&self, stages: PipelineStages) -> bool {
        stages.contains(PipelineStages::ALL_COMMANDS)
            || self.barriers.intersects(stages.with_earlier())
    }

    fn missing_barrier(
        &self,
        stages: PipelineStages,
        vuids: [&'static str; 3],
    ) -> Result<(), EventUsageError> {
        let Some(last_command) = self.last_command else {
            return Ok(());
        };

        if self.has_barrier(stages) {
            return Ok(());
        }

        let (vuid, previous) = match last_command.kind {
            EventCommandKind::Set => (vuids[0], "set"),
            EventCommandKind::Reset => (vuids[1], "reset"),
            EventCommandKind::Wait => (vuids[2], "wait"),
        };

        if vuid.is_empty() {
            return Ok(());
        }

        Err(EventUsageError {
            problem: format!(
                "the previous {} command on the event, with stages {:?}, is not ordered before \
                this command by any pipeline barrier",
                previous, last_command.stages,
            )
            .into(),
            vuid,
        })
    }

    /// Sets the event from a command after `stages`. The event is set even when an error is
    /// returned.
    pub(crate) fn set(
        &mut self,
        stages: PipelineStages,
        tag: ResourceUseTag,
    ) -> Result<(), EventUsageError> {
        let result = self.missing_barrier(
            stages,
            [
                "SYNC-vkCmdSetEvent-missingbarrier-set",
                "SYNC-vkCmdSetEvent-missingbarrier-reset",
                "",
            ],
        );

        self.status = EventStatus::Set { stages, tag };
        self.last_command = Some(EventCommand {
            kind: EventCommandKind::Set,
            stages,
        });
        self.barriers = PipelineStages::empty();

        result
    }

    /// Resets the event from a command after `stages`. The event is reset even when an error is
    /// returned.
    pub(crate) fn reset(&mut self, stages: PipelineStages) -> Result<(), EventUsageError> {
        let result = self.missing_barrier(
            stages,
            [
                "SYNC-vkCmdResetEvent-missingbarrier-set",
                "SYNC-vkCmdResetEvent-missingbarrier-reset",
                "SYNC-vkCmdResetEvent-missingbarrier-wait",
            ],
        );

        self.status = EventStatus::Unset;
        self.last_command = Some(EventCommand {
            kind: EventCommandKind::Reset,
            stages,
        });
        self.barriers = PipelineStages::empty();

        result
    }

    /// Waits for the event before `dst_stages`. Returns the stages and the tag of the command
    /// that set the event.
    pub(crate) fn wait(
        &mut self,
        dst_stages: PipelineStages,
    ) -> Result<(PipelineStages, ResourceUseTag), EventUsageError> {
        let (stages, tag) = match self.status {
            EventStatus::Set { stages, tag } | EventStatus::WaitConsumed { stages, tag } => {
                (stages, tag)
            }
            EventStatus::Unset => {
                return Err(EventUsageError {
                    problem: "the event is waited for, but it was not set by an earlier command"
                        .into(),
                    vuid: "VUID-vkCmdWaitEvents-pEvents-03834",
                });
            }
        };

        self.status = EventStatus::WaitConsumed { stages, tag };
        self.last_command = Some(EventCommand {
            kind: EventCommandKind::Wait,
            stages: dst_stages,
        });
        self.barriers = PipelineStages::empty();

        Ok((stages, tag))
    }

    /// Records a pipeline barrier with the given expanded execution scopes.
    pub(crate) fn apply_barrier(&mut self, src_exec: PipelineStages, dst_exec: PipelineStages) {
        if let Some(last_command) = self.last_command {
            if src_exec.intersects(last_command.stages.expand())
                || last_command.stages.contains(PipelineStages::ALL_COMMANDS)
            {
                self.barriers |= dst_exec;
            }
        }
    }

    /// Sets the event from the host.
    pub(crate) fn host_set(&mut self, tag: ResourceUseTag) {
        self.status = EventStatus::Set {
            stages: PipelineStages::HOST,
            tag,
        };
        self.last_command = None;
        self.barriers = PipelineStages::empty();
    }

    /// Resets the event from the host.
    pub(crate) fn host_reset(&mut self) {
        self.status = EventStatus::Unset;
        self.last_command = None;
        self.barriers = PipelineStages::empty();
    }
}

/// The arena of events.
#[derive(Clone, Debug, Default)]
pub struct EventStates {
    events: Vec<Event>,
}

impl EventStates {
    pub(crate) fn create(&mut self) -> Id<Event> {
        let id = Id::new(self.events.len());
        self.events.push(Event::default());

        id
    }

    pub(crate) fn destroy(&mut self, id: Id<Event>) -> Result<(), Box<ValidationError>> {
        match self.events.get_mut(id.index()) {
            Some(event) if !event.destroyed => {
                event.destroyed = true;
                Ok(())
            }
            _ => Err(Box::new(ValidationError {
                context: "id".into(),
                problem: "does not refer to a live event".into(),
                ..Default::default()
            })),
        }
    }

    #[inline]
    pub fn get(&self, id: Id<Event>) -> Option<&Event> {
        self.events.get(id.index()).filter(|event| !event.destroyed)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: Id<Event>) -> Option<&mut Event> {
        self.events
            .get_mut(id.index())
            .filter(|event| !event.destroyed)
    }

    /// Records a pipeline barrier on every event.
    pub(crate) fn apply_barrier(&mut self, src_exec: PipelineStages, dst_exec: PipelineStages) {
        for event in self.events.iter_mut().filter(|event| !event.destroyed) {
            event.apply_barrier(src_exec, dst_exec);
        }
    }

    /// Returns a copy of the arena with every event unset, for replaying a command buffer on its
    /// own.
    pub(crate) fn unset_copy(&self) -> EventStates {
        EventStates {
            events: self
                .events
                .iter()
                .map(|event| Event {
                    destroyed: event.destroyed,
                    ..Default::default()
                })
                .collect(),
        }
    }
}
