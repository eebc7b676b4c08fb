#![cfg(test)]

//! Scenarios replayed through the whole validator, from recording to submission.

use crate::{
    command_buffer::{BufferCopy, CopyBufferInfo, RecordingCommandBuffer},
    queue::{QueueCreateInfo, SubmitInfo, SyncValidator, SyncValidatorCreateInfo},
    report::{HazardKind, Report},
    resource::{Buffer, BufferCreateInfo, Image, ImageCreateInfo, ImageSubresourceRange},
    sync::{AccessFlags, BufferMemoryBarrier, DependencyInfo, PipelineStages},
    CommandBuffer, Id,
};
use smallvec::smallvec;
use std::sync::Arc;

fn validator(queue_count: usize) -> SyncValidator {
    SyncValidator::new(SyncValidatorCreateInfo {
        queues: vec![QueueCreateInfo::default(); queue_count],
        ..Default::default()
    })
}

fn buffer(validator: &mut SyncValidator, size: u64) -> Id<Buffer> {
    validator
        .create_buffer(BufferCreateInfo {
            size,
            ..Default::default()
        })
        .unwrap()
}

fn image(validator: &mut SyncValidator) -> Id<Image> {
    validator.create_image(ImageCreateInfo::default()).unwrap()
}

fn record(f: impl FnOnce(&mut RecordingCommandBuffer)) -> Arc<CommandBuffer> {
    let mut builder = RecordingCommandBuffer::primary(0);
    f(&mut builder);

    builder.end().unwrap()
}

fn submit(
    validator: &mut SyncValidator,
    queue: usize,
    command_buffer: Arc<CommandBuffer>,
) -> Vec<Report> {
    let queue = validator.queues().nth(queue).unwrap();

    validator
        .queue_submit(queue, &[SubmitInfo::command_buffers([command_buffer])])
        .unwrap()
}

fn hazard_kinds(reports: &[Report]) -> Vec<HazardKind> {
    reports
        .iter()
        .filter_map(|report| report.as_hazard().map(|hazard| hazard.kind))
        .collect()
}

fn copy_region(
    src_buffer: Id<Buffer>,
    dst_buffer: Id<Buffer>,
    src_offset: u64,
    dst_offset: u64,
    size: u64,
) -> CopyBufferInfo {
    CopyBufferInfo {
        regions: smallvec![BufferCopy {
            src_offset,
            dst_offset,
            size,
            ..Default::default()
        }],
        ..CopyBufferInfo::buffers(src_buffer, dst_buffer, size)
    }
}

fn buffer_barriers(barriers: impl IntoIterator<Item = BufferMemoryBarrier>) -> DependencyInfo {
    DependencyInfo {
        buffer_memory_barriers: barriers.into_iter().collect(),
        ..Default::default()
    }
}

fn transfer_write_to_read(buffer: Id<Buffer>) -> BufferMemoryBarrier {
    BufferMemoryBarrier {
        src_stages: PipelineStages::ALL_TRANSFER,
        src_access: AccessFlags::TRANSFER_WRITE,
        dst_stages: PipelineStages::ALL_TRANSFER,
        dst_access: AccessFlags::TRANSFER_READ,
        ..BufferMemoryBarrier::buffer(buffer)
    }
}

mod validation_errors {
    use super::*;
    use crate::ValidationError;

    #[test]
    fn context_is_prefixed() {
        let err = Box::new(ValidationError {
            context: "size".into(),
            problem: "is zero".into(),
            vuids: &["VUID-VkBufferCreateInfo-size-00912"],
        })
        .add_context("create_info");

        assert_eq!(err.context, "create_info.size");
        assert_eq!(
            err.to_string(),
            "create_info.size: is zero\n\nVulkan VUIDs:\n    VUID-VkBufferCreateInfo-size-00912",
        );
    }

    #[test]
    fn submission_errors_name_the_command_buffer() {
        let mut validator = validator(1);
        let queue = validator.queues().next().unwrap();
        let command_buffer = record(|builder| {
            builder.fill_buffer(Id::new(9), 0..4).unwrap();
        });

        let err = validator
            .queue_submit(queue, &[SubmitInfo::command_buffers([command_buffer])])
            .unwrap_err();
        assert!(err.context.starts_with("submit_infos[0].command_buffers[0]"));
    }
}

mod barriers {
    use super::*;
    use crate::sync::{ImageLayout, ImageMemoryBarrier};

    #[test]
    fn safe_replay_is_idempotent() {
        let mut validator = validator(1);
        let source = buffer(&mut validator, 256);
        let target = buffer(&mut validator, 256);

        let command_buffer = record(|builder| {
            builder
                .fill_buffer(target, 0..64)
                .unwrap()
                .fill_buffer(target, 64..128)
                .unwrap()
                .update_buffer(target, 192, 64)
                .unwrap()
                // Splits the recorded ranges without ordering anything.
                .pipeline_barrier(buffer_barriers([BufferMemoryBarrier {
                    range: 32..96,
                    ..transfer_write_to_read(target)
                }]))
                .unwrap()
                .copy_buffer(copy_region(source, target, 0, 128, 64))
                .unwrap();
        });

        for _ in 0..3 {
            assert!(validator
                .validate_command_buffer(&command_buffer)
                .unwrap()
                .is_empty());
            assert!(submit(&mut validator, 0, command_buffer.clone()).is_empty());
            validator.device_wait_idle();
        }
    }

    // Copies into `b`, applies the barrier returned by `barrier`, then copies out of `b`.
    fn read_after_write(
        barrier: impl FnOnce(Id<Buffer>, Id<Buffer>) -> Option<BufferMemoryBarrier>,
    ) -> Vec<Report> {
        let mut validator = validator(1);
        let a = buffer(&mut validator, 256);
        let b = buffer(&mut validator, 256);
        let c = buffer(&mut validator, 256);
        let barrier = barrier(b, c);

        let command_buffer = record(|builder| {
            builder
                .copy_buffer(CopyBufferInfo::buffers(a, b, 256))
                .unwrap()
                .pipeline_barrier(buffer_barriers(barrier))
                .unwrap()
                .copy_buffer(CopyBufferInfo::buffers(b, c, 256))
                .unwrap();
        });

        submit(&mut validator, 0, command_buffer)
    }

    #[test]
    fn barrier_makes_read_safe() {
        let reports = read_after_write(|_, _| None);
        assert_eq!(hazard_kinds(&reports), vec![HazardKind::ReadAfterWrite]);

        let hazard = reports[0].as_hazard().unwrap();
        assert_eq!(hazard.range, 0..256);
        assert_eq!(hazard.prior.command_name, "copy_buffer");
        assert_eq!(hazard.prior.position.command, 0);
        assert_eq!(hazard.current.position.command, 1);

        assert!(read_after_write(|b, _| Some(transfer_write_to_read(b))).is_empty());
    }

    #[test]
    fn removing_part_of_the_barrier_restores_the_hazard() {
        let cases: [fn(Id<Buffer>, Id<Buffer>) -> BufferMemoryBarrier; 5] = [
            // Stage chain.
            |b, _| BufferMemoryBarrier {
                src_stages: PipelineStages::COMPUTE_SHADER,
                ..transfer_write_to_read(b)
            },
            // Access masks.
            |b, _| BufferMemoryBarrier {
                src_access: AccessFlags::SHADER_WRITE,
                ..transfer_write_to_read(b)
            },
            |b, _| BufferMemoryBarrier {
                dst_access: AccessFlags::SHADER_READ,
                ..transfer_write_to_read(b)
            },
            // Location.
            |_, c| transfer_write_to_read(c),
            |b, _| BufferMemoryBarrier {
                range: 0..128,
                ..transfer_write_to_read(b)
            },
        ];

        for case in cases {
            let reports = read_after_write(|b, c| Some(case(b, c)));
            assert_eq!(hazard_kinds(&reports), vec![HazardKind::ReadAfterWrite]);
        }

        let reports = read_after_write(|b, _| {
            Some(BufferMemoryBarrier {
                range: 0..128,
                ..transfer_write_to_read(b)
            })
        });
        assert_eq!(reports[0].as_hazard().unwrap().range, 128..256);
    }

    #[test]
    fn overlapping_copy_regions() {
        let mut validator = validator(1);
        let a = buffer(&mut validator, 256);

        let overlapping = record(|builder| {
            builder.copy_buffer(copy_region(a, a, 0, 64, 128)).unwrap();
        });
        let reports = submit(&mut validator, 0, overlapping);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].rule_id(), "VUID-vkCmdCopyBuffer-pRegions-00117");

        validator.device_wait_idle();

        let disjoint = record(|builder| {
            builder.copy_buffer(copy_region(a, a, 0, 128, 128)).unwrap();
        });
        assert!(submit(&mut validator, 0, disjoint).is_empty());
    }

    #[test]
    fn layout_transition_is_a_write() {
        let transition = |image, src_stages, src_access| ImageMemoryBarrier {
            src_stages,
            src_access,
            dst_stages: PipelineStages::FRAGMENT_SHADER,
            dst_access: AccessFlags::SHADER_SAMPLED_READ,
            old_layout: ImageLayout::TransferDstOptimal,
            new_layout: ImageLayout::ShaderReadOnlyOptimal,
            ..ImageMemoryBarrier::image(image)
        };
        let run = |src_stages, src_access| {
            let mut validator = validator(1);
            let image = image(&mut validator);

            let command_buffer = record(|builder| {
                builder
                    .clear_color_image(image, [ImageSubresourceRange::whole()])
                    .unwrap()
                    .pipeline_barrier(DependencyInfo {
                        image_memory_barriers: smallvec![transition(
                            image, src_stages, src_access,
                        )],
                        ..Default::default()
                    })
                    .unwrap();
            });

            submit(&mut validator, 0, command_buffer)
        };

        assert!(run(PipelineStages::ALL_TRANSFER, AccessFlags::TRANSFER_WRITE).is_empty());

        let reports = run(PipelineStages::empty(), AccessFlags::empty());
        assert_eq!(hazard_kinds(&reports), vec![HazardKind::WriteAfterWrite]);
        assert_eq!(reports[0].as_hazard().unwrap().current.command_name, "pipeline_barrier");
    }

    #[test]
    fn destroyed_resources_are_ignored() {
        let mut validator = validator(1);
        let a = buffer(&mut validator, 64);
        let b = buffer(&mut validator, 64);

        let command_buffer = record(|builder| {
            builder
                .fill_buffer(b, 0..64)
                .unwrap()
                .copy_buffer(CopyBufferInfo::buffers(a, b, 64))
                .unwrap();
        });
        validator.destroy_buffer(b).unwrap();

        assert!(submit(&mut validator, 0, command_buffer).is_empty());
    }
}

mod events {
    use super::*;
    use crate::{event::EventStatus, sync::MemoryBarrier};

    #[test]
    fn front_half_barrier_leaves_back_half_hazarded() {
        let mut validator = validator(1);
        let a = buffer(&mut validator, 256);
        let b = buffer(&mut validator, 256);
        let c = buffer(&mut validator, 256);
        let event = validator.create_event();

        let command_buffer = record(|builder| {
            builder
                .copy_buffer(CopyBufferInfo::buffers(b, c, 256))
                .unwrap()
                .set_event(event, PipelineStages::ALL_TRANSFER)
                .unwrap()
                .wait_events(
                    [event],
                    buffer_barriers([BufferMemoryBarrier {
                        src_stages: PipelineStages::ALL_TRANSFER,
                        dst_stages: PipelineStages::ALL_TRANSFER,
                        range: 0..128,
                        ..BufferMemoryBarrier::buffer(b)
                    }]),
                )
                .unwrap()
                .copy_buffer(copy_region(a, b, 0, 0, 128))
                .unwrap()
                .copy_buffer(copy_region(a, b, 128, 128, 128))
                .unwrap();
        });

        let reports = submit(&mut validator, 0, command_buffer);
        assert_eq!(hazard_kinds(&reports), vec![HazardKind::WriteAfterRead]);

        let hazard = reports[0].as_hazard().unwrap();
        assert_eq!(hazard.range, 128..256);
        assert_eq!(hazard.current.position.command, 4);
    }

    #[test]
    fn back_half_barrier_leaves_front_half_hazarded() {
        let mut validator = validator(1);
        let b = buffer(&mut validator, 256);
        let c = buffer(&mut validator, 256);
        let event = validator.create_event();

        let command_buffer = record(|builder| {
            builder
                .fill_buffer(b, 0..256)
                .unwrap()
                .set_event(event, PipelineStages::ALL_TRANSFER)
                .unwrap()
                .wait_events(
                    [event],
                    buffer_barriers([BufferMemoryBarrier {
                        range: 128..256,
                        ..transfer_write_to_read(b)
                    }]),
                )
                .unwrap()
                .copy_buffer(copy_region(b, c, 128, 0, 128))
                .unwrap()
                .copy_buffer(copy_region(b, c, 0, 128, 128))
                .unwrap();
        });

        let reports = submit(&mut validator, 0, command_buffer);
        assert_eq!(hazard_kinds(&reports), vec![HazardKind::ReadAfterWrite]);
        assert_eq!(reports[0].as_hazard().unwrap().range, 0..128);
    }

    #[test]
    fn accesses_after_the_set_are_not_covered() {
        let mut validator = validator(1);
        let b = buffer(&mut validator, 256);
        let c = buffer(&mut validator, 256);
        let event = validator.create_event();

        let command_buffer = record(|builder| {
            builder
                .set_event(event, PipelineStages::ALL_TRANSFER)
                .unwrap()
                .fill_buffer(b, 0..256)
                .unwrap()
                .wait_events([event], buffer_barriers([transfer_write_to_read(b)]))
                .unwrap()
                .copy_buffer(CopyBufferInfo::buffers(b, c, 256))
                .unwrap();
        });

        let reports = submit(&mut validator, 0, command_buffer);
        assert_eq!(hazard_kinds(&reports), vec![HazardKind::ReadAfterWrite]);
    }

    #[test]
    fn wait_on_unset_event() {
        let mut validator = validator(1);
        let event = validator.create_event();

        let wait = record(|builder| {
            builder
                .wait_events(
                    [event],
                    DependencyInfo {
                        memory_barriers: smallvec![MemoryBarrier::execution(
                            PipelineStages::ALL_TRANSFER,
                            PipelineStages::ALL_TRANSFER,
                        )],
                        ..Default::default()
                    },
                )
                .unwrap();
        });

        let reports = submit(&mut validator, 0, wait.clone());
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].rule_id(), "VUID-vkCmdWaitEvents-pEvents-03834");

        // Set from the host in the meantime.
        validator.set_event(event).unwrap();
        assert!(matches!(
            validator.events().get(event).unwrap().status(),
            EventStatus::Set { .. },
        ));

        let reports = submit(&mut validator, 0, wait);
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].rule_id(),
            "VUID-vkCmdWaitEvents-srcStageMask-01158",
        );
    }

    #[test]
    fn set_and_reset_need_a_barrier() {
        let mut validator = validator(1);
        let event = validator.create_event();

        let unordered = record(|builder| {
            builder
                .set_event(event, PipelineStages::ALL_TRANSFER)
                .unwrap()
                .set_event(event, PipelineStages::ALL_TRANSFER)
                .unwrap()
                .reset_event(event, PipelineStages::ALL_TRANSFER)
                .unwrap();
        });
        let rule_ids: Vec<_> = submit(&mut validator, 0, unordered)
            .iter()
            .map(Report::rule_id)
            .collect();
        assert_eq!(
            rule_ids,
            vec![
                "SYNC-vkCmdSetEvent-missingbarrier-set",
                "SYNC-vkCmdResetEvent-missingbarrier-set",
            ],
        );

        let barrier = || DependencyInfo {
            memory_barriers: smallvec![MemoryBarrier::execution(
                PipelineStages::ALL_TRANSFER,
                PipelineStages::ALL_TRANSFER,
            )],
            ..Default::default()
        };
        let ordered = record(|builder| {
            builder
                .reset_event(event, PipelineStages::ALL_TRANSFER)
                .unwrap()
                .pipeline_barrier(barrier())
                .unwrap()
                .set_event(event, PipelineStages::ALL_TRANSFER)
                .unwrap()
                .pipeline_barrier(barrier())
                .unwrap()
                .set_event(event, PipelineStages::ALL_TRANSFER)
                .unwrap();
        });

        validator.device_wait_idle();
        validator.reset_event(event).unwrap();
        assert!(submit(&mut validator, 0, ordered).is_empty());
    }
}

mod queues {
    use super::*;
    use crate::queue::SemaphoreSubmitInfo;

    fn fill(buffer: Id<Buffer>) -> Arc<CommandBuffer> {
        record(|builder| {
            builder.fill_buffer(buffer, 0..256).unwrap();
        })
    }

    #[test]
    fn unordered_queues_race() {
        let mut validator = validator(2);
        let b = buffer(&mut validator, 256);

        assert!(submit(&mut validator, 0, fill(b)).is_empty());

        let reports = submit(&mut validator, 1, fill(b));
        assert_eq!(hazard_kinds(&reports), vec![HazardKind::WriteRacingWrite]);

        let hazard = reports[0].as_hazard().unwrap();
        assert_eq!(hazard.prior.position.queue, Some(0));
        assert_eq!(hazard.current.position.queue, Some(1));
    }

    // Fills `b` on queue 0, then fills it again on queue 1 after waiting for a semaphore with
    // `wait_stages`.
    fn semaphore_between(wait_stages: PipelineStages) -> Vec<Report> {
        let mut validator = validator(2);
        let b = buffer(&mut validator, 256);
        let semaphore = validator.create_semaphore();
        let mut queues = validator.queues();
        let (q0, q1) = (queues.next().unwrap(), queues.next().unwrap());

        assert!(validator
            .queue_submit(
                q0,
                &[SubmitInfo {
                    command_buffers: vec![fill(b)],
                    signal_semaphores: vec![SemaphoreSubmitInfo::semaphore(semaphore)],
                    ..Default::default()
                }],
            )
            .unwrap()
            .is_empty());

        validator
            .queue_submit(
                q1,
                &[SubmitInfo {
                    wait_semaphores: vec![SemaphoreSubmitInfo::with_stages(
                        semaphore,
                        wait_stages,
                    )],
                    command_buffers: vec![fill(b)],
                    ..Default::default()
                }],
            )
            .unwrap()
    }

    #[test]
    fn semaphore_orders_queues() {
        assert!(semaphore_between(PipelineStages::ALL_TRANSFER).is_empty());
        assert!(semaphore_between(PipelineStages::ALL_COMMANDS).is_empty());

        // Ordered, but nothing is made visible to the second fill.
        assert_eq!(
            hazard_kinds(&semaphore_between(PipelineStages::empty())),
            vec![HazardKind::WriteAfterWrite],
        );
        assert_eq!(
            hazard_kinds(&semaphore_between(PipelineStages::COMPUTE_SHADER)),
            vec![HazardKind::WriteAfterWrite],
        );
    }

    #[test]
    fn sibling_batches_race() {
        let mut validator = validator(1);
        let b = buffer(&mut validator, 256);
        let queue = validator.queues().next().unwrap();

        let reports = validator
            .queue_submit(
                queue,
                &[
                    SubmitInfo::command_buffers([fill(b)]),
                    SubmitInfo::command_buffers([fill(b)]),
                ],
            )
            .unwrap();
        assert_eq!(hazard_kinds(&reports), vec![HazardKind::WriteRacingWrite]);

        // Both batches are ordered before the next submission, but without a barrier.
        let reports = submit(&mut validator, 0, fill(b));
        assert_eq!(hazard_kinds(&reports), vec![HazardKind::WriteAfterWrite]);
    }

    #[test]
    fn idle_resets_the_timelines() {
        let mut validator = validator(2);
        let b = buffer(&mut validator, 256);

        assert!(submit(&mut validator, 0, fill(b)).is_empty());
        assert_eq!(
            hazard_kinds(&submit(&mut validator, 0, fill(b))),
            vec![HazardKind::WriteAfterWrite],
        );

        let queue = validator.queues().next().unwrap();
        validator.queue_wait_idle(queue).unwrap();
        assert!(submit(&mut validator, 0, fill(b)).is_empty());

        assert_eq!(
            hazard_kinds(&submit(&mut validator, 1, fill(b))),
            vec![HazardKind::WriteRacingWrite],
        );

        validator.device_wait_idle();
        assert!(submit(&mut validator, 0, fill(b)).is_empty());
    }

    // Fills `b` on queue 0 and signals a semaphore that queue 1 waits for with a scope that
    // makes nothing visible to transfers.
    fn signal_fill(validator: &mut SyncValidator, b: Id<Buffer>) -> SubmitInfo {
        let semaphore = validator.create_semaphore();
        let q0 = validator.queues().next().unwrap();

        assert!(validator
            .queue_submit(
                q0,
                &[SubmitInfo {
                    command_buffers: vec![fill(b)],
                    signal_semaphores: vec![SemaphoreSubmitInfo::semaphore(semaphore)],
                    ..Default::default()
                }],
            )
            .unwrap()
            .is_empty());

        SubmitInfo {
            wait_semaphores: vec![SemaphoreSubmitInfo::with_stages(
                semaphore,
                PipelineStages::COMPUTE_SHADER,
            )],
            ..Default::default()
        }
    }

    #[test]
    fn idle_queue_is_forgotten_by_its_waiters() {
        // The write is imported into queue 1 before queue 0 goes idle.
        let mut validator = validator(2);
        let b = buffer(&mut validator, 256);
        let (q0, q1) = {
            let mut queues = validator.queues();
            (queues.next().unwrap(), queues.next().unwrap())
        };
        let wait = signal_fill(&mut validator, b);
        assert!(validator.queue_submit(q1, &[wait]).unwrap().is_empty());
        validator.queue_wait_idle(q0).unwrap();
        assert!(submit(&mut validator, 1, fill(b)).is_empty());
    }

    #[test]
    fn idle_queue_is_forgotten_by_pending_signals() {
        let mut validator = validator(2);
        let b = buffer(&mut validator, 256);
        let (q0, q1) = {
            let mut queues = validator.queues();
            (queues.next().unwrap(), queues.next().unwrap())
        };
        let wait = signal_fill(&mut validator, b);
        validator.queue_wait_idle(q0).unwrap();

        let reports = validator
            .queue_submit(
                q1,
                &[SubmitInfo {
                    command_buffers: vec![fill(b)],
                    ..wait
                }],
            )
            .unwrap();
        assert!(reports.is_empty());
    }
}

mod secondary_command_buffers {
    use super::*;

    fn secondary(f: impl FnOnce(&mut RecordingCommandBuffer)) -> Arc<CommandBuffer> {
        let mut builder = RecordingCommandBuffer::secondary(0, Default::default()).unwrap();
        f(&mut builder);

        builder.end().unwrap()
    }

    // Submits a primary command buffer recorded by `f` with two fresh buffers `b` and `c`.
    fn replay(f: impl FnOnce(&mut RecordingCommandBuffer, Id<Buffer>, Id<Buffer>)) -> Vec<Report> {
        let mut validator = validator(1);
        let b = buffer(&mut validator, 256);
        let c = buffer(&mut validator, 256);

        submit(&mut validator, 0, record(|builder| f(builder, b, c)))
    }

    #[test]
    fn primary_reads_what_a_secondary_wrote() {
        let reports = replay(|builder, b, c| {
            let fill = secondary(|builder| {
                builder.fill_buffer(b, 0..256).unwrap();
            });
            builder
                .execute_commands([fill])
                .unwrap()
                .copy_buffer(CopyBufferInfo::buffers(b, c, 256))
                .unwrap();
        });
        assert_eq!(hazard_kinds(&reports), vec![HazardKind::ReadAfterWrite]);

        let hazard = reports[0].as_hazard().unwrap();
        assert_eq!(hazard.prior.command_name, "fill_buffer");
        assert_eq!(hazard.prior.position.command, 0);
        assert_eq!(hazard.prior.position.secondary_command, Some(0));
        assert_eq!(hazard.current.position.command, 1);
        assert_eq!(hazard.current.position.secondary_command, None);

        // A barrier recorded in the secondary covers the primary's later commands.
        let reports = replay(|builder, b, c| {
            let fill = secondary(|builder| {
                builder
                    .fill_buffer(b, 0..256)
                    .unwrap()
                    .pipeline_barrier(buffer_barriers([transfer_write_to_read(b)]))
                    .unwrap();
            });
            builder
                .execute_commands([fill])
                .unwrap()
                .copy_buffer(CopyBufferInfo::buffers(b, c, 256))
                .unwrap();
        });
        assert!(reports.is_empty());
    }

    #[test]
    fn secondary_reads_what_the_primary_wrote() {
        let reports = replay(|builder, b, c| {
            let copy = secondary(|builder| {
                builder
                    .copy_buffer(CopyBufferInfo::buffers(b, c, 256))
                    .unwrap();
            });
            builder
                .fill_buffer(b, 0..256)
                .unwrap()
                .execute_commands([copy])
                .unwrap();
        });
        assert_eq!(hazard_kinds(&reports), vec![HazardKind::ReadAfterWrite]);

        let hazard = reports[0].as_hazard().unwrap();
        assert_eq!(hazard.prior.position.secondary_command, None);
        assert_eq!(hazard.current.position.command, 1);
        assert_eq!(hazard.current.position.secondary_command, Some(0));
    }

    #[test]
    fn secondaries_of_one_command_run_in_order() {
        let fill = |b: Id<Buffer>| {
            secondary(|builder| {
                builder.fill_buffer(b, 0..256).unwrap();
            })
        };
        let copy = |b: Id<Buffer>, c: Id<Buffer>| {
            secondary(|builder| {
                builder
                    .copy_buffer(CopyBufferInfo::buffers(b, c, 256))
                    .unwrap();
            })
        };

        let reports = replay(|builder, b, c| {
            builder.execute_commands([fill(b), copy(b, c)]).unwrap();
        });
        assert_eq!(hazard_kinds(&reports), vec![HazardKind::ReadAfterWrite]);

        // Commands are numbered across all the secondaries executed by one command.
        let hazard = reports[0].as_hazard().unwrap();
        assert_eq!(hazard.prior.position.secondary_command, Some(0));
        assert_eq!(hazard.current.position.command, 0);
        assert_eq!(hazard.current.position.secondary_command, Some(1));

        let barrier = |b: Id<Buffer>| {
            secondary(|builder| {
                builder
                    .pipeline_barrier(buffer_barriers([transfer_write_to_read(b)]))
                    .unwrap();
            })
        };
        let reports = replay(|builder, b, c| {
            builder
                .execute_commands([fill(b), barrier(b), copy(b, c)])
                .unwrap();
        });
        assert!(reports.is_empty());
    }
}

mod render_passes {
    use super::*;
    use crate::{
        render_pass::{
            AttachmentDescription, AttachmentReference, ImageView, RenderPass,
            RenderPassCreateInfo, SubpassDependency, SubpassDescription,
        },
        sync::ImageLayout,
    };

    fn general(attachment: u32) -> Option<AttachmentReference> {
        Some(AttachmentReference::new(attachment, ImageLayout::General))
    }

    // Makes the color writes of `source` visible to input attachment reads and color writes of
    // `destination`.
    fn dependency(source: u32, destination: u32) -> SubpassDependency {
        SubpassDependency {
            source_subpass: Some(source),
            destination_subpass: Some(destination),
            source_stages: PipelineStages::COLOR_ATTACHMENT_OUTPUT
                | PipelineStages::FRAGMENT_SHADER,
            destination_stages: PipelineStages::FRAGMENT_SHADER
                | PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            source_access: AccessFlags::COLOR_ATTACHMENT_WRITE,
            destination_access: AccessFlags::INPUT_ATTACHMENT_READ
                | AccessFlags::COLOR_ATTACHMENT_WRITE,
            ..Default::default()
        }
    }

    // Subpass 0 writes attachment 0. Subpasses 1 and 2 read it and write attachments 1 and 2.
    // Subpass 3 reads attachments 1 and 2 and writes attachment 0 again.
    fn four_subpasses(dependencies: Vec<SubpassDependency>) -> Vec<Report> {
        let render_pass = RenderPass::new(RenderPassCreateInfo {
            attachments: vec![
                AttachmentDescription {
                    initial_layout: ImageLayout::General,
                    final_layout: ImageLayout::General,
                    ..Default::default()
                };
                3
            ],
            subpasses: vec![
                SubpassDescription {
                    color_attachments: vec![general(0)],
                    ..Default::default()
                },
                SubpassDescription {
                    input_attachments: vec![general(0)],
                    color_attachments: vec![general(1)],
                    ..Default::default()
                },
                SubpassDescription {
                    input_attachments: vec![general(0)],
                    color_attachments: vec![general(2)],
                    ..Default::default()
                },
                SubpassDescription {
                    input_attachments: vec![general(1), general(2)],
                    color_attachments: vec![general(0)],
                    ..Default::default()
                },
            ],
            dependencies,
            ..Default::default()
        })
        .unwrap();

        let mut validator = validator(1);
        let attachments: Vec<_> = (0..3)
            .map(|_| ImageView::whole(image(&mut validator)))
            .collect();

        let command_buffer = record(|builder| {
            builder.begin_render_pass(render_pass, attachments).unwrap();

            for subpass in 0..4 {
                if subpass != 0 {
                    builder.next_subpass().unwrap();
                }

                builder.draw([]).unwrap();
            }

            builder.end_render_pass().unwrap();
        });

        submit(&mut validator, 0, command_buffer)
    }

    fn diamond() -> Vec<SubpassDependency> {
        vec![
            dependency(0, 1),
            dependency(0, 2),
            dependency(1, 3),
            dependency(2, 3),
        ]
    }

    #[test]
    fn dependencies_order_subpasses() {
        assert!(four_subpasses(diamond()).is_empty());
    }

    #[test]
    fn missing_dependency_into_parallel_subpass() {
        let mut dependencies = diamond();
        dependencies.remove(1);

        let reports = four_subpasses(dependencies);
        assert_eq!(hazard_kinds(&reports), vec![HazardKind::ReadRacingWrite]);

        let hazard = reports[0].as_hazard().unwrap();
        assert_eq!(hazard.prior.position.subpass, Some(0));
        assert_eq!(hazard.current.position.subpass, Some(2));
    }

    #[test]
    fn missing_dependency_into_final_subpass() {
        let mut dependencies = diamond();
        dependencies.remove(3);

        let reports = four_subpasses(dependencies);
        assert!(!reports.is_empty());
        assert!(hazard_kinds(&reports).iter().all(|kind| kind.is_racing()));
        assert_eq!(reports.len(), hazard_kinds(&reports).len());

        let hazard = reports[0].as_hazard().unwrap();
        assert_eq!(hazard.kind, HazardKind::ReadRacingWrite);
        assert_eq!(hazard.prior.position.subpass, Some(2));
        assert_eq!(hazard.current.position.subpass, Some(3));
        assert_eq!(hazard.current.command_name, "draw");
    }

    #[test]
    fn dependency_with_wrong_access() {
        let mut dependencies = diamond();
        dependencies[0].destination_access = AccessFlags::SHADER_SAMPLED_READ;

        let reports = four_subpasses(dependencies);
        let hazard = reports[0].as_hazard().unwrap();
        assert_eq!(hazard.kind, HazardKind::ReadAfterWrite);
        assert_eq!(hazard.current.position.subpass, Some(1));
    }

    // Clears an image, then uses it as the only attachment of a render pass whose initial
    // layout differs from the subpass layout.
    fn transition_after_clear(dependencies: Vec<SubpassDependency>) -> Vec<Report> {
        let render_pass = RenderPass::new(RenderPassCreateInfo {
            attachments: vec![AttachmentDescription {
                initial_layout: ImageLayout::TransferDstOptimal,
                final_layout: ImageLayout::ColorAttachmentOptimal,
                ..Default::default()
            }],
            subpasses: vec![SubpassDescription {
                color_attachments: vec![Some(AttachmentReference::new(
                    0,
                    ImageLayout::ColorAttachmentOptimal,
                ))],
                ..Default::default()
            }],
            dependencies,
            ..Default::default()
        })
        .unwrap();

        let mut validator = validator(1);
        let image = image(&mut validator);

        let command_buffer = record(|builder| {
            builder
                .clear_color_image(image, [ImageSubresourceRange::whole()])
                .unwrap()
                .begin_render_pass(render_pass, vec![ImageView::whole(image)])
                .unwrap()
                .draw([])
                .unwrap()
                .end_render_pass()
                .unwrap();
        });

        submit(&mut validator, 0, command_buffer)
    }

    #[test]
    fn initial_transition_needs_external_dependency() {
        let reports = transition_after_clear(Vec::new());
        assert_eq!(hazard_kinds(&reports), vec![HazardKind::WriteAfterWrite]);

        let hazard = reports[0].as_hazard().unwrap();
        assert_eq!(hazard.prior.command_name, "clear_color_image");
        assert_eq!(hazard.current.command_name, "begin_render_pass");

        let reports = transition_after_clear(vec![SubpassDependency {
            source_subpass: None,
            destination_subpass: Some(0),
            source_stages: PipelineStages::ALL_TRANSFER,
            destination_stages: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            source_access: AccessFlags::TRANSFER_WRITE,
            destination_access: AccessFlags::COLOR_ATTACHMENT_READ
                | AccessFlags::COLOR_ATTACHMENT_WRITE,
            ..Default::default()
        }]);
        assert!(reports.is_empty());
    }
}
