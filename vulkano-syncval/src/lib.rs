//! Synchronization validation for Vulkan command streams.
//!
//! This crate replays a recorded stream of GPU commands offline and reports every pair of
//! accesses to the same storage (a byte range of a buffer or a subresource of an image) that is
//! not separated by a correctly scoped synchronization edge: a pipeline barrier, an event
//! set/wait pair, a subpass dependency or a semaphore between queues. No Vulkan driver is
//! loaded; only the Vulkan vocabulary of pipeline stages and memory accesses is used.
//!
//! # Usage
//!
//! 1. Create a [`SyncValidator`] with the queues of the device.
//! 2. Register buffers, images, events, semaphores and render passes with it.
//! 3. Record [`CommandBuffer`]s through [`RecordingCommandBuffer`].
//! 4. Submit them with [`SyncValidator::queue_submit`], which returns the [`Report`]s found.
//!
//! ```
//! use vulkano_syncval::{
//!     command_buffer::{BufferCopy, CopyBufferInfo, RecordingCommandBuffer},
//!     queue::{QueueCreateInfo, SubmitInfo, SyncValidator, SyncValidatorCreateInfo},
//!     report::HazardKind,
//!     resource::BufferCreateInfo,
//! };
//!
//! let mut validator = SyncValidator::new(SyncValidatorCreateInfo {
//!     queues: vec![QueueCreateInfo::default()],
//!     ..Default::default()
//! });
//! let queue = validator.queues().next().unwrap();
//! let buffer_info = BufferCreateInfo { size: 256, ..Default::default() };
//! let a = validator.create_buffer(buffer_info.clone()).unwrap();
//! let b = validator.create_buffer(buffer_info).unwrap();
//!
//! let mut builder = RecordingCommandBuffer::primary(0);
//! builder
//!     .copy_buffer(CopyBufferInfo::buffers(a, b, 256))
//!     .unwrap()
//!     .copy_buffer(CopyBufferInfo::buffers(a, b, 256))
//!     .unwrap();
//! let command_buffer = builder.end().unwrap();
//!
//! let reports = validator
//!     .queue_submit(queue, &[SubmitInfo::command_buffers([command_buffer])])
//!     .unwrap();
//! assert_eq!(reports.len(), 1);
//! assert_eq!(
//!     reports[0].as_hazard().unwrap().kind,
//!     HazardKind::WriteAfterWrite,
//! );
//! ```

pub use self::{
    command_buffer::{CommandBuffer, RecordingCommandBuffer},
    position::LogicalPosition,
    queue::SyncValidator,
    report::Report,
};
use std::{
    borrow::Cow,
    cmp,
    error::Error,
    fmt::{Debug, Display, Error as FmtError, Formatter},
    hash::{Hash, Hasher},
    marker::PhantomData,
};

pub(crate) mod access;
pub mod command_buffer;
pub mod event;
mod macros;
pub mod position;
pub mod queue;
mod range_map;
pub mod render_pass;
mod replay;
pub mod report;
pub mod resource;
pub mod sync;
mod tests;

/// Represents memory size and offset values on a Vulkan device.
pub type DeviceSize = u64;

/// The index of an object registered with the validator.
///
/// The type parameter tells what kind of object the ID refers to.
pub struct Id<T> {
    index: u32,
    marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    pub(crate) fn new(index: usize) -> Self {
        Id {
            index: index as u32,
            marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.index as usize
    }
}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> Debug for Id<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.debug_tuple("Id").field(&self.index).finish()
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

/// A helper type for non-exhaustive structs.
///
/// This type cannot be constructed outside this crate. Structs that have a field of this type can
/// therefore only be constructed with `..Default::default()`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NonExhaustive(pub(crate) ());

impl Debug for NonExhaustive {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.pad("NonExhaustive")
    }
}

/// An error that can happen when the input to a function of this crate is not valid.
#[derive(Clone, Default)]
pub struct ValidationError {
    /// The context in which the problem exists (e.g. a specific parameter).
    pub context: Cow<'static, str>,

    /// A description of the problem.
    pub problem: Cow<'static, str>,

    /// Notes the Vulkan VUIDs that were violated.
    pub vuids: &'static [&'static str],
}

impl ValidationError {
    pub(crate) fn add_context(
        mut self: Box<Self>,
        context: impl Into<Cow<'static, str>>,
    ) -> Box<Self> {
        if self.context.is_empty() {
            self.context = context.into();
        } else {
            self.context = format!("{}.{}", context.into(), self.context).into();
        }

        self
    }
}

impl Debug for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        Display::fmt(self, f)
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        if self.context.is_empty() {
            write!(f, "{}", self.problem)?;
        } else {
            write!(f, "{}: {}", self.context, self.problem)?;
        }

        if !self.vuids.is_empty() {
            write!(f, "\n\nVulkan VUIDs:")?;

            for vuid in self.vuids {
                write!(f, "\n    {}", vuid)?;
            }
        }

        Ok(())
    }
}

impl Error for ValidationError {}
