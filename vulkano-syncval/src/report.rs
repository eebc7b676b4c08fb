//! The findings of the validator.

use crate::{
    position::LogicalPosition,
    resource::ResourceKey,
    sync::StageAccess,
};
use std::{borrow::Cow, error::Error, fmt, ops::Range};

/// A single finding produced while replaying the command stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Report {
    /// Two accesses to the same storage are not correctly synchronized.
    Hazard(Hazard),

    /// A synchronization primitive was used in an invalid way.
    Usage(UsageError),
}

impl Report {
    /// Returns the stable identifier of the rule that was violated.
    pub fn rule_id(&self) -> &'static str {
        match self {
            Report::Hazard(hazard) => hazard.kind.rule_id(),
            Report::Usage(error) => error.vuid,
        }
    }

    #[inline]
    pub fn as_hazard(&self) -> Option<&Hazard> {
        match self {
            Report::Hazard(hazard) => Some(hazard),
            Report::Usage(_) => None,
        }
    }

    #[inline]
    pub fn as_usage(&self) -> Option<&UsageError> {
        match self {
            Report::Hazard(_) => None,
            Report::Usage(error) => Some(error),
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::Hazard(hazard) => fmt::Display::fmt(hazard, f),
            Report::Usage(error) => fmt::Display::fmt(error, f),
        }
    }
}

impl Error for Report {}

/// The kind of a hazard.
///
/// The `*After*` kinds are found between accesses that are ordered but not synchronized, the
/// `*Racing*` kinds between accesses that are not ordered at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HazardKind {
    ReadAfterWrite,
    WriteAfterRead,
    WriteAfterWrite,
    ReadRacingWrite,
    WriteRacingRead,
    WriteRacingWrite,
}

impl HazardKind {
    /// Returns the stable identifier of the hazard kind.
    pub const fn rule_id(self) -> &'static str {
        match self {
            HazardKind::ReadAfterWrite => "SYNC-HAZARD-READ-AFTER-WRITE",
            HazardKind::WriteAfterRead => "SYNC-HAZARD-WRITE-AFTER-READ",
            HazardKind::WriteAfterWrite => "SYNC-HAZARD-WRITE-AFTER-WRITE",
            HazardKind::ReadRacingWrite => "SYNC-HAZARD-READ-RACING-WRITE",
            HazardKind::WriteRacingRead => "SYNC-HAZARD-WRITE-RACING-READ",
            HazardKind::WriteRacingWrite => "SYNC-HAZARD-WRITE-RACING-WRITE",
        }
    }

    /// Returns whether the two accesses are not ordered at all.
    #[inline]
    pub const fn is_racing(self) -> bool {
        matches!(
            self,
            HazardKind::ReadRacingWrite
                | HazardKind::WriteRacingRead
                | HazardKind::WriteRacingWrite,
        )
    }
}

/// One side of a hazard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HazardAccess {
    /// The stage and access type of the access.
    pub access: StageAccess,

    /// Where the access was made.
    pub position: LogicalPosition,

    /// The name of the command that made the access.
    pub command_name: &'static str,
}

/// Two conflicting accesses to the same storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hazard {
    pub kind: HazardKind,

    /// The resource that was accessed.
    pub resource: ResourceKey,

    /// The linear range of the resource where the accesses overlap: bytes for buffers,
    /// subresource indices for images.
    pub range: Range<u64>,

    /// The earlier access.
    pub prior: HazardAccess,

    /// The access that caused the hazard.
    pub current: HazardAccess,
}

impl fmt::Display for Hazard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({:?}) at {} conflicts with {} ({:?}) at {} on {:?} range {:?}",
            self.kind.rule_id(),
            self.current.command_name,
            self.current.access,
            self.current.position,
            self.prior.command_name,
            self.prior.access,
            self.prior.position,
            self.resource,
            self.range,
        )
    }
}

/// An invalid use of a synchronization primitive, or a command that conflicts with itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsageError {
    /// Where the offending command is.
    pub position: LogicalPosition,

    /// The name of the offending command.
    pub command_name: &'static str,

    /// A description of the problem.
    pub problem: Cow<'static, str>,

    /// The identifier of the rule that was violated.
    pub vuid: &'static str,
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} at {}: {}",
            self.vuid, self.command_name, self.position, self.problem,
        )
    }
}
