use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{Error, Result};

/// IntegrationTestStatus is the outcome of an integration test, or of the build that precedes it.
///
/// Every provider maps each value to its own vocabulary with an exhaustive `match`, so a new
/// value can't be added without deciding how every provider shows it.
#[derive(
    Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, Hash, IntoStaticStr, PartialEq,
)]
pub enum IntegrationTestStatus {
    Pending,
    InProgress,
    EnvironmentProvisionError,
    DeploymentError,
    TestFail,
    TestPassed,
    Deleted,
    TestInvalid,
    BuildPLRInProgress,
    SnapshotCreationFailed,
    BuildPLRFailed,
    GroupSnapshotCreationFailed,
}

impl IntegrationTestStatus {
    /// Parse reads a status as written in annotations.
    ///
    /// An unrecognized value is an error, never a default.
    pub fn parse(s: &str) -> Result<Self> {
        s.parse().map_err(|_| Error::UnknownStatus(s.into()))
    }

    /// Values returns every status, in declaration order.
    pub fn values() -> impl Iterator<Item = Self> {
        Self::iter()
    }

    /// Is_final reports whether no further change is expected for this status.
    pub fn is_final(self) -> bool {
        use IntegrationTestStatus::*;
        match self {
            Pending | InProgress | BuildPLRInProgress => false,
            EnvironmentProvisionError | DeploymentError | TestFail | TestPassed | Deleted
            | TestInvalid | SnapshotCreationFailed | BuildPLRFailed
            | GroupSnapshotCreationFailed => true,
        }
    }
}
