//! Lifecycle phases and the write state machine.
//!
//! A write moves through
//! `Pending -> Validating -> Valid -> BeforeSaveHooks -> Encoding ->
//! Persisting -> AfterSaveHooks -> Committed`, or ends in `Rejected`.
//! Before-save hooks may change the document, so their output is checked
//! again: `BeforeSaveHooks -> Invalid` covers a hook that broke it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A lifecycle phase at which hooks can be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    BeforeSave,
    AfterSave,
    BeforeLoad,
    AfterLoad,
    BeforeDelete,
    AfterDelete,
}

impl Phase {
    pub const ALL: [Self; 6] = [
        Self::BeforeSave,
        Self::AfterSave,
        Self::BeforeLoad,
        Self::AfterLoad,
        Self::BeforeDelete,
        Self::AfterDelete,
    ];

    /// Pre-commit phases may mutate the document and veto the operation.
    pub const fn is_before(self) -> bool {
        matches!(self, Self::BeforeSave | Self::BeforeLoad | Self::BeforeDelete)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BeforeSave => "beforeSave",
            Self::AfterSave => "afterSave",
            Self::BeforeLoad => "beforeLoad",
            Self::AfterLoad => "afterLoad",
            Self::BeforeDelete => "beforeDelete",
            Self::AfterDelete => "afterDelete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect();
        Self::ALL
            .into_iter()
            .find(|phase| phase.as_str().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| Error::InvalidData(format!("unknown lifecycle phase `{s}`")))
    }
}

/// State of a single write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteState {
    Pending,
    Validating,
    Valid,
    Invalid,
    BeforeSaveHooks,
    Encoding,
    Persisting,
    AfterSaveHooks,
    Committed,
    Rejected,
}

impl WriteState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Rejected)
    }

    /// Whether `next` is a legal successor of `self`.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Validating)
                | (Self::Validating, Self::Valid | Self::Invalid)
                | (Self::Invalid, Self::Rejected)
                | (Self::Valid, Self::BeforeSaveHooks)
                | (Self::BeforeSaveHooks, Self::Encoding | Self::Invalid | Self::Rejected)
                | (Self::Encoding, Self::Persisting | Self::Rejected)
                | (Self::Persisting, Self::AfterSaveHooks | Self::Rejected)
                | (Self::AfterSaveHooks, Self::Committed)
        )
    }
}

impl fmt::Display for WriteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
