//! Field metadata carried alongside storage.

use crate::field::identifier::FieldIdentifier;
use crate::field::repository::FieldHandle;
use crate::time_stamp::TimeStamp;
use std::collections::BTreeSet;

/// Mutable tracking metadata: last update time and group membership.
#[derive(Clone, Debug, Default)]
pub struct FieldTracking {
    time_stamp: Option<TimeStamp>,
    groups: BTreeSet<String>,
}

impl FieldTracking {
    pub fn time_stamp(&self) -> Option<TimeStamp> {
        self.time_stamp
    }

    pub fn update_time_stamp(&mut self, ts: TimeStamp) {
        self.time_stamp = Some(ts);
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    pub fn add_to_group(&mut self, group: impl Into<String>) {
        self.groups.insert(group.into());
    }
}

/// Back-reference from a subview to the field it slices: the parent's
/// handle, the sliced dimension, and the index along it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SubviewInfo {
    pub parent: FieldHandle,
    pub dim: usize,
    pub index: usize,
}

#[derive(Clone, Debug)]
pub struct FieldHeader {
    identifier: FieldIdentifier,
    tracking: FieldTracking,
    parent: Option<SubviewInfo>,
}

impl FieldHeader {
    pub fn new(identifier: FieldIdentifier) -> Self {
        Self {
            identifier,
            tracking: FieldTracking::default(),
            parent: None,
        }
    }

    pub fn identifier(&self) -> &FieldIdentifier {
        &self.identifier
    }

    pub fn tracking(&self) -> &FieldTracking {
        &self.tracking
    }

    pub fn tracking_mut(&mut self) -> &mut FieldTracking {
        &mut self.tracking
    }

    /// Parent field if this field is a subview.
    pub fn parent(&self) -> Option<SubviewInfo> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, info: SubviewInfo) {
        self.parent = Some(info);
    }
}
