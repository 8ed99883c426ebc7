use serde::{Deserialize, Serialize};

use crate::dispatcher::MemberKind;

/// Shape presented to consumers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollectionShape {
    /// Indexed, duplicates allowed.
    #[default]
    List,
    /// De-duplicated by member equality, no indexed access.
    Set,
}

/// What a comparator looks at when ordering members.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderingBasis {
    Handles,
    Instances,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub collection: CollectionShape,
    /// `None` leaves the member kind undecided until the first consumer binds.
    pub member_kind: Option<MemberKind>,
    /// Without an explicit comparator, a basis alone selects natural ordering.
    pub ordering_basis: Option<OrderingBasis>,
    /// Name looked up in the ordering registry (`"natural"`, `"service-id"`, or user ones).
    pub comparator: Option<String>,
    /// Slots of the bounded event channel; 0 counts as 1.
    pub event_capacity: usize,
}

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            collection: CollectionShape::List,
            member_kind: None,
            ordering_basis: None,
            comparator: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl TrackerConfig {
    pub fn list() -> Self {
        Self::default()
    }

    pub fn set() -> Self {
        Self {
            collection: CollectionShape::Set,
            ..Self::default()
        }
    }

    pub fn with_member_kind(mut self, kind: MemberKind) -> Self {
        self.member_kind = Some(kind);
        self
    }

    pub fn ordered_by(mut self, basis: OrderingBasis) -> Self {
        self.ordering_basis = Some(basis);
        self
    }

    pub fn with_comparator(mut self, name: impl Into<String>) -> Self {
        self.comparator = Some(name.into());
        self
    }
}
