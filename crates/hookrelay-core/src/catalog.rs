//! Closed catalog of domain events that subscriptions may select.
//!
//! The catalog is versioned with the code: adding an event type is a code
//! change, never a data change. Subscriptions store the wire names
//! returned by [`EventType::as_str`].

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Event name used by the manual test trigger.
///
/// Not part of the catalog, so no subscription can select it; test
/// deliveries are addressed to one subscription directly.
pub const TEST_EVENT: &str = "test";

/// Domain event that can be delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A contact was created.
    #[serde(rename = "contact.created")]
    ContactCreated,
    /// A contact was updated.
    #[serde(rename = "contact.updated")]
    ContactUpdated,
    /// A contact was deleted.
    #[serde(rename = "contact.deleted")]
    ContactDeleted,
    /// A company was created.
    #[serde(rename = "company.created")]
    CompanyCreated,
    /// A company was updated.
    #[serde(rename = "company.updated")]
    CompanyUpdated,
    /// A company was deleted.
    #[serde(rename = "company.deleted")]
    CompanyDeleted,
    /// A deal was created.
    #[serde(rename = "deal.created")]
    DealCreated,
    /// A deal was updated.
    #[serde(rename = "deal.updated")]
    DealUpdated,
    /// A deal moved to another pipeline stage.
    #[serde(rename = "deal.stage_changed")]
    DealStageChanged,
    /// A deal was won.
    #[serde(rename = "deal.won")]
    DealWon,
    /// A deal was lost.
    #[serde(rename = "deal.lost")]
    DealLost,
    /// An activity was created.
    #[serde(rename = "activity.created")]
    ActivityCreated,
    /// An activity was completed.
    #[serde(rename = "activity.completed")]
    ActivityCompleted,
    /// An inbound message was received.
    #[serde(rename = "message.received")]
    MessageReceived,
    /// An outbound message was sent.
    #[serde(rename = "message.sent")]
    MessageSent,
}

impl EventType {
    /// Every event type in the catalog, in display order.
    pub const ALL: [Self; 15] = [
        Self::ContactCreated,
        Self::ContactUpdated,
        Self::ContactDeleted,
        Self::CompanyCreated,
        Self::CompanyUpdated,
        Self::CompanyDeleted,
        Self::DealCreated,
        Self::DealUpdated,
        Self::DealStageChanged,
        Self::DealWon,
        Self::DealLost,
        Self::ActivityCreated,
        Self::ActivityCompleted,
        Self::MessageReceived,
        Self::MessageSent,
    ];

    /// Returns the wire name, e.g. `deal.won`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ContactCreated => "contact.created",
            Self::ContactUpdated => "contact.updated",
            Self::ContactDeleted => "contact.deleted",
            Self::CompanyCreated => "company.created",
            Self::CompanyUpdated => "company.updated",
            Self::CompanyDeleted => "company.deleted",
            Self::DealCreated => "deal.created",
            Self::DealUpdated => "deal.updated",
            Self::DealStageChanged => "deal.stage_changed",
            Self::DealWon => "deal.won",
            Self::DealLost => "deal.lost",
            Self::ActivityCreated => "activity.created",
            Self::ActivityCompleted => "activity.completed",
            Self::MessageReceived => "message.received",
            Self::MessageSent => "message.sent",
        }
    }

    /// Looks up a catalog entry by wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event_type| event_type.as_str() == name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a name is not in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn catalog_names_are_unique() {
        let mut names: Vec<_> = EventType::ALL.iter().map(|e| e.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EventType::ALL.len());
    }

    #[test]
    fn test_event_is_not_subscribable() {
        assert_eq!(EventType::parse(TEST_EVENT), None);
        assert!("test".parse::<EventType>().is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&EventType::DealStageChanged).unwrap();
        assert_eq!(json, "\"deal.stage_changed\"");

        let parsed: EventType = serde_json::from_str("\"message.received\"").unwrap();
        assert_eq!(parsed, EventType::MessageReceived);
    }

    proptest! {
        #[test]
        fn wire_names_parse_back(index in 0usize..EventType::ALL.len()) {
            let event_type = EventType::ALL[index];
            prop_assert_eq!(event_type.as_str().parse::<EventType>().unwrap(), event_type);
            prop_assert_eq!(event_type.to_string(), event_type.as_str());
        }

        #[test]
        fn names_outside_catalog_are_rejected(name in "[a-z]{1,12}\\.[a-z_]{1,12}") {
            let known = EventType::ALL.iter().any(|e| e.as_str() == name);
            prop_assert_eq!(EventType::parse(&name).is_some(), known);
        }
    }
}
