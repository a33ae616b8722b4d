use chrono::NaiveDateTime;
use std::collections::HashMap;

use crate::domain::id::{GroupId, MachineId};

/// Active machines per group. Only active machines are schedulable; a group
/// referenced by an operation must resolve to a non-empty member list.
pub type MachineGroups = HashMap<GroupId, Vec<MachineId>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableType {
    Pm,
    Break,
    Downtime,
    Reserved,
    Other,
}

impl UnavailableType {
    pub fn from_label(label: &str) -> UnavailableType {
        match label {
            "PM" | "CM" => UnavailableType::Pm,
            "BREAK" | "SHIFT_CHANGE" => UnavailableType::Break,
            "DOWNTIME" => UnavailableType::Downtime,
            "RESERVED" => UnavailableType::Reserved,
            _ => UnavailableType::Other,
        }
    }
}

/// A window during which a machine cannot run production work.
/// Only ACTIVE periods intersecting the scheduling horizon are loaded.
#[derive(Debug, Clone)]
pub struct UnavailablePeriod {
    pub machine_id: MachineId,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub unavailable_type: UnavailableType,
    pub reason: Option<String>,
}

pub type UnavailableMap = HashMap<MachineId, Vec<UnavailablePeriod>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_type_labels() {
        assert_eq!(UnavailableType::from_label("PM"), UnavailableType::Pm);
        assert_eq!(UnavailableType::from_label("DOWNTIME"), UnavailableType::Downtime);
        assert_eq!(UnavailableType::from_label("RESERVED"), UnavailableType::Reserved);
        assert_eq!(UnavailableType::from_label("WHATEVER"), UnavailableType::Other);
    }
}
