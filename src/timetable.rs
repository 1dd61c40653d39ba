use chrono::{Duration, NaiveTime};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub slot_index: usize,
    pub starts_at: String,
    pub ends_at: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SlotPlan {
    pub slot_minutes: i64,
    pub slot_count: usize,
    /// Break inserted after the 1-based slot number, when set.
    pub break_after: Option<usize>,
    pub break_minutes: i64,
}

/// Generates consecutive HH:MM slots from a day start. chrono time addition
/// wraps modulo 24h, so a plan running past midnight produces wrapped labels
/// instead of panicking.
pub fn generate_slots(day_start: NaiveTime, plan: &SlotPlan) -> Vec<TimeSlot> {
    let mut slots = Vec::with_capacity(plan.slot_count);
    let mut cursor = day_start;
    for i in 0..plan.slot_count {
        let end = cursor + Duration::minutes(plan.slot_minutes);
        slots.push(TimeSlot {
            slot_index: i,
            starts_at: cursor.format("%H:%M").to_string(),
            ends_at: end.format("%H:%M").to_string(),
        });
        cursor = end;
        if plan.break_after == Some(i + 1) {
            cursor += Duration::minutes(plan.break_minutes);
        }
    }
    slots
}
