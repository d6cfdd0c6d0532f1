// Schedule wire model returned by `GET /v2/fitso/web/schedule`
// Read-only snapshots, nothing here is mutated after decoding.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotState {
    Available,
    // Any other platform state (FULL, BOOKED, WAITLIST_AVAILABLE, ...) is not bookable
    #[default]
    #[serde(other)]
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub state: SlotState,
    #[serde(default)]
    pub workout_id: Option<u32>,
    #[serde(default)]
    pub center_id: Option<u32>,
}

impl Slot {
    pub fn is_available(&self) -> bool {
        self.state == SlotState::Available
    }

    pub fn calendar_date(&self) -> Option<NaiveDate> {
        parse_date(&self.date)
    }
}

// One time-of-day row. The platform wraps the slot in a one-element list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    #[serde(default)]
    pub classes: Vec<Slot>,
}

impl TimeEntry {
    pub fn slot(&self) -> Option<&Slot> {
        self.classes.first()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayEntry {
    // The day's calendar date, `YYYY-MM-DD`
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub class_by_time_list: Vec<TimeEntry>,
}

impl DayEntry {
    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.class_by_time_list.iter().filter_map(TimeEntry::slot)
    }

    // The day's own date, else the first slot's
    pub fn calendar_date(&self) -> Option<NaiveDate> {
        parse_date(&self.id).or_else(|| self.slots().find_map(Slot::calendar_date))
    }

    // `YYYY-MM-DD` to book `slot` under. Slots sent without a date take the day's.
    pub fn booking_date(&self, slot: &Slot) -> String {
        if !slot.date.trim().is_empty() {
            return slot.date.clone();
        }
        self.calendar_date()
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| self.id.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    #[serde(default)]
    pub class_by_date_list: Vec<DayEntry>,
}

impl Schedule {
    pub fn is_empty(&self) -> bool {
        self.class_by_date_list.is_empty()
    }

    // The furthest bookable day. Dates are compared rather than trusting
    // server order; ties and undated entries resolve to the later position.
    pub fn furthest_day(&self) -> Option<&DayEntry> {
        let mut best: Option<(&DayEntry, Option<NaiveDate>)> = None;
        for day in &self.class_by_date_list {
            let date = day.calendar_date();
            best = match best {
                Some((_, Some(best_date))) if date.map_or(true, |d| d < best_date) => best,
                _ => Some((day, date)),
            };
        }
        best.map(|(day, _)| day)
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()
}
