// Slot selection over a schedule snapshot
//
// Only the furthest bookable day is considered. Preference tiers, first match wins:
//   1. the target slot, if AVAILABLE
//   2. the first AVAILABLE slot in fallback-list order
//   3. the first AVAILABLE slot in server order
// Tiers 1 and 3 scan time entries in the order the server returned them.

use crate::config::RaceConfig;
use crate::schedule::{DayEntry, Schedule, Slot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotPreferences {
    pub target_slot_id: String,
    pub fallback_slot_ids: Vec<String>,
}

impl SlotPreferences {
    pub fn new(target_slot_id: impl Into<String>, fallback_slot_ids: Vec<String>) -> Self {
        Self {
            target_slot_id: target_slot_id.into(),
            fallback_slot_ids,
        }
    }
}

impl From<&RaceConfig> for SlotPreferences {
    fn from(config: &RaceConfig) -> Self {
        Self::new(config.target_slot_id.clone(), config.fallback_slot_ids.clone())
    }
}

pub fn select_slot<'a>(schedule: &'a Schedule, prefs: &SlotPreferences) -> Option<&'a Slot> {
    schedule
        .furthest_day()
        .and_then(|day| select_slot_in_day(day, prefs))
}

pub fn select_slot_in_day<'a>(day: &'a DayEntry, prefs: &SlotPreferences) -> Option<&'a Slot> {
    let available_with_id =
        |id: &str| day.slots().find(|slot| slot.is_available() && slot.id == id);

    available_with_id(prefs.target_slot_id.as_str())
        // Fallback order decides here, not server order
        .or_else(|| {
            prefs
                .fallback_slot_ids
                .iter()
                .find_map(|id| available_with_id(id.as_str()))
        })
        .or_else(|| day.slots().find(|slot| slot.is_available()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{SlotState, TimeEntry};

    fn slot(id: &str, date: &str, state: SlotState) -> Slot {
        Slot {
            id: id.to_string(),
            date: date.to_string(),
            start_time: None,
            end_time: None,
            state,
            workout_id: None,
            center_id: None,
        }
    }

    fn day(date: &str, slots: &[(&str, SlotState)]) -> DayEntry {
        DayEntry {
            id: date.to_string(),
            class_by_time_list: slots
                .iter()
                .map(|(id, state)| TimeEntry {
                    classes: vec![slot(id, date, state.clone())],
                })
                .collect(),
        }
    }

    fn prefs() -> SlotPreferences {
        SlotPreferences::new("15", vec!["16".into(), "15".into(), "17".into(), "14".into()])
    }

    use SlotState::{Available as A, Unavailable as U};

    #[test]
    fn test_target_wins_when_available() {
        let schedule = Schedule {
            class_by_date_list: vec![day(
                "2026-10-20",
                &[("14", A), ("16", A), ("15", A), ("17", A)],
            )],
        };

        let chosen = select_slot(&schedule, &prefs()).unwrap();
        assert_eq!(chosen.id, "15");

        // Fallback order is irrelevant once the target is open
        let reversed = SlotPreferences::new("15", vec!["14".into(), "17".into(), "16".into()]);
        assert_eq!(select_slot(&schedule, &reversed).unwrap().id, "15");
    }

    #[test]
    fn test_fallback_order_beats_server_order() {
        let schedule = Schedule {
            class_by_date_list: vec![day(
                "2026-10-20",
                &[("12", A), ("14", A), ("15", U), ("17", A), ("16", U)],
            )],
        };

        // 16 and 15 are taken, 17 precedes 14 in fallback order
        let chosen = select_slot(&schedule, &prefs()).unwrap();
        assert_eq!(chosen.id, "17");
    }

    #[test]
    fn test_any_available_slot_is_last_resort() {
        let schedule = Schedule {
            class_by_date_list: vec![day(
                "2026-10-20",
                &[("10", U), ("11", A), ("12", A), ("15", U)],
            )],
        };

        assert_eq!(select_slot(&schedule, &prefs()).unwrap().id, "11");
    }

    #[test]
    fn test_nothing_available_returns_none() {
        let schedule = Schedule {
            class_by_date_list: vec![
                day("2026-10-19", &[("15", A)]),
                day("2026-10-20", &[("14", U), ("15", U), ("16", U)]),
            ],
        };

        // Earlier days are never considered
        assert!(select_slot(&schedule, &prefs()).is_none());
        assert!(select_slot(&Schedule::default(), &prefs()).is_none());
    }

    #[test]
    fn test_uses_furthest_day_even_when_out_of_order() {
        let schedule = Schedule {
            class_by_date_list: vec![
                day("2026-10-20", &[("16", A)]),
                day("2026-10-18", &[("15", A)]),
            ],
        };

        let chosen = select_slot(&schedule, &prefs()).unwrap();
        assert_eq!(chosen.id, "16");
        assert_eq!(chosen.date, "2026-10-20");
    }

    #[test]
    fn test_time_entries_without_class_are_skipped() {
        let mut target_day = day("2026-10-20", &[("15", A)]);
        target_day
            .class_by_time_list
            .insert(0, TimeEntry { classes: vec![] });
        let schedule = Schedule {
            class_by_date_list: vec![target_day],
        };

        assert_eq!(select_slot(&schedule, &prefs()).unwrap().id, "15");
    }
}
