use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;

use crate::model::agenda::BusyEvent;

const SLOT_MINUTES: u32 = 30;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Slot {
    pub hora_inicio: String,
    pub hora_fim: String,
}

/// Free 30-minute slots of `day` between `hora_inicio:00` and `hora_fim:00`.
///
/// Busy events block every half-hour from their (rounded down) start until
/// their `hora_fim`, or a single slot when the end is unknown. On `now`'s own
/// day, slots before the next half-hour boundary after `now` are skipped.
pub fn available_slots(
    day: NaiveDate,
    hora_inicio: u32,
    hora_fim: u32,
    busy: &[BusyEvent],
    now: NaiveDateTime,
) -> Vec<Slot> {
    let hora_fim = hora_fim.min(24);
    if hora_inicio >= hora_fim {
        return Vec::new();
    }

    let window_start = hora_inicio * 60;
    let window_end = hora_fim * 60;
    let occupied = occupied_slots(day, hora_inicio, hora_fim, busy);

    let earliest = if now.date() == day {
        now.hour() * 60 + (now.minute() / SLOT_MINUTES + 1) * SLOT_MINUTES
    } else {
        window_start
    };

    let mut slots = Vec::new();
    let mut start = window_start;
    while start + SLOT_MINUTES <= window_end {
        if start >= earliest && !occupied.contains(&start) {
            slots.push(Slot {
                hora_inicio: format_minutes(start),
                hora_fim: format_minutes(start + SLOT_MINUTES),
            });
        }
        start += SLOT_MINUTES;
    }
    slots
}

/// Slot starts (minutes from midnight) covered by busy events of `day`.
fn occupied_slots(day: NaiveDate, hora_inicio: u32, hora_fim: u32, busy: &[BusyEvent]) -> BTreeSet<u32> {
    let mut occupied = BTreeSet::new();
    for event in busy.iter().filter(|e| e.data.date() == day) {
        let begin = event.data.hour() * 60 + event.data.minute();
        let end = event
            .hora_fim
            .as_deref()
            .and_then(parse_end)
            .unwrap_or(begin + SLOT_MINUTES);

        let mut cursor = begin - begin % SLOT_MINUTES;
        while cursor < end {
            let hour = cursor / 60;
            if hour >= hora_inicio && hour < hora_fim {
                occupied.insert(cursor);
            }
            cursor += SLOT_MINUTES;
        }
    }
    occupied
}

fn parse_end(text: &str) -> Option<u32> {
    let mut parts = text.trim().split(':');
    let hour: u32 = parts.next()?.trim().parse().ok()?;
    let minute: u32 = parts.next()?.trim().parse().ok()?;
    Some(hour * 60 + minute)
}

fn format_minutes(minutes: u32) -> String {
    format!("{}:{:02}", minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 25).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, 0).unwrap()
    }

    fn yesterday() -> NaiveDateTime {
        at(12, 0) - chrono::Duration::days(1)
    }

    fn busy(h: u32, m: u32, end: Option<&str>) -> BusyEvent {
        BusyEvent {
            data: at(h, m),
            hora_fim: end.map(str::to_string),
        }
    }

    fn starts(slots: &[Slot]) -> Vec<&str> {
        slots.iter().map(|s| s.hora_inicio.as_str()).collect()
    }

    #[test]
    fn empty_day_has_eighteen_slots() {
        let slots = available_slots(day(), 9, 18, &[], yesterday());
        assert_eq!(slots.len(), 18);
        assert_eq!(slots[0], Slot { hora_inicio: "9:00".into(), hora_fim: "9:30".into() });
        assert_eq!(slots[17], Slot { hora_inicio: "17:30".into(), hora_fim: "18:00".into() });
    }

    #[test]
    fn busy_event_blocks_until_its_end() {
        let events = [busy(10, 0, Some("11:00")), busy(14, 15, None)];
        let slots = available_slots(day(), 9, 12, &events, yesterday());
        assert_eq!(starts(&slots), vec!["9:00", "9:30", "11:00", "11:30"]);

        // 14:15 without an end covers 14:15-14:45, touching two slots.
        let slots = available_slots(day(), 14, 16, &events, yesterday());
        assert_eq!(starts(&slots), vec!["15:00", "15:30"]);
    }

    #[test]
    fn unparseable_end_blocks_one_slot() {
        let events = [busy(9, 30, Some("abc")), busy(10, 30, Some("11"))];
        let slots = available_slots(day(), 9, 11, &events, yesterday());
        assert_eq!(starts(&slots), vec!["9:00", "10:00"]);
    }

    #[test]
    fn events_of_other_days_are_ignored() {
        let other = BusyEvent {
            data: at(10, 0) + chrono::Duration::days(1),
            hora_fim: Some("12:00".into()),
        };
        let slots = available_slots(day(), 10, 11, &[other], yesterday());
        assert_eq!(starts(&slots), vec!["10:00", "10:30"]);
    }

    #[test]
    fn today_skips_past_slots() {
        let slots = available_slots(day(), 9, 12, &[], at(10, 0));
        assert_eq!(starts(&slots), vec!["10:30", "11:00", "11:30"]);

        let slots = available_slots(day(), 9, 12, &[], at(10, 10));
        assert_eq!(starts(&slots)[0], "10:30");

        let slots = available_slots(day(), 9, 12, &[], at(10, 40));
        assert_eq!(starts(&slots), vec!["11:00", "11:30"]);

        assert!(available_slots(day(), 9, 12, &[], at(11, 45)).is_empty());
    }

    #[test]
    fn inverted_window_is_empty() {
        assert!(available_slots(day(), 18, 9, &[], yesterday()).is_empty());
        assert!(available_slots(day(), 10, 10, &[], yesterday()).is_empty());
    }
}
