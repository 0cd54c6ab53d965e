use chrono::{DateTime, FixedOffset, Timelike, Utc};

use super::{Locale, MessageFormatter};
use crate::models::ContestObservation;

/// Which greeting a reminder carries, picked from the local hour the
/// scheduler fired at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderSlot {
    Morning,
    Afternoon,
    Evening,
    Default,
}

impl ReminderSlot {
    pub fn at(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        match now.with_timezone(&offset).hour() {
            12 => ReminderSlot::Morning,
            16 => ReminderSlot::Afternoon,
            20 => ReminderSlot::Evening,
            _ => ReminderSlot::Default,
        }
    }
}

fn zone_label(offset: FixedOffset) -> String {
    if offset.local_minus_utc() == 9 * 3600 {
        "JST".to_string()
    } else {
        format!("UTC{}", offset)
    }
}

/// "2025/07/12 21:00 - 22:40 JST"
pub fn format_contest_time(contest: &ContestObservation, offset: FixedOffset) -> String {
    let start = contest.start_time.with_timezone(&offset);
    let end = contest.end_time().with_timezone(&offset);
    format!(
        "{} - {} {}",
        start.format("%Y/%m/%d %H:%M"),
        end.format("%H:%M"),
        zone_label(offset)
    )
}

impl MessageFormatter {
    pub fn format_reminder(
        &self,
        contest: &ContestObservation,
        slot: ReminderSlot,
        offset: FixedOffset,
    ) -> String {
        let name = &contest.title;
        let time = format_contest_time(contest, offset);
        let url = self.contest_url(&contest.contest_id);

        let greeting = match (self.locale(), slot) {
            (Locale::Ja, ReminderSlot::Morning) => {
                format!("🌅 おはようございます！今日は{}が開催されます！", name)
            }
            (Locale::Ja, ReminderSlot::Afternoon) => {
                format!("☀️ こんにちは！{}の開催まであと少しです！", name)
            }
            (Locale::Ja, ReminderSlot::Evening) => {
                format!("🌙 お疲れ様です！{}が開催中または間もなく開始です！", name)
            }
            (Locale::Ja, ReminderSlot::Default) => format!("📢 {}のリマインドです！", name),
            (Locale::En, ReminderSlot::Morning) => format!("🌅 Good morning! {} is on today!", name),
            (Locale::En, ReminderSlot::Afternoon) => {
                format!("☀️ Good afternoon! {} starts soon!", name)
            }
            (Locale::En, ReminderSlot::Evening) => {
                format!("🌙 Good evening! {} is running or about to start!", name)
            }
            (Locale::En, ReminderSlot::Default) => format!("📢 Reminder: {}", name),
        };

        let time_label = match self.locale() {
            Locale::Ja => "開催時間",
            Locale::En => "Time",
        };

        format!("{}\n📅 {}: {}\n🔗 {}", greeting, time_label, time, url)
    }
}
