use chrono::{DateTime, Datelike, Local, Timelike, Weekday};

/// What the persona is nominally doing right now, derived purely from the
/// local clock. Fixed table, no persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityWindow {
    pub activity: &'static str,
    pub availability: &'static str,
}

/// Snapshot of the persona's surroundings used by the prompt composer.
#[derive(Debug, Clone)]
pub struct EnvironmentSnapshot {
    pub day: String,
    pub time: String,
    pub weather: String,
    pub trending: String,
    pub window: ActivityWindow,
}

impl EnvironmentSnapshot {
    pub fn summary(&self) -> String {
        format!(
            "CURRENT TIME: {}, {}. WEATHER: {}. TRENDING: {}. STATUS: {}. ({})",
            self.day,
            self.time,
            self.weather,
            self.trending,
            self.window.activity,
            self.window.availability
        )
    }
}

pub fn snapshot_now(weather: String, trending: String) -> EnvironmentSnapshot {
    let now = Local::now();
    snapshot_at(now, weather, trending)
}

pub fn snapshot_at(
    now: DateTime<Local>,
    weather: String,
    trending: String,
) -> EnvironmentSnapshot {
    EnvironmentSnapshot {
        day: now.format("%A").to_string(),
        time: now.format("%I:%M %p").to_string(),
        weather,
        trending,
        window: activity_window(now.hour(), now.weekday()),
    }
}

/// Weekday/weekend activity schedule keyed on the current hour.
pub fn activity_window(hour: u32, weekday: Weekday) -> ActivityWindow {
    let is_weekend = matches!(weekday, Weekday::Sat | Weekday::Sun);

    if !is_weekend {
        match hour {
            2..=6 => ActivityWindow {
                activity: "Sleeping (probably scrolling TikTok half-asleep)",
                availability: "Asleep",
            },
            7..=8 => ActivityWindow {
                activity: "Waking up / Making coffee / Hating the morning",
                availability: "Groggy",
            },
            9..=16 => ActivityWindow {
                activity: "Working on design projects (Stressed)",
                availability: "Busy",
            },
            17..=18 => ActivityWindow {
                activity: "At the Gym (Leg day, regretting it)",
                availability: "Distracted",
            },
            19..=23 => ActivityWindow {
                activity: "Gaming (Valorant/Overwatch) or Netflix",
                availability: "Free",
            },
            // Midnight - 2AM
            _ => ActivityWindow {
                activity: "Doomscrolling / Late night thoughts",
                availability: "Tired",
            },
        }
    } else {
        match hour {
            4..=10 => ActivityWindow {
                activity: "Sleeping in (Recovering)",
                availability: "Asleep",
            },
            11..=15 => ActivityWindow {
                activity: "Brunch with Sarah or Rotting in bed",
                availability: "Free",
            },
            16..=19 => ActivityWindow {
                activity: "Gaming or Out in the city",
                availability: "Free",
            },
            _ => ActivityWindow {
                activity: "Out at a bar or Late night gaming",
                availability: "Drunk or Hyper",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn weekday_work_hours_are_busy() {
        let window = activity_window(10, Weekday::Tue);
        assert_eq!(window.availability, "Busy");
    }

    #[test]
    fn weekend_morning_is_asleep() {
        let window = activity_window(9, Weekday::Sun);
        assert_eq!(window.availability, "Asleep");
    }

    #[test]
    fn weekday_small_hours_are_tired() {
        let window = activity_window(1, Weekday::Wed);
        assert_eq!(window.availability, "Tired");
        let window = activity_window(0, Weekday::Wed);
        assert_eq!(window.availability, "Tired");
    }

    #[test]
    fn summary_line_includes_all_sections() {
        let now = Local.with_ymd_and_hms(2025, 6, 2, 10, 30, 0).unwrap();
        let snapshot = snapshot_at(now, "Cloudy, 14°C".to_string(), "Nothing special".to_string());
        let summary = snapshot.summary();
        assert!(summary.starts_with("CURRENT TIME: Monday,"));
        assert!(summary.contains("WEATHER: Cloudy, 14°C."));
        assert!(summary.contains("TRENDING: Nothing special."));
        assert!(summary.contains("STATUS: Working on design projects (Stressed). (Busy)"));
    }
}
