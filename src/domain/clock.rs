use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn format_date(at: DateTime<Local>) -> String {
    at.format(DATE_FORMAT).to_string()
}

/// Seconds elapsed since a `DATE_FORMAT` string, or 0 when it does not parse.
pub fn delta_seconds(date: &str) -> f64 {
    let Ok(naive) = chrono::NaiveDateTime::parse_from_str(date, DATE_FORMAT) else {
        return 0.0;
    };
    match Local.from_local_datetime(&naive).single() {
        Some(then) => (Local::now() - then).num_milliseconds() as f64 / 1000.0,
        None => 0.0,
    }
}

/// Creation and modification stamps shared by every stored row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamp {
    pub create_time: i64,
    pub create_date: String,
    pub update_time: i64,
    pub update_date: String,
}

impl Stamp {
    pub fn now() -> Self {
        let now = Local::now();
        let millis = now.timestamp_millis();
        let date = format_date(now);
        Self {
            create_time: millis,
            create_date: date.clone(),
            update_time: millis,
            update_date: date,
        }
    }

    pub fn touch(&mut self) {
        let now = Local::now();
        self.update_time = now.timestamp_millis();
        self.update_date = format_date(now);
    }
}

impl Default for Stamp {
    fn default() -> Self {
        Self::now()
    }
}
