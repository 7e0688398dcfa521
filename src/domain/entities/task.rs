use serde::{Deserialize, Serialize};

use super::new_id;
use crate::domain::clock::Stamp;
use crate::domain::ports::Entity;

pub const MAX_PAGE: i64 = 100_000_000;

/// A unit of parsing work for one page range of one document.
///
/// `progress` runs from 0 to 1; -1 marks a failed or cancelled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub doc_id: String,
    #[serde(default)]
    pub from_page: i64,
    #[serde(default = "default_to_page")]
    pub to_page: i64,
    #[serde(default)]
    pub task_type: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub begin_at: Option<i64>,
    #[serde(default)]
    pub process_duation: f64,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub progress_msg: String,
    #[serde(default)]
    pub retry_count: i64,
    #[serde(flatten)]
    pub stamp: Stamp,
}

fn default_to_page() -> i64 {
    MAX_PAGE
}

impl Task {
    pub fn new(doc_id: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            doc_id: doc_id.into(),
            from_page: 0,
            to_page: MAX_PAGE,
            task_type: String::new(),
            priority: 0,
            begin_at: None,
            process_duation: 0.0,
            progress: 0.0,
            progress_msg: String::new(),
            retry_count: 0,
            stamp: Stamp::now(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.progress >= 1.0 || self.progress < 0.0
    }
}

impl Entity for Task {
    const TABLE: &'static str = "task";

    fn id(&self) -> &str {
        &self.id
    }

    fn touch(&mut self) {
        self.stamp.touch();
    }
}
