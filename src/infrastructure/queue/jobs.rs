//! Redis key layout shared by the API server and task executors.

pub mod queues {
    pub const TASK_QUEUE: &str = "ragflow:task_queue";
}

pub mod keys {
    /// Set of every executor name that ever reported.
    pub const EXECUTORS: &str = "TASKEXE";

    /// Sorted set of one executor's heartbeats, scored by unix time.
    pub fn heartbeats(executor: &str) -> String {
        executor.to_string()
    }
}

/// Heartbeats older than this are trimmed and never reported.
pub const HEARTBEAT_RETENTION_SECONDS: f64 = 30.0 * 60.0;
