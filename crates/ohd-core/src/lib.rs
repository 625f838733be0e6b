pub mod aggregator;
pub mod model;
pub mod socketio;

pub use aggregator::{
    activity_buckets, delegation_counts, Aggregator, BucketWindow, IngestOutcome, LoggedAction,
    DEFAULT_WINDOW_MINUTES, MAX_DELEGATION_AGENTS, MAX_WINDOW_BUCKETS,
};
pub use model::{
    parse_timestamp, ActionEvent, ActionKind, ActivityBucket, AgentCount, DelegationRecord,
    DelegationStatus, TaskSnapshot,
};

pub const ACTION_UPDATE_EVENT: &str = "action_update";
pub const CONNECT_EVENT: &str = "connect";
pub const DISCONNECT_EVENT: &str = "disconnect";

pub const CURRENT_TASK_PATH: &str = "/api/tasks/current";
pub const CURRENT_TASK_FILES_PATH: &str = "/api/tasks/current/files";
pub const FILE_CONTENT_PATH: &str = "/api/files";
