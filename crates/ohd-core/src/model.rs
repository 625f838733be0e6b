use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Kind tag carried in the `action` field of an agent event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ActionKind {
    CmdRun,
    IPythonRunCell,
    FileWrite,
    FileRead,
    BrowseUrl,
    Delegate,
    Finish,
    Message,
    /// A tag this build does not recognise, kept verbatim.
    Other(String),
    /// No tag at all.
    #[default]
    Unknown,
}

impl ActionKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" => ActionKind::Unknown,
            "CmdRunAction" | "run" => ActionKind::CmdRun,
            "IPythonRunCellAction" | "run_ipython" => ActionKind::IPythonRunCell,
            "FileWriteAction" | "write" => ActionKind::FileWrite,
            "FileReadAction" | "read" => ActionKind::FileRead,
            "BrowseURLAction" | "browse" => ActionKind::BrowseUrl,
            "AgentDelegateAction" | "delegate" => ActionKind::Delegate,
            "AgentFinishAction" | "finish" => ActionKind::Finish,
            "MessageAction" | "message" => ActionKind::Message,
            other => ActionKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::CmdRun => "CmdRunAction",
            ActionKind::IPythonRunCell => "IPythonRunCellAction",
            ActionKind::FileWrite => "FileWriteAction",
            ActionKind::FileRead => "FileReadAction",
            ActionKind::BrowseUrl => "BrowseURLAction",
            ActionKind::Delegate => "AgentDelegateAction",
            ActionKind::Finish => "AgentFinishAction",
            ActionKind::Message => "MessageAction",
            ActionKind::Other(tag) => tag.as_str(),
            ActionKind::Unknown => "UnknownAction",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ActionKind::Other(_) | ActionKind::Unknown)
    }

    pub fn touches_files(&self) -> bool {
        matches!(self, ActionKind::FileWrite | ActionKind::FileRead)
            || matches!(self, ActionKind::Other(tag) if tag.contains("File"))
    }

    pub fn runs_code(&self) -> bool {
        matches!(self, ActionKind::CmdRun | ActionKind::IPythonRunCell)
            || matches!(self, ActionKind::Other(tag) if tag.contains("Cmd") || tag.contains("Python"))
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = std::convert::Infallible;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(ActionKind::parse(input))
    }
}

impl Serialize for ActionKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let val = Value::deserialize(deserializer)?;
        Ok(match val {
            Value::String(s) => ActionKind::parse(&s),
            _ => ActionKind::Unknown,
        })
    }
}

/// One step taken by the agent runtime, as delivered by `action_update` or
/// seeded from the task snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    #[serde(default, rename = "action", skip_serializing_if = "is_unknown")]
    pub kind: ActionKind,
    #[serde(default, deserialize_with = "lenient_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "lenient_value", skip_serializing_if = "Option::is_none")]
    pub observation: Option<Value>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, deserialize_with = "lenient_value", skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    #[serde(default, deserialize_with = "lenient_id", skip_serializing_if = "Option::is_none")]
    pub delegation_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_level", skip_serializing_if = "Option::is_none")]
    pub delegate_level: Option<i64>,
    #[serde(default, deserialize_with = "lenient_timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl ActionEvent {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Decode a raw payload. Never fails: a payload that is not an object
    /// yields an event of kind `Unknown` with no fields.
    pub fn from_value(value: Value) -> Self {
        if !value.is_object() {
            tracing::debug!(event = "malformed_action", reason = "not_an_object");
            return Self::default();
        }
        match serde_json::from_value::<ActionEvent>(value) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(event = "malformed_action", error = %err);
                Self::default()
            }
        }
    }

    /// Delegation nesting level, treating an absent level as top level.
    pub fn level(&self) -> i64 {
        self.delegate_level.unwrap_or(0)
    }

    pub fn is_delegated_finish(&self) -> bool {
        self.kind == ActionKind::Finish && self.level() > 0
    }

    pub fn content_line_count(&self) -> Option<usize> {
        self.content
            .as_deref()
            .map(|content| content.split('\n').count())
    }
}

fn is_unknown(kind: &ActionKind) -> bool {
    *kind == ActionKind::Unknown
}

/// Current task as returned by `GET /api/tasks/current`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_actions")]
    pub actions: Vec<ActionEvent>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl TaskSnapshot {
    pub fn from_value(value: Value) -> Self {
        if !value.is_object() {
            return Self::default();
        }
        serde_json::from_value(value).unwrap_or_default()
    }

    pub fn label(&self) -> String {
        match (&self.id, &self.title) {
            (Some(id), Some(title)) => format!("{id} {title}"),
            (Some(id), None) => id.clone(),
            (None, Some(title)) => title.clone(),
            (None, None) => "no task".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationStatus {
    Active,
    Completed,
}

impl DelegationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelegationStatus::Active => "active",
            DelegationStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for DelegationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub id: String,
    pub agent: Option<String>,
    pub task: Option<Value>,
    pub status: DelegationStatus,
    pub created_at: DateTime<Utc>,
}

impl DelegationRecord {
    /// Task payload for display: strings verbatim, anything else as compact JSON.
    pub fn task_text(&self) -> String {
        match &self.task {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityBucket {
    pub start: DateTime<Utc>,
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentCount {
    pub agent: String,
    pub count: u64,
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    Ok(match val {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    Ok(match val {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn lenient_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    Ok(match val {
        Value::Null => None,
        other => Some(other),
    })
}

fn lenient_level<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    Ok(match val {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    Ok(match val {
        Value::String(s) => parse_timestamp(&s),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    })
}

fn lenient_actions<'de, D>(deserializer: D) -> Result<Vec<ActionEvent>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    Ok(match val {
        Value::Array(items) => items.into_iter().map(ActionEvent::from_value).collect(),
        _ => Vec::new(),
    })
}

/// Accepts RFC 3339, naive ISO-8601 (read as UTC) and epoch milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    trimmed
        .parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}
