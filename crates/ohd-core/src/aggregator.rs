use crate::model::{
    ActionEvent, ActionKind, ActivityBucket, AgentCount, DelegationRecord, DelegationStatus,
    TaskSnapshot,
};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use tracing::debug;

pub const DEFAULT_WINDOW_MINUTES: usize = 10;
pub const DEFAULT_BUCKET_WIDTH_SECS: i64 = 60;
pub const MAX_DELEGATION_AGENTS: usize = 8;
/// Upper bound on buckets in one window: a day of minutes.
pub const MAX_WINDOW_BUCKETS: usize = 24 * 60;
pub const UNKNOWN_AGENT: &str = "unknown";

/// An event as held in the log, with the instant it reached the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedAction {
    pub event: ActionEvent,
    pub received_at: DateTime<Utc>,
}

impl LoggedAction {
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.event.timestamp.unwrap_or(self.received_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketWindow {
    pub buckets: usize,
    pub width_secs: i64,
}

impl BucketWindow {
    pub fn minutes(buckets: usize) -> Self {
        Self {
            buckets,
            width_secs: DEFAULT_BUCKET_WIDTH_SECS,
        }
    }
}

impl Default for BucketWindow {
    fn default() -> Self {
        Self::minutes(DEFAULT_WINDOW_MINUTES)
    }
}

/// What a single `ingest_event` call changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Appended,
    DelegationOpened { id: String },
    DelegationAlreadyKnown { id: String },
    DelegationCompleted { id: String },
    OrphanCompletion { delegation_id: Option<String> },
}

/// Owns the append-only action log and the delegation registry.
#[derive(Debug, Default)]
pub struct Aggregator {
    actions: Vec<LoggedAction>,
    delegations: Vec<DelegationRecord>,
    delegation_index: HashMap<String, usize>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the log with the snapshot's actions. Delegations are only
    /// ever derived from live events, so the registry is left as is.
    pub fn initialize(&mut self, snapshot: &TaskSnapshot, now: DateTime<Utc>) {
        self.actions = snapshot
            .actions
            .iter()
            .cloned()
            .map(|event| LoggedAction {
                event,
                received_at: now,
            })
            .collect();
        debug!(
            event = "aggregator_initialized",
            actions = self.actions.len(),
            task = ?snapshot.id
        );
    }

    pub fn ingest_event(&mut self, event: ActionEvent, now: DateTime<Utc>) -> IngestOutcome {
        let outcome = match event.kind {
            ActionKind::Delegate => self.open_delegation(&event, now),
            ActionKind::Finish if event.level() > 0 => self.complete_delegation(&event),
            _ => IngestOutcome::Appended,
        };
        self.actions.push(LoggedAction {
            event,
            received_at: now,
        });
        outcome
    }

    fn open_delegation(&mut self, event: &ActionEvent, now: DateTime<Utc>) -> IngestOutcome {
        let id = event
            .delegation_id
            .clone()
            .or_else(|| event.id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if self.delegation_index.contains_key(&id) {
            debug!(event = "delegation_duplicate", id = %id);
            return IngestOutcome::DelegationAlreadyKnown { id };
        }
        self.delegation_index.insert(id.clone(), self.delegations.len());
        self.delegations.push(DelegationRecord {
            id: id.clone(),
            agent: event.agent.clone(),
            task: event.inputs.clone(),
            status: DelegationStatus::Active,
            created_at: now,
        });
        IngestOutcome::DelegationOpened { id }
    }

    fn complete_delegation(&mut self, event: &ActionEvent) -> IngestOutcome {
        let Some(delegation_id) = event.delegation_id.as_deref() else {
            return IngestOutcome::OrphanCompletion {
                delegation_id: None,
            };
        };
        let Some(&index) = self.delegation_index.get(delegation_id) else {
            debug!(event = "delegation_orphan_finish", delegation_id = %delegation_id);
            return IngestOutcome::OrphanCompletion {
                delegation_id: Some(delegation_id.to_string()),
            };
        };
        let record = &mut self.delegations[index];
        record.status = DelegationStatus::Completed;
        IngestOutcome::DelegationCompleted {
            id: record.id.clone(),
        }
    }

    pub fn actions(&self) -> &[LoggedAction] {
        &self.actions
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    pub fn delegations(&self) -> &[DelegationRecord] {
        &self.delegations
    }

    pub fn delegation(&self, id: &str) -> Option<&DelegationRecord> {
        self.delegation_index
            .get(id)
            .map(|&index| &self.delegations[index])
    }

    pub fn active_delegations(&self) -> usize {
        self.delegations
            .iter()
            .filter(|record| record.status == DelegationStatus::Active)
            .count()
    }

    pub fn minute_buckets(&self, now: DateTime<Utc>, window_minutes: usize) -> Vec<ActivityBucket> {
        activity_buckets(&self.actions, now, BucketWindow::minutes(window_minutes))
    }

    pub fn delegation_counts(&self) -> Vec<AgentCount> {
        delegation_counts(&self.actions)
    }
}

/// Trailing fixed-width buckets ending at `now`, oldest first.
pub fn activity_buckets(
    actions: &[LoggedAction],
    now: DateTime<Utc>,
    window: BucketWindow,
) -> Vec<ActivityBucket> {
    let count = window.buckets.min(MAX_WINDOW_BUCKETS);
    if count == 0 || window.width_secs <= 0 {
        return Vec::new();
    }
    let width = window.width_secs;
    let last_start = align(now.timestamp(), width);
    let Some(first_start) = i64::try_from(count - 1)
        .ok()
        .and_then(|span| span.checked_mul(width))
        .and_then(|span| last_start.checked_sub(span))
    else {
        return Vec::new();
    };

    let mut buckets: Vec<ActivityBucket> = (0..count)
        .map(|offset| {
            let start_secs = first_start + width * offset as i64;
            let start = Utc
                .timestamp_opt(start_secs, 0)
                .single()
                .unwrap_or(now);
            ActivityBucket {
                start,
                label: start.format("%H:%M").to_string(),
                count: 0,
            }
        })
        .collect();

    for action in actions {
        let start = align(action.effective_time().timestamp(), width);
        if start < first_start || start > last_start {
            continue;
        }
        let index = ((start - first_start) / width) as usize;
        if let Some(bucket) = buckets.get_mut(index) {
            bucket.count += 1;
        }
    }
    buckets
}

/// Delegate actions per agent, most active first, capped at eight agents.
pub fn delegation_counts(actions: &[LoggedAction]) -> Vec<AgentCount> {
    let mut order: Vec<AgentCount> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for action in actions {
        if action.event.kind != ActionKind::Delegate {
            continue;
        }
        let agent = action.event.agent.as_deref().unwrap_or(UNKNOWN_AGENT);
        match index.get(agent) {
            Some(&slot) => order[slot].count += 1,
            None => {
                index.insert(agent.to_string(), order.len());
                order.push(AgentCount {
                    agent: agent.to_string(),
                    count: 1,
                });
            }
        }
    }
    order.sort_by(|a, b| b.count.cmp(&a.count));
    order.truncate(MAX_DELEGATION_AGENTS);
    order
}

fn align(secs: i64, width: i64) -> i64 {
    secs.div_euclid(width) * width
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 7, h, m, s).unwrap()
    }

    fn event(value: serde_json::Value) -> ActionEvent {
        ActionEvent::from_value(value)
    }

    fn delegate(agent: &str) -> ActionEvent {
        event(json!({"action": "AgentDelegateAction", "agent": agent}))
    }

    #[test]
    fn delegate_then_finish_completes_record() {
        let mut agg = Aggregator::new();
        let now = at(12, 0, 0);
        let outcome = agg.ingest_event(
            event(json!({"action": "AgentDelegateAction", "agent": "Coder", "delegation_id": "d1"})),
            now,
        );
        assert_eq!(outcome, IngestOutcome::DelegationOpened { id: "d1".to_string() });
        let record = agg.delegation("d1").expect("record should exist");
        assert_eq!(record.agent.as_deref(), Some("Coder"));
        assert_eq!(record.status, DelegationStatus::Active);

        let outcome = agg.ingest_event(
            event(json!({"action": "AgentFinishAction", "delegate_level": 1, "delegation_id": "d1"})),
            now,
        );
        assert_eq!(outcome, IngestOutcome::DelegationCompleted { id: "d1".to_string() });
        assert_eq!(agg.delegation("d1").unwrap().status, DelegationStatus::Completed);
        assert_eq!(agg.action_count(), 2);
    }

    #[test]
    fn finish_only_touches_the_matching_record() {
        let mut agg = Aggregator::new();
        let now = at(12, 0, 0);
        for id in ["a", "b", "c"] {
            agg.ingest_event(
                event(json!({"action": "delegate", "agent": "Coder", "delegation_id": id})),
                now,
            );
        }
        agg.ingest_event(
            event(json!({"action": "finish", "delegate_level": 2, "delegation_id": "b"})),
            now,
        );
        let statuses: Vec<_> = agg.delegations().iter().map(|d| d.status).collect();
        assert_eq!(
            statuses,
            vec![
                DelegationStatus::Active,
                DelegationStatus::Completed,
                DelegationStatus::Active
            ]
        );
        assert_eq!(agg.active_delegations(), 2);
    }

    #[test]
    fn top_level_finish_and_orphans_are_ignored() {
        let mut agg = Aggregator::new();
        let now = at(12, 0, 0);
        agg.ingest_event(
            event(json!({"action": "delegate", "delegation_id": "d1"})),
            now,
        );

        let top = agg.ingest_event(
            event(json!({"action": "finish", "delegate_level": 0, "delegation_id": "d1"})),
            now,
        );
        assert_eq!(top, IngestOutcome::Appended);
        assert_eq!(agg.delegation("d1").unwrap().status, DelegationStatus::Active);

        let orphan = agg.ingest_event(
            event(json!({"action": "finish", "delegate_level": 1, "delegation_id": "zzz"})),
            now,
        );
        assert_eq!(
            orphan,
            IngestOutcome::OrphanCompletion { delegation_id: Some("zzz".to_string()) }
        );
        let no_id = agg.ingest_event(event(json!({"action": "finish", "delegate_level": 1})), now);
        assert_eq!(no_id, IngestOutcome::OrphanCompletion { delegation_id: None });
        assert_eq!(agg.delegations().len(), 1);
        assert_eq!(agg.action_count(), 4);
    }

    #[test]
    fn completed_record_never_reverts() {
        let mut agg = Aggregator::new();
        let now = at(12, 0, 0);
        agg.ingest_event(event(json!({"action": "delegate", "delegation_id": "d1"})), now);
        agg.ingest_event(
            event(json!({"action": "finish", "delegate_level": 1, "delegation_id": "d1"})),
            now,
        );
        let again = agg.ingest_event(
            event(json!({"action": "delegate", "agent": "Other", "delegation_id": "d1"})),
            now,
        );
        assert_eq!(again, IngestOutcome::DelegationAlreadyKnown { id: "d1".to_string() });
        assert_eq!(agg.delegations().len(), 1);
        assert_eq!(agg.delegation("d1").unwrap().status, DelegationStatus::Completed);
    }

    #[test]
    fn delegation_identity_falls_back_to_event_id_then_fresh_uuid() {
        let mut agg = Aggregator::new();
        let now = at(12, 0, 0);
        agg.ingest_event(event(json!({"action": "delegate", "id": 17})), now);
        assert!(agg.delegation("17").is_some());

        agg.ingest_event(delegate("Coder"), now);
        agg.ingest_event(delegate("Coder"), now);
        assert_eq!(agg.delegations().len(), 3);
        assert_ne!(agg.delegations()[1].id, agg.delegations()[2].id);
    }

    #[test]
    fn unknown_kind_is_logged_without_delegation() {
        let mut agg = Aggregator::new();
        let outcome = agg.ingest_event(event(json!({"action": "MysteryAction"})), at(12, 0, 0));
        assert_eq!(outcome, IngestOutcome::Appended);
        assert_eq!(agg.action_count(), 1);
        assert!(agg.delegations().is_empty());
        assert_eq!(agg.actions()[0].event.kind.as_str(), "MysteryAction");
    }

    #[test]
    fn initialize_replaces_log_and_keeps_registry() {
        let mut agg = Aggregator::new();
        let now = at(12, 0, 0);
        agg.ingest_event(event(json!({"action": "delegate", "delegation_id": "live"})), now);
        agg.ingest_event(event(json!({"action": "run"})), now);

        let snapshot = TaskSnapshot::from_value(json!({
            "id": "t1",
            "actions": [
                {"action": "AgentDelegateAction", "agent": "Seeded", "delegation_id": "old"},
                {"action": "MessageAction", "content": "hi"},
                {"action": "MessageAction", "content": "hi"}
            ]
        }));
        agg.initialize(&snapshot, now);
        assert_eq!(agg.action_count(), 3);
        assert!(agg.delegation("old").is_none());
        assert!(agg.delegation("live").is_some());

        for _ in 0..4 {
            agg.ingest_event(event(json!({"action": "message"})), now);
        }
        assert_eq!(agg.action_count(), 3 + 4);
    }

    #[test]
    fn empty_log_yields_zeroed_window_and_no_counts() {
        let agg = Aggregator::new();
        let buckets = agg.minute_buckets(at(12, 30, 15), DEFAULT_WINDOW_MINUTES);
        assert_eq!(buckets.len(), 10);
        assert!(buckets.iter().all(|bucket| bucket.count == 0));
        assert_eq!(buckets.first().unwrap().label, "12:21");
        assert_eq!(buckets.last().unwrap().label, "12:30");
        assert!(agg.delegation_counts().is_empty());
    }

    #[test]
    fn buckets_count_actions_inside_window_only() {
        let mut agg = Aggregator::new();
        let now = at(12, 30, 15);
        for ts in ["2026-02-07T12:30:01Z", "2026-02-07T12:30:59Z", "2026-02-07T12:21:00Z"] {
            agg.ingest_event(event(json!({"action": "run", "timestamp": ts})), now);
        }
        agg.ingest_event(event(json!({"action": "run", "timestamp": "2026-02-07T12:20:59Z"})), now);
        agg.ingest_event(event(json!({"action": "run", "timestamp": "2026-02-07T13:00:00Z"})), now);
        agg.ingest_event(event(json!({"action": "run"})), at(12, 25, 40));

        let buckets = agg.minute_buckets(now, 10);
        let counts: Vec<u64> = buckets.iter().map(|bucket| bucket.count).collect();
        assert_eq!(counts, vec![1, 0, 0, 0, 1, 0, 0, 0, 0, 2]);
        let total: u64 = counts.iter().sum();
        assert!(total <= agg.action_count() as u64);
    }

    #[test]
    fn bucket_window_follows_now_not_last_event() {
        let mut agg = Aggregator::new();
        agg.ingest_event(
            event(json!({"action": "run", "timestamp": "2026-02-07T12:00:00Z"})),
            at(12, 0, 0),
        );
        assert_eq!(agg.minute_buckets(at(12, 5, 0), 10).iter().map(|b| b.count).sum::<u64>(), 1);
        assert_eq!(agg.minute_buckets(at(12, 15, 0), 10).iter().map(|b| b.count).sum::<u64>(), 0);
        assert!(agg.minute_buckets(at(12, 15, 0), 0).is_empty());
        assert_eq!(agg.minute_buckets(at(12, 15, 0), 3).len(), 3);
    }

    #[test]
    fn wider_buckets_align_to_their_width() {
        let actions = vec![LoggedAction {
            event: event(json!({"action": "run", "timestamp": "2026-02-07T12:04:00Z"})),
            received_at: at(12, 0, 0),
        }];
        let window = BucketWindow {
            buckets: 2,
            width_secs: 300,
        };
        let buckets = activity_buckets(&actions, at(12, 7, 0), window);
        assert_eq!(buckets[0].label, "12:00");
        assert_eq!(buckets[1].label, "12:05");
        assert_eq!(buckets[0].count, 1);
    }

    #[test]
    fn oversized_windows_are_capped_without_overflow() {
        let mut agg = Aggregator::new();
        let now = at(12, 30, 15);
        agg.ingest_event(event(json!({"action": "run"})), now);

        let buckets = agg.minute_buckets(now, usize::MAX);
        assert_eq!(buckets.len(), MAX_WINDOW_BUCKETS);
        assert_eq!(buckets.last().unwrap().count, 1);
        assert_eq!(
            agg.minute_buckets(now, (i64::MAX / 30) as usize).len(),
            MAX_WINDOW_BUCKETS
        );

        let huge = BucketWindow {
            buckets: 3,
            width_secs: i64::MAX,
        };
        assert!(activity_buckets(agg.actions(), now, huge).is_empty());
    }

    #[test]
    fn delegation_counts_sort_stably_and_cap_at_eight() {
        let mut agg = Aggregator::new();
        let now = at(12, 0, 0);
        let names = ["A", "B", "C", "D", "E", "F", "G", "H", "I", "J"];
        for name in names {
            agg.ingest_event(delegate(name), now);
        }
        agg.ingest_event(delegate("C"), now);
        agg.ingest_event(delegate("J"), now);
        agg.ingest_event(event(json!({"action": "delegate"})), now);
        agg.ingest_event(event(json!({"action": "run", "agent": "Z"})), now);

        let counts = agg.delegation_counts();
        assert_eq!(counts.len(), MAX_DELEGATION_AGENTS);
        let agents: Vec<&str> = counts.iter().map(|c| c.agent.as_str()).collect();
        assert_eq!(agents, vec!["C", "J", "A", "B", "D", "E", "F", "G"]);
        assert_eq!(counts[0].count, 2);
        assert!(counts.windows(2).all(|pair| pair[0].count >= pair[1].count));
    }

    #[test]
    fn delegation_counts_include_seeded_actions_and_unknown_agent() {
        let mut agg = Aggregator::new();
        let snapshot = TaskSnapshot::from_value(json!({
            "actions": [{"action": "AgentDelegateAction"}, {"action": "AgentDelegateAction", "agent": "Coder"}]
        }));
        agg.initialize(&snapshot, at(12, 0, 0));
        let counts = agg.delegation_counts();
        assert_eq!(
            counts,
            vec![
                AgentCount { agent: UNKNOWN_AGENT.to_string(), count: 1 },
                AgentCount { agent: "Coder".to_string(), count: 1 },
            ]
        );
    }
}
