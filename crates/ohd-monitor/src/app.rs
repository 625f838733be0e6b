use crate::api::FetchError;
use crate::socket::SocketClient;
use chrono::{DateTime, Utc};
use crossterm::event::{KeyCode, KeyEvent};
use ohd_core::{
    ActionEvent, Aggregator, IngestOutcome, TaskSnapshot, ACTION_UPDATE_EVENT, CONNECT_EVENT,
    DISCONNECT_EVENT,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const FILE_PREVIEW_UNAVAILABLE: &str = "// Unable to load file preview";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Timeline,
    Delegations,
    Workspace,
    Logs,
}

impl View {
    pub fn title(self) -> &'static str {
        match self {
            View::Timeline => "Agent Timeline",
            View::Delegations => "Delegations",
            View::Workspace => "Workspace",
            View::Logs => "Action Log",
        }
    }

    pub fn next(self) -> Self {
        match self {
            View::Timeline => View::Delegations,
            View::Delegations => View::Workspace,
            View::Workspace => View::Logs,
            View::Logs => View::Timeline,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }
}

/// Everything that can change dashboard state, funnelled through one channel
/// so state is only touched from the control loop.
#[derive(Debug)]
pub enum DashboardEvent {
    Connected,
    Disconnected,
    ActionUpdate(Value),
    TaskLoaded(Result<TaskSnapshot, FetchError>),
    FilesLoaded(Result<Vec<String>, FetchError>),
    FileContentLoaded {
        path: String,
        result: Result<String, FetchError>,
    },
}

/// Route socket callbacks into the dashboard queue. The queue is unbounded:
/// every `action_update` the server sends must reach the log, in order.
pub fn register_socket_handlers(
    socket: &SocketClient,
    events: &mpsc::UnboundedSender<DashboardEvent>,
) {
    let tx = events.clone();
    socket.on(CONNECT_EVENT, move |_| forward(&tx, DashboardEvent::Connected));
    let tx = events.clone();
    socket.on(DISCONNECT_EVENT, move |_| {
        forward(&tx, DashboardEvent::Disconnected)
    });
    let tx = events.clone();
    socket.on(ACTION_UPDATE_EVENT, move |payload| {
        forward(&tx, DashboardEvent::ActionUpdate(payload.clone()))
    });
}

fn forward(tx: &mpsc::UnboundedSender<DashboardEvent>, event: DashboardEvent) {
    if tx.send(event).is_err() {
        debug!(event = "dashboard_queue_closed");
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchRequest {
    CurrentTask,
    TaskFiles,
    FileContent(String),
}

#[derive(Debug, Default)]
pub struct Workspace {
    pub files: Vec<String>,
    pub cursor: usize,
    pub selected: Option<String>,
    pub content: String,
}

pub struct App {
    pub window_minutes: usize,
    pub aggregator: Aggregator,
    pub task: Option<TaskSnapshot>,
    pub workspace: Workspace,
    pub status: ConnectionStatus,
    pub view: View,
    pub scroll: u16,
    pub help_open: bool,
    pub status_note: Option<String>,
    fetch_tx: mpsc::Sender<FetchRequest>,
    disposed: bool,
}

impl App {
    pub fn new(window_minutes: usize, fetch_tx: mpsc::Sender<FetchRequest>) -> Self {
        Self {
            window_minutes,
            aggregator: Aggregator::new(),
            task: None,
            workspace: Workspace::default(),
            status: ConnectionStatus::Disconnected,
            view: View::Timeline,
            scroll: 0,
            help_open: false,
            status_note: None,
            fetch_tx,
            disposed: false,
        }
    }

    /// Stop accepting results; anything still in flight is discarded.
    pub fn dispose(&mut self) {
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn apply(&mut self, event: DashboardEvent, now: DateTime<Utc>) {
        if self.disposed {
            return;
        }
        match event {
            DashboardEvent::Connected => {
                self.status = ConnectionStatus::Connected;
                self.request(FetchRequest::CurrentTask);
            }
            DashboardEvent::Disconnected => {
                self.status = ConnectionStatus::Disconnected;
            }
            DashboardEvent::ActionUpdate(payload) => {
                let event = ActionEvent::from_value(payload);
                match self.aggregator.ingest_event(event, now) {
                    IngestOutcome::Appended => {}
                    IngestOutcome::DelegationOpened { id } => {
                        info!(event = "delegation_opened", id = %id);
                    }
                    IngestOutcome::DelegationCompleted { id } => {
                        info!(event = "delegation_completed", id = %id);
                    }
                    other => debug!(event = "delegation_ignored", outcome = ?other),
                }
            }
            DashboardEvent::TaskLoaded(Ok(snapshot)) => {
                self.aggregator.initialize(&snapshot, now);
                info!(
                    event = "task_loaded",
                    task = %snapshot.label(),
                    actions = snapshot.actions.len()
                );
                self.task = Some(snapshot);
                self.request(FetchRequest::TaskFiles);
            }
            DashboardEvent::TaskLoaded(Err(err)) => {
                warn!(event = "task_load_error", error = %err);
                self.status_note = Some(format!("task load failed: {err}"));
            }
            DashboardEvent::FilesLoaded(Ok(files)) => {
                self.workspace.cursor = 0;
                self.workspace.selected = files.first().cloned();
                self.workspace.content.clear();
                self.workspace.files = files;
                if let Some(first) = self.workspace.selected.clone() {
                    self.request(FetchRequest::FileContent(first));
                }
            }
            DashboardEvent::FilesLoaded(Err(err)) => {
                warn!(event = "files_load_error", error = %err);
                self.workspace = Workspace::default();
                self.status_note = Some(format!("file list failed: {err}"));
            }
            DashboardEvent::FileContentLoaded { path, result } => {
                if self.workspace.selected.as_deref() != Some(path.as_str()) {
                    debug!(event = "file_content_stale", path = %path);
                    return;
                }
                self.workspace.content = match result {
                    Ok(content) => content,
                    Err(err) => {
                        warn!(event = "file_content_error", path = %path, error = %err);
                        FILE_PREVIEW_UNAVAILABLE.to_string()
                    }
                };
            }
        }
    }

    fn request(&mut self, request: FetchRequest) {
        if self.fetch_tx.try_send(request.clone()).is_err() {
            warn!(event = "fetch_queue_full", request = ?request);
            self.status_note = Some("fetch queue full; try again".to_string());
        }
    }

    pub fn select_file(&mut self, index: usize) {
        let Some(path) = self.workspace.files.get(index).cloned() else {
            return;
        };
        self.workspace.cursor = index;
        self.workspace.selected = Some(path.clone());
        self.workspace.content.clear();
        self.scroll = 0;
        self.request(FetchRequest::FileContent(path));
    }

    fn move_file_cursor(&mut self, delta: isize) {
        let len = self.workspace.files.len();
        if len == 0 {
            return;
        }
        let next = self.workspace.cursor as isize + delta;
        self.workspace.cursor = next.clamp(0, len as isize - 1) as usize;
    }

    fn set_view(&mut self, view: View) {
        self.view = view;
        self.scroll = 0;
    }

    /// Returns true when the dashboard should quit.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if matches!(key.code, KeyCode::Char('?') | KeyCode::F(1)) {
            self.help_open = !self.help_open;
            return false;
        }
        if key.code == KeyCode::Esc && self.help_open {
            self.help_open = false;
            return false;
        }
        if self.help_open {
            return false;
        }

        match key.code {
            KeyCode::Char('q') => true,
            KeyCode::Char('1') => {
                self.set_view(View::Timeline);
                false
            }
            KeyCode::Char('2') => {
                self.set_view(View::Delegations);
                false
            }
            KeyCode::Char('3') => {
                self.set_view(View::Workspace);
                false
            }
            KeyCode::Char('4') => {
                self.set_view(View::Logs);
                false
            }
            KeyCode::Tab => {
                self.set_view(self.view.next());
                false
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.view == View::Workspace {
                    self.move_file_cursor(1);
                } else {
                    self.scroll = self.scroll.saturating_add(1);
                }
                false
            }
            KeyCode::Up | KeyCode::Char('k') => {
                if self.view == View::Workspace {
                    self.move_file_cursor(-1);
                } else {
                    self.scroll = self.scroll.saturating_sub(1);
                }
                false
            }
            KeyCode::PageDown => {
                self.scroll = self.scroll.saturating_add(10);
                false
            }
            KeyCode::PageUp => {
                self.scroll = self.scroll.saturating_sub(10);
                false
            }
            KeyCode::Enter => {
                if self.view == View::Workspace {
                    self.select_file(self.workspace.cursor);
                }
                false
            }
            KeyCode::Char('g') => {
                self.scroll = 0;
                if self.view == View::Workspace {
                    self.workspace.cursor = 0;
                }
                false
            }
            KeyCode::Char('r') => {
                self.status_note = Some("refreshing current task".to_string());
                self.request(FetchRequest::CurrentTask);
                false
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crossterm::event::KeyModifiers;
    use ohd_core::DelegationStatus;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 7, 12, 0, 0).unwrap()
    }

    fn app() -> (App, mpsc::Receiver<FetchRequest>) {
        let (tx, rx) = mpsc::channel(8);
        (App::new(10, tx), rx)
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn connect_marks_status_and_loads_task() {
        let (mut app, mut rx) = app();
        app.apply(DashboardEvent::Connected, now());
        assert_eq!(app.status, ConnectionStatus::Connected);
        assert_eq!(rx.try_recv().unwrap(), FetchRequest::CurrentTask);

        app.apply(DashboardEvent::Disconnected, now());
        assert_eq!(app.status, ConnectionStatus::Disconnected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn task_snapshot_seeds_log_and_requests_files() {
        let (mut app, mut rx) = app();
        app.apply(
            DashboardEvent::ActionUpdate(json!({"action": "run", "command": "ls"})),
            now(),
        );
        let snapshot = TaskSnapshot::from_value(json!({
            "id": "task-1",
            "actions": [{"action": "MessageAction", "content": "hello"}]
        }));
        app.apply(DashboardEvent::TaskLoaded(Ok(snapshot)), now());

        assert_eq!(app.aggregator.action_count(), 1);
        assert_eq!(app.task.as_ref().and_then(|t| t.id.as_deref()), Some("task-1"));
        assert_eq!(rx.try_recv().unwrap(), FetchRequest::TaskFiles);
    }

    #[test]
    fn fetch_failures_are_contained() {
        let (mut app, mut rx) = app();
        app.apply(
            DashboardEvent::TaskLoaded(Err(FetchError::RequestTimeout(
                crate::api::REQUEST_TIMEOUT,
            ))),
            now(),
        );
        app.apply(
            DashboardEvent::FilesLoaded(Err(FetchError::Transport("refused".to_string()))),
            now(),
        );
        assert!(app.task.is_none());
        assert!(app.workspace.files.is_empty());
        assert!(app.status_note.unwrap_or_default().contains("refused"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn delegation_lifecycle_flows_through_updates() {
        let (mut app, _rx) = app();
        app.apply(
            DashboardEvent::ActionUpdate(json!({
                "action": "AgentDelegateAction",
                "agent": "Coder",
                "delegation_id": "d1"
            })),
            now(),
        );
        app.apply(
            DashboardEvent::ActionUpdate(json!({
                "action": "AgentFinishAction",
                "delegate_level": 1,
                "delegation_id": "d1"
            })),
            now(),
        );
        let record = app.aggregator.delegation("d1").unwrap();
        assert_eq!(record.status, DelegationStatus::Completed);
        assert_eq!(app.aggregator.action_count(), 2);
    }

    #[test]
    fn files_select_first_and_ignore_stale_content() {
        let (mut app, mut rx) = app();
        app.apply(
            DashboardEvent::FilesLoaded(Ok(vec!["a.rs".to_string(), "b.rs".to_string()])),
            now(),
        );
        assert_eq!(app.workspace.selected.as_deref(), Some("a.rs"));
        assert_eq!(
            rx.try_recv().unwrap(),
            FetchRequest::FileContent("a.rs".to_string())
        );

        app.view = View::Workspace;
        app.handle_key(key(KeyCode::Char('j')));
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(app.workspace.selected.as_deref(), Some("b.rs"));
        assert_eq!(
            rx.try_recv().unwrap(),
            FetchRequest::FileContent("b.rs".to_string())
        );

        app.apply(
            DashboardEvent::FileContentLoaded {
                path: "a.rs".to_string(),
                result: Ok("stale".to_string()),
            },
            now(),
        );
        assert!(app.workspace.content.is_empty());

        app.apply(
            DashboardEvent::FileContentLoaded {
                path: "b.rs".to_string(),
                result: Err(FetchError::Status {
                    status: 404,
                    body: String::new(),
                }),
            },
            now(),
        );
        assert_eq!(app.workspace.content, FILE_PREVIEW_UNAVAILABLE);
    }

    #[test]
    fn disposed_app_ignores_late_results() {
        let (mut app, mut rx) = app();
        app.dispose();
        app.apply(DashboardEvent::Connected, now());
        app.apply(DashboardEvent::ActionUpdate(json!({"action": "run"})), now());
        assert_eq!(app.status, ConnectionStatus::Disconnected);
        assert_eq!(app.aggregator.action_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn keys_switch_views_and_quit() {
        let (mut app, mut rx) = app();
        assert!(!app.handle_key(key(KeyCode::Char('2'))));
        assert_eq!(app.view, View::Delegations);
        app.handle_key(key(KeyCode::Tab));
        assert_eq!(app.view, View::Workspace);
        app.handle_key(key(KeyCode::Char('4')));
        app.handle_key(key(KeyCode::Char('j')));
        assert_eq!(app.scroll, 1);
        app.handle_key(key(KeyCode::Char('?')));
        assert!(app.help_open);
        assert!(!app.handle_key(key(KeyCode::Char('q'))));
        app.handle_key(key(KeyCode::Esc));
        app.handle_key(key(KeyCode::Char('r')));
        assert_eq!(rx.try_recv().unwrap(), FetchRequest::CurrentTask);
        assert!(app.handle_key(key(KeyCode::Char('q'))));
    }
}
