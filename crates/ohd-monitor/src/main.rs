use anyhow::Result;
use chrono::Utc;
use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ohd_monitor::{
    api::ApiClient,
    app::{register_socket_handlers, App, DashboardEvent, FetchRequest},
    config::{init_logging, load_config},
    socket::SocketClient,
    ui,
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

const FETCH_QUEUE_CAPACITY: usize = 32;
const CLOCK_TICK: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config();
    init_logging(&config);
    info!(
        event = "dashboard_start",
        api_url = %config.api_url,
        socket_path = %config.socket_path
    );

    let (dash_tx, mut dash_rx) = mpsc::unbounded_channel();
    let (fetch_tx, fetch_rx) = mpsc::channel(FETCH_QUEUE_CAPACITY);
    let mut app = App::new(config.window_minutes, fetch_tx);

    let api = ApiClient::new(&config.api_url);
    tokio::spawn(fetch_loop(api, fetch_rx, dash_tx.clone()));

    let mut socket = SocketClient::new(&config.socket_path);
    register_socket_handlers(&socket, &dash_tx);
    if let Err(err) = socket.connect(&config.api_url) {
        error!(event = "socket_endpoint_invalid", error = %err);
        app.status_note = Some(format!("realtime channel unavailable: {err}"));
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut events = EventStream::new();
    let mut clock = tokio::time::interval(CLOCK_TICK);

    let outcome = loop {
        if let Err(err) = terminal.draw(|frame| ui::render(frame, &app, Utc::now())) {
            break Err(err);
        }
        tokio::select! {
            _ = clock.tick() => {}
            Some(event) = dash_rx.recv() => {
                app.apply(event, Utc::now());
            }
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        if app.handle_key(key) {
                            break Ok(());
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break Err(err),
                    None => break Ok(()),
                }
            }
        }
    };

    app.dispose();
    socket.close().await;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    info!(event = "dashboard_stop");
    outcome?;
    Ok(())
}

async fn fetch_loop(
    api: ApiClient,
    mut requests: mpsc::Receiver<FetchRequest>,
    dash_tx: mpsc::UnboundedSender<DashboardEvent>,
) {
    while let Some(request) = requests.recv().await {
        let api = api.clone();
        let tx = dash_tx.clone();
        tokio::spawn(async move {
            let event = match request {
                FetchRequest::CurrentTask => DashboardEvent::TaskLoaded(api.current_task().await),
                FetchRequest::TaskFiles => DashboardEvent::FilesLoaded(api.task_files().await),
                FetchRequest::FileContent(path) => {
                    let result = api.file_content(&path).await;
                    DashboardEvent::FileContentLoaded { path, result }
                }
            };
            let _ = tx.send(event);
        });
    }
}
