use crate::app::{App, ConnectionStatus, View};
use crate::theme::{
    action_color, action_icon, connection_style, dashboard_theme, delegation_color,
    DashboardTheme,
};
use chrono::{DateTime, Local, Utc};
use ohd_core::{ActionEvent, ActionKind, LoggedAction};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span, Text},
    widgets::{
        block::Title, BarChart, Block, Borders, Clear, List, ListItem, ListState, Paragraph,
        Sparkline, Wrap,
    },
    Frame,
};
use serde_json::Value;

const DASHBOARD_TITLE: &str = "OpenHands Dashboard";
const CHART_HEIGHT: u16 = 9;

pub fn render(frame: &mut Frame, app: &App, now: DateTime<Utc>) {
    let size = frame.size();
    let theme = dashboard_theme();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(0)])
        .split(size);
    frame.render_widget(render_header(app, theme), layout[0]);
    match app.view {
        View::Timeline => render_timeline(frame, app, theme, layout[1], now),
        View::Delegations => frame.render_widget(render_delegations(app, theme), layout[1]),
        View::Workspace => render_workspace(frame, app, theme, layout[1]),
        View::Logs => frame.render_widget(render_action_log(app, theme), layout[1]),
    }
    if app.help_open {
        render_help_overlay(frame, theme);
    }
}

fn panel(title: &str, theme: DashboardTheme) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .style(Style::default().bg(theme.surface))
        .title(Span::styled(title.to_string(), theme.title_style()))
}

fn render_header(app: &App, theme: DashboardTheme) -> Paragraph<'static> {
    let connected = app.status == ConnectionStatus::Connected;
    let task = app
        .task
        .as_ref()
        .map(|task| task.label())
        .unwrap_or_else(|| "no task".to_string());
    let status_line = Line::from(vec![
        Span::styled(DASHBOARD_TITLE, theme.title_style()),
        Span::raw("  "),
        Span::styled(
            format!(" {} ", app.status.as_str()),
            connection_style(connected, theme),
        ),
        Span::styled(
            format!(
                "  Task: {}  Actions: {}  Active delegations: {}",
                ellipsize(&task, 32),
                app.aggregator.action_count(),
                app.aggregator.active_delegations()
            ),
            Style::default().fg(theme.muted),
        ),
    ]);

    let mut nav = Vec::new();
    for (index, view) in [View::Timeline, View::Delegations, View::Workspace, View::Logs]
        .into_iter()
        .enumerate()
    {
        let style = if view == app.view {
            Style::default()
                .fg(theme.bg)
                .bg(theme.accent)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(theme.text)
        };
        nav.push(Span::styled(format!(" {} {} ", index + 1, view.title()), style));
        nav.push(Span::raw(" "));
    }
    if let Some(note) = app.status_note.as_deref() {
        nav.push(Span::styled(
            format!(" {}", ellipsize(note, 60)),
            Style::default().fg(theme.warn),
        ));
    }

    Paragraph::new(Text::from(vec![status_line, Line::from(nav)]))
        .style(Style::default().fg(theme.text).bg(theme.bg))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme.border))
                .style(Style::default().bg(theme.bg)),
        )
}

fn render_timeline(
    frame: &mut Frame,
    app: &App,
    theme: DashboardTheme,
    area: Rect,
    now: DateTime<Utc>,
) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(CHART_HEIGHT), Constraint::Min(0)])
        .split(area);
    let charts = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[0]);
    render_activity_chart(frame, app, theme, charts[0], now);
    render_delegation_chart(frame, app, theme, charts[1]);

    let title = "Agent Activity";
    let paragraph = Paragraph::new(Text::from(timeline_lines(app.aggregator.actions(), theme)))
        .style(Style::default().fg(theme.text).bg(theme.surface))
        .block(panel(title, theme))
        .wrap(Wrap { trim: false })
        .scroll((app.scroll, 0));
    frame.render_widget(paragraph, rows[1]);
}

fn render_activity_chart(
    frame: &mut Frame,
    app: &App,
    theme: DashboardTheme,
    area: Rect,
    now: DateTime<Utc>,
) {
    let buckets = app.aggregator.minute_buckets(now, app.window_minutes);
    let block = panel("Actions per minute", theme).title(
        Title::from(Span::styled(
            format!("Last {} min", app.window_minutes),
            Style::default().fg(theme.muted),
        ))
        .alignment(Alignment::Right),
    );
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(inner);
    let data: Vec<u64> = buckets.iter().map(|bucket| bucket.count).collect();
    frame.render_widget(
        Sparkline::default()
            .data(&data)
            .style(Style::default().fg(theme.accent).bg(theme.surface)),
        parts[0],
    );

    let peak = data.iter().copied().max().unwrap_or(0);
    let first = buckets.first().map(|b| b.label.as_str()).unwrap_or("--:--");
    let last = buckets.last().map(|b| b.label.as_str()).unwrap_or("--:--");
    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(
            format!("{first} .. {last}  peak {peak}"),
            Style::default().fg(theme.muted),
        ))),
        parts[1],
    );
}

fn render_delegation_chart(frame: &mut Frame, app: &App, theme: DashboardTheme, area: Rect) {
    let counts = app.aggregator.delegation_counts();
    let block = panel("Delegations", theme).title(
        Title::from(Span::styled("Top agents", Style::default().fg(theme.muted)))
            .alignment(Alignment::Right),
    );
    if counts.is_empty() {
        frame.render_widget(
            Paragraph::new(Line::from(Span::styled(
                "No delegations yet.",
                Style::default().fg(theme.muted),
            )))
            .block(block),
            area,
        );
        return;
    }
    let data: Vec<(&str, u64)> = counts
        .iter()
        .map(|entry| (entry.agent.as_str(), entry.count))
        .collect();
    let chart = BarChart::default()
        .block(block)
        .direction(Direction::Horizontal)
        .bar_width(1)
        .bar_gap(0)
        .bar_style(Style::default().fg(theme.ok))
        .value_style(Style::default().fg(theme.bg).bg(theme.ok))
        .label_style(Style::default().fg(theme.muted))
        .data(data.as_slice());
    frame.render_widget(chart, area);
}

pub fn timeline_lines(actions: &[LoggedAction], theme: DashboardTheme) -> Vec<Line<'static>> {
    if actions.is_empty() {
        return vec![Line::from(Span::styled(
            "No actions yet.",
            Style::default().fg(theme.muted),
        ))];
    }
    let mut lines = Vec::new();
    for action in actions {
        let event = &action.event;
        let color = action_color(&event.kind, theme);
        let mut head = vec![
            Span::styled(
                format!("[{:>2}] ", action_icon(&event.kind)),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                event.kind.as_str().to_string(),
                Style::default().fg(theme.text).add_modifier(Modifier::BOLD),
            ),
        ];
        if let Some(ts) = event.timestamp {
            head.push(Span::styled(
                format!("  {}", ts.with_timezone(&Local).format("%H:%M:%S")),
                Style::default().fg(theme.muted),
            ));
        }
        lines.push(Line::from(head));
        for detail in action_detail_lines(event) {
            lines.push(Line::from(Span::styled(
                format!("     {detail}"),
                Style::default().fg(theme.text),
            )));
        }
    }
    lines
}

/// Per-kind detail rows shown under a timeline entry.
pub fn action_detail_lines(event: &ActionEvent) -> Vec<String> {
    match event.kind {
        ActionKind::CmdRun => event
            .command
            .as_deref()
            .map(|command| command.lines().map(str::to_string).collect())
            .unwrap_or_default(),
        ActionKind::FileWrite => match event.path.as_deref() {
            Some(path) => vec![
                format!("File: {path}"),
                format!(
                    "Lines: {}",
                    event
                        .content_line_count()
                        .map(|count| count.to_string())
                        .unwrap_or_else(|| "N/A".to_string())
                ),
            ],
            None => Vec::new(),
        },
        ActionKind::Delegate => {
            let mut rows = vec![format!(
                "Delegated to: {}",
                event.agent.as_deref().unwrap_or("unknown")
            )];
            if let Some(inputs) = &event.inputs {
                rows.push(inputs.to_string());
            }
            rows
        }
        ActionKind::Message => event
            .content
            .as_deref()
            .map(|content| content.lines().map(str::to_string).collect())
            .unwrap_or_default(),
        _ => event
            .observation
            .as_ref()
            .map(pretty_json_lines)
            .unwrap_or_default(),
    }
}

fn pretty_json_lines(value: &Value) -> Vec<String> {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|_| value.to_string())
        .lines()
        .map(str::to_string)
        .collect()
}

fn render_delegations(app: &App, theme: DashboardTheme) -> Paragraph<'static> {
    let records = app.aggregator.delegations();
    let mut lines = Vec::new();
    if records.is_empty() {
        lines.push(Line::from(Span::styled(
            "No delegations yet.",
            Style::default().fg(theme.muted),
        )));
    }
    for record in records {
        lines.push(Line::from(vec![
            Span::styled(
                record
                    .agent
                    .clone()
                    .unwrap_or_else(|| "unknown agent".to_string()),
                Style::default().fg(theme.text).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(
                    "  {}",
                    record
                        .created_at
                        .with_timezone(&Local)
                        .format("%Y-%m-%d %H:%M:%S")
                ),
                Style::default().fg(theme.muted),
            ),
        ]));
        lines.push(Line::from(format!("  Task: {}", record.task_text())));
        lines.push(Line::from(vec![
            Span::raw("  Status: "),
            Span::styled(
                record.status.as_str(),
                Style::default().fg(delegation_color(record.status, theme)),
            ),
        ]));
        lines.push(Line::from(""));
    }
    Paragraph::new(Text::from(lines))
        .style(Style::default().fg(theme.text).bg(theme.surface))
        .block(panel(View::Delegations.title(), theme))
        .wrap(Wrap { trim: false })
        .scroll((app.scroll, 0))
}

fn render_workspace(frame: &mut Frame, app: &App, theme: DashboardTheme, area: Rect) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25), Constraint::Percentage(75)])
        .split(area);
    let workspace = &app.workspace;

    if workspace.files.is_empty() {
        frame.render_widget(
            Paragraph::new(Line::from(Span::styled(
                "No files available.",
                Style::default().fg(theme.muted),
            )))
            .block(panel("Workspace Files", theme)),
            columns[0],
        );
    } else {
        let items: Vec<ListItem> = workspace
            .files
            .iter()
            .map(|path| {
                let style = if workspace.selected.as_deref() == Some(path.as_str()) {
                    Style::default().fg(theme.accent)
                } else {
                    Style::default().fg(theme.text)
                };
                ListItem::new(Line::from(Span::styled(path.clone(), style)))
            })
            .collect();
        let mut state = ListState::default();
        state.select(Some(workspace.cursor.min(workspace.files.len() - 1)));
        let list = List::new(items)
            .highlight_symbol(">> ")
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
            .block(panel("Workspace Files", theme));
        frame.render_stateful_widget(list, columns[0], &mut state);
    }

    let title = format!(
        "File Preview: {}",
        workspace.selected.as_deref().unwrap_or("No file selected")
    );
    frame.render_widget(
        Paragraph::new(workspace.content.clone())
            .style(Style::default().fg(theme.text).bg(theme.bg))
            .block(panel(&title, theme))
            .scroll((app.scroll, 0)),
        columns[1],
    );
}

fn render_action_log(app: &App, theme: DashboardTheme) -> Paragraph<'static> {
    Paragraph::new(Text::from(action_log_lines(app.aggregator.actions(), theme)))
        .style(Style::default().fg(theme.text).bg(theme.surface))
        .block(panel(View::Logs.title(), theme))
        .wrap(Wrap { trim: false })
        .scroll((app.scroll, 0))
}

pub fn action_log_lines(actions: &[LoggedAction], theme: DashboardTheme) -> Vec<Line<'static>> {
    if actions.is_empty() {
        return vec![Line::from(Span::styled(
            "No actions yet.",
            Style::default().fg(theme.muted),
        ))];
    }
    let mut lines = Vec::new();
    for action in actions.iter().rev() {
        let event = &action.event;
        let stamp = event
            .timestamp
            .map(|ts| {
                ts.with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            })
            .unwrap_or_default();
        lines.push(Line::from(vec![
            Span::styled(
                event.kind.as_str().to_string(),
                Style::default().fg(theme.text).add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("  {stamp}"), Style::default().fg(theme.muted)),
        ]));
        if let Some(command) = event.command.as_deref() {
            for row in command.lines() {
                lines.push(Line::from(Span::styled(
                    format!("  $ {row}"),
                    Style::default().fg(theme.code),
                )));
            }
        }
        if let Some(content) = event.content.as_deref() {
            for row in content.lines() {
                lines.push(Line::from(format!("  {row}")));
            }
        }
        if let Some(observation) = &event.observation {
            for row in pretty_json_lines(observation) {
                lines.push(Line::from(Span::styled(
                    format!("  {row}"),
                    Style::default().fg(theme.muted),
                )));
            }
        }
        lines.push(Line::from(""));
    }
    lines
}

fn render_help_overlay(frame: &mut Frame, theme: DashboardTheme) {
    let area = centered_rect(70, 60, frame.size());
    let lines = vec![
        Line::from(Span::styled("Views", theme.section_style())),
        Line::from("  1/2/3/4  Timeline / Delegations / Workspace / Action Log"),
        Line::from("  Tab      cycle view"),
        Line::from(""),
        Line::from(Span::styled("Navigation", theme.section_style())),
        Line::from("  j/k      scroll (Workspace: move file cursor)"),
        Line::from("  Enter    open file under cursor"),
        Line::from("  PgUp/Dn  scroll preview or list by 10"),
        Line::from("  g        jump to top"),
        Line::from("  r        reload current task"),
        Line::from(""),
        Line::from(Span::styled("Exit", theme.section_style())),
        Line::from("  ? or F1  toggle this help"),
        Line::from("  Esc      close help"),
        Line::from("  q        quit"),
    ];
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(Text::from(lines))
            .style(Style::default().fg(theme.text).bg(theme.surface))
            .block(panel("Help", theme))
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100u16.saturating_sub(percent_y)) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100u16.saturating_sub(percent_y)) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100u16.saturating_sub(percent_x)) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100u16.saturating_sub(percent_x)) / 2),
        ])
        .split(vertical[1])[1]
}

fn ellipsize(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    if max <= 3 {
        return input.chars().take(max).collect();
    }
    let mut out: String = input.chars().take(max - 3).collect();
    out.push_str("...");
    out
}
