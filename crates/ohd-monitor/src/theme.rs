use ohd_core::{ActionKind, DelegationStatus};
use ratatui::style::{Color, Modifier, Style};

#[derive(Clone, Copy)]
pub struct DashboardTheme {
    pub bg: Color,
    pub surface: Color,
    pub border: Color,
    pub title: Color,
    pub text: Color,
    pub muted: Color,
    pub accent: Color,
    pub ok: Color,
    pub warn: Color,
    pub critical: Color,
    pub info: Color,
    pub file: Color,
    pub code: Color,
}

pub fn dashboard_theme() -> DashboardTheme {
    DashboardTheme {
        bg: Color::Rgb(15, 23, 42),
        surface: Color::Rgb(30, 41, 59),
        border: Color::Rgb(51, 65, 85),
        title: Color::Rgb(191, 219, 254),
        text: Color::Rgb(226, 232, 240),
        muted: Color::Rgb(148, 163, 184),
        accent: Color::Rgb(96, 165, 250),
        ok: Color::Rgb(34, 197, 94),
        warn: Color::Rgb(253, 224, 71),
        critical: Color::Rgb(185, 28, 28),
        info: Color::Rgb(59, 130, 246),
        file: Color::Rgb(249, 115, 22),
        code: Color::Rgb(168, 85, 247),
    }
}

impl DashboardTheme {
    pub fn title_style(&self) -> Style {
        Style::default().fg(self.title).add_modifier(Modifier::BOLD)
    }

    pub fn section_style(&self) -> Style {
        Style::default().fg(self.accent).add_modifier(Modifier::BOLD)
    }
}

pub mod icons {
    pub const CMD: &str = "$";
    pub const PYTHON: &str = "py";
    pub const WRITE: &str = "W";
    pub const READ: &str = "R";
    pub const BROWSE: &str = "@";
    pub const DELEGATE: &str = "->";
    pub const FINISH: &str = "ok";
    pub const MESSAGE: &str = ">";
    pub const GENERIC: &str = "*";
}

pub fn action_icon(kind: &ActionKind) -> &'static str {
    match kind {
        ActionKind::CmdRun => icons::CMD,
        ActionKind::IPythonRunCell => icons::PYTHON,
        ActionKind::FileWrite => icons::WRITE,
        ActionKind::FileRead => icons::READ,
        ActionKind::BrowseUrl => icons::BROWSE,
        ActionKind::Delegate => icons::DELEGATE,
        ActionKind::Finish => icons::FINISH,
        ActionKind::Message => icons::MESSAGE,
        ActionKind::Other(_) | ActionKind::Unknown => icons::GENERIC,
    }
}

pub fn action_color(kind: &ActionKind, theme: DashboardTheme) -> Color {
    match kind {
        ActionKind::Finish => theme.ok,
        ActionKind::Delegate => theme.info,
        kind if kind.touches_files() => theme.file,
        kind if kind.runs_code() => theme.code,
        _ => theme.border,
    }
}

pub fn delegation_color(status: DelegationStatus, theme: DashboardTheme) -> Color {
    match status {
        DelegationStatus::Completed => theme.ok,
        DelegationStatus::Active => theme.warn,
    }
}

pub fn connection_style(connected: bool, theme: DashboardTheme) -> Style {
    let bg = if connected { theme.ok } else { theme.critical };
    Style::default()
        .fg(theme.text)
        .bg(bg)
        .add_modifier(Modifier::BOLD)
}
