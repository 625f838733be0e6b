pub mod api;
pub mod app;
pub mod config;
pub mod socket;
pub mod theme;
pub mod ui;
