// Hide console window on Windows in release builds
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod adapter;
mod app;
mod config;
mod error;
mod manager;
mod permissions;
mod session;
mod ui;

use app::BlueList;
use config::Config;
use iced::Theme;
use manager::AdapterManager;

fn main() -> iced::Result {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load().unwrap_or_else(|e| {
        log::warn!("{}; using default settings", e);
        Config::default()
    });

    // Start the Bluetooth backend on its own thread. A host without an
    // adapter yields None and the session shuts itself down.
    let adapter = match AdapterManager::spawn(&config) {
        Ok(adapter) => adapter,
        Err(e) => {
            log::error!("{}", e);
            None
        }
    };

    iced::application(BlueList::title, BlueList::update, BlueList::view)
        .subscription(BlueList::subscription)
        .theme(|_| Theme::Light)
        .window_size((480.0, 720.0))
        .run_with(move || BlueList::new(adapter, &config))
}
