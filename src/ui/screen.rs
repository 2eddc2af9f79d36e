//! Presenter backing the main window.
//!
//! The session pushes list refreshes and notices here; the view reads them
//! back every frame. Notices disappear on their own once their display time
//! is over.

use crate::config::Config;
use crate::session::{DeviceList, DeviceRecord, Notice, NoticeLength, Presenter};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Toast {
    pub notice: Notice,
    expires: Instant,
}

#[derive(Debug)]
pub struct Screen {
    devices: Vec<DeviceRecord>,
    revision: u64,
    toasts: Vec<Toast>,
    short: Duration,
    long: Duration,
}

impl Screen {
    pub fn new(config: &Config) -> Self {
        Self {
            devices: Vec::new(),
            revision: 0,
            toasts: Vec::new(),
            short: config.notice_duration(NoticeLength::Short),
            long: config.notice_duration(NoticeLength::Long),
        }
    }

    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    pub fn toasts(&self) -> &[Toast] {
        &self.toasts
    }

    /// Drops notices whose time is up.
    pub fn expire(&mut self, now: Instant) {
        self.toasts.retain(|toast| toast.expires > now);
    }

    fn show(&mut self, notice: Notice, now: Instant) {
        let duration = match notice.length {
            NoticeLength::Short => self.short,
            NoticeLength::Long => self.long,
        };
        self.toasts.push(Toast {
            notice,
            expires: now + duration,
        });
    }
}

impl Presenter for Screen {
    fn refresh(&mut self, devices: &DeviceList) {
        if devices.revision() == self.revision {
            return;
        }
        self.devices = devices.records().to_vec();
        self.revision = devices.revision();
    }

    fn notify(&mut self, notice: Notice) {
        log::info!("Notice: {}", notice.text);
        self.show(notice, Instant::now());
    }
}
