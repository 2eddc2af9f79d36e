use crate::config::Config;
use crate::manager::AdapterHandle;
use crate::permissions::{Decision, Guarded, PromptPermissions};
use crate::session::{AdapterPhase, Session};
use crate::ui::screen::Screen;
use crate::ui::styles::{self, Tone};
use iced::widget::{button, column, container, row, scrollable, text};
use iced::{Element, Length, Subscription, Task};
use std::time::{Duration, Instant};

pub type DiscoverySession = Session<AdapterHandle, PromptPermissions, Screen>;

enum State {
    Running(DiscoverySession),
    /// The session could not start; the window closes once the message has been shown
    Terminated { message: String, close_at: Instant },
}

// Iced Application State
pub struct BlueList {
    state: State,
}

#[derive(Debug, Clone)]
pub enum Message {
    Tick,
    EnableBluetooth,
    DisableBluetooth,
    MakeDiscoverable,
    DiscoverDevices,
    AnswerPermission(Decision),
}

impl BlueList {
    pub fn new(adapter: Option<AdapterHandle>, config: &Config) -> (Self, Task<Message>) {
        let permissions = PromptPermissions::new(config.require_runtime_permissions, &config.pre_granted);
        let screen = Screen::new(config);

        let state = match Session::initialize(adapter, permissions, screen, config.discoverable_window()) {
            Ok(session) => State::Running(session),
            Err(e) => State::Terminated {
                message: e.to_string(),
                close_at: Instant::now() + config.notice_duration(crate::session::NoticeLength::Long),
            },
        };

        (BlueList { state }, Task::none())
    }

    pub fn title(&self) -> String {
        "Bluelist: Nearby Bluetooth Devices".to_string()
    }

    pub fn update(&mut self, message: Message) -> Task<Message> {
        let session = match &mut self.state {
            State::Running(session) => session,
            State::Terminated { close_at, .. } => {
                if matches!(message, Message::Tick) && Instant::now() >= *close_at {
                    return iced::exit();
                }
                return Task::none();
            }
        };

        let result = match message {
            Message::Tick => {
                session.pump_events();
                session.presenter_mut().expire(Instant::now());
                return Task::none();
            }
            Message::EnableBluetooth => session.enable().map(|g| g.map(|_| ())),
            Message::DisableBluetooth => session.disable().map(|g| g.map(|_| ())),
            Message::MakeDiscoverable => session.request_discoverable().map(|g| g.map(|_| ())),
            Message::DiscoverDevices => session.start_discovery().map(|g| g.map(|_| ())),
            Message::AnswerPermission(decision) => {
                session.permissions_mut().resolve(decision);
                return Task::none();
            }
        };

        match result {
            Ok(Guarded::Executed(())) => {}
            Ok(Guarded::RequestInFlight(permission)) => {
                log::debug!("UI: Waiting for {} permission", permission.label());
            }
            Ok(Guarded::Denied(permission)) => {
                log::debug!("UI: {} permission denied", permission.label());
            }
            // Already shown to the user by the session
            Err(e) => log::debug!("UI: Action failed: {}", e),
        }
        Task::none()
    }

    pub fn subscription(&self) -> Subscription<Message> {
        iced::time::every(Duration::from_millis(16)).map(|_| Message::Tick)
    }

    pub fn view(&'_ self) -> Element<'_, Message> {
        let content = match &self.state {
            State::Running(session) => self.create_session_view(session),
            State::Terminated { message, .. } => container(
                container(text(message.as_str()).size(18))
                    .padding(16)
                    .style(styles::notice_style),
            )
            .center(Length::Fill)
            .into(),
        };

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn create_session_view<'a>(&'a self, session: &'a DiscoverySession) -> Element<'a, Message> {
        let title = text(format!("Bluetooth Devices ({})", session.devices().len())).size(20);
        let status = text(phase_label(session.phase(), session.adapter_state().discoverable)).size(14);

        let actions = row![
            action_button("Enable", Tone::Positive, Message::EnableBluetooth),
            action_button("Disable", Tone::Negative, Message::DisableBluetooth),
            action_button("Discoverable", Tone::Neutral, Message::MakeDiscoverable),
            action_button("Discover", Tone::Neutral, Message::DiscoverDevices),
        ]
        .spacing(10);

        let screen = session.presenter();
        let device_list: Element<'_, Message> = if session.devices().is_empty() {
            text("No devices found. Click 'Discover' to start.").into()
        } else {
            let rows = screen.devices().iter().map(|device| {
                container(text(device.to_string()).size(14))
                    .padding(10)
                    .width(Length::Fill)
                    .style(styles::device_row_style)
                    .into()
            });
            scrollable(column(rows).spacing(5)).height(Length::Fill).into()
        };

        let mut layout = column![title, status, actions].spacing(10).padding(20);

        if let Some(permission) = session.permissions().pending() {
            let prompt = row![
                text(format!("Allow bluelist to use {}?", permission.label())).width(Length::Fill),
                button(text("Allow")).on_press(Message::AnswerPermission(Decision::Allow)),
                button(text("Deny")).on_press(Message::AnswerPermission(Decision::Deny)),
                button(text("Don't ask again")).on_press(Message::AnswerPermission(Decision::Never)),
            ]
            .spacing(10)
            .align_y(iced::alignment::Vertical::Center);
            layout = layout.push(container(prompt).padding(10).style(styles::prompt_style));
        }

        layout = layout.push(container(device_list).height(Length::Fill));

        let notices = screen.toasts().iter().map(|toast| {
            container(text(toast.notice.text.as_str()).size(14))
                .padding([6, 16])
                .style(styles::notice_style)
                .into()
        });
        layout = layout.push(
            container(column(notices).spacing(5))
                .width(Length::Fill)
                .center_x(Length::Fill),
        );

        layout.into()
    }
}

fn action_button(label: &str, tone: Tone, message: Message) -> Element<'_, Message> {
    button(text(label))
        .on_press(message)
        .padding(10)
        .style(styles::action_button_style(tone))
        .into()
}

fn phase_label(phase: AdapterPhase, discoverable: bool) -> String {
    let phase = match phase {
        AdapterPhase::Disabled => "Bluetooth is off",
        AdapterPhase::Enabling => "Turning Bluetooth on...",
        AdapterPhase::Enabled => "Bluetooth is on",
        AdapterPhase::Discovering => "Discovering nearby devices...",
        AdapterPhase::Disabling => "Turning Bluetooth off...",
    };
    if discoverable {
        format!("{} (discoverable)", phase)
    } else {
        phase.to_string()
    }
}
