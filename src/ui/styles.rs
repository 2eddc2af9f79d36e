//! # UI Styling Module
//!
//! Centralized styling utilities for consistent UI appearance across components.

use iced::widget::{button, container};
use iced::{Background, Border, Color};

/// Colour family of an action button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Green, for turning things on
    Positive,
    /// Red, for turning things off
    Negative,
    /// Teal, for everything else
    Neutral,
}

impl Tone {
    fn base(&self) -> Color {
        match self {
            Tone::Positive => Color::from_rgb(0.2, 0.7, 0.2),
            Tone::Negative => Color::from_rgb(0.8, 0.2, 0.2),
            Tone::Neutral => Color::from_rgb(0.2, 0.6, 0.7),
        }
    }
}

fn shift(color: Color, amount: f32) -> Color {
    Color::from_rgb(
        (color.r + amount).clamp(0.0, 1.0),
        (color.g + amount).clamp(0.0, 1.0),
        (color.b + amount).clamp(0.0, 1.0),
    )
}

/// Style for the adapter action buttons
pub fn action_button_style(tone: Tone) -> impl Fn(&iced::Theme, button::Status) -> button::Style {
    move |_theme: &iced::Theme, status: button::Status| {
        let base = tone.base();
        let (background, border) = match status {
            button::Status::Active => (base, shift(base, 0.1)),
            button::Status::Hovered => (shift(base, 0.1), shift(base, 0.2)),
            button::Status::Pressed => (shift(base, -0.05), base),
            button::Status::Disabled => {
                return button::Style {
                    background: Some(Background::Color(Color::from_rgb(0.3, 0.3, 0.3))),
                    text_color: Color::from_rgb(0.6, 0.6, 0.6),
                    border: Border {
                        color: Color::from_rgb(0.4, 0.4, 0.4),
                        width: 1.0,
                        radius: 4.0.into(),
                    },
                    ..Default::default()
                };
            }
        };

        button::Style {
            background: Some(Background::Color(background)),
            text_color: Color::WHITE,
            border: Border {
                color: border,
                width: 1.0,
                radius: 4.0.into(),
            },
            ..Default::default()
        }
    }
}

/// One row of the device list
pub fn device_row_style(_theme: &iced::Theme) -> container::Style {
    container::Style {
        background: Some(Background::Color(Color::from_rgb(0.4, 0.4, 0.4))),
        text_color: Some(Color::WHITE),
        border: Border {
            color: Color::from_rgb(0.5, 0.5, 0.5),
            width: 1.0,
            radius: 4.0.into(),
        },
        ..Default::default()
    }
}

/// Toast-like transient notice
pub fn notice_style(_theme: &iced::Theme) -> container::Style {
    container::Style {
        background: Some(Background::Color(Color::from_rgba(0.1, 0.1, 0.1, 0.85))),
        text_color: Some(Color::WHITE),
        border: Border {
            color: Color::TRANSPARENT,
            width: 0.0,
            radius: 16.0.into(),
        },
        ..Default::default()
    }
}

/// Permission prompt bar
pub fn prompt_style(_theme: &iced::Theme) -> container::Style {
    container::Style {
        background: Some(Background::Color(Color::from_rgb(0.95, 0.9, 0.75))),
        text_color: Some(Color::BLACK),
        border: Border {
            color: Color::from_rgb(0.85, 0.7, 0.4),
            width: 1.0,
            radius: 4.0.into(),
        },
        ..Default::default()
    }
}
