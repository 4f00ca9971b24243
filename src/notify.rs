//! Reminder notification shown on push
//!
//! A push carries no structured data; every push produces the same daily
//! reminder with two actions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Title shown on the reminder notification
pub const NOTIFICATION_TITLE: &str = "Alcohol Tracker";

/// Body text of the reminder notification
pub const NOTIFICATION_BODY: &str = "How many drinks did you have yesterday?";

/// Actions offered on the reminder notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationAction {
    /// Open the logging page
    Open,
    /// Dismiss until later
    Close,
}

#[derive(Debug, Error)]
#[error("Invalid notification action: '{0}'. Valid actions: open, close")]
pub struct InvalidAction(pub String);

impl NotificationAction {
    /// Wire name, as used in the notification's action list
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationAction::Open => "open",
            NotificationAction::Close => "close",
        }
    }

    /// Button label shown for this action
    pub fn title(&self) -> &'static str {
        match self {
            NotificationAction::Open => "Log Drinks",
            NotificationAction::Close => "Later",
        }
    }

    /// Parse an action name, ignoring case
    pub fn parse(s: &str) -> Result<Self, InvalidAction> {
        [NotificationAction::Open, NotificationAction::Close]
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| InvalidAction(s.to_string()))
    }
}

/// A button on the notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionButton {
    pub action: NotificationAction,
    pub title: String,
}

/// Everything the host needs to display the reminder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Vibration pattern in milliseconds
    pub vibrate: Vec<u32>,
    /// URL opened by the `open` action
    pub url: String,
    pub actions: Vec<ActionButton>,
}

impl Notification {
    /// The fixed daily reminder
    pub fn reminder() -> Self {
        let button = |action: NotificationAction| ActionButton {
            action,
            title: action.title().to_string(),
        };
        Self {
            title: NOTIFICATION_TITLE.to_string(),
            body: NOTIFICATION_BODY.to_string(),
            icon: "icon-192.png".to_string(),
            badge: "icon-192.png".to_string(),
            vibrate: vec![200, 100, 200],
            url: "/".to_string(),
            actions: vec![
                button(NotificationAction::Open),
                button(NotificationAction::Close),
            ],
        }
    }
}

/// What the host should do after a notification click
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickOutcome {
    /// The notification is always dismissed
    pub close: bool,
    /// Window to focus or open, if any
    pub open_url: Option<String>,
}
