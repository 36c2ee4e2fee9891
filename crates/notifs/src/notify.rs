//! One-call notifications for the common case.
//!
//! ```no_run
//! # async fn run(client: &notifs::DispatchClient) -> Result<(), notifs::NotificationError> {
//! notifs::notify(client, "Build finished").await?;
//! notifs::notify(
//!     client,
//!     notifs::NotifyOptions {
//!         title: "Hello".to_string(),
//!         message: "World".to_string(),
//!         icon: Some(notifs::Icon::app("Terminal")),
//!         sound: Some("Basso".to_string()),
//!     },
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::{
    dispatch::DispatchClient,
    error::NotificationError,
    protocol::{Icon, NotificationRequest, NotifyResult, OP_NOTIFY_SEND},
};

/// Title used when only a message is given.
pub const DEFAULT_TITLE: &str = "notifs";
/// Theme icon used when none is given.
pub const DEFAULT_ICON: &str = "terminal";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyOptions {
    pub title: String,
    pub message: String,
    pub icon: Option<Icon>,
    pub sound: Option<String>,
}

impl Default for NotifyOptions {
    fn default() -> Self {
        Self {
            title: String::new(),
            message: String::new(),
            icon: Some(Icon::theme(DEFAULT_ICON)),
            sound: None,
        }
    }
}

impl From<&str> for NotifyOptions {
    fn from(message: &str) -> Self {
        message.to_string().into()
    }
}

impl From<String> for NotifyOptions {
    fn from(message: String) -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            message,
            ..Self::default()
        }
    }
}

impl NotifyOptions {
    fn into_request(self) -> Result<NotificationRequest, NotificationError> {
        if self.title.is_empty() {
            return Err(NotificationError::MissingRequiredField("title"));
        }
        Ok(NotificationRequest {
            title: self.title,
            body: Some(self.message).filter(|m| !m.is_empty()),
            icon: self.icon,
            sound_name: self.sound,
            ..NotificationRequest::default()
        })
    }
}

/// Send a notification without going through the builder. Platform gating
/// does not apply here; fields the host cannot honor are ignored by the
/// native side.
pub async fn notify(
    client: &DispatchClient,
    options: impl Into<NotifyOptions>,
) -> Result<NotifyResult, NotificationError> {
    let request = options.into().into_request()?;
    Ok(client.call_async(OP_NOTIFY_SEND, &request).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_only_uses_placeholder_title_and_icon() {
        let request = NotifyOptions::from("Message").into_request().unwrap();
        assert_eq!(request.title, DEFAULT_TITLE);
        assert_eq!(request.body.as_deref(), Some("Message"));
        assert_eq!(request.icon, Some(Icon::theme(DEFAULT_ICON)));
        assert_eq!(request.sound_name, None);
    }

    #[test]
    fn explicit_options_override_defaults() {
        let request = NotifyOptions {
            title: "Hey".to_string(),
            message: "Hello World".to_string(),
            icon: Some(Icon::app("Terminal")),
            sound: Some("Basso".to_string()),
        }
        .into_request()
        .unwrap();
        assert_eq!(request.title, "Hey");
        assert_eq!(request.icon, Some(Icon::app("Terminal")));
        assert_eq!(request.sound_name.as_deref(), Some("Basso"));
    }

    #[test]
    fn empty_title_is_rejected() {
        let err = NotifyOptions::default().into_request().unwrap_err();
        assert!(matches!(err, NotificationError::MissingRequiredField("title")));
    }
}
