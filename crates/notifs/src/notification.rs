//! Capability-gated notification builder.
//!
//! Platform-restricted fields (see [`Feature::platforms`]) can only be set
//! when the instance declared support for at least one platform that
//! honors them. Whether the field is then applied depends on the host OS
//! and on the strictness chosen at construction:
//!
//! - strict: setting a field the host cannot honor is an error
//! - lenient: the call is accepted and the field is left unset
//!
//! ```no_run
//! # use notifs::{Notification, PlatformSupport, Timeout};
//! # fn main() -> Result<(), notifs::NotificationError> {
//! let mut n = Notification::new(PlatformSupport::ALL, false);
//! n.title("Build finished").body("All 42 derivations built");
//! n.subtitle("nix")?.timeout(Timeout::Never)?;
//! # Ok(())
//! # }
//! ```

use tracing::debug;

use crate::{
    dispatch::DispatchClient,
    error::NotificationError,
    platform::{Feature, HostOs, Platform, PlatformSupport},
    protocol::{
        Icon, NotificationRequest, NotifyResult, OP_NOTIFY_SEND, Timeout,
    },
};

/// Field values of a notification, as set so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    pub title: Option<String>,
    pub body: Option<String>,
    pub subtitle: Option<String>,
    pub icon: Option<Icon>,
    pub sound_name: Option<String>,
    pub timeout: Option<Timeout>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    supports: PlatformSupport,
    strict: bool,
    host: HostOs,
    fields: Fields,
}

impl Default for Notification {
    /// No platform-specific features, strict.
    fn default() -> Self {
        Self::new(PlatformSupport::NONE, true)
    }
}

impl Notification {
    pub fn new(supports: PlatformSupport, strict: bool) -> Self {
        Self {
            supports,
            strict,
            host: HostOs::current(),
            fields: Fields::default(),
        }
    }

    /// Shorthand for a non-strict instance.
    pub fn lenient(supports: PlatformSupport) -> Self {
        Self::new(supports, false)
    }

    /// Evaluate platform checks as if running on `host`.
    #[must_use]
    pub fn on_host(mut self, host: HostOs) -> Self {
        self.host = host;
        self
    }

    pub fn supports(&self) -> PlatformSupport {
        self.supports
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn host(&self) -> HostOs {
        self.host
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Single line title. Required before the notification can be shown.
    pub fn title(&mut self, title: impl Into<String>) -> &mut Self {
        self.fields.title = Some(title.into());
        self
    }

    /// Multi-line content; some platforms render simple markup.
    pub fn body(&mut self, body: impl Into<String>) -> &mut Self {
        self.fields.body = Some(body.into());
        self
    }

    /// Name of the sound to play, e.g. one of the macOS system sounds
    /// (`Basso`, `Glass`, `Ping`, ...).
    pub fn sound_name(&mut self, sound_name: impl Into<String>) -> &mut Self {
        self.fields.sound_name = Some(sound_name.into());
        self
    }

    /// Secondary title line. macOS and Windows.
    pub fn subtitle(
        &mut self,
        subtitle: impl Into<String>,
    ) -> Result<&mut Self, NotificationError> {
        if self.restricted(Feature::Subtitle)? {
            self.fields.subtitle = Some(subtitle.into());
        }
        Ok(self)
    }

    /// Linux only. `Icon::Path` must be a `file://` URI.
    pub fn icon(&mut self, icon: Icon) -> Result<&mut Self, NotificationError> {
        match &icon {
            Icon::Path(uri) if !uri.starts_with("file://") => {
                return Err(NotificationError::InvalidIconPath(uri.clone()));
            }
            _ => {}
        }
        if self.restricted(Feature::Icon)? {
            self.fields.icon = Some(icon);
        }
        Ok(self)
    }

    /// Milliseconds until the notification server closes the notification,
    /// or `Timeout::Never`. Windows and Linux.
    pub fn timeout(
        &mut self,
        timeout: impl Into<Timeout>,
    ) -> Result<&mut Self, NotificationError> {
        let timeout = timeout.into();
        match timeout {
            Timeout::Millis(ms) if ms <= 0 => {
                return Err(NotificationError::InvalidTimeout(ms));
            }
            _ => {}
        }
        if self.restricted(Feature::Timeout)? {
            self.fields.timeout = Some(timeout);
        }
        Ok(self)
    }

    /// Decide whether a feature restricted to `requested` may be applied on
    /// the current host.
    ///
    /// Fails if none of `requested` was declared, regardless of strictness.
    /// In strict mode also fails when the host is not one of the declared
    /// platforms; in lenient mode returns `false` instead.
    pub fn verify_platform(
        &self,
        requested: &[Platform],
        feature: Feature,
    ) -> Result<bool, NotificationError> {
        let (supported, undeclared): (Vec<Platform>, Vec<Platform>) = requested
            .iter()
            .partition(|platform| self.supports.supports(**platform));

        if supported.is_empty() {
            return Err(NotificationError::CapabilityNotDeclared {
                feature,
                platforms: undeclared,
            });
        }

        let is_current_valid = self
            .host
            .platform()
            .is_some_and(|current| supported.contains(&current));

        if !self.strict {
            return Ok(is_current_valid);
        }
        if !is_current_valid {
            return Err(NotificationError::UnsupportedOnCurrentPlatform {
                os: self.host.name().to_string(),
                feature,
            });
        }
        Ok(true)
    }

    /// A notification needs at least a non-empty title to be shown.
    pub fn verify_can_be_sent(&self) -> Result<(), NotificationError> {
        match self.fields.title.as_deref() {
            Some(title) if !title.is_empty() => Ok(()),
            _ => Err(NotificationError::MissingRequiredField("title")),
        }
    }

    /// The wire document for this notification.
    pub fn to_request(&self) -> Result<NotificationRequest, NotificationError> {
        self.verify_can_be_sent()?;
        let fields = self.fields.clone();
        Ok(NotificationRequest {
            title: fields.title.unwrap_or_default(),
            body: fields.body,
            subtitle: fields.subtitle,
            icon: fields.icon,
            sound_name: fields.sound_name,
            timeout_millis: fields.timeout,
        })
    }

    /// Display the notification, blocking until the plugin answers.
    pub fn show(
        &self,
        client: &DispatchClient,
    ) -> Result<NotifyResult, NotificationError> {
        let request = self.to_request()?;
        Ok(client.call_sync(OP_NOTIFY_SEND, &request)?)
    }

    /// Display the notification without blocking the runtime.
    pub async fn send(
        &self,
        client: &DispatchClient,
    ) -> Result<NotifyResult, NotificationError> {
        let request = self.to_request()?;
        Ok(client.call_async(OP_NOTIFY_SEND, &request).await?)
    }

    fn restricted(&self, feature: Feature) -> Result<bool, NotificationError> {
        let apply = self.verify_platform(feature.platforms(), feature)?;
        if !apply {
            debug!(
                %feature,
                host = self.host.name(),
                "feature skipped on this host"
            );
        }
        Ok(apply)
    }
}
