//! Wire documents exchanged with the native plugin.
//!
//! Requests are UTF-8 JSON. Responses are the JSON envelope
//! `{"ok": T} | {"err": "...", "when": "..."}`. Transports that hand back a
//! pointer instead of an owned buffer prefix the envelope with its length:
//! `[u32 big-endian length][payload]`.

use std::path::Path;

use serde::{
    Deserialize, Deserializer, Serialize, Serializer, de::DeserializeOwned,
};
use snafu::ensure;

use crate::error::{
    DispatchError, FrameTooLargeSnafu, MalformedResponseSnafu,
    NullResponseSnafu,
};

/// Logical name of the operation that displays a notification.
pub const OP_NOTIFY_SEND: &str = "notify_send";

/// Size of the big-endian length prefix on pointer-returned responses.
pub const LEN_PREFIX_SIZE: usize = std::mem::size_of::<u32>();

/// Upper bound on a single response frame. A header announcing more than
/// this is treated as garbage rather than read.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Icon to render a notification with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Icon {
    /// Use the icon of the named application.
    App(String),
    /// `file://` URI of an image.
    Path(String),
    /// freedesktop.org icon theme name, e.g. `utilities-terminal`.
    ThemeName(String),
}

impl Icon {
    pub fn app(name: impl Into<String>) -> Self {
        Icon::App(name.into())
    }

    pub fn path(uri: impl Into<String>) -> Self {
        Icon::Path(uri.into())
    }

    pub fn theme(name: impl Into<String>) -> Self {
        Icon::ThemeName(name.into())
    }

    /// Resolve a local file path into an absolute `file://` icon.
    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let absolute = std::path::absolute(path.as_ref())?;
        Ok(Icon::Path(format!("file://{}", absolute.display())))
    }
}

/// How long the notification server keeps a notification on screen.
///
/// Values are validated when set on a builder; a `Millis` that is zero or
/// negative never reaches the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Never,
    Millis(i64),
}

impl From<i64> for Timeout {
    fn from(ms: i64) -> Self {
        Timeout::Millis(ms)
    }
}

impl From<i32> for Timeout {
    fn from(ms: i32) -> Self {
        Timeout::Millis(i64::from(ms))
    }
}

impl Serialize for Timeout {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Timeout::Never => s.serialize_str("never"),
            Timeout::Millis(ms) => s.serialize_i64(*ms),
        }
    }
}

impl<'de> Deserialize<'de> for Timeout {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(i64),
        }

        match Raw::deserialize(d)? {
            Raw::Num(ms) => Ok(Timeout::Millis(ms)),
            Raw::Str(s) if s == "never" => Ok(Timeout::Never),
            Raw::Str(s) => Err(serde::de::Error::invalid_value(
                serde::de::Unexpected::Str(&s),
                &"\"never\" or a number of milliseconds",
            )),
        }
    }
}

/// The document handed to the native side to display one notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_millis: Option<Timeout>,
}

/// Success payload of a notification send. The native side reports nothing
/// beyond the fact that it succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyResult {}

/// Response envelope. Exactly one of `ok` / `err` is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response<T> {
    pub ok: Option<T>,
    #[serde(default)]
    pub err: Option<String>,
    #[serde(default)]
    pub when: Option<String>,
}

impl<T> Response<T> {
    /// `err` wins over `ok` when both are present.
    pub fn into_result(self) -> Result<T, DispatchError> {
        match (self.err, self.ok) {
            (Some(message), _) => Err(DispatchError::Native {
                message,
                when: self.when,
            }),
            (None, Some(value)) => Ok(value),
            (None, None) => MalformedResponseSnafu.fail(),
        }
    }
}

/// Serialize a request document.
pub fn encode_request<T: Serialize + ?Sized>(
    request: &T,
) -> Result<Vec<u8>, DispatchError> {
    Ok(serde_json::to_vec(request)?)
}

/// Decode a response envelope and unwrap it into the success value.
pub fn decode_response<T: DeserializeOwned>(
    payload: &[u8],
) -> Result<T, DispatchError> {
    let response: Response<T> = serde_json::from_slice(payload)?;
    response.into_result()
}

/// Copy a length-prefixed response out of foreign memory.
///
/// The pointer is only read during this call; the returned buffer is owned
/// and nothing retains `ptr`.
///
/// # Safety
///
/// `ptr` must either be null or point to at least [`LEN_PREFIX_SIZE`]
/// readable bytes, followed by as many readable bytes as the big-endian
/// prefix announces, all of which stay valid and unmodified for the
/// duration of the call.
pub unsafe fn read_length_prefixed(
    ptr: *const u8,
) -> Result<Vec<u8>, DispatchError> {
    ensure!(!ptr.is_null(), NullResponseSnafu);

    // SAFETY: caller guarantees the prefix is readable.
    let header = unsafe { std::slice::from_raw_parts(ptr, LEN_PREFIX_SIZE) };
    let len = announced_len(header)?;

    // SAFETY: caller guarantees `len` bytes follow the prefix; `len` has
    // been bounded by MAX_FRAME_LEN above.
    let payload = unsafe {
        std::slice::from_raw_parts(ptr.add(LEN_PREFIX_SIZE), len)
    };
    Ok(payload.to_vec())
}

fn announced_len(header: &[u8]) -> Result<usize, DispatchError> {
    let mut be = [0u8; LEN_PREFIX_SIZE];
    be.copy_from_slice(header);
    let len = u32::from_be_bytes(be) as usize;
    ensure!(
        len <= MAX_FRAME_LEN,
        FrameTooLargeSnafu {
            len,
            max: MAX_FRAME_LEN,
        }
    );
    Ok(len)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let len = u32::try_from(payload.len()).unwrap();
        let mut buf = len.to_be_bytes().to_vec();
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn request_omits_unset_fields() {
        let req = NotificationRequest {
            title: "Hey".to_string(),
            ..Default::default()
        };
        let value: serde_json::Value =
            serde_json::from_slice(&encode_request(&req).unwrap()).unwrap();
        assert_eq!(value, json!({ "title": "Hey" }));
    }

    #[test]
    fn request_uses_camel_case_and_tagged_icon() {
        let req = NotificationRequest {
            title: "Title".to_string(),
            body: Some("Body".to_string()),
            subtitle: Some("Sub".to_string()),
            icon: Some(Icon::theme("utilities-terminal")),
            sound_name: Some("Basso".to_string()),
            timeout_millis: Some(Timeout::Never),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "title": "Title",
                "body": "Body",
                "subtitle": "Sub",
                "icon": { "themeName": "utilities-terminal" },
                "soundName": "Basso",
                "timeoutMillis": "never",
            })
        );

        let app = serde_json::to_value(Icon::app("Terminal")).unwrap();
        assert_eq!(app, json!({ "app": "Terminal" }));
        let numeric = serde_json::to_value(Timeout::Millis(10)).unwrap();
        assert_eq!(numeric, json!(10));
    }

    #[test]
    fn timeout_rejects_unknown_strings() {
        assert_eq!(
            serde_json::from_str::<Timeout>("\"never\"").unwrap(),
            Timeout::Never
        );
        assert_eq!(
            serde_json::from_str::<Timeout>("250").unwrap(),
            Timeout::Millis(250)
        );
        assert!(serde_json::from_str::<Timeout>("\"forever\"").is_err());
    }

    #[test]
    fn ok_response_unwraps() {
        let result: NotifyResult = decode_response(br#"{"ok":{}}"#).unwrap();
        assert_eq!(result, NotifyResult {});
    }

    #[test]
    fn err_response_carries_context() {
        let err = decode_response::<NotifyResult>(
            br#"{"err":"permission denied","when":"showing notification"}"#,
        )
        .unwrap_err();
        match err {
            DispatchError::Native { message, when } => {
                assert_eq!(message, "permission denied");
                assert_eq!(when.as_deref(), Some("showing notification"));
            }
            other => panic!("expected Native, got {other:?}"),
        }
    }

    #[test]
    fn err_wins_over_ok() {
        let err =
            decode_response::<NotifyResult>(br#"{"ok":{},"err":"boom"}"#)
                .unwrap_err();
        assert!(matches!(err, DispatchError::Native { .. }));
    }

    #[test]
    fn empty_envelope_is_malformed() {
        for payload in [&br#"{}"#[..], br#"{"ok":null,"err":null}"#] {
            let err = decode_response::<NotifyResult>(payload).unwrap_err();
            assert!(
                matches!(err, DispatchError::MalformedResponse { .. }),
                "got {err:?}"
            );
        }
    }

    #[test]
    fn invalid_json_is_a_protocol_error() {
        let err = decode_response::<NotifyResult>(b"not json").unwrap_err();
        assert!(matches!(err, DispatchError::Json { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Protocol);
    }

    #[test]
    fn oversized_header_is_rejected_before_reading_payload() {
        let header = u32::try_from(MAX_FRAME_LEN + 1).unwrap().to_be_bytes();
        let err = unsafe { read_length_prefixed(header.as_ptr()) }.unwrap_err();
        assert!(matches!(err, DispatchError::FrameTooLarge { .. }));
    }

    #[test]
    fn read_from_foreign_pointer_copies_payload() {
        let framed = frame(br#"{"ok":{}}"#);
        let copied = unsafe { read_length_prefixed(framed.as_ptr()) }.unwrap();
        drop(framed);
        let result: NotifyResult = decode_response(&copied).unwrap();
        assert_eq!(result, NotifyResult {});
    }

    #[test]
    fn read_ignores_bytes_past_the_announced_length() {
        let mut framed = frame(b"abc");
        assert_eq!(&framed[..4], &[0, 0, 0, 3]);
        framed.extend_from_slice(b"garbage");
        let copied = unsafe { read_length_prefixed(framed.as_ptr()) }.unwrap();
        assert_eq!(copied, b"abc");
    }

    #[test]
    fn read_from_null_pointer_fails() {
        let err =
            unsafe { read_length_prefixed(std::ptr::null()) }.unwrap_err();
        assert!(matches!(err, DispatchError::NullResponse));
    }
}
