//! Invokation and Response message types.
//!
//! Defines the JSON wire format exchanged between contexts. An
//! [`Invokation`] names a remote method with its arguments and carries a
//! correlation id; a [`Response`] settles it with either a result or an
//! error, never both.
//!
//! # Format
//!
//! ```json
//! {
//!   "id": "uuid",
//!   "method": "STAKE_REQUEST",
//!   "args": ["100", "FCL"],
//!   "source": "content_script",
//!   "destination": "background"
//! }
//! ```
//!
//! ```json
//! { "id": "uuid", "result": { ... } }
//! { "id": "uuid", "error": { "kind": "declined", "message": "..." } }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::Method;

// ============================================================================
// EndpointName
// ============================================================================

/// Logical name of a browser context participating in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointName {
    /// Extension background service.
    Background,
    /// Content script injected into the page.
    ContentScript,
    /// In-page provider script.
    Inpage,
    /// Popup UI.
    Popup,
}

impl EndpointName {
    /// Returns the stable wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::ContentScript => "content_script",
            Self::Inpage => "inpage",
            Self::Popup => "popup",
        }
    }
}

impl fmt::Display for EndpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Invokation
// ============================================================================

/// A request message naming a remote method and its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Invokation {
    /// Correlation id, unique among this endpoint's outstanding calls.
    pub id: RequestId,

    /// The remote operation to run.
    pub method: Method,

    /// Ordered, serializable argument tuple.
    pub args: Vec<Value>,

    /// Originating endpoint.
    pub source: EndpointName,

    /// Addressed endpoint.
    pub destination: EndpointName,
}

impl Invokation {
    /// Creates an invokation with a fresh correlation id.
    #[inline]
    #[must_use]
    pub fn new(
        method: Method,
        args: Vec<Value>,
        source: EndpointName,
        destination: EndpointName,
    ) -> Self {
        Self {
            id: RequestId::generate(),
            method,
            args,
            source,
            destination,
        }
    }

    /// Creates an invokation with a specific correlation id.
    #[inline]
    #[must_use]
    pub fn with_id(
        id: RequestId,
        method: Method,
        args: Vec<Value>,
        source: EndpointName,
        destination: EndpointName,
    ) -> Self {
        Self {
            id,
            method,
            args,
            source,
            destination,
        }
    }
}

// ============================================================================
// RemoteError
// ============================================================================

/// Error payload carried inside a [`Response`].
///
/// The `kind` keeps user-visible failures (declined, unauthorized)
/// distinguishable from transport failures so callers can render a clear
/// recovery action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Failure category.
    pub kind: RemoteErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl RemoteError {
    /// Creates an error payload.
    #[inline]
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Failure categories for [`RemoteError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// No valid session; authorization middleware rejected the call.
    Unauthorized,
    /// Caller origin is not allowed for this method.
    Forbidden,
    /// The user declined an approval-gated request.
    Declined,
    /// A deadline elapsed before the request settled.
    Timeout,
    /// The receiving endpoint has no handler for the method.
    HandlerNotRegistered,
    /// The handler ran and failed.
    Handler,
    /// The transport between contexts failed.
    Connection,
}

// ============================================================================
// Response
// ============================================================================

/// A response message settling an [`Invokation`] by correlation id.
///
/// Exactly one of `result`/`error` is present; the constructors enforce
/// this, so a response never carries both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Matches the originating invokation's id.
    pub id: RequestId,

    /// Success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,

    /// Failure payload, mutually exclusive with `result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RemoteError>,
}

impl Response {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn failure(id: RequestId, error: RemoteError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Returns `true` if this is a success response.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extracts the payload, converting an error response into [`Error`].
    ///
    /// A success response without an explicit `result` decodes as JSON null.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the response carried an error payload.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            None => Ok(self.result.unwrap_or(Value::Null)),
            Some(error) => Err(Error::from(error)),
        }
    }
}

// ============================================================================
// WireMessage
// ============================================================================

/// Envelope union of everything a transport can carry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireMessage {
    /// A method invocation.
    Invokation(Invokation),
    /// A settlement for a previous invocation.
    Response(Response),
}

impl WireMessage {
    /// Parses a JSON wire message.
    ///
    /// Invokations are tried first: they carry required fields a response
    /// lacks, so the attempt order is unambiguous. Messages missing `id`
    /// fail either parse.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the text is neither message type.
    pub fn parse(text: &str) -> Result<Self> {
        if let Ok(invokation) = serde_json::from_str::<Invokation>(text) {
            return Ok(Self::Invokation(invokation));
        }

        if let Ok(response) = serde_json::from_str::<Response>(text) {
            return Ok(Self::Response(response));
        }

        Err(Error::protocol(format!("unparseable wire message: {text}")))
    }

    /// Serializes the message to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the correlation id of either variant.
    #[inline]
    #[must_use]
    pub fn id(&self) -> RequestId {
        match self {
            Self::Invokation(invokation) => invokation.id,
            Self::Response(response) => response.id,
        }
    }
}

impl From<Invokation> for WireMessage {
    fn from(invokation: Invokation) -> Self {
        Self::Invokation(invokation)
    }
}

impl From<Response> for WireMessage {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn sample_invokation() -> Invokation {
        Invokation::new(
            Method::StakeRequest,
            vec![json!("100"), json!("FCL")],
            EndpointName::ContentScript,
            EndpointName::Background,
        )
    }

    #[test]
    fn test_invokation_serializes_exact_field_set() {
        let invokation = sample_invokation();
        let json = serde_json::to_value(&invokation).expect("serialize");

        let object = json.as_object().expect("object");
        let mut keys: Vec<_> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["args", "destination", "id", "method", "source"]);
        assert_eq!(object["method"], json!("STAKE_REQUEST"));
        assert_eq!(object["source"], json!("content_script"));
    }

    #[test]
    fn test_invokation_missing_id_is_rejected() {
        let text = r#"{
            "method": "STAKE_REQUEST",
            "args": [],
            "source": "inpage",
            "destination": "background"
        }"#;

        assert!(serde_json::from_str::<Invokation>(text).is_err());
        assert!(WireMessage::parse(text).is_err());
    }

    #[test]
    fn test_response_missing_id_is_rejected() {
        assert!(serde_json::from_str::<Response>(r#"{"result": 1}"#).is_err());
    }

    #[test]
    fn test_success_response_shape() {
        let id = RequestId::generate();
        let response = Response::success(id, json!({"address": "0xabc"}));
        let json = serde_json::to_value(&response).expect("serialize");

        let object = json.as_object().expect("object");
        assert_eq!(object.len(), 2);
        assert!(object.contains_key("id"));
        assert!(object.contains_key("result"));
    }

    #[test]
    fn test_error_response_shape() {
        let id = RequestId::generate();
        let response = Response::failure(
            id,
            RemoteError::new(RemoteErrorKind::Declined, "user declined"),
        );
        let json = serde_json::to_value(&response).expect("serialize");

        let object = json.as_object().expect("object");
        assert_eq!(object.len(), 2);
        assert_eq!(object["error"]["kind"], json!("declined"));
        assert!(response.is_error());
    }

    #[test]
    fn test_into_result() {
        let id = RequestId::generate();

        let ok = Response::success(id, json!(42)).into_result().expect("ok");
        assert_eq!(ok, json!(42));

        let err =
            Response::failure(id, RemoteError::new(RemoteErrorKind::Handler, "boom")).into_result();
        assert!(err.is_err());
    }

    #[test]
    fn test_wire_parse_routes_by_shape() {
        let invokation = sample_invokation();
        let text = WireMessage::from(invokation.clone())
            .to_json()
            .expect("serialize");
        match WireMessage::parse(&text).expect("parse") {
            WireMessage::Invokation(parsed) => assert_eq!(parsed, invokation),
            WireMessage::Response(_) => panic!("parsed as response"),
        }

        let response = Response::success(invokation.id, Value::Null);
        let text = WireMessage::from(response.clone())
            .to_json()
            .expect("serialize");
        match WireMessage::parse(&text).expect("parse") {
            WireMessage::Response(parsed) => assert_eq!(parsed, response),
            WireMessage::Invokation(_) => panic!("parsed as invokation"),
        }
    }

    #[test]
    fn test_wire_parse_rejects_garbage() {
        assert!(WireMessage::parse("not json").is_err());
        assert!(WireMessage::parse(r#"{"something": "else"}"#).is_err());
    }

    mod properties {
        use super::*;

        use proptest::prelude::*;

        fn arg_strategy() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::from),
                any::<i64>().prop_map(Value::from),
                "[a-zA-Z0-9 _.:/-]{0,32}".prop_map(Value::from),
            ]
        }

        proptest! {
            // The wire contract must survive any serializable args shape.
            #[test]
            fn invokation_round_trips(args in prop::collection::vec(arg_strategy(), 0..6)) {
                let invokation = Invokation::new(
                    Method::CredentialStoreRequest,
                    args,
                    EndpointName::Inpage,
                    EndpointName::Background,
                );

                let text = WireMessage::from(invokation.clone()).to_json().unwrap();
                let parsed = WireMessage::parse(&text).unwrap();
                prop_assert_eq!(parsed, WireMessage::Invokation(invokation));
            }
        }
    }
}
