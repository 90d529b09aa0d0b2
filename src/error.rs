use thiserror::Error;

/// Errors surfaced by the transport, the backend adapters and the stores.
///
/// None of these are fatal to the page: every store converts them into a
/// chat message or a notice at the call site.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),

    #[error("backend error: {message}")]
    Api { status: Option<u16>, message: String },

    #[error("unexpected response shape: {0}")]
    Decode(String),

    #[error("cannot save a sequence without steps")]
    EmptySequence,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    pub fn api(message: impl Into<String>) -> Self {
        ClientError::Api { status: None, message: message.into() }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_displays_server_message() {
        let err = ClientError::Api { status: Some(404), message: "Sequence not found".into() };
        assert_eq!(err.to_string(), "backend error: Sequence not found");
        assert_eq!(ClientError::Network("refused".into()).to_string(), "network error: refused");
    }

    #[test]
    fn json_errors_become_decode_errors() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let err: ClientError = parse.unwrap_err().into();
        assert!(matches!(err, ClientError::Decode(_)));
    }
}
