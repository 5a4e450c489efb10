use std::error::Error as StdError;
use std::fmt;

use serde_json::Value;

use super::outcome::DeliveryOutcome;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    AuthRejected,
    MalformedPayload,
    GroupLookupFailed,
    NoServers,
    PeerUnreachable,
    PeerRejected,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    url: Option<String>,
    status: Option<u16>,
    body: Option<Value>,
    selector_type: Option<&'static str>,
    packet: Option<Value>,
    outcome: Option<DeliveryOutcome>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            url: None,
            status: None,
            body: None,
            selector_type: None,
            packet: None,
            outcome: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Full URL of the peer call that failed.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Decoded response body of the failed peer call (`{}` when undecodable).
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn selector_type(&self) -> Option<&'static str> {
        self.selector_type
    }

    /// The `{msg, ...}` packet that was sent, so callers can retry without re-deriving it.
    pub fn packet(&self) -> Option<&Value> {
        self.packet.as_ref()
    }

    /// Tally gathered before the failure was reported.
    pub fn outcome(&self) -> Option<&DeliveryOutcome> {
        self.outcome.as_ref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_selector_type(mut self, selector_type: &'static str) -> Self {
        self.selector_type = Some(selector_type);
        self
    }

    pub fn with_packet(mut self, packet: Value) -> Self {
        self.packet = Some(packet);
        self
    }

    pub fn with_outcome(mut self, outcome: DeliveryOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(url) = &self.url {
            write!(f, " (url: {url})")?;
        }
        if let Some(status) = self.status {
            write!(f, " (status: {status})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::AuthRejected => 3,
        ErrorKind::MalformedPayload => 4,
        ErrorKind::GroupLookupFailed => 5,
        ErrorKind::NoServers => 6,
        ErrorKind::PeerUnreachable => 7,
        ErrorKind::PeerRejected => 8,
        ErrorKind::Io => 9,
    }
}
