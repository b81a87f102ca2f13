use async_trait::async_trait;
use raxm_protocol::{ComponentId, MessageRequest, MessageResponse};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("server answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// One message ready to leave the client.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub component: ComponentId,
    /// Component name; the endpoint path segment.
    pub name: String,
    pub request: MessageRequest,
    /// Prefetch key for speculative messages. Their responses are stored,
    /// not applied.
    pub prefetch: Option<String>,
}

impl OutboundMessage {
    pub fn endpoint(&self, prefix: &str) -> String {
        format!("{}/{}", prefix.trim_end_matches('/'), self.name)
    }

    pub fn is_prefetch(&self) -> bool {
        self.prefetch.is_some()
    }
}

/// Carries messages to the server. HTTP in a browser, an in-process
/// dispatcher in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<MessageResponse, TransportError>;
}
