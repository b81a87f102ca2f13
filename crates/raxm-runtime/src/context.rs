use crate::dispatcher::{ActionDispatcher, Mounted, RenderRequest};
use crate::registry::DefinitionRegistry;
use chrono::Duration;
use raxm_component::ComponentDefinition;
use raxm_guard::{ChecksumGuard, UploadUrlSigner};
use raxm_protocol::{DataMap, MessageRequest, MessageResponse, RaxmError, RaxmResult, WireCodec};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};

/// Lifetime of a signed upload URL unless configured otherwise.
pub const DEFAULT_UPLOAD_TTL_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Production,
    #[default]
    Development,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Development => "development",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" | "local" => Ok(Self::Development),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RaxmBuilder {
    app_key: Vec<u8>,
    environment: Environment,
    upload_ttl: Duration,
    registry: DefinitionRegistry,
}

impl RaxmBuilder {
    pub fn new(app_key: impl Into<Vec<u8>>) -> Self {
        Self {
            app_key: app_key.into(),
            environment: Environment::default(),
            upload_ttl: Duration::seconds(DEFAULT_UPLOAD_TTL_SECS),
            registry: DefinitionRegistry::default(),
        }
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn upload_ttl(mut self, ttl: Duration) -> Self {
        self.upload_ttl = ttl;
        self
    }

    pub fn component(mut self, definition: impl ComponentDefinition + 'static) -> Self {
        self.registry.register(definition);
        self
    }

    pub fn build(self) -> Raxm {
        let guard = Arc::new(ChecksumGuard::new(self.app_key.clone()));
        let registry = Arc::new(self.registry);
        let dispatcher = ActionDispatcher::new(registry, guard);
        let uploads = Arc::new(UploadUrlSigner::new(self.app_key, self.upload_ttl));
        info!(
            environment = %self.environment,
            components = ?dispatcher.registry().names(),
            "raxm context built"
        );
        Raxm {
            environment: self.environment,
            dispatcher,
            uploads,
        }
    }
}

/// Everything a transport needs to serve Raxm requests. Immutable once
/// built; cheap to clone.
#[derive(Debug, Clone)]
pub struct Raxm {
    environment: Environment,
    dispatcher: ActionDispatcher,
    uploads: Arc<UploadUrlSigner>,
}

impl Raxm {
    pub fn builder(app_key: impl Into<Vec<u8>>) -> RaxmBuilder {
        RaxmBuilder::new(app_key)
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &DefinitionRegistry {
        self.dispatcher.registry()
    }

    pub fn uploads(&self) -> &UploadUrlSigner {
        &self.uploads
    }

    /// Handle a message addressed to the component endpoint `name`.
    pub fn handle_message(
        &self,
        name: &str,
        request: MessageRequest,
    ) -> RaxmResult<MessageResponse> {
        if request.fingerprint.name != name {
            return Err(RaxmError::MalformedEnvelope(format!(
                "fingerprint names {} but the endpoint is {name}",
                request.fingerprint.name
            )));
        }
        self.dispatcher.handle(request)
    }

    /// Decode, handle and encode one message body.
    #[instrument(skip(self, body), fields(bytes = body.len()))]
    pub fn handle_bytes(&self, name: &str, body: &[u8]) -> RaxmResult<Vec<u8>> {
        let request = WireCodec::decode_request(body)?;
        let response = self.handle_message(name, request)?;
        WireCodec::encode_response(&response)
    }

    pub fn mount(
        &self,
        name: &str,
        params: &DataMap,
        request: &RenderRequest,
    ) -> RaxmResult<Mounted> {
        self.dispatcher.mount(name, params, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raxm_component::{ComponentSchema, FnComponent, PropKind};
    use raxm_protocol::Update;
    use serde_json::json;

    fn raxm() -> Raxm {
        Raxm::builder("context-key")
            .environment(Environment::Production)
            .component(
                FnComponent::new(
                    ComponentSchema::new("toggle").with_property(
                        "open",
                        PropKind::Boolean,
                        json!(false),
                    ),
                    |state, _| Ok(format!("<details>{}</details>", state.get("open").cloned().unwrap_or_default())),
                ),
            )
            .build()
    }

    #[test]
    fn environment_parsing() {
        assert_eq!("prod".parse::<Environment>(), Ok(Environment::Production));
        assert_eq!(" Local ".parse::<Environment>(), Ok(Environment::Development));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn bytes_round_trip_through_the_context() {
        let raxm = raxm();
        assert!(raxm.environment().is_production());
        let mounted = raxm
            .mount("toggle", &DataMap::new(), &RenderRequest::new("/"))
            .unwrap();

        let request = MessageRequest {
            fingerprint: mounted.initial.fingerprint.clone(),
            server_memo: mounted.initial.server_memo.clone(),
            updates: vec![Update::call_method("$toggle", vec![json!("open")])],
        };
        let body = WireCodec::encode_request(&request).unwrap();
        let response =
            WireCodec::decode_response(&raxm.handle_bytes("toggle", &body).unwrap()).unwrap();
        assert_eq!(response.server_memo.data["open"], json!(true));
        assert_eq!(response.effects.dirty, vec!["open"]);
    }

    #[test]
    fn endpoint_name_must_match_fingerprint() {
        let raxm = raxm();
        let mounted = raxm
            .mount("toggle", &DataMap::new(), &RenderRequest::new("/"))
            .unwrap();
        let request = MessageRequest {
            fingerprint: mounted.initial.fingerprint.clone(),
            server_memo: mounted.initial.server_memo,
            updates: Vec::new(),
        };
        let error = raxm.handle_message("counter", request).unwrap_err();
        assert!(matches!(error, RaxmError::MalformedEnvelope(_)));
    }

    #[test]
    fn upload_signer_shares_the_app_key() {
        let raxm = raxm();
        let now = chrono::Utc::now();
        let url = raxm.uploads().sign("/raxm/upload-file", now);
        assert!(
            raxm.uploads()
                .verify("/raxm/upload-file", Some(url.expires), Some(&url.signature), now)
                .is_ok()
        );
        assert_eq!(raxm.uploads().ttl(), Duration::seconds(DEFAULT_UPLOAD_TTL_SECS));
    }
}
