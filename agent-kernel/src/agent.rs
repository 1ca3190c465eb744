//! Composition root tying configuration, registries and messaging together.

use std::sync::Arc;

use agent_broker::Broker;
use agent_config::{AgentConfig, ConfigProvider};
use agent_primitives::{AgentIdentity, AgentManifest, local_host};
use agent_schema::{AvroSchema, JsonSchema, Message, SchemaError, SchemaRegistry, TypeRegistry};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::info;

use crate::{Messaging, MessagingError, TaskScheduler};

/// Configuration key holding the host name used in the agent identity.
pub const HOST_KEY: &str = "host";

/// Errors raised while assembling or operating an agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Identity or manifest validation failed.
    #[error(transparent)]
    Primitives(#[from] agent_primitives::Error),
    /// A schema or type could not be registered.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// A messaging operation failed.
    #[error(transparent)]
    Messaging(#[from] MessagingError),
    /// No broker was supplied to the builder.
    #[error("agent builder requires a broker")]
    MissingBroker,
}

/// Result alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// A running agent: identity, configuration, registries and messaging.
#[derive(Debug)]
pub struct Agent {
    manifest: AgentManifest,
    identity: AgentIdentity,
    config: Arc<dyn ConfigProvider>,
    schemas: Arc<SchemaRegistry>,
    types: Arc<TypeRegistry>,
    scheduler: TaskScheduler,
    messaging: Messaging,
}

impl Agent {
    /// Starts building an agent described by `manifest`.
    #[must_use]
    pub fn builder(manifest: AgentManifest) -> AgentBuilder {
        AgentBuilder::new(manifest)
    }

    /// Returns the agent manifest.
    #[must_use]
    pub fn manifest(&self) -> &AgentManifest {
        &self.manifest
    }

    /// Returns the identity of this instance.
    #[must_use]
    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Returns the configuration provider.
    #[must_use]
    pub fn config(&self) -> &Arc<dyn ConfigProvider> {
        &self.config
    }

    /// Returns the schema registry.
    #[must_use]
    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    /// Returns the type registry.
    #[must_use]
    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// Returns the root task scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Returns the messaging handle.
    #[must_use]
    pub fn messaging(&self) -> &Messaging {
        &self.messaging
    }

    /// Loads an Avro schema, resolving named references against the schemas
    /// already registered, and returns its identity.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Schema`] when the definition cannot be parsed.
    pub fn register_avro_schema(&self, raw: &str) -> AgentResult<String> {
        let schema = AvroSchema::load(raw, &self.schemas)?;
        Ok(self.schemas.register(Arc::new(schema)))
    }

    /// Loads a JSON schema document and returns its identity.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Schema`] when the document has no string `id`.
    pub fn register_json_schema(&self, raw: &str) -> AgentResult<String> {
        let schema = JsonSchema::load(raw)?;
        Ok(self.schemas.register(Arc::new(schema)))
    }

    /// Binds the Rust type `T` to the logical type `name`, which must match the
    /// identity of the schema used on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Schema`] when the name is empty.
    pub fn register_type<T>(&self, name: &str) -> AgentResult<()>
    where
        T: Message + DeserializeOwned,
    {
        self.types.register::<T>(name)?;
        Ok(())
    }

    /// Disconnects if connected and stops every background task.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Messaging`] when disconnecting fails.
    pub async fn shutdown(&self) -> AgentResult<()> {
        if self.messaging.state().is_connected() {
            match self.messaging.disconnect().await {
                Ok(()) | Err(MessagingError::NotConnected) => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.scheduler.close();
        info!(identity = %self.identity, "agent shut down");
        Ok(())
    }
}

/// Builder for [`Agent`].
#[derive(Debug)]
pub struct AgentBuilder {
    manifest: AgentManifest,
    broker: Option<Arc<dyn Broker>>,
    config: Option<Arc<dyn ConfigProvider>>,
    host: Option<String>,
    schemas: Option<Arc<SchemaRegistry>>,
    types: Option<Arc<TypeRegistry>>,
}

impl AgentBuilder {
    /// Creates a builder for the agent described by `manifest`.
    #[must_use]
    pub fn new(manifest: AgentManifest) -> Self {
        Self {
            manifest,
            broker: None,
            config: None,
            host: None,
            schemas: None,
            types: None,
        }
    }

    /// Sets the broker backend.
    #[must_use]
    pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Sets the configuration provider. Defaults to an empty [`AgentConfig`].
    #[must_use]
    pub fn config(mut self, config: Arc<dyn ConfigProvider>) -> Self {
        self.config = Some(config);
        self
    }

    /// Overrides the host part of the identity. Defaults to the `host` setting.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Shares an existing schema registry.
    #[must_use]
    pub fn schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    /// Shares an existing type registry.
    #[must_use]
    pub fn types(mut self, types: Arc<TypeRegistry>) -> Self {
        self.types = Some(types);
        self
    }

    /// Generates the identity and assembles the agent, disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::MissingBroker`] without a broker, or
    /// [`AgentError::Primitives`] when the identity cannot be generated.
    pub fn build(self) -> AgentResult<Agent> {
        let broker = self.broker.ok_or(AgentError::MissingBroker)?;
        let config = self
            .config
            .unwrap_or_else(|| Arc::new(AgentConfig::new()));
        config.set_default(HOST_KEY, local_host());

        let host = self
            .host
            .or_else(|| config.get_string(HOST_KEY))
            .unwrap_or_else(local_host);
        let identity = AgentIdentity::generate(self.manifest.name(), &host)?;

        let schemas = self.schemas.unwrap_or_default();
        let types = self.types.unwrap_or_default();
        let scheduler = TaskScheduler::new();
        let messaging = Messaging::new(
            identity.clone(),
            broker,
            Arc::clone(&config),
            Arc::clone(&schemas),
            Arc::clone(&types),
            scheduler.clone(),
        );

        info!(
            %identity,
            version = self.manifest.version(),
            "agent assembled"
        );
        Ok(Agent {
            manifest: self.manifest,
            identity,
            config,
            schemas,
            types,
            scheduler,
            messaging,
        })
    }
}
