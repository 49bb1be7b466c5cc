//! Test server harness for end-to-end tests.
//!
//! `TestChatServer` runs the real gRPC stack (auth layer, handlers, sessions,
//! registry) over an in-memory store on a random local port.

use chat_service::admission::{AdmissionControl, RateLimitConfig};
use chat_service::auth::AuthBroker;
use chat_service::config::Config;
use chat_service::grpc::{self, ChatGrpcService, ChatServiceDeps};
use chat_service::registry::ConnectionRegistry;
use chat_service::repositories::InMemoryStore;
use chat_service::session::StreamSession;
use proto_gen::chat::chat_service_client::ChatServiceClient;
use proto_gen::chat::RegisterRequest;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

/// Secret the harness signs with by default.
pub const TEST_JWT_SECRET: &str = "test-jwt-secret-for-chat-harness-0123456789";

/// A running chat server.
pub struct TestChatServer {
    addr: SocketAddr,
    config: Config,
    broker: Arc<AuthBroker>,
    registry: Arc<ConnectionRegistry>,
    store: Arc<InMemoryStore>,
    shutdown: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestChatServer {
    /// Spawn with default test configuration.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(HashMap::new()).await
    }

    /// Spawn with configuration overrides on top of the test defaults.
    pub async fn spawn_with(overrides: HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("JWT_SECRET".to_string(), TEST_JWT_SECRET.to_string()),
            ("BCRYPT_COST".to_string(), "10".to_string()),
            ("GRPC_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("HEALTH_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ]);
        vars.extend(overrides);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let broker = Arc::new(
            AuthBroker::from_config(&config)
                .map_err(|e| anyhow::anyhow!("Failed to build auth broker: {}", e))?,
        );
        let admission = Arc::new(AdmissionControl::new(RateLimitConfig {
            requests_per_minute: config.rate_limit_rpm,
            burst: config.rate_limit_burst,
            idle_eviction_window: Duration::from_secs(config.rate_limit_idle_seconds),
        }));
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(InMemoryStore::new());

        let service = ChatGrpcService::new(ChatServiceDeps {
            broker: Arc::clone(&broker),
            admission,
            accounts: store.clone(),
            conversations: store.clone(),
            session: StreamSession::new(Arc::clone(&registry), store.clone(), store.clone()),
            bcrypt_cost: config.bcrypt_cost,
            stream_buffer_size: config.stream_buffer_size,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let shutdown = CancellationToken::new();
        let server_token = shutdown.clone();
        let server_broker = Arc::clone(&broker);
        let handle = tokio::spawn(async move {
            let result = grpc::serve(listener, service, server_broker, None, async move {
                server_token.cancelled().await;
            })
            .await;
            if let Err(e) = result {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            broker,
            registry,
            store,
            shutdown,
            _handle: handle,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn broker(&self) -> &Arc<AuthBroker> {
        &self.broker
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }

    /// Connect a new client.
    pub async fn client(&self) -> Result<ChatServiceClient<Channel>, anyhow::Error> {
        ChatServiceClient::connect(self.url())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to test server: {}", e))
    }

    /// Register an account and return its token.
    pub async fn register(&self, email: &str, password: &str) -> Result<String, anyhow::Error> {
        let mut client = self.client().await?;
        let response = client
            .register(RegisterRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await
            .map_err(|e| anyhow::anyhow!("Register failed: {}", e))?;
        Ok(response.into_inner().token)
    }

    /// Wait until `identity` has `count` live connections.
    pub async fn wait_for_connections(&self, identity: &str, count: usize) {
        for _ in 0..200 {
            if self.registry.connection_count(identity) == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "{identity} did not reach {count} connections (has {})",
            self.registry.connection_count(identity)
        );
    }
}

/// Attach a Bearer token to a request.
pub fn with_bearer<T>(message: T, token: &str) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    request.metadata_mut().insert(
        "authorization",
        format!("Bearer {token}")
            .parse()
            .expect("token should be valid metadata"),
    );
    request
}

impl Drop for TestChatServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self._handle.abort();
    }
}
