//! gRPC server assembly.

use crate::auth::AuthBroker;
use crate::grpc::auth_layer::AuthLayer;
use crate::grpc::chat_service::ChatGrpcService;
use proto_gen::chat::chat_service_server::ChatServiceServer;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Identity, Server, ServerTlsConfig};

/// Load a PEM certificate and key into a server TLS config.
///
/// # Errors
///
/// Returns an I/O error if either file cannot be read.
pub async fn load_tls_config(cert_path: &str, key_path: &str) -> std::io::Result<ServerTlsConfig> {
    let cert = tokio::fs::read(cert_path).await?;
    let key = tokio::fs::read(key_path).await?;
    Ok(ServerTlsConfig::new().identity(Identity::from_pem(cert, key)))
}

/// Serve `service` on an already bound listener until `shutdown` resolves.
///
/// Every call except the public methods passes through [`AuthLayer`].
///
/// # Errors
///
/// Returns a transport error if TLS setup or the server fails.
pub async fn serve<F>(
    listener: TcpListener,
    service: ChatGrpcService,
    broker: Arc<AuthBroker>,
    tls: Option<ServerTlsConfig>,
    shutdown: F,
) -> Result<(), tonic::transport::Error>
where
    F: Future<Output = ()>,
{
    let mut builder = Server::builder();
    if let Some(tls) = tls {
        builder = builder.tls_config(tls)?;
    }

    builder
        .layer(AuthLayer::new(broker))
        .add_service(ChatServiceServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
}
