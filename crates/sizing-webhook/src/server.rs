use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use poem::get;
use poem::handler;
use poem::listener::Listener;
use poem::listener::RustlsCertificate;
use poem::listener::RustlsConfig;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::post;
use poem::EndpointExt;
use poem::Route;
use poem::Server;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::error;
use tracing::info;

use crate::admission::mutate;
use crate::admission::WebhookState;

#[derive(Debug, Error)]
pub(crate) enum ServerError {
    #[error("Failed to load TLS material: {message}")]
    TlsSetup { message: String },
    #[error("Server failed: {message}")]
    Serve { message: String },
}

/// HTTPS server hosting the mutating admission endpoint.
pub(crate) struct WebhookServer {
    state: WebhookState,
    listen_addr: String,
    tls: RustlsConfig,
}

impl std::fmt::Debug for WebhookServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookServer")
            .field("listen_addr", &self.listen_addr)
            .finish_non_exhaustive()
    }
}

impl WebhookServer {
    /// Create a new webhook server, loading the TLS material eagerly so a
    /// bad certificate path fails at startup rather than on first request.
    ///
    /// # Errors
    ///
    /// - [`ServerError::TlsSetup`] if the certificate or key cannot be read
    pub(crate) fn new(
        state: WebhookState,
        listen_addr: String,
        cert_file: &Path,
        key_file: &Path,
    ) -> Result<Self, Report<ServerError>> {
        let cert = std::fs::read(cert_file).change_context(ServerError::TlsSetup {
            message: format!("Failed to read certificate: {}", cert_file.display()),
        })?;
        let key = std::fs::read(key_file).change_context(ServerError::TlsSetup {
            message: format!("Failed to read private key: {}", key_file.display()),
        })?;

        let tls = RustlsConfig::new().fallback(RustlsCertificate::new().cert(cert).key(key));

        Ok(Self {
            state,
            listen_addr,
            tls,
        })
    }

    /// Serve admission requests until shutdown is requested.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Serve`] if the server fails to bind or serve
    pub(crate) async fn run(
        self,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> Result<(), Report<ServerError>> {
        info!("Starting admission server on {}", self.listen_addr);

        let app = Route::new()
            .at("/mutate", post(mutate))
            .at("/healthz", get(healthz))
            .data(self.state)
            .with(Tracing);

        let listener = TcpListener::bind(self.listen_addr).rustls(self.tls);
        let server = Server::new(listener);

        tokio::select! {
            result = server.run(app) => {
                match result {
                    Ok(()) => {
                        info!("Admission server stopped normally");
                        Ok(())
                    }
                    Err(e) => {
                        error!("Admission server failed: {e}");
                        Err(Report::new(ServerError::Serve {
                            message: format!("Server failed: {e}"),
                        }))
                    }
                }
            }
            _ = &mut shutdown_rx => {
                info!("Admission server shutdown requested");
                Ok(())
            }
        }
    }
}

#[handler]
fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::node_cache::NodeCapacityCache;

    fn test_state() -> WebhookState {
        WebhookState {
            nodes: NodeCapacityCache::default(),
            fail_open: true,
        }
    }

    #[test]
    fn missing_certificate_fails_construction() {
        let result = WebhookServer::new(
            test_state(),
            "127.0.0.1:0".to_string(),
            Path::new("/nonexistent/tls.crt"),
            Path::new("/nonexistent/tls.key"),
        );

        let err = result.unwrap_err();
        assert!(matches!(err.current_context(), ServerError::TlsSetup { .. }));
    }

    #[test]
    fn readable_tls_files_construct_a_server() {
        let mut cert = NamedTempFile::new().unwrap();
        cert.write_all(b"not-actually-a-cert").unwrap();
        let mut key = NamedTempFile::new().unwrap();
        key.write_all(b"not-actually-a-key").unwrap();

        // Construction only reads the files; rustls validates at bind time.
        let server = WebhookServer::new(
            test_state(),
            "127.0.0.1:0".to_string(),
            cert.path(),
            key.path(),
        )
        .unwrap();
        assert_eq!(server.listen_addr, "127.0.0.1:0");
    }
}
