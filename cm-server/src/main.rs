//! Mutually authenticated TLS listener (§4.7).
//!
//! For each accepted TCP connection: complete a TLS handshake that
//! requires both a server certificate (this process's identity) and a
//! verified client certificate against the configured CA, read one
//! bounded packet, hand it to [`cm::protocol`], write the response, and
//! always close — including on handshake failure.

use std::fs;
use std::io::BufReader;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use cm::config;
use cm::context::ServerContext;
use cm::protocol;

/// Larger than the reference's 1024-byte `recv` buffer, which silently
/// truncates any larger packet into a schema-validation failure (§9).
const MAX_PACKET_BYTES: usize = 64 * 1024;

fn load_certs(path: &str) -> std::io::Result<Vec<CertificateDer<'static>>> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()
}

fn load_private_key(path: &str) -> std::io::Result<PrivateKeyDer<'static>> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let keys = rustls_pemfile::pkcs8_private_keys(&mut reader).collect::<Result<Vec<_>, _>>()?;
    keys.into_iter()
        .next()
        .map(PrivateKeyDer::Pkcs8)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "no private key found"))
}

/// Builds a `rustls::ServerConfig` requiring TLS 1.3 and a client
/// certificate signed by the configured CA (§4.7: both peer-cert
/// verification and a server identity, peer verification REQUIRED).
fn build_tls_config(tls: &config::TlsConfig) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let certs = load_certs(&tls.cert_path)?;
    let key = load_private_key(&tls.key_path)?;

    let mut ca_store = RootCertStore::empty();
    for cert in load_certs(&tls.ca_path)? {
        ca_store.add(cert)?;
    }
    let verifier = WebPkiClientVerifier::builder(Arc::new(ca_store)).build()?;

    let mut config = ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"cm/1".to_vec()];
    Ok(config)
}

async fn handle_connection(acceptor: TlsAcceptor, socket: tokio::net::TcpStream, ctx: ServerContext) {
    let mut stream = match acceptor.accept(socket).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "TLS handshake failed");
            return;
        }
    };

    // Read one byte past the cap: if the peer fills the whole buffer *and*
    // still has more to send, the packet is oversize rather than exactly
    // `MAX_PACKET_BYTES` long.
    let mut buf = vec![0u8; MAX_PACKET_BYTES + 1];
    let read = match stream.read(&mut buf).await {
        Ok(0) => return,
        Ok(n) => n,
        Err(e) => {
            tracing::debug!(error = %e, "connection lost before a full packet arrived");
            let _ = stream.shutdown().await;
            return;
        }
    };

    let (code, body) = if read > MAX_PACKET_BYTES {
        tracing::warn!(bytes = read, "rejected oversize packet");
        protocol::respond(Err(cm::RequestError::from(cm::error::ProtocolError::Oversize)))
    } else {
        match protocol::parse_packet(&buf[..read]) {
            Ok(packet) => protocol::respond(protocol::handle(&ctx, packet).await),
            Err(e) => protocol::respond(Err(cm::RequestError::from(e))),
        }
    };

    let response = format!("{} {}", code, body);
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        tracing::debug!(error = %e, "failed to write response");
    }
    let _ = stream.shutdown().await;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let log_format = std::env::var("CM_LOG_FORMAT").unwrap_or_else(|_| "pretty".into());
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "cm_server=info,cm=info".into());
    if log_format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).with_target(true).with_thread_ids(true).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config_path = std::env::var("CM_CONFIG").unwrap_or_else(|_| "cm.json".into());
    let server_config = config::ServerConfig::load(&config_path)?;

    let tls_config = build_tls_config(&server_config.tls)?;
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));

    let ctx = ServerContext::from_config(&server_config).await?;

    let listener = TcpListener::bind(&server_config.bind_addr).await?;
    tracing::info!(addr = %server_config.bind_addr, "credentials manager listening");

    loop {
        let (socket, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        tracing::debug!(%peer_addr, "accepted connection");

        let acceptor = acceptor.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            handle_connection(acceptor, socket, ctx).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_certs_reports_missing_file() {
        let result = load_certs("/nonexistent/server.crt");
        assert!(result.is_err());
    }

    #[test]
    fn load_private_key_reports_missing_file() {
        let result = load_private_key("/nonexistent/server.key");
        assert!(result.is_err());
    }

    #[test]
    fn oversize_packet_maps_to_500_with_oversize_error() {
        let err = cm::RequestError::from(cm::error::ProtocolError::Oversize);
        let (code, _) = protocol::respond(Err(err));
        assert_eq!(code, 500);
    }
}
