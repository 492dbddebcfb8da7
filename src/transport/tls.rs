use super::TransportError;
use rustls::RootCertStore;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ServerConfig, WebPkiClientVerifier};
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

fn pem_error(path: &Path, err: impl std::fmt::Debug) -> TransportError {
    TransportError::Pem {
        path: path.to_path_buf(),
        message: format!("{err:?}"),
    }
}

fn ensure_readable(path: &Path) -> Result<(), TransportError> {
    std::fs::metadata(path)
        .map(|_| ())
        .map_err(|source| TransportError::Read {
            path: path.to_path_buf(),
            source,
        })
}

pub(super) fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    ensure_readable(path)?;
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|err| pem_error(path, err))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| pem_error(path, err))?;
    if certs.is_empty() {
        return Err(TransportError::NoCertificate(path.to_path_buf()));
    }
    Ok(certs)
}

pub(super) fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    ensure_readable(path)?;
    PrivateKeyDer::from_pem_file(path).map_err(|err| pem_error(path, err))
}

/// Server side TLS requiring a client certificate issued by `ca`.
pub(super) fn server_config(
    ca: &Path,
    cert: &Path,
    key: &Path,
) -> Result<ServerConfig, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut roots = RootCertStore::empty();
    for root in load_certs(ca)? {
        roots.add(root)?;
    }
    let verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone()).build()?;
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_single_cert(load_certs(cert)?, load_key(key)?)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Accepts TCP connections and hands out streams whose TLS handshake has
/// completed. Every handshake runs in its own task so a stalled client never
/// holds up the accept loop.
pub struct TlsListener {
    local_addr: SocketAddr,
    connections: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
    accept_task: JoinHandle<()>,
}

impl TlsListener {
    pub fn new(tcp: TcpListener, config: Arc<ServerConfig>, name: &'static str) -> io::Result<Self> {
        let local_addr = tcp.local_addr()?;
        let (tx, connections) = mpsc::channel(64);
        let accept_task = tokio::spawn(accept_loop(tcp, TlsAcceptor::from(config), tx, name));
        Ok(Self {
            local_addr,
            connections,
            accept_task,
        })
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    tx: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
    name: &'static str,
) {
    loop {
        let (stream, peer) = match tcp.accept().await {
            Ok(it) => it,
            Err(err) => {
                tracing::warn!(listener = name, "failed to accept connection: {}", err);
                // usually fd exhaustion, give the process time to recover
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }
        };
        if tx.is_closed() {
            break;
        }
        let acceptor = acceptor.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                Ok(Ok(tls)) => {
                    let _ = tx.send((tls, peer)).await;
                }
                Ok(Err(err)) => {
                    tracing::debug!(listener = name, peer = %peer, "tls handshake failed: {}", err)
                }
                Err(_) => tracing::debug!(listener = name, peer = %peer, "tls handshake timed out"),
            }
        });
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.connections.recv().await {
            Some(conn) => conn,
            // accept loop is gone, nothing will ever arrive
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}
