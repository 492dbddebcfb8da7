//! Device facing listeners, mutual TLS unless explicitly opted out.

mod tls;

use crate::config::ListenerConfig;
use anyhow::Context;
use axum::Router;
use axum::extract::connect_info::Connected;
use axum::serve::IncomingStream;
use rustls::server::ServerConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use tls::TlsListener;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error(
        "listener '{listener}' is missing {missing}; set allow_unauthenticated = true to serve without client authentication"
    )]
    MissingCredentials {
        listener: &'static str,
        missing: String,
    },
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid PEM in {path:?}: {message}")]
    Pem { path: PathBuf, message: String },
    #[error("no certificate found in {0:?}")]
    NoCertificate(PathBuf),
    #[error(transparent)]
    Rustls(#[from] rustls::Error),
    #[error(transparent)]
    Verifier(#[from] rustls::server::VerifierBuilderError),
}

pub enum TransportMode {
    MutualTls(Arc<ServerConfig>),
    Unauthenticated,
}

impl TransportMode {
    pub fn resolve(listener: &'static str, config: &ListenerConfig) -> Result<Self, TransportError> {
        if let (Some(ca), Some(cert), Some(key)) = (&config.ca_cert, &config.tls_cert, &config.tls_key)
        {
            let server_config = tls::server_config(ca, cert, key)?;
            return Ok(TransportMode::MutualTls(Arc::new(server_config)));
        }
        let missing = [
            ("ca_cert", &config.ca_cert),
            ("tls_cert", &config.tls_cert),
            ("tls_key", &config.tls_key),
        ]
        .into_iter()
        .filter(|(_, path)| path.is_none())
        .map(|(name, _)| name)
        .collect::<Vec<_>>()
        .join(", ");
        if !config.allow_unauthenticated {
            return Err(TransportError::MissingCredentials { listener, missing });
        }
        tracing::warn!(
            listener,
            missing = %missing,
            "credentials missing, serving WITHOUT client authentication"
        );
        Ok(TransportMode::Unauthenticated)
    }
}

/// Remote address of a device connection, exposed to handlers through
/// `ConnectInfo<PeerAddr>` on both listener kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Connected<IncomingStream<'_, TcpListener>> for PeerAddr {
    fn connect_info(stream: IncomingStream<'_, TcpListener>) -> Self {
        PeerAddr(*stream.remote_addr())
    }
}

impl Connected<IncomingStream<'_, TlsListener>> for PeerAddr {
    fn connect_info(stream: IncomingStream<'_, TlsListener>) -> Self {
        PeerAddr(*stream.remote_addr())
    }
}

/// A bound socket ready to serve, created before any task is spawned so bind
/// failures abort startup.
pub enum BoundListener {
    Tls(TlsListener),
    Plain(TcpListener),
}

impl BoundListener {
    pub async fn bind(name: &'static str, config: &ListenerConfig) -> anyhow::Result<Self> {
        let mode = TransportMode::resolve(name, config)?;
        let tcp = TcpListener::bind(config.bind)
            .await
            .with_context(|| format!("Failed to bind {name} listener on {}", config.bind))?;
        let listener = match mode {
            TransportMode::MutualTls(server_config) => {
                tracing::info!(listener = name, "Listening on https://{}", config.bind);
                BoundListener::Tls(TlsListener::new(tcp, server_config, name)?)
            }
            TransportMode::Unauthenticated => {
                tracing::info!(listener = name, "Listening on http://{}", config.bind);
                BoundListener::Plain(tcp)
            }
        };
        Ok(listener)
    }

    pub async fn serve(self, router: Router, shutdown: CancellationToken) -> anyhow::Result<()> {
        let app = router.into_make_service_with_connect_info::<PeerAddr>();
        let signal = async move { shutdown.cancelled().await };
        match self {
            BoundListener::Tls(listener) => {
                axum::serve(listener, app)
                    .with_graceful_shutdown(signal)
                    .await?
            }
            BoundListener::Plain(listener) => {
                axum::serve(listener, app)
                    .with_graceful_shutdown(signal)
                    .await?
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener(allow_unauthenticated: bool) -> ListenerConfig {
        ListenerConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            ca_cert: None,
            tls_cert: None,
            tls_key: None,
            allow_unauthenticated,
        }
    }

    fn temp_file(content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("fleetbeat-{}.pem", uuid::Uuid::new_v4()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_missing_credentials_without_opt_in() {
        let mut config = listener(false);
        config.ca_cert = Some(PathBuf::from("/etc/fleetbeat/ca.crt"));
        match TransportMode::resolve("legacy", &config) {
            Err(TransportError::MissingCredentials { listener, missing }) => {
                assert_eq!(listener, "legacy");
                assert_eq!(missing, "tls_cert, tls_key");
            }
            _ => panic!("expected missing credentials"),
        }
    }

    #[test]
    fn test_missing_credentials_with_opt_in() {
        assert!(matches!(
            TransportMode::resolve("legacy", &listener(true)),
            Ok(TransportMode::Unauthenticated)
        ));
    }

    #[test]
    fn test_unreadable_credentials_are_fatal() {
        let mut config = listener(true);
        config.ca_cert = Some(PathBuf::from("/nonexistent/ca.crt"));
        config.tls_cert = Some(PathBuf::from("/nonexistent/server.crt"));
        config.tls_key = Some(PathBuf::from("/nonexistent/server.key"));
        // the opt-in only covers missing inputs, not broken ones
        assert!(matches!(
            TransportMode::resolve("current", &config),
            Err(TransportError::Read { .. })
        ));
    }

    #[test]
    fn test_empty_certificate_file() {
        let path = temp_file("not a certificate\n");
        let mut config = listener(false);
        config.ca_cert = Some(path.clone());
        config.tls_cert = Some(path.clone());
        config.tls_key = Some(path.clone());
        let result = TransportMode::resolve("current", &config);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(TransportError::NoCertificate(_))));
    }

    #[tokio::test]
    async fn test_plain_listener_serves_until_shutdown() {
        let bound = BoundListener::bind("legacy", &listener(true)).await.unwrap();
        let BoundListener::Plain(tcp) = bound else {
            panic!("expected plain listener");
        };
        let addr = tcp.local_addr().unwrap();
        let router = Router::new().route("/ping", axum::routing::get(|| async { "pong" }));
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(BoundListener::Plain(tcp).serve(router, shutdown.clone()));

        let body = reqwest::get(format!("http://{addr}/ping"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "pong");

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }

    mod pki {
        use rcgen::{
            BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose,
            IsCa, KeyPair, KeyUsagePurpose, SanType,
        };
        use std::net::{IpAddr, Ipv4Addr};

        pub struct Issued {
            pub cert: Certificate,
            pub key: KeyPair,
        }

        impl Issued {
            /// key and certificate in one PEM bundle, as reqwest wants it
            pub fn identity_pem(&self) -> String {
                format!("{}{}", self.key.serialize_pem(), self.cert.pem())
            }
        }

        pub fn authority(name: &str) -> Issued {
            let key = KeyPair::generate().unwrap();
            let mut params = CertificateParams::default();
            params.distinguished_name.push(DnType::CommonName, name);
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::DigitalSignature,
            ];
            let cert = params.self_signed(&key).unwrap();
            Issued { cert, key }
        }

        pub fn leaf(name: &str, purpose: ExtendedKeyUsagePurpose, issuer: &Issued) -> Issued {
            let key = KeyPair::generate().unwrap();
            let mut params = CertificateParams::default();
            params.distinguished_name.push(DnType::CommonName, name);
            params.subject_alt_names = vec![SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST))];
            params.extended_key_usages = vec![purpose];
            let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();
            Issued { cert, key }
        }
    }

    fn device_client(ca: &pki::Issued, identity: Option<&pki::Issued>) -> reqwest::Client {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(std::time::Duration::from_secs(5))
            .add_root_certificate(reqwest::Certificate::from_pem(ca.cert.pem().as_bytes()).unwrap());
        if let Some(identity) = identity {
            builder = builder
                .identity(reqwest::Identity::from_pem(identity.identity_pem().as_bytes()).unwrap());
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_mutual_tls_requires_client_certificate_from_ca() {
        use rcgen::ExtendedKeyUsagePurpose::{ClientAuth, ServerAuth};

        let ca = pki::authority("fleetbeat device ca");
        let server = pki::leaf("fleetbeat", ServerAuth, &ca);
        let device = pki::leaf("0102030405060708", ClientAuth, &ca);
        let foreign_ca = pki::authority("someone else");
        let foreign_device = pki::leaf("0102030405060708", ClientAuth, &foreign_ca);

        let mut config = listener(false);
        config.ca_cert = Some(temp_file(&ca.cert.pem()));
        config.tls_cert = Some(temp_file(&server.cert.pem()));
        config.tls_key = Some(temp_file(&server.key.serialize_pem()));
        let bound = BoundListener::bind("current", &config).await.unwrap();
        for path in [&config.ca_cert, &config.tls_cert, &config.tls_key]
            .into_iter()
            .flatten()
        {
            std::fs::remove_file(path).ok();
        }
        let BoundListener::Tls(tls) = &bound else {
            panic!("expected mutual tls listener");
        };
        let addr = axum::serve::Listener::local_addr(tls).unwrap();
        let router = Router::new().route(
            "/api/health",
            axum::routing::get(
                |axum::extract::ConnectInfo(peer): axum::extract::ConnectInfo<PeerAddr>| async move {
                    peer.0.ip().to_string()
                },
            ),
        );
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(bound.serve(router, shutdown.clone()));
        let url = format!("https://{addr}/api/health");

        let res = device_client(&ca, Some(&device))
            .get(&url)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::OK);
        assert_eq!(res.text().await.unwrap(), "127.0.0.1");

        assert!(device_client(&ca, None).get(&url).send().await.is_err());
        assert!(
            device_client(&ca, Some(&foreign_device))
                .get(&url)
                .send()
                .await
                .is_err()
        );

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
