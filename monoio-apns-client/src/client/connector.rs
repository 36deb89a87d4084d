use std::{io, net::ToSocketAddrs, path::Path, sync::Arc};

use monoio::{
    io::{AsyncReadRent, AsyncWriteRent, Split},
    net::TcpStream,
};
use monoio_apns::h2::ProtocolEngine;
use rustls::pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer, ServerName};
use service_async::Param;
use smol_str::SmolStr;

use super::{
    connection::{Connection, OnConnectionLost},
    key::Endpoint,
    pool::MakeConnection,
    ConnectionConfig,
};
use crate::Error;

pub type TlsStream = monoio_rustls::ClientTlsStream<TcpStream>;

// userId attribute, carries the bundle id in gateway-issued certificates.
const UID_OID: &str = "0.9.2342.19200300.100.1.1";

pub trait Connector<K> {
    type Connection;
    type Error;

    #[allow(async_fn_in_trait)]
    async fn connect(&self, key: K) -> Result<Self::Connection, Self::Error>;
}

#[derive(Default, Clone, Debug)]
pub struct TcpConnector;

impl<T> Connector<T> for TcpConnector
where
    T: ToSocketAddrs,
{
    type Connection = TcpStream;
    type Error = io::Error;

    async fn connect(&self, key: T) -> Result<Self::Connection, Self::Error> {
        TcpStream::connect(key).await
    }
}

/// Certificate chain and private key for mutual TLS with the gateway.
pub struct ClientCertificate {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl ClientCertificate {
    pub fn from_pem(cert: &[u8], key: &[u8]) -> crate::Result<Self> {
        let cert_chain = CertificateDer::pem_slice_iter(cert)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::Credential(e.to_string()))?;
        if cert_chain.is_empty() {
            return Err(Error::Credential("no certificate found".into()));
        }
        let key = PrivateKeyDer::from_pem_slice(key).map_err(|e| Error::Credential(e.to_string()))?;
        Ok(Self { cert_chain, key })
    }

    /// Load a PEM file holding both the certificate chain and the key.
    pub fn from_pem_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let pem = std::fs::read(path)?;
        Self::from_pem(&pem, &pem)
    }

    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }

    /// The subject UID of the leaf certificate, if it has one.
    pub fn topic(&self) -> crate::Result<Option<SmolStr>> {
        let Some(leaf) = self.cert_chain.first() else {
            return Ok(None);
        };
        let (_, cert) = x509_parser::parse_x509_certificate(leaf.as_ref())
            .map_err(|e| Error::Credential(e.to_string()))?;
        let topic = cert
            .subject()
            .iter_attributes()
            .find(|attr| attr.attr_type().to_id_string() == UID_OID)
            .and_then(|attr| attr.as_str().ok())
            .map(SmolStr::new);
        Ok(topic)
    }
}

impl std::fmt::Debug for ClientCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCertificate")
            .field("certificates", &self.cert_chain.len())
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct TlsConnector {
    tcp_connector: TcpConnector,
    tls_connector: monoio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Verifies the server against the webpki roots and offers `h2` only.
    pub fn new() -> crate::Result<Self> {
        let cfg = Self::config_builder()?.with_no_client_auth();
        Ok(Self::from_config(cfg))
    }

    pub fn with_client_auth(certificate: &ClientCertificate) -> crate::Result<Self> {
        let cfg = Self::config_builder()?.with_client_auth_cert(
            certificate.cert_chain.clone(),
            certificate.key.clone_key(),
        )?;
        Ok(Self::from_config(cfg))
    }

    fn config_builder(
    ) -> crate::Result<rustls::ConfigBuilder<rustls::ClientConfig, rustls::client::WantsClientCert>>
    {
        let root_store = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect(),
        };
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        Ok(rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_root_certificates(root_store))
    }

    fn from_config(mut cfg: rustls::ClientConfig) -> Self {
        cfg.alpn_protocols = vec![b"h2".to_vec()];
        Self {
            tcp_connector: TcpConnector,
            tls_connector: monoio_rustls::TlsConnector::from(Arc::new(cfg)),
        }
    }
}

impl<T> Connector<T> for TlsConnector
where
    T: ToSocketAddrs + Param<Option<ServerName<'static>>>,
{
    type Connection = TlsStream;
    type Error = crate::Error;

    async fn connect(&self, key: T) -> Result<Self::Connection, Self::Error> {
        let server_name = key.param().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "invalid server name")
        })?;
        let stream = self.tcp_connector.connect(key).await?;
        let tls_stream = self.tls_connector.connect(server_name, stream).await?;
        Ok(tls_stream)
    }
}

/// Opens transport connections to the endpoint and binds a fresh protocol
/// engine to each.
pub struct ApnsConnector<TC, F> {
    transport: TC,
    config: ConnectionConfig,
    new_engine: F,
}

impl<TC, F> ApnsConnector<TC, F> {
    pub fn new(transport: TC, config: ConnectionConfig, new_engine: F) -> Self {
        Self {
            transport,
            config,
            new_engine,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl<TC, F, E> MakeConnection for ApnsConnector<TC, F>
where
    TC: Connector<Endpoint>,
    TC::Connection: Split + AsyncReadRent + AsyncWriteRent + 'static,
    TC::Error: std::error::Error + Send + Sync + 'static,
    F: Fn() -> E,
    E: ProtocolEngine + 'static,
{
    type Engine = E;

    async fn make_connection(&self, on_lost: OnConnectionLost) -> crate::Result<Connection<E>> {
        let endpoint = self.config.endpoint.clone();
        #[cfg(feature = "logging")]
        tracing::debug!("connecting to {}", endpoint);
        let io = self
            .transport
            .connect(endpoint)
            .await
            .map_err(|e| Error::Connect(Box::new(e)))?;
        Ok(Connection::handshake(
            io,
            (self.new_engine)(),
            self.config.clone(),
            Some(on_lost),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{TEST_CERT, TEST_KEY};

    #[test]
    fn loads_certificate_and_key() {
        let certificate =
            ClientCertificate::from_pem(TEST_CERT.as_bytes(), TEST_KEY.as_bytes()).unwrap();
        assert_eq!(certificate.cert_chain().len(), 1);
        assert!(TlsConnector::with_client_auth(&certificate).is_ok());
    }

    #[test]
    fn topic_from_subject_uid() {
        let certificate =
            ClientCertificate::from_pem(TEST_CERT.as_bytes(), TEST_KEY.as_bytes()).unwrap();
        assert_eq!(certificate.topic().unwrap().as_deref(), Some("com.example.app"));
    }

    #[test]
    fn combined_pem_file() {
        let path = std::env::temp_dir().join(format!("apns-{}.pem", uuid::Uuid::new_v4()));
        std::fs::write(&path, format!("{TEST_CERT}{TEST_KEY}")).unwrap();
        let certificate = ClientCertificate::from_pem_file(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(certificate.unwrap().cert_chain().len(), 1);
    }

    #[test]
    fn missing_certificate_rejected() {
        assert!(matches!(
            ClientCertificate::from_pem(b"", TEST_KEY.as_bytes()),
            Err(Error::Credential(_))
        ));
        assert!(matches!(
            ClientCertificate::from_pem(TEST_CERT.as_bytes(), b"nothing here"),
            Err(Error::Credential(_))
        ));
    }

    #[test]
    fn plain_tls_connector() {
        assert!(TlsConnector::new().is_ok());
    }
}
