//! MQTT over TLS broker session
//!
//! Server certificates are NOT verified: any certificate the broker presents
//! is accepted, the same as the deployed firmware. The link is therefore open
//! to an active man-in-the-middle.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ClientError, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
    TlsConfiguration, Transport,
};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use thiserror::Error;
use tracing::{debug, warn};

use super::channel::Broker;
use super::Message;
use crate::BrokerConfig;

/// Requests the client may queue before the event loop drains them
const REQUEST_CAPACITY: usize = 10;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("broker request failed: {0}")]
    Request(#[from] ClientError),

    #[error("not connected to broker")]
    NotConnected,
}

pub struct MqttBroker {
    options: MqttOptions,
    session: Option<Session>,
}

struct Session {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttBroker {
    pub fn new(config: &BrokerConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if !config.username.is_empty() {
            options.set_credentials(&config.username, &config.password);
        }
        options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
            Arc::new(insecure_tls_config()),
        )));

        warn!(
            "TLS certificate verification is disabled for broker {}:{}",
            config.host, config.port
        );

        Self {
            options,
            session: None,
        }
    }
}

impl Broker for MqttBroker {
    type Error = BrokerError;

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Start a fresh client/event loop pair and wait for the CONNACK
    async fn connect(&mut self) -> Result<(), BrokerError> {
        self.session = None;
        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);

        loop {
            // Refused CONNACKs surface as errors from the event loop
            if let Event::Incoming(Packet::ConnAck(ack)) = eventloop.poll().await? {
                debug!("CONNACK received, session present: {}", ack.session_present);
                break;
            }
        }

        self.session = Some(Session { client, eventloop });
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        let client = match &self.session {
            Some(session) => session.client.clone(),
            None => return Err(BrokerError::NotConnected),
        };
        client.subscribe(topic, QoS::AtMostOnce).await?;
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<Message>, BrokerError> {
        let session = self.session.as_mut().ok_or(BrokerError::NotConnected)?;

        match session.eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => Ok(Some(Message {
                topic: publish.topic,
                payload: publish.payload,
            })),
            Ok(_) => Ok(None),
            Err(e) => {
                self.session = None;
                Err(e.into())
            }
        }
    }

    fn disconnect(&mut self) {
        self.session = None;
    }
}

fn insecure_tls_config() -> ClientConfig {
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
        .with_no_client_auth()
}

/// Certificate verifier that trusts every server
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
