use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use clap::Parser;
use receiver::collaborators::{
    InMemoryBlockedStore, InMemoryGroupStore, SessionCipher, SessionCipherError, SessionCipherStore,
    SignalingKeyCipher, SignalingKeyError,
};
use receiver::attachments::HttpAttachmentTransport;
use receiver::events::{MpscEventSink, ReceiverEvent};
use receiver::{ReceiverConfig, ReceiverCore};
use relay_wire::Address;

#[derive(Parser, Debug)]
#[command(name = "receiver", about = "Secure message receiver")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "receiver.toml")]
    config: PathBuf,
}

/// No ratchet is vendored here (spec §1: the double-ratchet primitive is
/// out of scope). An embedder wiring this crate into a real client
/// supplies its own [`SessionCipherStore`]; this placeholder lets the CLI
/// binary run end to end and surface the gap as decrypt errors rather
/// than refusing to start.
struct UnconfiguredSessionCipherStore;

struct UnconfiguredSessionCipher;

impl SessionCipher for UnconfiguredSessionCipher {
    fn decrypt_whisper_message<'a>(
        &'a self,
        _ciphertext: &'a [u8],
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<u8>, SessionCipherError>> + Send + 'a>> {
        Box::pin(async { Err(SessionCipherError::Other("no session cipher configured".into())) })
    }

    fn decrypt_prekey_whisper_message<'a>(
        &'a self,
        _ciphertext: &'a [u8],
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<u8>, SessionCipherError>> + Send + 'a>> {
        Box::pin(async { Err(SessionCipherError::Other("no session cipher configured".into())) })
    }

    fn close_session<'a>(
        &'a self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), SessionCipherError>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }
}

impl SessionCipherStore for UnconfiguredSessionCipherStore {
    fn cipher_for(&self, _address: &Address) -> Arc<dyn SessionCipher> {
        Arc::new(UnconfiguredSessionCipher)
    }

    fn device_ids_for(&self, _number: &str) -> Vec<u32> {
        vec![]
    }
}

struct UnconfiguredSignalingKeyCipher;

impl SignalingKeyCipher for UnconfiguredSignalingKeyCipher {
    fn decrypt(&self, _body: &[u8]) -> Result<Vec<u8>, SignalingKeyError> {
        Err(SignalingKeyError::Invalid("no signaling key configured".into()))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = ReceiverConfig::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("FATAL: failed to load config from {}: {e}", cli.config.display());
        std::process::exit(1);
    });

    tracing::warn!("running with no session cipher or signaling key configured; all messages will fail to decrypt");

    let (sink, mut events) = MpscEventSink::new();
    let http = reqwest::Client::new();
    let attachment_base_url = receiver::http_base_url(&config.relay_url);
    let core = Arc::new(ReceiverCore {
        attachment_transport: Arc::new(HttpAttachmentTransport::new(
            http.clone(),
            attachment_base_url,
            config.username.clone(),
            config.password.clone(),
        )),
        attachment_cipher: Arc::new(NoopAttachmentCipher),
        groups: Arc::new(InMemoryGroupStore::new()),
        blocked: Arc::new(InMemoryBlockedStore::new()),
        sessions: Arc::new(UnconfiguredSessionCipherStore),
        signaling_key: Arc::new(UnconfiguredSignalingKeyCipher),
        events: Arc::new(sink),
        config,
        http,
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let event_logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let ReceiverEvent::Error(e) = event {
                tracing::error!(error = %e, "receive pipeline error");
            } else {
                tracing::info!(?event, "receiver event");
            }
        }
    });

    tokio::select! {
        _ = core.run(shutdown_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    }

    event_logger.abort();
}

struct NoopAttachmentCipher;
impl receiver::attachments::AttachmentCipher for NoopAttachmentCipher {
    fn decrypt(&self, _ciphertext: &[u8], _key: &[u8]) -> Result<Vec<u8>, receiver::attachments::AttachmentError> {
        Err(receiver::attachments::AttachmentError::Decrypt(
            "no attachment cipher configured".into(),
        ))
    }
}
