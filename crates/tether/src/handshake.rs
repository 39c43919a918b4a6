//! Key exchange over a fresh connection
//!
//! Both peers first send their public key. The initiator then wraps a new
//! session key with the responder's public key, signs the wrapped bytes and
//! sends both. Handshake messages travel unencrypted, serialized as
//! MessagePack, and always carry a length header so they stay whole when the
//! connection receives data in legacy mode.

use crate::{Result, Role, TetherError};
use tether_crypto::SecureChannel;
use tether_net::{ConnectionManager, Connector};
use tether_proto::HandshakeMessage;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Run the key exchange on an established connection
///
/// On success `crypto` is ready for `seal` and `open`. The key size announced
/// by the peer must match the local one, since it fixes the signature length
/// both sides split messages on.
pub async fn perform_handshake<C: Connector>(
    conn: &mut ConnectionManager<C>,
    crypto: &mut SecureChannel,
    role: Role,
) -> Result<()> {
    debug!("Starting handshake as {:?}", role);

    let pem = crypto.export_local_public_key()?;
    send_message(conn, &HandshakeMessage::public_key(crypto.key_bits(), pem)).await?;

    match receive_message(conn).await? {
        HandshakeMessage::PublicKey { key_bits, pem } => {
            if key_bits != crypto.key_bits() {
                return Err(TetherError::Handshake(format!(
                    "peer uses {}-bit keys, expected {}",
                    key_bits,
                    crypto.key_bits()
                )));
            }
            crypto
                .set_foreign_key(&pem)
                .map_err(|e| TetherError::Handshake(format!("peer public key rejected: {}", e)))?;
        }
        other => return Err(unexpected("PublicKey", &other)),
    }

    match role {
        Role::Initiator => {
            let key = SecureChannel::generate_session_key();
            let wrapped = crypto.encrypt_for_foreign(key.as_bytes())?;
            let signature = crypto.sign(&wrapped)?;
            send_message(conn, &HandshakeMessage::session_key(wrapped, signature)).await?;
            crypto.set_session_key(key.as_bytes())?;
        }
        Role::Responder => match receive_message(conn).await? {
            HandshakeMessage::SessionKey { wrapped, signature } => {
                if !crypto.verify(&wrapped, &signature)? {
                    return Err(TetherError::Handshake(
                        "session key signature is invalid".to_string(),
                    ));
                }
                let key = Zeroizing::new(
                    crypto
                        .decrypt_local(&wrapped)
                        .map_err(|e| TetherError::Handshake(format!("cannot unwrap session key: {}", e)))?,
                );
                crypto
                    .set_session_key(&key)
                    .map_err(|e| TetherError::Handshake(format!("session key rejected: {}", e)))?;
            }
            other => return Err(unexpected("SessionKey", &other)),
        },
    }

    info!("Handshake complete as {:?}", role);
    Ok(())
}

async fn send_message<C: Connector>(
    conn: &mut ConnectionManager<C>,
    message: &HandshakeMessage,
) -> Result<()> {
    debug!("Sending handshake {}", message.kind());
    conn.send_framed(&message.to_msgpack()?).await?;
    Ok(())
}

async fn receive_message<C: Connector>(conn: &mut ConnectionManager<C>) -> Result<HandshakeMessage> {
    let bytes = conn.receive_framed().await?;
    let message = HandshakeMessage::from_msgpack(&bytes)
        .map_err(|e| TetherError::Handshake(format!("malformed handshake message: {}", e)))?;
    debug!("Received handshake {}", message.kind());
    Ok(message)
}

fn unexpected(expected: &str, got: &HandshakeMessage) -> TetherError {
    TetherError::Handshake(format!("expected {}, got {}", expected, got.kind()))
}
