//! The tunnel itself.
//!
//! Both ends write a handshake frame carrying a fresh IV and a checksum over
//! that IV and the shared secret, then verify the frame the other end sent. Bytes that
//! arrive behind the peer's frame are the first ciphertext and are kept.
//! After that every write is encrypted at this side's running offset and
//! every read decrypted at the peer's.

use super::DEFAULT_HANDSHAKE_TIMEOUT;
use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::packet::Address;
use crate::stream::Stream;
use async_trait::async_trait;
use flex_crypto::{
    CryptoError, HANDSHAKE_FRAME_SIZE, HandshakeFrame, IV_SIZE, OffsetCipher, derive_stream_key,
    verify_frame,
};
use std::collections::VecDeque;
use std::time::Duration;

/// An encrypted tunnel over an established channel.
///
/// Writes are encrypted with this side's IV and reads decrypted with the
/// peer's, each direction keeping its own byte offset.
#[derive(Debug)]
pub struct SecretStream<C: Channel = Stream> {
    inner: C,
    encoder: OffsetCipher,
    decoder: OffsetCipher,
    buffered: VecDeque<Vec<u8>>,
}

impl<C: Channel> SecretStream<C> {
    /// Run the tunnel handshake over `inner` with the default timeout.
    ///
    /// # Errors
    ///
    /// See [`handshake_with_timeout`](Self::handshake_with_timeout).
    pub async fn handshake(inner: C, secret: &[u8]) -> Result<Self> {
        Self::handshake_with_timeout(inner, secret, DEFAULT_HANDSHAKE_TIMEOUT).await
    }

    /// Run the tunnel handshake over `inner`.
    ///
    /// The inner channel is closed if the handshake fails.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHandshake`] if the peer's frame is malformed or was
    ///   built with a different secret
    /// - [`Error::HandshakeTimeout`] if the peer's frame does not arrive in time
    /// - [`Error::StreamClosed`] if the channel closes first
    pub async fn handshake_with_timeout(mut inner: C, secret: &[u8], timeout: Duration) -> Result<Self> {
        let result = match tokio::time::timeout(timeout, exchange(&mut inner, secret)).await {
            Ok(result) => result,
            Err(_) => Err(Error::HandshakeTimeout),
        };

        match result {
            Ok((local_iv, remote_iv, leftover)) => {
                let key = derive_stream_key(secret)?;
                let mut tunnel = Self {
                    inner,
                    encoder: OffsetCipher::new(&key, local_iv),
                    decoder: OffsetCipher::new(&key, remote_iv),
                    buffered: VecDeque::new(),
                };
                if !leftover.is_empty() {
                    let plain = tunnel.decoder.apply(&leftover);
                    tunnel.buffered.push_back(plain);
                }
                tracing::debug!("secret tunnel to {} established", tunnel.inner.remote_domain());
                Ok(tunnel)
            }
            Err(e) => {
                tracing::debug!("secret handshake with {} failed: {}", inner.remote_domain(), e);
                let _ = inner.close().await;
                Err(e)
            }
        }
    }

    /// The wrapped channel
    pub fn get_ref(&self) -> &C {
        &self.inner
    }

    /// Unwrap the channel. Any further traffic on it is ciphertext.
    pub fn into_inner(self) -> C {
        self.inner
    }

    /// Encrypt and send `data`.
    ///
    /// # Errors
    ///
    /// Propagates the inner channel's write error.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let sealed = self.encoder.apply(data);
        self.inner.write(&sealed).await
    }

    /// Next decrypted chunk, or `None` once the inner channel closed.
    pub async fn read(&mut self) -> Option<Vec<u8>> {
        if let Some(chunk) = self.buffered.pop_front() {
            return Some(chunk);
        }
        let sealed = self.inner.read().await?;
        Some(self.decoder.apply(&sealed))
    }

    /// Close the inner channel.
    ///
    /// # Errors
    ///
    /// Propagates the inner channel's close error.
    pub async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

/// Send our frame and collect the peer's.
///
/// Returns both IVs and whatever arrived after the peer's frame.
async fn exchange<C: Channel>(inner: &mut C, secret: &[u8]) -> Result<([u8; IV_SIZE], [u8; IV_SIZE], Vec<u8>)> {
    let local = HandshakeFrame::generate(secret)?;
    inner.write(&local.to_bytes()).await?;

    let mut buf = Vec::with_capacity(HANDSHAKE_FRAME_SIZE);
    while buf.len() < HANDSHAKE_FRAME_SIZE {
        match inner.read().await {
            Some(chunk) => buf.extend_from_slice(&chunk),
            None => return Err(Error::StreamClosed),
        }
    }

    let remote_iv = verify_frame(&buf, secret).map_err(rejection)?;
    let leftover = buf.split_off(HANDSHAKE_FRAME_SIZE);
    Ok((local.iv, remote_iv, leftover))
}

fn rejection(err: CryptoError) -> Error {
    if err.is_handshake_rejection() {
        Error::InvalidHandshake(err.to_string().into())
    } else {
        Error::Crypto(err)
    }
}

#[async_trait]
impl<C: Channel> Channel for SecretStream<C> {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        SecretStream::write(self, data).await
    }

    async fn read(&mut self) -> Option<Vec<u8>> {
        SecretStream::read(self).await
    }

    async fn close(&mut self) -> Result<()> {
        SecretStream::close(self).await
    }

    fn local_addr(&self) -> Address {
        self.inner.local_addr()
    }

    fn remote_addr(&self) -> Address {
        self.inner.remote_addr()
    }

    fn remote_domain(&self) -> &str {
        self.inner.remote_domain()
    }
}
