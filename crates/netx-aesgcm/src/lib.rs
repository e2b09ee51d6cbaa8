#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `netx-aesgcm` wraps a datagram [`Conn`] with AES-GCM authenticated
//! encryption. Each side generates a random write IV, exchanges it with the
//! peer during construction, then seals/opens every subsequent packet with
//! a nonce derived from that IV and a monotonically increasing sequence
//! number.
//!
//! # Design
//!
//! - Key length selects the cipher at runtime (128/192/256-bit AES), since
//!   `aes-gcm` types the cipher by key size at compile time; [`Cipher`]
//!   is a small enum over the three instantiations, mirroring how the
//!   teacher's bandwidth limiter (`crates/bandwidth`) picks one concrete
//!   strategy behind a uniform call surface.
//! - The handshake is two sequential steps (write own IV, read peer IV)
//!   inside one [`tokio::time::timeout`], not two truly concurrent tasks:
//!   [`Conn::read`]/[`Conn::write`] both require `&mut self`, so a single
//!   connection cannot be driven by two futures at once without an
//!   additional internal lock this wrapper does not need (see
//!   `SPEC_FULL.md` §9 Open Questions for the recorded decision).
//! - Every packet is `seq (8 bytes, big-endian, cleartext) || ciphertext`;
//!   the sequence is also the AEAD associated data, so tampering with it
//!   invalidates the tag even though it is not itself secret.
//!
//! # Invariants
//!
//! - A packet that fails authentication is discarded; [`Error::DecryptFailed`]
//!   never leaves the connection usable for a retried read of the same
//!   packet (there is nothing to retry — it is already gone).
//! - A decrypted plaintext larger than the caller's buffer is likewise
//!   discarded after decryption; [`Error::ShortBuffer`] documents this
//!   lossy behavior explicitly so callers do not assume a re-read is
//!   possible.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use aead::generic_array::typenum::U12;
use aead::generic_array::GenericArray;
use aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use async_trait::async_trait;
use rand::RngCore;

use netx_core::{Conn, Error, Result};

#[cfg(feature = "registry")]
mod registry;
#[cfg(feature = "registry")]
pub use registry::AesGcmDriver;

type Aes192Gcm = AesGcm<aes::Aes192, U12>;

const IV_LEN: usize = 12;
const SEQ_LEN: usize = 8;
const GCM_TAG_LEN: usize = 16;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for an [`AesGcmConn`].
#[derive(Clone, Copy, Debug)]
pub struct AesGcmConfig {
    max_packet: usize,
}

impl Default for AesGcmConfig {
    fn default() -> Self {
        Self { max_packet: 32 * 1024 }
    }
}

impl AesGcmConfig {
    /// Starts a builder with the default 32 KiB max plaintext packet size.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the largest plaintext payload a single packet may carry.
    pub fn with_max_packet(mut self, max_packet: usize) -> Self {
        self.max_packet = max_packet;
        self
    }

    fn scratch_capacity(self) -> usize {
        self.max_packet + SEQ_LEN + GCM_TAG_LEN
    }
}

enum Cipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl Cipher {
    fn from_key(key: &[u8]) -> Result<Self> {
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key)
                .map(Cipher::Aes128)
                .map_err(|_| Error::InvalidConfig("invalid 128-bit AES-GCM key".to_string())),
            24 => Aes192Gcm::new_from_slice(key)
                .map(Cipher::Aes192)
                .map_err(|_| Error::InvalidConfig("invalid 192-bit AES-GCM key".to_string())),
            32 => Aes256Gcm::new_from_slice(key)
                .map(Cipher::Aes256)
                .map_err(|_| Error::InvalidConfig("invalid 256-bit AES-GCM key".to_string())),
            other => Err(Error::InvalidConfig(format!(
                "AES-GCM key must be 16, 24, or 32 bytes, got {other}"
            ))),
        }
    }

    fn seal(&self, nonce: &GenericArray<u8, U12>, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload { msg: plaintext, aad };
        let result = match self {
            Cipher::Aes128(c) => c.encrypt(nonce, payload),
            Cipher::Aes192(c) => c.encrypt(nonce, payload),
            Cipher::Aes256(c) => c.encrypt(nonce, payload),
        };
        result.map_err(|_| Error::EncryptFailed)
    }

    fn open(&self, nonce: &GenericArray<u8, U12>, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload { msg: ciphertext, aad };
        let result = match self {
            Cipher::Aes128(c) => c.decrypt(nonce, payload),
            Cipher::Aes192(c) => c.decrypt(nonce, payload),
            Cipher::Aes256(c) => c.decrypt(nonce, payload),
        };
        result.map_err(|_| Error::DecryptFailed)
    }
}

fn derive_nonce(iv: &[u8; IV_LEN], seq: u64) -> GenericArray<u8, U12> {
    let mut nonce = *iv;
    let seq_bytes = seq.to_be_bytes();
    for i in 0..SEQ_LEN {
        nonce[4 + i] ^= seq_bytes[i];
    }
    GenericArray::clone_from_slice(&nonce)
}

/// A `Conn -> Conn` wrapper that AES-GCM-encrypts every packet.
pub struct AesGcmConn {
    inner: Box<dyn Conn>,
    cipher: Cipher,
    write_iv: [u8; IV_LEN],
    read_iv: [u8; IV_LEN],
    write_seq: AtomicU64,
    config: AesGcmConfig,
    read_scratch: Vec<u8>,
}

impl AesGcmConn {
    /// Performs the IV handshake over `inner` and returns the encrypted
    /// connection. `key` selects AES-128/192/256-GCM by its length (16, 24,
    /// or 32 bytes). Fails with [`Error::HandshakeTimedOut`] if the peer's
    /// IV does not arrive within 5 seconds.
    ///
    /// On failure, the untouched `inner` connection is handed back alongside
    /// the error (the same ownership-transfer-on-error shape
    /// [`netx_registry::Wrapper::apply`] uses) so the caller can close it.
    pub async fn handshake(
        mut inner: Box<dyn Conn>,
        key: &[u8],
        config: AesGcmConfig,
    ) -> std::result::Result<Self, (Error, Box<dyn Conn>)> {
        let cipher = match Cipher::from_key(key) {
            Ok(cipher) => cipher,
            Err(err) => return Err((err, inner)),
        };
        let mut write_iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut write_iv);

        let handshake_body = async {
            inner.write(&write_iv).await?;
            let mut read_iv = [0u8; IV_LEN];
            let mut filled = 0;
            while filled < IV_LEN {
                let n = inner.read(&mut read_iv[filled..]).await?;
                if n == 0 {
                    return Err(Error::Eof);
                }
                filled += n;
            }
            Ok(read_iv)
        };

        let read_iv = match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake_body).await {
            Ok(Ok(iv)) => iv,
            Ok(Err(err)) => return Err((err, inner)),
            Err(_) => return Err((Error::HandshakeTimedOut(HANDSHAKE_TIMEOUT), inner)),
        };

        let scratch_capacity = config.scratch_capacity();
        Ok(Self {
            inner,
            cipher,
            write_iv,
            read_iv,
            write_seq: AtomicU64::new(0),
            config,
            read_scratch: vec![0u8; scratch_capacity],
        })
    }
}

#[async_trait]
impl Conn for AesGcmConn {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.inner.read(&mut self.read_scratch).await?;
        if n == self.read_scratch.len() {
            return Err(Error::PacketTruncated {
                len: n,
                max: self.read_scratch.len(),
            });
        }
        let packet = &self.read_scratch[..n];
        if packet.len() < SEQ_LEN + GCM_TAG_LEN {
            return Err(Error::PacketTooSmall {
                len: packet.len(),
                min: SEQ_LEN + GCM_TAG_LEN,
            });
        }
        let (seq_bytes, ciphertext) = packet.split_at(SEQ_LEN);
        let seq = u64::from_be_bytes(seq_bytes.try_into().expect("split_at(SEQ_LEN) yields 8 bytes"));
        let nonce = derive_nonce(&self.read_iv, seq);
        let plaintext = self.cipher.open(&nonce, ciphertext, seq_bytes)?;

        if plaintext.len() > buf.len() {
            return Err(Error::ShortBuffer {
                needed: plaintext.len(),
                capacity: buf.len(),
            });
        }
        buf[..plaintext.len()].copy_from_slice(&plaintext);
        Ok(plaintext.len())
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.len() > self.config.max_packet {
            return Err(Error::PacketTooLarge {
                len: buf.len(),
                max: self.config.max_packet,
            });
        }
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let seq_bytes = seq.to_be_bytes();
        let nonce = derive_nonce(&self.write_iv, seq);
        let ciphertext = self.cipher.seal(&nonce, buf, &seq_bytes)?;

        let mut packet = Vec::with_capacity(SEQ_LEN + ciphertext.len());
        packet.extend_from_slice(&seq_bytes);
        packet.extend_from_slice(&ciphertext);
        self.inner.write(&packet).await?;
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr()
    }

    fn set_deadline(&mut self, when: Option<Instant>) {
        self.inner.set_deadline(when);
    }

    fn set_read_deadline(&mut self, when: Option<Instant>) {
        self.inner.set_read_deadline(when);
    }

    fn set_write_deadline(&mut self, when: Option<Instant>) {
        self.inner.set_write_deadline(when);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netx_core::test_support::PacketConn;

    const KEY_128: [u8; 16] = *b"0123456789abcdef";
    const KEY_256: [u8; 32] = *b"0123456789abcdef0123456789abcdef";

    #[tokio::test]
    async fn handshakes_and_round_trips_a_packet() {
        let (a, b) = PacketConn::pair(8);
        let (client_res, server_res) = tokio::join!(
            AesGcmConn::handshake(Box::new(a), &KEY_128, AesGcmConfig::new()),
            AesGcmConn::handshake(Box::new(b), &KEY_128, AesGcmConfig::new()),
        );
        let mut client = client_res.map_err(|(e, _)| e).unwrap();
        let mut server = server_res.map_err(|(e, _)| e).unwrap();

        client.write(b"hello").await.unwrap();
        let mut buf = [0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    /// Forwards everything to an inner `Conn`, flipping the last byte of
    /// every write after the first (the handshake's IV exchange) on its way
    /// out. Used to prove the AEAD tag catches on-the-wire tampering with
    /// actual data packets, not just a corrupted handshake.
    struct TamperLastByte(Box<dyn Conn>, std::sync::atomic::AtomicUsize);

    impl TamperLastByte {
        fn new(inner: Box<dyn Conn>) -> Self {
            Self(inner, std::sync::atomic::AtomicUsize::new(0))
        }
    }

    #[async_trait]
    impl Conn for TamperLastByte {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            self.0.read(buf).await
        }
        async fn write(&mut self, buf: &[u8]) -> Result<usize> {
            let call_index = self.1.fetch_add(1, Ordering::Relaxed);
            if call_index == 0 {
                return self.0.write(buf).await;
            }
            let mut tampered = buf.to_vec();
            if let Some(last) = tampered.last_mut() {
                *last ^= 0xFF;
            }
            self.0.write(&tampered).await
        }
        async fn close(&mut self) -> Result<()> {
            self.0.close().await
        }
        fn set_deadline(&mut self, when: Option<Instant>) {
            self.0.set_deadline(when);
        }
        fn set_read_deadline(&mut self, when: Option<Instant>) {
            self.0.set_read_deadline(when);
        }
        fn set_write_deadline(&mut self, when: Option<Instant>) {
            self.0.set_write_deadline(when);
        }
    }

    #[tokio::test]
    async fn rejects_tampered_ciphertext() {
        let (a, b) = PacketConn::pair(8);
        let (client_res, server_res) = tokio::join!(
            AesGcmConn::handshake(Box::new(TamperLastByte::new(Box::new(a))), &KEY_256, AesGcmConfig::new()),
            AesGcmConn::handshake(Box::new(b), &KEY_256, AesGcmConfig::new()),
        );
        let mut client = client_res.map_err(|(e, _)| e).unwrap();
        let mut server = server_res.map_err(|(e, _)| e).unwrap();

        client.write(b"hello").await.unwrap();
        let mut buf = [0u8; 64];
        let err = server.read(&mut buf).await.unwrap_err();
        assert!(matches!(err, Error::DecryptFailed));
    }

    #[tokio::test]
    async fn short_caller_buffer_discards_the_packet() {
        let (a, b) = PacketConn::pair(8);
        let (client_res, server_res) = tokio::join!(
            AesGcmConn::handshake(Box::new(a), &KEY_128, AesGcmConfig::new()),
            AesGcmConn::handshake(Box::new(b), &KEY_128, AesGcmConfig::new()),
        );
        let mut client = client_res.map_err(|(e, _)| e).unwrap();
        let mut server = server_res.map_err(|(e, _)| e).unwrap();

        client.write(b"0123456789").await.unwrap();
        let mut tiny = [0u8; 2];
        let err = server.read(&mut tiny).await.unwrap_err();
        assert!(matches!(err, Error::ShortBuffer { needed: 10, capacity: 2 }));
    }

    #[tokio::test]
    async fn read_at_the_exact_scratch_capacity_is_treated_as_truncation() {
        let (a, b) = PacketConn::pair(8);
        let config = AesGcmConfig::new().with_max_packet(4);
        let (client_res, server_res) = tokio::join!(
            AesGcmConn::handshake(Box::new(a), &KEY_128, config),
            AesGcmConn::handshake(Box::new(b), &KEY_128, config),
        );
        let mut client = client_res.map_err(|(e, _)| e).unwrap();
        let mut server = server_res.map_err(|(e, _)| e).unwrap();

        let scratch_len = client.read_scratch.len();
        server.inner.write(&vec![0xAB; scratch_len]).await.unwrap();

        let mut buf = [0u8; 64];
        let err = client.read(&mut buf).await.unwrap_err();
        assert!(matches!(err, Error::PacketTruncated { .. }));
    }

    #[test]
    fn rejects_wrong_length_key() {
        let err = Cipher::from_key(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
