use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use aes::Aes128;
use cipher::{KeyIvInit, StreamCipher};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

type Enc = cfb_mode::Encryptor<Aes128>;
type Dec = cfb_mode::Decryptor<Aes128>;

/// A long-lived AES-128-CFB encryptor. The mask protocol requires the same
/// stream to keep running from the header fields into the forward payload,
/// so this is held across multiple `encrypt_in_place` calls rather than
/// reconstructed per call (see SPEC_FULL.md §9 "Cryption + state").
pub struct CfbEncryptor(Enc);

impl CfbEncryptor {
    pub fn new(key: &[u8; 16], iv: &[u8; 16]) -> Self {
        Self(Enc::new_from_slices(key, iv).expect("key/iv are exactly 16 bytes"))
    }

    pub fn encrypt_in_place(&mut self, buf: &mut [u8]) {
        self.0.apply_keystream(buf);
    }
}

pub struct CfbDecryptor(Dec);

impl CfbDecryptor {
    pub fn new(key: &[u8; 16], iv: &[u8; 16]) -> Self {
        Self(Dec::new_from_slices(key, iv).expect("key/iv are exactly 16 bytes"))
    }

    pub fn decrypt_in_place(&mut self, buf: &mut [u8]) {
        self.0.apply_keystream(buf);
    }
}

/// Wraps a reader so every byte that comes off it is transparently
/// decrypted in place with a long-lived CFB stream -- the adapter form of
/// the reference implementation's `AESDecryptReader` (`cryption/aes.go`),
/// letting the relay engine's generic `pump_input` consume mask payload
/// without knowing cryption is involved.
pub struct DecryptingReader<R> {
    inner: R,
    dec: CfbDecryptor,
}

impl<R> DecryptingReader<R> {
    pub fn new(inner: R, dec: CfbDecryptor) -> Self {
        Self { inner, dec }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DecryptingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if poll.is_ready() {
            if let Poll::Ready(Ok(())) = &poll {
                this.dec.decrypt_in_place(&mut buf.filled_mut()[before..]);
            }
        }
        poll
    }
}

/// Wraps a writer, encrypting each chunk with a long-lived CFB stream before
/// it reaches the transport -- the adapter form of `AESEncryptWriter`
/// (`cryption/aes.go`). Buffers the fully-encrypted chunk internally so a
/// short underlying write never needs to re-derive keystream for bytes
/// already consumed from it: the cipher only ever advances over bytes that
/// have actually left this adapter.
pub struct EncryptingWriter<W> {
    inner: W,
    enc: CfbEncryptor,
    pending: Vec<u8>,
    written: usize,
}

impl<W> EncryptingWriter<W> {
    pub fn new(inner: W, enc: CfbEncryptor) -> Self {
        Self { inner, enc, pending: Vec::new(), written: 0 }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for EncryptingWriter<W> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.written >= this.pending.len() {
            this.pending.clear();
            this.pending.extend_from_slice(buf);
            this.enc.encrypt_in_place(&mut this.pending);
            this.written = 0;
        }
        while this.written < this.pending.len() {
            match Pin::new(&mut this.inner).poll_write(cx, &this.pending[this.written..]) {
                Poll::Ready(Ok(0)) => {
                    return Poll::Ready(Err(io::Error::new(io::ErrorKind::WriteZero, "write returned zero")))
                }
                Poll::Ready(Ok(n)) => this.written += n,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = [7u8; 16];
        let iv = [9u8; 16];
        let mut enc = CfbEncryptor::new(&key, &iv);
        let mut dec = CfbDecryptor::new(&key, &iv);

        let plaintext = b"hello mask protocol payload".to_vec();
        let mut buf = plaintext.clone();
        enc.encrypt_in_place(&mut buf);
        assert_ne!(buf, plaintext);
        dec.decrypt_in_place(&mut buf);
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn stream_continues_across_calls() {
        let key = [1u8; 16];
        let iv = [2u8; 16];
        let mut enc = CfbEncryptor::new(&key, &iv);
        let mut dec = CfbDecryptor::new(&key, &iv);

        let mut a = b"first chunk".to_vec();
        let mut b = b"second chunk".to_vec();
        let orig_a = a.clone();
        let orig_b = b.clone();

        enc.encrypt_in_place(&mut a);
        enc.encrypt_in_place(&mut b);
        dec.decrypt_in_place(&mut a);
        dec.decrypt_in_place(&mut b);

        assert_eq!(a, orig_a);
        assert_eq!(b, orig_b);
    }

    #[tokio::test]
    async fn decrypting_reader_round_trips_through_plain_pipe() {
        use tokio::io::AsyncReadExt;

        let key = [5u8; 16];
        let iv = [6u8; 16];
        let plaintext = b"forward payload continuing the header stream".to_vec();
        let mut ciphertext = plaintext.clone();
        CfbEncryptor::new(&key, &iv).encrypt_in_place(&mut ciphertext);

        let cursor = std::io::Cursor::new(ciphertext);
        let mut reader = DecryptingReader::new(cursor, CfbDecryptor::new(&key, &iv));

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, plaintext);
    }

    #[tokio::test]
    async fn encrypting_writer_round_trips_through_plain_pipe() {
        use tokio::io::AsyncWriteExt;

        let key = [11u8; 16];
        let iv = [12u8; 16];
        let (mut client, server) = tokio::io::duplex(4096);

        let mut writer = EncryptingWriter::new(server, CfbEncryptor::new(&key, &iv));
        writer.write_all(b"first chunk").await.unwrap();
        writer.write_all(b"second chunk").await.unwrap();
        writer.shutdown().await.unwrap();
        drop(writer);

        let mut ciphertext = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut ciphertext).await.unwrap();

        let mut dec = CfbDecryptor::new(&key, &iv);
        dec.decrypt_in_place(&mut ciphertext);
        assert_eq!(ciphertext, b"first chunksecond chunk");
    }
}
