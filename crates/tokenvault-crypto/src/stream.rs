//! Segmented AES-256-GCM streaming encryption (`AES256_GCM_HKDF_4KB`)
//!
//! Encrypted file format (binary):
//! ```text
//! [4 bytes: magic "TVS1"][32 bytes: HKDF salt][7 bytes: nonce prefix]
//! [segment 0][segment 1]...[segment n]
//!
//! segment = AES-256-GCM(file_key, nonce, plaintext) = ciphertext || 16-byte tag
//! nonce   = nonce_prefix (7) || segment_index (4 bytes, big-endian) || last_flag (1)
//! AAD     = the 43-byte header
//! ```
//!
//! Every segment except the last carries exactly 4080 bytes of plaintext
//! (4096 bytes on disk). The last segment carries 0..=4080 bytes and is
//! encrypted with `last_flag = 1`, so truncating the stream at a segment
//! boundary, reordering segments, or appending data all fail verification.
//! The file key is derived per file from the master key, a random salt and
//! the file name, so a ciphertext renamed to another name does not decrypt.

use std::io::{self, Read, Write};

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::{derive_file_key, MasterKey};
use crate::TAG_SIZE;

/// On-disk size of a full segment
pub const SEGMENT_SIZE: usize = 4096;

/// Plaintext bytes carried by a full segment
pub const SEGMENT_PLAINTEXT_SIZE: usize = SEGMENT_SIZE - TAG_SIZE;

pub const STREAM_MAGIC: &[u8; 4] = b"TVS1";

const SALT_SIZE: usize = 32;
const NONCE_PREFIX_SIZE: usize = 7;
const GCM_NONCE_SIZE: usize = 12;

/// Size of the stream header
pub const HEADER_SIZE: usize = STREAM_MAGIC.len() + SALT_SIZE + NONCE_PREFIX_SIZE;

/// Total ciphertext size for a plaintext of `plaintext_len` bytes.
pub fn ciphertext_len(plaintext_len: u64) -> u64 {
    let full = SEGMENT_PLAINTEXT_SIZE as u64;
    let segments = plaintext_len.div_ceil(full).max(1);
    HEADER_SIZE as u64 + plaintext_len + segments * TAG_SIZE as u64
}

/// Per-stream AES-GCM context: file key, nonce prefix and header AAD.
struct SegmentCipher {
    cipher: Aes256Gcm,
    header: [u8; HEADER_SIZE],
}

impl SegmentCipher {
    fn new(
        master: &MasterKey,
        associated_data: &[u8],
        header: [u8; HEADER_SIZE],
    ) -> Result<Self, CryptoError> {
        let salt = &header[STREAM_MAGIC.len()..STREAM_MAGIC.len() + SALT_SIZE];
        let file_key = derive_file_key(master, salt, associated_data)?;
        let cipher = Aes256Gcm::new_from_slice(file_key.as_bytes())
            .map_err(|e| CryptoError::Cipher(format!("AES-256-GCM init: {e}")))?;
        Ok(Self { cipher, header })
    }

    fn nonce(&self, index: u32, last: bool) -> [u8; GCM_NONCE_SIZE] {
        let prefix = &self.header[HEADER_SIZE - NONCE_PREFIX_SIZE..];
        let mut nonce = [0u8; GCM_NONCE_SIZE];
        nonce[..NONCE_PREFIX_SIZE].copy_from_slice(prefix);
        nonce[NONCE_PREFIX_SIZE..GCM_NONCE_SIZE - 1].copy_from_slice(&index.to_be_bytes());
        nonce[GCM_NONCE_SIZE - 1] = u8::from(last);
        nonce
    }

    fn seal(&self, index: u32, last: bool, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.nonce(index, last);
        self.cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &self.header,
                },
            )
            .map_err(|e| CryptoError::Cipher(format!("segment {index} encryption failed: {e}")))
    }

    fn open(
        &self,
        index: u32,
        last: bool,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let nonce = self.nonce(index, last);
        self.cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad: &self.header,
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| {
                CryptoError::Authentication(format!(
                    "segment {index}: invalid key, tampered data, or truncated stream"
                ))
            })
    }
}

fn next_index(index: u32) -> Result<u32, CryptoError> {
    index
        .checked_add(1)
        .ok_or_else(|| CryptoError::Cipher("stream exceeds 2^32 segments".into()))
}

/// Encrypts everything written to it into `inner`.
///
/// The header is written on construction. [`EncryptingWriter::finish`] must
/// be called to emit the final segment; a writer dropped without finishing
/// leaves a stream that fails verification.
pub struct EncryptingWriter<W: Write> {
    inner: W,
    cipher: SegmentCipher,
    buffer: Zeroizing<Vec<u8>>,
    index: u32,
    plaintext_len: u64,
}

impl<W: Write> EncryptingWriter<W> {
    pub fn new(mut inner: W, master: &MasterKey, associated_data: &[u8]) -> Result<Self, CryptoError> {
        let mut header = [0u8; HEADER_SIZE];
        header[..STREAM_MAGIC.len()].copy_from_slice(STREAM_MAGIC);
        rand::thread_rng().fill_bytes(&mut header[STREAM_MAGIC.len()..]);

        let cipher = SegmentCipher::new(master, associated_data, header)?;
        inner.write_all(&header)?;

        Ok(Self {
            inner,
            cipher,
            buffer: Zeroizing::new(Vec::with_capacity(SEGMENT_PLAINTEXT_SIZE)),
            index: 0,
            plaintext_len: 0,
        })
    }

    /// Plaintext bytes accepted so far.
    pub fn plaintext_len(&self) -> u64 {
        self.plaintext_len
    }

    fn emit_segment(&mut self, last: bool) -> Result<(), CryptoError> {
        let sealed = self.cipher.seal(self.index, last, &self.buffer)?;
        self.inner.write_all(&sealed)?;
        self.buffer.clear();
        if !last {
            self.index = next_index(self.index)?;
        }
        Ok(())
    }

    /// Seal the final segment, flush, and hand back the inner writer.
    pub fn finish(mut self) -> Result<W, CryptoError> {
        self.emit_segment(true)?;
        self.inner.flush()?;
        tracing::trace!(
            segments = self.index + 1,
            bytes = self.plaintext_len,
            "stream encryption finished"
        );
        let Self { inner, .. } = self;
        Ok(inner)
    }
}

impl<W: Write> Write for EncryptingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        while !rest.is_empty() {
            // A full buffer is only sealed once more data arrives, so the
            // final segment is never empty unless the whole stream is.
            if self.buffer.len() == SEGMENT_PLAINTEXT_SIZE {
                self.emit_segment(false).map_err(into_io_error)?;
            }
            let take = (SEGMENT_PLAINTEXT_SIZE - self.buffer.len()).min(rest.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }
        self.plaintext_len += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypts and verifies a stream produced by [`EncryptingWriter`].
///
/// Plaintext is released one verified segment at a time. A caller that
/// needs all-or-nothing semantics must buffer until [`next_segment`]
/// returns `Ok(None)`.
///
/// [`next_segment`]: DecryptingReader::next_segment
pub struct DecryptingReader<R: Read> {
    inner: R,
    cipher: SegmentCipher,
    lookahead: Vec<u8>,
    index: u32,
    finished: bool,
    current: Zeroizing<Vec<u8>>,
    pos: usize,
}

impl<R: Read> DecryptingReader<R> {
    pub fn new(mut inner: R, master: &MasterKey, associated_data: &[u8]) -> Result<Self, CryptoError> {
        let mut header = [0u8; HEADER_SIZE];
        inner.read_exact(&mut header).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                CryptoError::Truncated("stream shorter than its header".into())
            }
            _ => CryptoError::Io(e),
        })?;
        if &header[..STREAM_MAGIC.len()] != STREAM_MAGIC {
            return Err(CryptoError::Malformed("bad stream magic".into()));
        }

        let cipher = SegmentCipher::new(master, associated_data, header)?;
        Ok(Self {
            inner,
            cipher,
            lookahead: Vec::with_capacity(SEGMENT_SIZE + 1),
            index: 0,
            finished: false,
            current: Zeroizing::new(Vec::new()),
            pos: 0,
        })
    }

    /// Read until the lookahead holds one byte past a full segment, or EOF.
    fn fill_lookahead(&mut self) -> io::Result<()> {
        let want = SEGMENT_SIZE + 1;
        while self.lookahead.len() < want {
            let start = self.lookahead.len();
            self.lookahead.resize(want, 0);
            match self.inner.read(&mut self.lookahead[start..]) {
                Ok(0) => {
                    self.lookahead.truncate(start);
                    break;
                }
                Ok(n) => self.lookahead.truncate(start + n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.lookahead.truncate(start);
                }
                Err(e) => {
                    self.lookahead.truncate(start);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Decrypt the next segment. `Ok(None)` once the final segment verified.
    pub fn next_segment(&mut self) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError> {
        if self.finished {
            return Ok(None);
        }
        self.fill_lookahead()?;

        let last = self.lookahead.len() <= SEGMENT_SIZE;
        if last && self.lookahead.len() < TAG_SIZE {
            return Err(CryptoError::Truncated(format!(
                "segment {} has {} bytes, shorter than a tag",
                self.index,
                self.lookahead.len()
            )));
        }

        let take = if last { self.lookahead.len() } else { SEGMENT_SIZE };
        let plaintext = self.cipher.open(self.index, last, &self.lookahead[..take])?;
        self.lookahead.drain(..take);

        if last {
            self.finished = true;
        } else {
            self.index = next_index(self.index)?;
        }
        Ok(Some(plaintext))
    }

    /// True once the final segment has been verified.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.current.len() {
            match self.next_segment().map_err(into_io_error)? {
                Some(segment) => {
                    self.current = segment;
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }
        let n = (self.current.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn into_io_error(e: CryptoError) -> io::Error {
    match e {
        CryptoError::Io(inner) => inner,
        other if other.is_integrity_failure() => io::Error::new(io::ErrorKind::InvalidData, other),
        other => io::Error::other(other),
    }
}

/// Encrypt an in-memory buffer into a complete stream.
pub fn encrypt_bytes(
    master: &MasterKey,
    associated_data: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let capacity = ciphertext_len(plaintext.len() as u64) as usize;
    let mut writer = EncryptingWriter::new(Vec::with_capacity(capacity), master, associated_data)?;
    writer.write_all(plaintext)?;
    writer.finish()
}

/// Decrypt a complete in-memory stream. Fails unless every segment verifies.
pub fn decrypt_bytes(
    master: &MasterKey,
    associated_data: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut reader = DecryptingReader::new(ciphertext, master, associated_data)?;
    let mut plaintext = Zeroizing::new(Vec::with_capacity(ciphertext.len()));
    while let Some(segment) = reader.next_segment()? {
        plaintext.extend_from_slice(&segment);
    }
    Ok(plaintext)
}
