//! TPM activation blob.
//!
//! The service wraps the device key in a credential activation structure:
//! five big-endian `u16` size-prefixed buffers (in order: credential blob,
//! encrypted secret, duplicate private area, encrypted wrap key, public
//! area) followed by a `u16` size-prefixed encrypted payload. Parsing walks
//! the input with a cursor and copies every section into its own buffer; the
//! input slice is never aliased.

use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    #[error("activation blob truncated in `{section}`: need {needed} bytes, {remaining} left")]
    Truncated {
        section: &'static str,
        needed: usize,
        remaining: usize,
    },
    #[error("activation blob has {0} trailing bytes")]
    TrailingBytes(usize),
    #[error("activation blob section `{0}` does not fit a u16 size prefix")]
    SectionTooLarge(&'static str),
}

/// Owned sections of a parsed activation blob.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ActivationBlob {
    pub credential_blob: Vec<u8>,
    pub encrypted_secret: Vec<u8>,
    pub duplicate_private: Vec<u8>,
    pub encrypted_wrap_key: Vec<u8>,
    pub public_area: Vec<u8>,
    pub encrypted_data: Vec<u8>,
}

impl std::fmt::Debug for ActivationBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationBlob")
            .field("credential_blob", &self.credential_blob.len())
            .field("encrypted_secret", &self.encrypted_secret.len())
            .field("duplicate_private", &self.duplicate_private.len())
            .field("encrypted_wrap_key", &self.encrypted_wrap_key.len())
            .field("public_area", &self.public_area.len())
            .field("encrypted_data", &self.encrypted_data.len())
            .finish()
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, section: &'static str, n: usize) -> Result<&'a [u8], BlobError> {
        if self.remaining() < n {
            return Err(BlobError::Truncated { section, needed: n, remaining: self.remaining() });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn sized(&mut self, section: &'static str) -> Result<Vec<u8>, BlobError> {
        let prefix = self.take(section, 2)?;
        let len = usize::from(u16::from_be_bytes([prefix[0], prefix[1]]));
        Ok(self.take(section, len)?.to_vec())
    }
}

impl ActivationBlob {
    /// Parse a complete blob; trailing bytes are rejected.
    ///
    /// # Errors
    /// [`BlobError::Truncated`] if a prefix or section runs past the input,
    /// [`BlobError::TrailingBytes`] if input remains after the payload.
    pub fn parse(input: &[u8]) -> Result<Self, BlobError> {
        let mut cur = Cursor::new(input);
        let blob = Self {
            credential_blob: cur.sized("credential_blob")?,
            encrypted_secret: cur.sized("encrypted_secret")?,
            duplicate_private: cur.sized("duplicate_private")?,
            encrypted_wrap_key: cur.sized("encrypted_wrap_key")?,
            public_area: cur.sized("public_area")?,
            encrypted_data: cur.sized("encrypted_data")?,
        };
        match cur.remaining() {
            0 => Ok(blob),
            n => Err(BlobError::TrailingBytes(n)),
        }
    }

    /// Serialize back to the wire layout.
    ///
    /// # Errors
    /// [`BlobError::SectionTooLarge`] if a section exceeds `u16::MAX` bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BlobError> {
        let sections: [(&'static str, &[u8]); 6] = [
            ("credential_blob", &self.credential_blob),
            ("encrypted_secret", &self.encrypted_secret),
            ("duplicate_private", &self.duplicate_private),
            ("encrypted_wrap_key", &self.encrypted_wrap_key),
            ("public_area", &self.public_area),
            ("encrypted_data", &self.encrypted_data),
        ];
        let mut out = Vec::with_capacity(sections.iter().map(|(_, s)| s.len() + 2).sum());
        for (name, section) in sections {
            let len = u16::try_from(section.len()).map_err(|_| BlobError::SectionTooLarge(name))?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(section);
        }
        Ok(out)
    }
}
