//
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//

//! `VerifiableStream` — a byte sink/source that accumulates a keyed hash
//! (BLAKE3 in keyed mode) over everything written, and refuses to be read
//! until that hash has been finalized into a tag.

use crate::error::StateError;
use subtle::ConstantTimeEq;

/// 32-byte BLAKE3-keyed tag, hex-encodable for manifest storage.
pub type Tag = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Finalized,
}

/// A single-writer-then-single-reader buffer with an authenticated tag.
///
/// `OPEN` accepts writes and rejects reads; `FINALIZED` accepts reads (from
/// offset 0, replayable) and rejects writes. The transition is one-way.
pub struct VerifiableStream {
    state: State,
    buf: Vec<u8>,
    hasher: blake3::Hasher,
    tag: Option<Tag>,
    cursor: usize,
}

impl VerifiableStream {
    /// Construct an empty stream keyed by `key`. The key is expected to be a
    /// fresh per-save random value; see `crate::save`.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            state: State::Open,
            buf: Vec::new(),
            hasher: blake3::Hasher::new_keyed(key),
            tag: None,
            cursor: 0,
        }
    }

    /// Append bytes to the backing buffer and the running MAC.
    ///
    /// Zero-length writes are legal and a no-op on the hash state.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), StateError> {
        if self.state == State::Finalized {
            return Err(StateError::WriteAfterFinalize);
        }
        self.buf.extend_from_slice(bytes);
        self.hasher.update(bytes);
        Ok(())
    }

    /// Transition `OPEN -> FINALIZED` and return the tag. Idempotent: calling
    /// this again after finalization returns the same tag without touching
    /// state.
    pub fn finalize(&mut self) -> Tag {
        if let Some(tag) = self.tag {
            return tag;
        }
        let tag: Tag = *self.hasher.finalize().as_bytes();
        self.tag = Some(tag);
        self.state = State::Finalized;
        tag
    }

    /// Read up to `n` bytes from the current cursor position. Only valid
    /// once finalized. Reading past the end yields fewer bytes, not an
    /// error — end-of-stream is a length, not a failure.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>, StateError> {
        if self.state != State::Finalized {
            return Err(StateError::ReadBeforeFinalize);
        }
        let end = (self.cursor + n).min(self.buf.len());
        let chunk = self.buf[self.cursor..end].to_vec();
        self.cursor = end;
        Ok(chunk)
    }

    /// Read the entire buffer from offset 0, without disturbing the cursor
    /// used by `read`.
    pub fn read_all(&self) -> Result<Vec<u8>, StateError> {
        if self.state != State::Finalized {
            return Err(StateError::ReadBeforeFinalize);
        }
        Ok(self.buf.clone())
    }

    /// Rewind the read cursor to the start; finalized streams are fully
    /// replayable.
    pub fn rewind(&mut self) -> Result<(), StateError> {
        if self.state != State::Finalized {
            return Err(StateError::ReadBeforeFinalize);
        }
        self.cursor = 0;
        Ok(())
    }

    /// Constant-time comparison against an expected tag. Only valid once
    /// finalized, since there is no tag to compare before then.
    pub fn verify_against(&self, expected: &Tag) -> Result<bool, StateError> {
        let tag = match self.tag {
            Some(tag) => tag,
            None => return Err(StateError::ReadBeforeFinalize),
        };
        Ok(bool::from(tag.ct_eq(expected)))
    }

    pub fn is_finalized(&self) -> bool {
        self.state == State::Finalized
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];

    #[test]
    fn write_then_read_round_trips() {
        let mut s = VerifiableStream::new(&KEY);
        s.write(b"hello ").unwrap();
        s.write(b"world").unwrap();
        let tag = s.finalize();
        assert_eq!(s.read_all().unwrap(), b"hello world");
        assert!(s.verify_against(&tag).unwrap());
    }

    #[test]
    fn write_after_finalize_fails() {
        let mut s = VerifiableStream::new(&KEY);
        s.write(b"x").unwrap();
        s.finalize();
        assert_eq!(s.write(b"y"), Err(StateError::WriteAfterFinalize));
    }

    #[test]
    fn read_before_finalize_fails() {
        let mut s = VerifiableStream::new(&KEY);
        s.write(b"x").unwrap();
        assert_eq!(s.read(1), Err(StateError::ReadBeforeFinalize));
        assert_eq!(s.read_all(), Err(StateError::ReadBeforeFinalize));
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut s = VerifiableStream::new(&KEY);
        s.write(b"payload").unwrap();
        let a = s.finalize();
        let b = s.finalize();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_write_has_well_defined_tag() {
        let mut s = VerifiableStream::new(&KEY);
        let tag = s.finalize();
        assert!(s.is_empty());
        assert!(s.verify_against(&tag).unwrap());
    }

    #[test]
    fn read_past_end_is_not_an_error() {
        let mut s = VerifiableStream::new(&KEY);
        s.write(b"ab").unwrap();
        s.finalize();
        assert_eq!(s.read(2).unwrap(), b"ab");
        assert_eq!(s.read(10).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn different_keys_yield_different_tags() {
        let mut a = VerifiableStream::new(&[1u8; 32]);
        let mut b = VerifiableStream::new(&[2u8; 32]);
        a.write(b"same bytes").unwrap();
        b.write(b"same bytes").unwrap();
        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn tampered_bytes_fail_verification() {
        let mut s = VerifiableStream::new(&KEY);
        s.write(b"original").unwrap();
        let tag = s.finalize();

        let mut tampered = VerifiableStream::new(&KEY);
        tampered.write(b"original!").unwrap();
        let tampered_tag = tampered.finalize();

        assert!(!tampered.verify_against(&tag).unwrap());
        assert_ne!(tag, tampered_tag);
    }
}
