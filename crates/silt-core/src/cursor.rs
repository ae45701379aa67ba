//! Lazy forward iteration over a stream of encoded pairs.

use std::io::{Read, Seek, SeekFrom};

use silt_common::types::Pair;

use crate::codec::PairCodec;
use crate::error::{Error, Result};

/// A forward iterator over an encoded byte stream.
///
/// The cursor borrows its codec and wraps the reader it is given; it decodes
/// one pair per [`Cursor::next`] call and remembers when the stream is
/// exhausted. Instantiated with a borrowed reader it owns nothing at all,
/// which is how segment lookups use it to scan a bounded window of a stream
/// they keep.
pub struct Cursor<'a, R> {
    data: R,
    codec: &'a dyn PairCodec,
    done: bool,
}

impl<'a, R: Read> Cursor<'a, R> {
    pub fn new(codec: &'a dyn PairCodec, data: R) -> Self {
        Self {
            data,
            codec,
            done: false,
        }
    }

    /// Returns `true` once the underlying stream has been read to its end.
    pub fn done(&self) -> bool {
        self.done
    }

    /// Decodes and returns the next pair.
    ///
    /// Returns [`Error::EndOfStream`] when no data remains; the cursor stays
    /// done and keeps returning it until [`Cursor::reset`].
    pub fn next(&mut self) -> Result<Pair> {
        if self.done {
            return Err(Error::EndOfStream);
        }

        match self.codec.decode(&mut self.data) {
            Err(Error::EndOfStream) => {
                self.done = true;
                Err(Error::EndOfStream)
            }
            other => other,
        }
    }

    /// Reads all remaining pairs.
    ///
    /// An empty vector means the stream was already at its end. Any decode
    /// failure other than the clean terminator is surfaced.
    pub fn read_to_end(&mut self) -> Result<Vec<Pair>> {
        let mut pairs = Vec::new();
        loop {
            match self.next() {
                Ok(pair) => pairs.push(pair),
                Err(Error::EndOfStream) => break,
                Err(e) => return Err(e),
            }
        }

        Ok(pairs)
    }
}

impl<'a, R: Read + Seek> Cursor<'a, R> {
    /// Seeks the underlying stream back to its start and clears `done`.
    pub fn reset(&mut self) -> Result<()> {
        self.data.seek(SeekFrom::Start(0))?;
        self.done = false;
        Ok(())
    }
}
