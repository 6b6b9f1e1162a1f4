// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2021 Profian, Inc.

use std::io::{Error, ErrorKind, Read, Result};

/// A reader that checks its length on end-of-file
///
/// The number of bytes read is compared against the length that was
/// promised up front. Reading past that length, or hitting end-of-file
/// before it, returns `ErrorKind::InvalidData`.
#[derive(Debug)]
pub struct Checked<R: Read> {
    reader: R,
    expected: u64,
    seen: u64,
}

impl<R: Read> Checked<R> {
    pub fn new(reader: R, expected: u64) -> Self {
        Self {
            reader,
            expected,
            seen: 0,
        }
    }
}

impl<R: Read> Read for Checked<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let size = self.reader.read(buf)?;
        self.seen += size as u64;

        let short = size == 0 && !buf.is_empty() && self.seen < self.expected;
        if short || self.seen > self.expected {
            let msg = format!("expected {} bytes, read {}", self.expected, self.seen);
            return Err(Error::new(ErrorKind::InvalidData, msg));
        }

        Ok(size)
    }
}
