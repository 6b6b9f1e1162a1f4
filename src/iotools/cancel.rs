// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2021 Profian, Inc.

use std::io::{Error, ErrorKind, Read, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A flag shared between whoever wants to stop work and the work itself
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A reader that stops once its token is cancelled
///
/// The token is checked before every read. After cancellation every read
/// fails, so a caller blocked in `read_to_end()` unwinds at the next chunk.
#[derive(Debug)]
pub struct Cancellable<R: Read> {
    reader: R,
    token: CancelToken,
}

impl<R: Read> Cancellable<R> {
    pub fn new(reader: R, token: CancelToken) -> Self {
        Self { reader, token }
    }
}

impl<R: Read> Read for Cancellable<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.token.is_cancelled() {
            return Err(Error::new(ErrorKind::Other, "cancelled"));
        }

        self.reader.read(buf)
    }
}
