// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2021 Profian, Inc.

//! Utility types for dealing with readers

mod cancel;
mod checked;

pub use cancel::{CancelToken, Cancellable};
pub use checked::Checked;
