// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2021 Profian, Inc.

//! The client side of the deployment service

mod deployments;
mod diagnostic;
mod transport;

pub use self::deployments::{Deployments, IdempotencyKey};
