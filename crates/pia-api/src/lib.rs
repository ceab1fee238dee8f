// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTPS client for the PIA API: token issuance, region listing, and
//! WireGuard key registration.

pub mod client;
pub mod error;
pub mod types;

pub use client::PiaClient;
pub use error::ApiError;
pub use types::{AccountPassword, AuthToken, ConnectionDetails, RegionDescriptor, RegionId};
