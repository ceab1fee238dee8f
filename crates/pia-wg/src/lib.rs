// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! WireGuard key material: Curve25519 key types and the on-disk per-region
//! key store.

pub mod keys;
pub mod store;

pub use keys::{KeyError, WgPrivateKey, WgPublicKey};
pub use store::{KeyStore, KeyStoreError};
