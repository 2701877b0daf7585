//
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//

//! # Composite-artifact wire protocols
//!
//! Canonical manifest types for signed composite-artifact containers. This
//! crate has minimal dependencies (no crypto, no filesystem) so it can sit
//! underneath anything that needs to read or write the wire format without
//! pulling in the full pipeline from `vault-core`.

pub mod error;
pub mod manifest;

pub use error::ManifestFormatError;
pub use manifest::{EntryRecord, Manifest, FORMAT_VERSION, HMAC_ALGORITHM};
