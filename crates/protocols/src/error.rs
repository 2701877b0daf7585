//
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//

use thiserror::Error;

/// Errors related to manifest wire-format validation.
#[derive(Error, Debug)]
pub enum ManifestFormatError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid field value: {0}")]
    InvalidField(String),
}
