// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Content digests for definitions
//!
//! Uses BLAKE3 over the canonical JSON form of a definition. The digest is
//! provenance information only: registry identity is `name@version`.

use blake3::Hasher;

use super::WorkflowDefinition;
use crate::errors::PipeforgeError;

/// Content hasher for definition digests
pub struct ContentHasher {
    hasher: Hasher,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    /// Hash a definition's identity and contents
    pub fn hash_definition(
        &mut self,
        definition: &WorkflowDefinition,
    ) -> Result<&mut Self, PipeforgeError> {
        self.hasher.update(definition.name.as_bytes());
        self.hasher.update(b"@");
        self.hasher.update(definition.version.as_bytes());

        let canonical = serde_json::to_vec(definition)?;
        self.hasher.update(&canonical);

        Ok(self)
    }

    /// Hash arbitrary bytes
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Finalize and get the hex digest
    pub fn finalize(&self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Digest of a definition
pub fn definition_digest(definition: &WorkflowDefinition) -> Result<String, PipeforgeError> {
    Ok(ContentHasher::new().hash_definition(definition)?.finalize())
}

/// First 12 hex characters of a digest, for display
pub fn short_digest(digest: &str) -> &str {
    &digest[..digest.len().min(12)]
}
