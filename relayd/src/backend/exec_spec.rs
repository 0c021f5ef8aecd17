// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::BackendError;

/// Payload understood by the CLI engine backend.
///
/// ```json
/// {"image": "docker.io/library/alpine:latest", "command": ["echo", "hi"], "env": {"A": "1"}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSpec {
    /// Falls back to the configured default image when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Fed to the container's stdin (base64 on the wire).
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "crate::serde_base64"
    )]
    pub stdin: Vec<u8>,
}

impl ExecSpec {
    pub fn from_payload(payload: &[u8]) -> Result<Self, BackendError> {
        let spec: ExecSpec = serde_json::from_slice(payload)
            .map_err(|e| BackendError::InvalidPayload(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<(), BackendError> {
        if self.command.is_empty() {
            return Err(BackendError::InvalidPayload("command must not be empty".into()));
        }
        if let Some(key) = self
            .env
            .keys()
            .find(|key| key.is_empty() || key.contains('='))
        {
            return Err(BackendError::InvalidPayload(format!(
                "invalid environment variable name '{key}'"
            )));
        }
        if let Some(image) = &self.image {
            if image.trim().is_empty() {
                return Err(BackendError::InvalidPayload("image must not be blank".into()));
            }
            // would be parsed as an engine option, and shift the command into the image slot
            if image.starts_with('-') {
                return Err(BackendError::InvalidPayload(format!(
                    "image '{image}' must not start with '-'"
                )));
            }
        }
        Ok(())
    }
}
