//! Tenant-defined result states.

use super::PlatformClient;
use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomState {
    #[serde(deserialize_with = "id_text")]
    pub id: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub state_type: Option<String>,
    #[serde(default)]
    pub is_allowed: Option<bool>,
}

/// Ids arrive as either JSON numbers or strings.
fn id_text<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

impl PlatformClient {
    pub async fn list_custom_states(&self) -> Result<Vec<CustomState>> {
        let url = format!("{}/api/custom-states/", self.api_url());
        let states: Option<Vec<CustomState>> = self.send_json(&url, self.http().get(&url)).await?;
        Ok(states.unwrap_or_default())
    }

    /// Create a state. The platform may answer with an empty body, in which
    /// case `None` is returned.
    pub async fn create_custom_state(&self, name: &str) -> Result<Option<CustomState>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument("custom state name is empty".into()));
        }

        let url = format!("{}/api/custom-states/", self.api_url());
        let body = serde_json::json!({ "name": name });
        let (_, text) = self.send(&url, self.http().post(&url).json(&body)).await?;
        tracing::info!("Created custom state '{}'", name);

        if text.trim().is_empty() {
            return Ok(None);
        }
        // A body that is not a state record still means the state exists
        match serde_json::from_str::<CustomState>(&text) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                tracing::debug!("Custom state response not a state record: {}", e);
                Ok(None)
            }
        }
    }

    /// Delete a state by id. An unknown id surfaces as a 404 [`Error::Status`].
    pub async fn delete_custom_state(&self, state_id: &str) -> Result<()> {
        let url = format!("{}/api/custom-states/{}", self.api_url(), state_id);
        self.send(&url, self.http().delete(&url)).await?;
        tracing::info!("Deleted custom state {}", state_id);
        Ok(())
    }
}
