//! Trackable objects (pets) API.

use crate::client::TractiveClient;
use crate::error::Result;
use crate::types::EntityRef;

/// Trackable objects API client.
pub struct TrackableObjectsApi {
    client: TractiveClient,
}

impl TrackableObjectsApi {
    pub(crate) fn new(client: TractiveClient) -> Self {
        Self { client }
    }

    /// List the trackable objects owned by the authenticated account.
    pub async fn list(&self) -> Result<Vec<EntityRef>> {
        let user_id = self.client.user_id().await?;
        self.client
            .get(&format!("user/{user_id}/trackable_objects"))
            .await
    }

    /// Full details for one trackable object (name, pet type, linked tracker).
    pub async fn details(&self, object_id: &str) -> Result<serde_json::Value> {
        self.client.get(&format!("trackable_object/{object_id}")).await
    }
}
