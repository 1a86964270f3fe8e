//! Trackers API.

use crate::client::TractiveClient;
use crate::error::Result;
use crate::types::EntityRef;

/// Trackers API client.
///
/// Hardware report, position report and position history payloads are vendor
/// blobs with no stable schema; they are returned as raw JSON.
pub struct TrackersApi {
    client: TractiveClient,
}

impl TrackersApi {
    pub(crate) fn new(client: TractiveClient) -> Self {
        Self { client }
    }

    /// List the trackers registered to the authenticated account.
    pub async fn list(&self) -> Result<Vec<EntityRef>> {
        let user_id = self.client.user_id().await?;
        self.client.get(&format!("user/{user_id}/trackers")).await
    }

    /// Hardware report for a tracker (battery, firmware, temperature).
    pub async fn hw_info(&self, tracker_id: &str) -> Result<serde_json::Value> {
        self.client
            .get(&format!("device_hw_report/{tracker_id}/"))
            .await
    }

    /// Latest reported position for a tracker.
    pub async fn pos_report(&self, tracker_id: &str) -> Result<serde_json::Value> {
        self.client
            .get(&format!("device_pos_report/{tracker_id}/"))
            .await
    }

    /// Position history between two unix timestamps (inclusive).
    pub async fn positions(
        &self,
        tracker_id: &str,
        time_from: u64,
        time_to: u64,
    ) -> Result<serde_json::Value> {
        let time_from = time_from.to_string();
        let time_to = time_to.to_string();
        self.client
            .get_with_query(
                &format!("tracker/{tracker_id}/positions"),
                &[
                    ("time_from", time_from.as_str()),
                    ("time_to", time_to.as_str()),
                    ("format", "json_segments"),
                ],
            )
            .await
    }
}
