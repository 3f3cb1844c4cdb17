use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::Client;

use crate::dto::snapshot::MissionSnapshot;

use super::{FetchError, FetchResult, SnapshotSource};

const SNAPSHOT_PATH: &str = "api/mission/snapshot";

/// Fetches snapshots from `GET {base_url}/api/mission/snapshot?missionId=<id>`.
#[derive(Clone)]
pub struct HttpSnapshotSource {
    client: Client,
    base_url: Arc<str>,
}

impl HttpSnapshotSource {
    /// Build a source with its own HTTP client.
    pub fn connect(base_url: &str) -> FetchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| FetchError::ClientBuilder { source })?;
        Ok(Self::with_client(client, base_url))
    }

    /// Build a source on top of an existing client.
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
        }
    }

    async fn fetch(
        client: Client,
        url: String,
        mission_id: String,
    ) -> FetchResult<MissionSnapshot> {
        let response = client
            .get(&url)
            .query(&[("missionId", mission_id.as_str())])
            .send()
            .await
            .map_err(|source| FetchError::RequestSend {
                mission_id: mission_id.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::RequestStatus {
                mission_id,
                status: status.as_u16(),
            });
        }

        response
            .json::<MissionSnapshot>()
            .await
            .map_err(|source| FetchError::DecodeResponse { mission_id, source })
    }
}

impl SnapshotSource for HttpSnapshotSource {
    fn fetch_snapshot(&self, mission_id: &str) -> BoxFuture<'static, FetchResult<MissionSnapshot>> {
        let client = self.client.clone();
        let url = format!("{}/{}", self.base_url, SNAPSHOT_PATH);
        let mission_id = mission_id.to_string();
        Box::pin(Self::fetch(client, url, mission_id))
    }
}
