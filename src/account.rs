use crate::Error;
use crate::MusicClient;
use crate::deserialize_lenient;
use crate::service::{Service, ServiceRequest};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Library size and the progress of the user's uploaders.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountStatus {
    #[serde(deserialize_with = "deserialize_lenient")]
    pub available_tracks: u32,
    pub upload_status: Vec<UploadStatus>,
}

/// Upload progress of one uploading client.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct UploadStatus {
    pub client_name: String,
    #[serde(deserialize_with = "deserialize_lenient")]
    pub client_total_song_count: u32,
    #[serde(deserialize_with = "deserialize_lenient")]
    pub current_total_uploaded_count: u32,
    pub current_uploading_track: Option<String>,
}

/// Account settings.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountSettings {
    pub is_canceled: bool,
    pub is_trial: bool,
    pub is_subscription: bool,
    pub subscription_newsletter: bool,
    #[serde(deserialize_with = "deserialize_lenient")]
    pub expiration_millis: i64,
    #[serde(deserialize_with = "deserialize_lenient")]
    pub max_tracks: u32,
}

#[derive(Debug, Deserialize)]
struct SettingsResponse {
    settings: AccountSettings,
}

impl MusicClient {
    async fn query<T: DeserializeOwned>(&self, service: Service) -> Result<T, Error> {
        let request = ServiceRequest::new(service).with_query("alt", "json");
        let body = self.call_service(request).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Get the library size and upload progress.
    ///
    /// # Returns
    ///
    /// `None` if the call failed; the error is passed to the error sink.
    pub async fn get_status(&self) -> Option<AccountStatus> {
        match self.query::<AccountStatus>(Service::GetStatus).await {
            Ok(status) => Some(status),
            Err(e) => {
                self.report("Fetching account status failed", &e);
                None
            }
        }
    }

    /// Number of tracks in the library as counted by the service.
    ///
    /// Returns 0 when the status cannot be fetched.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example(client: gmusicrs::MusicClient) {
    /// println!("{} tracks", client.get_track_count().await);
    /// # }
    /// ```
    pub async fn get_track_count(&self) -> u32 {
        self.get_status()
            .await
            .map(|status| status.available_tracks)
            .unwrap_or_default()
    }

    /// Get the account settings.
    ///
    /// # Returns
    ///
    /// `None` if the call failed; the error is passed to the error sink.
    pub async fn get_settings(&self) -> Option<AccountSettings> {
        match self.query::<SettingsResponse>(Service::LoadSettings).await {
            Ok(response) => Some(response.settings),
            Err(e) => {
                self.report("Fetching account settings failed", &e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockServiceCall, Session};
    use std::sync::{Arc, Mutex};

    fn client(service: MockServiceCall) -> MusicClient {
        MusicClient::new()
            .with_session(Session::new("token".to_string()))
            .with_service(service)
    }

    #[tokio::test]
    async fn test_get_status() {
        let mut service = MockServiceCall::new();
        service
            .expect_call()
            .withf(|_, request| request.service == Service::GetStatus)
            .times(1)
            .returning(|_, _| {
                Ok(r#"{"availableTracks": "1234", "uploadStatus": [
                    {"client_name": "laptop", "client_total_song_count": 50,
                     "current_total_uploaded_count": 20, "current_uploading_track": "Song"}
                ]}"#
                    .to_string())
            });

        let status = client(service).get_status().await.unwrap();

        assert_eq!(status.available_tracks, 1234);
        assert_eq!(status.upload_status[0].client_name, "laptop");
        assert_eq!(status.upload_status[0].current_total_uploaded_count, 20);
    }

    #[tokio::test]
    async fn test_track_count_is_zero_on_failure() {
        let mut service = MockServiceCall::new();
        service
            .expect_call()
            .times(1)
            .returning(|_, _| Ok("not json".to_string()));

        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        let client = client(service).with_error_callback(move |message, error| {
            sink.lock()
                .unwrap()
                .push((message.to_string(), error.is_protocol_decode()));
        });

        assert_eq!(client.get_track_count().await, 0);
        assert_eq!(
            *reported.lock().unwrap(),
            vec![("Fetching account status failed".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_get_settings() {
        let mut service = MockServiceCall::new();
        service
            .expect_call()
            .withf(|_, request| {
                request.service == Service::LoadSettings && request.query_value("alt") == Some("json")
            })
            .times(1)
            .returning(|_, _| {
                Ok(r#"{"settings": {"isSubscription": true, "maxTracks": 50000,
                    "expirationMillis": "1500000000000", "labs": []}}"#
                    .to_string())
            });

        let settings = client(service).get_settings().await.unwrap();

        assert!(settings.is_subscription);
        assert!(!settings.is_trial);
        assert_eq!(settings.max_tracks, 50000);
        assert_eq!(settings.expiration_millis, 1_500_000_000_000);
    }

    #[tokio::test]
    async fn test_account_queries_need_a_session() {
        let mut service = MockServiceCall::new();
        service.expect_call().times(0);

        let client = MusicClient::new().with_service(service);

        assert!(client.get_status().await.is_none());
        assert!(client.get_settings().await.is_none());
    }
}
