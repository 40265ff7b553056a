use crate::Error;
use crate::MusicClient;
use crate::ServiceApiError;
use crate::service::{Service, ServiceRequest};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One element of a batch mutation request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Mutation {
    Create(Value),
    Update(Value),
    Delete(String),
}

impl Mutation {
    fn to_json(&self) -> Value {
        match self {
            Mutation::Create(value) => json!({ "create": value }),
            Mutation::Update(value) => json!({ "update": value }),
            Mutation::Delete(id) => json!({ "delete": id }),
        }
    }
}

/// Response to a batch mutation.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct MutateResponse {
    #[serde(default)]
    pub mutate_response: Vec<MutateResult>,
}

/// Outcome of one mutation in a batch.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct MutateResult {
    /// Id of the created or changed item
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    /// "OK" on success
    #[serde(default)]
    pub response_code: String,
}

impl MutateResult {
    pub fn is_ok(&self) -> bool {
        self.response_code == "OK"
    }
}

impl MutateResponse {
    /// Whether every mutation in the batch succeeded.
    pub fn is_success(&self) -> bool {
        self.mutate_response.iter().all(MutateResult::is_ok)
    }
}

/// A fresh client-side id for a new item, formatted like a UUID.
pub fn generate_client_id() -> String {
    let hex = format!("{:032x}", rand::rng().random::<u128>());
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

impl MusicClient {
    /// Send a batch of mutations.
    ///
    /// Returns the per-mutation results when the whole batch succeeded. Any
    /// failure is passed to the error sink and gives `None`.
    pub(crate) async fn mutate(
        &self,
        service: Service,
        mutations: Vec<Mutation>,
    ) -> Option<Vec<MutateResult>> {
        let body = json!({
            "mutations": mutations.iter().map(Mutation::to_json).collect::<Vec<_>>()
        });
        let request = ServiceRequest::new(service)
            .with_query("alt", "json")
            .with_body(body);

        let result = match self.call_service(request).await {
            Ok(response) => serde_json::from_str::<MutateResponse>(&response).map_err(Error::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(response) if response.is_success() => {
                log::debug!(
                    "Service '{service}' applied {} mutations",
                    response.mutate_response.len()
                );
                Some(response.mutate_response)
            }
            Ok(response) => {
                let codes: Vec<&str> = response
                    .mutate_response
                    .iter()
                    .map(|r| r.response_code.as_str())
                    .collect();
                let err = Error::ServiceApiError(ServiceApiError {
                    service: service.to_string(),
                    status: 200,
                    message: format!("mutation rejected: {}", codes.join(", ")),
                });
                self.report(&format!("Service '{service}' rejected a mutation"), &err);
                None
            }
            Err(e) => {
                self.report(&format!("Service '{service}' failed"), &e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_json() {
        assert_eq!(
            Mutation::Delete("abc".to_string()).to_json(),
            json!({ "delete": "abc" })
        );
        assert_eq!(
            Mutation::Update(json!({ "id": "x", "name": "n" })).to_json(),
            json!({ "update": { "id": "x", "name": "n" } })
        );
    }

    #[test]
    fn test_mutate_response_success() {
        let ok: MutateResponse = serde_json::from_str(
            r#"{"mutate_response": [{"id": "a", "response_code": "OK"}, {"id": "b", "client_id": "c", "response_code": "OK"}]}"#,
        )
        .unwrap();
        assert!(ok.is_success());
        assert_eq!(ok.mutate_response[1].client_id.as_deref(), Some("c"));

        let partial: MutateResponse = serde_json::from_str(
            r#"{"mutate_response": [{"id": "a", "response_code": "OK"}, {"id": "b", "response_code": "NOT_FOUND"}]}"#,
        )
        .unwrap();
        assert!(!partial.is_success());
    }

    #[test]
    fn test_client_id_format() {
        let id = generate_client_id();
        let groups: Vec<usize> = id.split('-').map(str::len).collect();
        assert_eq!(groups, vec![8, 4, 4, 4, 12]);
        assert_ne!(id, generate_client_id());
    }
}
