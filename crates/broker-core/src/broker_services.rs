//! The default, network-backed `InstanceLister`/`Triggerer`/`StateChecker`:
//! a thin `reqwest` client against a broker's management HTTP API.
//!
//! All retry, backoff, and concurrency policy lives in
//! [`crate::iterator::Iterator`]; this client never sleeps or retries on
//! its own, and raises every non-2xx response as a plain
//! `anyhow::Error` carrying the status line, matching the wire contract
//! observed against the reference broker's integration tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::instance_lister::{InstanceLister, ListerError};
use crate::state_checker::StateChecker;
use crate::triggerer::Triggerer;
use crate::types::{CanarySelectionParams, Guid, Instance, OperationHandle, OperationOutcome, OperationType, OutcomeTag};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Talks to a broker's `mgmt` HTTP surface: listing instances, triggering
/// an operation, and polling its last-operation status.
pub struct BrokerServicesClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    operation_type: OperationType,
}

impl BrokerServicesClient {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        operation_type: OperationType,
    ) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with only a timeout configured always builds");
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            operation_type,
        }
    }

    fn instance_url(&self, guid: &str) -> String {
        format!("{}/mgmt/service_instances/{}", self.base_url, guid)
    }

    fn last_operation_url(&self, guid: &str, bosh_context_id: Option<&str>) -> String {
        let base = format!("{}/mgmt/service_instances/{}/last_operation", self.base_url, guid);
        match bosh_context_id {
            Some(ctx) => format!("{base}?operation_data={ctx}"),
            None => base,
        }
    }
}

fn status_line(status: StatusCode) -> String {
    format!("{} {}", status.as_u16(), status.canonical_reason().unwrap_or("Unknown"))
}

fn status_error(status: StatusCode) -> anyhow::Error {
    anyhow::anyhow!("HTTP response status: {}", status_line(status))
}

#[derive(Debug, Deserialize)]
struct OperationAcceptedResponse {
    bosh_task_id: i64,
    #[serde(default)]
    bosh_context_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct TriggerOperationRequest<'a> {
    operation_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct LastOperationResponse {
    state: String,
    #[serde(default)]
    description: Option<String>,
}

#[async_trait]
impl Triggerer for BrokerServicesClient {
    async fn trigger_operation(&self, instance: &Instance) -> anyhow::Result<OperationOutcome> {
        let response = self
            .client
            .patch(self.instance_url(&instance.guid))
            .basic_auth(&self.username, Some(&self.password))
            .json(&TriggerOperationRequest {
                operation_type: self.operation_type.as_str(),
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::ACCEPTED => {
                let body: OperationAcceptedResponse = response.json().await?;
                Ok(OperationOutcome::new(OutcomeTag::Accepted).with_handle(OperationHandle {
                    bosh_task_id: body.bosh_task_id,
                    operation_type: self.operation_type,
                    bosh_context_id: body.bosh_context_id,
                }))
            }
            StatusCode::CONFLICT => Ok(OperationOutcome::new(OutcomeTag::OperationAlreadyInProgress)),
            StatusCode::GONE => Ok(OperationOutcome::new(OutcomeTag::InstanceNotFound)),
            other => Err(status_error(other)),
        }
    }
}

#[async_trait]
impl StateChecker for BrokerServicesClient {
    async fn check(&self, guid: &Guid, handle: &OperationHandle) -> anyhow::Result<OperationOutcome> {
        let url = self.last_operation_url(guid, handle.bosh_context_id.as_deref());
        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response.status()));
        }

        let body: LastOperationResponse = response.json().await?;
        let tag = match body.state.as_str() {
            "succeeded" => OutcomeTag::OperationSucceeded,
            "failed" => OutcomeTag::OperationFailed,
            "in progress" => OutcomeTag::OperationPending,
            other => return Err(anyhow::anyhow!("unrecognized last-operation state: {other}")),
        };

        let mut outcome = OperationOutcome::new(tag);
        if let Some(description) = body.description {
            outcome = outcome.with_description(description);
        }
        Ok(outcome)
    }
}

#[async_trait]
impl InstanceLister for BrokerServicesClient {
    async fn instances(&self) -> Result<Vec<Instance>, ListerError> {
        let url = format!("{}/mgmt/service_instances", self.base_url);
        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(anyhow::Error::from)?;

        if !response.status().is_success() {
            return Err(ListerError::Other(status_error(response.status())));
        }

        Ok(response.json::<Vec<Instance>>().await.map_err(anyhow::Error::from)?)
    }

    async fn filtered_instances(&self, filter: &CanarySelectionParams) -> Result<Vec<Instance>, ListerError> {
        let url = format!("{}/mgmt/service_instances", self.base_url);
        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .query(filter)
            .send()
            .await
            .map_err(anyhow::Error::from)?;

        if !response.status().is_success() {
            return Err(ListerError::Other(status_error(response.status())));
        }

        Ok(response.json::<Vec<Instance>>().await.map_err(anyhow::Error::from)?)
    }

    async fn latest_instance_info(&self, instance: &Instance) -> Result<Instance, ListerError> {
        let response = self
            .client
            .get(self.instance_url(&instance.guid))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(anyhow::Error::from)?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(ListerError::NotFound),
            status if status.is_success() => {
                Ok(response.json::<Instance>().await.map_err(anyhow::Error::from)?)
            }
            status => Err(ListerError::Other(status_error(status))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_includes_reason_phrase() {
        assert_eq!(status_line(StatusCode::UNAUTHORIZED), "401 Unauthorized");
    }

    #[test]
    fn status_error_matches_reference_wire_message() {
        let err = status_error(StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), "HTTP response status: 401 Unauthorized");
    }

    #[test]
    fn last_operation_url_appends_operation_data_when_present() {
        let client = BrokerServicesClient::new("https://broker.example.com", "u", "p", OperationType::Upgrade);
        assert_eq!(
            client.last_operation_url("guid-1", Some("ctx-1")),
            "https://broker.example.com/mgmt/service_instances/guid-1/last_operation?operation_data=ctx-1"
        );
        assert_eq!(
            client.last_operation_url("guid-1", None),
            "https://broker.example.com/mgmt/service_instances/guid-1/last_operation"
        );
    }
}
