use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt as _;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, Operation};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::transform::PodTransformer;
use super::{
    LABEL_CROSS_PLATFORM_BUILD, LABEL_VALUE_ENABLED, RawReview, ResourceGvkExt, parse_object,
};
use crate::cluster::PodCreator;
use crate::helper::ResourceExt as _;

pub const MUTATE_PATH: &str = "/mutate";

/// Requests that never reach the admission decision.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("empty body")]
    EmptyBody,
    #[error("wrong path {0:?}")]
    WrongPath(String),
    #[error("malformed body: {0}")]
    MalformedBody(String),
    #[error("could not encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RequestError {
    pub fn status(&self) -> StatusCode {
        match self {
            RequestError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

fn with_message(mut res: AdmissionResponse, message: impl Into<String>) -> AdmissionResponse {
    res.result.message = message.into();
    res
}

/// Decides on pod admission requests and submits companion builder pods.
///
/// The original pod is always let through once it parses; only the creation
/// of the companion pod depends on the request.
pub struct AdmissionHandler {
    transformer: PodTransformer,
    pods: Arc<dyn PodCreator>,
    create_timeout: Duration,
}

impl AdmissionHandler {
    pub fn new(
        transformer: PodTransformer,
        pods: Arc<dyn PodCreator>,
        create_timeout: Duration,
    ) -> Self {
        Self {
            transformer,
            pods,
            create_timeout,
        }
    }

    /// Validates a raw request and returns the serialized admission review to reply with.
    pub async fn handle(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, RequestError> {
        if body.is_empty() {
            return Err(RequestError::EmptyBody);
        }
        debug!({ path, len = body.len() }, "received request");

        if path != MUTATE_PATH {
            return Err(RequestError::WrongPath(path.to_string()));
        }

        let RawReview { review, object } = RawReview::from_slice(body)
            .map_err(|err| RequestError::MalformedBody(err.to_string()))?;
        let request: AdmissionRequest<DynamicObject> = match review.try_into() {
            Ok(request) => request,
            Err(err) => return Err(RequestError::MalformedBody(err.to_string())),
        };

        let response = self.review(&request, object).await;
        Ok(serde_json::to_vec(&response.into_review())?)
    }

    /// `object` is the raw pod carried by `req`, decoded here so a bad one is denied.
    pub async fn review(
        &self,
        req: &AdmissionRequest<DynamicObject>,
        object: Option<Value>,
    ) -> AdmissionResponse {
        let res = AdmissionResponse::from(req);
        let uid = req.uid.as_str();

        if !Pod::is(&req.kind) {
            debug!({ uid, kind = &req.kind.kind }, "not a pod, doing nothing");
            return with_message(
                res,
                format!("No action required for {} {}", req.kind.kind, req.name),
            );
        }

        if !matches!(req.operation, Operation::Create) {
            debug!({ uid, pod = &req.name }, "not a create operation, doing nothing");
            return with_message(res, format!("No action required for pod {}", req.name));
        }

        let pod: Pod = match parse_object(object) {
            Ok(pod) => pod,
            Err(err) => {
                error!({ uid, err = %err }, "error deserializing pod");
                return res.deny(format!("unable to deserialize pod: {err}"));
            }
        };

        let name = match pod.name_any() {
            name if name.is_empty() => req.name.clone(),
            name => name,
        };

        if pod.label(LABEL_CROSS_PLATFORM_BUILD) != Some(LABEL_VALUE_ENABLED) {
            info!({ uid, pod = &name }, "cross platform build not enabled");
            return with_message(res, format!("No action required for pod {name}"));
        }

        let companion = match self.transformer.transform(&pod) {
            Ok(companion) => companion,
            Err(reason) => {
                warn!({ uid, pod = &name, reason = %reason }, "skipping cross platform build");
                return with_message(
                    res,
                    format!("No supported builder image found for pod {name}"),
                );
            }
        };

        if req.dry_run {
            info!({ uid, pod = &name }, "dry run, not creating cross platform pod");
            return with_message(
                res,
                format!("Dry run, skipping cross platform pod for pod {name}"),
            );
        }

        let namespace = pod.namespace_any(req.namespace.as_deref());
        let message = self.submit(&namespace, &name, &companion).await;
        with_message(res, message)
    }

    async fn submit(&self, namespace: &str, source: &str, companion: &Pod) -> String {
        let create = self.pods.create_pod(namespace, companion);

        match tokio::time::timeout(self.create_timeout, create).await {
            Ok(Ok(created)) => {
                let companion = created.name_any();
                info!(
                    { pod = source, companion = &companion, namespace },
                    "cross platform pod created"
                );
                format!("Cross platform pod {companion} created successfully for pod {source}")
            }
            Ok(Err(err)) => {
                error!(
                    { pod = source, namespace, err = %err },
                    "failed to create cross platform pod"
                );
                format!(
                    "Error. Cross platform pod didn't create successfully for pod {source}: {err}"
                )
            }
            Err(_) => {
                error!(
                    { pod = source, namespace, timeout = ?self.create_timeout },
                    "timed out creating cross platform pod"
                );
                format!(
                    "Error. Cross platform pod didn't create successfully for pod {source}: timed out after {:?}",
                    self.create_timeout
                )
            }
        }
    }
}
