//! HTTPS admission endpoint.
//!
//! Receives `AdmissionReview` payloads for pods, runs the sizing engine
//! against the current node snapshot and answers with a JSON patch. Sizing
//! failures admit the pod unchanged when fail-open is on, and deny it
//! otherwise.

use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::AdmissionRequest;
use kube::core::admission::AdmissionResponse;
use kube::core::admission::AdmissionReview;
use kube::core::DynamicObject;
use poem::handler;
use poem::http::StatusCode;
use poem::web::Data;
use poem::web::Json;
use tracing::debug;
use tracing::warn;

use crate::node_cache::NodeCapacityCache;

/// Shared state handed to every admission request.
#[derive(Clone)]
pub(crate) struct WebhookState {
    pub nodes: NodeCapacityCache,
    pub fail_open: bool,
}

#[handler]
pub(crate) async fn mutate(
    Data(state): Data<&WebhookState>,
    Json(review): Json<AdmissionReview<Pod>>,
) -> poem::Result<Json<AdmissionReview<DynamicObject>>> {
    let request: AdmissionRequest<Pod> = review.try_into().map_err(|e| {
        warn!("Rejecting malformed admission review: {e}");
        poem::Error::from_string(
            format!("malformed admission review: {e}"),
            StatusCode::BAD_REQUEST,
        )
    })?;

    Ok(Json(evaluate(state, &request).into_review()))
}

fn evaluate(state: &WebhookState, request: &AdmissionRequest<Pod>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);

    // DELETE reviews carry no object, nothing to size
    let Some(pod) = &request.object else {
        return response;
    };

    match sizing::build_patch(pod, &state.nodes) {
        Ok(patch) if patch.0.is_empty() => {
            debug!(
                pod = %request.name,
                namespace = ?request.namespace,
                "admitting pod unchanged"
            );
            response
        }
        Ok(patch) => {
            debug!(
                pod = %request.name,
                namespace = ?request.namespace,
                operations = patch.0.len(),
                "admitting pod with sizing patch"
            );
            match response.clone().with_patch(patch) {
                Ok(patched) => patched,
                Err(e) => {
                    warn!(pod = %request.name, "Failed to serialize sizing patch: {e}");
                    fail(state, response, "could not serialize sizing patch")
                }
            }
        }
        Err(e) => {
            warn!(
                pod = %request.name,
                namespace = ?request.namespace,
                "Sizing failed: {e:?}"
            );
            fail(state, response, &e.current_context().to_string())
        }
    }
}

fn fail(state: &WebhookState, response: AdmissionResponse, reason: &str) -> AdmissionResponse {
    if state.fail_open {
        response
    } else {
        response.deny(reason.to_string())
    }
}
