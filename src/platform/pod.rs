//! Pod inspection helpers

use k8s_openapi::api::core::v1::Pod;

/// A pod counts as healthy when it is Running and its Ready condition is True.
pub fn is_pod_ok(pod: &Pod) -> bool {
    pod.status.as_ref().is_some_and(|s| {
        s.phase.as_deref() == Some("Running")
            && s.conditions.as_ref().is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
    })
}

/// A pod that will not recover on its own and should be recreated.
pub fn is_pod_broken(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Failed") | Some("Unknown")
    )
}

/// Image of the first container
pub fn pod_image(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .and_then(|c| c.image.as_deref())
}
