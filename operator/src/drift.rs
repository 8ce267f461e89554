//! Drift classification between a declared workload and the StatefulSet
//! actually running.
//!
//! The comparison base for configuration is always the hash stamped on the
//! running workload's pod template, never a hash recomputed from the config
//! object. Stamping only happens at creation or rebuild, so a config change
//! converges in exactly one rebuild instead of oscillating.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::ResourceRequirements;
use redis_operator_types::annotations;

use crate::storage::{self, StorageTransition};

/// The declared shape of one workload set, reduced to the fields the
/// classifier compares.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DesiredWorkload {
    pub replicas: i32,
    pub image: String,
    pub resources: Option<ResourceRequirements>,
    pub storage_size: Option<String>,
    pub storage_class: Option<String>,
    /// Expected config hash, computed from the desired spec.
    pub config_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Replicas(i32),
    Image(String),
    Resources(Option<ResourceRequirements>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeDecision {
    /// Substrate matches the spec and the stamped hash equals the
    /// expected hash.
    NoChange,
    /// In-place mutations the workload controller rolls out itself. The
    /// config-hash annotation is not touched.
    RollingUpdate(Vec<Mutation>),
    /// The volume-claim template's request strictly increased; apply by
    /// patching every owned claim.
    ExpandStorage(String),
    /// Delete and recreate the workload set with a fresh stamp.
    Rebuild(String),
    /// The spec asks for something that is never performed.
    Reject(String),
}

impl ChangeDecision {
    pub fn to_str(&self) -> &str {
        match self {
            ChangeDecision::NoChange => "NoChange",
            ChangeDecision::RollingUpdate(_) => "RollingUpdate",
            ChangeDecision::ExpandStorage(_) => "ExpandStorage",
            ChangeDecision::Rebuild(_) => "Rebuild",
            ChangeDecision::Reject(_) => "Reject",
        }
    }
}

/// The config hash stamped on the workload's pod template, if any.
pub fn stamped_hash(sts: &StatefulSet) -> Option<&str> {
    sts.spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()?
        .get(annotations::CONFIG_HASH)
        .map(String::as_str)
}

fn observed_replicas(sts: &StatefulSet) -> i32 {
    sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0)
}

fn observed_image(sts: &StatefulSet) -> Option<&str> {
    sts.spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()?
        .image
        .as_deref()
}

fn observed_resources(sts: &StatefulSet) -> Option<&ResourceRequirements> {
    sts.spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()?
        .resources
        .as_ref()
}

fn observed_storage(sts: &StatefulSet) -> (Option<String>, Option<String>) {
    let Some(template) = sts
        .spec
        .as_ref()
        .and_then(|s| s.volume_claim_templates.as_ref())
        .and_then(|t| t.first())
    else {
        return (None, None);
    };
    let size = storage::pvc_request(template).map(|q| q.0.clone());
    let class = template
        .spec
        .as_ref()
        .and_then(|s| s.storage_class_name.clone());
    (size, class)
}

/// Empty requirements and absent requirements are the same declaration.
fn normalized_resources(resources: Option<&ResourceRequirements>) -> Option<ResourceRequirements> {
    resources
        .filter(|r| {
            r.requests.as_ref().is_some_and(|m| !m.is_empty())
                || r.limits.as_ref().is_some_and(|m| !m.is_empty())
        })
        .cloned()
}

/// Decide the single action to take for this workload this pass.
/// Precedence: Reject > Rebuild > ExpandStorage > RollingUpdate > NoChange.
pub fn classify(desired: &DesiredWorkload, observed: &StatefulSet) -> ChangeDecision {
    // Malformed desired sizes are rejected before anything else runs.
    if let Some(size) = &desired.storage_size
        && let Err(e) = storage::parse_quantity(size)
    {
        return ChangeDecision::Reject(e.to_string());
    }

    let (observed_size, observed_class) = observed_storage(observed);
    let mut expand: Option<String> = None;
    match (&observed_size, &desired.storage_size) {
        (Some(current), Some(want)) => match storage::classify_transition(current, want) {
            Err(e) => return ChangeDecision::Reject(e.to_string()),
            Ok(StorageTransition::Shrinkage) => {
                return ChangeDecision::Reject(storage::shrink_message(current, want));
            }
            Ok(StorageTransition::Expansion) => expand = Some(want.clone()),
            Ok(StorageTransition::NoChange) => {}
        },
        (None, Some(_)) | (Some(_), None) => {
            return ChangeDecision::Rebuild(
                "persistence changed between ephemeral and volume-backed".to_string(),
            );
        }
        (None, None) => {}
    }

    if observed_class != desired.storage_class {
        return ChangeDecision::Rebuild(format!(
            "storage class changed from {} to {}",
            observed_class.as_deref().unwrap_or("<default>"),
            desired.storage_class.as_deref().unwrap_or("<default>"),
        ));
    }

    match stamped_hash(observed) {
        Some(stamp) if stamp == desired.config_hash => {}
        stamp => {
            return ChangeDecision::Rebuild(format!(
                "configuration drift: workload carries hash {}, expected {}",
                stamp.unwrap_or("<none>"),
                desired.config_hash,
            ));
        }
    }

    if let Some(size) = expand {
        return ChangeDecision::ExpandStorage(size);
    }

    let mut mutations = Vec::new();
    if observed_replicas(observed) != desired.replicas {
        mutations.push(Mutation::Replicas(desired.replicas));
    }
    if observed_image(observed) != Some(desired.image.as_str()) {
        mutations.push(Mutation::Image(desired.image.clone()));
    }
    let desired_resources = normalized_resources(desired.resources.as_ref());
    if normalized_resources(observed_resources(observed)) != desired_resources {
        mutations.push(Mutation::Resources(desired_resources));
    }
    if mutations.is_empty() {
        ChangeDecision::NoChange
    } else {
        ChangeDecision::RollingUpdate(mutations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::StatefulSetSpec;
    use k8s_openapi::api::core::v1::{
        Container, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec,
        VolumeResourceRequirements,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    const HASH: &str = "f00d";

    fn desired() -> DesiredWorkload {
        DesiredWorkload {
            replicas: 1,
            image: "redis:7.2".to_string(),
            resources: None,
            storage_size: Some("1Gi".to_string()),
            storage_class: None,
            config_hash: HASH.to_string(),
        }
    }

    fn observed() -> StatefulSet {
        let mut annotations = BTreeMap::new();
        annotations.insert(annotations::CONFIG_HASH.to_string(), HASH.to_string());
        StatefulSet {
            metadata: ObjectMeta {
                name: Some("cache".to_string()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(1),
                selector: LabelSelector::default(),
                service_name: Some("cache".to_string()),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        annotations: Some(annotations),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "redis".to_string(),
                            image: Some("redis:7.2".to_string()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                volume_claim_templates: Some(vec![PersistentVolumeClaim {
                    metadata: ObjectMeta {
                        name: Some("data".to_string()),
                        ..Default::default()
                    },
                    spec: Some(PersistentVolumeClaimSpec {
                        resources: Some(VolumeResourceRequirements {
                            requests: Some({
                                let mut m = BTreeMap::new();
                                m.insert("storage".to_string(), Quantity("1Gi".to_string()));
                                m
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn matching_substrate_is_no_change() {
        assert_eq!(classify(&desired(), &observed()), ChangeDecision::NoChange);
    }

    #[test]
    fn replica_drift_rolls_in_place() {
        let mut want = desired();
        want.replicas = 3;
        match classify(&want, &observed()) {
            ChangeDecision::RollingUpdate(mutations) => {
                assert_eq!(mutations, vec![Mutation::Replicas(3)]);
            }
            other => panic!("expected rolling update, got {other:?}"),
        }
    }

    #[test]
    fn image_and_replica_drift_roll_together() {
        let mut want = desired();
        want.replicas = 2;
        want.image = "redis:7.4".to_string();
        match classify(&want, &observed()) {
            ChangeDecision::RollingUpdate(mutations) => assert_eq!(mutations.len(), 2),
            other => panic!("expected rolling update, got {other:?}"),
        }
    }

    #[test]
    fn hash_drift_rebuilds() {
        let mut want = desired();
        want.config_hash = "beef".to_string();
        assert!(matches!(
            classify(&want, &observed()),
            ChangeDecision::Rebuild(_)
        ));
    }

    #[test]
    fn rebuild_outranks_rolling_update() {
        let mut want = desired();
        want.config_hash = "beef".to_string();
        want.replicas = 5;
        assert!(matches!(
            classify(&want, &observed()),
            ChangeDecision::Rebuild(_)
        ));
    }

    #[test]
    fn missing_stamp_rebuilds() {
        let want = desired();
        let mut sts = observed();
        sts.spec
            .as_mut()
            .unwrap()
            .template
            .metadata
            .as_mut()
            .unwrap()
            .annotations = None;
        assert!(matches!(classify(&want, &sts), ChangeDecision::Rebuild(_)));
    }

    #[test]
    fn expansion_wins_over_rolling_update() {
        let mut want = desired();
        want.storage_size = Some("2Gi".to_string());
        want.replicas = 4;
        assert_eq!(
            classify(&want, &observed()),
            ChangeDecision::ExpandStorage("2Gi".to_string())
        );
    }

    #[test]
    fn rebuild_outranks_expansion() {
        let mut want = desired();
        want.storage_size = Some("2Gi".to_string());
        want.config_hash = "beef".to_string();
        assert!(matches!(
            classify(&want, &observed()),
            ChangeDecision::Rebuild(_)
        ));
    }

    #[test]
    fn shrinkage_is_rejected_over_everything() {
        let mut want = desired();
        want.storage_size = Some("500Mi".to_string());
        want.config_hash = "beef".to_string();
        want.replicas = 9;
        match classify(&want, &observed()) {
            ChangeDecision::Reject(msg) => assert!(msg.contains("shrinkage")),
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[test]
    fn malformed_size_is_rejected() {
        let mut want = desired();
        want.storage_size = Some("lots".to_string());
        assert!(matches!(
            classify(&want, &observed()),
            ChangeDecision::Reject(_)
        ));
    }

    #[test]
    fn storage_class_change_rebuilds() {
        let mut want = desired();
        want.storage_class = Some("fast-nvme".to_string());
        match classify(&want, &observed()) {
            ChangeDecision::Rebuild(reason) => assert!(reason.contains("storage class")),
            other => panic!("expected rebuild, got {other:?}"),
        }
    }

    #[test]
    fn resource_drift_rolls_in_place() {
        let mut want = desired();
        let mut requests = BTreeMap::new();
        requests.insert("cpu".to_string(), Quantity("500m".to_string()));
        want.resources = Some(ResourceRequirements {
            requests: Some(requests),
            ..Default::default()
        });
        match classify(&want, &observed()) {
            ChangeDecision::RollingUpdate(mutations) => {
                assert!(matches!(mutations[0], Mutation::Resources(Some(_))));
            }
            other => panic!("expected rolling update, got {other:?}"),
        }
    }

    #[test]
    fn empty_resources_equal_absent_resources() {
        let mut want = desired();
        want.resources = Some(ResourceRequirements::default());
        assert_eq!(classify(&want, &observed()), ChangeDecision::NoChange);
    }
}
