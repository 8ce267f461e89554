//! Storage transitions and PVC expansion.
//!
//! A size decrease is never performed; callers report it as a failed
//! reconciliation with a remediation hint. Expansion patches every claim
//! owned by the workload set whose current request is smaller, and leaves
//! the rest alone so the call is safely re-runnable.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{
    Api, Client, ResourceExt,
    api::{ListParams, Patch, PatchParams},
};

use crate::util::Error;

/// Remediation hint attached to every shrinkage rejection.
pub const SHRINK_HINT: &str =
    "volume shrinkage is not supported by the storage layer; recreate the \
     resource with the smaller size and restore data from a backup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageTransition {
    NoChange,
    Expansion,
    Shrinkage,
}

/// Parse a Kubernetes resource quantity into bytes. Supports plain
/// integers, decimal fractions, and the decimal (k/M/G/T/P/E) and binary
/// (Ki/Mi/Gi/Ti/Pi/Ei) suffixes. Anything else is rejected.
pub fn parse_quantity(value: &str) -> Result<i128, Error> {
    let v = value.trim();
    let split = v
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(v.len());
    let (number, suffix) = v.split_at(split);
    if number.is_empty() {
        return Err(Error::Quantity(value.to_string()));
    }
    let multiplier: i128 = match suffix {
        "" => 1,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "E" => 1_000_000_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        "Ei" => 1 << 60,
        _ => return Err(Error::Quantity(value.to_string())),
    };
    match number.split_once('.') {
        None => {
            let whole: i128 = number
                .parse()
                .map_err(|_| Error::Quantity(value.to_string()))?;
            Ok(whole * multiplier)
        }
        Some((whole, frac)) => {
            if frac.is_empty() || frac.contains('.') {
                return Err(Error::Quantity(value.to_string()));
            }
            let whole: i128 = if whole.is_empty() {
                0
            } else {
                whole
                    .parse()
                    .map_err(|_| Error::Quantity(value.to_string()))?
            };
            let frac_value: i128 = frac
                .parse()
                .map_err(|_| Error::Quantity(value.to_string()))?;
            let scale = 10_i128.pow(frac.len() as u32);
            Ok(whole * multiplier + frac_value * multiplier / scale)
        }
    }
}

/// Classify a proposed size transition. Both sides must parse.
pub fn classify_transition(current: &str, desired: &str) -> Result<StorageTransition, Error> {
    let current = parse_quantity(current)?;
    let desired = parse_quantity(desired)?;
    Ok(if desired > current {
        StorageTransition::Expansion
    } else if desired < current {
        StorageTransition::Shrinkage
    } else {
        StorageTransition::NoChange
    })
}

pub fn shrink_message(current: &str, desired: &str) -> String {
    format!(
        "storage shrinkage from {} to {} rejected: {}",
        current, desired, SHRINK_HINT
    )
}

/// The storage request currently recorded on a claim.
pub fn pvc_request(pvc: &PersistentVolumeClaim) -> Option<&Quantity> {
    pvc.spec
        .as_ref()?
        .resources
        .as_ref()?
        .requests
        .as_ref()?
        .get("storage")
}

fn template_prefixes(sts: &StatefulSet) -> Vec<String> {
    let sts_name = sts.metadata.name.as_deref().unwrap_or_default();
    sts.spec
        .as_ref()
        .and_then(|s| s.volume_claim_templates.as_ref())
        .map(|templates| {
            templates
                .iter()
                .filter_map(|t| t.metadata.name.as_deref())
                .map(|template| format!("{template}-{sts_name}-"))
                .collect()
        })
        .unwrap_or_default()
}

fn matches_any_prefix(name: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|p| name.starts_with(p.as_str()))
}

/// Claims belonging to the workload set, found by its label selector with
/// a name-prefix fallback against the volume-claim-template names.
async fn matching_claims(
    api: &Api<PersistentVolumeClaim>,
    sts: &StatefulSet,
) -> Result<Vec<PersistentVolumeClaim>, Error> {
    let mut claims: Vec<PersistentVolumeClaim> = Vec::new();
    if let Some(selector) = sts
        .spec
        .as_ref()
        .and_then(|s| s.selector.match_labels.as_ref())
        && !selector.is_empty()
    {
        let selector = selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        claims = api
            .list(&ListParams::default().labels(&selector))
            .await?
            .items;
    }
    if claims.is_empty() {
        let prefixes = template_prefixes(sts);
        if !prefixes.is_empty() {
            claims = api
                .list(&ListParams::default())
                .await?
                .items
                .into_iter()
                .filter(|pvc| matches_any_prefix(&pvc.name_any(), &prefixes))
                .collect();
        }
    }
    Ok(claims)
}

/// Whether any claim of the workload set still requests less than
/// `new_size`. Used to tell a pending expansion apart from one that has
/// already been applied (the claim template itself is immutable and keeps
/// its original size).
pub async fn needs_expansion(
    client: Client,
    namespace: &str,
    sts: &StatefulSet,
    new_size: &str,
) -> Result<bool, Error> {
    let desired = parse_quantity(new_size)?;
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client, namespace);
    Ok(matching_claims(&api, sts).await?.iter().any(|pvc| {
        pvc_request(pvc)
            .and_then(|q| parse_quantity(&q.0).ok())
            .is_some_and(|current| current < desired)
    }))
}

/// Grow every claim belonging to the workload set to `new_size`. Returns
/// how many claims were patched.
pub async fn expand_pvcs(
    client: Client,
    namespace: &str,
    sts: &StatefulSet,
    new_size: &str,
) -> Result<u32, Error> {
    let desired = parse_quantity(new_size)?;
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client, namespace);
    let claims = matching_claims(&api, sts).await?;

    let mut patched = 0;
    for pvc in &claims {
        let current = match pvc_request(pvc).map(|q| parse_quantity(&q.0)) {
            Some(Ok(current)) => current,
            // A claim with no or unparsable request is left alone.
            _ => continue,
        };
        if current >= desired {
            continue;
        }
        let patch = serde_json::json!({
            "spec": {"resources": {"requests": {"storage": new_size}}}
        });
        api.patch(&pvc.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        patched += 1;
    }
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::StatefulSetSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use kube::api::ObjectMeta;

    #[test]
    fn parses_binary_and_decimal_suffixes() {
        assert_eq!(parse_quantity("1Gi").unwrap(), 1 << 30);
        assert_eq!(parse_quantity("500Mi").unwrap(), 500 * (1 << 20));
        assert_eq!(parse_quantity("2G").unwrap(), 2_000_000_000);
        assert_eq!(parse_quantity("1024").unwrap(), 1024);
        assert_eq!(parse_quantity("1.5Gi").unwrap(), 3 * (1 << 29));
    }

    #[test]
    fn rejects_malformed_quantities() {
        for bad in ["", "Gi", "1GiB", "1,5Gi", "1.Gi", "1.2.3Gi", "abc"] {
            assert!(parse_quantity(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn transition_classification() {
        assert_eq!(
            classify_transition("1Gi", "1Gi").unwrap(),
            StorageTransition::NoChange
        );
        assert_eq!(
            classify_transition("1Gi", "2Gi").unwrap(),
            StorageTransition::Expansion
        );
        assert_eq!(
            classify_transition("1Gi", "500Mi").unwrap(),
            StorageTransition::Shrinkage
        );
        // Equivalent values across suffix systems are no-ops.
        assert_eq!(
            classify_transition("1024Mi", "1Gi").unwrap(),
            StorageTransition::NoChange
        );
        assert!(classify_transition("1Gi", "huge").is_err());
    }

    #[test]
    fn shrink_message_carries_the_hint() {
        let msg = shrink_message("1Gi", "500Mi");
        assert!(msg.contains("shrinkage"));
        assert!(msg.contains(SHRINK_HINT));
    }

    #[test]
    fn prefix_fallback_matches_template_and_set_name() {
        let sts = StatefulSet {
            metadata: ObjectMeta {
                name: Some("cache".to_string()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                selector: LabelSelector::default(),
                service_name: Some("cache".to_string()),
                volume_claim_templates: Some(vec![PersistentVolumeClaim {
                    metadata: ObjectMeta {
                        name: Some("data".to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        };
        let prefixes = template_prefixes(&sts);
        assert_eq!(prefixes, vec!["data-cache-".to_string()]);
        assert!(matches_any_prefix("data-cache-0", &prefixes));
        assert!(matches_any_prefix("data-cache-12", &prefixes));
        assert!(!matches_any_prefix("data-other-0", &prefixes));
        assert!(!matches_any_prefix("wal-cache-0", &prefixes));
    }
}
