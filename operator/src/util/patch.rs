use super::{CONFLICT_RETRIES, Error, MANAGER_NAME};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use k8s_openapi::jiff::Timestamp;
use kube::{
    Api, Client,
    api::{Patch, PatchParams, Resource},
    core::NamespaceResourceScope,
};
use redis_operator_types::*;
use serde::{Serialize, de::DeserializeOwned};
use std::{clone::Clone, fmt::Debug};

/// Upper bound on the condition history kept per resource.
pub const MAX_CONDITIONS: usize = 10;

pub trait Object<S: Status> {
    /// Returns a mutable reference to the status object, initializing
    /// it with the default value if it does not exist.
    fn mut_status(&mut self) -> &mut S;
}

pub trait Status {
    /// Sets the last updated timestamp to the given value.
    fn set_last_updated(&mut self, last_updated: Time);

    /// The bounded condition history.
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}

macro_rules! status_object {
    ($kind:ty, $status:ty) => {
        impl Object<$status> for $kind {
            fn mut_status(&mut self) -> &mut $status {
                self.status.get_or_insert_with(Default::default)
            }
        }

        impl Status for $status {
            fn set_last_updated(&mut self, last_updated: Time) {
                self.last_updated = Some(last_updated);
            }

            fn conditions_mut(&mut self) -> &mut Vec<Condition> {
                &mut self.conditions
            }
        }
    };
}

status_object!(RedisInstance, RedisInstanceStatus);
status_object!(RedisMasterReplica, RedisMasterReplicaStatus);
status_object!(RedisSentinel, RedisSentinelStatus);
status_object!(RedisCluster, RedisClusterStatus);
status_object!(Redis, RedisStatus);

/// Patch the resource's status object with the provided function.
/// The function is passed a mutable reference to the status object,
/// which is to be mutated in-place. Move closures are supported.
pub async fn patch_status<S: Status, T>(
    client: Client,
    instance: &T,
    f: impl FnOnce(&mut S),
) -> Result<T, kube::Error>
where
    <T as Resource>::DynamicType: Default,
    T: Clone
        + Resource
        + Object<S>
        + Serialize
        + DeserializeOwned
        + Debug
        + Resource<Scope = NamespaceResourceScope>,
{
    let patch = Patch::Json::<T>({
        let mut modified = instance.clone();
        let status = modified.mut_status();
        f(status);
        status.set_last_updated(Time::from(Timestamp::now()));
        json_patch::diff(
            &serde_json::to_value(instance).unwrap_or_default(),
            &serde_json::to_value(&modified).unwrap_or_default(),
        )
    });
    let name = instance.meta().name.as_deref().unwrap_or_default();
    let namespace = instance.meta().namespace.as_deref().unwrap_or_default();
    let api: Api<T> = Api::namespaced(client, namespace);
    api.patch_status(name, &PatchParams::apply(MANAGER_NAME), &patch)
        .await
}

/// Like [`patch_status`] but with bounded optimistic-concurrency retry:
/// on a conflict the latest object is re-fetched and the mutation
/// re-applied on top of it.
pub async fn patch_status_retrying<S: Status, T>(
    client: Client,
    instance: &T,
    f: impl Fn(&mut S),
) -> Result<T, Error>
where
    <T as Resource>::DynamicType: Default,
    T: Clone
        + Resource
        + Object<S>
        + Serialize
        + DeserializeOwned
        + Debug
        + Resource<Scope = NamespaceResourceScope>,
{
    let name = instance
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::UserInput("resource is missing metadata.name".to_string()))?;
    let namespace = instance
        .meta()
        .namespace
        .clone()
        .ok_or_else(|| Error::UserInput("resource is missing metadata.namespace".to_string()))?;

    let mut current = instance.clone();
    for _ in 0..CONFLICT_RETRIES {
        match patch_status(client.clone(), &current, &f).await {
            Ok(updated) => return Ok(updated),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                let api: Api<T> = Api::namespaced(client.clone(), &namespace);
                current = api.get(&name).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::StatusConflict(name, CONFLICT_RETRIES))
}

pub fn make_condition(
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        observed_generation,
        last_transition_time: Time::from(Timestamp::now()),
    }
}

/// Append a condition to the history. A condition identical to the most
/// recent one (ignoring timestamps) is dropped so its transition time
/// stays put. The history is bounded at [`MAX_CONDITIONS`]; the oldest
/// entries by transition time are evicted.
pub fn push_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    if let Some(last) = conditions.last()
        && last.type_ == condition.type_
        && last.status == condition.status
        && last.reason == condition.reason
        && last.message == condition.message
    {
        return;
    }
    conditions.push(condition);
    while conditions.len() > MAX_CONDITIONS {
        let oldest = conditions
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.last_transition_time.0)
            .map(|(i, _)| i);
        match oldest {
            Some(i) => {
                conditions.remove(i);
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition_at(second: i64, reason: &str) -> Condition {
        Condition {
            type_: "Ready".to_string(),
            status: "True".to_string(),
            reason: reason.to_string(),
            message: String::new(),
            observed_generation: Some(1),
            last_transition_time: Time(Timestamp::from_second(second).unwrap()),
        }
    }

    #[test]
    fn history_is_bounded_and_evicts_oldest() {
        let mut conditions = Vec::new();
        for i in 0..15 {
            push_condition(&mut conditions, condition_at(i, &format!("r{i}")));
        }
        assert_eq!(conditions.len(), MAX_CONDITIONS);
        // The five oldest entries are gone.
        assert!(conditions.iter().all(|c| c.last_transition_time.0
            >= Timestamp::from_second(5).unwrap()));
    }

    #[test]
    fn identical_tail_condition_is_not_duplicated() {
        let mut conditions = Vec::new();
        push_condition(&mut conditions, condition_at(1, "Running"));
        push_condition(&mut conditions, condition_at(2, "Running"));
        assert_eq!(conditions.len(), 1);
        // The original transition time is preserved.
        assert_eq!(
            conditions[0].last_transition_time.0,
            Timestamp::from_second(1).unwrap()
        );
    }

    #[test]
    fn changed_reason_starts_a_new_entry() {
        let mut conditions = Vec::new();
        push_condition(&mut conditions, condition_at(1, "Creating"));
        push_condition(&mut conditions, condition_at(2, "Running"));
        push_condition(&mut conditions, condition_at(3, "Creating"));
        assert_eq!(conditions.len(), 3);
    }

    #[test]
    fn mut_status_initializes_default() {
        let mut instance = RedisInstance::new("cache", Default::default());
        assert!(instance.status.is_none());
        instance.mut_status().phase = RedisPhase::Creating;
        assert_eq!(instance.status.unwrap().phase, RedisPhase::Creating);
    }
}
