use kube::CustomResourceExt;
use redis_operator_types::*;
use std::fs;

fn main() {
    let _ = fs::create_dir("../crds");
    for (file, crd) in [
        ("redis.github.com_redisinstances.yaml", RedisInstance::crd()),
        (
            "redis.github.com_redismasterreplicas.yaml",
            RedisMasterReplica::crd(),
        ),
        ("redis.github.com_redissentinels.yaml", RedisSentinel::crd()),
        ("redis.github.com_redisclusters.yaml", RedisCluster::crd()),
        ("redis.github.com_redis.yaml", Redis::crd()),
    ] {
        fs::write(
            format!("../crds/{file}"),
            serde_yaml::to_string(&crd).unwrap(),
        )
        .unwrap();
    }
}
