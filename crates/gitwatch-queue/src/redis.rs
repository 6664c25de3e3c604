use deadpool_redis::{Config as RedisConfig, Pool};

/// Build a deadpool pool. `REDIS_URL` takes precedence over the supplied
/// address; bare `host:port` values get the redis scheme prefixed.
pub fn create_pool(addr: &str) -> anyhow::Result<Pool> {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| addr.to_string());
    let url = if url.contains("://") {
        url
    } else {
        format!("redis://{url}")
    };
    RedisConfig::from_url(url)
        .create_pool(None)
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}
