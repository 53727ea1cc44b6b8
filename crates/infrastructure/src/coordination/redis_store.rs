use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_core::{
    errors::{DispatchError, DispatchResult},
    models::WindowKind,
    traits::{
        CoordinationStore, DeviceLock, HealthFlagStore, RateWindowStore, ReservationScript,
        ReserveAttempt, ReserveRequest,
    },
    RedisConfig,
};
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::keys::KeyBuilder;

// KEYS: lock, hour counter, day counter
// ARGV: token, lock ttl (ms), hourly limit, daily limit, hour ttl (s), day ttl (s)
// Returns {status, hour, day}: 1 reserved, 0 lock held, 2 over limit
const RESERVE_SCRIPT: &str = r#"
if not redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
    return {0, 0, 0}
end
local h = redis.call('INCR', KEYS[2])
if redis.call('TTL', KEYS[2]) < 0 then
    redis.call('EXPIRE', KEYS[2], ARGV[5])
end
local d = redis.call('INCR', KEYS[3])
if redis.call('TTL', KEYS[3]) < 0 then
    redis.call('EXPIRE', KEYS[3], ARGV[6])
end
if h > tonumber(ARGV[3]) or d > tonumber(ARGV[4]) then
    redis.call('DECR', KEYS[2])
    redis.call('DECR', KEYS[3])
    redis.call('DEL', KEYS[1])
    return {2, h - 1, d - 1}
end
return {1, h, d}
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const INCREMENT_SCRIPT: &str = r#"
local v = redis.call('INCR', KEYS[1])
if redis.call('TTL', KEYS[1]) < 0 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return v
"#;

const DECREMENT_SCRIPT: &str = r#"
local v = tonumber(redis.call('GET', KEYS[1]) or '0')
if v <= 0 then
    return 0
end
return redis.call('DECR', KEYS[1])
"#;

// 每次失败都刷新过期时间
const RECORD_FAILURE_SCRIPT: &str = r#"
local v = redis.call('INCR', KEYS[1])
redis.call('EXPIRE', KEYS[1], ARGV[1])
return v
"#;

fn store_error(e: redis::RedisError) -> DispatchError {
    metrics::counter!("dispatch_coordination_errors_total", "backend" => "redis").increment(1);
    DispatchError::Store(e.to_string())
}

/// Redis-backed coordination store shared by every dispatcher process
pub struct RedisCoordinationStore {
    conn: ConnectionManager,
    keys: KeyBuilder,
    reserve_script: Script,
    release_script: Script,
    increment_script: Script,
    decrement_script: Script,
    record_failure_script: Script,
}

impl RedisCoordinationStore {
    pub async fn new(config: &RedisConfig) -> DispatchResult<Self> {
        Self::connect(&config.build_url(), config.key_prefix.clone()).await
    }

    pub async fn connect(url: &str, key_prefix: Option<String>) -> DispatchResult<Self> {
        info!("Connecting coordination store to Redis at {}", redact(url));
        let client = redis::Client::open(url).map_err(store_error)?;
        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(store_error)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(Self {
            conn,
            keys: KeyBuilder::new(key_prefix),
            reserve_script: Script::new(RESERVE_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
            increment_script: Script::new(INCREMENT_SCRIPT),
            decrement_script: Script::new(DECREMENT_SCRIPT),
            record_failure_script: Script::new(RECORD_FAILURE_SCRIPT),
        })
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }
}

fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[async_trait]
impl RateWindowStore for RedisCoordinationStore {
    async fn increment(
        &self,
        device_id: &str,
        kind: WindowKind,
        at: DateTime<Utc>,
    ) -> DispatchResult<i64> {
        let mut conn = self.conn.clone();
        self.increment_script
            .key(self.keys.rate(device_id, kind, at))
            .arg(kind.ttl().as_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn decrement(
        &self,
        device_id: &str,
        kind: WindowKind,
        at: DateTime<Utc>,
    ) -> DispatchResult<i64> {
        let mut conn = self.conn.clone();
        self.decrement_script
            .key(self.keys.rate(device_id, kind, at))
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn get(
        &self,
        device_id: &str,
        kind: WindowKind,
        at: DateTime<Utc>,
    ) -> DispatchResult<i64> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = redis::cmd("GET")
            .arg(self.keys.rate(device_id, kind, at))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(value.unwrap_or(0))
    }

    async fn reset(&self, device_id: &str, at: DateTime<Utc>) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(self.keys.rate(device_id, WindowKind::Hour, at))
            .arg(self.keys.rate(device_id, WindowKind::Day, at))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

#[async_trait]
impl DeviceLock for RedisCoordinationStore {
    async fn try_acquire(
        &self,
        device_id: &str,
        token: &str,
        ttl: Duration,
    ) -> DispatchResult<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(self.keys.lock(device_id))
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(result.is_some())
    }

    async fn release(&self, device_id: &str, token: &str) -> DispatchResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release_script
            .key(self.keys.lock(device_id))
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(deleted == 1)
    }

    async fn is_held(&self, device_id: &str) -> DispatchResult<bool> {
        let mut conn = self.conn.clone();
        let exists: i64 = redis::cmd("EXISTS")
            .arg(self.keys.lock(device_id))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(exists > 0)
    }
}

#[async_trait]
impl ReservationScript for RedisCoordinationStore {
    #[instrument(skip(self, request), fields(device_id = %request.device_id))]
    async fn try_reserve(&self, request: &ReserveRequest) -> DispatchResult<ReserveAttempt> {
        let mut conn = self.conn.clone();
        let result: Vec<i64> = self
            .reserve_script
            .key(self.keys.lock(&request.device_id))
            .key(self.keys.rate(&request.device_id, WindowKind::Hour, request.at))
            .key(self.keys.rate(&request.device_id, WindowKind::Day, request.at))
            .arg(&request.token)
            .arg(request.lock_ttl.as_millis() as u64)
            .arg(request.hourly_limit)
            .arg(request.daily_limit)
            .arg(WindowKind::Hour.ttl().as_secs())
            .arg(WindowKind::Day.ttl().as_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        let attempt = match result.as_slice() {
            [1, hour_count, day_count] => ReserveAttempt::Reserved {
                hour_count: *hour_count,
                day_count: *day_count,
            },
            [0, ..] => ReserveAttempt::LockHeld,
            [2, hour_count, day_count] => ReserveAttempt::OverLimit {
                hour_count: *hour_count,
                day_count: *day_count,
            },
            other => {
                return Err(DispatchError::Store(format!(
                    "unexpected reservation script reply: {other:?}"
                )))
            }
        };
        debug!(outcome = attempt.label(), "Reservation script finished");
        Ok(attempt)
    }
}

#[async_trait]
impl HealthFlagStore for RedisCoordinationStore {
    async fn record_failure(&self, device_id: &str, ttl: Duration) -> DispatchResult<i64> {
        let mut conn = self.conn.clone();
        self.record_failure_script
            .key(self.keys.health_failures(device_id))
            .arg(ttl.as_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn reset_failures(&self, device_id: &str) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(self.keys.health_failures(device_id))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn disable(&self, device_id: &str, ttl: Duration) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("SET")
            .arg(self.keys.health_disabled(device_id))
            .arg("1")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn is_disabled(&self, device_id: &str) -> DispatchResult<bool> {
        let mut conn = self.conn.clone();
        let exists: i64 = redis::cmd("EXISTS")
            .arg(self.keys.health_disabled(device_id))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(exists > 0)
    }
}

impl CoordinationStore for RedisCoordinationStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
