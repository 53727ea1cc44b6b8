use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_core::{
    errors::{DispatchError, DispatchResult},
    models::WindowKind,
    traits::{
        CoordinationStore, DeviceLock, HealthFlagStore, RateWindowStore, ReservationScript,
        ReserveAttempt, ReserveRequest,
    },
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::keys::KeyBuilder;

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    counters: HashMap<String, Expiring<i64>>,
    locks: HashMap<String, Expiring<String>>,
    failures: HashMap<String, Expiring<i64>>,
    disabled: HashMap<String, Expiring<()>>,
}

impl MemoryState {
    fn counter(&mut self, key: &str) -> i64 {
        let now = Instant::now();
        match self.counters.get(key) {
            Some(entry) if entry.is_live(now) => entry.value,
            Some(_) => {
                self.counters.remove(key);
                0
            }
            None => 0,
        }
    }

    fn incr(&mut self, key: &str, ttl: Duration) -> i64 {
        let current = self.counter(key);
        match self.counters.get_mut(key) {
            Some(entry) => {
                entry.value = current + 1;
                entry.value
            }
            None => {
                self.counters.insert(key.to_string(), Expiring::new(1, ttl));
                1
            }
        }
    }

    fn decr(&mut self, key: &str) -> i64 {
        let current = self.counter(key);
        match self.counters.get_mut(key) {
            Some(entry) if current > 0 => {
                entry.value = current - 1;
                entry.value
            }
            _ => 0,
        }
    }

    fn lock_owner(&mut self, key: &str) -> Option<&str> {
        let now = Instant::now();
        if self
            .locks
            .get(key)
            .is_some_and(|entry| !entry.is_live(now))
        {
            self.locks.remove(key);
        }
        self.locks.get(key).map(|entry| entry.value.as_str())
    }

    fn try_lock(&mut self, key: &str, token: &str, ttl: Duration) -> bool {
        if self.lock_owner(key).is_some() {
            return false;
        }
        self.locks
            .insert(key.to_string(), Expiring::new(token.to_string(), ttl));
        true
    }
}

/// 进程内协调存储
///
/// 所有操作在同一把互斥锁下完成，因此预约脚本天然是原子的。
/// 仅在单进程内有效，多进程部署必须使用 Redis。
#[derive(Debug, Default)]
pub struct InMemoryCoordinationStore {
    keys: KeyBuilder,
    state: Mutex<MemoryState>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> DispatchResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| DispatchError::Store("in-memory coordination state poisoned".to_string()))
    }
}

#[async_trait]
impl RateWindowStore for InMemoryCoordinationStore {
    async fn increment(
        &self,
        device_id: &str,
        kind: WindowKind,
        at: DateTime<Utc>,
    ) -> DispatchResult<i64> {
        let key = self.keys.rate(device_id, kind, at);
        Ok(self.state()?.incr(&key, kind.ttl()))
    }

    async fn decrement(
        &self,
        device_id: &str,
        kind: WindowKind,
        at: DateTime<Utc>,
    ) -> DispatchResult<i64> {
        let key = self.keys.rate(device_id, kind, at);
        Ok(self.state()?.decr(&key))
    }

    async fn get(
        &self,
        device_id: &str,
        kind: WindowKind,
        at: DateTime<Utc>,
    ) -> DispatchResult<i64> {
        let key = self.keys.rate(device_id, kind, at);
        Ok(self.state()?.counter(&key))
    }

    async fn reset(&self, device_id: &str, at: DateTime<Utc>) -> DispatchResult<()> {
        let mut state = self.state()?;
        for kind in WindowKind::ALL {
            state.counters.remove(&self.keys.rate(device_id, kind, at));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceLock for InMemoryCoordinationStore {
    async fn try_acquire(
        &self,
        device_id: &str,
        token: &str,
        ttl: Duration,
    ) -> DispatchResult<bool> {
        let key = self.keys.lock(device_id);
        Ok(self.state()?.try_lock(&key, token, ttl))
    }

    async fn release(&self, device_id: &str, token: &str) -> DispatchResult<bool> {
        let key = self.keys.lock(device_id);
        let mut state = self.state()?;
        if state.lock_owner(&key) == Some(token) {
            state.locks.remove(&key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn is_held(&self, device_id: &str) -> DispatchResult<bool> {
        let key = self.keys.lock(device_id);
        Ok(self.state()?.lock_owner(&key).is_some())
    }
}

#[async_trait]
impl ReservationScript for InMemoryCoordinationStore {
    async fn try_reserve(&self, request: &ReserveRequest) -> DispatchResult<ReserveAttempt> {
        let lock_key = self.keys.lock(&request.device_id);
        let hour_key = self
            .keys
            .rate(&request.device_id, WindowKind::Hour, request.at);
        let day_key = self
            .keys
            .rate(&request.device_id, WindowKind::Day, request.at);

        let mut state = self.state()?;
        if !state.try_lock(&lock_key, &request.token, request.lock_ttl) {
            return Ok(ReserveAttempt::LockHeld);
        }

        let hour_count = state.incr(&hour_key, WindowKind::Hour.ttl());
        let day_count = state.incr(&day_key, WindowKind::Day.ttl());
        if hour_count > request.hourly_limit || day_count > request.daily_limit {
            let hour_count = state.decr(&hour_key);
            let day_count = state.decr(&day_key);
            state.locks.remove(&lock_key);
            return Ok(ReserveAttempt::OverLimit {
                hour_count,
                day_count,
            });
        }

        Ok(ReserveAttempt::Reserved {
            hour_count,
            day_count,
        })
    }
}

#[async_trait]
impl HealthFlagStore for InMemoryCoordinationStore {
    async fn record_failure(&self, device_id: &str, ttl: Duration) -> DispatchResult<i64> {
        let key = self.keys.health_failures(device_id);
        let mut state = self.state()?;
        let now = Instant::now();
        let current = state
            .failures
            .get(&key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value)
            .unwrap_or(0);
        state.failures.insert(key, Expiring::new(current + 1, ttl));
        Ok(current + 1)
    }

    async fn reset_failures(&self, device_id: &str) -> DispatchResult<()> {
        let key = self.keys.health_failures(device_id);
        self.state()?.failures.remove(&key);
        Ok(())
    }

    async fn disable(&self, device_id: &str, ttl: Duration) -> DispatchResult<()> {
        let key = self.keys.health_disabled(device_id);
        self.state()?.disabled.insert(key, Expiring::new((), ttl));
        Ok(())
    }

    async fn is_disabled(&self, device_id: &str) -> DispatchResult<bool> {
        let key = self.keys.health_disabled(device_id);
        let now = Instant::now();
        Ok(self
            .state()?
            .disabled
            .get(&key)
            .is_some_and(|entry| entry.is_live(now)))
    }
}

impl CoordinationStore for InMemoryCoordinationStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
