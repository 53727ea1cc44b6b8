use anyhow::Result;
use chrono::Utc;
use dispatch_core::{
    models::WindowKind,
    traits::{DeviceLock, HealthFlagStore, RateWindowStore, ReservationScript, ReserveAttempt, ReserveRequest},
};
use dispatch_infrastructure::coordination::RedisCoordinationStore;
use std::sync::Arc;
use std::time::Duration;
use testcontainers_modules::redis::Redis;
use testcontainers_modules::testcontainers::runners::AsyncRunner;
use testcontainers_modules::testcontainers::ContainerAsync;
use uuid::Uuid;

async fn start_store() -> Result<(ContainerAsync<Redis>, RedisCoordinationStore)> {
    let container = Redis::default().start().await?;
    let port = container.get_host_port_ipv4(6379).await?;
    let prefix = format!("test-{}", Uuid::new_v4());
    let store =
        RedisCoordinationStore::connect(&format!("redis://127.0.0.1:{port}/0"), Some(prefix))
            .await?;
    Ok((container, store))
}

fn request(device_id: &str, hourly_limit: i64) -> ReserveRequest {
    ReserveRequest {
        device_id: device_id.to_string(),
        token: Uuid::new_v4().to_string(),
        lock_ttl: Duration::from_secs(30),
        hourly_limit,
        daily_limit: 800,
        at: Utc::now(),
    }
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_counters_set_ttl_and_roll_back() -> Result<()> {
    let (_container, store) = start_store().await?;
    let now = Utc::now();

    assert_eq!(store.increment("d1", WindowKind::Hour, now).await?, 1);
    assert_eq!(store.increment("d1", WindowKind::Hour, now).await?, 2);
    assert_eq!(store.decrement("d1", WindowKind::Hour, now).await?, 1);
    assert_eq!(store.get("d1", WindowKind::Hour, now).await?, 1);
    assert_eq!(store.get("d1", WindowKind::Day, now).await?, 0);
    assert_eq!(store.decrement("d1", WindowKind::Day, now).await?, 0);

    store.reset("d1", now).await?;
    assert_eq!(store.get("d1", WindowKind::Hour, now).await?, 0);
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_lock_release_is_owner_checked() -> Result<()> {
    let (_container, store) = start_store().await?;
    let ttl = Duration::from_secs(30);

    assert!(store.try_acquire("d1", "owner", ttl).await?);
    assert!(!store.try_acquire("d1", "other", ttl).await?);
    assert!(!store.release("d1", "other").await?);
    assert!(store.is_held("d1").await?);
    assert!(store.release("d1", "owner").await?);
    assert!(!store.is_held("d1").await?);

    assert!(store.try_acquire("d2", "owner", Duration::from_millis(100)).await?);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!store.release("d2", "owner").await?);
    Ok(())
}

/// 锁被占用时重试，拿到最终结果后立即释放锁
async fn reserve_until_decided(store: Arc<RedisCoordinationStore>, hourly_limit: i64) -> Result<ReserveAttempt> {
    loop {
        let req = request("d1", hourly_limit);
        match store.try_reserve(&req).await? {
            ReserveAttempt::LockHeld => tokio::time::sleep(Duration::from_millis(5)).await,
            outcome => {
                if outcome.is_reserved() {
                    store.release("d1", &req.token).await?;
                }
                return Ok(outcome);
            }
        }
    }
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_hourly_ceiling_two_with_three_concurrent_reserves() -> Result<()> {
    let (_container, store) = start_store().await?;
    let store = Arc::new(store);

    let outcomes = futures::future::try_join_all(
        (0..3).map(|_| reserve_until_decided(Arc::clone(&store), 2)),
    )
    .await?;

    let reserved = outcomes.iter().filter(|o| o.is_reserved()).count();
    let over_limit = outcomes
        .iter()
        .filter(|o| matches!(o, ReserveAttempt::OverLimit { .. }))
        .count();
    assert_eq!(reserved, 2);
    assert_eq!(over_limit, 1);
    assert_eq!(store.get("d1", WindowKind::Hour, Utc::now()).await?, 2);
    assert!(!store.is_held("d1").await?);
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_concurrent_reserves_never_share_a_device() -> Result<()> {
    let (_container, store) = start_store().await?;
    let store = Arc::new(store);

    let attempts = futures::future::join_all((0..20).map(|_| {
        let store = Arc::clone(&store);
        async move { store.try_reserve(&request("d1", 80)).await }
    }))
    .await;

    let reserved = attempts
        .into_iter()
        .filter_map(|a| a.ok())
        .filter(|a| a.is_reserved())
        .count();
    assert_eq!(reserved, 1);
    assert_eq!(store.get("d1", WindowKind::Hour, Utc::now()).await?, 1);
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_health_flags_expire() -> Result<()> {
    let (_container, store) = start_store().await?;

    assert_eq!(store.record_failure("d1", Duration::from_secs(60)).await?, 1);
    assert_eq!(store.record_failure("d1", Duration::from_secs(60)).await?, 2);
    store.reset_failures("d1").await?;
    assert_eq!(store.record_failure("d1", Duration::from_secs(60)).await?, 1);

    store.disable("d1", Duration::from_secs(1)).await?;
    assert!(store.is_disabled("d1").await?);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!store.is_disabled("d1").await?);
    Ok(())
}
