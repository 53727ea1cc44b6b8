mod support;

use anyhow::Result;
use chrono::Utc;
use dispatch_core::{
    models::{BroadcastStatus, JobContext, PacingRange, QueueKind},
    traits::{BroadcastRepository, JobOutcomeHandler},
};
use dispatch_dispatcher::{CampaignDispatcher, CampaignOutcomeHandler};
use std::sync::Arc;
use support::{database, scheduler_config, RecordingSink};

const BROADCAST_SEED: &str = r#"
INSERT INTO broadcast_messages (id, campaign_id, preferred_device_id, recipient_phone,
                                recipient_name, content, min_delay_seconds, max_delay_seconds,
                                status, scheduled_at, processing_started_at)
VALUES
    ('m1', 'c1', 'dev-a', '60100', 'Alice', 'promo', 5, 15, 'pending',
     '2000-01-01T00:00:00+00:00', NULL),
    ('m2', 'c1', NULL, '60200', 'Bob', 'promo', 0, 0, 'pending',
     '2999-01-01T00:00:00+00:00', NULL),
    ('m3', 'c1', NULL, '60300', 'Carol', 'promo', 0, 0, 'processing',
     '2000-01-01T00:00:00+00:00', '2000-01-01T00:00:00+00:00');
"#;

#[tokio::test]
async fn test_campaign_tick_recovers_and_claims_due_messages() -> Result<()> {
    let db = database(BROADCAST_SEED).await?;
    let repo = db.broadcast_repository();
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = CampaignDispatcher::new(repo.clone(), sink.clone(), scheduler_config());

    let report = dispatcher.tick().await?;
    assert_eq!(report.recovered, 1);
    assert_eq!(report.claimed, 1);
    assert_eq!(report.errors, 0);

    let jobs = sink.take();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.id, "m1");
    assert_eq!(job.queue, QueueKind::Campaign);
    assert_eq!(job.preferred_device_id.as_deref(), Some("dev-a"));
    assert_eq!(job.pacing, Some(PacingRange::new(5, 15)));
    assert!(matches!(&job.context, JobContext::Campaign { campaign_id } if campaign_id == "c1"));

    let stuck = repo.get_message("m3").await?.expect("m3");
    assert_eq!(stuck.status, BroadcastStatus::Failed);
    assert_eq!(
        repo.get_message("m2").await?.expect("m2").status,
        BroadcastStatus::Pending
    );

    // 已认领的消息不会被再次派发
    assert_eq!(dispatcher.tick().await?.claimed, 0);
    Ok(())
}

#[tokio::test]
async fn test_campaign_outcomes_are_written_back() -> Result<()> {
    let db = database(BROADCAST_SEED).await?;
    let repo = db.broadcast_repository();
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = CampaignDispatcher::new(repo.clone(), sink.clone(), scheduler_config());
    let handler = CampaignOutcomeHandler::new(repo.clone());

    dispatcher.tick().await?;
    let job = sink.take().remove(0);
    handler.on_sent(&job, "dev-b").await?;

    let sent = repo.get_message("m1").await?.expect("m1");
    assert_eq!(sent.status, BroadcastStatus::Sent);
    assert!(sent.sent_at.is_some());
    assert!(sent.sent_at.unwrap() <= Utc::now());

    // 已完成的消息不再被迟到的失败结果覆盖
    handler.on_failed(&job, "gateway rejected").await?;
    let still_sent = repo.get_message("m1").await?.expect("m1");
    assert_eq!(still_sent.status, BroadcastStatus::Sent);
    assert_eq!(still_sent.error_message, None);
    Ok(())
}

#[tokio::test]
async fn test_campaign_failure_is_written_back() -> Result<()> {
    let db = database(BROADCAST_SEED).await?;
    let repo = db.broadcast_repository();
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = CampaignDispatcher::new(repo.clone(), sink.clone(), scheduler_config());
    let handler = CampaignOutcomeHandler::new(repo.clone());

    dispatcher.tick().await?;
    let job = sink.take().remove(0);
    handler.on_failed(&job, "gateway rejected").await?;

    let failed = repo.get_message("m1").await?.expect("m1");
    assert_eq!(failed.status, BroadcastStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("gateway rejected"));
    Ok(())
}

#[tokio::test]
async fn test_campaign_waits_for_free_slots() -> Result<()> {
    let db = database(BROADCAST_SEED).await?;
    let repo = db.broadcast_repository();
    let sink = Arc::new(RecordingSink::with_slots(0));
    let dispatcher = CampaignDispatcher::new(repo.clone(), sink.clone(), scheduler_config());

    let report = dispatcher.tick().await?;
    assert_eq!(report.recovered, 1);
    assert_eq!(report.claimed, 0);
    assert!(sink.take().is_empty());
    assert_eq!(
        repo.get_message("m1").await?.expect("m1").status,
        BroadcastStatus::Pending
    );

    sink.set_slots(1);
    assert_eq!(dispatcher.tick().await?.claimed, 1);
    Ok(())
}
