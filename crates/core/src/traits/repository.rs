//! 持久化存储接口
//!
//! - `FlowJobRepository` - 序列入组、卡住认领的清理、到期记录的条件认领、结果回写与链式激活
//! - `BroadcastRepository` - 活动广播消息的清理、认领与结果回写
//!
//! 多进程之间的互斥只依赖条件更新（`WHERE ... IS NULL` / `WHERE status = 'pending'`），
//! 认领返回 `false` 表示被其他进程抢先，调用方直接跳过。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::errors::DispatchResult;
use crate::models::{BroadcastMessage, Contact, DueFlowJob, FlowJob, Sequence, SequenceStep};

#[async_trait]
pub trait FlowJobRepository: Send + Sync {
    async fn active_sequences(&self) -> DispatchResult<Vec<Sequence>>;

    /// 按 `step_order` 升序
    async fn sequence_steps(&self, sequence_id: &str) -> DispatchResult<Vec<SequenceStep>>;

    /// 触发器列表包含 `entry_trigger` 且在该序列中没有任何记录的联系人
    async fn find_enrollment_candidates(
        &self,
        sequence_id: &str,
        entry_trigger: &str,
    ) -> DispatchResult<Vec<Contact>>;

    /// 单个事务内为每个步骤插入一条记录，冲突时跳过；返回实际插入的行数
    async fn enroll_contact(
        &self,
        sequence_id: &str,
        steps: &[SequenceStep],
        contact: &Contact,
        now: DateTime<Utc>,
    ) -> DispatchResult<u64>;

    /// 认领时间早于 `cutoff` 的活跃记录置为失败并清空认领字段
    async fn release_stuck_claims(&self, cutoff: DateTime<Utc>) -> DispatchResult<u64>;

    /// 每个设备当前处理中的记录数
    async fn in_flight_counts(&self) -> DispatchResult<HashMap<String, i64>>;

    /// 按序列优先级降序、`next_trigger_time` 升序
    async fn find_due_jobs(&self, now: DateTime<Utc>, limit: i64)
        -> DispatchResult<Vec<DueFlowJob>>;

    async fn claim_job(&self, id: &str, device_id: &str, now: DateTime<Utc>)
        -> DispatchResult<bool>;

    /// 仅当记录仍由 `claimed_device_id` 持有认领时生效；认领已被回收时返回 false
    async fn mark_sent(
        &self,
        id: &str,
        claimed_device_id: &str,
        sent_device_id: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<bool>;

    /// 同 [`mark_sent`](Self::mark_sent)，认领失效时不覆盖记录
    async fn mark_failed(
        &self,
        id: &str,
        claimed_device_id: &str,
        reason: &str,
    ) -> DispatchResult<bool>;

    /// 激活同一序列中 `current_trigger = next_trigger` 的待处理记录，
    /// 到期时间为 `now + delay_hours`；不存在时返回 false
    async fn activate_next_step(
        &self,
        sequence_id: &str,
        contact_phone: &str,
        next_trigger: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<bool>;

    /// 联系人在该序列中剩余的待处理/活跃记录全部置为完成
    async fn complete_contact(
        &self,
        sequence_id: &str,
        contact_phone: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<u64>;

    async fn get_contact(&self, phone: &str) -> DispatchResult<Option<Contact>>;

    async fn update_contact_triggers(&self, phone: &str, triggers: &str) -> DispatchResult<()>;

    /// 以 `trigger` 为入口触发器的活跃序列
    async fn find_entry_sequence(&self, trigger: &str) -> DispatchResult<Option<Sequence>>;

    async fn get_job(&self, id: &str) -> DispatchResult<Option<FlowJob>>;
}

#[async_trait]
pub trait BroadcastRepository: Send + Sync {
    async fn release_stuck_messages(&self, cutoff: DateTime<Utc>) -> DispatchResult<u64>;

    /// `scheduled_at <= now` 的待发送消息，按 `scheduled_at` 升序
    async fn find_due_messages(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> DispatchResult<Vec<BroadcastMessage>>;

    async fn claim_message(&self, id: &str, now: DateTime<Utc>) -> DispatchResult<bool>;

    /// 仅更新仍处于处理中的消息；超时回收后的迟到结果返回 false
    async fn mark_message_sent(
        &self,
        id: &str,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<bool>;

    async fn mark_message_failed(&self, id: &str, reason: &str) -> DispatchResult<bool>;

    async fn get_message(&self, id: &str) -> DispatchResult<Option<BroadcastMessage>>;
}
