use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use dispatch_core::{
    errors::{DispatchError, DispatchResult},
    models::{entry_step, join_triggers, DispatchJob, JobContext},
    traits::{FlowJobRepository, JobOutcomeHandler},
};

/// 序列记录的结果回写与链式推进
///
/// 发送成功后：有下一个触发器且本序列中存在对应的待激活记录时激活它；
/// 否则该联系人在本序列中结束，移除已满足的触发器，若下一个触发器是
/// 另一个活跃序列的入口，则写入联系人的触发器列表，由下一个调度周期入组。
pub struct SequenceOutcomeHandler {
    repo: Arc<dyn FlowJobRepository>,
}

impl SequenceOutcomeHandler {
    pub fn new(repo: Arc<dyn FlowJobRepository>) -> Self {
        Self { repo }
    }

    async fn finish_contact(
        &self,
        sequence_id: &str,
        contact_phone: &str,
        current_trigger: &str,
        next_trigger: Option<&str>,
        now: DateTime<Utc>,
    ) -> DispatchResult<()> {
        let completed = self
            .repo
            .complete_contact(sequence_id, contact_phone, now)
            .await?;
        debug!(sequence_id, contact_phone, completed, "联系人在序列中完成");

        let Some(contact) = self.repo.get_contact(contact_phone).await? else {
            return Ok(());
        };

        let steps = self.repo.sequence_steps(sequence_id).await?;
        let entry_trigger = entry_step(&steps).map(|s| s.trigger.clone());
        let mut triggers: Vec<String> = contact
            .trigger_list()
            .into_iter()
            .filter(|t| t != current_trigger && Some(t) != entry_trigger.as_ref())
            .collect();

        if let Some(next) = next_trigger {
            if let Some(target) = self.repo.find_entry_sequence(next).await? {
                if target.id != sequence_id && !triggers.iter().any(|t| t == next) {
                    info!(
                        from = sequence_id,
                        to = %target.id,
                        contact_phone,
                        "联系人转入下一个序列"
                    );
                    triggers.push(next.to_string());
                }
            }
        }

        let updated = join_triggers(&triggers);
        if updated != contact.triggers {
            self.repo
                .update_contact_triggers(contact_phone, &updated)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobOutcomeHandler for SequenceOutcomeHandler {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn on_sent(&self, job: &DispatchJob, device_id: &str) -> DispatchResult<()> {
        let JobContext::Sequence {
            sequence_id,
            contact_phone,
            current_trigger,
            next_trigger,
            claimed_device_id,
        } = &job.context
        else {
            return Err(not_a_sequence_job(job));
        };

        let now = Utc::now();
        // 认领已被超时回收，记录状态以回收结果为准，不再推进
        if !self
            .repo
            .mark_sent(&job.id, claimed_device_id, device_id, now)
            .await?
        {
            return Ok(());
        }

        if let Some(next) = next_trigger.as_deref() {
            if self
                .repo
                .activate_next_step(sequence_id, contact_phone, next, now)
                .await?
            {
                debug!(sequence_id, next_trigger = next, "已激活下一步骤");
                return Ok(());
            }
        }

        self.finish_contact(
            sequence_id,
            contact_phone,
            current_trigger,
            next_trigger.as_deref(),
            now,
        )
        .await
    }

    async fn on_failed(&self, job: &DispatchJob, reason: &str) -> DispatchResult<()> {
        let JobContext::Sequence {
            claimed_device_id, ..
        } = &job.context
        else {
            return Err(not_a_sequence_job(job));
        };
        self.repo
            .mark_failed(&job.id, claimed_device_id, reason)
            .await?;
        Ok(())
    }
}

fn not_a_sequence_job(job: &DispatchJob) -> DispatchError {
    DispatchError::Internal(format!("任务 {} 不是序列任务", job.id))
}
