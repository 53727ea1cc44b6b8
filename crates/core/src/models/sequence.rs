use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// 多步骤序列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    /// 每日调度时间 "HH:MM"，为空表示随时可入组
    pub schedule_time: Option<String>,
    pub priority: i64,
}

impl Sequence {
    /// 当前时间是否在调度时间的容差范围内（跨午夜回绕）
    pub fn is_within_schedule(&self, now: DateTime<Utc>, tolerance_minutes: i64) -> bool {
        let Some(schedule) = self.schedule_time.as_deref() else {
            return true;
        };
        let Ok(target) = NaiveTime::parse_from_str(schedule.trim(), "%H:%M") else {
            return false;
        };

        let minutes_of = |t: NaiveTime| -> i64 {
            use chrono::Timelike;
            (t.hour() * 60 + t.minute()) as i64
        };
        let current = minutes_of(now.time());
        let scheduled = minutes_of(target);
        let diff = (current - scheduled).abs();
        diff.min(24 * 60 - diff) <= tolerance_minutes
    }
}

/// 序列中的单个步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStep {
    pub id: String,
    pub sequence_id: String,
    pub step_order: i64,
    pub trigger: String,
    pub next_trigger: Option<String>,
    pub delay_hours: i64,
    pub is_entry_point: bool,
    pub message_type: String,
    pub content: String,
    pub media_url: Option<String>,
    pub min_delay_seconds: i64,
    pub max_delay_seconds: i64,
}

/// 联系人（线索）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub phone: String,
    pub name: Option<String>,
    pub preferred_device_id: Option<String>,
    /// 逗号分隔的触发器列表
    pub triggers: String,
}

impl Contact {
    pub fn trigger_list(&self) -> Vec<String> {
        split_triggers(&self.triggers)
    }

    pub fn has_trigger(&self, trigger: &str) -> bool {
        self.trigger_list().iter().any(|t| t == trigger)
    }
}

/// 拆分逗号分隔的触发器列表，忽略空项
pub fn split_triggers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join_triggers(triggers: &[String]) -> String {
    triggers.join(",")
}

/// 序列的入口步骤；没有显式入口标记时取顺序最小的步骤
pub fn entry_step(steps: &[SequenceStep]) -> Option<&SequenceStep> {
    steps
        .iter()
        .find(|s| s.is_entry_point)
        .or_else(|| steps.iter().min_by_key(|s| s.step_order))
}
