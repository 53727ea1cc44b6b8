//! 表结构
//!
//! SQLite 中时间列使用 TEXT，所有时间值都由应用层绑定写入，
//! 保证比较时格式一致。

pub const POSTGRES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS devices (
    id TEXT PRIMARY KEY,
    name TEXT,
    status TEXT NOT NULL DEFAULT 'offline'
);

CREATE TABLE IF NOT EXISTS sequences (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    schedule_time TEXT,
    priority BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS sequence_steps (
    id TEXT PRIMARY KEY,
    sequence_id TEXT NOT NULL REFERENCES sequences(id),
    step_order BIGINT NOT NULL,
    trigger_name TEXT NOT NULL,
    next_trigger TEXT,
    delay_hours BIGINT NOT NULL DEFAULT 0,
    is_entry_point BOOLEAN NOT NULL DEFAULT FALSE,
    message_type TEXT NOT NULL DEFAULT 'text',
    content TEXT NOT NULL DEFAULT '',
    media_url TEXT,
    min_delay_seconds BIGINT NOT NULL DEFAULT 0,
    max_delay_seconds BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS contacts (
    phone TEXT PRIMARY KEY,
    name TEXT,
    preferred_device_id TEXT,
    triggers TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS flow_jobs (
    id TEXT PRIMARY KEY,
    sequence_id TEXT NOT NULL,
    step_id TEXT NOT NULL,
    contact_phone TEXT NOT NULL,
    contact_name TEXT,
    current_trigger TEXT NOT NULL,
    next_trigger TEXT,
    next_trigger_time TIMESTAMPTZ NOT NULL,
    status TEXT NOT NULL,
    processing_device_id TEXT,
    processing_started_at TIMESTAMPTZ,
    sent_device_id TEXT,
    error_message TEXT,
    sent_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL,
    UNIQUE (sequence_id, contact_phone, step_id)
);

CREATE INDEX IF NOT EXISTS idx_flow_jobs_due ON flow_jobs (status, next_trigger_time);
CREATE INDEX IF NOT EXISTS idx_flow_jobs_processing ON flow_jobs (processing_device_id);
CREATE INDEX IF NOT EXISTS idx_flow_jobs_sent ON flow_jobs (sent_device_id, sent_at);

CREATE TABLE IF NOT EXISTS broadcast_messages (
    id TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL,
    preferred_device_id TEXT,
    recipient_phone TEXT NOT NULL,
    recipient_name TEXT,
    message_type TEXT NOT NULL DEFAULT 'text',
    content TEXT NOT NULL DEFAULT '',
    media_url TEXT,
    min_delay_seconds BIGINT NOT NULL DEFAULT 0,
    max_delay_seconds BIGINT NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    scheduled_at TIMESTAMPTZ NOT NULL,
    processing_device_id TEXT,
    processing_started_at TIMESTAMPTZ,
    sent_device_id TEXT,
    error_message TEXT,
    sent_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_broadcast_due ON broadcast_messages (status, scheduled_at);
CREATE INDEX IF NOT EXISTS idx_broadcast_sent ON broadcast_messages (sent_device_id, sent_at);
"#;

pub const SQLITE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS devices (
    id TEXT PRIMARY KEY,
    name TEXT,
    status TEXT NOT NULL DEFAULT 'offline'
);

CREATE TABLE IF NOT EXISTS sequences (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    schedule_time TEXT,
    priority INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS sequence_steps (
    id TEXT PRIMARY KEY,
    sequence_id TEXT NOT NULL REFERENCES sequences(id),
    step_order INTEGER NOT NULL,
    trigger_name TEXT NOT NULL,
    next_trigger TEXT,
    delay_hours INTEGER NOT NULL DEFAULT 0,
    is_entry_point BOOLEAN NOT NULL DEFAULT 0,
    message_type TEXT NOT NULL DEFAULT 'text',
    content TEXT NOT NULL DEFAULT '',
    media_url TEXT,
    min_delay_seconds INTEGER NOT NULL DEFAULT 0,
    max_delay_seconds INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS contacts (
    phone TEXT PRIMARY KEY,
    name TEXT,
    preferred_device_id TEXT,
    triggers TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS flow_jobs (
    id TEXT PRIMARY KEY,
    sequence_id TEXT NOT NULL,
    step_id TEXT NOT NULL,
    contact_phone TEXT NOT NULL,
    contact_name TEXT,
    current_trigger TEXT NOT NULL,
    next_trigger TEXT,
    next_trigger_time TEXT NOT NULL,
    status TEXT NOT NULL,
    processing_device_id TEXT,
    processing_started_at TEXT,
    sent_device_id TEXT,
    error_message TEXT,
    sent_at TEXT,
    completed_at TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (sequence_id, contact_phone, step_id)
);

CREATE INDEX IF NOT EXISTS idx_flow_jobs_due ON flow_jobs (status, next_trigger_time);
CREATE INDEX IF NOT EXISTS idx_flow_jobs_processing ON flow_jobs (processing_device_id);
CREATE INDEX IF NOT EXISTS idx_flow_jobs_sent ON flow_jobs (sent_device_id, sent_at);

CREATE TABLE IF NOT EXISTS broadcast_messages (
    id TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL,
    preferred_device_id TEXT,
    recipient_phone TEXT NOT NULL,
    recipient_name TEXT,
    message_type TEXT NOT NULL DEFAULT 'text',
    content TEXT NOT NULL DEFAULT '',
    media_url TEXT,
    min_delay_seconds INTEGER NOT NULL DEFAULT 0,
    max_delay_seconds INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    scheduled_at TEXT NOT NULL,
    processing_device_id TEXT,
    processing_started_at TEXT,
    sent_device_id TEXT,
    error_message TEXT,
    sent_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_broadcast_due ON broadcast_messages (status, scheduled_at);
CREATE INDEX IF NOT EXISTS idx_broadcast_sent ON broadcast_messages (sent_device_id, sent_at);
"#;
