use thiserror::Error;

/// 分发核心错误类型定义
///
/// 锁竞争、超出限额、认领冲突属于正常结果，不在此处表达，
/// 它们以 [`ReserveAttempt`](crate::traits::ReserveAttempt) 或 `bool` 返回值的形式出现。
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("协调存储错误: {0}")]
    Store(String),

    #[error("没有可用设备: {0}")]
    NoDeviceAvailable(String),

    #[error("消息发送失败: {0}")]
    Transport(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("任务未找到: {id}")]
    JobNotFound { id: String },

    #[error("分发队列已关闭: {0}")]
    PoolClosed(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl DispatchError {
    /// 协调存储（锁/计数器后端）不可用
    pub fn store<E: std::fmt::Display>(err: E) -> Self {
        DispatchError::Store(err.to_string())
    }

    /// 是否为可重试的错误（设备耗尽、传输失败、存储暂时不可用）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::NoDeviceAvailable(_)
                | DispatchError::Transport(_)
                | DispatchError::Store(_)
                | DispatchError::Database(_)
        )
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
