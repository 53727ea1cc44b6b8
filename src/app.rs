use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dispatch_core::{
    config::{AppConfig, CoordinationBackend, CoordinationConfig},
    models::QueueKind,
    traits::{CoordinationStore, JobOutcomeHandler},
};
use dispatch_dispatcher::{
    run_periodic, CampaignDispatcher, CampaignOutcomeHandler, DeviceDirectory,
    DeviceHealthMonitor, DeviceReservationService, PeriodicTask, SequenceOutcomeHandler,
    SequenceStepScheduler,
};
use dispatch_infrastructure::{DatabaseManager, InMemoryCoordinationStore, RedisCoordinationStore};
use dispatch_worker::{DispatchWorkerPool, HttpMessageSender, PacingPolicy, WorkerStatusBoard};
use tracing::{error, info, warn};

use crate::shutdown::ShutdownManager;

/// 主应用程序
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    store: Arc<dyn CoordinationStore>,
    directory: Arc<DeviceDirectory>,
    sequence_pool: Arc<DispatchWorkerPool>,
    campaign_pool: Arc<DispatchWorkerPool>,
}

impl Application {
    /// 创建应用实例并装配所有组件
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("连接数据库: {}", mask_database_url(&config.database.url));
        let database = DatabaseManager::from_config(&config.database)
            .await
            .context("连接数据库失败")?;

        let store = create_coordination_store(&config.coordination).await?;

        let directory = Arc::new(DeviceDirectory::new(database.device_catalog()));
        match directory.refresh().await {
            Ok(count) => info!("加载在线设备 {} 个", count),
            Err(e) => warn!("首次加载设备列表失败: {}", e),
        }

        let reserver = Arc::new(DeviceReservationService::new(
            Arc::clone(&store),
            Arc::clone(&directory),
            &config.rate_limit,
            &config.reservation,
        ));
        let sender =
            Arc::new(HttpMessageSender::new(&config.sender).context("创建消息发送客户端失败")?);
        let status_board = Arc::new(WorkerStatusBoard::new());

        let worker_pool = &config.worker_pool;
        let build_pool = |queue: QueueKind, workers: usize, outcome: Arc<dyn JobOutcomeHandler>| {
            Arc::new(
                DispatchWorkerPool::builder(queue)
                    .workers(workers)
                    .capacity(worker_pool.queue_capacity)
                    .pacing(PacingPolicy::random(
                        worker_pool.min_delay_seconds,
                        worker_pool.max_delay_seconds,
                    ))
                    .status_board(Arc::clone(&status_board))
                    .build(reserver.clone(), sender.clone(), outcome),
            )
        };
        let sequence_outcome: Arc<dyn JobOutcomeHandler> =
            Arc::new(SequenceOutcomeHandler::new(database.flow_job_repository()));
        let campaign_outcome: Arc<dyn JobOutcomeHandler> =
            Arc::new(CampaignOutcomeHandler::new(database.broadcast_repository()));
        let sequence_pool = build_pool(
            QueueKind::Sequence,
            worker_pool.sequence_workers,
            sequence_outcome,
        );
        let campaign_pool = build_pool(
            QueueKind::Campaign,
            worker_pool.campaign_workers,
            campaign_outcome,
        );

        Ok(Self {
            config,
            database,
            store,
            directory,
            sequence_pool,
            campaign_pool,
        })
    }

    /// 启动发送队列与周期任务，收到关闭信号后排空队列
    pub async fn run(&self, shutdown: ShutdownManager) -> Result<()> {
        info!("启动分发服务，协调存储: {}", self.store.backend_name());
        self.sequence_pool.start();
        self.campaign_pool.start();

        let mut handles = Vec::new();
        for (task, period) in self.periodic_tasks() {
            let shutdown_rx = shutdown.subscribe().await;
            handles.push(tokio::spawn(run_periodic(task, period, shutdown_rx)));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("周期任务异常退出: {}", e);
            }
        }

        info!("周期任务已停止，等待发送队列排空");
        self.sequence_pool.close();
        self.campaign_pool.close();
        tokio::join!(self.sequence_pool.join(), self.campaign_pool.join());

        self.database.close().await;
        info!("分发服务已停止");
        Ok(())
    }

    fn periodic_tasks(&self) -> Vec<(Arc<dyn PeriodicTask>, Duration)> {
        let config = &self.config;
        let tick = Duration::from_secs(config.scheduler.tick_interval_seconds);

        let cache_refresh: Arc<dyn PeriodicTask> = self.directory.clone();
        let mut tasks = vec![(
            cache_refresh,
            Duration::from_secs(config.reservation.device_cache_refresh_seconds),
        )];

        if config.health.enabled {
            let monitor: Arc<dyn PeriodicTask> = Arc::new(DeviceHealthMonitor::new(
                Arc::clone(&self.store),
                Arc::clone(&self.directory),
                &config.rate_limit,
                config.health.clone(),
            ));
            tasks.push((monitor, Duration::from_secs(config.health.interval_seconds)));
        }

        if config.scheduler.enabled {
            let scheduler: Arc<dyn PeriodicTask> = Arc::new(SequenceStepScheduler::new(
                self.database.flow_job_repository(),
                Arc::clone(&self.store),
                Arc::clone(&self.directory),
                self.sequence_pool.clone(),
                &config.rate_limit,
                config.scheduler.clone(),
            ));
            tasks.push((scheduler, tick));
        } else {
            info!("序列调度已禁用");
        }

        if config.scheduler.campaign_enabled {
            let campaign: Arc<dyn PeriodicTask> = Arc::new(CampaignDispatcher::new(
                self.database.broadcast_repository(),
                self.campaign_pool.clone(),
                config.scheduler.clone(),
            ));
            tasks.push((campaign, tick));
        }

        tasks
    }
}

/// 创建协调存储
async fn create_coordination_store(
    config: &CoordinationConfig,
) -> Result<Arc<dyn CoordinationStore>> {
    match config.backend {
        CoordinationBackend::Redis => {
            info!("连接Redis: {}:{}", config.redis.host, config.redis.port);
            let store = RedisCoordinationStore::new(&config.redis)
                .await
                .context("连接Redis失败")?;
            Ok(Arc::new(store))
        }
        CoordinationBackend::Memory => {
            warn!("使用进程内协调存储，仅适用于单实例部署");
            Ok(Arc::new(InMemoryCoordinationStore::new()))
        }
    }
}

/// 屏蔽数据库URL中的敏感信息
fn mask_database_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let mut masked = url.to_string();
            masked.replace_range(colon_pos + 1..at_pos, "***");
            return masked;
        }
    }
    url.to_string()
}
