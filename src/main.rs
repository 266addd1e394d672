use generational_pool::{ProducerConfig, TaskProducer, WorkerPool};
use std::{sync::Arc, time::Duration};
use tokio::runtime::Builder;
use tracing::info;
use tracing_subscriber::EnvFilter;


fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let seconds: u64 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(60);

    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        let pool = Arc::new(WorkerPool::new(3, true)?);
        let producer = TaskProducer::spawn(Arc::clone(&pool), ProducerConfig::default());

        let monitor = pool.start_monitoring(Duration::from_secs(10), |snapshot| {
            info!(
                scheduled = snapshot.scheduled_count,
                completed = snapshot.completed_count,
                avg_young_queue = snapshot.avg_young_queue_size,
                "telemetry"
            );
        });

        tokio::time::sleep(Duration::from_secs(seconds)).await;

        producer.terminate(true).await;
        WorkerPool::stop_monitoring(monitor);

        println!();
        println!("{}", pool.telemetry_snapshot());
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
