//! Генерационный пул потоков с приоритетами по ожидаемой длительности
//!
//! # Features
//! - Young generation: задачи с меньшим `wait_time` выполняются раньше
//! - Aging: задача, прождавшая дольше `2 * wait_time`, переезжает в old generation
//!   и обслуживается отдельным воркером
//! - Кооперативная пауза и возобновление
//! - Два режима завершения: немедленный и с дренированием очередей
//! - Телеметрия: простой, средние размеры очередей, время выполнения

pub mod errors;
pub mod handle;
pub mod model;
pub mod pool;
pub mod producer;
pub mod queue;
pub mod task;
pub mod telemetry;

pub use errors::{PoolError, QueueError, TaskError, TaskResult};
pub use handle::JoinHandle;
pub use model::{Generation, PoolState, TelemetrySnapshot};
pub use pool::{Config, WorkerPool};
pub use producer::{ProducerConfig, TaskProducer};
pub use queue::{Comparator, PriorityQueue};
pub use task::Task;
