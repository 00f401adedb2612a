//! # Dispatcher
//!
//! 读数分发模块。
//!
//! 负责：
//! - 每条读数同步写入时序库 (`TimeSeriesSink`)
//! - 模型相关读数异步提交到有界工作池，调用预测服务
//! - 写入失败不影响预测提交，预测失败不重试

pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod prediction;
pub mod sinks;

pub use contracts::{PredictionClient, TimeSeriesSink};
pub use dispatcher::{ConfiguredSink, FanoutDispatcher, create_time_series_sink};
pub use error::DispatcherError;
pub use metrics::{PoolMetrics, PoolSnapshot, SinkMetrics, SinkSnapshot};
pub use pool::{IDLE_WORKER_KEEP_ALIVE, PredictionTask, ShutdownReport, WorkerPool};
pub use prediction::{
    HttpPredictionClient, LogPredictionClient, RecordedPrediction, RecordingPredictionClient,
};
pub use sinks::{InfluxSink, LogSink, MemorySink};
