//! tagcast-services: runtime half of tagcast. Frame sources, the dispatch barrier,
//! send workers over UDP, the frame pipeline, and the collector.

pub mod barrier;
pub mod collector;
pub mod pipeline;
pub mod provider;
pub mod stats;
pub mod transport;
pub mod worker;

pub use barrier::{BarrierError, BarrierPhase, BarrierState, DispatchBarrier, DispatchPermit};
pub use collector::{CameraStats, CameraTable, Collector, TagWindow, WindowRecord, WindowSink};
pub use pipeline::{FrameReport, Pipeline, PipelineError};
pub use provider::{
    ConfiguredProvider, FrameProvider, ProviderError, RawFileProvider, SyntheticProvider,
};
pub use stats::{PipelineStats, StatsSnapshot};
pub use transport::{
    send_with_retry, RetryPolicy, SendFailure, Transport, TransportError, UdpTransport,
};
pub use worker::{BufferPool, PooledBuffer, SendWorker, WorkerError};
