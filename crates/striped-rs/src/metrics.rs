//! Lightweight metrics hooks for recording fanout and child-subvolume events.

use std::sync::{Arc, OnceLock};

/// `IoOpType` describes a read or write operation.
#[derive(Copy, Clone, Debug)]
pub enum IoOpType {
    Read,
    Write,
}

/// `ChildOp` captures IO metrics for a single fop issued against one subvolume.
#[derive(Clone, Debug)]
pub struct ChildOp {
    pub subvolume: String,
    pub op: IoOpType,
    pub bytes: u64,
    pub latency_seconds: f64,
    pub error: bool,
}

/// `FanoutOp` captures metrics for a whole parent fop, after merging child replies.
#[derive(Clone, Debug)]
pub struct FanoutOp {
    pub fop: &'static str,
    pub op: IoOpType,
    pub bytes: u64,
    pub latency_seconds: f64,
    pub error: bool,
}

/// `MetricsSink` records fanout and child-subvolume operations from the engine.
pub trait MetricsSink: Send + Sync + 'static {
    /// `record_child_op` records a single child-subvolume IO event.
    fn record_child_op(&self, op: ChildOp);
    /// `record_fanout_op` records a merged parent-fop IO event.
    fn record_fanout_op(&self, op: FanoutOp);
}

static METRICS_SINK: OnceLock<Arc<dyn MetricsSink>> = OnceLock::new();

/// `install_metrics_sink` installs a global metrics sink for the engine.
///
/// # Arguments
/// * `sink` - Sink implementation to register.
///
/// # Returns
/// `true` if the sink was installed, `false` if one was already registered.
pub fn install_metrics_sink(sink: Arc<dyn MetricsSink>) -> bool {
    METRICS_SINK.set(sink).is_ok()
}

/// `is_enabled` reports whether a metrics sink has been installed.
pub fn is_enabled() -> bool {
    METRICS_SINK.get().is_some()
}

/// `record_child_op` forwards a child-subvolume operation to the installed sink.
pub fn record_child_op(op: ChildOp) {
    if let Some(sink) = METRICS_SINK.get() {
        sink.record_child_op(op);
    }
}

/// `record_fanout_op` forwards a merged parent-fop operation to the installed sink.
pub fn record_fanout_op(op: FanoutOp) {
    if let Some(sink) = METRICS_SINK.get() {
        sink.record_fanout_op(op);
    }
}
