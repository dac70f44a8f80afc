//! innet-services — iteration kernels, the resumable controller, the chain
//! hop, and the UDP relay that drives it.

pub mod assembly;
pub mod hop;
pub mod iteration;
pub mod kernel;
pub mod relay;
pub mod stats;

pub use assembly::{Assembled, MessageAssembler};
pub use hop::{continuation_chunks, ChainHop, HopAction, HopError, HopOutput};
pub use iteration::{Advance, IterationController, StateError, StopReason};
pub use kernel::{
    IterationKernel, KernelError, Matrix, PowerIterationKernel, ScriptedKernel, StagedMixture,
    Step,
};
pub use relay::{HopRelay, RelaySettings};
pub use stats::{DropClass, HopStats, MessageTrace, StatsSnapshot};
