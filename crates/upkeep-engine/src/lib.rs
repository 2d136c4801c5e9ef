mod engine;
mod feedback;
mod inventory;
mod pending;
mod recovery;
mod trace;

pub use engine::{CommitReport, EngineContext, ReconciliationEngine};
pub use feedback::{normalize_narration, NarrationSink};
pub use inventory::{HostInventory, InstalledItem, MemoryInventory};
pub use pending::{PendingBuffer, PendingOperation};
pub use recovery::INCOMPLETE_MESSAGE;
pub use trace::{capture_trace, TraceFrame};
