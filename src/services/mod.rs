pub mod credit;
pub mod queue;
pub mod scan_orchestrator;
pub mod sweep;
#[cfg(test)]
pub mod testing;

pub use credit::CreditEngine;
pub use queue::QueueEngine;
pub use scan_orchestrator::ScanOrchestrator;
pub use sweep::SweepEngine;
