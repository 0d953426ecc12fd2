//! GSP backend implementations
//!
//! The software model is the only backend carried in-tree:
//! - **SoftwareCore**: simulated execution core with fault injection
//! - **SoftwareInterface**: counting power/clock interface
//! - **SoftwareBufferPool**: share-fd registry with a simulated IOMMU

pub mod dmabuf;
pub mod interface;
pub mod software;

pub use dmabuf::SoftwareBufferPool;
pub use interface::{InterfaceCounters, SoftwareInterface};
pub use software::{CounterSnapshot, IrqMode, SoftwareControl, SoftwareCore, TriggerFault};
