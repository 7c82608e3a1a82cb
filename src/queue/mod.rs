//! Task queues and capacity tickets.

pub mod router;

pub use router::{QueueRouter, scan_order};
