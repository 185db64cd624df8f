//! Process orchestration: one cycle, a polling loop, or the query layer
//! with a background poller.

pub mod controller_handler;

pub use controller_handler::Controller;
