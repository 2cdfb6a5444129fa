//! Transport implementations
//!
//! - [`ReplayTransport`] plays back a byte capture recorded from a gateway board
//! - [`MemoryTransport`] is fed from code, for tests and simulations
//!
//! A physical serial port driver plugs in by implementing
//! [`Transport`](crate::transport::Transport).

pub mod memory;
pub mod replay;

pub use memory::{LinkFeeder, MemoryTransport, WrittenFrames};
pub use replay::ReplayTransport;
