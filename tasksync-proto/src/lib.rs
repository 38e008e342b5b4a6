//! Shared protocol definitions for the `TaskSync` batch sync wire format.

pub mod batch;
pub mod codec;
pub mod mutation;
pub mod task;
