//! Common utilities for skylens.

mod buffer2;
pub mod parallel;
mod shared_fn;

pub use buffer2::Buffer2;
pub use shared_fn::SharedFn;
