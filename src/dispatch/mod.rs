//! Message dispatch by type id.

mod registry;

pub use registry::{DispatchStrategy, Dispatcher};
