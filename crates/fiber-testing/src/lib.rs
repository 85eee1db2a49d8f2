//! Testing utilities and harness for the fiber reconciler.

pub mod renderer;
pub mod scheduler;

pub use renderer::{run_test_renderer, TestRenderer};
pub use scheduler::VirtualScheduler;

pub mod prelude {
    pub use crate::renderer::*;
    pub use crate::scheduler::*;
    pub use fiber_core::*;
}
