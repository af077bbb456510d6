//! Application wiring.

mod container;

pub use container::AppContext;
