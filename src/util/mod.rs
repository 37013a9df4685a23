//! Small cross-cutting helpers shared by the forwarder's tasks.

pub mod logging;

pub use logging::{LogThrottle, PerfTimer, ThrottleManager};
