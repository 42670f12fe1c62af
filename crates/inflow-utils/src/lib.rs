mod arrayvec;
mod assert;
mod namespace;
mod thread;
mod vsync;

pub use arrayvec::{ArrayStr, ArrayStrTooLong, ArrayVec};
pub use namespace::{SHORT_TYPENAME_CAP, ShortTypename, short_typename};
pub use thread::{ThreadPriority, thread_boot};
pub use vsync::vsync;
