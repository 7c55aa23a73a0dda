//! Ports - 外部との境界
//!
//! Broker は `queue` に、Clock はここに置く。

pub mod clock;

pub use self::clock::{Clock, FixedClock, SystemClock};
