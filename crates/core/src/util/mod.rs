pub mod clock;
pub mod ring_buffer;
pub mod stop;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ring_buffer::RingBuffer;
pub use stop::StopFlag;
