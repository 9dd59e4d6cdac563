pub mod bus;
pub mod event;
pub mod persist;

pub use bus::EventBus;
pub use event::Event;

pub mod prelude {
    pub use crate::{Event, EventBus};
}
