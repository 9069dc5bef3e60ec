pub mod logger;
pub mod panic;

pub use logger::init_logger;
pub use panic::panic_message;
