pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::MurmurConfig;
pub use error::{MurmurError, Result};
pub use types::*;
