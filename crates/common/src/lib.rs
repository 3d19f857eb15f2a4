pub mod clock;
pub mod config;
pub mod error;
pub mod rng;
pub mod telegram;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use rng::{RandomSource, SystemRandom};
pub use telegram::{MemberStore, TelegramClient};
pub use types::*;
