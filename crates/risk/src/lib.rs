pub mod diversity;
pub mod manager;

pub use diversity::DiversityWindow;
pub use manager::{RiskConfig, RiskEngine};
