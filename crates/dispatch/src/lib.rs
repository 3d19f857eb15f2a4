pub mod dispatcher;
pub mod gate;
pub mod spawner;

pub use dispatcher::{AccountDispatcher, CampaignCounters, CampaignRuntime, TargetQueue};
pub use gate::{AccountRateLimiter, SendGate};
pub use spawner::FleetDispatcherSpawner;
