// Slot sniper: races a third-party booking platform for a recurring facility slot
// the moment it opens, plus the out-of-band session credential refresher.

pub mod booking_client;
pub mod config;
pub mod credentials;
pub mod orchestrator;
pub mod schedule;
pub mod slot_selector;

#[cfg(test)]
mod test_server;

pub use booking_client::{BookingApi, BookingError, BookingReceipt, ClientError, CultClient, ScheduleQuery};
pub use config::{ConfigError, Credentials, PlatformHeaders, RaceConfig, SessionTokens};
pub use credentials::{CredentialRefresher, HttpSessionBrowser, RefreshError, RefreshedTokens, SessionBrowser};
pub use orchestrator::{
    delay_until_release, target_date, warm_up_and_wait, RaceOrchestrator, RaceOutcome, RacePhase,
    WARM_UP_LEAD,
};
pub use schedule::{DayEntry, Schedule, Slot, SlotState, TimeEntry};
pub use slot_selector::{select_slot, SlotPreferences};

use tracing_subscriber::EnvFilter;

// Structured logs on stderr, `RUST_LOG` wins over the default `info`
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
