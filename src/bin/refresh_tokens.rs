// Refreshes the `at`/`st` session cookies.
// stdout carries only `FRESH_AT=`/`FRESH_ST=` lines; diagnostics go to stderr.

use std::process::ExitCode;

use slot_sniper::{init_logging, CredentialRefresher, HttpSessionBrowser, RefreshError, SessionTokens};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init_logging();

    let current = match SessionTokens::from_env() {
        Ok(tokens) => tokens,
        Err(e) => {
            error!(error = %e, "missing AT or ST");
            return ExitCode::FAILURE;
        }
    };

    let refresher = CredentialRefresher::new(HttpSessionBrowser::default());
    match refresher.refresh(&current).await {
        Ok(refreshed) => {
            for line in refreshed.export_lines() {
                println!("{line}");
            }
            info!("AT {}", change_label(refreshed.at_changed));
            info!("ST {}", change_label(refreshed.st_changed));
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "refresh failed");
            if matches!(e, RefreshError::ExtractionFailed | RefreshError::LoggedOut) {
                error!("AT and ST need to be updated manually");
            }
            ExitCode::FAILURE
        }
    }
}

fn change_label(changed: bool) -> &'static str {
    if changed {
        "REFRESHED"
    } else {
        "unchanged"
    }
}
