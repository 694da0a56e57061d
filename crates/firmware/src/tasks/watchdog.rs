//! Watchdog keepalive task.
//!
//! Pets the independent watchdog at half its timeout for the life of the
//! firmware. The IWDG cannot be disarmed once unleashed, so the keepalive
//! never stands down; it proves the executor is scheduling, nothing more.
//! A starved watchdog is handled by its owner (hardware reset), never by
//! this task. Control-loop stalls are covered separately by the converters'
//! own command watchdogs.

use embassy_time::{Duration, Timer};
use platform::Watchdog;

/// Pet `wdg` every `timeout_ms / 2`, forever.
pub async fn keepalive<W: Watchdog>(wdg: &mut W) -> ! {
    let interval = Duration::from_millis(wdg.timeout_ms() / 2);
    loop {
        wdg.pet();
        Timer::after(interval).await;
    }
}
