//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Calculate the reconnect delay for the given attempt number.
///
/// `delay = min(base * multiplier^attempt * jitter, max)` where jitter is a
/// uniform draw from `[1.0, 1.0 + cfg.jitter)`. Jitter only ever lengthens
/// the delay, so the pre-jitter exponential curve is a floor until the cap
/// kicks in.
pub fn reconnect_delay(attempt: u32, cfg: &ReconnectConfig) -> Duration {
    let exponential = cfg.base_delay_ms as f64 * cfg.multiplier.powi(attempt as i32);

    let jitter = if cfg.jitter > 0.0 {
        rand::thread_rng().gen_range(1.0..1.0 + cfg.jitter)
    } else {
        1.0
    };

    let delay_ms = (exponential * jitter).min(cfg.max_delay_ms as f64);

    Duration::from_millis(delay_ms as u64)
}
