use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::modules::raid_protection::detector::BurstDetector;

/// Windows with no event in this long are dropped entirely. Far larger than
/// any detection window, so an in-flight burst is never clipped.
const RETENTION_SECS: i64 = 600;

pub async fn sweep_windows(detector: &Arc<BurstDetector>) -> Result<(), crate::Error> {
    let before = detector.tracked_windows();

    detector.sweep(Utc::now(), Duration::seconds(RETENTION_SECS));

    let after = detector.tracked_windows();
    if before != after {
        log::info!("Evicted {} idle detection window(s)", before - after);
    }

    Ok(())
}
