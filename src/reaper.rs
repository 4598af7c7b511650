use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime};
use tracing::{info, warn};

use crate::engine::Engine;

/// Time from `now` until the next `hour:00` local time.
pub fn until_next_run(now: NaiveDateTime, hour: u32) -> Duration {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let mut next = now.date().and_time(at);
    if next <= now {
        next += chrono::Duration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// Background task that sweeps stale pending bookings once a day.
pub async fn run_cleanup_scheduler(engine: Arc<Engine>, hour: u32) {
    loop {
        let wait = until_next_run(Local::now().naive_local(), hour);
        tokio::time::sleep(wait).await;
        let as_of = engine.today();
        match engine.run_auto_cleanup(as_of).await {
            Ok(n) => info!("daily cleanup as of {as_of}: {n} bookings"),
            Err(e) => warn!("daily cleanup failed: {e}"),
        }
    }
}

/// Background task that rewrites the WAL once enough appends piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::EngineConfig;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("staybook_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn next_run_later_today() {
        assert_eq!(
            until_next_run(at("2025-08-01 01:30"), 3),
            Duration::from_secs(90 * 60)
        );
    }

    #[test]
    fn next_run_tomorrow_once_passed() {
        assert_eq!(
            until_next_run(at("2025-08-01 03:00"), 3),
            Duration::from_secs(24 * 3600)
        );
        assert_eq!(
            until_next_run(at("2025-08-01 23:00"), 3),
            Duration::from_secs(4 * 3600)
        );
    }

    #[tokio::test]
    async fn scheduled_sweep_uses_engine_clock() {
        let path = test_wal_path("sweep.wal");
        let clock = Arc::new(FixedClock::on("2025-07-01".parse().unwrap()));
        let engine = Engine::new(
            path,
            Arc::new(NotifyHub::new()),
            EngineConfig::default(),
            clock.clone(),
        )
        .unwrap();
        let view = engine
            .create_booking(BookingRequest {
                first_name: "Klara".into(),
                email: "klara@example.com".into(),
                start: "2025-07-10".parse().unwrap(),
                end: "2025-07-12".parse().unwrap(),
                party_size: 2,
                affiliation: Party::Angelika,
                description: None,
                long_stay_confirmed: false,
            })
            .await
            .unwrap();

        assert_eq!(engine.run_auto_cleanup(engine.today()).await.unwrap(), 0);
        clock.set_today("2025-07-13".parse().unwrap());
        assert_eq!(engine.run_auto_cleanup(engine.today()).await.unwrap(), 1);
        assert_eq!(
            engine.get_booking(view.id()).await.unwrap().status(),
            Status::Canceled
        );
    }
}
