use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use staybook::clock::FixedClock;
use staybook::config::EngineConfig;
use staybook::engine::{Engine, EngineError};
use staybook::model::*;
use staybook::notify::NotifyHub;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

fn fresh_engine(label: &str) -> (Arc<Engine>, PathBuf) {
    let dir = std::env::temp_dir().join(format!("staybook_bench_{label}_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Engine::new(
        dir.join("bookings.wal"),
        Arc::new(NotifyHub::new()),
        EngineConfig::default(),
        Arc::new(FixedClock::on(today())),
    )
    .unwrap();
    (Arc::new(engine), dir)
}

fn one_day(i: u64, email: String) -> BookingRequest {
    let day = today() + Days::new(i);
    BookingRequest {
        first_name: "Gast".into(),
        email,
        start: day,
        end: day,
        party_size: 2,
        affiliation: Party::ALL[(i % 3) as usize],
        description: None,
        long_stay_confirmed: false,
    }
}

async fn phase1_sequential_creates() {
    let (engine, dir) = fresh_engine("sequential");
    let n = 500;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n as u64 {
        let t = Instant::now();
        engine
            .create_booking(one_day(i, format!("gast{i}@bench.example")))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
    let _ = std::fs::remove_dir_all(dir);
}

async fn phase2_concurrent_decisions() {
    let (engine, dir) = fresh_engine("decisions");
    let n = 300;
    let mut ids = Vec::with_capacity(n);
    for i in 0..n as u64 {
        let view = engine
            .create_booking(one_day(i, format!("gast{i}@bench.example")))
            .await
            .unwrap();
        ids.push(view.id());
    }

    let start = Instant::now();
    let mut handles = Vec::new();
    for party in Party::ALL {
        let engine = engine.clone();
        let ids = ids.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(ids.len());
            for id in ids {
                let t = Instant::now();
                engine
                    .decide(id, party, Decision::Approved, None)
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }
    let mut latencies = Vec::new();
    for h in handles {
        latencies.extend(h.await.unwrap());
    }

    let elapsed = start.elapsed();
    let total = n * 3;
    println!(
        "  3 approvers x {n} bookings = {total} decisions in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    print_latency("decide latency", &mut latencies);
    let confirmed = engine
        .list_for_month(2025, 1)
        .await
        .unwrap()
        .iter()
        .filter(|b| b.status == Status::Confirmed)
        .count();
    println!("  confirmed in January: {confirmed}");
    let _ = std::fs::remove_dir_all(dir);
}

async fn phase3_contended_dates() {
    let (engine, dir) = fresh_engine("contended");
    let n_tasks = 32;
    let rounds = 50u64;
    let start = Instant::now();
    let mut admitted = 0;
    let mut conflicts = 0;

    for round in 0..rounds {
        let handles: Vec<_> = (0..n_tasks)
            .map(|t| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .create_booking(one_day(round, format!("racer{t}@bench.example")))
                        .await
                })
            })
            .collect();
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(EngineError::Conflict(_)) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    println!(
        "  {rounds} rounds x {n_tasks} racers in {:.2}s: {admitted} admitted, {conflicts} conflicts",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(admitted, rounds as usize, "double booking detected");
    let _ = std::fs::remove_dir_all(dir);
}

async fn phase4_reads_under_write_load() {
    let (engine, dir) = fresh_engine("reads");
    for i in 0..200u64 {
        engine
            .create_booking(one_day(i, format!("gast{i}@bench.example")))
            .await
            .unwrap();
    }

    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for i in 200..400u64 {
                let _ = engine
                    .create_booking(one_day(i, format!("late{i}@bench.example")))
                    .await;
            }
        })
    };

    let mut latencies = Vec::new();
    while !writer.is_finished() {
        let t = Instant::now();
        for month in 1..=12 {
            engine.list_for_month(2025, month).await.unwrap();
        }
        latencies.push(t.elapsed());
    }
    writer.await.unwrap();
    print_latency("12-month calendar read", &mut latencies);
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::main]
async fn main() {
    println!("=== staybook stress benchmark ===\n");

    println!("[phase 1] sequential create throughput");
    phase1_sequential_creates().await;

    println!("\n[phase 2] concurrent approvals");
    phase2_concurrent_decisions().await;

    println!("\n[phase 3] racing requests for the same day");
    phase3_contended_dates().await;

    println!("\n[phase 4] calendar reads under write load");
    phase4_reads_under_write_load().await;

    println!("\n=== benchmark complete ===");
}
