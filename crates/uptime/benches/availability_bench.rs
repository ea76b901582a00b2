use chrono::{Duration, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use uptime::availability::calculate_status_intervals;
use uptime::types::{Monitor, ProbeResult, Target};
use uptime::{IncidentTracker, MemoryStorage, Outcome, Storage};

fn results(count: usize) -> Vec<ProbeResult> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            let at = start + Duration::minutes(i as i64);
            ProbeResult {
                id: i as u64,
                monitor_id: 1,
                created_at: at,
                monitored_at: Some(at),
                response_time: Some(0.05),
                status: Some(i % 17 != 0),
            }
        })
        .collect()
}

fn aggregation_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("availability");
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    // one result per minute, 90 one-day buckets
    for count in [1_440, 43_200, 129_600].iter() {
        let data = results(*count);
        let now = start + Duration::days(90);
        group.bench_with_input(BenchmarkId::from_parameter(count), &data, |b, data| {
            b.iter(|| {
                black_box(calculate_status_intervals(data, &start, Duration::days(1), now).unwrap())
            });
        });
    }

    group.finish();
}

fn tracker_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracker");

    let monitor = Monitor {
        id: 1,
        owner_id: 1,
        name: "bench".to_string(),
        endpoint: "127.0.0.1".to_string(),
        target: Target::Tcp { port: 1, data: None },
        alert_type: Default::default(),
        keyword: None,
        periodicity: std::time::Duration::from_secs(60),
        timeout: std::time::Duration::from_secs(1),
        recovery_period: std::time::Duration::ZERO,
        confirmation_period: std::time::Duration::ZERO,
        send_email: false,
    };

    // Steady state: healthy monitor, no incident to open or close
    group.bench_function("track_unchanged", |b| {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let tracker = IncidentTracker::new(storage.clone(), "bench");
        let result = rt.block_on(async {
            storage.upsert_monitor(monitor.clone()).await;
            let handle = storage.create_result(1, Utc::now()).await.unwrap();
            storage.update_result(&handle, Utc::now(), 0.01, true).await.unwrap()
        });
        let outcome = Outcome::up(std::time::Duration::from_millis(10), "");

        b.iter(|| rt.block_on(async { black_box(tracker.track(&monitor, &result, &outcome).await) }));
    });

    group.finish();
}

criterion_group!(benches, aggregation_benchmark, tracker_benchmark);

criterion_main!(benches);
