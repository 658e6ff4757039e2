use qnet_telemetry::{TelemetryConfig, TelemetryHandle};

fn main() {
    let telemetry = TelemetryHandle::from_config(TelemetryConfig::sample("flush-demo"));

    for _ in 0..3 {
        telemetry
            .record_counter("network.dispatched", 1)
            .expect("within u64 range");
    }
    telemetry.record_latency_ms("host.ack_ms", 4);
    telemetry.record_latency_ms("host.ack_ms", 7);

    let snapshot = telemetry.flush();
    println!(
        "[qnet-telemetry] counters={:?} latencies={:?}",
        snapshot.counters, snapshot.latencies_ms
    );
    println!("{}", snapshot.to_json().expect("snapshot serializes"));
}
