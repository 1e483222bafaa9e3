use std::sync::atomic::Ordering;
use std::time::Duration;

use chaosmagnet_core::{Engine, MetricsSnapshot};

use super::{EngineArgs, fail, running_flag, runtime};

fn status_line(m: &MetricsSnapshot) -> String {
    let enabled: Vec<&str> = m
        .harvesters
        .iter()
        .filter(|(_, h)| h.enabled)
        .map(|(id, _)| id.as_str())
        .collect();
    format!(
        "{} B absorbed | H={:.2} | staging {:>5.1}% | {} extractions | export {} B | uplink {} | p2p {} ({} rx) | [{}]",
        m.total_bytes,
        m.current_raw_entropy,
        m.extraction_pool_fill,
        m.extractions_count,
        m.export_available,
        if m.net_mode { "on" } else { "off" },
        if m.p2p_active { "on" } else { "off" },
        m.p2p_received_count,
        enabled.join(","),
    )
}

pub fn run(args: &EngineArgs, interval: u64, json: bool) {
    let cfg = args.to_config().unwrap_or_else(|e| fail(e));
    let running = running_flag();
    let rt = runtime();

    rt.block_on(async {
        let engine = Engine::start(cfg).unwrap_or_else(|e| fail(e));
        println!("chaosmagnet v{} running (Ctrl+C to stop)", chaosmagnet_core::VERSION);
        for line in engine.event_log().lines() {
            println!("  {line}");
        }

        let tick = Duration::from_secs(interval.max(1));
        let mut last_printed = engine.event_log().lines().last().cloned();
        while running.load(Ordering::SeqCst) {
            let m = engine.get_metrics();
            if json {
                println!("{}", m.to_json());
            } else {
                let fresh_from = last_printed
                    .as_ref()
                    .and_then(|last| m.logs.iter().rposition(|l| l == last))
                    .map_or(0, |i| i + 1);
                for line in &m.logs[fresh_from..] {
                    println!("  {line}");
                }
                if let Some(last) = m.logs.last() {
                    last_printed = Some(last.clone());
                }
                println!("{}", status_line(&m));
            }

            let mut waited = Duration::ZERO;
            while waited < tick && running.load(Ordering::SeqCst) {
                let step = (tick - waited).min(Duration::from_millis(100));
                tokio::time::sleep(step).await;
                waited += step;
            }
        }

        println!("\nShutting down...");
        engine.shutdown().await;
        let m = engine.get_metrics();
        println!(
            "Absorbed {} bytes, {} extractions, {} bytes whitened.",
            m.total_bytes, m.extractions_count, m.total_extracted_bytes
        );
    });
}
