use std::sync::Arc;

use chaosmagnet_core::Engine;
use tokio::sync::Notify;

use super::{EngineArgs, fail, runtime};

pub fn run(args: &EngineArgs, host: &str, port: u16) {
    let cfg = args.to_config().unwrap_or_else(|e| fail(e));
    let stop = Arc::new(Notify::new());
    let s = Arc::clone(&stop);
    ctrlc::set_handler(move || s.notify_one())
        .unwrap_or_else(|e| fail(format!("cannot set Ctrl+C handler: {e}")));

    let base = format!("http://{host}:{port}");
    println!("chaosmagnet control server v{}", chaosmagnet_core::VERSION);
    println!("   {base}");
    println!();
    println!("   Endpoints:");
    println!("     GET  /                  API index (try: curl {base})");
    println!("     GET  /metrics           Full engine snapshot");
    println!("     GET  /health            Liveness summary");
    println!("     POST /harvesters/{{id}}   {{\"enabled\": true}}");
    println!("     POST /uplink            {{\"enabled\": true}}");
    println!("     POST /uplink/target     {{\"address\": \"host:port\"}}");
    println!("     POST /p2p               {{\"enabled\": true}}");
    println!("     POST /p2p/port          {{\"port\": 9000}}");
    println!("     POST /p2p/peers         {{\"address\": \"10.0.0.5\"}}");
    println!("     POST /vault/mint        {{\"owner\": \"alice\"}}");
    println!("     GET  /vault, /vault/{{id}}");
    println!();

    let rt = runtime();
    rt.block_on(async {
        let engine = Arc::new(Engine::start(cfg).unwrap_or_else(|e| fail(e)));
        let shutdown = async move { stop.notified().await };
        if let Err(e) =
            chaosmagnet_server::run_server(Arc::clone(&engine), host, port, shutdown).await
        {
            eprintln!("Error: server on {host}:{port} failed: {e}");
        }
        println!("Shutting down...");
        engine.shutdown().await;
    });
}
