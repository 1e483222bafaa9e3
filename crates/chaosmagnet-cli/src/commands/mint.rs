use chaosmagnet_core::Engine;

use super::{EngineArgs, fail, runtime};

pub fn run(args: &EngineArgs, owner: &str) {
    let cfg = args.to_config().unwrap_or_else(|e| fail(e));
    if cfg.enabled_harvesters.is_empty() {
        fail("minting needs at least one harvester (--harvesters)");
    }
    let timeout = cfg.mint_timeout;
    let rt = runtime();

    let result = rt.block_on(async {
        let engine = Engine::start(cfg).unwrap_or_else(|e| fail(e));
        println!(
            "Harvesting for up to {} s before giving up...",
            timeout.as_secs()
        );
        let minted = engine.mint_pqc_bundle(owner).await;
        engine.shutdown().await;
        minted.map(|msg| (msg, engine.vault().dir().display().to_string()))
    });

    match result {
        Ok((msg, dir)) => {
            println!("{msg}");
            println!("Stored in {dir}");
        }
        Err(e) => fail(e),
    }
}
