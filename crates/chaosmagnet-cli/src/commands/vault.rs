use chaosmagnet_core::{EngineConfig, Vault};

use super::fail;

fn open(dir: Option<&str>) -> Vault {
    match dir {
        Some(d) => Vault::new(d),
        None => Vault::new(EngineConfig::default().with_env().vault_dir),
    }
}

pub fn list(dir: Option<&str>) {
    let vault = open(dir);
    let bundles = vault.list().unwrap_or_else(|e| fail(e));
    if bundles.is_empty() {
        println!("No bundles in {}", vault.dir().display());
        return;
    }
    println!("{} bundle(s) in {}:\n", bundles.len(), vault.dir().display());
    for b in &bundles {
        println!("  {}  {:<20} {}", b.id, b.owner_label, b.created_at);
    }
}

pub fn show(dir: Option<&str>, id: &str) {
    let vault = open(dir);
    let bundle = vault.load(id).unwrap_or_else(|e| fail(e));
    let attested = bundle.verify_attestation().unwrap_or(false);
    let mut view = serde_json::to_value(bundle.public_view()).unwrap_or_else(|e| fail(e));
    view["attestation_valid"] = serde_json::Value::Bool(attested);
    match serde_json::to_string_pretty(&view) {
        Ok(s) => println!("{s}"),
        Err(e) => fail(e),
    }
}
