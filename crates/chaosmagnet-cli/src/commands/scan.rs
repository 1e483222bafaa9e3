use chaosmagnet_core::sources::all_sources;

pub fn run() {
    println!(
        "Platform: {} {} (Rust)",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    println!();

    let sources = all_sources();
    let available = sources.iter().filter(|s| s.is_available()).count();
    println!("{available}/{} harvesters available:\n", sources.len());

    for src in &sources {
        let info = src.info();
        let mark = if src.is_available() { "\u{2705}" } else { "\u{274C}" };
        println!(
            "  {mark} {:<7} {:<22} {}",
            info.id.as_str(),
            info.name,
            info.description
        );
        let needs: Vec<String> = info.requirements.iter().map(|r| r.to_string()).collect();
        println!(
            "     every {} ms, {} bytes, {}{}",
            info.cadence.as_millis(),
            info.sample_size,
            info.platform,
            if needs.is_empty() {
                String::new()
            } else {
                format!(", needs {}", needs.join(", "))
            }
        );
    }
}
