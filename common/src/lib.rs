/// Marks the container ready for the kubelet's file-based readiness probe.
pub fn signal_ready() {
    if let Err(e) = std::fs::write("/etc/ready", "ready") {
        eprintln!("failed to write readiness file: {e}");
    }
}

/// One-time process setup: honors `DISABLE_COLORS` for log output that
/// lands in a collector rather than a terminal.
pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
}
