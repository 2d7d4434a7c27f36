fn main() -> anyhow::Result<()> {
    // Host builds have no ESP-IDF to take cfg and link args from.
    if std::env::var_os("CARGO_FEATURE_ESP32").is_none() {
        return Ok(());
    }

    // Necessary because of this issue: https://github.com/rust-lang/cargo/issues/9641
    embuild::build::CfgArgs::output_propagated("ESP_IDF")?;
    embuild::build::LinkArgs::output_propagated("ESP_IDF")?;
    Ok(())
}
