#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = timed_sessions::run().await {
        eprintln!("timed-sessions fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
