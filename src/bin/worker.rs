#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = timed_sessions::run_worker().await {
        eprintln!("timed-sessions-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
