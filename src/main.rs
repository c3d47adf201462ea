use anyhow::Result;
use ecobin::config::SimConfig;
use ecobin::logging::{log, obj, v_str, Domain, Level};
use ecobin::session::Session;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = match SimConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            log(
                Level::Fatal,
                Domain::System,
                "config_error",
                obj(&[("error", v_str(&format!("{:#}", e)))]),
            );
            return Err(e);
        }
    };

    let mut session = Session::new(cfg)?;

    // Ctrl-C is observed between ticks, never mid-tick.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log(Level::Info, Domain::System, "shutdown_requested", obj(&[("signal", v_str("ctrl_c"))]));
            let _ = shutdown_tx.send(true);
        }
        // Dropping the sender ends the run.
        std::future::pending::<()>().await;
    });

    let results = session.run(shutdown_rx).await?;
    println!("{}", results);
    Ok(())
}
