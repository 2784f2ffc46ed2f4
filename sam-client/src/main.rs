// sam-client: opens a stream session on the local bridge and echoes every inbound stream.

use std::time::Duration;

use sam_client::{config, Error, SamConn, StreamListener, StreamSession};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("sam-client {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = config::load()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let session = StreamSession::create(settings.session).await?;
        if let Some(echoed) = session.echoed_destination() {
            info!(id = session.id(), len = echoed.len(), "bridge assigned destination");
        }
        let listener = session.listen();
        tokio::select! {
            _ = accept_loop(listener) => {}
            res = shutdown_signal() => res?,
        }
        info!("shutting down");
        session.close().await?;
        Ok::<(), anyhow::Error>(())
    })
}

async fn accept_loop(listener: StreamListener) {
    loop {
        match listener.accept().await {
            Ok(conn) => {
                info!(peer = %conn.remote_destination(), "inbound stream");
                tokio::spawn(echo(conn));
            }
            Err(Error::AcceptTimeout(_)) => {}
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn echo(conn: SamConn) {
    let peer = conn.remote_destination().clone();
    let (mut reader, mut writer) = tokio::io::split(conn);
    match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(n) => info!(%peer, bytes = n, "stream closed"),
        Err(e) => warn!(%peer, error = %e, "stream failed"),
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
