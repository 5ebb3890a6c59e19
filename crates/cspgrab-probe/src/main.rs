//! cspgrab-probe — attach to a running CSP instance, list its shared texture
//! sources, and read one frame.
//!
//! ```text
//! cspgrab-probe [config.json] [--wait]
//! ```
//!
//! `config.json` holds a `CaptureConfig` (camelCase or snake_case keys).
//! With `--wait` the frame is requested and the probe blocks until the
//! producer acknowledges it. Ctrl-C cancels any wait. Set `RUST_LOG` for more
//! detail, e.g. `RUST_LOG=cspgrab_capture=debug`.

use anyhow::{Context, Result};
use cspgrab_capture::CaptureSession;
use cspgrab_core::{CaptureConfig, Frame};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("cspgrab probe v{}", env!("CARGO_PKG_VERSION"));

    let mut config_path = None;
    let mut wait = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--wait" => wait = true,
            _ => config_path = Some(arg),
        }
    }

    let config = match config_path {
        Some(path) => {
            let json = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path))?;
            CaptureConfig::from_json(&json).with_context(|| format!("parsing {}", path))?
        }
        None => CaptureConfig::default(),
    };
    info!("Mapping {:?}, preferred source {:?}", config.mapping_name, config.preferred_name);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received, cancelling");
                cancel.cancel();
            }
        });
    }

    // The session polls with blocking sleeps and owns thread-affine GPU
    // objects, so it lives entirely on one blocking thread.
    let frame = tokio::task::spawn_blocking(move || probe(config, cancel, wait))
        .await
        .context("probe thread panicked")??;

    info!(
        "Frame {}x{} {:?} flags={} ({} bytes, source pitch {})",
        frame.width,
        frame.height,
        frame.format,
        frame.flags,
        frame.data.len(),
        frame.row_pitch
    );
    if let Some(row) = frame.row(frame.height / 2) {
        let mid = (frame.width as usize / 2) * 4;
        if let Some(px) = row.get(mid..mid + 4) {
            info!("Centre pixel bytes {:02X?}", px);
        }
    }
    Ok(())
}

fn probe(config: CaptureConfig, cancel: CancellationToken, wait: bool) -> Result<Frame> {
    let mut session = CaptureSession::new(config);
    session.set_cancel_token(cancel);
    session.initialize().context("initializing capture session")?;

    let sources = session.sources()?;
    info!("{} published source(s):", sources.len());
    for source in &sources {
        info!("  {}", serde_json::to_string(source)?);
    }
    if let Some(selected) = session.selected() {
        info!("Selected {}", selected);
    }

    let frame = if wait { session.wait_frame() } else { session.capture_frame() };
    let frame = frame.context("reading frame")?;
    session.shutdown();
    Ok(frame)
}
