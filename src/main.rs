//! Area Active Window Indicator
//!
//! Draws a colored frame around the active X11 window while a Super key is
//! held, so the focused window can be found at a glance.

mod border_window;
mod config;
mod error;
mod event_loop;
mod gateway;
mod indicator;
mod signal;
mod trackers;

#[cfg(test)]
mod testing;

use std::rc::Rc;

use anyhow::{Context, Result};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use border_window::BorderWindow;
use config::{Config, WATCHED_KEYCODES};
use event_loop::EventLoop;
use gateway::Gateway;
use gateway::x11::X11Gateway;
use indicator::ActiveWindowIndicator;
use trackers::{ActiveWindowTracker, KeyStateTracker};

/// Exit status for command line errors
const USAGE_EXIT_CODE: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "area_indicator=info,warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match Config::from_args(std::env::args_os()) {
        Ok(config) => config,
        Err(e) => {
            debug!("{}", e);
            config::print_usage();
            std::process::exit(USAGE_EXIT_CODE);
        }
    };

    // Setup signal handlers for graceful shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            let name = tokio::select! {
                _ = sighup.recv() => "SIGHUP",
                _ = sigint.recv() => "SIGINT",
                _ = sigquit.recv() => "SIGQUIT",
                _ = sigterm.recv() => "SIGTERM",
            };
            info!("Received {}, shutting down gracefully", name);
            let _ = shutdown_tx.send(()).await;
        });
    }

    if let Err(e) = run(config, shutdown_rx).await {
        error!("Application error: {:#}", e);
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}

async fn run(config: Config, shutdown_rx: tokio::sync::mpsc::Receiver<()>) -> Result<()> {
    let x11 = Rc::new(X11Gateway::connect().context("Failed to connect to X server")?);
    let readiness = x11
        .readiness()
        .context("Failed to watch the X11 socket")?;
    let gateway: Rc<dyn Gateway> = x11;

    let mut event_loop = EventLoop::new(gateway.clone(), shutdown_rx);
    let registry = event_loop.registry();

    let border = BorderWindow::new(gateway.clone(), &config)
        .context("Failed to create border window")?;
    let active_window = ActiveWindowTracker::new(gateway.clone(), &registry)
        .context("Failed to start active window tracking")?;
    let key_state = KeyStateTracker::new(gateway.clone(), &registry, WATCHED_KEYCODES)
        .context("Failed to start key tracking")?;
    let indicator = ActiveWindowIndicator::new(
        gateway.clone(),
        &registry,
        border,
        &mut active_window.borrow_mut(),
        &mut key_state.borrow_mut(),
    )?;

    info!("Area indicator running");
    event_loop.run(&readiness).await?;

    info!("Shutdown signal received, cleaning up...");
    drop(indicator);
    drop(key_state);
    drop(active_window);
    gateway.flush()?;
    Ok(())
}
