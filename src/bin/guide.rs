//! Voice Guide Application
//!
//! Connects the microphone to the museum's live speech model and plays
//! the synthesized answers, with a terminal level meter in place of the
//! mobile UI's bar visualizer.

use anyhow::Result;
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use museum_live_guide::{
    config::GuideConfig,
    session::{SessionController, SessionEvent},
    transport::LiveTransport,
};

const METER_WIDTH: usize = 24;

fn render_meter(level: f32) {
    let filled = ((level.clamp(0.0, 1.0) * METER_WIDTH as f32) as usize).min(METER_WIDTH);
    let bar: String = "#".repeat(filled) + &" ".repeat(METER_WIDTH - filled);
    print!("\r  level [{}]", bar);
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting museum voice guide");

    let config = GuideConfig::load()?;
    let api_key = config.require_api_key()?.to_string();

    let transport = Arc::new(LiveTransport::new(config.endpoint.clone(), api_key));
    let (controller, events) = SessionController::new(config.session_setup(), transport);

    // The event channel is the sole source of truth for connection state
    let meter_thread = std::thread::spawn(move || {
        for event in events.iter() {
            match event {
                SessionEvent::Connected => {
                    println!("Connected. Speak to the guide; press Ctrl+C to hang up.");
                }
                SessionEvent::Volume(level) => render_meter(level),
                SessionEvent::Disconnected => {
                    println!("\nDisconnected");
                    break;
                }
            }
        }
    });

    controller.connect().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Hanging up");
    controller.disconnect();

    let _ = meter_thread.join();
    Ok(())
}
