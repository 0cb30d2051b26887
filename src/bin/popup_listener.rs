//! Desk-side popup listener
//!
//! Subscribes to the CallBridge push hub and prints one JSON line per popup on
//! stdout. Commands on stdin: `off` suppresses popups, `on` resumes them,
//! `status` reports counters, `quit` exits.

use anyhow::Context;
use callbridge_core::config::ListenerConfig;
use callbridge_services::PopupSubscriber;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

async fn read_commands(subscriber: &PopupSubscriber) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                // stdin closed; keep listening until ctrl-c
                std::future::pending::<()>().await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "Cannot read stdin");
                std::future::pending::<()>().await;
                return;
            }
        };

        match line.trim() {
            "off" => subscriber.set_popups_disabled(true),
            "on" => subscriber.set_popups_disabled(false),
            "status" => info!(
                state = ?subscriber.state(),
                popups_disabled = subscriber.popups_disabled(),
                surfaced = subscriber.surfaced_count(),
                suppressed = subscriber.suppressed_count(),
                connects = subscriber.connect_count(),
                "Listener status"
            ),
            "quit" => return,
            "" => {}
            other => warn!("Unknown command: {}", other),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("popup_listener=info,callbridge_services=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ListenerConfig::load().context("failed to load listener configuration")?;
    let subscriber = PopupSubscriber::new(&config.subscriber, &config.crm);
    info!(
        url = %subscriber.connect_url(),
        exten = subscriber.extension().unwrap_or("-"),
        "Popup listener starting"
    );

    let run = subscriber.run(|popup| match serde_json::to_string(&popup) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!(error = %e, "Cannot encode popup"),
    });
    tokio::pin!(run);

    tokio::select! {
        _ = &mut run => return Ok(()),
        _ = read_commands(&subscriber) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("cannot listen for ctrl-c")?;
        }
    }

    subscriber.close();
    run.await;
    Ok(())
}
