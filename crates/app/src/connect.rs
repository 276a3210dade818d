//! `eventsock connect` - emit stdin lines, print what comes back

use std::time::Duration;

use eventsock_core::CLOSE_NORMAL;
use eventsock_net::{Initiator, InitiatorConfig, StaticDefaults};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

const CLOSE_WAIT: Duration = Duration::from_secs(5);

pub async fn run(config: InitiatorConfig, event: String) -> anyhow::Result<()> {
    let initiator = Initiator::new(config, &StaticDefaults::default())?;
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();

    initiator.on_open(|| info!("Connected"));
    initiator.on_error(|e| warn!(error = %e, "Connection error"));
    initiator.on_message(|text| println!("{text}"));
    initiator.on_close(move |close| {
        info!(code = close.code, reason = %close.reason, "Disconnected");
        let _ = closed_tx.send(());
    });

    initiator.open()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    if let Err(e) = initiator.emit(&event, &json!({ "text": line })).await {
                        warn!(error = %e, "Emit failed");
                    }
                }
                None => break,
            },
            _ = closed_rx.recv() => return Ok(()),
        }
    }

    initiator.close(CLOSE_NORMAL, "stdin closed");
    if tokio::time::timeout(CLOSE_WAIT, closed_rx.recv()).await.is_err() {
        warn!("Peer did not acknowledge close");
    }
    Ok(())
}
