//! Line-delimited JSON channel. Inbound lines are `{task, sessionId,
//! database, message}` descriptors; outbound lines carry every response
//! payload, both for tasks received here and, via the broadcast channel,
//! for tasks that arrived over HTTP.

use crate::dispatch::{Dispatcher, Task};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub async fn run_ipc<R, W>(
    dispatcher: Arc<Dispatcher>,
    events: broadcast::Sender<Value>,
    reader: R,
    mut writer: W,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut mirror = events.subscribe();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }

                let payload = match serde_json::from_str::<Value>(&line) {
                    Ok(value) => match Task::from_value(&value) {
                        Ok(task) => {
                            debug!(task = ?task.kind, "dispatching ipc task");
                            dispatcher.dispatch_to_payload(task).await.1
                        }
                        Err(e) => e.to_payload(),
                    },
                    Err(e) => {
                        warn!(error = %e, "unparseable ipc message");
                        crate::error::DbrelayError::Config {
                            message: format!("unparseable ipc message: {}", e),
                        }
                        .to_payload()
                    }
                };

                write_line(&mut writer, &payload).await?;
            }

            mirrored = mirror.recv() => {
                match mirrored {
                    Ok(payload) => write_line(&mut writer, &payload).await?,
                    // Skipped messages only mean the channel lagged; the
                    // stream itself stays usable.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "ipc mirror lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    Ok(())
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, payload: &Value)
    -> std::io::Result<()> {
    let mut line = payload.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
