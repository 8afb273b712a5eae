use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::config::ModuleEntry;
use crate::connector::EventSink;
use crate::contracts::Connector;
use crate::events::{Event, OutboundMessage};
use crate::registry::BuildContext;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ShellConfig {
    /// Name printed in front of replies.
    pub bot_name: String,
    /// User the typed lines are attributed to.
    pub user: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            bot_name: "arcus".to_owned(),
            user: "user".to_owned(),
        }
    }
}

/// Terminal connector: stdin lines in, replies on stdout.
#[derive(Debug)]
pub struct ShellConnector {
    cfg: ShellConfig,
}

/// # Errors
/// Fails when the entry's settings are not a valid [`ShellConfig`].
pub fn build(entry: &ModuleEntry, _ctx: &BuildContext<'_>) -> anyhow::Result<Arc<dyn Connector>> {
    Ok(Arc::new(ShellConnector {
        cfg: entry.settings()?,
    }))
}

#[async_trait]
impl Connector for ShellConnector {
    async fn connect(&self) -> anyhow::Result<()> {
        tracing::debug!(bot = %self.cfg.bot_name, "Shell connector ready");
        Ok(())
    }

    async fn listen(&self, sink: EventSink, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        tracing::info!("Shell input closed");
                        return Ok(());
                    };
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    sink.emit(Event::message(text).from_user(self.cfg.user.as_str())).await?;
                }
            }
        }
    }

    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format!("{}> {}\n", self.cfg.bot_name, message.text).as_bytes())
            .await?;
        stdout.flush().await?;
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
