// Discard sink - where messages from unconnected outputs end up

//! # Discard Sink
//!
//! Output pins that are not wired to anything are bound to the circuit's discard
//! sink instead of being left dangling. Nothing sent there disappears silently:
//! one background task per circuit run drains the sink and, for every message,
//! - logs it at `warn` level,
//! - prints `Lost <type>: <value>` to stdout when `print_lost` is enabled,
//! - forwards it to the lost-message tap, if one is installed.
//!
//! The sink channel is unbounded so that a gadget writing to an unconnected
//! output never blocks on it.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::Message;

/// A message that reached the discard sink
#[derive(Debug)]
pub struct LostMessage {
    /// Circuit whose sink received the message
    pub circuit: String,
    /// Output pin it was sent from
    pub pin: String,
    pub message: Message,
    pub at: DateTime<Utc>,
}

impl std::fmt::Display for LostMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lost {}: {}", self.message.type_name(), self.message.to_text())
    }
}

/// Receiving end of a lost-message tap
pub type LostReceiver = mpsc::UnboundedReceiver<LostMessage>;
pub(crate) type LostTap = mpsc::UnboundedSender<LostMessage>;

/// Shared send side of a circuit's discard sink
#[derive(Clone, Debug)]
pub struct DiscardSink {
    circuit: String,
    tx: mpsc::UnboundedSender<LostMessage>,
}

impl DiscardSink {
    /// Spawn the drain task for one circuit run
    pub(crate) fn spawn(circuit: &str, print: bool, tap: Option<LostTap>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<LostMessage>();
        let name = circuit.to_string();

        let drain = tokio::spawn(async move {
            while let Some(lost) = rx.recv().await {
                tracing::warn!(
                    circuit = %lost.circuit,
                    pin = %lost.pin,
                    type_name = %lost.message.type_name(),
                    "lost: {}",
                    lost.message.to_text()
                );
                if print {
                    println!("{}", lost);
                }
                if let Some(tap) = &tap {
                    // a dropped tap receiver only means nobody is listening
                    let _ = tap.send(lost);
                }
            }
            tracing::debug!(circuit = %name, "discard sink drained");
        });

        (
            Self {
                circuit: circuit.to_string(),
                tx,
            },
            drain,
        )
    }

    /// A sink without a drain task; the caller reads the receiver directly
    pub fn detached(circuit: &str) -> (Self, LostReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                circuit: circuit.to_string(),
                tx,
            },
            rx,
        )
    }

    pub(crate) fn discard(&self, pin: &str, message: Message) {
        let lost = LostMessage {
            circuit: self.circuit.clone(),
            pin: pin.to_string(),
            message,
            at: Utc::now(),
        };
        if let Err(e) = self.tx.send(lost) {
            // only possible once the circuit run is over
            tracing::error!(pin, "discard sink already closed: {}", e.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_forwards_in_order() {
        let (tap_tx, mut tap_rx) = mpsc::unbounded_channel();
        let (sink, drain) = DiscardSink::spawn("top", false, Some(tap_tx));

        sink.discard("u.Out", Message::from("ABC"));
        sink.discard("u.Out", Message::new(2usize));
        drop(sink);
        drain.await.unwrap();

        let first = tap_rx.recv().await.unwrap();
        assert_eq!(first.to_string(), "Lost String: ABC");
        assert_eq!(first.pin, "u.Out");
        assert_eq!(first.circuit, "top");

        let second = tap_rx.recv().await.unwrap();
        assert_eq!(second.to_string(), "Lost usize: 2");
        assert!(tap_rx.recv().await.is_none());
    }
}
