//! A channel-backed transport: multicast messages land in a queue the test
//! inspects.

use tokio::sync::mpsc;

use istanbulbft_core_types::{Message, Transport};

/// A transport whose multicasts are observable through a channel.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelTransport {
    /// Create the transport and the receiving end of its multicasts.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn multicast(&self, message: Message) {
        let _ = self.tx.send(message);
    }
}
