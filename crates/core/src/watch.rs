//! The round timer and the watchers for higher-round evidence.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use istanbulbft_core_types::{Backend, MessageType, Transport, View};
use istanbulbft_messages::SubscriptionDetails;

use crate::sequencer::{RoundEvent, Shared};

impl<B, T> Shared<B, T>
where
    B: Backend,
    T: Transport,
{
    /// Fire a round-expired event after `base * 2^round + additional`.
    pub(crate) async fn round_timer(self: Arc<Self>, round: u64, tx: mpsc::Sender<RoundEvent>) {
        let duration = self.timeouts.round_timeout(round);

        debug!(round, ?duration, "round timer started");
        tokio::time::sleep(duration).await;

        let _ = tx.send(RoundEvent::Expired).await;
    }

    /// Watch the store for an acceptable PRE-PREPARE at any round above the
    /// current one and hand it to the driver.
    pub(crate) async fn watch_future_proposal(self: Arc<Self>, tx: mpsc::Sender<RoundEvent>) {
        let view = self.state.view();

        let mut sub = self.store.subscribe(SubscriptionDetails {
            message_type: MessageType::PrePrepare,
            view: View::new(view.height, view.round + 1),
            has_min_round: true,
            has_quorum_fn: self.backend_quorum_fn(),
        });

        while let Some(round) = sub.recv().await {
            let signal_view = View::new(view.height, round);

            if let Some(message) = self.handle_pre_prepare(signal_view) {
                debug!(height = view.height, round, "future proposal found");

                let _ = tx.send(RoundEvent::FutureProposal { round, message }).await;
                return;
            }
        }
    }

    /// Watch the store for round-change evidence above the current round;
    /// once an extended certificate for a higher round materializes, hand
    /// its round to the driver.
    pub(crate) async fn watch_future_rcc(self: Arc<Self>, tx: mpsc::Sender<RoundEvent>) {
        let view = self.state.view();

        let mut sub = self.store.subscribe(SubscriptionDetails {
            message_type: MessageType::RoundChange,
            view: View::new(view.height, view.round + 1),
            has_min_round: true,
            has_quorum_fn: Arc::new(|_, messages, _| !messages.is_empty()),
        });

        while sub.recv().await.is_some() {
            let Some(certificate) = self.handle_round_change_message(view) else {
                continue;
            };

            let Some(first) = certificate.round_change_messages.first() else {
                continue;
            };

            let round = first.view.round;

            // The driver only hops forward
            if round <= view.round {
                continue;
            }

            debug!(height = view.height, round, "future round-change certificate found");

            let _ = tx.send(RoundEvent::FutureRcc { round }).await;
            return;
        }
    }
}
