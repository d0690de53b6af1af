//! Message acceptance: what the sequencer lets into its store.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;

use istanbulbft_core::{Sequencer, Timeouts};
use istanbulbft_core_types::{MessageType, ValidatorId, View};
use istanbulbft_test::{prepare_message, round_change_message, ChannelTransport, TestBackend};

const HEIGHT: u64 = 5;

async fn running_sequencer(
    local: usize,
) -> (Sequencer<TestBackend, ChannelTransport>, TestBackend) {
    let backend = TestBackend::new(4, 42).with_local(local);
    let (transport, _outbound) = ChannelTransport::new();
    let sequencer = Sequencer::new(backend.clone(), transport, Timeouts::default());

    {
        let sequencer = sequencer.clone();
        tokio::spawn(async move { sequencer.run_sequence(HEIGHT).await });
    }

    // Wait for the sequence to install its height
    timeout(Duration::from_secs(5), async {
        while sequencer.height() != HEIGHT {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sequence never started");

    (sequencer, backend)
}

#[tokio::test]
async fn messages_from_unknown_validators_are_dropped() {
    let (sequencer, _backend) = running_sequencer(0).await;
    let view = View::new(HEIGHT, 0);

    let stranger = ValidatorId::from_slice(&[0xee; 20]);
    sequencer.add_message(prepare_message(stranger, view, Bytes::from_static(b"hash")));

    assert!(sequencer
        .messages()
        .get_valid_messages(view, MessageType::Prepare, |_| true)
        .is_empty());
}

#[tokio::test]
async fn messages_below_the_sequence_height_are_dropped() {
    let (sequencer, backend) = running_sequencer(0).await;
    let stale_view = View::new(HEIGHT - 1, 0);

    sequencer.add_message(prepare_message(
        backend.validator(2),
        stale_view,
        Bytes::from_static(b"hash"),
    ));

    assert!(sequencer
        .messages()
        .get_valid_messages(stale_view, MessageType::Prepare, |_| true)
        .is_empty());
}

#[tokio::test]
async fn messages_below_the_current_round_are_dropped() {
    // Validator 1 stays a non-proposer through round 3
    let (sequencer, backend) = running_sequencer(1).await;

    // A round-change quorum for round 3 moves the node forward
    let future_view = View::new(HEIGHT, 3);
    sequencer.add_message(round_change_message(backend.validator(0), future_view));
    sequencer.add_message(round_change_message(backend.validator(2), future_view));
    sequencer.add_message(round_change_message(backend.validator(3), future_view));

    timeout(Duration::from_secs(5), async {
        while sequencer.round() != 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("the round-change certificate never took effect");

    let stale_view = View::new(HEIGHT, 1);
    sequencer.add_message(prepare_message(
        backend.validator(2),
        stale_view,
        Bytes::from_static(b"hash"),
    ));

    assert!(sequencer
        .messages()
        .get_valid_messages(stale_view, MessageType::Prepare, |_| true)
        .is_empty());

    // Messages at or above the current round still get in
    let live_view = View::new(HEIGHT, 3);
    sequencer.add_message(prepare_message(
        backend.validator(2),
        live_view,
        Bytes::from_static(b"hash"),
    ));

    assert_eq!(
        sequencer
            .messages()
            .get_valid_messages(live_view, MessageType::Prepare, |_| true)
            .len(),
        1
    );
}
