//! `DataBlock` — the mutable envelope for one in-flight request (§3).

use crossbeam_channel::{Receiver, Sender};

use crate::bus::BusReply;

/// Epoch milliseconds, used only for `tstamp_sent` bookkeeping.
pub fn epoch_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// One in-flight request, pushed onto a [`crate::connection::Connection`]'s
/// outgoing queue and (depending on dispatch mode) registered in a waiter
/// table until its reply, a close, or a timeout resolves it.
///
/// `atmi_chan` is a literal one-shot queue (§9 design notes): bounded to a
/// single slot, so the first writer — the replying reader thread, or the
/// connection's close fan-out — wins, and nothing blocks waiting for a
/// second delivery that will never come.
#[derive(Debug)]
pub struct DataBlock {
    /// Opaque request payload.
    pub data: Vec<u8>,
    /// Optional correlator, echoed on reply.
    pub corr: Option<String>,
    /// Connection id requested by the caller; 0 = any.
    pub atmi_out_conn_id: i64,
    /// Millisecond epoch timestamp this block was sent.
    pub tstamp_sent: u128,
    /// Composite id of the connection this block was actually sent on,
    /// assigned at send time.
    pub net_conn_id: Option<i64>,
    sender: Sender<BusReply>,
    receiver: Receiver<BusReply>,
}

impl DataBlock {
    /// Build a new block carrying `data`, with a fresh one-shot reply
    /// slot.
    pub fn new(data: Vec<u8>, corr: Option<String>, atmi_out_conn_id: i64) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        DataBlock {
            data,
            corr,
            atmi_out_conn_id,
            tstamp_sent: epoch_millis(),
            net_conn_id: None,
            sender,
            receiver,
        }
    }

    /// A handle usable to deliver exactly one reply to this block, cheaply
    /// cloneable so both the reader thread and a connection's close
    /// fan-out can race to deliver without holding the block itself.
    pub fn reply_sender(&self) -> Sender<BusReply> {
        self.sender.clone()
    }

    /// Block the calling thread until a reply is delivered or `timeout`
    /// elapses. Returns `Err(RecvTimeoutError::Timeout)` on timeout, at
    /// which point the caller must still remove this block from whichever
    /// waiter table it was registered in (§5).
    pub fn wait(&self, timeout: std::time::Duration) -> Result<BusReply, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorCode;
    use std::time::Duration;

    #[test]
    fn delivers_exactly_one_reply() {
        let block = DataBlock::new(vec![1, 2, 3], Some("A".into()), 0);
        let sender = block.reply_sender();
        sender
            .send(BusReply::Success {
                data: vec![0xAA],
                net_conn_id: Some(7),
            })
            .unwrap();

        let reply = block.wait(Duration::from_millis(100)).unwrap();
        match reply {
            BusReply::Success { data, .. } => assert_eq!(data, vec![0xAA]),
            BusReply::Failure { .. } => panic!("expected success"),
        }
    }

    #[test]
    fn times_out_when_nothing_arrives() {
        let block = DataBlock::new(vec![], None, 0);
        let err = block.wait(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err, crossbeam_channel::RecvTimeoutError::Timeout);
    }

    #[test]
    fn late_reply_after_timeout_is_dropped_silently() {
        let block = DataBlock::new(vec![], Some("A".into()), 0);
        assert!(block.wait(Duration::from_millis(5)).is_err());

        // A late sender still succeeds (bounded(1) has room) but nobody is
        // waiting any more -- simulates a late frame arriving after the
        // dispatcher already replied TIMEOUT to the bus caller.
        let sender = block.reply_sender();
        let _ = sender.send(BusReply::failure(ErrorCode::System, "late", 0));
    }
}
