//! Transaction engine
//!
//! Serializes command frames onto the transport, polls the chip for
//! completion with bounded exponential backoff, and turns responses into
//! transaction results. One engine owns one transport and one mode
//! registry; concurrency policy is layered on top by the device facade.

use alloc::sync::Arc;
use alloc::vec;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, trace, warn};
use maybe_async::maybe_async;

use crate::codec::{self, CommandFrame};
use crate::error::{Error, FailureKind, ModeRejection, Result, TransportError};
use crate::mode::{Mode, ModeRegistry};
use crate::protocol::{
    config_word, FT4222_CONFIG_REQUEST, FT4222_GET_STATUS, FT4222_INFO_REQUEST,
    FT4222_INPUT_FLUSH, FT4222_OUTPUT_FLUSH, FT4222_RESET_REQUEST, FT4222_RESET_SIO,
    MODEM_STATUS_SIZE,
};
use crate::request::{TransactionRequest, TransactionResult};
use crate::status::ChipStatus;
use crate::transport::Transport;

/// Bounded poll schedule for awaiting chip completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of status polls per transaction
    pub max_polls: u32,
    /// Delay after the first busy poll, in microseconds
    pub initial_delay_us: u32,
    /// Ceiling the doubling backoff stops at
    pub max_delay_us: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_polls: 100,
            initial_delay_us: 20,
            max_delay_us: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay after busy poll number `attempt` (zero-based)
    pub fn delay_for(&self, attempt: u32) -> u32 {
        if attempt >= 31 {
            return self.max_delay_us;
        }
        self.initial_delay_us
            .saturating_mul(1 << attempt)
            .min(self.max_delay_us)
    }
}

/// Shared cancel signal, checked between chip polls
///
/// Cancelling never interrupts a transfer in flight; it takes effect at the
/// next poll boundary and leaves the engine with a drain obligation.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Fresh, unraised flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the transaction in flight
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether a cancellation is pending
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Outcome of one bounded poll loop
enum ChipPoll {
    Idle(ChipStatus),
    TimedOut(ChipStatus),
    Cancelled(ChipStatus),
}

/// Drives one chip through a transport
///
/// A transport failure at any point puts the engine into the faulted
/// state: every later call is rejected without touching the transport
/// until [`reset`](Self::reset) succeeds.
pub struct Engine<T: Transport> {
    transport: T,
    registry: ModeRegistry,
    retry: RetryPolicy,
    cancel: CancelFlag,
    faulted: bool,
    /// Bytes of an abandoned response to consume before the next submit
    pending_drain: Option<usize>,
}

#[maybe_async]
impl<T: Transport> Engine<T> {
    /// Engine over a transport, in the power-on state
    pub fn new(transport: T, retry: RetryPolicy) -> Self {
        Self {
            transport,
            registry: ModeRegistry::new(),
            retry,
            cancel: CancelFlag::new(),
            faulted: false,
            pending_drain: None,
        }
    }

    /// Committed mode
    pub fn mode(&self) -> &Mode {
        self.registry.current()
    }

    /// Whether a transport failure has poisoned the engine
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// Handle for cancelling the transaction in flight from another thread
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Borrow the transport, for adapter-specific queries
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Release the transport handle
    pub fn close(&mut self) {
        self.transport.close();
    }

    /// Chip reset and FIFO flush; drops back to the uninitialized mode
    ///
    /// This is also the recovery path out of the faulted state, so it runs
    /// regardless of the fault flag.
    pub async fn reset(&mut self) -> Result<()> {
        debug!("resetting chip and flushing FIFOs");
        match self.reset_sequence().await {
            Ok(()) => {
                self.registry.reset();
                self.pending_drain = None;
                self.cancel.clear();
                self.faulted = false;
                info!("chip reset, mode back to uninitialized");
                Ok(())
            }
            Err(e) => {
                self.faulted = true;
                warn!("reset failed: {}", e);
                Err(Error::Transport(e))
            }
        }
    }

    /// Switch the chip into `mode`
    ///
    /// Parameters are validated before anything touches the transport; the
    /// new mode is committed only once the chip settles idle without error.
    /// On any failure the previously committed mode stays in force.
    pub async fn configure(&mut self, mode: Mode) -> Result<()> {
        self.check_ready()?;
        mode.validate().map_err(Error::ModeRejected)?;
        let words = codec::encode_configure(&mode)?;
        self.drain_if_pending().await?;
        self.cancel.clear();

        let index = self.transport.control_index();
        for &(cmd, data) in &words {
            if let Err(e) = self
                .transport
                .control_out(FT4222_CONFIG_REQUEST, config_word(cmd, data), index, &[])
                .await
            {
                self.faulted = true;
                warn!("transport failed while configuring: {}", e);
                return Err(Error::Transport(e));
            }
        }

        // The chip applies the block asynchronously; wait for it to settle
        match self.poll_chip().await {
            Ok(ChipPoll::Idle(status)) => {
                if status.failure().is_some() {
                    debug!("chip refused mode change, status {:?}", status);
                    return Err(Error::ModeRejected(ModeRejection::ChipRefused));
                }
                info!("mode committed: {}", mode.kind());
                self.registry.commit(mode);
                Ok(())
            }
            Ok(ChipPoll::TimedOut(_)) => Err(Error::Timeout),
            Ok(ChipPoll::Cancelled(_)) => Err(Error::Cancelled),
            Err(e) => {
                self.faulted = true;
                Err(Error::Transport(e))
            }
        }
    }

    /// Execute one transaction against the committed mode
    ///
    /// `Err` means the request never reached the chip; a completed or
    /// broken exchange comes back as `Ok` with the outcome inside.
    pub async fn transact(&mut self, req: &TransactionRequest<'_>) -> Result<TransactionResult> {
        self.check_ready()?;
        self.registry.assert_compatible(req.kind())?;
        let frame = codec::encode(req, self.registry.current())?;
        self.drain_if_pending().await?;
        self.cancel.clear();

        trace!(
            "submit {}: {} bytes out, {} bytes expected",
            req.kind(),
            frame.bulk_out.len(),
            frame.response_len
        );
        if let Err(e) = self.submit(&frame).await {
            self.faulted = true;
            warn!("transport failed during submit: {}", e);
            return Ok(TransactionResult::Fail {
                kind: FailureKind::Transport(e),
                status: ChipStatus::empty(),
            });
        }

        match self.poll_chip().await {
            Ok(ChipPoll::Idle(_)) => self.collect(&frame).await,
            Ok(ChipPoll::TimedOut(status)) => {
                self.pending_drain = Some(MODEM_STATUS_SIZE + frame.response_len);
                warn!("chip busy past the retry ceiling");
                Ok(TransactionResult::Fail {
                    kind: FailureKind::Timeout,
                    status,
                })
            }
            Ok(ChipPoll::Cancelled(status)) => {
                self.pending_drain = Some(MODEM_STATUS_SIZE + frame.response_len);
                debug!("transaction cancelled");
                Ok(TransactionResult::Fail {
                    kind: FailureKind::Cancelled,
                    status,
                })
            }
            Err(e) => {
                self.faulted = true;
                warn!("transport failed while polling: {}", e);
                Ok(TransactionResult::Fail {
                    kind: FailureKind::Transport(e),
                    status: ChipStatus::empty(),
                })
            }
        }
    }

    /// Read the raw status word via the vendor status query
    pub async fn chip_status(&mut self) -> Result<ChipStatus> {
        self.check_ready()?;
        match self.read_status().await {
            Ok(status) => Ok(status),
            Err(e) => {
                self.faulted = true;
                Err(Error::Transport(e))
            }
        }
    }

    fn check_ready(&self) -> Result<()> {
        if self.faulted {
            Err(Error::Faulted)
        } else {
            Ok(())
        }
    }

    async fn reset_sequence(&mut self) -> core::result::Result<(), TransportError> {
        // Reset always addresses wIndex 0, unlike config and info requests
        self.transport
            .control_out(FT4222_RESET_REQUEST, FT4222_RESET_SIO, 0, &[])
            .await?;
        // The output FIFO needs several flush rounds to clear completely
        for _ in 0..6 {
            self.transport
                .control_out(FT4222_RESET_REQUEST, FT4222_OUTPUT_FLUSH, 0, &[])
                .await?;
        }
        self.transport
            .control_out(FT4222_RESET_REQUEST, FT4222_INPUT_FLUSH, 0, &[])
            .await?;
        Ok(())
    }

    async fn submit(&mut self, frame: &CommandFrame) -> core::result::Result<(), TransportError> {
        let index = self.transport.control_index();
        for &(cmd, data) in &frame.config_words {
            self.transport
                .control_out(FT4222_CONFIG_REQUEST, config_word(cmd, data), index, &[])
                .await?;
        }
        if !frame.bulk_out.is_empty() {
            self.transport.bulk_out(&frame.bulk_out).await?;
        }
        if frame.terminate {
            self.transport.bulk_out(&[]).await?;
        }
        Ok(())
    }

    async fn read_status(&mut self) -> core::result::Result<ChipStatus, TransportError> {
        let mut buf = [0u8; MODEM_STATUS_SIZE];
        let index = self.transport.control_index();
        self.transport
            .control_in(FT4222_INFO_REQUEST, FT4222_GET_STATUS, index, &mut buf)
            .await?;
        Ok(ChipStatus::from_bytes(buf[0], buf[1]))
    }

    /// Poll until the controller leaves the busy state, bounded by the
    /// retry policy, with the cancel flag checked between polls
    async fn poll_chip(&mut self) -> core::result::Result<ChipPoll, TransportError> {
        let mut last = ChipStatus::empty();
        for attempt in 0..self.retry.max_polls {
            if self.cancel.is_cancelled() {
                return Ok(ChipPoll::Cancelled(last));
            }
            last = self.read_status().await?;
            if !last.is_busy() {
                return Ok(ChipPoll::Idle(last));
            }
            let delay = self.retry.delay_for(attempt);
            trace!(
                "chip busy, poll {} of {}, backing off {} us",
                attempt + 1,
                self.retry.max_polls,
                delay
            );
            self.transport.delay_us(delay).await;
        }
        Ok(ChipPoll::TimedOut(last))
    }

    async fn collect(&mut self, frame: &CommandFrame) -> Result<TransactionResult> {
        let mut buf = vec![0u8; MODEM_STATUS_SIZE + frame.response_len];
        match self.transport.bulk_in(&mut buf).await {
            Ok(()) => Ok(codec::decode(&buf, frame.response_len)),
            Err(e) => {
                self.faulted = true;
                warn!("transport failed while collecting the response: {}", e);
                Ok(TransactionResult::Fail {
                    kind: FailureKind::Transport(e),
                    status: ChipStatus::empty(),
                })
            }
        }
    }

    /// Consume a response abandoned by a timeout or cancel
    ///
    /// A transfer timeout here is benign: the chip never finished the
    /// abandoned transaction, so there was nothing to consume.
    async fn drain_if_pending(&mut self) -> Result<()> {
        let Some(len) = self.pending_drain else {
            return Ok(());
        };
        debug!("draining {} stale response bytes", len);
        let mut buf = vec![0u8; len];
        match self.transport.bulk_in(&mut buf).await {
            Ok(()) | Err(TransportError::TimedOut) => {
                self.pending_drain = None;
                Ok(())
            }
            Err(e) => {
                self.faulted = true;
                Err(Error::Transport(e))
            }
        }
    }
}

#[cfg(all(test, feature = "is_sync"))]
mod tests {
    use super::*;
    use crate::mode::{ModeKind, OpKind};
    use crate::protocol::{FT4222_BULK_I2C_WRITE, FT4222_SET_MODE, I2C_FIFO_SIZE};
    use crate::transport::TransportResult;
    use alloc::collections::VecDeque;
    use alloc::vec::Vec;

    /// Scripted transport: statuses and response frames are queued up
    /// front, every call is logged
    #[derive(Default)]
    struct ScriptTransport {
        statuses: VecDeque<ChipStatus>,
        frames: VecDeque<Vec<u8>>,
        control_out_log: Vec<(u8, u16, u16)>,
        bulk_out_log: Vec<Vec<u8>>,
        bulk_in_count: usize,
        polls_seen: usize,
        delays: Vec<u32>,
        fail_bulk_out: Option<TransportError>,
        fail_bulk_in: Option<TransportError>,
        fail_control_in: Option<TransportError>,
        cancel_on_poll: Option<(usize, CancelFlag)>,
        closed: bool,
    }

    impl ScriptTransport {
        fn idle() -> ChipStatus {
            ChipStatus::IDLE
        }

        fn queue_busy(&mut self, polls: usize) {
            for _ in 0..polls {
                self.statuses.push_back(ChipStatus::BUSY);
            }
        }
    }

    impl Transport for ScriptTransport {
        fn control_out(
            &mut self,
            request: u8,
            value: u16,
            index: u16,
            _data: &[u8],
        ) -> TransportResult<()> {
            self.control_out_log.push((request, value, index));
            Ok(())
        }

        fn control_in(
            &mut self,
            _request: u8,
            _value: u16,
            _index: u16,
            buf: &mut [u8],
        ) -> TransportResult<()> {
            if let Some(e) = self.fail_control_in.take() {
                return Err(e);
            }
            self.polls_seen += 1;
            if let Some((after, flag)) = &self.cancel_on_poll {
                if self.polls_seen >= *after {
                    flag.cancel();
                }
            }
            let status = self.statuses.pop_front().unwrap_or_else(Self::idle);
            buf.copy_from_slice(&status.to_bytes());
            Ok(())
        }

        fn bulk_out(&mut self, data: &[u8]) -> TransportResult<()> {
            if let Some(e) = self.fail_bulk_out.take() {
                return Err(e);
            }
            self.bulk_out_log.push(data.to_vec());
            Ok(())
        }

        fn bulk_in(&mut self, buf: &mut [u8]) -> TransportResult<()> {
            self.bulk_in_count += 1;
            if let Some(e) = self.fail_bulk_in.take() {
                return Err(e);
            }
            match self.frames.pop_front() {
                Some(frame) => {
                    assert_eq!(frame.len(), buf.len(), "scripted frame length mismatch");
                    buf.copy_from_slice(&frame);
                }
                None => {
                    // Unscripted reads see an idle ack padded with zeros
                    buf[..2].copy_from_slice(&Self::idle().to_bytes());
                    buf[2..].fill(0);
                }
            }
            Ok(())
        }

        fn delay_us(&mut self, us: u32) {
            self.delays.push(us);
        }

        fn control_index(&self) -> u16 {
            1
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_polls: 5,
            initial_delay_us: 10,
            max_delay_us: 40,
        }
    }

    fn i2c_engine(transport: ScriptTransport) -> Engine<ScriptTransport> {
        let mut engine = Engine::new(transport, quick_retry());
        engine.registry.commit(Mode::I2cMaster { clock_hz: 100_000 });
        engine
    }

    fn write_req(payload: &[u8]) -> TransactionRequest<'_> {
        TransactionRequest::Write {
            addr: 0x50,
            payload,
        }
    }

    #[test]
    fn test_delay_schedule_doubles_to_ceiling() {
        let policy = quick_retry();
        let delays: Vec<u32> = (0..5).map(|n| policy.delay_for(n)).collect();
        assert_eq!(delays, [10, 20, 40, 40, 40]);
        assert_eq!(policy.delay_for(40), 40);
    }

    #[test]
    fn test_busy_then_success_observes_backoff() {
        let mut transport = ScriptTransport::default();
        transport.queue_busy(3);
        transport.statuses.push_back(ChipStatus::IDLE);
        let mut engine = i2c_engine(transport);

        let result = engine.transact(&write_req(&[0xAA])).unwrap();
        assert!(result.is_ok());
        assert_eq!(engine.transport().delays, [10, 20, 40]);
    }

    #[test]
    fn test_retry_ceiling_fails_with_timeout_and_drains_later() {
        let mut transport = ScriptTransport::default();
        transport.queue_busy(50);
        let mut engine = i2c_engine(transport);

        let result = engine.transact(&write_req(&[0xAA])).unwrap();
        assert_eq!(result.failure(), Some(FailureKind::Timeout));
        assert!(result.status().is_busy());
        assert_eq!(engine.pending_drain, Some(MODEM_STATUS_SIZE));

        // The stale response is consumed before the next frame goes out
        engine.transport.statuses.clear();
        let reads_before = engine.transport.bulk_in_count;
        let result = engine.transact(&write_req(&[0xBB])).unwrap();
        assert!(result.is_ok());
        assert_eq!(engine.transport.bulk_in_count, reads_before + 2);
        assert_eq!(engine.pending_drain, None);
    }

    #[test]
    fn test_cancel_between_polls() {
        let mut transport = ScriptTransport::default();
        transport.queue_busy(50);
        let mut engine = i2c_engine(transport);
        // The flag goes up while the chip is reported busy; the loop picks
        // it up at the next poll boundary
        let flag = engine.cancel_flag();
        engine.transport.cancel_on_poll = Some((2, flag));

        let result = engine.transact(&write_req(&[0xAA])).unwrap();
        assert_eq!(result.failure(), Some(FailureKind::Cancelled));
        assert!(result.status().is_busy());
        assert!(engine.pending_drain.is_some());
    }

    #[test]
    fn test_transport_failure_faults_the_engine() {
        let mut transport = ScriptTransport::default();
        transport.fail_bulk_out = Some(TransportError::Disconnected);
        let mut engine = i2c_engine(transport);

        let result = engine.transact(&write_req(&[0xAA])).unwrap();
        assert_eq!(
            result.failure(),
            Some(FailureKind::Transport(TransportError::Disconnected))
        );
        assert!(engine.is_faulted());

        // Later calls are rejected without touching the transport
        let outs = engine.transport.bulk_out_log.len();
        let controls = engine.transport.control_out_log.len();
        assert_eq!(engine.transact(&write_req(&[0xBB])).unwrap_err(), Error::Faulted);
        assert_eq!(engine.chip_status().unwrap_err(), Error::Faulted);
        assert_eq!(engine.transport.bulk_out_log.len(), outs);
        assert_eq!(engine.transport.control_out_log.len(), controls);
    }

    #[test]
    fn test_disconnect_while_polling() {
        let mut transport = ScriptTransport::default();
        transport.fail_control_in = Some(TransportError::Disconnected);
        let mut engine = i2c_engine(transport);

        let result = engine.transact(&write_req(&[0x01])).unwrap();
        assert_eq!(
            result.failure(),
            Some(FailureKind::Transport(TransportError::Disconnected))
        );
        assert!(engine.is_faulted());
    }

    #[test]
    fn test_reset_recovers_a_faulted_engine() {
        let mut transport = ScriptTransport::default();
        transport.fail_bulk_in = Some(TransportError::Io);
        let mut engine = i2c_engine(transport);

        let result = engine
            .transact(&TransactionRequest::Read { addr: 0x50, len: 1 })
            .unwrap();
        assert!(matches!(result.failure(), Some(FailureKind::Transport(_))));
        assert!(engine.is_faulted());

        engine.reset().unwrap();
        assert!(!engine.is_faulted());
        assert_eq!(engine.mode().kind(), ModeKind::Uninitialized);

        // One SIO reset, six output flushes, one input flush, all wIndex 0
        let resets: Vec<_> = engine
            .transport
            .control_out_log
            .iter()
            .filter(|(req, _, _)| *req == FT4222_RESET_REQUEST)
            .collect();
        assert_eq!(resets.len(), 8);
        assert!(resets.iter().all(|(_, _, index)| *index == 0));
        assert_eq!(resets[0].1, FT4222_RESET_SIO);
        assert_eq!(resets[7].1, FT4222_INPUT_FLUSH);
    }

    #[test]
    fn test_configure_commits_only_after_idle() {
        let transport = ScriptTransport::default();
        let mut engine = Engine::new(transport, quick_retry());

        engine.configure(Mode::I2cMaster { clock_hz: 400_000 }).unwrap();
        assert_eq!(engine.mode().kind(), ModeKind::I2cMaster);

        let mode_words: Vec<_> = engine
            .transport
            .control_out_log
            .iter()
            .filter(|(req, value, _)| {
                *req == FT4222_CONFIG_REQUEST && (*value & 0xFF) as u8 == FT4222_SET_MODE
            })
            .collect();
        assert_eq!(mode_words.len(), 1);
    }

    #[test]
    fn test_chip_refusal_keeps_previous_mode() {
        let mut transport = ScriptTransport::default();
        transport.statuses.push_back(ChipStatus::IDLE | ChipStatus::ERROR);
        let mut engine = i2c_engine(transport);

        let err = engine
            .configure(Mode::SpiSlave {
                cpol: Default::default(),
                cpha: Default::default(),
            })
            .unwrap_err();
        assert_eq!(err, Error::ModeRejected(ModeRejection::ChipRefused));
        assert_eq!(engine.mode().kind(), ModeKind::I2cMaster);
    }

    #[test]
    fn test_invalid_mode_rejected_without_transport_contact() {
        let mut engine = i2c_engine(ScriptTransport::default());
        let before = engine.transport.control_out_log.len();
        let err = engine.configure(Mode::I2cMaster { clock_hz: 1 }).unwrap_err();
        assert_eq!(err, Error::ModeRejected(ModeRejection::UnsupportedClock));
        assert_eq!(engine.transport.control_out_log.len(), before);
        assert_eq!(engine.mode().kind(), ModeKind::I2cMaster);
    }

    #[test]
    fn test_wrong_mode_never_reaches_the_wire() {
        let mut engine = i2c_engine(ScriptTransport::default());
        let err = engine
            .transact(&TransactionRequest::Transfer {
                tx: &[1, 2],
                read_len: 0,
            })
            .unwrap_err();
        assert_eq!(
            err,
            Error::Incompatible {
                active: ModeKind::I2cMaster,
                requested: OpKind::Transfer,
            }
        );
        assert!(engine.transport.bulk_out_log.is_empty());
        assert!(engine.transport.control_out_log.is_empty());
    }

    #[test]
    fn test_oversize_payload_never_reaches_the_wire() {
        let mut engine = i2c_engine(ScriptTransport::default());
        let payload = [0u8; I2C_FIFO_SIZE + 1];
        let err = engine.transact(&write_req(&payload)).unwrap_err();
        assert_eq!(
            err,
            Error::PayloadTooLarge {
                len: I2C_FIFO_SIZE + 1,
                max: I2C_FIFO_SIZE
            }
        );
        assert!(engine.transport.bulk_out_log.is_empty());
    }

    #[test]
    fn test_successful_write_sends_frame_and_decodes_ack() {
        let mut engine = i2c_engine(ScriptTransport::default());
        let result = engine.transact(&write_req(&[0xAA, 0xBB])).unwrap();
        assert!(matches!(result, TransactionResult::Ack { .. }));

        let frame = &engine.transport.bulk_out_log[0];
        assert_eq!(frame[0], FT4222_BULK_I2C_WRITE);
        assert_eq!(&frame[6..], &[0xAA, 0xBB]);
    }
}
