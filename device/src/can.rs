//! Device-side CAN driver: bit timing, filtering, open/close state
//! machine, error accounting, busload estimation, and Tx/Rx paths (§4.3).

use canstack_protocol::bit_timing::BitTiming;
use canstack_protocol::bus_status::BusStatus;
use canstack_protocol::codec::{CodecDecodeError, EchoToken, ExtendedCodec, FrameCodec, LegacyCodec};
use canstack_protocol::error_report::{AppErrorFlags, BusStatusFlags, ErrIdFlags, ErrorReport};
use canstack_protocol::filter::{FilterBank, MaskFilter};
use canstack_protocol::mode::{Mode, OpenFlags};
use canstack_protocol::Frame;

use crate::echo::EchoSlots;
use crate::pool::{CanPool, CanTxItem, HostPool, HostTxItem};

/// The peripheral-facing operations a concrete CAN controller must provide.
/// Generalizes the teacher crate's `Device` trait (config/bit_timing/
/// reset/start/state/receive) to the full controller surface SPEC_FULL
/// names.
pub trait Controller {
    fn apply_bit_timing(&mut self, nominal: BitTiming, data: Option<BitTiming>);
    fn install_filters(&mut self, filters: &FilterBank);
    fn start(&mut self, mode: Mode) -> Result<(), ()>;
    fn stop(&mut self);
    /// Number of free Tx mailboxes (drains one message per free mailbox
    /// per `drain_tick`).
    fn free_tx_mailboxes(&self) -> u8;
    fn send(&mut self, frame: &Frame) -> Result<(), ()>;
    /// `(tx_errors, rx_errors)`.
    fn error_counters(&self) -> (u16, u16);
    fn proto_err_flags(&self) -> canstack_protocol::error_report::ProtoErrFlags;
    /// Percent busload sampled since the last call, or `None` if idle.
    fn sample_busload(&mut self) -> Option<u8>;
}

/// Device-level error codes returned by the control layer when the CAN
/// driver rejects a request.
pub use canstack_protocol::error_report::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Closed,
    Configured,
    Running,
    Recovery,
}

const ERROR_IMMEDIATE_INTERVAL_US: u32 = 0;
const ERROR_CHANGED_INTERVAL_US: u32 = 100_000;
const ERROR_STABLE_INTERVAL_US: u32 = 3_000_000;
const BUSLOAD_UNIT_US: u32 = 100_000;

struct ErrorCadence {
    last_report: Option<ErrorReport>,
    last_report_at: u32,
}

impl ErrorCadence {
    const fn new() -> Self {
        Self { last_report: None, last_report_at: 0 }
    }

    /// Decides whether to (re-)emit an error report now, per §4.3's
    /// immediate/100ms/3s cadence.
    fn should_report(&mut self, now: u32, report: &ErrorReport, immediate: bool, has_condition: bool) -> bool {
        if !has_condition {
            self.last_report = None;
            return false;
        }

        let changed = self.last_report.map_or(true, |prev| !reports_equal(&prev, report));

        let due = match self.last_report {
            None => true,
            Some(_) if immediate => true,
            Some(_) if changed => now.wrapping_sub(self.last_report_at) >= ERROR_CHANGED_INTERVAL_US,
            Some(_) => now.wrapping_sub(self.last_report_at) >= ERROR_STABLE_INTERVAL_US,
        };

        if due {
            self.last_report = Some(*report);
            self.last_report_at = now;
        }
        due
    }
}

fn reports_equal(a: &ErrorReport, b: &ErrorReport) -> bool {
    a.bus_status == b.bus_status
        && a.proto_err == b.proto_err
        && a.app_flags == b.app_flags
        && a.tx_errors == b.tx_errors
        && a.rx_errors == b.rx_errors
}

/// One device-wide CAN channel: pools, echo table, error cadence, and the
/// `Closed -> Configured -> Running -> (Recovery) -> Closed` state machine.
pub struct CanDriver<C: Controller> {
    controller: C,
    state: RunState,
    mode: Mode,
    open_flags: OpenFlags,
    nominal: Option<BitTiming>,
    data: Option<BitTiming>,
    filters: FilterBank,
    pub can_pool: CanPool,
    pub host_pool: HostPool,
    echo: EchoSlots,
    app_flags: AppErrorFlags,
    busload_interval_units: u8,
    busload_accum_us: u32,
    error_cadence: ErrorCadence,
    last_bus_status: BusStatus,
    bus_off_reported: bool,
    last_error: ErrorCode,
}

impl<C: Controller> CanDriver<C> {
    pub fn new(controller: C) -> Self {
        Self {
            controller,
            state: RunState::Closed,
            mode: Mode::Normal,
            open_flags: OpenFlags::empty(),
            nominal: None,
            data: None,
            filters: FilterBank::new(),
            can_pool: CanPool::new(),
            host_pool: HostPool::new(),
            echo: EchoSlots::new(),
            app_flags: AppErrorFlags::empty(),
            busload_interval_units: 0,
            busload_accum_us: 0,
            error_cadence: ErrorCadence::new(),
            last_bus_status: BusStatus::Active,
            bus_off_reported: false,
            last_error: ErrorCode::Ok,
        }
    }

    pub fn last_error(&self) -> ErrorCode {
        self.last_error
    }

    pub fn set_last_error(&mut self, code: ErrorCode) {
        self.last_error = code;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn open_flags(&self) -> OpenFlags {
        self.open_flags
    }

    pub fn filters(&self) -> &FilterBank {
        &self.filters
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, RunState::Closed)
    }

    pub fn set_nominal_bit_timing(&mut self, timing: BitTiming) {
        self.nominal = Some(timing);
    }

    /// Setting data timing implicitly enables FD mode (§4.3).
    pub fn set_data_bit_timing(&mut self, timing: BitTiming) {
        self.data = Some(timing);
    }

    pub fn is_fd_enabled(&self) -> bool {
        self.data.is_some()
    }

    pub fn set_filter(&mut self, filter: MaskFilter) -> Result<(), ErrorCode> {
        self.filters.push(filter).map_err(|_| ErrorCode::InvalidParameter)
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
    }

    pub fn set_busload_interval(&mut self, units_of_100ms: u8) {
        self.busload_interval_units = units_of_100ms;
        self.busload_accum_us = 0;
    }

    fn codec(&self) -> CodecChoice {
        if self.open_flags.contains(OpenFlags::EXTENDED_PROTOCOL) {
            CodecChoice::Extended(ExtendedCodec {
                timestamps_enabled: self.open_flags.contains(OpenFlags::SEND_FIRMWARE_TIMESTAMP),
            })
        } else {
            CodecChoice::Legacy(LegacyCodec)
        }
    }

    /// `Closed -> Running`. Refuses to open unless at least a nominal bit
    /// timing has been set.
    pub fn open(&mut self, mode: Mode, flags: OpenFlags) -> Result<(), ErrorCode> {
        let nominal = self.nominal.ok_or(ErrorCode::BaudrateNotSet)?;
        self.controller.apply_bit_timing(nominal, self.data);
        self.controller.install_filters(&self.filters);
        self.can_pool.init();
        self.host_pool.init();
        self.app_flags = AppErrorFlags::empty();
        self.error_cadence = ErrorCadence::new();
        self.bus_off_reported = false;
        self.state = RunState::Configured;
        self.controller.start(mode).map_err(|_| ErrorCode::ErrorFromController)?;
        self.mode = mode;
        self.open_flags = flags;
        self.state = RunState::Running;
        Ok(())
    }

    /// `* -> Closed`: flushes the Tx queue, clears filters, resets flags.
    /// Leaves the pools fully populated.
    pub fn close(&mut self) {
        self.can_pool.clear();
        self.filters.clear();
        self.app_flags = AppErrorFlags::empty();
        self.controller.stop();
        self.state = RunState::Closed;
    }

    /// Decodes a host Tx submission and queues it on `to_can`. Returns the
    /// echo token the caller should remember for correlation (extended
    /// protocol) or echo back verbatim (legacy protocol).
    pub fn receive_from_host(&mut self, bytes: &[u8]) -> Result<EchoToken, ErrorCode> {
        let (frame, token) = match self.codec() {
            CodecChoice::Legacy(codec) => codec.decode_tx(bytes),
            CodecChoice::Extended(codec) => codec.decode_tx(bytes),
        }
        .map_err(|e| match e {
            CodecDecodeError::NotATxFrame => ErrorCode::InvalidCommand,
            _ => ErrorCode::InvalidParameter,
        })?;

        if !self.is_open() {
            return Err(ErrorCode::AdapterMustBeOpen);
        }

        self.can_pool
            .enqueue(CanTxItem { frame, token })
            .map(|_| token)
            .map_err(|_| {
                self.app_flags.insert(AppErrorFlags::TX_FIFO_OVERFLOW);
                ErrorCode::TxBufferFull
            })
    }

    /// Called from the controller's Rx interrupt/callback path.
    pub fn rx_callback(&mut self, frame: Frame, device_ts: u32) {
        let mut buf = [0u8; 80];
        let timestamp = if self.open_flags.contains(OpenFlags::SEND_FIRMWARE_TIMESTAMP) {
            Some(device_ts)
        } else {
            None
        };
        let len = match self.codec() {
            CodecChoice::Legacy(codec) => codec.encode_rx(&mut buf, &frame, 0, timestamp),
            CodecChoice::Extended(codec) => codec.encode_rx(&mut buf, &frame, 0, timestamp),
        };
        let _ = self.host_pool.enqueue(HostTxItem { bytes: buf, len: len as u8 });
    }

    /// Called from the controller's Tx-event interrupt (extended protocol
    /// only; legacy framing self-echoes at submit time, see `drain_tick`).
    pub fn tx_event_callback(&mut self, marker: u8, device_ts: u32) {
        if !self.open_flags.contains(OpenFlags::EXTENDED_PROTOCOL) {
            return;
        }
        if self.open_flags.contains(OpenFlags::SUPPRESS_TX_ECHO) {
            self.echo.take(marker);
            return;
        }
        let mut buf = [0u8; 80];
        let timestamp = self.open_flags.contains(OpenFlags::SEND_FIRMWARE_TIMESTAMP).then_some(device_ts);
        let codec = ExtendedCodec {
            timestamps_enabled: self.open_flags.contains(OpenFlags::SEND_FIRMWARE_TIMESTAMP),
        };
        let len = codec.encode_tx_echo(&mut buf, EchoToken(marker as u32), timestamp);
        let _ = self.host_pool.enqueue(HostTxItem { bytes: buf, len: len as u8 });
    }

    /// Drives `to_can` -> controller and `to_host` -> USB send path. Call
    /// once per main-loop iteration; never blocks.
    pub fn drain_tick(&mut self, now: u32, bulk_in_idle: bool) -> Option<HostTxItem> {
        let mut ready = None;
        if bulk_in_idle && !self.host_pool.is_sending() {
            if let Some(item) = self.host_pool.begin_send() {
                ready = Some(item);
            } else if self.host_pool.is_full() {
                self.app_flags.insert(AppErrorFlags::USB_IN_OVERFLOW);
            }
        }

        if self.controller.free_tx_mailboxes() > 0 {
            if let Some(item) = self.can_pool.dequeue() {
                self.drain_one_tx(item, now);
            } else if self.can_pool.is_full() {
                self.app_flags.insert(AppErrorFlags::TX_FIFO_OVERFLOW);
            }
        }

        self.dispatch_busload(now);
        self.dispatch_errors(now);

        ready
    }

    fn drain_one_tx(&mut self, item: CanTxItem, now: u32) {
        if !self.is_open() || matches!(self.mode, Mode::ListenOnly) {
            self.app_flags.insert(AppErrorFlags::TX_FAIL);
            return;
        }
        if self.last_bus_status == BusStatus::Off {
            self.app_flags.insert(AppErrorFlags::TX_FAIL);
            return;
        }

        match self.controller.send(&item.frame) {
            Ok(()) => {
                if self.open_flags.contains(OpenFlags::EXTENDED_PROTOCOL) {
                    let marker = self.echo.save(item.frame);
                    debug_assert_eq!(marker as u32, item.token.0 & 0xFF);
                } else {
                    // legacy framing: fake echo emitted immediately, with
                    // the submit-time timestamp (known-incorrect; §9 open
                    // question (b), preserved for compatibility).
                    let codec = LegacyCodec;
                    let mut buf = [0u8; 80];
                    let len = codec.encode_rx(&mut buf, &item.frame, 0, Some(now));
                    // overwrite echo_id with the host's token so the host
                    // can correlate it, matching the legacy wire contract.
                    buf[0..4].copy_from_slice(&item.token.0.to_le_bytes());
                    let _ = self.host_pool.enqueue(HostTxItem { bytes: buf, len: len as u8 });
                }
            }
            Err(()) => {
                self.app_flags.insert(AppErrorFlags::TX_FAIL);
            }
        }
    }

    fn dispatch_busload(&mut self, _now: u32) {
        if self.busload_interval_units == 0 {
            return;
        }
        self.busload_accum_us = self.busload_accum_us.wrapping_add(BUSLOAD_UNIT_US / 10);
        let interval_us = self.busload_interval_units as u32 * BUSLOAD_UNIT_US;
        if self.busload_accum_us < interval_us {
            return;
        }
        self.busload_accum_us = 0;
        if let Some(percent) = self.controller.sample_busload() {
            if percent > 0 {
                let mut buf = [0u8; 80];
                let len = canstack_protocol::extended::encode_busload(&mut buf, percent);
                let _ = self.host_pool.enqueue(HostTxItem { bytes: buf, len: len as u8 });
            }
        }
    }

    fn dispatch_errors(&mut self, now: u32) {
        let (tx_errors, rx_errors) = self.controller.error_counters();
        let bus_status = BusStatus::from_counters(tx_errors, rx_errors);
        let back_to_active = bus_status == BusStatus::Active && self.last_bus_status != BusStatus::Active;

        let mut bus_flags = BusStatusFlags::empty();
        match bus_status {
            BusStatus::Warning => bus_flags.insert(BusStatusFlags::ERROR_WARNING_TX | BusStatusFlags::ERROR_WARNING_RX),
            BusStatus::Passive => bus_flags.insert(BusStatusFlags::ERROR_PASSIVE_TX | BusStatusFlags::ERROR_PASSIVE_RX),
            _ => {}
        }
        if back_to_active {
            bus_flags.insert(BusStatusFlags::BUS_BACK_ACTIVE);
        }
        if self.app_flags.contains(AppErrorFlags::TX_FIFO_OVERFLOW) {
            bus_flags.insert(BusStatusFlags::BUFFER_OVERFLOW_TX);
        }
        if self.app_flags.contains(AppErrorFlags::USB_IN_OVERFLOW) {
            bus_flags.insert(BusStatusFlags::BUFFER_OVERFLOW_RX);
        }

        let mut err_id = ErrIdFlags::empty();
        let bus_off_now = bus_status == BusStatus::Off;
        if bus_off_now && !self.bus_off_reported {
            err_id.insert(ErrIdFlags::BUS_OFF);
        }

        let report = ErrorReport {
            bus_status: bus_flags,
            proto_err: self.controller.proto_err_flags(),
            app_flags: self.app_flags,
            tx_errors: tx_errors.min(255) as u8,
            rx_errors: rx_errors.min(255) as u8,
            err_id,
        };

        let has_condition = bus_status != BusStatus::Active
            || !self.app_flags.is_empty()
            || back_to_active
            || (bus_off_now && !self.bus_off_reported);
        let immediate = back_to_active || (bus_off_now && !self.bus_off_reported) || !self.app_flags.is_empty();

        if self.error_cadence.should_report(now, &report, immediate, has_condition) {
            let codec_choice = self.codec();
            let mut buf = [0u8; 80];
            let len = match codec_choice {
                CodecChoice::Legacy(codec) => codec.encode_error(&mut buf, &report, err_id.bits(), None),
                CodecChoice::Extended(codec) => codec.encode_error(&mut buf, &report, err_id.bits(), Some(now)),
            };
            let _ = self.host_pool.enqueue(HostTxItem { bytes: buf, len: len as u8 });
            // application flags are cleared after reporting; re-asserted on
            // the next drain only if the underlying condition persists.
            self.app_flags = AppErrorFlags::empty();
            if bus_off_now {
                self.bus_off_reported = true;
            }
        }

        if bus_status == BusStatus::Active {
            if self.state == RunState::Recovery {
                self.state = RunState::Running;
            }
            self.bus_off_reported = false;
        } else if bus_off_now && self.bus_off_reported {
            // automatic recovery is deliberately deferred until the host
            // has read the bus-off report.
            self.state = RunState::Recovery;
        }

        self.last_bus_status = bus_status;
    }
}

enum CodecChoice {
    Legacy(LegacyCodec),
    Extended(ExtendedCodec),
}
