//! Abstract platform capability list (§1 Non-goals: MCU clock tree and
//! option-byte manipulation are excluded beyond this seam).

use canstack_protocol::bit_timing::BitTimingRange;
use canstack_protocol::capability::Feature;

/// Everything the transport engine needs from the concrete board/MCU
/// without naming it.
pub trait Platform {
    /// CAN peripheral clock, in Hz.
    fn can_clock_hz(&self) -> u32;

    /// Valid nominal bit-timing range for this controller.
    fn nominal_range(&self) -> BitTimingRange;

    /// Valid data-phase bit-timing range for this controller.
    fn data_range(&self) -> BitTimingRange;

    /// Capability bits this board supports.
    fn features(&self) -> Feature;

    /// Whether the board has a controllable bus termination resistor.
    fn has_termination(&self) -> bool {
        self.features().contains(Feature::TERMINATION)
    }

    /// Whether the board exposes a "boot override" option pin.
    fn has_boot_override_pin(&self) -> bool;

    /// Reads the current boot-override pin disable state.
    fn boot_override_disabled(&self) -> bool;

    /// Persists the boot-override option bit. Per §6, this requires the CAN
    /// interface to be closed, and only takes effect after a USB reconnect.
    fn set_boot_override_disabled(&mut self, disabled: bool) -> Result<(), ()>;

    /// Starts (or stops) the identify LED blink pattern.
    fn identify(&mut self, enable: bool);

    /// Enters DFU/bootloader mode. Treated as a single opaque operation
    /// per §1; never returns on success.
    fn enter_dfu(&mut self) -> !;

    /// Current 32-bit device tick, in microseconds, wrapping roughly hourly.
    fn device_tick_us(&self) -> u32;

    /// BCD-encoded hardware/software version pair for `GetDeviceVersion`.
    fn versions(&self) -> (u32, u32);

    /// Board/MCU identification strings plus a device id, for `GetBoardInfo`.
    fn board_info(&self) -> BoardInfo;
}

/// Static board identification returned by `GetBoardInfo`.
#[derive(Debug, Clone, Copy)]
pub struct BoardInfo {
    pub board_name: &'static str,
    pub mcu_name: &'static str,
    pub device_id: u32,
}
