//! DFU/bootloader entry (§1 Non-goal boundary): present only so the
//! interface layout has the DFU-only vendor interface the teacher's
//! descriptor set reserves for it. No DFU protocol state machine lives
//! here; entering DFU mode is a single opaque platform callback.

use crate::platform::Platform;

/// USB DFU interface subclass/protocol, as declared on `CandlelightClass`'s
/// second vendor interface.
pub use canstack_protocol::request::{DFU_PROTOCOL, DFU_SUBCLASS};

/// Hands off to the platform's bootloader entry point. Never returns.
pub fn enter<P: Platform>(platform: &mut P) -> ! {
    platform.enter_dfu()
}
