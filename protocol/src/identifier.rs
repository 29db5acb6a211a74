//! USB vendor/product id pairs identifying the supported adapter variants
//! (§6). Plain `(vid, pid)` tuples so this module stays usable from both
//! the `no_std` device descriptor builder and the `std` host enumerator
//! without either one depending on the other's USB stack crate.

/// A USB vendor/product id pair.
pub type VidPid = (u16, u16);

pub const GS_USB_1: VidPid = (0x1d50, 0x606f);
pub const CANDLELIGHT: VidPid = (0x1209, 0x2323);
pub const CES_CANEXT_FD: VidPid = (0x1cd2, 0x606f);
pub const ABE_CANDEBUGGER_FD: VidPid = (0x16d0, 0x10b8);
pub const XYLANTA_SAINT3: VidPid = (0x16d0, 0x0f30);

/// All known Candlelight-class identifiers, for host-side enumeration.
pub const CANDLELIGHT_CLASS_IDS: &[VidPid] = &[
    GS_USB_1,
    CANDLELIGHT,
    CES_CANEXT_FD,
    ABE_CANDEBUGGER_FD,
    XYLANTA_SAINT3,
];
