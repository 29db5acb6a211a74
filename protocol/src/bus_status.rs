//! Bus status ladder, mirrored from the controller's Tx/Rx error counters.

#[cfg(feature = "defmt-03")]
use defmt::Format;

/// `Active -> Warning -> Passive -> Off`, driven by the worse of the Tx/Rx
/// error counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt-03", derive(Format))]
pub enum BusStatus {
    Active,
    Warning,
    Passive,
    Off,
}

impl BusStatus {
    /// Derives the ladder position from the worse of the two error counters.
    pub fn from_counters(tx_errors: u16, rx_errors: u16) -> Self {
        let worst = tx_errors.max(rx_errors);
        if worst >= 248 {
            BusStatus::Off
        } else if worst >= 128 {
            BusStatus::Passive
        } else if worst >= 96 {
            BusStatus::Warning
        } else {
            BusStatus::Active
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_boundaries() {
        assert_eq!(BusStatus::from_counters(95, 0), BusStatus::Active);
        assert_eq!(BusStatus::from_counters(96, 0), BusStatus::Warning);
        assert_eq!(BusStatus::from_counters(127, 0), BusStatus::Warning);
        assert_eq!(BusStatus::from_counters(128, 0), BusStatus::Passive);
        assert_eq!(BusStatus::from_counters(247, 0), BusStatus::Passive);
        assert_eq!(BusStatus::from_counters(248, 0), BusStatus::Off);
    }

    #[test]
    fn worst_of_tx_and_rx_wins() {
        assert_eq!(BusStatus::from_counters(10, 250), BusStatus::Off);
    }
}
