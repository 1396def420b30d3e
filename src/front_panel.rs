//! Packed front-panel register
//!
//! ```text
//! bit  15..10   9..6   5    4     3    2      1..0
//!      unused   power  -    boost -    bypass -
//! ```
//!
//! Reconciliation never reverse-maps this address, so any write to it is
//! unpacked straight into the variable table.

use tracing::debug;

use crate::variables::VariableTable;

/// Address of the packed register (40000)
pub const FRONT_PANEL_ADDRESS: u16 = 0x9C40;

const POWER_SHIFT: u16 = 6;
const POWER_MASK: u16 = 0x0F;
const BOOST_BIT: u16 = 1 << 4;
const BYPASS_BIT: u16 = 1 << 2;

/// Decoded front-panel fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrontPanel {
    /// Fan power level, 0..=15
    pub power: u8,
    /// Boost ventilation
    pub boost: bool,
    /// Heat-exchanger bypass
    pub bypass: bool,
}

impl FrontPanel {
    /// Decode a raw register value
    pub fn unpack(raw: u16) -> Self {
        Self {
            power: ((raw >> POWER_SHIFT) & POWER_MASK) as u8,
            boost: raw & BOOST_BIT != 0,
            bypass: raw & BYPASS_BIT != 0,
        }
    }

    /// Set current and target of `$power`, `$boost` and `$bypass`
    pub fn apply(&self, vars: &mut VariableTable) {
        debug!(
            "Front panel: power={} boost={} bypass={}",
            self.power, self.boost, self.bypass
        );
        vars.set_both("$power", f64::from(self.power));
        vars.set_both("$boost", f64::from(u8::from(self.boost)));
        vars.set_both("$bypass", f64::from(u8::from(self.bypass)));
    }
}
