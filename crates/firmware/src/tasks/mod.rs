//! Embassy tasks wiring the control core to the capability traits.

pub mod control;
pub mod watchdog;
