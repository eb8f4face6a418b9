//! The RFID-scan decision engine and session accounting.

mod decision;
mod gate;


pub use decision::{
    AccessEngine, REASON_ACCESS_GRANTED, REASON_INTERNAL_ERROR, REASON_NO_PERMISSION,
    REASON_RESOURCE_DISABLED, REASON_RESOURCE_NOT_FOUND, REASON_SESSION_STARTED,
    REASON_UNKNOWN_RFID, REASON_USER_DISABLED, ScanOutcome,
};
pub use gate::SessionGate;
