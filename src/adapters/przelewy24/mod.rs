//! Przelewy24 payment provider adapter (instant bank transfer / BLIK).
//!
//! # Security
//!
//! - Register calls and notifications are signed with SHA-384 over
//!   `|`-joined fields and the merchant CRC key
//! - Notification signs are compared in constant time

mod p24_adapter;

pub use p24_adapter::{
    is_valid_blik_code, map_p24_notification, p24_sign, P24Config, P24Notification, P24PaymentAdapter,
    NOTIFICATION_PATH,
};
