pub mod conversation;
pub mod events;
pub mod notification;
pub mod parcel;
pub mod trip;
pub mod user;

/// Latest accepted timestamp, 9999-12-31T23:59:59Z.
pub const MAX_TIMESTAMP: i64 = 253_402_300_799;

pub(crate) fn timestamp_in_range(ts: i64) -> bool {
    (0..=MAX_TIMESTAMP).contains(&ts)
}
