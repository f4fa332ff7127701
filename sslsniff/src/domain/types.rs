//! Types shared across modules

pub use sslsniff_common::Direction;

/// Name printed by the default handler for a direction
#[must_use]
pub fn op_name(direction: Direction) -> &'static str {
    match direction {
        Direction::Read => "SSL_OP_READ",
        Direction::Write => "SSL_OP_WRITE",
    }
}
