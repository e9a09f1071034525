//! Replicated document store: the Loro-backed replica each client edits, the
//! transport seam it syncs through, and the two substrates behind that seam.

pub mod document;
pub mod hub;
pub mod relay;
pub mod transport;

pub use document::{SharedDocument, TEXT_CONTAINER};
pub use hub::RoomHub;
pub use relay::RelayTransport;
pub use transport::{ClientFrame, RoomEvent, RoomLink, RoomTransport};
