//! Live delivery for Souk conversations.
//!
//! - [`SessionRegistry`] tracks authenticated connections per user
//! - [`RoomMultiplexer`] owns room membership and best-effort delivery
//! - [`fanout`] turns service results into room dispatches
//! - [`bus`] carries broadcasts between nodes
//! - [`ChatHub`] sequences persistence and fan-out per conversation

pub mod bus;
pub mod events;
pub mod fanout;
pub mod hub;
pub mod registry;
pub mod rooms;

pub use bus::{BroadcastBus, BusEnvelope, BusError, MemoryBus, RedisBus};
pub use events::{ClientEvent, ServerEvent};
pub use fanout::Dispatch;
pub use hub::{ChatHub, Principal};
pub use registry::{SessionId, SessionRegistry};
pub use rooms::{ConnectionHandle, ConnectionId, RoomId, RoomMultiplexer, OUTBOUND_BUFFER};
