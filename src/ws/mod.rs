pub mod connctx;
pub mod room;

pub use connctx::{ConnCtx, ConnState};
pub use room::{RoomEvent, RoomRegistry};
