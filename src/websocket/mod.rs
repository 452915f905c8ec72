pub mod connection;
pub mod handler;
pub mod msg_content_handler;
pub mod msg_join_handler;
pub mod msg_presence_handler;
pub mod msg_sync_handler;

pub use connection::Connection;
pub use handler::websocket_handler;
