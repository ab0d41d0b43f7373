//! Realtime Gateway: the bidirectional WebSocket transport. One task per
//! connection reads client messages and dispatches them; a second task per
//! joined document forwards the Hub's broadcast events back to the socket.
//! No event-emitter lifecycle here — just two plain loops and a channel.

mod messages;
mod websocket;

pub use websocket::upgrade;
