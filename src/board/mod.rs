//! Shared kanban boards with dense item ordering.
//!
//! | Module         | Responsibility                                          |
//! |----------------|---------------------------------------------------------|
//! | `position`     | pure position arithmetic: shifts, clamping, density     |
//! | `engine`       | reordering operations over a [`engine::PositionStore`]  |
//! | `db`           | SQLite store, units of work, CRUD                       |
//! | `materializer` | ordered board trees for snapshots                       |
//! | `channels`     | per-board broadcast transport                           |
//! | `sync`         | snapshot publication and subscriber-side following     |
//! | `service`      | async façade: retries, spans, tracked broadcasts        |
//! | `api` / `ws`   | REST handlers and WebSocket subscriptions               |
//! | `server`       | router and server bootstrap                             |

pub mod api;
pub mod channels;
pub mod db;
pub mod engine;
pub mod materializer;
pub mod models;
pub mod position;
pub mod server;
pub mod service;
pub mod sync;
pub mod ws;

pub use channels::{BroadcastHub, ChannelKey, ChannelTransport};
pub use db::{BoardDb, DbHandle};
pub use engine::{PositionStore, ReorderEngine};
pub use service::BoardService;
pub use sync::{BoardMessage, MutationState, SnapshotFollower};
