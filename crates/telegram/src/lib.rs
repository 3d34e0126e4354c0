//! Telegram interface for taskwire.
//!
//! - **Polling** (`polling`) - `getUpdates` long-poll loop with reconnect backoff
//! - **Events** (`events`) - update classification and handler dispatch into the dialog layer
//! - **Commands** (`commands`) - `/create_task`, `/cancel`, `/help` and the inline-button codec
//! - **Keyboards** (`keyboard`) - prompt rendering as inline keyboards
//! - **API** (`api`) - `reqwest` Bot API client implementing the chat transport port
//!
//! ```text
//! getUpdates → PollingRunner → EventDispatcher → Handlers → TaskDialogService
//!                                                              ↓
//!                              TelegramClient (sendMessage / editMessageText / getFile)
//! ```

pub mod api;
pub mod commands;
pub mod events;
pub mod keyboard;
pub mod model;
pub mod polling;

pub use api::{TelegramApiError, TelegramClient};
pub use events::{default_dispatcher, EventDispatcher, TaskDialogs};
pub use polling::{PollingRunner, ReconnectPolicy, UpdateSource};
