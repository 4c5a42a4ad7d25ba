//! Уведомления о торговых событиях.

mod notifier;
mod telegram;

pub use notifier::*;
pub use telegram::{TelegramConfig, TelegramNotifier};
