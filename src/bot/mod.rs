//! Telegram-facing surface: command grammar, dispatch, views, handlers.

pub mod commands;
pub mod dispatch;
pub mod handlers;
pub mod views;
