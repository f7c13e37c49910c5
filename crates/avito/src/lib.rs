pub mod client;
pub mod oauth;
pub mod webhook;

pub use client::{AvitoApiError, MessengerClient};
pub use oauth::TokenManager;
pub use webhook::WebhookEnvelope;
