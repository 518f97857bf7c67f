//! comfymcp webhooks - event subscriptions, signed delivery with retry, delivery log

pub mod manager;
pub mod signing;

pub use manager::{
    DeliveryRecord, RetryPolicy, WebhookConfig, WebhookError, WebhookEvent, WebhookManager, WebhookView,
};
pub use signing::{sign, verify_signature, SIGNATURE_HEADER};
