pub mod client;
pub mod endpoints;

pub use client::{CLIENT_EMAIL_HEADER, CSRF_HEADER, RequestOptions, SecureApiClient};
pub use endpoints::{CheckoutRequest, ClientSyncRequest, RedirectUrl};
