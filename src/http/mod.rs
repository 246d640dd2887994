//! HTTP transport shared by classification, downloading, and rendering.
//!
//! Requests carry a User-Agent drawn from the configured pool plus fixed
//! Accept and Accept-Language headers. Redirects are followed.

mod charset;
mod client;
mod error;

pub use charset::{charset_from_content_type, charset_from_meta, decode_body};
pub use client::{FetchedPage, HttpClient};
pub use error::FetchError;
