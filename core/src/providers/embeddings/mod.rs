mod hashing;
mod http;

pub use hashing::HashingBackend;
pub use http::HttpTokenBackend;
