pub mod coerce;
pub mod expiry;
pub mod resolve;
pub mod rest;
pub mod transport;

#[cfg(test)]
pub mod fake;

pub use expiry::{ExpiryNotifier, SessionExpired};
pub use resolve::{Locator, Resource};
pub use rest::{Query, RestClient};
pub use transport::{ApiBody, ApiRequest, ApiResponse, HttpTransport, Transport};
