//! Client for the appliance's JSON command API.
//!
//! ## Architecture
//!
//! - `protocol`: request envelope and the tagged reply decoding
//! - `transport`: authenticated HTTP session (`reqwest` + cookie jar)
//! - `client`: the `Appliance` seam and the shared `Client` handle
//! - `methods`: typed wrappers for the commands the engines use

pub mod client;
pub mod methods;
mod protocol;
mod transport;

pub use client::{Appliance, Client, DownloadTarget};
pub use protocol::{Fault, Reply, Request};
pub use transport::{HttpSession, SessionConfig, attachment_filename};
