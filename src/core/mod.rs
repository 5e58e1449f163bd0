//! HTTP carrier types shared by the server and the engine.

pub mod request;
pub mod response;

pub use request::Request;
pub use response::Response;
