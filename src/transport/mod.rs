mod http_transport;
mod upstream;

pub use http_transport::{sanitize_upstream_error, upstream_error_from_response, HttpTransport};
pub use upstream::PreparedUpstream;
