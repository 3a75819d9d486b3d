use http::StatusCode;

/// Errors that know which HTTP status they correspond to
///
/// Worker-facing wrappers use this to turn a failed completion into an API
/// error without matching on every variant of the underlying error type.
pub trait HttpError: std::error::Error {
    /// HTTP status code for this error
    fn status_code(&self) -> StatusCode;

    /// Machine-readable error type (e.g. `upstream_error`)
    fn error_type(&self) -> &str;

    /// Message safe to expose to API consumers
    fn client_message(&self) -> String;
}
