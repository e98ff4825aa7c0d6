pub(crate) mod cancel;

/// Gives a bare `host:port` the scheme tonic needs to build an endpoint.
pub(crate) fn endpoint_uri(address: &str, tls: bool) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else if tls {
        format!("https://{}", address)
    } else {
        format!("http://{}", address)
    }
}
