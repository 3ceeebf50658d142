use http::Uri;

/// Out-of-band routing hints attached to a single call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Host to use instead of consulting the ring. Partition resolution
    /// still applies.
    pub target_host: Option<Uri>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the call to `host`.
    pub fn with_target_host(mut self, host: Uri) -> Self {
        self.target_host = Some(host);
        self
    }
}
