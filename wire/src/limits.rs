//! Limits for package framing.

/// Wire-level limits enforced while building and parsing packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of one package in bytes.
    pub max_package_bytes: usize,
    /// Maximum size of one reliable event payload in bytes.
    pub max_event_bytes: usize,
    /// Maximum number of events carried by one package.
    pub max_events_per_package: usize,
    /// Maximum number of outstanding unacknowledged packages.
    pub max_outstanding_packages: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_package_bytes: 2048,
            max_event_bytes: 512,
            max_events_per_package: 16,
            max_outstanding_packages: 64,
        }
    }
}

impl Limits {
    /// Creates limits suitable for testing with smaller values.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_package_bytes: 1024,
            max_event_bytes: 128,
            max_events_per_package: 4,
            max_outstanding_packages: 16,
        }
    }
}
