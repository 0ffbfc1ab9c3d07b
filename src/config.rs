//! Configuration types for the output controller.

use std::time::Duration;

/// Specifies which enumerated driver to load.
///
/// Use [`DriverLoader::enumerate`](crate::driver::DriverLoader::enumerate)
/// to list the available names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DriverSelection {
    /// Use the first enumerated driver.
    #[default]
    First,
    /// Use a specific driver by name.
    ByName(String),
}

/// Configuration for an [`AsioOutput`](crate::AsioOutput).
///
/// Use [`OutputConfig::default()`] for sensible defaults, or customize as
/// needed.
///
/// # Example
///
/// ```
/// use asio_output::{DriverSelection, OutputConfig};
///
/// let config = OutputConfig {
///     driver: DriverSelection::ByName("Mock Driver".to_string()),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Which enumerated driver to load on `open`.
    pub driver: DriverSelection,

    /// Period of the housekeeping task that drains driver control events.
    ///
    /// The timer runs with latitude; a late tick simply drains more events
    /// at once. Default: 200ms.
    pub drain_interval: Duration,

    /// Capacity of the control-event ring in bytes (1024 minimum).
    ///
    /// Default: 1024
    pub event_capacity: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            driver: DriverSelection::default(),
            drain_interval: Duration::from_millis(200),
            event_capacity: 1024,
        }
    }
}
