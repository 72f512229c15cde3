use std::borrow::Cow;

/// Settings for a single drive.
///
/// # Examples
///
/// ```
/// use fiber_promise::DriveConfig;
///
/// let config = DriveConfig::default()
///     .with_name("fetch-user")
///     .with_max_suspensions(16);
/// assert_eq!(config.name(), "fetch-user");
/// assert_eq!(config.max_suspensions(), Some(16));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveConfig {
    name: Cow<'static, str>,
    max_suspensions: Option<usize>,
}

impl DriveConfig {
    /// Label recorded on the drive's tracing span.
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Finish with [`Error::SuspensionLimit`](crate::Error::SuspensionLimit)
    /// once the body tries to suspend more than `limit` times.
    pub fn with_max_suspensions(mut self, limit: usize) -> Self {
        self.max_suspensions = Some(limit);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_suspensions(&self) -> Option<usize> {
        self.max_suspensions
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            name: Cow::Borrowed("coroutine"),
            max_suspensions: None,
        }
    }
}
