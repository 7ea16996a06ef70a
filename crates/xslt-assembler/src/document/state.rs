use std::fmt;

/// Load lifecycle of a document.
///
/// ```text
/// UNINITIALIZED → INITIALIZED → HEADERS-RECEIVED → LOADING → COMPLETE
///                       └──────────────┴───────────────┴────→ ERROR
/// ```
///
/// `Complete` and `Error` are terminal for one load; a new `load` or
/// `parse` starts the cycle again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReadyState {
    #[default]
    Uninitialized,
    Initialized,
    HeadersReceived,
    Loading,
    Complete,
    Error,
}

impl ReadyState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// A load has started and has not reached a terminal state.
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Initialized | Self::HeadersReceived | Self::Loading)
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::HeadersReceived => "headers-received",
            Self::Loading => "loading",
            Self::Complete => "complete",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Transient marker on a stylesheet that blocks re-entrant `load`/`parse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Busy {
    /// Dependencies are being fetched and merged.
    Resolving,
    /// A transform is running.
    Executing,
}

impl Busy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resolving => "resolving",
            Self::Executing => "executing",
        }
    }
}
