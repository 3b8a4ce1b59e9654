use std::fmt;

/// HSMS connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    NotConnected,
    /// Transport connect or accept in progress.
    Connecting,
    /// Connected, Select handshake in progress.
    Selecting,
    /// Data messages may flow.
    Selected,
    /// Connected but deselected; a new Select.req re-selects.
    Deselected,
}

impl ConnectionState {
    /// True while a transport connection exists.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Selecting | Self::Selected | Self::Deselected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotConnected => "not-connected",
            Self::Connecting => "connecting",
            Self::Selecting => "selecting",
            Self::Selected => "selected",
            Self::Deselected => "deselected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
