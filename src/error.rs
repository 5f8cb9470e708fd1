//! Domain-specific error types for deauth-watch.
//!
//! Uses `thiserror` for the core error kinds; the application layer wraps
//! them with `anyhow` context.

use thiserror::Error;

/// Failures while switching the wireless adapter in or out of monitor mode.
#[derive(Error, Debug)]
pub enum AdapterModeError {
    #[error("failed to run '{tool}': {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{tool} {action} {interface}' exited with {status}")]
    NonZeroExit {
        tool: String,
        action: &'static str,
        interface: String,
        status: std::process::ExitStatus,
    },
}

/// Errors raised by the capture source.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open capture device '{device}': {source}")]
    DeviceOpen {
        device: String,
        #[source]
        source: pcap::Error,
    },

    #[error("Failed to read packet: {0}")]
    PacketRead(#[from] pcap::Error),

    #[error("Failed to spawn capture thread: {0}")]
    Thread(#[source] std::io::Error),
}

/// Errors from the display sink.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a session failed to start.
#[derive(Error, Debug)]
pub enum StartError {
    #[error("Failed to enable monitor mode: {0}")]
    Adapter(#[from] AdapterModeError),

    #[error("Failed to start capture: {0}")]
    Capture(#[from] CaptureError),
}
