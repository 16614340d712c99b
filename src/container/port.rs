//! Free port allocation.

use std::net::TcpListener;

/// First port tried when no hint is given by configuration.
pub const DEFAULT_PORT: u16 = 8000;

/// Number of consecutive ports probed from the hint.
pub const PORT_SEARCH_SPAN: u16 = 100;

fn is_free(host: &str, port: u16) -> bool {
    TcpListener::bind((host, port)).is_ok()
}

/// Find a bindable port on `host`.
///
/// With a hint, probes `hint..hint + PORT_SEARCH_SPAN`. Without one, lets the
/// OS pick. The port is released before returning, so the caller races any
/// other process for it.
pub fn allocate_port(host: &str, hint: Option<u16>) -> Option<u16> {
    match hint {
        Some(start) => (0..PORT_SEARCH_SPAN)
            .filter_map(|offset| start.checked_add(offset))
            .find(|&port| port != 0 && is_free(host, port)),
        None => TcpListener::bind((host, 0))
            .and_then(|l| l.local_addr())
            .map(|addr| addr.port())
            .ok(),
    }
}
