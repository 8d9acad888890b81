//! Terminal utility functions

/// Format a URL as a clickable terminal hyperlink if supported.
///
/// Uses OSC 8 escape sequences where the terminal supports them and falls
/// back to plain colored text otherwise.
pub fn terminal_link(url: &str) -> String {
    if supports_hyperlinks::on(supports_hyperlinks::Stream::Stdout) {
        format!("\x1b]8;;{}\x07\x1b[36m{}\x1b[0m\x1b]8;;\x07", url, url)
    } else {
        format!("\x1b[36m{}\x1b[0m", url)
    }
}

/// Build an `http://` URL for a bound address, showing `localhost` for
/// wildcard binds.
pub fn endpoint_url(host: &str, port: u16, path: &str) -> String {
    let host = match host {
        "0.0.0.0" | "::" => "localhost",
        h if h.contains(':') && !h.starts_with('[') => {
            return format!("http://[{}]:{}{}", h, port, path);
        }
        h => h,
    };
    format!("http://{}:{}{}", host, port, path)
}
