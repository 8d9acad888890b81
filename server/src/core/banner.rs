//! Startup banner and URL display

use super::config::AppConfig;
use super::constants::APP_NAME;
use crate::utils::terminal::{endpoint_url, terminal_link};

/// Print the startup banner with scrape endpoints
pub fn print_banner(config: &AppConfig, transport: &str) {
    let server = &config.server;

    println!();
    println!(
        "  \x1b[1m\x1b[36m{}\x1b[0m \x1b[90mv{}\x1b[0m",
        APP_NAME,
        env!("CARGO_PKG_VERSION")
    );
    println!();

    const W: usize = 15;

    println!(
        "  \x1b[32m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}",
        "Metrics:",
        terminal_link(&endpoint_url(&server.host, server.port, "/metrics"))
    );
    println!(
        "  \x1b[32m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}",
        "Probe:",
        endpoint_url(&server.host, server.port, "/probe/<label>?target=<value>")
    );
    for (label, min_metrics) in &config.groupings {
        println!(
            "  \x1b[33m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {} \x1b[90m(min {})\x1b[0m",
            "Group:",
            endpoint_url(
                &server.host,
                server.port,
                &format!("/group/{}?target=<value>", label)
            ),
            min_metrics
        );
    }
    println!(
        "  \x1b[35m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}",
        "Observability:",
        terminal_link(&endpoint_url(
            &server.host,
            server.observability_port,
            "/metrics"
        ))
    );

    if server.host == "127.0.0.1" || server.host == "localhost" {
        println!(
            "  \x1b[90m➜  {:<W$} use --host 0.0.0.0 to expose\x1b[0m",
            "Network:"
        );
    }
    println!(
        "  \x1b[90m➜  {:<W$} {} ({} flows, realm {})\x1b[0m",
        "Source:",
        transport,
        config.flows.len(),
        config.sfx.credentials.realm
    );

    println!();
}

/// Print the `validate` command summary
pub fn print_summary(config: &AppConfig) {
    println!();
    println!(
        "  \x1b[32m✔\x1b[0m  {} is valid",
        config.config_path.display()
    );
    println!();
    for flow in &config.flows {
        println!(
            "  \x1b[1m{}\x1b[0m \x1b[90m{}\x1b[0m",
            flow.name(),
            flow.query()
        );
        for template in flow.templates() {
            println!(
                "    {:<10} {:<8} {} {:?}",
                template.stream(),
                template.kind().to_string(),
                template.name_template().source(),
                template.label_names()
            );
        }
        if let Some(history) = flow.historical_data() {
            println!("    \x1b[90mhistorical data: {:?}\x1b[0m", history);
        }
    }
    for (label, min_metrics) in &config.groupings {
        println!("  \x1b[1mgroup\x1b[0m {} \x1b[90mminMetrics={}\x1b[0m", label, min_metrics);
    }
    println!();
}
