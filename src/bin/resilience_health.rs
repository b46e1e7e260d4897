//! resilience-health: 加载弹性配置并暴露熔断器健康检查端点
//!
//! Usage:
//!   resilience-health                 Serve GET /health
//!   resilience-health check           Validate the config and print the effective breakers
//!
//! Environment:
//!   RESILIENCE_CONFIG   Path to the YAML/JSON config (defaults when unset)
//!   RESILIENCE_BIND     Listen address (default 127.0.0.1:8089)
//!   RUST_LOG            Log filter (default info)

use anyhow::Context;
use planner_resilience::config::ResilienceConfig;
use planner_resilience::{Clock, SystemClock};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND: &str = "127.0.0.1:8089";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let cfg = ResilienceConfig::from_env().context("loading resilience config")?;

    match args.get(1).map(String::as_str) {
        None | Some("serve") => serve(cfg).await,
        Some("check") => {
            check(&cfg);
            Ok(())
        }
        Some("help" | "--help" | "-h") => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"resilience-health: circuit breaker health endpoint

USAGE:
    resilience-health [COMMAND]

COMMANDS:
    serve       Serve GET /health (default)
    check       Validate config and list effective breaker settings
    help        Show this help message

ENVIRONMENT:
    RESILIENCE_CONFIG   Config file path
    RESILIENCE_BIND     Listen address (default {DEFAULT_BIND})"#
    );
}

fn check(cfg: &ResilienceConfig) {
    println!("breaker defaults: {:?}", cfg.breaker_defaults);
    for name in cfg.breakers.keys() {
        println!("breaker {name}: {:?}", cfg.breaker_config(name));
    }
    for (route, policy) in &cfg.routes {
        println!("route {route}: {policy:?}");
    }
}

async fn serve(cfg: ResilienceConfig) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let registry = Arc::new(cfg.build_registry(clock)?);

    let bind = std::env::var("RESILIENCE_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;

    planner_resilience::http::serve(listener, registry, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    Ok(())
}
