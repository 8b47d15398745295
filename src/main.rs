#![allow(clippy::result_large_err)]

use anyhow::Context;
use fleetcheck::app::FleetcheckApp;
use fleetcheck::cluster::Scope;
use fleetcheck::config::FleetcheckConfig;
use fleetcheck::telemetry;
use std::time::Duration;

enum CliCommand {
    Preflight { timeout: Option<Duration> },
    Validate,
    Wait {
        namespace: String,
        selector: Option<String>,
        min: usize,
        timeout: Option<Duration>,
    },
    Endpoints { timeout: Option<Duration> },
    Dns,
    Help,
}

struct CliArgs {
    config_path: Option<String>,
    command: CliCommand,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise telemetry")?;

    let CliArgs {
        config_path,
        command,
    } = parse_cli_args(std::env::args().skip(1))?;
    if let CliCommand::Help = command {
        print_help();
        return Ok(());
    }

    let settings = FleetcheckConfig::load(config_path.as_deref())
        .context("failed to load configuration")?
        .resolve()
        .context("invalid configuration")?;
    let app = FleetcheckApp::from_settings(settings);

    tokio::select! {
        result = run_command(&app, command) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            anyhow::bail!("interrupted before the check completed")
        }
    }
}

async fn run_command(app: &FleetcheckApp, command: CliCommand) -> anyhow::Result<()> {
    let settings = app.settings();
    match command {
        CliCommand::Preflight { timeout } => {
            let timeout = timeout.unwrap_or(settings.preflight_timeout);
            app.run_preflight(timeout)
                .await
                .context("preflight checks failed")?;
            println!("preflight checks passed");
        }
        CliCommand::Validate => {
            app.validate_service_consistency()
                .await
                .context("service state is inconsistent")?;
            println!("service state is consistent");
        }
        CliCommand::Wait {
            namespace,
            selector,
            min,
            timeout,
        } => {
            let scope = Scope {
                namespace: Some(namespace),
                selector,
            };
            let timeout = timeout.unwrap_or(settings.wait_timeout);
            app.wait_for_ready(&scope, min, timeout)
                .await
                .with_context(|| format!("pods in {scope} did not become ready"))?;
            println!("pods in {scope} are ready");
        }
        CliCommand::Endpoints { timeout } => {
            let timeout = timeout.unwrap_or(settings.wait_timeout);
            app.wait_for_endpoints_ready(timeout)
                .await
                .context("agent endpoints did not become ready")?;
            println!("agent endpoints are ready");
        }
        CliCommand::Dns => {
            app.dns_preflight()
                .await
                .with_context(|| format!("{} is not plumbed into the agents", settings.dns_service))?;
            println!("{} is plumbed into every agent", settings.dns_service);
        }
        CliCommand::Help => print_help(),
    }
    Ok(())
}

fn parse_cli_args<I>(args: I) -> anyhow::Result<CliArgs>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut config_path = None;

    let command = loop {
        let Some(arg) = args.next() else {
            break None;
        };
        match arg.as_str() {
            "-c" | "--config" => {
                if config_path.is_some() {
                    anyhow::bail!("config path specified multiple times");
                }
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected path after {arg}"))?;
                config_path = Some(value);
            }
            "-h" | "--help" | "help" => break Some(CliCommand::Help),
            "preflight" => {
                let mut timeout = None;
                parse_flags(&mut args, "preflight", |flag, value| match flag {
                    "--timeout" => {
                        timeout = Some(parse_timeout(value)?);
                        Ok(())
                    }
                    other => anyhow::bail!("unrecognised preflight argument `{other}`"),
                })?;
                break Some(CliCommand::Preflight { timeout });
            }
            "validate" => break Some(CliCommand::Validate),
            "wait" => {
                let mut namespace = None;
                let mut selector = None;
                let mut min = 0;
                let mut timeout = None;
                parse_flags(&mut args, "wait", |flag, value| {
                    match flag {
                        "--namespace" | "-n" => namespace = Some(value.to_string()),
                        "--selector" | "-l" => selector = Some(value.to_string()),
                        "--min" => {
                            min = value
                                .parse()
                                .with_context(|| format!("--min must be a count (got `{value}`)"))?
                        }
                        "--timeout" => timeout = Some(parse_timeout(value)?),
                        other => anyhow::bail!("unrecognised wait argument `{other}`"),
                    }
                    Ok(())
                })?;
                let namespace =
                    namespace.ok_or_else(|| anyhow::anyhow!("wait requires --namespace"))?;
                break Some(CliCommand::Wait {
                    namespace,
                    selector,
                    min,
                    timeout,
                });
            }
            "endpoints" => {
                let mut timeout = None;
                parse_flags(&mut args, "endpoints", |flag, value| match flag {
                    "--timeout" => {
                        timeout = Some(parse_timeout(value)?);
                        Ok(())
                    }
                    other => anyhow::bail!("unrecognised endpoints argument `{other}`"),
                })?;
                break Some(CliCommand::Endpoints { timeout });
            }
            "dns" => break Some(CliCommand::Dns),
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    };

    let command = command.unwrap_or(CliCommand::Help);
    if !matches!(command, CliCommand::Help) {
        if let Some(extra) = args.next() {
            anyhow::bail!("unexpected trailing argument `{extra}`");
        }
    }

    Ok(CliArgs {
        config_path,
        command,
    })
}

/// Consumes `--flag value` pairs until the arguments run out.
fn parse_flags<I, F>(args: &mut I, command: &str, mut apply: F) -> anyhow::Result<()>
where
    I: Iterator<Item = String>,
    F: FnMut(&str, &str) -> anyhow::Result<()>,
{
    while let Some(flag) = args.next() {
        let value = args
            .next()
            .ok_or_else(|| anyhow::anyhow!("{command}: expected value after {flag}"))?;
        apply(&flag, &value)?;
    }
    Ok(())
}

fn parse_timeout(value: &str) -> anyhow::Result<Duration> {
    humantime::parse_duration(value)
        .with_context(|| format!("--timeout must be a valid duration (got `{value}`)"))
}

fn print_help() {
    println!(
        "\
Usage: fleetcheck [-c <PATH>] <COMMAND>

Commands:
  preflight [--timeout <DURATION>]
                          Gate on agent status, controllers, health and service plumbing
  validate                Cross-check desired, realized and dataplane service state once
  wait --namespace <NS> [--selector <SEL>] [--min <N>] [--timeout <DURATION>]
                          Wait for pods to become ready
  endpoints [--timeout <DURATION>]
                          Wait for every agent endpoint to become ready
  dns                     Check that the DNS service is plumbed into every agent
  help                    Print this help message

Options:
  -c, --config <PATH>    Configuration file (layered over config/local and FLEETCHECK__* env)
  -h, --help             Print this help message
"
    );
}
