mod cron;
mod serve;
mod tools;

use anyhow::Result;
use console::style;

use crate::core::terminal::{self, GuideSection, print_error};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Core")
        .command("serve", "Start the scheduler and the HTTP API")
        .print();

    GuideSection::new("Inspection")
        .command("tools", "Print tool schemas (--tenant <id> --tool <name>)")
        .command("cron", "Explain a 5-field cron pattern and its next fire times")
        .print();

    GuideSection::new("Server flags")
        .command("--api-host <host>", "Bind address (default 127.0.0.1)")
        .command("--api-port <port>", "Listen port (default 17890)")
        .print();

    println!(
        "\n {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("toolhub").green()
    );
}

pub(crate) fn parse_api_server_flags(
    args: &[String],
    start: usize,
    mut api_host: String,
    mut api_port: u16,
) -> (String, u16) {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-port" => {
                if i + 1 < args.len() {
                    api_port = args[i + 1].parse().unwrap_or(17890);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-host" => {
                if i + 1 < args.len() {
                    api_host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (api_host, api_port)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ToolsCommandArgs {
    pub tenant: String,
    pub tool: Option<String>,
}

pub(crate) fn parse_tools_command_args(args: &[String], start: usize) -> ToolsCommandArgs {
    let mut tenant = crate::tools::descriptor::DEFAULT_TENANT.to_string();
    let mut tool = None;
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--tenant" | "-t" => {
                if i + 1 < args.len() {
                    tenant = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--tool" => {
                if i + 1 < args.len() {
                    tool = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    ToolsCommandArgs { tenant, tool }
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let Some(cmd) = args.get(1) else {
        print_help();
        return Ok(());
    };

    match cmd.as_str() {
        "serve" => serve::run_server(&args).await,
        "tools" => tools::print_schemas(parse_tools_command_args(&args, 2)).await,
        "cron" => {
            let pattern = args[2..].join(" ");
            if pattern.trim().is_empty() {
                print_error("Usage: toolhub cron \"<minute> <hour> <day> <month> <day_of_week>\"");
                return Ok(());
            }
            cron::explain(&pattern)
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_api_server_flags, parse_tools_command_args};

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_api_server_flags_reads_host_and_port() {
        let args = argv(&["toolhub", "serve", "--api-host", "0.0.0.0", "--api-port", "19000"]);
        let (host, port) = parse_api_server_flags(&args, 2, "127.0.0.1".to_string(), 17890);
        assert_eq!(host, "0.0.0.0");
        assert_eq!(port, 19000);
    }

    #[test]
    fn parse_api_server_flags_keeps_configured_values() {
        let args = argv(&["toolhub", "serve"]);
        let (host, port) = parse_api_server_flags(&args, 2, "10.0.0.2".to_string(), 9000);
        assert_eq!((host.as_str(), port), ("10.0.0.2", 9000));
    }

    #[test]
    fn unparsable_port_falls_back_to_default() {
        let args = argv(&["toolhub", "serve", "--api-port", "http"]);
        let (_, port) = parse_api_server_flags(&args, 2, "127.0.0.1".to_string(), 9000);
        assert_eq!(port, 17890);
    }

    #[test]
    fn parse_tools_command_args_reads_tenant_and_tool() {
        let parsed = parse_tools_command_args(&argv(&["toolhub", "tools", "-t", "acme", "--tool", "strava"]), 2);
        assert_eq!(parsed.tenant, "acme");
        assert_eq!(parsed.tool.as_deref(), Some("strava"));

        let defaults = parse_tools_command_args(&argv(&["toolhub", "tools"]), 2);
        assert_eq!(defaults.tenant, "default");
        assert_eq!(defaults.tool, None);
    }
}
