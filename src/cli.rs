//! Command-line option parsing for the `load-curtail` binary.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::Level;

#[derive(Debug)]
pub struct CliOptions {
    /// Agent configuration file; the built-in demo when absent.
    pub config: Option<PathBuf>,
    /// Overrides `simulation.steps`.
    pub steps: Option<usize>,
    /// Overrides `simulation.seed`.
    pub seed: Option<u64>,
    pub log_level: Level,
    /// Writes step records to this CSV file.
    pub telemetry_out: Option<PathBuf>,
}

pub fn parse_args() -> Result<CliOptions, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    parse_args_from(args)
}

pub fn parse_args_from(args: Vec<String>) -> Result<CliOptions, String> {
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        std::process::exit(0);
    }
    parse_options(&args)
}

fn parse_options(args: &[String]) -> Result<CliOptions, String> {
    let mut i = 0usize;
    let mut config = None;
    let mut steps = None;
    let mut seed = None;
    let mut log_level = None;
    let mut telemetry_out = None;

    while i < args.len() {
        let flag = args[i].as_str();
        i += 1;
        match flag {
            "--config" => {
                let path = args.next_or_err(
                    i,
                    "missing value for --config (expected a TOML file path)",
                )?;
                if config.replace(PathBuf::from(path)).is_some() {
                    return Err("--config provided more than once".to_string());
                }
            }
            "--steps" => {
                let value =
                    args.next_or_err(i, "missing value for --steps (expected a step count)")?;
                let n = parse_value::<usize>("--steps", value)?;
                if n == 0 {
                    return Err("--steps must be > 0".to_string());
                }
                if steps.replace(n).is_some() {
                    return Err("--steps provided more than once".to_string());
                }
            }
            "--seed" => {
                let value = args.next_or_err(i, "missing value for --seed (expected a u64)")?;
                if seed.replace(parse_value::<u64>("--seed", value)?).is_some() {
                    return Err("--seed provided more than once".to_string());
                }
            }
            "--log-level" => {
                let value = args.next_or_err(
                    i,
                    "missing value for --log-level (expected trace, debug, info, warn or error)",
                )?;
                let level = parse_value::<Level>("--log-level", value)?;
                if log_level.replace(level).is_some() {
                    return Err("--log-level provided more than once".to_string());
                }
            }
            "--telemetry-out" => {
                let path = args.next_or_err(
                    i,
                    "missing value for --telemetry-out (expected a file path)",
                )?;
                if telemetry_out.replace(PathBuf::from(path)).is_some() {
                    return Err("--telemetry-out provided more than once".to_string());
                }
            }
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    Ok(CliOptions {
        config,
        steps,
        seed,
        log_level: log_level.unwrap_or(Level::INFO),
        telemetry_out,
    })
}

fn parse_value<T: FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("invalid value for {flag}: \"{value}\""))
}

trait SliceArgExt {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String>;
}

impl SliceArgExt for [String] {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String> {
        self.get(index)
            .map(String::as_str)
            .ok_or_else(|| err.to_string())
    }
}

pub fn print_usage() {
    eprintln!("load-curtail: demand-limit curtailment agent against a simulated building");
    eprintln!();
    eprintln!("Usage: load-curtail [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>          Load agent configuration from a TOML file");
    eprintln!("  --steps <n>              Override the number of simulated steps");
    eprintln!("  --seed <u64>             Override the random seed");
    eprintln!("  --log-level <level>      trace, debug, info, warn or error (default: info)");
    eprintln!("  --telemetry-out <path>   Export step records to CSV");
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("If no --config is given, the built-in demo building is used.");
}
