use crate::{
    config::{defaults, Config, SolverBackend},
    engine::TargetedParameters,
    symbolic::Word,
};
use anyhow::{Context, Result};
use clap::{
    builder::RangedU64ValueParser, command, parser::ValueSource, value_parser, Arg, ArgAction,
    ArgMatches, Command,
};
use std::{fs::File, io::BufReader, path::PathBuf, str::FromStr};
use strum::VariantNames;

pub const LOGGING_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn expect_arg<'a, T>(m: &'a ArgMatches, arg: &str) -> &'a T
where
    T: Clone + Send + Sync + 'static,
{
    m.get_one::<T>(arg)
        .unwrap_or_else(|| panic!("argument \"{}\" has to be set in CLI at all times", arg))
}

fn parse_selector(v: &str) -> Result<u32, String> {
    let digits = v.trim_start_matches("0x");

    if digits.len() != 8 {
        return Err(String::from("selector has to be 4 bytes in hex, e.g. 0xa9059cbb"));
    }

    u32::from_str_radix(digits, 16).map_err(|e| e.to_string())
}

fn parse_slot(v: &str) -> Result<Word, String> {
    Word::from_str(v).map_err(|e| e.to_string())
}

fn bound(name: &'static str, help: &'static str, default: &'static str) -> Arg {
    Arg::new(name)
        .help(help)
        .long(name)
        .value_name("NUMBER")
        .default_value(default)
        .value_parser(value_parser!(u64))
}

pub fn args() -> Command {
    command!()
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("configure logging level to use")
                .value_name("LEVEL")
                .value_parser(LOGGING_LEVELS)
                .default_value(LOGGING_LEVELS[2])
                .global(true),
        )
        .subcommand(
            Command::new("analyze")
                .about("Symbolically execute decompiled EVM contracts")
                .arg(
                    Arg::new("programs")
                        .help("Decompiled programs in JSON format")
                        .value_name("PROGRAM")
                        .num_args(1..)
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("config")
                        .help("Configuration file in JSON format, flags take precedence")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    bound(
                        "depth-limit",
                        "Number of instructions after which a path is cut off",
                        "100",
                    )
                    .short('d'),
                )
                .arg(bound(
                    "loop-limit",
                    "Number of times a path may re-enter the same block",
                    "20",
                ))
                .arg(bound(
                    "gas-limit",
                    "Gas available to every path",
                    "400000000",
                ))
                .arg(bound(
                    "global-timeout",
                    "Seconds until all remaining paths are cut off",
                    "300",
                ))
                .arg(bound(
                    "solver-timeout",
                    "Milliseconds a single solver query may take",
                    "100",
                ))
                .arg(bound(
                    "call-depth-limit",
                    "Nesting depth of message calls after which a path is cut off",
                    "1024",
                ))
                .arg(
                    Arg::new("max-pending-paths")
                        .help("Pending paths beyond this many are cut off")
                        .long("max-pending-paths")
                        .value_name("NUMBER")
                        .default_value("100000")
                        .value_parser(RangedU64ValueParser::<usize>::new()),
                )
                .arg(
                    Arg::new("parallel")
                        .help("Explore paths on a pool of workers")
                        .short('p')
                        .long("parallel")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("workers")
                        .help("Number of workers in parallel mode [default: available cores]")
                        .short('w')
                        .long("workers")
                        .value_name("NUMBER")
                        .requires("parallel")
                        .value_parser(RangedU64ValueParser::<usize>::new().range(1..)),
                )
                .arg(
                    Arg::new("solver")
                        .help("SMT solver")
                        .short('s')
                        .long("solver")
                        .value_name("SOLVER")
                        .value_parser(SolverBackend::VARIANTS.to_vec())
                        .default_value(SolverBackend::VARIANTS[0]),
                )
                .arg(
                    Arg::new("target-contracts")
                        .help("Analyze only these contracts, the others serve as callees")
                        .short('t')
                        .long("target-contracts")
                        .value_name("NAME")
                        .value_delimiter(','),
                )
                .arg(
                    Arg::new("selectors")
                        .help("Explore only these function selectors")
                        .long("selectors")
                        .value_name("SELECTOR")
                        .value_delimiter(',')
                        .value_parser(parse_selector),
                )
                .arg(
                    Arg::new("slots")
                        .help("Storage slots to flag in the report")
                        .long("slots")
                        .value_name("SLOT")
                        .value_delimiter(',')
                        .value_parser(parse_slot),
                )
                .arg(
                    Arg::new("store-result")
                        .help("Write one report per contract to the output directory")
                        .long("store-result")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("output-dir")
                        .help("Directory for stored reports")
                        .short('o')
                        .long("output-dir")
                        .value_name("DIR")
                        .default_value(defaults::OUTPUT_DIR)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("print-paths")
                        .help("Log the constraints of every terminated path")
                        .long("print-paths")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("generate-test-cases")
                        .help("Solve every terminated path for concrete inputs")
                        .long("generate-test-cases")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("json")
                        .help("Print the report as JSON to stdout")
                        .long("json")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
}

/// Configuration from the optional config file, overridden by every flag that
/// was given on the command line.
pub fn config(m: &ArgMatches) -> Result<Config> {
    let file = m.get_one::<PathBuf>("config");

    let mut config = match file {
        Some(path) => {
            let reader = File::open(path)
                .map(BufReader::new)
                .with_context(|| format!("failed to open config file {:?}", path))?;

            serde_json::from_reader(reader)
                .with_context(|| format!("failed to parse config file {:?}", path))?
        }
        None => Config::default(),
    };

    // defaults of the command line must not shadow values of the config file
    let given = |arg: &str| file.is_none() || m.value_source(arg) == Some(ValueSource::CommandLine);

    if given("depth-limit") {
        config.depth_limit = *expect_arg(m, "depth-limit");
    }
    if given("loop-limit") {
        config.loop_limit = *expect_arg(m, "loop-limit");
    }
    if given("gas-limit") {
        config.gas_limit = *expect_arg(m, "gas-limit");
    }
    if given("global-timeout") {
        config.global_timeout_ms = expect_arg::<u64>(m, "global-timeout").saturating_mul(1000);
    }
    if given("solver-timeout") {
        config.solver_timeout_ms = *expect_arg(m, "solver-timeout");
    }
    if given("call-depth-limit") {
        config.call_depth_limit = *expect_arg(m, "call-depth-limit");
    }
    if given("max-pending-paths") {
        config.max_pending_paths = *expect_arg(m, "max-pending-paths");
    }
    if given("solver") {
        config.solver = expect_arg::<String>(m, "solver")
            .parse()
            .context("unknown solver backend")?;
    }
    if given("output-dir") {
        config.output_dir = expect_arg::<PathBuf>(m, "output-dir").clone();
    }

    if m.get_flag("parallel") {
        config.parallel = true;
    }
    if let Some(workers) = m.get_one::<usize>("workers") {
        config.workers = *workers;
    }
    if let Some(names) = m.get_many::<String>("target-contracts") {
        config.target_contracts = names.cloned().collect();
    }
    if m.get_flag("store-result") {
        config.store_result = true;
    }
    if m.get_flag("print-paths") {
        config.print_paths = true;
    }
    if m.get_flag("generate-test-cases") {
        config.generate_test_cases = true;
    }

    Ok(config)
}

pub fn targets(m: &ArgMatches) -> TargetedParameters {
    TargetedParameters {
        selectors: m
            .get_many::<u32>("selectors")
            .map(|s| s.copied().collect())
            .unwrap_or_default(),
        storage_slots: m
            .get_many::<Word>("slots")
            .map(|s| s.copied().collect())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(argv: &[&str]) -> ArgMatches {
        let matches = args()
            .try_get_matches_from(argv)
            .expect("valid command line");

        matches
            .subcommand_matches("analyze")
            .expect("analyze subcommand")
            .clone()
    }

    #[test]
    fn command_is_well_formed() {
        args().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let m = analyze(&[
            "hyperion",
            "analyze",
            "token.json",
            "vault.json",
            "--loop-limit",
            "3",
            "--global-timeout",
            "5",
            "--solver",
            "none",
            "--parallel",
            "--workers",
            "4",
            "--target-contracts",
            "Token,Vault",
        ]);

        let config = config(&m).expect("valid config");

        assert_eq!(config.loop_limit, 3);
        assert_eq!(config.depth_limit, defaults::DEPTH_LIMIT);
        assert_eq!(config.global_timeout(), std::time::Duration::from_secs(5));
        assert_eq!(config.solver, SolverBackend::None);
        assert!(config.parallel);
        assert_eq!(config.workers, 4);
        assert_eq!(config.target_contracts, vec!["Token", "Vault"]);
        assert_eq!(m.get_many::<PathBuf>("programs").map(|p| p.count()), Some(2));
    }

    #[test]
    fn selectors_and_slots_are_parsed() {
        let m = analyze(&[
            "hyperion",
            "analyze",
            "token.json",
            "--selectors",
            "0xa9059cbb,095ea7b3",
            "--slots",
            "0x2,7",
        ]);

        let targets = targets(&m);

        assert_eq!(
            targets.selectors.into_iter().collect::<Vec<_>>(),
            vec![0x095ea7b3, 0xa9059cbb]
        );
        assert_eq!(
            targets.storage_slots.into_iter().collect::<Vec<_>>(),
            vec![Word::from(2_u64), Word::from(7_u64)]
        );
    }

    #[test]
    fn short_selectors_are_rejected() {
        let result = args().try_get_matches_from([
            "hyperion",
            "analyze",
            "token.json",
            "--selectors",
            "0xa905",
        ]);

        assert!(result.is_err());
    }
}
