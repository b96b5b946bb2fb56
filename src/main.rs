use anyhow::{Context, Result};
use clap::ArgMatches;
use hyperion::{
    cli::{self, expect_arg},
    run, Inputs, Program,
};
use log::LevelFilter;
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

fn main() -> Result<()> {
    let matches = cli::args().get_matches();

    let level = expect_arg::<String>(&matches, "verbose")
        .parse::<LevelFilter>()
        .context("invalid logging level")?;

    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .init();

    match matches.subcommand() {
        Some(("analyze", args)) => {
            let code = analyze(args)?;

            std::process::exit(code);
        }
        _ => unreachable!(),
    }
}

fn analyze(args: &ArgMatches) -> Result<i32> {
    let programs = args
        .get_many::<PathBuf>("programs")
        .into_iter()
        .flatten()
        .map(|path| load_program(path))
        .collect::<Result<Vec<_>>>()?;

    let inputs = Inputs {
        programs,
        targets: cli::targets(args),
        config: cli::config(args)?,
    };

    let (report, exit_code) = run(inputs);

    if args.get_flag("json") {
        println!("{}", report.to_json()?);
    } else {
        for (name, contract) in report.contracts.iter() {
            println!(
                "{}: {} paths ({} live, {} cut off, {} pruned), {} assertion failures{}",
                name,
                contract.paths,
                contract.live_paths(),
                contract.cutoffs,
                contract.pruned,
                contract.assertion_failures,
                if contract.inconclusive {
                    ", inconclusive"
                } else {
                    ""
                }
            );
        }
    }

    Ok(exit_code.code())
}

fn load_program(path: &Path) -> Result<Program> {
    let file = File::open(path).with_context(|| format!("failed to open program {:?}", path))?;

    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse program {:?}", path))
}
