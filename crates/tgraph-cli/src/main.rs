use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};
use tracing_subscriber::EnvFilter;

use tgraph_ir::{Program, ProgramRecord};
use tgraph_opt::{OptLevel, PassManager, PassRegistry, PipelineConfig};

/// tgraph: run graph-rewriting passes over a serialized program
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input program (JSON program record)
    #[arg(required_unless_present = "list_passes")]
    input: Option<PathBuf>,

    /// Comma-separated pass schedule, e.g. `eliminate_pad,dead_code_elimination`
    #[arg(long, value_delimiter = ',', conflicts_with = "config")]
    passes: Option<Vec<String>>,

    /// Pipeline configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Optimization level used when no schedule is given: 0, 1, or 2
    #[arg(long, default_value = "1", value_parser = parse_opt_level)]
    opt_level: OptLevel,

    /// Output path for the optimized program (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Dump the optimized IR to stderr
    #[arg(long)]
    emit_ir: bool,

    /// List registered passes and exit
    #[arg(long)]
    list_passes: bool,
}

fn parse_opt_level(s: &str) -> Result<OptLevel, String> {
    match s {
        "0" => Ok(OptLevel::O0),
        "1" => Ok(OptLevel::O1),
        "2" => Ok(OptLevel::O2),
        _ => Err(format!(
            "invalid optimization level '{s}', expected 0, 1, or 2"
        )),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let registry = PassRegistry::with_builtins();

    if cli.list_passes {
        for name in registry.list() {
            println!("{name}");
        }
        return Ok(());
    }
    let Some(input) = &cli.input else {
        return Err(miette::miette!("no input program given"));
    };

    // 1. Load the program.
    let mut program = read_program(input)?;

    // 2. Resolve the schedule before touching the program.
    let pm = build_pipeline(&cli, &registry)?;

    // 3. Optimize.
    let changed = pm
        .run(&mut program)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("optimization failed")?;
    log::info!(
        "{}: ran [{}], changed: {changed}",
        input.display(),
        pm.pass_names().join(", ")
    );

    // 4. Optionally dump IR to stderr.
    if cli.emit_ir {
        eprintln!("{}", tgraph_ir::dump_program(&program));
    }

    // 5. Write the result.
    let json = serde_json::to_string_pretty(&program.to_record())
        .into_diagnostic()
        .wrap_err("failed to serialize the optimized program")?;
    match &cli.output {
        Some(path) => std::fs::write(path, json)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn read_program(path: &Path) -> miette::Result<Program> {
    let text = std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    let record: ProgramRecord = serde_json::from_str(&text)
        .into_diagnostic()
        .wrap_err_with(|| format!("{} is not a program record", path.display()))?;
    Program::from_record(&record)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err_with(|| format!("failed to rebuild {}", path.display()))
}

fn build_pipeline(cli: &Cli, registry: &PassRegistry) -> miette::Result<PassManager> {
    let config = match (&cli.config, &cli.passes) {
        (Some(path), _) => {
            let text = std::fs::read_to_string(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to read {}", path.display()))?;
            PipelineConfig::from_json(&text)
                .map_err(|e| miette::miette!("{e}"))
                .wrap_err_with(|| format!("invalid pipeline in {}", path.display()))?
        }
        (None, Some(passes)) => PipelineConfig::with_passes(passes.iter().map(|p| p.trim())),
        (None, None) => return Ok(PassManager::for_level(cli.opt_level)),
    };
    PassManager::from_config(registry, &config).map_err(|e| miette::miette!("{e}"))
}
