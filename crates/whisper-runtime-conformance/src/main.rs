use anyhow::Context;
use std::path::PathBuf;
use std::process::ExitCode;
use whisper_runtime::{Executor, ExecutorConfig};
use whisper_runtime_conformance::{ExpectationTable, Suite};

fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(suite_dir) = args.next().map(PathBuf::from) else {
        eprintln!("usage: whisper-runtime-conformance <suite-dir> [expectations.json]");
        return Ok(ExitCode::from(2));
    };
    let expectations = match args.next() {
        Some(path) => ExpectationTable::from_json_file(&path).with_context(|| format!("Loading {path}"))?,
        None => ExpectationTable::default(),
    };

    let suite = Suite::from_directory(&suite_dir, expectations)?;
    let executor = Executor::with_builtins(ExecutorConfig::default())?;
    let report = suite.run(&executor);
    println!("{report}");

    Ok(if report.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
