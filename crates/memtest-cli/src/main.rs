mod logging;
mod render;

use std::ffi::OsString;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use memtest_core::{RunReport, SettleDelay, TestOrchestrator};
use memtest_error::MemtestError;
use memtest_types::{RunConfig, SEED_ENV_VAR};

use crate::logging::{init_logging, log_timed_operation};
use crate::render::{Console, write_banner};

const PROMPT_BLOCK_SIZE: &str = "Enter block size in MB (e.g., 100 for 100MB): ";
const PROMPT_ITERATIONS: &str = "Enter number of iterations: ";
const INVALID_INTAKE: &str = "Error: Block size and iterations must be positive.";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct CliOptions {
    size_mb: Option<i64>,
    iterations: Option<i64>,
    workers: Option<usize>,
    seed: Option<u64>,
    settle_ms: u64,
    show_progress: bool,
    json_path: Option<PathBuf>,
    log_file: Option<PathBuf>,
    verbose: bool,
    show_help: bool,
}

fn main() {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();

    let exit_code = run(std::env::args_os(), &mut input, &mut stdout, &mut stderr);
    drop(input);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn run<I, R, W, E>(args: I, input: &mut R, out: &mut W, err: &mut E) -> i32
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write + Send,
    E: Write,
{
    let options = match parse_args(args) {
        Ok(options) => options,
        Err(message) => {
            let _ = writeln!(err, "error: {message}");
            let _ = write_usage(err);
            return 2;
        }
    };

    if options.show_help {
        if write_usage(out).is_err() {
            return 1;
        }
        return 0;
    }

    match init_logging(options.verbose, options.log_file.as_deref()) {
        Ok(guard) => tracing::debug!(
            installed = guard.installed,
            log_path = ?guard.log_path,
            "logging initialised"
        ),
        Err(error) => {
            let _ = writeln!(err, "error: cannot open log file: {error}");
            return 1;
        }
    }

    let seed = match options.seed {
        Some(seed) => Some(seed),
        None => match seed_from_env(std::env::var(SEED_ENV_VAR).ok().as_deref()) {
            Ok(seed) => seed,
            Err(message) => {
                let _ = writeln!(err, "error: {message}");
                return 2;
            }
        },
    };

    if write_banner(out).is_err() {
        return 1;
    }

    let Some((size_mb, iterations)) = intake(&options, input, out) else {
        let _ = writeln!(err, "{INVALID_INTAKE}");
        return 1;
    };
    let config = match RunConfig::from_megabytes(size_mb, iterations) {
        Ok(config) => apply_overrides(config, &options, seed),
        Err(error) => {
            tracing::warn!(error = %error, size_mb, "block size does not fit in memory");
            let _ = writeln!(
                err,
                "error: {error}: block size exceeds the addressable range"
            );
            return 1;
        }
    };

    let report = {
        let console = Arc::new(Console::new(&mut *out, options.show_progress));
        let mut orchestrator = TestOrchestrator::new(config)
            .with_progress(console.clone())
            .with_observer(console);
        if options.settle_ms > 0 {
            orchestrator = orchestrator.with_interceptor(Arc::new(SettleDelay::new(
                Duration::from_millis(options.settle_ms),
            )));
        }
        orchestrator.run()
    };

    let report = match report {
        Ok(report) => report,
        Err(error) => return report_error(&error, err),
    };

    if let Some(path) = options.json_path.as_deref() {
        if let Err(error) = write_json_report(&report, path) {
            let _ = writeln!(err, "error: failed writing report `{}`: {error}", path.display());
            return 1;
        }
    }

    i32::from(!report.passed)
}

/// Read missing block size and iteration count from `input`.
///
/// Returns `None` unless both are positive numbers.
fn intake<R, W>(options: &CliOptions, input: &mut R, out: &mut W) -> Option<(i64, i64)>
where
    R: BufRead,
    W: Write,
{
    let size_mb = match options.size_mb {
        Some(size_mb) => Some(size_mb),
        None => prompt_number(PROMPT_BLOCK_SIZE, input, out),
    };
    let iterations = match options.iterations {
        Some(iterations) => Some(iterations),
        None => prompt_number(PROMPT_ITERATIONS, input, out),
    };
    let positive = |value: Option<i64>| value.filter(|&v| v > 0);
    Some((positive(size_mb)?, positive(iterations)?))
}

fn prompt_number<R, W>(prompt: &str, input: &mut R, out: &mut W) -> Option<i64>
where
    R: BufRead,
    W: Write,
{
    write!(out, "{prompt}").and_then(|()| out.flush()).ok()?;
    let mut line = String::new();
    input.read_line(&mut line).ok()?;
    line.trim().parse::<i64>().ok()
}

fn apply_overrides(config: RunConfig, options: &CliOptions, seed: Option<u64>) -> RunConfig {
    let config = match options.workers {
        Some(workers) => config.with_workers(workers),
        None => config,
    };
    match seed {
        Some(seed) => config.with_seed(seed),
        None => config,
    }
}

fn seed_from_env(value: Option<&str>) -> Result<Option<u64>, String> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|_| format!("invalid integer in `{SEED_ENV_VAR}`: `{raw}`")),
    }
}

fn report_error<E: Write>(error: &MemtestError, err: &mut E) -> i32 {
    if error.is_user_recoverable() {
        tracing::warn!(error = %error, "memtest run aborted");
    } else {
        tracing::error!(error = %error, "memtest run aborted");
    }
    let _ = writeln!(err, "error: {error}");
    if let Some(hint) = error.suggestion() {
        let _ = writeln!(err, "hint: {hint}");
    }
    error.exit_code()
}

fn write_json_report(report: &RunReport, path: &Path) -> Result<(), MemtestError> {
    log_timed_operation("write_json_report", &path.display().to_string(), || {
        let json = serde_json::to_string_pretty(report)
            .map_err(|e| MemtestError::internal(format!("serialize report: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    })
}

fn parse_args<I>(args: I) -> Result<CliOptions, String>
where
    I: IntoIterator<Item = OsString>,
{
    let mut iter = args.into_iter();
    let _argv0 = iter.next();

    let mut options = CliOptions {
        show_progress: true,
        ..CliOptions::default()
    };

    while let Some(argument) = iter.next() {
        let arg = argument.to_string_lossy().into_owned();

        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => {
                (flag.to_owned(), Some(value.to_owned()))
            }
            _ => (arg.clone(), None),
        };

        if inline.is_some()
            && matches!(
                flag.as_str(),
                "--help" | "--verbose" | "--no-progress"
            )
        {
            return Err(format!("`{flag}` does not take a value"));
        }

        let mut value_for = |name: &str| -> Result<String, String> {
            match inline.clone() {
                Some(value) => Ok(value),
                None => iter
                    .next()
                    .map(|v| v.to_string_lossy().into_owned())
                    .ok_or_else(|| format!("missing value for `{name}`")),
            }
        };

        match flag.as_str() {
            "-h" | "--help" => options.show_help = true,
            "-v" | "--verbose" => options.verbose = true,
            "--no-progress" => options.show_progress = false,
            "-s" | "--size-mb" => {
                options.size_mb = Some(parse_number(&value_for("--size-mb")?, "--size-mb")?);
            }
            "-n" | "--iterations" => {
                options.iterations =
                    Some(parse_number(&value_for("--iterations")?, "--iterations")?);
            }
            "-w" | "--workers" => {
                options.workers = Some(parse_number(&value_for("--workers")?, "--workers")?);
            }
            "--seed" => options.seed = Some(parse_number(&value_for("--seed")?, "--seed")?),
            "--settle-ms" => {
                options.settle_ms = parse_number(&value_for("--settle-ms")?, "--settle-ms")?;
            }
            "--json" => options.json_path = Some(PathBuf::from(value_for("--json")?)),
            "--log-file" => options.log_file = Some(PathBuf::from(value_for("--log-file")?)),
            _ if flag.starts_with('-') => return Err(format!("unknown option `{arg}`")),
            _ => return Err(format!("unexpected argument `{arg}`")),
        }
    }

    Ok(options)
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> Result<T, String> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| format!("invalid integer for `{flag}`: `{value}`"))
}

fn write_usage<W>(out: &mut W) -> io::Result<()>
where
    W: Write,
{
    writeln!(
        out,
        "Usage: memtest [-s|--size-mb MB] [-n|--iterations N] [-w|--workers N]\n\
         \x20              [--seed N] [--settle-ms MS] [--no-progress]\n\
         \x20              [--json PATH] [--log-file PATH] [-v|--verbose]\n\
         \n\
         Block size and iterations are prompted for when not given.\n\
         The random pass seed is taken from --seed, then {SEED_ENV_VAR}, else\n\
         chosen at random; it is printed so a failing run can be replayed.\n\
         \n\
         Examples:\n\
         \n\
         memtest\n\
         memtest -s 512 -n 3\n\
         memtest --size-mb=64 --iterations=10 --workers=4 --seed=42\n\
         memtest -s 1024 -n 1 --settle-ms 500 --json report.json\n",
    )
}
