mod renderer;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use callpath_core::{CallProfiler, ProfilerConfig, current, profile_scope, snapshot};
use callpath_protocol::TreeSnapshot;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str =
    "Usage: callpath [--demo] [--print] [--save <path>] [--config <path>] [--debug] [snapshot.json]";

#[derive(Debug, Default)]
struct Args {
    demo: bool,
    print: bool,
    debug: bool,
    save: Option<PathBuf>,
    config: Option<PathBuf>,
    snapshot: Option<PathBuf>,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--demo" => parsed.demo = true,
                "--print" => parsed.print = true,
                "--debug" => parsed.debug = true,
                "--save" => {
                    parsed.save = Some(args.next().context("--save needs a path")?.into());
                }
                "--config" => {
                    parsed.config = Some(args.next().context("--config needs a path")?.into());
                }
                flag if flag.starts_with("--") => bail!("unknown flag {flag}\n{USAGE}"),
                path => {
                    if parsed.snapshot.replace(path.into()).is_some() {
                        bail!("more than one snapshot given\n{USAGE}");
                    }
                }
            }
        }
        if parsed.demo == parsed.snapshot.is_some() {
            bail!("pass either --demo or a snapshot path\n{USAGE}");
        }
        Ok(parsed)
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn busy_wait(ms: u64) {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(ms) {
        std::hint::spin_loop();
    }
}

fn demo_leaf() {
    profile_scope!("demo::leaf");
    busy_wait(19);
}

fn demo_middle() {
    profile_scope!("demo::middle");
    busy_wait(35);
    demo_leaf();
}

fn demo_top() {
    profile_scope!("demo::top");
    demo_middle();
    busy_wait(7);
}

/// Nested chain, standalone calls, then a cancelled chain that leaves no trace.
fn run_demo(config: ProfilerConfig) -> Result<CallProfiler> {
    let handle = current();
    handle.reset();
    handle.borrow_mut().set_config(config.clone());

    demo_top();
    demo_middle();
    demo_leaf();
    demo_leaf();
    {
        profile_scope!("demo::aborted");
        demo_leaf();
        current().cancel();
    }

    let snapshot = handle.borrow().snapshot();
    info!(nodes = snapshot.live_node_count(), "demo workload finished");
    // The thread-local profiler stays usable; the viewer works on a copy.
    restore(&snapshot, config)
}

fn restore(snapshot: &TreeSnapshot, config: ProfilerConfig) -> Result<CallProfiler> {
    CallProfiler::from_snapshot(snapshot, config).context("rebuilding profile from snapshot")
}

fn load_profiler(path: &Path, config: ProfilerConfig) -> Result<CallProfiler> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let snapshot = snapshot::parse_snapshot(&data)
        .with_context(|| format!("parsing snapshot {}", path.display()))?;
    let profiler = restore(&snapshot, config)?;
    info!(path = %path.display(), nodes = profiler.live_node_count(), "snapshot loaded");
    Ok(profiler)
}

fn main() -> Result<()> {
    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    init_tracing(args.debug);

    let config = match &args.config {
        Some(path) => {
            let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            ProfilerConfig::from_json(&data)?
        }
        None => ProfilerConfig::default(),
    };

    let profiler = match &args.snapshot {
        Some(path) => load_profiler(path, config)?,
        None => run_demo(config)?,
    };

    if let Some(path) = &args.save {
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        profiler.serialize(std::io::BufWriter::new(file))?;
        info!(path = %path.display(), "snapshot saved");
    }

    if args.print {
        let mut out = std::io::stdout().lock();
        profiler.print_profiling_result(&mut out)?;
        writeln!(out)?;
        profiler.print_statistics(&mut out)?;
        return Ok(());
    }

    renderer::run_tui(&profiler)
}
