use clap::{ArgAction, Parser};
use quire::config::{self, BuildConfig, DEFAULT_STYLE};
use quire::output;
use quire::pipeline::Site;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Incremental static site builder for a directory of markdown documents")]
#[command(long_about = "\
Incremental static site builder for a directory of markdown documents

Every .md file in SOURCE becomes one HTML page named after its title, and
index.html lists all pages, newest first. Pages are only regenerated when
their source is newer than the page on disk.

Metadata lives in an HTML comment at the top of a document:

  <!--meta
  title: Hello World
  time: 2024-03-01 09:30:00
  author: Jane
  template:
    delims:
      left: '[['
      right: ']]'
  -->

Missing titles default to the file name, missing times to the file's
modification time. The rendered body is itself a template and can use
{{ meta.* }}, {{ page.* }} and {{ data.* }} (from --data).

Set RUST_LOG or pass -v / -vv for diagnostic logging.")]
#[command(version)]
struct Cli {
    /// Directory holding the markdown sources
    #[arg(default_value = ".")]
    source: PathBuf,

    /// Output directory (defaults to SOURCE)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Page template file (replaces the built-in page template)
    #[arg(long)]
    page: Option<PathBuf>,

    /// Index template file (replaces the built-in index template)
    #[arg(long)]
    index: Option<PathBuf>,

    /// Write index.html after the pages
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    genindex: bool,

    /// Site data file (.json, .yaml, .yml or .toml), exposed as `data`
    #[arg(long)]
    data: Option<PathBuf>,

    /// Syntax highlighting theme, or `none` for plain code blocks
    #[arg(long, default_value = DEFAULT_STYLE)]
    style: String,

    /// Worker threads (capped at available cores)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn build_config(&self) -> BuildConfig {
        let mut config = BuildConfig::new(&self.source);
        if let Some(out) = &self.out {
            config.output = out.clone();
        }
        config.page_template = self.page.clone();
        config.index_template = self.index.clone();
        config.gen_index = self.genindex;
        config.data = self.data.clone();
        config.style = (!self.style.eq_ignore_ascii_case("none")).then(|| self.style.clone());
        config.jobs = self.jobs;
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.build_config();
    let site = match Site::open(config) {
        Ok(site) => site,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_thread_pool(site.config().jobs);

    println!(
        "==> Building {} → {}",
        site.config().source.display(),
        site.config().output.display()
    );
    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_build_event(&event) {
                println!("{}", line);
            }
        }
    });
    let result = site.build(Some(tx));
    if printer.join().is_err() {
        tracing::warn!("progress printer panicked");
    }

    match result {
        Ok(report) => {
            output::print_build_output(&report);
            ExitCode::SUCCESS
        }
        Err(failure) => {
            output::print_build_failure(&failure);
            ExitCode::FAILURE
        }
    }
}

/// Install the stderr log subscriber. `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match verbose {
        0 => "quire=warn",
        1 => "quire=debug",
        _ => "quire=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the global rayon pool.
///
/// Capped at the number of available cores: users can constrain down, not up.
fn init_thread_pool(jobs: Option<usize>) {
    let threads = config::effective_threads(jobs);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
