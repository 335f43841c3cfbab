use clap::Parser;
use relay::commands::{self, ReleaseArgs};
use relay::core::config::{BumpStrategy, ConfigLayer, DepsLayer, ReleaseStrategy};
use relay::core::error::{RelayError, print_error};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Release every package of a JavaScript monorepo, semantically
#[derive(Parser)]
#[command(name = "relay")]
#[command(version, about, long_about = None)]
#[command(styles = get_styles())]
struct Cli {
  /// Compute releases and notes without writing manifests or creating tags
  #[arg(long)]
  dry_run: bool,

  /// Verbose output
  #[arg(long)]
  debug: bool,

  /// Verify conditions for one package at a time
  #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
  sequential_init: Option<bool>,

  /// Prepare a package only after its local dependencies are prepared
  #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
  sequential_prepare: Option<bool>,

  /// Only follow the first parent when collecting commits
  #[arg(long)]
  first_parent: bool,

  /// How dependents' ranges are rewritten when a local dependency changes
  #[arg(long = "deps.bump", value_enum)]
  deps_bump: Option<BumpStrategy>,

  /// Release type given to dependents of a changed package
  #[arg(long = "deps.release", value_enum)]
  deps_release: Option<ReleaseStrategy>,

  /// Prefix for rewritten ranges with the override strategy, e.g. `^`
  #[arg(long = "deps.prefix")]
  deps_prefix: Option<String>,

  /// Comma separated globs of packages to leave out
  #[arg(long, value_delimiter = ',')]
  ignore_packages: Vec<String>,

  /// Leave out packages marked private
  #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
  ignore_private: Option<bool>,

  /// Tag template, `${name}` and `${version}` are filled in
  #[arg(long)]
  tag_format: Option<String>,

  /// Workspace root (defaults to the current directory)
  #[arg(long)]
  cwd: Option<PathBuf>,
}

impl Cli {
  /// The command line as the topmost configuration layer
  fn config_layer(&self) -> ConfigLayer {
    let deps = (self.deps_bump.is_some() || self.deps_release.is_some() || self.deps_prefix.is_some()).then(|| {
      DepsLayer {
        bump: self.deps_bump,
        release: self.deps_release,
        prefix: self.deps_prefix.clone(),
      }
    });
    ConfigLayer {
      extends: None,
      sequential_init: self.sequential_init,
      sequential_prepare: self.sequential_prepare,
      first_parent: self.first_parent.then_some(true),
      debug: self.debug.then_some(true),
      dry_run: self.dry_run.then_some(true),
      ignore_private: self.ignore_private,
      ignore_packages: (!self.ignore_packages.is_empty()).then(|| self.ignore_packages.clone()),
      tag_format: self.tag_format.clone(),
      deps,
      branches: None,
    }
  }
}

fn get_styles() -> clap::builder::Styles {
  clap::builder::Styles::styled()
    .usage(
      anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
    )
    .header(
      anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
    )
    .literal(anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))))
    .invalid(
      anstyle::Style::new()
        .bold()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
    )
    .error(
      anstyle::Style::new()
        .bold()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
    )
    .valid(
      anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
    )
    .placeholder(anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))))
}

/// `RUST_LOG` wins; otherwise relay's own logs at info, or debug with `--debug`
fn init_tracing(debug: bool) {
  let fallback = if debug { "relay=debug" } else { "relay=info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_ansi(std::io::stderr().is_terminal())
    .with_target(false)
    .init();
}

fn main() {
  let cli = Cli::parse();
  init_tracing(cli.debug);

  let cwd = match cli.cwd.clone() {
    Some(dir) => dir,
    None => match std::env::current_dir() {
      Ok(dir) => dir,
      Err(e) => handle_error(RelayError::from(e).context("Failed to get current directory")),
    },
  };

  let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
    Ok(runtime) => runtime,
    Err(e) => handle_error(RelayError::from(e).context("Failed to start the async runtime")),
  };

  let args = ReleaseArgs {
    cwd,
    cli: cli.config_layer(),
  };
  if let Err(err) = runtime.block_on(commands::run_release(args)) {
    handle_error(err);
  }
}

fn handle_error(err: RelayError) -> ! {
  print_error(&err);
  std::process::exit(err.exit_code().as_i32());
}
