use std::collections::HashSet;
use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use browser_probe::wait::WaitUntil;

#[derive(Parser)]
#[command(
    name = "browser-probe",
    version,
    about = "Inspect and drive web pages over the Chrome DevTools Protocol",
    long_about = "browser-probe runs one inspection or interaction per invocation against a \
        Chromium-family browser. A session (browser process, isolated context and page) is \
        created on demand and torn down afterwards unless --keep-open is given, in which case \
        the next invocation reattaches to the same page.\n\n\
        Every command prints one JSON object on stdout on success and one JSON error object \
        on stderr on failure.",
    after_long_help = "\
QUICK START:
  # Open a page and keep the browser for the next commands
  browser-probe navigate --url https://example.com --keep-open

  # List interactive elements, then click one
  browser-probe snapshot --keep-open
  browser-probe click --selector '#go' --keep-open

  # Watch console errors for ten seconds while loading a page
  browser-probe console --url https://example.com --duration 10000 --types error,warning

  # Tear the kept-open session down
  browser-probe close

EXIT CODES:
  0  Success
  1  Any failure (see the `kind` field of the error object)

ENVIRONMENT VARIABLES:
  BROWSER_PROBE_ENGINE      Browser engine: chromium, chrome or edge
  BROWSER_PROBE_TIMEOUT     Default timeout in milliseconds
  BROWSER_PROBE_CONFIG      Path to the configuration file
  BROWSER_PROBE_OUTPUT_DIR  Directory for screenshots and snapshots
  CHROME_PATH               Browser executable
  RUST_LOG                  Log filter for stderr diagnostics",
    term_width = 100
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[allow(clippy::struct_excessive_bools)]
#[derive(Args)]
pub struct GlobalOpts {
    /// Browser engine [possible values: chromium, chrome, edge]
    #[arg(long, global = true, env = "BROWSER_PROBE_ENGINE")]
    pub engine: Option<String>,

    /// Run without a visible window [default: true]
    #[arg(
        long,
        global = true,
        num_args = 0..=1,
        default_missing_value = "true",
        value_name = "BOOL"
    )]
    pub headless: Option<bool>,

    /// Timeout in milliseconds for waits and browser commands [default: 30000]
    #[arg(long, global = true, env = "BROWSER_PROBE_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Leave the browser running so the next invocation can reuse it
    #[arg(long, global = true)]
    pub keep_open: bool,

    /// Viewport width in CSS pixels [default: 1280]
    #[arg(long, global = true)]
    pub width: Option<u32>,

    /// Viewport height in CSS pixels [default: 720]
    #[arg(long, global = true)]
    pub height: Option<u32>,

    /// Browser executable (overrides engine discovery)
    #[arg(long, global = true)]
    pub executable: Option<PathBuf>,

    /// Configuration file (overrides the default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory for screenshots and snapshots
    #[arg(long, global = true, env = "BROWSER_PROBE_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Pretty-print the JSON result
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Debug logging on stderr (RUST_LOG takes precedence)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Load a URL and wait for it
    #[command(after_long_help = "\
EXAMPLES:
  browser-probe navigate --url example.com
  browser-probe navigate --url https://example.com --wait-until networkidle")]
    Navigate(NavigateArgs),

    /// Click an element
    #[command(
        long_about = "Click the first element matching a CSS selector. The element must have a \
            non-zero size; it is scrolled into view and receives a mouse press and release at \
            its centre. With --wait-for, a selector expected after the click is awaited; its \
            absence is reported as a warning, not a failure."
    )]
    Click(ClickArgs),

    /// Fill a form field
    #[command(
        long_about = "Set the value of an input, textarea or select element, firing input and \
            change events, then read the value back. `matched` is false when the page changed \
            what was typed."
    )]
    Fill(FillArgs),

    /// Evaluate JavaScript in the page
    Evaluate(EvaluateArgs),

    /// Capture a PNG screenshot
    Screenshot(ScreenshotArgs),

    /// Write the interactive elements of the page to a JSON file
    Snapshot(SnapshotArgs),

    /// Describe one element
    Describe(SelectorArgs),

    /// Wait for an element to appear
    Wait(SelectorArgs),

    /// Capture console messages for a fixed duration
    #[command(after_long_help = "\
EXAMPLES:
  # Attach to the kept-open page and listen for five seconds
  browser-probe console

  # Load a page and keep only errors and warnings
  browser-probe console --url https://example.com --types error,warn")]
    Console(MonitorArgs),

    /// Capture network requests for a fixed duration
    #[command(after_long_help = "\
EXAMPLES:
  browser-probe network --url https://example.com --types xhr,fetch --duration 8000")]
    Network(MonitorArgs),

    /// Report the persisted session without launching a browser
    Status,

    /// Close the persisted session and its browser
    Close,
}

/// Optional navigation before a command acts on the page.
#[derive(Args)]
pub struct TargetArgs {
    /// Navigate here first; otherwise act on the current page
    #[arg(long)]
    pub url: Option<String>,

    /// When the preliminary navigation counts as finished
    #[arg(long, value_enum, default_value_t = WaitUntil::Load)]
    pub wait_until: WaitUntil,
}

#[derive(Args)]
pub struct NavigateArgs {
    /// URL to load; `https://` is assumed when no scheme is given
    #[arg(long)]
    pub url: String,

    #[arg(long, value_enum, default_value_t = WaitUntil::Load)]
    pub wait_until: WaitUntil,
}

#[derive(Args)]
pub struct ClickArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// CSS selector of the element to click
    #[arg(long)]
    pub selector: String,

    /// Selector expected to appear after the click
    #[arg(long)]
    pub wait_for: Option<String>,
}

#[derive(Args)]
pub struct FillArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// CSS selector of the field
    #[arg(long)]
    pub selector: String,

    /// Value to enter
    #[arg(long, allow_hyphen_values = true)]
    pub value: String,

    /// Empty the field before filling it
    #[arg(long)]
    pub clear: bool,
}

#[derive(Args)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Expression to evaluate; promises are awaited
    #[arg(long, allow_hyphen_values = true)]
    pub script: String,
}

#[derive(Args)]
pub struct ScreenshotArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Capture the whole scrollable page
    #[arg(long, conflicts_with = "selector")]
    pub full_page: bool,

    /// Capture only this element
    #[arg(long)]
    pub selector: Option<String>,

    /// File to write instead of a timestamped name in the output directory
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct SnapshotArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// File to write instead of a timestamped name in the output directory
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct SelectorArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// CSS selector
    #[arg(long)]
    pub selector: String,
}

#[derive(Args)]
pub struct MonitorArgs {
    /// Navigate here once capture has started; without it an existing
    /// session is required
    #[arg(long)]
    pub url: Option<String>,

    /// Capture window in milliseconds [default: 5000]
    #[arg(long)]
    pub duration: Option<u64>,

    /// Only keep these categories (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub types: Vec<String>,
}

/// Remove `--flags` the selected command does not know, along with the value
/// token that follows them. Returns the remaining arguments and the removed
/// flags.
pub fn strip_unknown_flags<I>(args: I, command: &clap::Command) -> (Vec<OsString>, Vec<String>)
where
    I: IntoIterator<Item = OsString>,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let subcommands: HashSet<&str> = command.get_subcommands().map(clap::Command::get_name).collect();
    let selected = args
        .iter()
        .skip(1)
        .filter_map(|a| a.to_str())
        .find(|a| subcommands.contains(a))
        .and_then(|name| command.find_subcommand(name));

    let mut known: HashSet<&str> = HashSet::from(["help", "version"]);
    known.extend(command.get_arguments().filter_map(clap::Arg::get_long));
    if let Some(sub) = selected {
        known.extend(sub.get_arguments().filter_map(clap::Arg::get_long));
    }

    let mut kept = Vec::with_capacity(args.len());
    let mut stripped = Vec::new();
    let mut iter = args.into_iter().peekable();
    while let Some(arg) = iter.next() {
        let Some(name) = arg.to_str().and_then(|a| a.strip_prefix("--")) else {
            kept.push(arg);
            continue;
        };
        if name.is_empty() {
            // `--` ends flag processing.
            kept.push(arg);
            kept.extend(iter);
            break;
        }
        let (flag, inline_value) = match name.split_once('=') {
            Some((flag, _)) => (flag, true),
            None => (name, false),
        };
        if known.contains(flag) {
            kept.push(arg);
            continue;
        }
        stripped.push(flag.to_owned());
        if !inline_value {
            let takes_next = iter.peek().and_then(|next| next.to_str()).is_some_and(|next| {
                !next.starts_with('-') && !subcommands.contains(next)
            });
            if takes_next {
                iter.next();
            }
        }
    }
    (kept, stripped)
}
