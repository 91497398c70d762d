//! XSM Emulator - CLI Entry Point
//!
//! Commands:
//! - `xsm-emu run <disk>` - Boot a disk image and run until HALT
//! - `xsm-emu mkdisk <disk> <block>=<listing>...` - Build a disk image
//! - `xsm-emu disasm <disk> --block <n>` - Disassemble one disk block

use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use simple_logger::SimpleLogger;

use xsm::cpu::{DebugHook, Machine, Options};
use xsm::debugger::ConsoleDebugger;
use xsm::image::{disassemble, load_listing, read_block_words, write_listing};
use xsm::storage::{BlockStorage, FileDisk, NUM_BLOCKS};
use xsm::StdConsole;

#[derive(Parser)]
#[command(name = "xsm-emu")]
#[command(version = "0.1.0")]
#[command(about = "An emulator of the XSM teaching machine")]
struct Cli {
    /// Log verbosity
    #[arg(long, global = true, value_enum, default_value = "warn")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Boot a disk image and run until the machine halts
    Run(RunArgs),
    /// Build a disk image from instruction listings
    Mkdisk {
        /// Disk image to create
        output: PathBuf,
        /// Listings to place, as BLOCK=PATH
        #[arg(value_name = "BLOCK=LISTING")]
        blocks: Vec<String>,
    },
    /// Disassemble one block of a disk image
    Disasm {
        /// Disk image to read
        image: PathBuf,
        /// Block to disassemble
        #[arg(short, long, default_value = "0")]
        block: usize,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Disk image to boot from
    #[arg(value_name = "DISK")]
    image: PathBuf,
    /// JSON file with machine options
    #[arg(long)]
    config: Option<PathBuf>,
    /// Timer interval in user-mode instructions (0 disables the timer)
    #[arg(long)]
    timer: Option<u32>,
    /// Disk latency in instructions
    #[arg(long = "disk")]
    disk_latency: Option<u32>,
    /// Console latency in instructions
    #[arg(long = "console")]
    console_latency: Option<u32>,
    /// Stop at BRKP instructions
    #[arg(long)]
    debug: bool,
    /// Use the full-screen debugger instead of the line debugger
    #[arg(long)]
    tui: bool,
    /// Stop after this many instructions
    #[arg(long)]
    max_cycles: Option<u64>,
    /// Print the final machine state as JSON
    #[arg(long)]
    dump_state: bool,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = SimpleLogger::new().with_level(cli.log_level.into()).init() {
        eprintln!("❌ Logger setup failed: {}", e);
    }

    match cli.command {
        Commands::Run(args) => run_image(&args),
        Commands::Mkdisk { output, blocks } => make_disk(&output, &blocks),
        Commands::Disasm { image, block } => disassemble_block(&image, block),
    }
}

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("❌ {}: {}", context, err);
    process::exit(1);
}

fn load_options(args: &RunArgs) -> Options {
    let mut options = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .unwrap_or_else(|e| fail(&format!("Failed to read {}", path.display()), e));
            Options::from_json(&text).unwrap_or_else(|e| fail("Invalid configuration", e))
        }
        None => Options::default(),
    };

    if let Some(timer) = args.timer {
        options.timer = timer;
    }
    if let Some(disk) = args.disk_latency {
        options.disk = disk;
    }
    if let Some(console) = args.console_latency {
        options.console = console;
    }
    if args.debug {
        options.debug = true;
    }

    if let Err(e) = options.validate() {
        fail("Invalid configuration", e);
    }
    options
}

fn debug_hook(tui: bool) -> Box<dyn DebugHook> {
    if tui {
        #[cfg(feature = "tui")]
        return Box::new(xsm::tui::TuiDebugger::new());
        #[cfg(not(feature = "tui"))]
        log::warn!("built without the tui feature; using the line debugger");
    }
    Box::new(ConsoleDebugger::stdio())
}

fn run_image(args: &RunArgs) {
    let options = load_options(args);
    log::info!("options: {:?}", options);

    let storage = FileDisk::open(&args.image)
        .unwrap_or_else(|e| fail(&format!("Failed to open {}", args.image.display()), e));
    println!("🔧 Booting {}", storage.path().display());
    let mut machine = Machine::new(options, storage, StdConsole)
        .unwrap_or_else(|e| fail("Failed to create machine", e));

    if let Err(e) = machine.boot() {
        fail("Boot failed", e);
    }

    let mut hook = debug_hook(args.tui);
    let result = match args.max_cycles {
        Some(max) => machine.run_limited(max, hook.as_mut()),
        None => machine.run(hook.as_mut()),
    };
    drop(hook);

    let failed = match result {
        Ok(cycles) => {
            log::info!("stopped after {} instructions ({:?})", cycles, machine.state);
            false
        }
        Err(e) => {
            eprintln!("❌ Machine error: {}", e);
            true
        }
    };

    if args.dump_state {
        match serde_json::to_string_pretty(&machine.snapshot()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("❌ Failed to serialize state: {}", e),
        }
    }

    if let Err(e) = machine.shutdown() {
        fail("Failed to close disk", e);
    }
    if failed {
        process::exit(1);
    }
}

fn parse_placement(placement: &str) -> Option<(usize, &str)> {
    let (block, path) = placement.split_once('=')?;
    let block = block.trim().parse::<usize>().ok()?;
    (block < NUM_BLOCKS && !path.is_empty()).then_some((block, path))
}

fn make_disk(output: &Path, blocks: &[String]) {
    let mut disk = FileDisk::create(output)
        .unwrap_or_else(|e| fail(&format!("Failed to create {}", output.display()), e));

    for placement in blocks {
        let Some((block, path)) = parse_placement(placement) else {
            fail("Bad placement", format!("{:?}, expected BLOCK=LISTING", placement));
        };
        let listing = load_listing(path)
            .unwrap_or_else(|e| fail(&format!("Failed to load {}", path), e));
        match write_listing(&mut disk, block, &listing) {
            Ok(count) => println!("✅ Block {:>3}: {} instructions from {}", block, count, path),
            Err(e) => fail(&format!("Failed to write block {}", block), e),
        }
    }

    if let Err(e) = disk.close() {
        fail("Failed to close disk", e);
    }
    println!("💾 Wrote {}", output.display());
}

fn disassemble_block(image: &Path, block: usize) {
    let mut disk = FileDisk::open(image)
        .unwrap_or_else(|e| fail(&format!("Failed to open {}", image.display()), e));
    let words = read_block_words(&mut disk, block)
        .unwrap_or_else(|e| fail(&format!("Failed to read block {}", block), e));

    println!("; {} block {}", disk.path().display(), block);
    print!("{}", disassemble(&words, 0));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_placement() {
        assert_eq!(parse_placement("7=os/startup.xsm"), Some((7, "os/startup.xsm")));
        assert_eq!(parse_placement("7"), None);
        assert_eq!(parse_placement("x=a"), None);
        assert_eq!(parse_placement("3="), None);
        assert_eq!(parse_placement(&format!("{}=a", NUM_BLOCKS)), None);
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "xsm-emu", "--log-level", "debug", "run", "disk.xfs",
            "--timer", "0", "--disk", "5", "--debug", "--max-cycles", "100",
        ]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.image, PathBuf::from("disk.xfs"));
        assert_eq!(args.timer, Some(0));
        assert_eq!(args.disk_latency, Some(5));
        assert_eq!(args.console_latency, None);
        assert!(args.debug);
        assert_eq!(args.max_cycles, Some(100));

        let options = load_options(&args);
        assert_eq!(options.timer, 0);
        assert_eq!(options.disk, 5);
        assert_eq!(options.console, Options::default().console);
    }
}
