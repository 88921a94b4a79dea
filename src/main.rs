use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use tinyisp::progress::{BarStyle, Observer, Phase, ProgressEvent};
use tinyisp::transport::SimTarget;
use tinyisp::{format, Chip, Config, ErrorKind, Flashing, IspError, Transport};

#[derive(clap::Parser)]
#[command(
    name = "tinyisp",
    version,
    about = "Program and dump ATtiny13 flash over bit-banged GPIO ISP lines"
)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// YAML file with timing and pin settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Talk to an in-memory blank ATtiny13 instead of real hardware
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Identify the connected chip and show its fuses
    Info {},
    /// Show the fuse bytes with their meaning
    Fuses {},
    /// Erase flash and lock bits
    Erase {},
    /// Set the clock fuse, erase, program and verify
    Flash {
        /// Intel HEX, ELF or raw binary firmware
        path: PathBuf,
    },
    /// Compare flash content with a firmware file
    Verify { path: PathBuf },
    /// Read the whole flash into an Intel HEX file
    Dump {
        #[arg(default_value = "dump.hex")]
        path: PathBuf,
    },
}

/// One bar per phase, replaced when the phase changes.
struct Bars {
    current: Option<(Phase, ProgressBar)>,
}

impl Bars {
    fn new() -> Self {
        Bars { current: None }
    }

    fn finish(&mut self) {
        if let Some((_, bar)) = self.current.take() {
            bar.finish();
        }
    }
}

impl Observer for Bars {
    fn progress(&mut self, event: ProgressEvent) {
        if self.current.as_ref().map(|(phase, _)| *phase) != Some(event.phase) {
            self.finish();
            let chars = match event.style {
                BarStyle::Hatched => "#>-",
                BarStyle::Solid => "=> ",
            };
            let bar = ProgressBar::new(100);
            if let Ok(style) = ProgressStyle::default_bar().template("{msg:>10} [{bar:40.cyan/blue}] {pos:>3}%") {
                bar.set_style(style.progress_chars(chars));
            }
            bar.set_message(event.phase.label());
            self.current = Some((event.phase, bar));
        }
        if let Some((_, bar)) = &self.current {
            bar.set_position(event.percent as u64);
        }
    }
}

impl Drop for Bars {
    fn drop(&mut self) {
        self.finish();
    }
}

fn run<T: Transport>(mut flashing: Flashing<T>, command: Commands) -> Result<()> {
    match command {
        Commands::Info {} => {
            flashing.dump_info()?;
        }
        Commands::Fuses {} => {
            let report = flashing.read_fuses()?;
            println!("{}", report);
        }
        Commands::Erase {} => {
            flashing.erase()?;
            log::info!("Chip erased");
        }
        Commands::Flash { path } => {
            let image = format::read_firmware_from_file(&path)?;
            flashing.program_image(&image, &mut Bars::new())?;
            log::info!("Programmed and verified {}", path.display());
        }
        Commands::Verify { path } => {
            let image = format::read_firmware_from_file(&path)?;
            flashing.verify_image(&image, &mut Bars::new())?;
            log::info!("Verified!");
        }
        Commands::Dump { path } => match flashing.dump_image(&mut Bars::new())? {
            Some(text) => {
                format::write_hex_file(&path, &text)?;
                log::info!("Flash dumped to {}", path.display());
            }
            None => anyhow::bail!("no response from target, check wiring and power"),
        },
    }
    Ok(())
}

fn hint(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Protocol => "check wiring, power and that the part is an ATtiny13",
        ErrorKind::Safety => "no fuse was written",
        ErrorKind::Verification => "the flash or fuse contents may be inconsistent, try again",
        ErrorKind::Io => "check the file path and permissions",
        ErrorKind::Image => "check the firmware file",
        ErrorKind::Cancelled => "reset was released before stopping",
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let result = if cli.simulate {
        let chip = Chip::attiny13()?;
        let flashing = Flashing::new(SimTarget::new(&chip), chip, config.timing);
        run(flashing, cli.command)
    } else {
        open_hardware(&config).and_then(|flashing| run(flashing, cli.command))
    };

    if let Err(e) = &result {
        if let Some(isp) = IspError::of(e) {
            log::error!("{:?} failure: {}", isp.kind(), hint(isp.kind()));
        }
    }
    result
}

#[cfg(target_os = "linux")]
fn open_hardware(
    config: &Config,
) -> Result<Flashing<tinyisp::transport::BitBangTransport<tinyisp::transport::LinuxGpioPins>>> {
    Flashing::new_from_gpio(config)
}

#[cfg(not(target_os = "linux"))]
fn open_hardware(_config: &Config) -> Result<Flashing<SimTarget>> {
    anyhow::bail!("GPIO access is only supported on Linux, use --simulate")
}
