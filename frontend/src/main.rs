use std::path::PathBuf;

use clap::Parser;
use psx_core::core::{Machine, MachineOptions};
use psx_core::cpu::StepResult;
use psx_core::log::{Category, Level, Logger, StderrSink};

mod config;
mod wav;

#[derive(Parser)]
#[command(name = "psx")]
#[command(about = "Headless PlayStation hardware emulator driver", long_about = None)]
#[command(version)]
struct Cli {
    /// BIOS ROM image (512 KiB, raw binary)
    #[arg(long)]
    bios: Option<PathBuf>,

    /// Disc image to insert (.cue or .bin)
    #[arg(long)]
    disc: Option<PathBuf>,

    /// PS-X EXE or ELF to boot directly, bypassing BIOS
    #[arg(long)]
    exe: Option<PathBuf>,

    /// Use the fast-boot path (parse SYSTEM.CNF off --disc and jump straight
    /// to the game EXE) instead of running real BIOS code
    #[arg(long)]
    fast_boot: bool,

    /// Stop execution when PC reaches this address (hex, e.g. 0x80010000)
    #[arg(long, value_parser = parse_hex_u32)]
    stop_pc: Option<u32>,

    /// Maximum number of instructions to execute before exiting
    #[arg(long, default_value_t = 10_000_000)]
    max_steps: u64,

    /// Write mixed audio output to this WAV file
    #[arg(long)]
    wav_out: Option<PathBuf>,

    /// Minimum log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(s, 16).map_err(|e| e.to_string())
}

fn main() {
    let file_cfg = config::load();
    let mut cli = Cli::parse();

    if cli.bios.is_none() {
        cli.bios = file_cfg.bios.clone();
    }
    if cli.log_level == "info" {
        if let Some(level) = &file_cfg.log_level {
            cli.log_level = level.clone();
        }
    }

    let level = Level::parse(&cli.log_level).unwrap_or(Level::Info);
    let mut logger = Logger::new();
    logger.set_level(level);
    logger.add_sink(std::sync::Arc::new(StderrSink::new()));

    let mut machine = Machine::new();
    machine.alloc_ram().expect("fresh machine always allows one alloc_ram call");
    machine.set_log_sinks(logger.clone());

    if let Some(bios_path) = &cli.bios {
        let bytes = std::fs::read(bios_path).unwrap_or_else(|e| {
            eprintln!("failed to read BIOS image {}: {e}", bios_path.display());
            std::process::exit(1);
        });
        machine.set_bios_copy(&bytes);
    }

    if let Some(disc_path) = &cli.disc {
        if let Err(e) = machine.insert_disc(&disc_path.display().to_string()) {
            eprintln!("failed to insert disc {}: {e}", disc_path.display());
            std::process::exit(1);
        }
    }

    if let Some(wav_path) = &cli.wav_out {
        match wav::WavFileWriter::create(wav_path, 44_100) {
            Ok(w) => machine.spu.set_wav_writer(Box::new(w)),
            Err(e) => eprintln!("failed to open WAV output {}: {e}", wav_path.display()),
        }
    }

    let mut options = MachineOptions {
        stop_on_pc: cli.stop_pc,
        tick_batch_size: file_cfg.tick_batch_size.unwrap_or(512),
        ..Default::default()
    };

    if cli.fast_boot {
        options.cpu.hle_vectors = true;
        if let Err(e) = machine.fast_boot_from_disc(options) {
            eprintln!("fast-boot failed: {e}");
            std::process::exit(1);
        }
    } else if let Some(exe_path) = &cli.exe {
        let bytes = std::fs::read(exe_path).unwrap_or_else(|e| {
            eprintln!("failed to read executable {}: {e}", exe_path.display());
            std::process::exit(1);
        });
        if let Err(e) = machine.boot_executable(&bytes, options) {
            eprintln!("failed to load executable: {e}");
            std::process::exit(1);
        }
    } else {
        eprintln!("nothing to run: pass --exe, or --disc with --fast-boot");
        std::process::exit(1);
    }

    let mut steps = 0u64;
    loop {
        if steps >= cli.max_steps {
            logger.log(Level::Info, Category::EXEC, "frontend", format_args!("reached --max-steps={}, stopping", cli.max_steps));
            break;
        }
        match machine.step() {
            StepResult::Ok => {}
            StepResult::Halted => {
                logger.log(Level::Info, Category::EXEC, "frontend", format_args!("cpu halted at pc={:#010x}", machine.cpu.pc));
                break;
            }
            StepResult::Breakpoint => {
                logger.log(Level::Info, Category::EXEC, "frontend", format_args!("hit stop_pc={:#010x}", machine.cpu.pc));
                break;
            }
            StepResult::IllegalInstr | StepResult::MemFault => {
                // The CPU has already raised the matching guest exception
                // (RI or ADEL/ADES) and will keep running; this is logged
                // rather than fatal for the driver loop.
            }
        }
        steps += 1;
    }
}
