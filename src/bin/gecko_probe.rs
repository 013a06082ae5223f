//! Connects to a Gecko target and prints what it reports.
//!
//! ```text
//! gecko_probe [-v...] [--config FILE] [--host HOST] [info | peek ADDR | dump START END FILE | screenshot FILE]
//! ```

use clap::{Parser, Subcommand};
use geckolink::memory::{MemoryRegionTable, TargetMemoryLayout};
use geckolink::{Config, GeckoClient, MemorySnapshot};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

type ProbeResult = Result<(), Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file; defaults apply when it is missing
    #[arg(short, long, default_value = "geckolink.json")]
    config: PathBuf,

    /// Target host, overriding the settings file
    #[arg(long)]
    host: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Status, versions and the memory map
    Info,
    /// Read one long
    Peek {
        #[arg(value_parser = parse_address)]
        address: u32,
    },
    /// Dump [start, end) to a file
    Dump {
        #[arg(value_parser = parse_address)]
        start: u32,
        #[arg(value_parser = parse_address)]
        end: u32,
        file: PathBuf,
    },
    /// Save the framebuffer as raw YUV 4:2:2
    Screenshot { file: PathBuf },
}

fn parse_address(text: &str) -> Result<u32, String> {
    let digits = text.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("{}: {}", text, e))
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }))
    .init();

    let mut config = Config::load_or_default(&args.config);
    if let Some(host) = args.host {
        config.host = host;
    }

    let mut client = GeckoClient::from_config(&config);
    if let Err(e) = client.connect() {
        eprintln!("{}:{}: {}", config.host, config.port, e);
        return ExitCode::FAILURE;
    }
    log::info!("connected to {}:{}", config.host, config.port);

    match TargetMemoryLayout::introspect(&mut client, &config.layout_blocks) {
        Ok(Some(layout)) => client.set_regions(MemoryRegionTable::default().with_layout(&layout)),
        Ok(None) => {}
        Err(e) => log::warn!("layout introspection failed: {}", e),
    }

    let outcome = match args.command.unwrap_or(Command::Info) {
        Command::Info => info(&mut client),
        Command::Peek { address } => peek(&mut client, address, &config),
        Command::Dump { start, end, file } => dump(&mut client, start, end, &file, &config),
        Command::Screenshot { file } => screenshot(&mut client, &file),
    };

    client.disconnect();
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn info(client: &mut GeckoClient) -> ProbeResult {
    println!("status:     {:?}", client.status()?);
    println!("version:    {:#04x}", client.version()?);
    println!("OS version: {}", client.os_version()?);
    for range in client.regions().ranges() {
        println!("  {}", range);
    }
    Ok(())
}

fn peek(client: &mut GeckoClient, address: u32, config: &Config) -> ProbeResult {
    match client.peek_checked(address, config.validation)? {
        Some(value) => println!("{:08X}: {:08X}", address, value),
        None => println!("{:08X}: not mapped", address),
    }
    Ok(())
}

fn dump(client: &mut GeckoClient, start: u32, end: u32, path: &Path, config: &Config) -> ProbeResult {
    if start >= end || !client.regions().valid_range(start, end, config.validation) {
        return Err(format!("{:08X}-{:08X} is not mapped", start, end).into());
    }
    let mut snapshot = MemorySnapshot::new(start, end);
    let status = client.dump(&mut snapshot, &mut |p| {
        if p.ok {
            eprint!("\r{:3}% {:08X}", p.percent(), p.address);
        }
    })?;
    eprintln!();
    std::fs::write(path, snapshot.data())?;
    println!("{:?}: {} bytes to {}", status, snapshot.len(), path.display());
    Ok(())
}

fn screenshot(client: &mut GeckoClient, path: &Path) -> ProbeResult {
    let Some(shot) = client.screenshot(&mut |_| {})? else {
        return Err("screenshot cancelled".into());
    };
    std::fs::write(path, &shot.data)?;
    println!(
        "{}x{} frame from {:08X} to {}",
        shot.mode.width,
        shot.mode.height,
        shot.mode.framebuffer,
        path.display()
    );
    Ok(())
}
