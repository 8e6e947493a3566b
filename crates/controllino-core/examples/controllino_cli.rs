//! Controllino CLI
//!
//! Opens a session with a Controllino board (or the built-in simulator),
//! checks that it answers READY, then optionally runs one named command.
//!
//! Usage:
//!   cargo run --example controllino_cli -- [OPTIONS] [COMMAND [ARGS...]]
//!
//! Options:
//!   --port PORT       Serial port (default: /dev/ttyACM0)
//!   --baud RATE       Baud rate (default: 115200)
//!   --timeout MS      Response timeout per attempt in ms (default: 500)
//!   --retries N       Retransmissions after the first attempt (default: 3)
//!   --crc8            Use CRC-8 frame checksums instead of the byte sum
//!   --seq             Prefix commands with sequence numbers
//!   --simulate        Talk to a simulated device instead of a serial port
//!   --log N           With LOG_SIGNAL, collect N samples and print them
//!
//! Examples:
//!   controllino_cli --port /dev/ttyACM0 GET_INPUT 54
//!   controllino_cli --simulate SET_PIN_MODE 30 OUTPUT
//!   controllino_cli --simulate --log 5 LOG_SIGNAL 54 100
//!
//! Set RUST_LOG=controllino_core=debug to see frames on the wire.

use anyhow::{bail, Context, Result};
use controllino_core::prelude::*;
use controllino_core::session::{command_from_name, command_names};
use tracing_subscriber::EnvFilter;

struct Options {
    port: String,
    settings: SerialSettings,
    config: DispatchConfig,
    simulate: bool,
    log_samples: Option<usize>,
    command: Option<String>,
    args: Vec<String>,
}

fn parse_args() -> Result<Option<Options>> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options {
        port: "/dev/ttyACM0".to_string(),
        settings: SerialSettings::default(),
        config: DispatchConfig::default(),
        simulate: false,
        log_samples: None,
        command: None,
        args: Vec::new(),
    };

    let mut i = 1;
    while i < args.len() {
        // Everything after the command name belongs to the command
        if options.command.is_some() {
            options.args.push(args[i].clone());
            i += 1;
            continue;
        }
        match args[i].as_str() {
            "--port" | "-p" => options.port = value(&args, &mut i, "--port")?.to_string(),
            "--baud" | "-b" => {
                options.settings.baud_rate =
                    value(&args, &mut i, "--baud")?.parse().context("invalid --baud")?
            }
            "--timeout" | "-t" => {
                options.config.byte_timeout_ms =
                    value(&args, &mut i, "--timeout")?.parse().context("invalid --timeout")?
            }
            "--retries" | "-r" => {
                options.config.max_retries =
                    value(&args, &mut i, "--retries")?.parse().context("invalid --retries")?
            }
            "--log" => {
                options.log_samples =
                    Some(value(&args, &mut i, "--log")?.parse().context("invalid --log")?)
            }
            "--crc8" => options.config.checksum = Checksum::Crc8,
            "--seq" => options.config.sequence_numbers = true,
            "--simulate" => options.simulate = true,
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            arg if !arg.starts_with('-') => options.command = Some(arg.to_string()),
            other => bail!("unknown option: {}", other),
        }
        i += 1;
    }

    Ok(Some(options))
}

fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str> {
    *i += 1;
    match args.get(*i) {
        Some(v) => Ok(v.as_str()),
        None => bail!("{} needs a value", flag),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let Some(options) = parse_args()? else {
        return Ok(());
    };

    println!("Controllino CLI v{}", controllino_core::VERSION);
    println!(
        "  timeout {}ms, {} retries, checksum {:?}, sequence numbers {}",
        options.config.byte_timeout_ms,
        options.config.max_retries,
        options.config.checksum,
        options.config.sequence_numbers
    );

    if options.simulate {
        println!("  device: simulator");
        let device = SimulatedDevice::new(&options.config);
        run(Session::open(device, options.config.clone()), &options)
    } else {
        println!("  device: {} @ {} baud", options.port, options.settings.baud_rate);
        let transport = SerialTransport::open(&options.port, &options.settings)
            .with_context(|| format!("failed to open {}", options.port))?;
        run(Session::open(transport, options.config.clone()), &options)
    }
}

fn run<T: Transport>(session: Session<T>, options: &Options) -> Result<()> {
    session.ping().context("device did not answer READY")?;
    println!("✓ device ready");

    let Some(name) = options.command.as_deref() else {
        return Ok(());
    };
    let args: Vec<&str> = options.args.iter().map(String::as_str).collect();

    if let (Some(samples), Command::LogSignal { pin, period_ms }) =
        (options.log_samples, command_from_name(name, &args)?)
    {
        let series = session.collect_log(pin, period_ms, samples)?;
        println!("✓ {} samples from pin {}", series.len(), pin);
        for (t, v) in series.time_ms.iter().zip(&series.values) {
            println!("  {:>8} ms  {}", t, v);
        }
        return Ok(());
    }

    let response = session.send_named(name, &args)?;
    if response.result.is_empty() {
        println!("✓ {}: {}", name.to_ascii_uppercase(), response.status);
    } else {
        println!(
            "✓ {}: {} {:02x?}",
            name.to_ascii_uppercase(),
            response.status,
            response.result
        );
        if let Some(level) = response.u16_at(0).filter(|_| response.result.len() == 2) {
            println!("  value: {}", level);
        }
    }

    session.close();
    Ok(())
}

fn print_help() {
    println!("Usage: controllino_cli [OPTIONS] [COMMAND [ARGS...]]");
    println!();
    println!("Options:");
    println!("  --port PORT       Serial port (default: /dev/ttyACM0)");
    println!("  --baud RATE       Baud rate (default: 115200)");
    println!("  --timeout MS      Response timeout per attempt in ms (default: 500)");
    println!("  --retries N       Retransmissions after the first attempt (default: 3)");
    println!("  --crc8            Use CRC-8 frame checksums");
    println!("  --seq             Prefix commands with sequence numbers");
    println!("  --simulate        Use a simulated device");
    println!("  --log N           With LOG_SIGNAL, collect N samples");
    println!();
    println!("Commands:");
    for name in command_names() {
        println!("  {}", name);
    }
}
