use clap::{Parser, Subcommand};
use smu::{
    open_session, ChannelSelector, Error, InstrumentSession, MeasurementFrame, Numeric, SessionConfig,
    SweepSpec,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

/// Command-line front end for a serial source-measure unit.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial port of the instrument
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate (overrides the configuration file)
    #[arg(short, long)]
    baud: Option<u32>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run without an instrument attached
    #[arg(long)]
    offline: bool,

    /// Log every command sent and response received
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Action>,
}

#[derive(Subcommand)]
enum Action {
    /// Take one reading
    Read {
        /// v, c or r for a single quantity; all channels otherwise
        #[arg(long)]
        channels: Option<String>,
    },
    /// Run a linear voltage sweep
    Sweep {
        #[arg(long, default_value_t = -10.0, allow_hyphen_values = true)]
        start: f64,
        #[arg(long, default_value_t = 10.0, allow_hyphen_values = true)]
        stop: f64,
        #[arg(long, default_value_t = 1.0, allow_hyphen_values = true)]
        step: f64,
        #[arg(long, default_value_t = 1)]
        sweeps: u32,
        #[arg(long)]
        channels: Option<String>,
    },
    /// Show or set the trigger count
    Triggers {
        #[arg(long)]
        set: Option<String>,
    },
    /// Switch the output on or off
    Output { state: String },
    /// Reset the instrument and re-apply the startup configuration
    Reset,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut session = match open_session(&config) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Some(action) => run_action(session.as_mut(), action),
        None => {
            run_menu(session.as_mut());
            Ok(())
        }
    };

    // the output must never be left energised
    if let Err(e) = session.close() {
        eprintln!("[ERROR] Failed to close session: {}", e);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            ExitCode::FAILURE
        }
    }
}

fn build_config(cli: &Cli) -> smu::Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(port) = &cli.port {
        config.port = Some(port.clone());
    }
    if let Some(baud) = cli.baud {
        config.baud_rate = baud;
    }
    config.offline |= cli.offline;
    if !config.offline && config.port.is_none() {
        config.port = Some(select_port()?);
    }
    Ok(config)
}

// Lists the available serial ports and asks which one to use.
fn select_port() -> smu::Result<String> {
    let ports = serialport::available_ports()
        .map_err(|e| Error::Config(format!("could not enumerate serial ports: {}", e)))?;
    if ports.is_empty() {
        return Err(Error::Config("no serial ports found, use --offline to run without one".to_string()));
    }

    println!("Available serial ports:");
    for (i, port) in ports.iter().enumerate() {
        println!("  {}: {}", i, port.port_name);
    }
    let choice = prompt("Select a port (number): ")?;
    match choice.parse::<usize>() {
        Ok(i) if i < ports.len() => Ok(ports[i].port_name.clone()),
        _ => Err(Error::Config("invalid port selection".to_string())),
    }
}

fn run_action(session: &mut dyn InstrumentSession, action: Action) -> smu::Result<()> {
    match action {
        Action::Read { channels } => {
            let frame = session.read(ChannelSelector::from_code(channels.as_deref()))?;
            print_frame(&frame);
        }
        Action::Sweep { start, stop, step, sweeps, channels } => {
            let spec = SweepSpec::new(start, stop, step, sweeps);
            run_sweep(session, &spec, ChannelSelector::from_code(channels.as_deref()))?;
        }
        Action::Triggers { set } => {
            if let Some(count) = set {
                set_triggers(session, &count)?;
            }
            println!("Num Trigs: {}", session.trigger_count()?);
        }
        Action::Output { state } => match state.to_ascii_lowercase().as_str() {
            "on" => session.set_output(true)?,
            "off" => session.set_output(false)?,
            other => return Err(Error::InvalidArgument(format!("output state must be on or off, got '{}'", other))),
        },
        Action::Reset => session.reset_to_startup()?,
    }
    Ok(())
}

fn run_sweep(session: &mut dyn InstrumentSession, spec: &SweepSpec, selector: ChannelSelector) -> smu::Result<()> {
    let plan = spec.plan()?;
    let frame = session.sweep(spec, selector)?;
    print_frame(&frame);
    if plan.trigger_count.is_clamped() {
        println!(
            "Note: requested {} points but the instrument is limited to {} triggers",
            plan.trigger_count.requested, plan.trigger_count.applied
        );
    }
    Ok(())
}

fn set_triggers(session: &mut dyn InstrumentSession, count: &str) -> smu::Result<()> {
    let clamp = session.set_trigger_count(count.parse::<Numeric>()?)?;
    if clamp.is_clamped() {
        println!("Number of triggers must be between 1-2500, set to {}", clamp.applied);
    }
    Ok(())
}

// Interactive loop standing in for the desktop front end.
fn run_menu(session: &mut dyn InstrumentSession) {
    let mut output_on = false;
    loop {
        println!("\nSelect action:");
        println!("  1. Read");
        println!("  2. Sweep");
        println!("  3. Trigger count");
        println!("  4. Toggle output (currently {})", if output_on { "on" } else { "off" });
        println!("  5. Reset");
        println!("  6. Exit");

        let choice = match prompt("> ") {
            Ok(choice) => choice,
            Err(_) => break,
        };

        let result = match choice.as_str() {
            "1" => menu_read(session),
            "2" => menu_sweep(session),
            "3" => menu_triggers(session),
            "4" => session.set_output(!output_on).map(|()| output_on = !output_on),
            "5" => session.reset_to_startup().map(|()| output_on = false),
            "6" => break,
            _ => {
                eprintln!("[ERROR] Invalid choice. Please enter 1-6.");
                continue;
            }
        };

        if let Err(e) = result {
            eprintln!("[ERROR] {}", e);
            if matches!(e, Error::Io(_)) {
                eprintln!("[WARNING] Output state is unknown, switching it off.");
                match session.set_output(false) {
                    Ok(()) => output_on = false,
                    Err(e) => eprintln!("[ERROR] {}", e),
                }
            }
        }
    }
}

fn menu_read(session: &mut dyn InstrumentSession) -> smu::Result<()> {
    let channels = prompt("Channels (v, c, r or blank for all): ")?;
    let selector = ChannelSelector::from_code(Some(channels.as_str()).filter(|c| !c.is_empty()));
    let frame = session.read(selector)?;
    print_frame(&frame);
    Ok(())
}

fn menu_sweep(session: &mut dyn InstrumentSession) -> smu::Result<()> {
    let defaults = SweepSpec::default();
    let spec = SweepSpec::new(
        prompt_f64("Start V", defaults.start)?,
        prompt_f64("Stop V", defaults.stop)?,
        prompt_f64("Step V", defaults.step)?,
        prompt_f64("Sweeps", f64::from(defaults.num_sweeps))? as u32,
    );
    run_sweep(session, &spec, ChannelSelector::All)
}

fn menu_triggers(session: &mut dyn InstrumentSession) -> smu::Result<()> {
    println!("Num Trigs: {}", session.trigger_count()?);
    let count = prompt("New trigger count (blank to keep): ")?;
    if !count.is_empty() {
        set_triggers(session, &count)?;
    }
    Ok(())
}

fn prompt(message: &str) -> smu::Result<String> {
    print!("{}", message);
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Err(Error::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "input closed")));
    }
    Ok(line.trim().to_string())
}

fn prompt_f64(label: &str, default: f64) -> smu::Result<f64> {
    let answer = prompt(&format!("{} [{}]: ", label, default))?;
    if answer.is_empty() {
        return Ok(default);
    }
    Ok(answer.parse::<Numeric>()?.as_f64())
}

fn print_frame(frame: &MeasurementFrame) {
    let header: Vec<&str> = frame.quantities().iter().map(|q| q.label()).collect();
    println!("{}", header.join(","));
    for index in 0..frame.len() {
        if let Some(row) = frame.row(index) {
            let values: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            println!("{}", values.join(","));
        }
    }
    println!("({} records)", frame.len());
}
