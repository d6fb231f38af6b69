//! `liquid_handler` command line tool.
//!
//! Connects to the motion controller described by the configuration file and runs
//! one motion command against it. `--dry-run` swaps the serial driver for the
//! simulated one.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use liquid_handler::calibration::{
    calibrate_labware, probe_center, update_instrument_offset, Probe,
};
use liquid_handler::config::{RobotConfig, DEFAULT_CONFIG_PATH};
use liquid_handler::driver::{MockDriver, MotionDriver, SmoothieDriver};
use liquid_handler::labware::{JsonLabwareStore, LabwareStore};
use liquid_handler::serial::{self, SerialConnection};
use liquid_handler::{logging, Axis, Frame, Mover, Point, PoseTree, Target, ROOT};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Liquid handling robot motion control")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port, overriding discovery
    #[arg(short, long)]
    port: Option<String>,

    /// Use the simulated driver instead of the serial port
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached controllers
    Ports {
        /// Match by USB vendor ID (hex) instead of device name
        #[arg(long, value_parser = parse_hex_u16)]
        vid: Option<u16>,
    },
    /// Home a mover
    Home {
        /// Mover name
        #[arg(short, long, default_value = "gantry")]
        mover: String,
        /// Use fast homing with this safety margin (mm)
        #[arg(long)]
        fast: Option<f64>,
    },
    /// Move one axis relative to its current position
    Jog {
        /// Mover name
        #[arg(short, long, default_value = "gantry")]
        mover: String,
        /// Axis (x, y or z)
        #[arg(short, long)]
        axis: Axis,
        /// Distance in mm
        #[arg(short, long, allow_hyphen_values = true)]
        distance: f64,
    },
    /// Move to absolute coordinates
    Move {
        /// Mover name
        #[arg(short, long, default_value = "gantry")]
        mover: String,
        /// X target
        #[arg(short, long, allow_hyphen_values = true)]
        x: Option<f64>,
        /// Y target
        #[arg(short, long, allow_hyphen_values = true)]
        y: Option<f64>,
        /// Z target
        #[arg(short, long, allow_hyphen_values = true)]
        z: Option<f64>,
    },
    /// Locate the tip against the probe switch box
    Probe {
        /// Mover carrying the tip
        #[arg(short, long, default_value = "gantry")]
        mover: String,
        /// Tip length, overriding the configured one
        #[arg(long)]
        tip_length: Option<f64>,
    },
    /// Shift a stored labware record's calibration offset
    Calibrate {
        /// Labware name
        #[arg(short, long)]
        name: String,
        /// X shift in mm
        #[arg(short, long, default_value_t = 0.0, allow_hyphen_values = true)]
        x: f64,
        /// Y shift in mm
        #[arg(short, long, default_value_t = 0.0, allow_hyphen_values = true)]
        y: f64,
        /// Z shift in mm
        #[arg(short, long, default_value_t = 0.0, allow_hyphen_values = true)]
        z: f64,
        /// Show the new offset without writing the record
        #[arg(long)]
        no_save: bool,
    },
    /// Home and print a mover's position
    Position {
        /// Mover name
        #[arg(short, long, default_value = "gantry")]
        mover: String,
    },
}

fn parse_hex_u16(value: &str) -> Result<u16, std::num::ParseIntError> {
    u16::from_str_radix(value.trim_start_matches("0x"), 16)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = RobotConfig::load_from(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    if args.port.is_some() {
        config.serial.port = args.port.clone();
    }
    logging::init(&config.logging).context("initializing logging")?;

    match &args.command {
        Command::Ports { vid } => return list_ports(&config, *vid),
        Command::Calibrate {
            name,
            x,
            y,
            z,
            no_save,
        } => return shift_labware(&config, name, Point::new(*x, *y, *z), !*no_save),
        _ => {}
    }

    if args.dry_run {
        let driver = MockDriver::with_homed_position(config.driver.homed_position());
        return run(&args.command, &config, Arc::new(Mutex::new(driver)));
    }

    let mut connection = serial::connect(
        Some(config.serial.device_name.as_str()),
        config.serial.port.as_deref(),
        config.serial.baud_rate,
    )
    .context("connecting to motion controller")?;
    connection.set_timeout(config.serial.read_timeout())?;

    let driver = SmoothieDriver::new(connection, config.driver.homed_position())
        .with_ack(config.driver.ack.clone())
        .with_timeouts(
            config.serial.exchange_timeout(),
            config.serial.recovery_timeout(),
        );
    let driver = Arc::new(Mutex::new(driver));
    let result = run(&args.command, &config, Arc::clone(&driver));

    if let Ok(driver) = Arc::try_unwrap(driver) {
        if let Ok(driver) = driver.into_inner() {
            driver.into_connection().close();
        }
    }
    result
}

fn list_ports(config: &RobotConfig, vid: Option<u16>) -> Result<()> {
    let ports = match vid {
        Some(vid) => serial::discover_by_vendor_id(vid)?.into_iter().collect(),
        None => serial::discover_by_name(&config.serial.device_name)?,
    };
    if ports.is_empty() {
        println!("No matching controllers found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

fn shift_labware(config: &RobotConfig, name: &str, delta: Point, save: bool) -> Result<()> {
    let mut store = JsonLabwareStore::new(&config.labware_dir);
    let record = store
        .load(name)
        .with_context(|| format!("loading labware from {}", config.labware_dir.display()))?;

    let frame = Frame::named(name);
    let tree = PoseTree::new().add(frame.clone(), ROOT, record.offset)?;
    let tree = calibrate_labware(&tree, &mut store, name, &frame, delta, save)?;

    println!("{}: offset {}", name, tree.absolute(&frame)?);
    if !save {
        println!("Not saved");
    }
    Ok(())
}

fn run<D: MotionDriver>(
    command: &Command,
    config: &RobotConfig,
    driver: Arc<Mutex<D>>,
) -> Result<()> {
    {
        let mut driver = driver
            .lock()
            .map_err(|_| anyhow!("motion driver lock poisoned"))?;
        driver.set_speed(config.driver.default_speed)?;
        let current = config.driver.default_current();
        if !current.is_empty() {
            driver.set_current(&current)?;
        }
    }

    let mover_name = match command {
        Command::Ports { .. } | Command::Calibrate { .. } => return Ok(()),
        Command::Home { mover, .. }
        | Command::Jog { mover, .. }
        | Command::Move { mover, .. }
        | Command::Probe { mover, .. }
        | Command::Position { mover } => mover,
    };
    let mover_config = config
        .mover(mover_name)
        .ok_or_else(|| anyhow!("no mover named '{}' in configuration", mover_name))?;

    let mut tree = PoseTree::new();
    for other in config.movers.iter().filter(|m| m.name != mover_config.name) {
        let other = Mover::new(
            Frame::named(&other.name),
            Arc::clone(&driver),
            other.mapping()?,
            ROOT,
            ROOT,
        );
        tree = other.attach(&tree)?;
    }

    let frame = Frame::named(&mover_config.name);
    let mut mover = Mover::new(
        frame.clone(),
        driver,
        mover_config.mapping()?,
        ROOT,
        ROOT,
    );
    let tree = mover.attach(&tree)?;

    let tree = match command {
        Command::Ports { .. } | Command::Calibrate { .. } => tree,
        Command::Home { fast: Some(margin), .. } => mover.fast_home(&tree, *margin)?,
        Command::Home { fast: None, .. } => mover.home(&tree)?,
        Command::Jog { axis, distance, .. } => mover.jog(&tree, *axis, *distance)?,
        Command::Move { x, y, z, .. } => {
            let target = Target {
                x: *x,
                y: *y,
                z: *z,
            };
            mover.move_to(&tree, target)?
        }
        Command::Probe { tip_length, .. } => {
            let tip_length = tip_length.unwrap_or(config.probe.tip_length);
            let instrument = Frame::named(format!("{}-instrument", mover_config.name));
            let tip = Frame::named(format!("{}-tip", mover_config.name));
            let tree = tree
                .add(instrument.clone(), frame.clone(), mover_config.instrument_offset)?
                .add(tip.clone(), instrument.clone(), Point::new(0.0, 0.0, -tip_length))?;
            let probe = Probe {
                center: config.probe.center,
                dimensions: config.probe.dimensions,
            };
            let (tree, center) = probe_center(&tree, &mut mover, &tip, &probe, tip_length)?;
            let (tree, offset, tip_delta) =
                update_instrument_offset(&tree, &instrument, &frame, center, probe.center)?;

            println!("Measured probe center: {}", center);
            println!("Offset from nominal:   {}", center - probe.center);
            println!(
                "Set in [[movers]] \"{}\": instrument_offset = {{ x = {:.3}, y = {:.3}, z = 0.0 }}",
                mover_config.name, offset.x, offset.y
            );
            println!("Set in [probe]: tip_length = {:.3}", tip_length + tip_delta);
            tree
        }
        Command::Position { .. } => mover.home(&tree)?,
    };

    let position = mover.current_position(&tree)?;
    info!(mover = %frame, position = %position, "Done");
    println!("{}: {}", frame, position);
    Ok(())
}
