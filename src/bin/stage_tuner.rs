//! Stage Tuner command line
//!
//! Operator front end for the stage store and the robot's serial protocol.
//! Each command performs one operator action: load, edit+save, send.
//!
//! Run with: cargo run --bin stage_tuner -- <command>

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gethostname::gethostname;

use stage_tuner::config_loader::{default_settings_path, load_tuner_settings};
use stage_tuner::protocol;
use stage_tuner::{
    FollowMode, PidGains, ProtocolVersion, Session, StageRecord, TerminationAction, TerminationCondition,
    TunerError,
};

/// Configure course stages and send tuning frames to the robot controller
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to stage_tuner.yaml next to Cargo.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Host entry to use from the settings file (defaults to this machine's hostname)
    #[arg(long)]
    host: Option<String>,
    /// Also append timestamped log lines to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the stage store and global config with defaults
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
    /// Print every stage
    List,
    /// Print one stage
    Show {
        stage: usize,
        #[arg(long)]
        json: bool,
    },
    /// Load a stage, apply the given changes and save it
    Edit {
        stage: usize,
        #[command(flatten)]
        edits: StageEdits,
    },
    /// Load a stage and send it to the controller
    Send { stage: usize },
    /// Load a stage and print its frame without sending
    Dump { stage: usize },
    /// Global run parameters
    #[command(subcommand)]
    Globals(GlobalsCommand),
    /// Send a live PID tuning frame (legacy protocol)
    #[command(allow_negative_numbers = true)]
    Pid { p: f32, i: f32, d: f32 },
    /// List the selectable start positions
    Choices,
}

#[derive(Subcommand, Debug)]
enum GlobalsCommand {
    Show,
    /// Change and save global parameters
    Set {
        #[arg(long)]
        start: Option<usize>,
        #[arg(long, allow_hyphen_values = true)]
        p: Option<f32>,
        #[arg(long, allow_hyphen_values = true)]
        i: Option<f32>,
        #[arg(long, allow_hyphen_values = true)]
        d: Option<f32>,
    },
    /// Load the saved globals and send them
    Send,
}

#[derive(Args, Debug)]
struct StageEdits {
    #[arg(long)]
    follow: Option<FollowMode>,
    #[arg(long)]
    termination: Option<TerminationCondition>,
    #[arg(long)]
    action: Option<TerminationAction>,
    #[arg(long, allow_hyphen_values = true)]
    left: Option<i32>,
    #[arg(long, allow_hyphen_values = true)]
    right: Option<i32>,
    #[arg(long, allow_hyphen_values = true)]
    speed: Option<i32>,
    #[arg(long, allow_hyphen_values = true)]
    turn_speed: Option<i32>,
    #[arg(long, allow_hyphen_values = true)]
    center: Option<i32>,
    #[arg(long = "p", allow_hyphen_values = true)]
    p_gain: Option<f32>,
    #[arg(long = "i", allow_hyphen_values = true)]
    i_gain: Option<f32>,
    #[arg(long = "d", allow_hyphen_values = true)]
    d_gain: Option<f32>,
    #[arg(long)]
    clicks: Option<i32>,
}

impl StageEdits {
    fn touches_extended_fields(&self) -> bool {
        self.speed.is_some()
            || self.turn_speed.is_some()
            || self.center.is_some()
            || self.p_gain.is_some()
            || self.i_gain.is_some()
            || self.d_gain.is_some()
            || self.clicks.is_some()
    }

    fn apply(&self, record: &mut StageRecord) {
        if let Some(v) = self.follow { record.follow_mode = v; }
        if let Some(v) = self.termination { record.termination = v; }
        if let Some(v) = self.action { record.termination_action = v; }
        if let Some(v) = self.left { record.left_amount = v; }
        if let Some(v) = self.right { record.right_amount = v; }
        if let Some(v) = self.speed { record.speed = v; }
        if let Some(v) = self.turn_speed { record.turn_speed = v; }
        if let Some(v) = self.center { record.center_offset = v; }
        if let Some(v) = self.p_gain { record.gains.p = v; }
        if let Some(v) = self.i_gain { record.gains.i = v; }
        if let Some(v) = self.d_gain { record.gains.d = v; }
        if let Some(v) = self.clicks { record.termination_clicks = v; }
    }
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    match log_file {
        None => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        }
        Some(path) => {
            fern::Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!(
                        "{} [{}] {}: {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                        record.level(),
                        record.target(),
                        message
                    ))
                })
                .level(log::LevelFilter::Info)
                .chain(std::io::stderr())
                .chain(fern::log_file(path).with_context(|| format!("Failed to open log file {}", path.display()))?)
                .apply()?;
        }
    }
    Ok(())
}

fn print_stage(version: ProtocolVersion, index: usize, r: &StageRecord) {
    match version {
        ProtocolVersion::Legacy => println!(
            "{:>2}  {:<14} {:<14} {:<8} L={:<6} R={:<6}",
            index, r.follow_mode, r.termination, r.termination_action, r.left_amount, r.right_amount
        ),
        ProtocolVersion::Extended => println!(
            "{:>2}  {:<14} {:<14} {:<8} L={:<4} R={:<4} spd={:<3} turn={:<3} ctr={:<3} P={} I={} D={} clicks={}",
            index,
            r.follow_mode,
            r.termination,
            r.termination_action,
            r.left_amount,
            r.right_amount,
            r.speed,
            r.turn_speed,
            r.center_offset,
            r.gains.p,
            r.gains.i,
            r.gains.d,
            r.termination_clicks
        ),
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings_path = cli.config.clone().unwrap_or_else(default_settings_path);
    let hostname = cli
        .host
        .clone()
        .unwrap_or_else(|| gethostname().to_string_lossy().to_string());
    let settings = load_tuner_settings(&settings_path, &hostname)?;
    let mut session = Session::from_settings(&settings);
    let version = session.version();

    match cli.command {
        Command::Init { force } => {
            let (stages, globals) = session.initialize(force)?;
            println!(
                "{}: {}",
                session.stage_store().path().display(),
                if stages { "written" } else { "kept" }
            );
            println!(
                "{}: {}",
                session.global_store().path().display(),
                if globals { "written" } else { "kept" }
            );
        }
        Command::List => {
            for (index, record) in session.stage_store().load_all()?.iter().enumerate() {
                print_stage(version, index, record);
            }
        }
        Command::Show { stage, json } => {
            session.select_stage(stage)?;
            let record = session.load_stage()?;
            if json {
                println!("{}", serde_json::to_string_pretty(record)?);
            } else {
                print_stage(version, stage, record);
            }
        }
        Command::Edit { stage, edits } => {
            if version == ProtocolVersion::Legacy && edits.touches_extended_fields() {
                log::warn!("Speed, turn speed, center, PID and clicks are not stored by the legacy protocol");
            }
            session.select_stage(stage)?;
            session.load_stage()?;
            edits.apply(session.edit_stage()?);
            session.save_stage()?;
            print_stage(version, stage, session.staged());
        }
        Command::Send { stage } => {
            session.select_stage(stage)?;
            session.load_stage()?;
            session.send_stage()?;
            println!("Stage {} sent to {}", stage, session.transport().device());
        }
        Command::Dump { stage } => {
            session.select_stage(stage)?;
            session.load_stage()?;
            println!("{}", protocol::to_hex(&session.encode_stage()?));
        }
        Command::Globals(GlobalsCommand::Show) => {
            let config = session.load_globals()?;
            println!("start_position = {}", config.start_position);
            if let Some(g) = config.gains {
                println!("P = {}  I = {}  D = {}", g.p, g.i, g.d);
            }
        }
        Command::Globals(GlobalsCommand::Set { start, p, i, d }) => {
            session.load_globals()?;
            if let Some(start) = start {
                session.set_start_position(start)?;
            }
            match (p, i, d) {
                (Some(p), Some(i), Some(d)) => session.set_global_gains(PidGains::new(p, i, d))?,
                (None, None, None) => {}
                _ => anyhow::bail!("--p, --i and --d must be given together"),
            }
            session.save_globals()?;
            println!("Saved start position {}", session.globals().start_position);
        }
        Command::Globals(GlobalsCommand::Send) => {
            session.load_globals()?;
            session.send_globals()?;
            println!("Globals sent to {}", session.transport().device());
        }
        Command::Pid { p, i, d } => {
            session.send_live_pid(&PidGains::new(p, i, d))?;
            println!("PID sent to {}", session.transport().device());
        }
        Command::Choices => {
            for index in session.start_positions() {
                println!("{}", index);
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    match run(cli) {
        Err(e) if matches!(e.downcast_ref::<TunerError>(), Some(TunerError::Unselected)) => {
            log::warn!("No stage selected; nothing was saved or sent");
            Ok(())
        }
        other => other,
    }
}
