use std::{future::Future, io, path::PathBuf, time::Duration};

use anyhow::anyhow;
use clap::{Parser, ValueEnum};
use crossterm::event::{Event, EventStream, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reedline::{DefaultPrompt, DefaultPromptSegment, Prompt, Reedline};
use sera_coordinator::{
    Backend, FileBackend, HttpRig, MoveError, PositionStore, Rig, RigDevice, RoofAction, RoofSide,
    SimulatedRig, TourOutcome, TourPhase,
};
use sera_geom::{Grid, LenExt as _, Point, RigConfig, RigConfigBuilder};
use sera_protocol::{Direction, MotorName, DEFAULT_SPEED, MAX_SPEED};

mod display;

const TICK: Duration = Duration::from_millis(50);
/// How far each key press moves the carriage in jog mode, in cm.
const JOG_STEP_CM: f32 = 1.0;

const HELP: &str = "\
commands:
  go <n>                      move to position n
  move [x y]                  move to an absolute position, in cm
  home [device]               go HOME (or to the controller's own home)
  speed [cm/s]                show or set the speed
  tour                        visit every position, then go HOME (ctrl-c stops)
  stop                        emergency stop
  release                     de-energize all motors
  calibrate                   make the current position HOME
  reset-calibration           put HOME back at the center of the rig
  where                       show the current position
  grid                        show the positions
  status | health             ask the controller how it's doing
  roof open|close left|right|both
  roof release
  jog                         move the carriage with the arrow keys
  quit";

#[derive(Clone, Copy, Debug, ValueEnum)]
enum GridChoice {
    /// The hand-placed 3x4 grid matching the plant pots.
    Plant,
    /// Equally sized cells covering the whole rig.
    Uniform,
}

#[derive(Parser)]
#[command(about = "Operator console for the greenhouse camera rig")]
struct Args {
    /// Where the rig's controller lives.
    #[arg(long, env = "SERA_DEVICE_URL", default_value = "http://localhost:8001")]
    url: String,

    /// Where to remember the position and HOME between runs.
    #[arg(long, env = "SERA_STATE")]
    state: Option<PathBuf>,

    /// Give up on the controller after this many seconds.
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Starting speed, in cm/s.
    #[arg(long, default_value_t = DEFAULT_SPEED)]
    speed: f32,

    #[arg(long, value_enum, default_value_t = GridChoice::Plant)]
    grid: GridChoice,

    /// Rows of the uniform grid.
    #[arg(long, default_value_t = 4)]
    rows: usize,

    /// Columns of the uniform grid.
    #[arg(long, default_value_t = 3)]
    cols: usize,

    /// Rig width (the x axis), in cm.
    #[arg(long, default_value_t = 45.0)]
    width: f32,

    /// Rig height (the y axis), in cm.
    #[arg(long, default_value_t = 63.0)]
    height: f32,

    /// Don't talk to a real rig; simulate one instead.
    #[arg(long)]
    simulate: bool,
}

#[derive(Debug)]
enum Error {
    Exit,
    Err(anyhow::Error),
}

impl<E> From<E> for Error
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Error::Err(e.into())
    }
}

type Result<T> = std::result::Result<T, Error>;

fn default_state_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("sera").join("rig.json"))
        .unwrap_or_else(|| PathBuf::from("sera-rig.json"))
}

fn check_speed(speed: f32) -> anyhow::Result<f32> {
    if speed > 0.0 && speed <= MAX_SPEED {
        Ok(speed)
    } else {
        Err(anyhow!("speed must be between 0 and {MAX_SPEED} cm/s"))
    }
}

fn parse_num<T: std::str::FromStr>(s: Option<&str>, what: &str) -> anyhow::Result<T> {
    let s = s.ok_or_else(|| anyhow!("missing {what}"))?;
    s.parse().map_err(|_| anyhow!("expected {what}, got {s:?}"))
}

fn string_prompt(s: &str) -> DefaultPrompt {
    DefaultPrompt::new(
        DefaultPromptSegment::Basic(s.to_owned()),
        DefaultPromptSegment::Empty,
    )
}

fn read_cmd(reed: &mut Reedline, prompt: &dyn Prompt) -> Result<String> {
    let s = reed.read_line(prompt)?;
    match s {
        reedline::Signal::Success(s) => Ok(s),
        reedline::Signal::CtrlC | reedline::Signal::CtrlD => Err(Error::Exit),
    }
}

async fn check_health<D: RigDevice>(rig: &Rig<D, FileBackend>) {
    let bar = ProgressBar::new_spinner().with_message("Checking the rig...");
    bar.enable_steady_tick(TICK);
    match rig.health().await {
        Ok(h) if h.device_reachable => {
            bar.finish_with_message(format!("rig at {} is {}", h.device_host, h.status))
        }
        Ok(h) => bar.abandon_with_message(format!(
            "the controller is up, but it can't reach the motors at {}",
            h.device_host
        )),
        Err(e) => bar.abandon_with_message(format!("{e}")),
    }
}

fn report_position<D: RigDevice>(rig: &Rig<D, FileBackend>) {
    let at = match rig.closest_cell() {
        Some(cell) => format!(", at position {}", cell + 1),
        None => String::new(),
    };
    eprintln!(
        "at {} {} from HOME{at}",
        display::point(rig.position()),
        display::offset(rig.relative_position())
    );
}

/// Runs a tour, keeping `bar` up to date. Each time `interrupt` fires, the
/// rig is stopped, which also ends the tour.
async fn follow_tour<D, B, F, I>(
    rig: &Rig<D, B>,
    speed: f32,
    bar: &ProgressBar,
    mut interrupt: F,
) -> std::result::Result<TourOutcome, MoveError>
where
    D: RigDevice,
    B: Backend,
    F: FnMut() -> I,
    I: Future<Output = io::Result<()>>,
{
    let total = rig.grid().len() as u64;
    let mut progress = rig.subscribe_tour();
    let tour = rig.tour(speed);
    tokio::pin!(tour);
    let interrupted = interrupt();
    tokio::pin!(interrupted);
    let mut listening = true;

    loop {
        tokio::select! {
            outcome = &mut tour => return outcome,
            Ok(()) = progress.changed() => {
                let state = progress.borrow_and_update().clone();
                match state.phase {
                    TourPhase::Running => {
                        bar.set_position(state.step.unwrap_or(0) as u64);
                        bar.set_message(display::tour_progress(&state));
                    }
                    TourPhase::ReturningHome => {
                        bar.set_position(total);
                        bar.set_message("returning HOME");
                    }
                    TourPhase::Idle => {}
                }
            }
            res = &mut interrupted, if listening => match res {
                Ok(()) => {
                    // A listener only fires once.
                    interrupted.set(interrupt());
                    bar.set_message("stopping...");
                    if let Err(e) = rig.stop().await {
                        bar.println(format!("stop failed: {e}"));
                    }
                }
                Err(e) => {
                    log::warn!("not listening for ctrl-c: {e}");
                    listening = false;
                }
            },
        }
    }
}

async fn tour<D: RigDevice>(rig: &Rig<D, FileBackend>, speed: f32) -> Result<()> {
    let total = rig.grid().len() as u64;
    let style = ProgressStyle::with_template("{spinner} [{bar:30}] {msg}")?.progress_chars("=> ");
    let bar = ProgressBar::new(total).with_style(style);
    bar.enable_steady_tick(TICK);

    match follow_tour(rig, speed, &bar, tokio::signal::ctrl_c).await {
        Ok(TourOutcome::Completed) => bar.finish_with_message("done"),
        Ok(TourOutcome::Cancelled { visited }) => {
            bar.abandon_with_message(format!("cancelled after {visited} of {total} positions"))
        }
        Err(e) => {
            bar.abandon_with_message("aborted");
            return Err(e.into());
        }
    }
    Ok(())
}

async fn manual_move<D: RigDevice>(
    events: &mut EventStream,
    rig: &Rig<D, FileBackend>,
    speed: f32,
) -> Result<()> {
    while let Some(ev) = events.next().await.transpose()? {
        let Event::Key(ev) = ev else {
            continue;
        };
        if ev.kind != KeyEventKind::Press {
            continue;
        }
        let result = match ev.code {
            KeyCode::Char('q') => {
                return Err(Error::Exit);
            }
            KeyCode::Enter | KeyCode::Esc => {
                return Ok(());
            }
            KeyCode::Left | KeyCode::Char('h') => {
                rig.jog(MotorName::AxisX, JOG_STEP_CM, speed, Direction::Backward)
                    .await
                    .map(drop)
            }
            KeyCode::Right | KeyCode::Char('l') => {
                rig.jog(MotorName::AxisX, JOG_STEP_CM, speed, Direction::Forward)
                    .await
                    .map(drop)
            }
            KeyCode::Up | KeyCode::Char('k') => {
                rig.jog(MotorName::AxisY, JOG_STEP_CM, speed, Direction::Forward)
                    .await
                    .map(drop)
            }
            KeyCode::Down | KeyCode::Char('j') => {
                rig.jog(MotorName::AxisY, JOG_STEP_CM, speed, Direction::Backward)
                    .await
                    .map(drop)
            }
            KeyCode::Char('o') => rig
                .move_roof(RoofSide::Both, RoofAction::Open)
                .await
                .map(drop),
            KeyCode::Char('c') => rig
                .move_roof(RoofSide::Both, RoofAction::Close)
                .await
                .map(drop),
            KeyCode::Char(' ') => rig.stop().await,
            _ => continue,
        };
        // We're in raw mode, so line endings are on us.
        if let Err(e) = result {
            eprint!("{e}\r\n");
        }
    }
    Err(anyhow!("event stream ended").into())
}

async fn jog_mode<D: RigDevice>(rig: &Rig<D, FileBackend>, speed: f32) -> Result<()> {
    eprintln!("Jog mode. Arrow keys (or h, j, k, l) move 1cm, o/c open/close the roof,");
    eprintln!("<space> stops, <enter> goes back to the prompt.");
    enable_raw_mode()?;

    let result: Result<()> = async {
        let mut events = EventStream::new();
        manual_move(&mut events, rig, speed).await
    }
    .await;

    disable_raw_mode()?;
    if result.is_ok() {
        eprintln!("The position estimate may be off; move to a known spot and `calibrate`.");
    }
    result
}

async fn roof<D: RigDevice>(rig: &Rig<D, FileBackend>, args: &[&str]) -> Result<()> {
    match args {
        ["release"] => rig.release_roofs().await?,
        [action, side] => {
            let action: RoofAction = action.parse().map_err(|e: String| anyhow!(e))?;
            let side: RoofSide = side.parse().map_err(|e: String| anyhow!(e))?;
            rig.move_roof(side, action).await?;
        }
        _ => return Err(anyhow!("usage: roof open|close left|right|both, or roof release").into()),
    }
    Ok(())
}

async fn run_cmd<D: RigDevice>(
    rig: &Rig<D, FileBackend>,
    reed: &mut Reedline,
    speed: &mut f32,
    line: &str,
) -> Result<()> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&cmd, args)) = words.split_first() else {
        return Ok(());
    };

    match cmd {
        "quit" | "exit" => return Err(Error::Exit),
        "help" | "?" => eprintln!("{HELP}"),
        "go" => {
            let n: usize = parse_num(args.first().copied(), "a position number")?;
            let idx = n
                .checked_sub(1)
                .ok_or_else(|| anyhow!("positions are numbered from 1"))?;
            rig.move_to_cell(idx, *speed).await?;
            report_position(rig);
        }
        "move" => {
            let (x, y) = if args.is_empty() {
                let x = read_cmd(reed, &string_prompt("x? "))?;
                let y = read_cmd(reed, &string_prompt("y? "))?;
                (
                    parse_num(Some(x.trim()), "a number")?,
                    parse_num(Some(y.trim()), "a number")?,
                )
            } else {
                (
                    parse_num(args.first().copied(), "x")?,
                    parse_num(args.get(1).copied(), "y")?,
                )
            };
            let target = Point::new(x, y);
            if !rig.config().contains(&target) {
                log::warn!("{} is outside the rig", display::point(target));
            }
            rig.move_to(target, *speed).await?;
            report_position(rig);
        }
        "home" => {
            if args.first() == Some(&"device") {
                rig.device_home(*speed).await?;
            } else {
                rig.go_home(*speed).await?;
            }
            report_position(rig);
        }
        "speed" => match args.first().copied() {
            Some(s) => {
                *speed = check_speed(parse_num(Some(s), "a speed")?)?;
                eprintln!("speed set to {speed}cm/s");
            }
            None => eprintln!("speed is {speed}cm/s"),
        },
        "tour" => {
            tour(rig, *speed).await?;
            report_position(rig);
        }
        "stop" => rig.stop().await?,
        "release" => {
            let answer = read_cmd(
                reed,
                &string_prompt("Really release all motors? They won't hold their position. [y/N] "),
            )?;
            if answer.trim().eq_ignore_ascii_case("y") {
                rig.release_all().await?;
                eprintln!("released; recalibrate before moving again");
            }
        }
        "calibrate" => {
            let home = rig.set_home_from_current();
            eprintln!(
                "HOME is now {} {} from the center",
                display::point(home),
                display::offset(rig.offset())
            );
        }
        "reset-calibration" => {
            rig.reset_calibration();
            eprintln!("HOME is back at {}", display::point(rig.home()));
        }
        "where" => {
            report_position(rig);
            eprintln!(
                "HOME is {} {} from the center",
                display::point(rig.home()),
                display::offset(rig.offset())
            );
        }
        "grid" => eprint!("{}", display::grid(rig.grid(), rig.closest_cell())),
        "status" => eprint!("{}", display::status(&rig.status().await?)),
        "health" => {
            let h = rig.health().await?;
            eprintln!(
                "{}; motors at {} {}",
                h.status,
                h.device_host,
                if h.device_reachable { "reachable" } else { "unreachable" }
            );
        }
        "roof" => roof(rig, args).await?,
        "jog" => jog_mode(rig, *speed).await?,
        _ => eprintln!("unknown command {cmd:?}; try `help`"),
    }
    Ok(())
}

async fn command_mode<D: RigDevice>(rig: &Rig<D, FileBackend>, mut speed: f32) -> Result<()> {
    let mut reed = Reedline::create();
    let prompt = DefaultPrompt::default();
    loop {
        let line = read_cmd(&mut reed, &prompt)?;
        match run_cmd(rig, &mut reed, &mut speed, line.trim()).await {
            Ok(()) => {}
            Err(Error::Exit) => return Err(Error::Exit),
            Err(Error::Err(e)) => eprintln!("error: {e}"),
        }
    }
}

async fn run<D: RigDevice>(device: D, config: RigConfig, grid: Grid, args: &Args) -> Result<()> {
    let state = args.state.clone().unwrap_or_else(default_state_path);
    log::info!("keeping state in {}", state.display());
    let store = PositionStore::load(config, FileBackend::new(state));
    let rig = Rig::new(device, store, grid);

    check_health(&rig).await;
    report_position(&rig);
    command_mode(&rig, args.speed).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();
    check_speed(args.speed)?;

    let config = RigConfigBuilder::default()
        .with_width(args.width.cm())
        .with_height(args.height.cm())
        .build();
    let grid = match args.grid {
        GridChoice::Plant => Grid::plant(),
        GridChoice::Uniform if args.rows == 0 || args.cols == 0 => {
            return Err(anyhow!("the grid needs at least one row and one column"));
        }
        GridChoice::Uniform => Grid::uniform(&config, args.rows, args.cols),
    };

    let result = if args.simulate {
        eprintln!("simulating a rig, nothing will actually move");
        run(SimulatedRig::new(config), config, grid, &args).await
    } else {
        let device = HttpRig::builder(args.url.as_str())
            .timeout(Duration::from_secs(args.timeout))
            .build()?;
        log::info!("talking to the controller at {}", device.base_url());
        run(device, config, grid, &args).await
    };

    match result {
        Ok(()) | Err(Error::Exit) => {
            eprintln!("exiting...");
            Ok(())
        }
        Err(Error::Err(e)) => Err(e),
    }
}
