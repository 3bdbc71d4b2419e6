use clap::{Parser, Subcommand};
use grabbot_geom::{ConfigBuilder, Point};
use grabbot_link::Arm;
use grabbot_motion::{Engine, Tunables};
use grabbot_protocol::Position;
use log::info;
use reedline::{DefaultPrompt, DefaultPromptSegment, Prompt, Reedline};

/// Interactive controller for the arm, in both of its firmware flavors.
#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Drive the firmware-side motion controller over the supervised
    /// request/reply protocol (115200 baud).
    Supervised {
        /// Serial port, e.g. /dev/ttyUSB0
        port: String,
    },
    /// Do the inverse kinematics on the host and stream raw joint frames
    /// to the serial-to-servo bridge (9600 baud).
    Stream {
        /// Serial port, e.g. /dev/ttyUSB0
        port: String,
    },
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

fn parse_switch(word: &str) -> Option<bool> {
    match word {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

fn parse_coords(words: &[&str]) -> Option<(f64, f64, f64)> {
    match words {
        [x, y, z] => Some((x.parse().ok()?, y.parse().ok()?, z.parse().ok()?)),
        _ => None,
    }
}

fn supervised_mode(port: &str) -> Result<()> {
    let mut arm = Arm::open(port)?;
    info!("connected to {port}");
    eprintln!("commands: home | motors on|off | grab on|off | move x y z | wait | quit");

    let mut reed = Reedline::create();
    let prompt = string_prompt("arm");
    loop {
        let line = read_cmd(&mut reed, &prompt)?;
        let words: Vec<&str> = line.split_whitespace().collect();

        let outcome = match words.as_slice() {
            [] => continue,
            ["quit"] => break,
            ["home"] => arm.home(),
            ["wait"] => arm.block_until_target_reached(),
            ["motors", s] if parse_switch(s).is_some() => {
                arm.set_motors(parse_switch(s).unwrap())
            }
            ["grab", s] if parse_switch(s).is_some() => arm.set_grabber(parse_switch(s).unwrap()),
            ["move", rest @ ..] => match parse_coords(rest) {
                // from_f64 rather than parsing integers directly, so that
                // "move 100.5 200 50" is reported as a fractional
                // coordinate instead of a parse error
                Some((x, y, z)) => {
                    Position::from_f64(x, y, z).map_err(Into::into).and_then(|p| arm.move_to_position(p))
                }
                None => {
                    eprintln!("usage: move x y z (millimeters)");
                    continue;
                }
            },
            _ => {
                eprintln!("unrecognized command: {line}");
                continue;
            }
        };
        if let Err(e) = outcome {
            eprintln!("error: {e}");
        }
    }
    Ok(())
}

fn stream_mode(port: &str) -> Result<()> {
    let geom = ConfigBuilder::default().build();
    let mut engine = Engine::open(port, geom, Tunables::default())?;
    info!("streaming to {port}");
    eprintln!("commands: home | grab on|off | slide x y z | settle | park | quit");

    // the engine only assumes the arm's pose until the first home
    engine.home()?;

    let mut reed = Reedline::create();
    let prompt = string_prompt("arm");
    loop {
        let line = read_cmd(&mut reed, &prompt)?;
        let words: Vec<&str> = line.split_whitespace().collect();

        let outcome = match words.as_slice() {
            [] => continue,
            ["quit"] => break,
            ["home"] => engine.home(),
            ["park"] => engine.park(),
            ["settle"] => {
                engine.settle();
                continue;
            }
            ["grab", s] if parse_switch(s).is_some() => {
                engine.set_grabber(parse_switch(s).unwrap())
            }
            ["slide", rest @ ..] => match parse_coords(rest) {
                Some((x, y, z)) => {
                    engine.slide_to(Point::new(x as f32, y as f32, z as f32))
                }
                None => {
                    eprintln!("usage: slide x y z (centimeters)");
                    continue;
                }
            },
            _ => {
                eprintln!("unrecognized command: {line}");
                continue;
            }
        };
        if let Err(e) = outcome {
            eprintln!("error: {e}");
        }
    }

    // explicit shutdown move; an exit hook would be untestable and
    // order-dependent
    engine.park()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let result = match args.mode {
        Mode::Supervised { port } => supervised_mode(&port),
        Mode::Stream { port } => stream_mode(&port),
    };
    match result {
        Ok(()) | Err(Error::Exit) => Ok(()),
        Err(Error::Err(e)) => Err(e),
    }
}
