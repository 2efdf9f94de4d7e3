use clap::Parser;
use daikin_s21::{
    Driver, serial,
    state::{Command, FanSpeed, Mode},
};
use std::{error::Error, thread, time::Duration};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port path
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Turn the unit off instead of on
    #[arg(long)]
    off: bool,

    /// Operating mode (auto, dry, cool, heat, fan)
    #[arg(short, long, default_value = "cool")]
    mode: Mode,

    /// Target temperature in °C
    #[arg(short, long, default_value_t = 22.0)]
    temperature: f32,

    /// Fan speed (auto, silent, level1 through level5)
    #[arg(short, long, default_value = "auto")]
    fan: FanSpeed,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();
    let port = serial::open(&args.port)?;
    let mut driver = Driver::new(port, serial::Clock, serial::Delay);

    while !driver.is_idle() {
        driver.poll()?;
        thread::sleep(Duration::from_millis(5));
    }

    driver.send_command(&Command {
        power: !args.off,
        mode: args.mode,
        target_c: args.temperature,
        fan: args.fan,
    })?;

    // Let the unit apply the change before reading the state back.
    thread::sleep(Duration::from_millis(100));

    driver.poll_now()?;

    let state = driver.state();

    println!(
        "Unit reports: power {}, mode {}, target {:.1} C, fan {}",
        if state.power { "on" } else { "off" },
        state.mode,
        state.target_temp,
        state.fan,
    );

    Ok(())
}
