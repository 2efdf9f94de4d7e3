use clap::Parser;
use daikin_s21::{Driver, serial};
use std::{error::Error, thread, time::Duration};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port path
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Seconds between status refreshes
    #[arg(short, long, default_value_t = 5)]
    interval: u64,

    /// Verify received frame checksums and drop mismatching frames
    #[arg(long)]
    strict: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();
    let port = serial::open(&args.port)?;
    let mut driver = Driver::new(port, serial::Clock, serial::Delay);

    driver.set_strict_checksums(args.strict);

    println!("Initializing link...");

    while !driver.is_idle() {
        driver.poll()?;
        thread::sleep(Duration::from_millis(5));
    }

    println!("Link up.");

    loop {
        driver.poll_now()?;

        let state = driver.state();

        println!(
            "power {} | mode {} | target {:.1} C | room {:.1} C | outside {:.1} C | fan {} | {}",
            if state.power { "on" } else { "off" },
            state.mode,
            state.target_temp,
            state.room_temp,
            state.outside_temp,
            state.fan,
            if driver.is_connected() {
                "connected"
            } else {
                "no contact"
            },
        );

        thread::sleep(Duration::from_secs(args.interval));
    }
}
