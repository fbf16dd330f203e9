// Copyright 2021 Locha Mesh Developers <contact@locha.io>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::{crate_authors, crate_version, App, AppSettings, Arg, SubCommand};

use franklin_link::discovery::{self, SystemPortProvider};

mod list;

fn main() -> Result<()> {
    let app = App::new("Franklin Link Programmer")
        .setting(AppSettings::ColoredHelp)
        .version(crate_version!())
        .author(crate_authors!())
        .about("Discovery and smoke-test tool for the Franklin printer link\nProject website: https://locha.io/software/franklin-link")
        .arg(
            Arg::with_name("name")
                .short("n")
                .long("name")
                .takes_value(true)
                .help("Only accept a device whose reported name starts with this prefix"),
        )
        .arg(
            Arg::with_name("retries")
                .short("r")
                .long("retries")
                .default_value("10")
                .help("Retry budget for an unacknowledged frame before giving up"),
        )
        .arg(
            Arg::with_name("smoke-test")
                .long("smoke-test")
                .help("After connecting, run a conservative homing/motion/temperature smoke test"),
        )
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity, -v (debug), -vv (trace)"),
        )
        .subcommand(
            SubCommand::with_name("list")
                .about("List candidate serial ports")
                .setting(AppSettings::ColoredHelp),
        );

    #[cfg(windows)]
    let app = app.setting(AppSettings::WaitOnError);

    let matches = app.get_matches();

    init_logger(match matches.occurrences_of("v") {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        2..=u64::MAX => log::LevelFilter::Trace,
    })?;

    if let ("list", Some(_)) = matches.subcommand() {
        return list::list();
    }

    let retries: u32 = matches
        .value_of("retries")
        .unwrap()
        .parse()
        .context("--retries must be a number")?;
    let name_filter = matches.value_of("name");

    log::info!("Searching for a device");
    let mut provider = SystemPortProvider::new();
    let mut session = discovery::discover(&mut provider, name_filter, retries)
        .context("Couldn't find a device")?;

    log::info!(
        "Found `{}`: {} axes, {} extruders, {} temps",
        String::from_utf8_lossy(&session.name),
        session.num_axes,
        session.num_extruders,
        session.num_temps
    );
    log::info!(
        "Room temperature: {} C, motor current limit: {}, temp current limit: {}",
        session.room_temp,
        session.motor_limit,
        session.temp_limit
    );

    log::info!("Pinging device");
    session.ping(0x42).context("Ping wasn't acknowledged")?;

    if matches.is_present("smoke-test") {
        run_smoke_test(&mut session).context("Smoke test failed")?;
    }

    Ok(())
}

fn run_smoke_test<P>(session: &mut franklin_link::Session<P>) -> Result<()>
where
    P: serial::SerialPort,
{
    log::info!("Running smoke test");
    for axis in 0..session.num_axes {
        let mut handle = session.axis(axis);
        let pos = handle.get_current_pos()?;
        log::info!("Axis {}: current position {}", axis, pos);
    }
    for extruder in 0..session.num_extruders {
        let temp = session.readtemp(2 + session.maxaxes + extruder)?;
        log::info!("Extruder {}: current temperature {:.1} C", extruder, temp);
    }
    Ok(())
}

fn init_logger(level: log::LevelFilter) -> Result<()> {
    let mut logger = env_logger::Builder::from_env("FRANKLIN_LINK_LOG");
    logger.filter_level(level);

    #[cfg(unix)]
    logger.format(log_format_color);
    #[cfg(not(unix))]
    logger.format(log_format_no_color);

    logger.try_init().context("Failed to initialize logger")
}

#[cfg(unix)]
fn log_format_color(
    fmt: &mut env_logger::fmt::Formatter,
    record: &log::Record<'_>,
) -> io::Result<()> {
    let level = match record.level() {
        log::Level::Error => ansi_term::Color::Red.bold().paint("ERROR"),
        log::Level::Warn => ansi_term::Color::Yellow.bold().paint("WARN"),
        log::Level::Info => ansi_term::Color::Green.bold().paint("INFO"),
        log::Level::Debug => ansi_term::Color::Cyan.bold().paint("DBG"),
        log::Level::Trace => ansi_term::Color::Cyan.bold().paint("TRACE"),
    };

    writeln!(fmt, "[{}] - {}", level, record.args())
}

#[cfg(not(unix))]
fn log_format_no_color(
    fmt: &mut env_logger::fmt::Formatter,
    record: &log::Record<'_>,
) -> io::Result<()> {
    let level = match record.level() {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN",
        log::Level::Info => "INFO",
        log::Level::Debug => "DBG",
        log::Level::Trace => "TRACE",
    };

    writeln!(fmt, "[{}] - {}", level, record.args())
}
