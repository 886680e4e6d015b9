//! Servicemode command line interface.

use std::process;
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Duration;

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_t, App, AppSettings::*, Arg,
    ArgMatches, SubCommand,
};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, trace, LevelFilter};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use simplelog::*;

use servicemode::{
    self as sm, CommandOutcome, Phase, ProvisionRequest, SerialConnector, Session, SessionError,
    SessionEvent, TestResult, TestStatus,
};

fn main() {
    println!("[SM] svcmode v{}", crate_version!());

    let matches = App::new(crate_name!())
        .version(format!("v{}", crate_version!()).as_str())
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            Svcmode puts a freshly booted device into service mode over its \
            USB serial port and then provisions it, runs its hardware tests \
            or just watches what it reports.\n\
            \n\
            The device only accepts service mode for a few seconds after it \
            boots. Start svcmode first, then power cycle or plug in the \
            device: the mode-entry command is repeated until the device \
            answers or the window closes.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .setting(SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("DEVICE_TTY")
                .help("the USB tty device to use")
                .long_help(
                    "the USB tty device to use; when not set, svcmode waits \
                     for a device to be plugged in and asks which one to use.",
                )
                .short("-t")
                .long("--tty")
                .takes_value(true)
                .require_equals(true)
                .global(true),
        )
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("serial port baud rate")
                .short("-b")
                .long("--baud-rate")
                .takes_value(true)
                .default_value("115200")
                .require_equals(true)
                .global(true),
        )
        .arg(
            Arg::with_name("DATA_BITS")
                .help("number of bits per character")
                .short("-d")
                .long("--data-bits")
                .takes_value(true)
                .possible_values(&["5", "6", "7", "8"])
                .default_value("8")
                .require_equals(true)
                .global(true),
        )
        .arg(
            Arg::with_name("STOP_BITS")
                .help("number of stop bits per byte")
                .short("-s")
                .long("--stop-bits")
                .takes_value(true)
                .possible_values(&["1", "2"])
                .default_value("1")
                .require_equals(true)
                .global(true),
        )
        .arg(
            Arg::with_name("PARITY")
                .help("parity checking protocol")
                .short("-p")
                .long("--parity")
                .takes_value(true)
                .possible_values(&["none", "odd", "even"])
                .default_value("none")
                .require_equals(true)
                .global(true),
        )
        .arg(
            Arg::with_name("FLOW_CONTROL")
                .help("flow control mode")
                .short("-f")
                .long("--flow-control")
                .takes_value(true)
                .possible_values(&["none", "soft", "hard"])
                .default_value("none")
                .require_equals(true)
                .global(true),
        )
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .global(true)
                .help(
                    "Sets the logging level of verbosity, repeat several times for \
                     higher verbosity",
                ),
        )
        .subcommand(SubCommand::with_name("status").about("prints the device status"))
        .subcommand(SubCommand::with_name("manifest").about("prints the device manifest"))
        .subcommand(
            SubCommand::with_name("monitor")
                .about("prints what the device reports without sending commands")
                .arg(
                    Arg::with_name("SECONDS")
                        .help("how long to monitor; forever when not set")
                        .long("--seconds")
                        .takes_value(true)
                        .require_equals(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("provision")
                .about("writes the unit identity and connectivity settings")
                .arg(
                    Arg::with_name("UNIT_ID")
                        .help("the unit identifier, e.g. SV-HUB-000123")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::with_name("WIFI_SSID")
                        .long("--wifi-ssid")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("WIFI_PASSWORD")
                        .long("--wifi-password")
                        .takes_value(true)
                        .requires("WIFI_SSID"),
                )
                .arg(
                    Arg::with_name("CLOUD_URL")
                        .long("--cloud-url")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("CLOUD_TOKEN")
                        .long("--cloud-token")
                        .takes_value(true)
                        .requires("CLOUD_URL"),
                ),
        )
        .subcommand(
            SubCommand::with_name("test")
                .about("runs the named hardware tests")
                .arg(
                    Arg::with_name("NAME")
                        .help("test names as listed in the manifest")
                        .required(true)
                        .multiple(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("test-all").about("runs every test the device supports"),
        )
        .subcommand(SubCommand::with_name("reboot").about("reboots the device"))
        .subcommand(
            SubCommand::with_name("reset")
                .about("resets the customer settings")
                .arg(
                    Arg::with_name("FACTORY")
                        .help("reset to factory defaults instead, erasing provisioning")
                        .long("--factory"),
                ),
        )
        .get_matches();

    // Vary the output based on how many times the user used the "verbose" flag
    // (i.e. 'svcmode -v -v -v' or 'svcmode -vvv' vs 'svcmode -v'
    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Err(e) = TermLogger::init(log_level, Config::default(), TerminalMode::Mixed) {
        eprintln!("logger: {}", e);
    }

    trace!("{:#?}", matches);

    let settings = match settings_from(&matches) {
        Some(settings) => settings,
        None => process::exit(1),
    };

    let exit_code = run(settings, &matches);
    debug!("exit code: {}", exit_code);
    process::exit(exit_code);
}

fn settings_from(matches: &ArgMatches) -> Option<sm::Settings> {
    // Arguments with default values ===========================================

    let baud_rate = match value_t!(matches.value_of("BAUD_RATE"), u32) {
        Ok(baud_rate) => baud_rate,
        Err(_) => {
            println!(
                "{}: `{}` needs to be a numeric value",
                style("error").red(),
                style("baud-rate").cyan()
            );
            println!(
                "   {} `{}` is not a valid value",
                style("-->").cyan(),
                style(matches.value_of("BAUD_RATE").unwrap_or_default()).on_red()
            );
            return None;
        }
    };

    let data_bits = match matches.value_of("DATA_BITS") {
        Some("5") => DataBits::Five,
        Some("6") => DataBits::Six,
        Some("7") => DataBits::Seven,
        _ => DataBits::Eight,
    };

    let stop_bits = match matches.value_of("STOP_BITS") {
        Some("2") => StopBits::Two,
        _ => StopBits::One,
    };

    let parity = match matches.value_of("PARITY") {
        Some("even") => Parity::Even,
        Some("odd") => Parity::Odd,
        _ => Parity::None,
    };

    let flow_control = match matches.value_of("FLOW_CONTROL") {
        Some("soft") => FlowControl::Software,
        Some("hard") => FlowControl::Hardware,
        _ => FlowControl::None,
    };

    let mut settings = sm::SettingsBuilder::default()
        .baud_rate(baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control)
        .finalize();

    // Arguments with NO default values ========================================

    settings.path = matches.value_of("DEVICE_TTY").map(Into::into);
    Some(settings)
}

fn choose_port(settings: &sm::Settings) -> Option<String> {
    match &settings.path {
        Some(path) => {
            if sm::wait_for_port(path) {
                None
            } else {
                Some(path.clone())
            }
        }
        None => loop {
            if let Some(path) = sm::select_port() {
                break Some(path);
            }
        },
    }
}

fn run(settings: sm::Settings, matches: &ArgMatches) -> i32 {
    let port = match choose_port(&settings) {
        Some(port) => port,
        None => return 1,
    };

    let mut session = Session::new(settings, Box::new(SerialConnector));
    let handle = session.handle();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("🛑 received Ctrl+C!");
        handle.disconnect();
    }) {
        error!("Failed to install the Ctrl+C handler: {}", e);
    }

    let events = session.subscribe();
    let printer = thread::spawn(move || print_events(events));

    let result = session
        .connect(&port)
        .and_then(|_| execute(&mut session, matches));
    let exit_code = match result {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            println!("{} {}", style("[SM] ❌").red(), e);
            1
        }
    };

    // Dropping the session closes the event channel and ends the printer.
    session.disconnect();
    drop(session);
    let _ = printer.join();
    exit_code
}

/// Run the selected subcommand. `Ok(false)` means the device reported a
/// failure.
fn execute(session: &mut Session, matches: &ArgMatches) -> Result<bool, SessionError> {
    if let ("monitor", Some(args)) = matches.subcommand() {
        return monitor(session, args);
    }

    enter_service_mode(session)?;

    match matches.subcommand() {
        ("status", _) => {
            let outcome = session.get_status()?;
            if let Some(info) = session.device_info() {
                println!("{:#?}", info);
            }
            Ok(report(&outcome))
        }
        ("manifest", _) => {
            let outcome = session.get_manifest()?;
            if let Some(manifest) = session.manifest() {
                println!("{:#?}", manifest);
            }
            Ok(report(&outcome))
        }
        ("provision", Some(args)) => {
            let mut request = ProvisionRequest::new(args.value_of("UNIT_ID").unwrap_or_default());
            if let Some(ssid) = args.value_of("WIFI_SSID") {
                request = request.wifi(ssid, args.value_of("WIFI_PASSWORD"));
            }
            if let Some(url) = args.value_of("CLOUD_URL") {
                request = request.cloud(url, args.value_of("CLOUD_TOKEN"));
            }
            // Required fields and capabilities come from the manifest.
            session.get_manifest()?;
            let outcome = session.provision(&request)?;
            Ok(report(&outcome))
        }
        ("test", Some(args)) => {
            session.get_manifest()?;
            let mut passed = true;
            for name in args.values_of("NAME").into_iter().flatten() {
                let result = session.run_test(name, sm::CommandData::new())?;
                print_test(&result);
                passed &= result.status == TestStatus::Passed;
            }
            Ok(passed)
        }
        ("test-all", _) => {
            session.get_manifest()?;
            let summary = session.test_all()?;
            for result in &summary.results {
                print_test(result);
            }
            println!(
                "[SM] {} passed, {} failed, {} skipped in {:.1?}",
                style(summary.passed()).green(),
                style(summary.failed()).red(),
                style(summary.skipped()).yellow(),
                summary.elapsed
            );
            if let Some(reason) = &summary.aborted {
                println!("[SM] {} {}", style("run aborted:").red(), reason);
            }
            Ok(summary.all_passed())
        }
        ("reboot", _) => Ok(report(&session.reboot()?)),
        ("reset", Some(args)) if args.is_present("FACTORY") => {
            Ok(report(&session.factory_reset()?))
        }
        ("reset", _) => Ok(report(&session.customer_reset()?)),
        _ => Ok(false),
    }
}

fn enter_service_mode(session: &mut Session) -> Result<(), SessionError> {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(120);
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"])
            .template("[SM] {spinner:.blue} {msg}"),
    );
    pb.set_message("⏳ Waiting for the device to accept service mode (power cycle it now)...");

    match session.enter_service_mode() {
        Ok(_) => {
            let name = session
                .device_info()
                .and_then(|info| info.device_name.clone().or_else(|| info.device_type.clone()))
                .unwrap_or_else(|| "device".into());
            pb.finish_with_message(format!("👍 {} is in service mode", style(name).green()));
            Ok(())
        }
        Err(e) => {
            pb.finish_with_message(format!("❌ {}", e));
            Err(e)
        }
    }
}

fn monitor(session: &mut Session, args: &ArgMatches) -> Result<bool, SessionError> {
    session.start_monitoring()?;
    println!("[SM] 👀 Monitoring, Ctrl+C to stop");
    let listened = match value_t!(args.value_of("SECONDS"), u64) {
        Ok(seconds) => session.listen(Duration::from_secs(seconds)).map(|_| ()),
        Err(_) => loop {
            if let Err(e) = session.listen(Duration::from_secs(1)) {
                break Err(e);
            }
        },
    };
    match listened {
        Ok(()) => {
            session.stop_monitoring()?;
            Ok(true)
        }
        Err(e) if interrupted(&e, session.phase()) => Ok(true),
        Err(e) => Err(e),
    }
}

/// Ctrl+C disconnects the session, which ends any wait with `Cancelled`.
fn interrupted(error: &SessionError, phase: Phase) -> bool {
    matches!(error, SessionError::Cancelled) && phase == Phase::Disconnected
}

fn report(outcome: &CommandOutcome) -> bool {
    if outcome.is_success() {
        println!("[SM] {} {}", style("✔").green(), outcome);
    } else {
        println!("[SM] {} {}", style("✘").red(), outcome);
    }
    outcome.is_success()
}

fn print_test(result: &TestResult) {
    let status = match result.status {
        TestStatus::Passed => style("PASS").green(),
        TestStatus::Skipped => style("SKIP").yellow(),
        TestStatus::Pending | TestStatus::Running => style("....").dim(),
        TestStatus::Failed => style("FAIL").red(),
    };
    println!(
        "[SM] {} {:<12} {:>6.1?} {}",
        status,
        result.name,
        result.duration,
        result.message.as_deref().unwrap_or_default()
    );
}

fn print_events(events: Receiver<SessionEvent>) {
    for event in events {
        match event {
            SessionEvent::Beacon(message) => {
                println!("{} {}", style("[beacon]").cyan(), message)
            }
            SessionEvent::Unsolicited(message) => {
                println!("{} {}", style("[device]").magenta(), message)
            }
            SessionEvent::Noise(line) => println!("{}", style(line).dim()),
            SessionEvent::PhaseChanged { to, .. } => debug!("phase: {}", to),
            SessionEvent::Sent(line) => trace!("sent {}", line),
            SessionEvent::Response(_) | SessionEvent::TestUpdated(_) => {}
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use servicemode::{Connector, Settings, SettingsBuilder, Transport, TransportError};

    struct Idle;

    impl Transport for Idle {
        fn name(&self) -> String {
            "idle".into()
        }

        fn write_line(&mut self, _bytes: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
            thread::sleep(timeout.min(Duration::from_millis(2)));
            Ok(None)
        }
    }

    struct IdleConnector;

    impl Connector for IdleConnector {
        fn open(
            &mut self,
            _settings: &Settings,
            _port: &str,
        ) -> Result<Box<dyn Transport>, TransportError> {
            Ok(Box::new(Idle))
        }
    }

    fn monitor_args(args: &[&str]) -> ArgMatches<'static> {
        App::new("monitor")
            .arg(
                Arg::with_name("SECONDS")
                    .long("seconds")
                    .takes_value(true)
                    .require_equals(true),
            )
            .get_matches_from(args.iter().copied())
    }

    fn interrupted_monitor(args: &[&str]) -> Result<bool, SessionError> {
        let mut session = Session::new(SettingsBuilder::new().finalize(), Box::new(IdleConnector));
        session.connect("/dev/ttyIDLE").unwrap();
        let handle = session.handle();
        let interrupter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            handle.disconnect();
        });
        let result = monitor(&mut session, &monitor_args(args));
        interrupter.join().unwrap();
        assert_eq!(session.phase(), Phase::Disconnected);
        result
    }

    #[test]
    fn ctrl_c_ends_bounded_monitoring_cleanly() {
        assert!(interrupted_monitor(&["monitor", "--seconds=30"]).unwrap());
    }

    #[test]
    fn ctrl_c_ends_unbounded_monitoring_cleanly() {
        assert!(interrupted_monitor(&["monitor"]).unwrap());
    }

    #[test]
    fn only_a_disconnect_counts_as_interrupted() {
        assert!(interrupted(&SessionError::Cancelled, Phase::Disconnected));
        assert!(!interrupted(&SessionError::Cancelled, Phase::Monitoring));
        assert!(!interrupted(&SessionError::NotConnected, Phase::Disconnected));
    }
}
