/*!
The OpenFlow forwarding element as a daemon.

It reads its INI configuration, listens for controllers and datapaths and
connects to a controller if configured. You can stack it between Open
vSwitch and a controller in proxy mode:

```sh
# ovs-vsctl set-controller br0 tcp:127.0.0.1:6633
# ofstack -vv -c proxy.ini
```
*/

#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;
extern crate ofstack;
extern crate simple_logger;

#[cfg(unix)]
extern crate libc;
#[cfg(unix)]
extern crate log_panics;
#[cfg(unix)]
extern crate syslog;

use ofstack::conf;
use ofstack::fwdelem::{FwdBehavior, SwitchBehavior};
use ofstack::proxy::ProxyBehavior;
use ofstack::transport::Runtime;

use std::io;
use std::process::exit;

#[cfg(unix)]
use std::fs::File;
#[cfg(unix)]
use std::io::prelude::*;

fn init_logging(level: log::Level, use_syslog: bool) -> io::Result<()> {
    let failed = |e: &dyn std::fmt::Display| {
        io::Error::new(io::ErrorKind::Other, format!("error on logging initialization: {}", e))
    };
    #[cfg(unix)]
    {
        if use_syslog {
            let filter = level.to_level_filter();
            syslog::init(syslog::Facility::LOG_USER, filter, Some(crate_name!()))
                .map_err(|e| failed(&e))?;
            log_panics::init();
            return Ok(());
        }
    }
    #[cfg(not(unix))]
    let _ = use_syslog;
    simple_logger::init_with_level(level).map_err(|e| failed(&e))
}

/// Forks into the background and writes the PID of the child
#[cfg(unix)]
fn daemonize(pid_path: &str) -> io::Result<()> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(io::Error::last_os_error());
    } else if pid > 0 {
        // exit the parent process
        exit(0);
    }
    let mut file = File::create(pid_path)?;
    write!(file, "{}", unsafe { libc::getpid() })?;
    Ok(())
}

/// Reads command line arguments and calls the corresponding functions.
fn handle_cli_args() -> io::Result<()> {
    #[cfg(unix)]
    let unix_opts =
        "-p, --pid [file] 'Daemonizes the process and writes a PID file'
        -s, --syslog      'Logs via syslog'
        ";
    #[cfg(not(unix))]
    let unix_opts = "";

    let usage = &format!(
        "{}-v...          'Repeat to set the level of verbosity'
        -c, --conf <ini>  'The INI configuration file'"
    , unix_opts);
    let matches = app_from_crate!().args_from_usage(usage).get_matches();

    let log_lvl = match matches.occurrences_of("v") {
        0 => log::Level::Error,
        1 => log::Level::Warn,
        2 => log::Level::Info,
        3 => log::Level::Debug,
        _ => log::Level::Trace,
    };
    init_logging(log_lvl, matches.is_present("syslog"))?;

    let conf_path = matches
        .value_of("conf")
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no configuration file"))?;
    let config = conf::parse_file(conf_path)?;

    #[cfg(unix)]
    {
        if matches.is_present("pid") {
            let pid_path = matches.value_of("pid").unwrap_or("/var/run/ofstack.pid");
            daemonize(pid_path)?;
        }
    }

    let behavior: Box<dyn FwdBehavior> = match config.element.mode {
        conf::Mode::Switch => Box::new(SwitchBehavior),
        conf::Mode::Proxy => Box::new(ProxyBehavior::new()),
    };
    info!(
        "Starting {} (dpid 0x{:016x}) as {:?}",
        config.element.name, config.element.datapath_id, config.element.mode
    );
    Runtime::new(&config, behavior)?.run()
}

/// Entry function with top level error handling.
fn main() {
    if let Err(e) = handle_cli_args() {
        error!("{}", e);
        exit(1);
    }
}
