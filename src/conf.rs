/*!
A parser for an INI file with the following structure:

```ini
[Element]
name=ofstack
dpid=0x0000000000000001
n_tables=4
max_entries=1024
max_groups=256
n_buffers=0
; switch or proxy
mode=switch
versions=1.2,1.3

[Controller]
listen=tcp:0.0.0.0:6653
; an active connection that is reestablished when lost
connect=tcp:192.0.2.1:6653

[Datapath]
listen=tcp:0.0.0.0:6633

[Session]
echo_interval=30
echo_timeout=15
reconnect_start=5
reconnect_max=60
xid_ring=16
queue_capacity=1024

[Ports]
eth1=1
eth2=2
```

Only `[Controller]` is mandatory, all other sections fall back to defaults.
*/

use openflow;
use openflow::messages::{OFPP_MAX, OFPTT_MAX, OFP_TCP_PORT, OFP_VERSION_12, OFP_VERSION_13};

use ini::Ini;
use ini::ini;

use std::collections::BTreeMap;
use std::convert::From;
use std::default::Default;
use std::error;
use std::fmt;
use std::io;
use std::net::*;
use std::num::ParseIntError;
use std::str::FromStr;
use std::time::Duration;

const ELEMENT_SECTION: &str = "Element";
const NAME_KEY: &str = "name";
const DPID_KEY: &str = "dpid";
const N_TABLES_KEY: &str = "n_tables";
const MAX_ENTRIES_KEY: &str = "max_entries";
const MAX_GROUPS_KEY: &str = "max_groups";
const N_BUFFERS_KEY: &str = "n_buffers";
const MODE_KEY: &str = "mode";
const VERSIONS_KEY: &str = "versions";

const CTRL_SECTION: &str = "Controller";
const DPATH_SECTION: &str = "Datapath";
const LISTEN_KEY: &str = "listen";
const CONNECT_KEY: &str = "connect";

const SESSION_SECTION: &str = "Session";
const ECHO_INTERVAL_KEY: &str = "echo_interval";
const ECHO_TIMEOUT_KEY: &str = "echo_timeout";
const RECONNECT_START_KEY: &str = "reconnect_start";
const RECONNECT_MAX_KEY: &str = "reconnect_max";
const XID_RING_KEY: &str = "xid_ring";
const QUEUE_CAPACITY_KEY: &str = "queue_capacity";

const PORTS_SECTION: &str = "Ports";

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Ini(ini::Error),
    ParseNumber(&'static str, ParseIntError),
    ParseSwitchPort(ParseIntError),
    InvalidSwitchPortNo(String),
    InvalidValue(&'static str, &'static str, String),
    MissingSection(&'static str),
    MissingEntry(&'static str, &'static str),
    InvalidUri,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref e) => write!(f, "{}", e),
            Error::Ini(ref e) => write!(f, "{}", e),
            Error::ParseNumber(k, ref e) => {
                write!(f, "Error on trying to parse the '{}' value: {}", k, e)
            }
            Error::ParseSwitchPort(ref e) => {
                write!(f, "Error on trying to parse a switch port number: {}", e)
            }
            Error::InvalidSwitchPortNo(ref p) => write!(f, "Switch port number {} is invalid", p),
            Error::InvalidValue(s, k, ref v) => {
                write!(f, "The INI [{}] section has an invalid '{}' value: {}", s, k, v)
            }
            Error::MissingSection(s) => write!(f, "The INI file does not have a [{}] section", s),
            Error::MissingEntry(s, k) => {
                write!(f, "The INI [{}] section does not have a '{}' key", s, k)
            }
            Error::InvalidUri => write!(f, "An OpenFlow connection URI from INI file is invalid"),
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(ioe) => ioe,
            _ => io::Error::new(io::ErrorKind::InvalidData, e),
        }
    }
}
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
impl From<ParseIntError> for Error {
    fn from(e: ParseIntError) -> Self {
        Error::ParseSwitchPort(e)
    }
}

impl error::Error for Error {
    fn description(&self) -> &str {
        "INI configuration parser error"
    }
}

trait Section {
    type S;

    fn from_ini(conf: &Ini) -> Result<Self::S, Error>;
}

/// Parses an optional number, `default` if the key is absent
fn number<T: FromStr<Err = ParseIntError>>(
    section: Option<&ini::Properties>,
    key: &'static str,
    default: T,
) -> Result<T, Error> {
    match section.and_then(|s| s.get(key)) {
        Some(value) => value.parse().map_err(|e| Error::ParseNumber(key, e)),
        None => Ok(default),
    }
}

fn seconds(section: Option<&ini::Properties>, key: &'static str, default: u64) -> Result<Duration, Error> {
    number(section, key, default).map(Duration::from_secs)
}

/// The mode the forwarding element runs in
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    /// Emulates a datapath with its own tables
    Switch,
    /// Applies everything locally and forwards it to the datapaths
    Proxy,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(mode: &str) -> Result<Mode, Self::Err> {
        match mode {
            "switch" => Ok(Mode::Switch),
            "proxy" => Ok(Mode::Proxy),
            _ => Err(Error::InvalidValue(ELEMENT_SECTION, MODE_KEY, mode.to_string())),
        }
    }
}

/// The identity and dimensions of the emulated datapath
#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    pub datapath_id: u64,
    pub n_tables: u8,
    pub max_entries: usize,
    pub max_groups: u32,
    pub n_buffers: u32,
    pub mode: Mode,
    /// Wire versions that may be negotiated, lowest first
    pub versions: Vec<u8>,
}

impl Default for Element {
    fn default() -> Self {
        Element {
            name: env!("CARGO_PKG_NAME").to_string(),
            datapath_id: 1,
            n_tables: 4,
            max_entries: 1024,
            max_groups: 256,
            n_buffers: 0,
            mode: Mode::Switch,
            versions: openflow::SUPPORTED_VERSIONS.to_vec(),
        }
    }
}

fn parse_dpid(dpid: &str) -> Result<u64, Error> {
    let parsed = if dpid.starts_with("0x") || dpid.starts_with("0X") {
        u64::from_str_radix(&dpid[2..], 16)
    } else {
        dpid.parse()
    };
    parsed.map_err(|e| Error::ParseNumber(DPID_KEY, e))
}

fn parse_versions(versions: &str) -> Result<Vec<u8>, Error> {
    let mut parsed = vec![];
    for version in versions.split(',').map(str::trim) {
        parsed.push(match version {
            "1.2" => OFP_VERSION_12,
            "1.3" => OFP_VERSION_13,
            _ => {
                return Err(Error::InvalidValue(
                    ELEMENT_SECTION,
                    VERSIONS_KEY,
                    version.to_string(),
                ))
            }
        });
    }
    parsed.sort();
    parsed.dedup();
    Ok(parsed)
}

impl Section for Element {
    type S = Element;

    fn from_ini(conf: &Ini) -> Result<Self::S, Error> {
        debug!("Reading [{}] section", ELEMENT_SECTION);

        let section = conf.section(Some(ELEMENT_SECTION.to_owned()));
        let mut element = Element::default();
        if let Some(name) = section.and_then(|s| s.get(NAME_KEY)) {
            element.name = name.to_string();
        }
        if let Some(dpid) = section.and_then(|s| s.get(DPID_KEY)) {
            element.datapath_id = parse_dpid(dpid)?;
        }
        element.n_tables = number(section, N_TABLES_KEY, element.n_tables)?;
        if element.n_tables == 0 || element.n_tables > OFPTT_MAX {
            return Err(Error::InvalidValue(
                ELEMENT_SECTION,
                N_TABLES_KEY,
                element.n_tables.to_string(),
            ));
        }
        element.max_entries = number(section, MAX_ENTRIES_KEY, element.max_entries)?;
        element.max_groups = number(section, MAX_GROUPS_KEY, element.max_groups)?;
        element.n_buffers = number(section, N_BUFFERS_KEY, element.n_buffers)?;
        if let Some(mode) = section.and_then(|s| s.get(MODE_KEY)) {
            element.mode = Mode::from_str(mode)?;
        }
        if let Some(versions) = section.and_then(|s| s.get(VERSIONS_KEY)) {
            element.versions = parse_versions(versions)?;
        }

        debug!("Got {:?}", element);
        Ok(element)
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
enum ConnectionProtocol {
    Tcp,
}
impl FromStr for ConnectionProtocol {
    type Err = Error;

    fn from_str(proto: &str) -> Result<ConnectionProtocol, Self::Err> {
        match proto {
            "tcp" => Ok(ConnectionProtocol::Tcp),
            _ => Err(Error::InvalidUri),
        }
    }
}

/// An OpenFlow connection URI of the form `tcp:address[:port]`
#[derive(Debug, Clone, PartialEq)]
pub struct OfConnection {
    proto: ConnectionProtocol,
    pub socket: SocketAddr,
}

impl FromStr for OfConnection {
    type Err = Error;

    fn from_str(conn: &str) -> Result<OfConnection, Self::Err> {
        let def_port = OFP_TCP_PORT.to_string();
        let mut conn_split: Vec<_> = conn.split(':').collect();
        if conn_split.len() == 2 {
            conn_split.push(&def_port);
        }
        if conn_split.len() == 3 {
            let joined = &format!("{}:{}", conn_split[1], conn_split[2]);
            if let Ok(socket) = SocketAddr::from_str(joined) {
                let connection = OfConnection {
                    proto: ConnectionProtocol::from_str(conn_split[0])?,
                    socket,
                };
                debug!("Got {:?}", connection);
                return Ok(connection);
            }
        }
        Err(Error::InvalidUri)
    }
}

impl Default for OfConnection {
    fn default() -> Self {
        let socket_v4 = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), OFP_TCP_PORT);
        OfConnection {
            proto: ConnectionProtocol::Tcp,
            socket: SocketAddr::V4(socket_v4),
        }
    }
}

fn connection(
    section: Option<&ini::Properties>,
    key: &'static str,
) -> Result<Option<OfConnection>, Error> {
    match section.and_then(|s| s.get(key)) {
        Some(uri) => Ok(Some(OfConnection::from_str(uri)?)),
        None => Ok(None),
    }
}

/// Where the controllers are, at least one of both is set
#[derive(Debug, Clone, Default)]
pub struct Controller {
    pub listen: Option<OfConnection>,
    pub connect: Option<OfConnection>,
}

impl Section for Controller {
    type S = Controller;

    fn from_ini(conf: &Ini) -> Result<Self::S, Error> {
        debug!("Reading [{}] section", CTRL_SECTION);

        let section = conf.section(Some(CTRL_SECTION.to_owned()))
            .ok_or(Error::MissingSection(CTRL_SECTION))?;
        let ctrl = Controller {
            listen: connection(Some(section), LISTEN_KEY)?,
            connect: connection(Some(section), CONNECT_KEY)?,
        };
        if ctrl.listen.is_none() && ctrl.connect.is_none() {
            return Err(Error::MissingEntry(CTRL_SECTION, CONNECT_KEY));
        }

        debug!("Got {:?}", ctrl);
        Ok(ctrl)
    }
}

/// Where datapaths connect to
#[derive(Debug, Clone, Default)]
pub struct Datapath {
    pub listen: Option<OfConnection>,
}

impl Section for Datapath {
    type S = Datapath;

    fn from_ini(conf: &Ini) -> Result<Self::S, Error> {
        debug!("Reading [{}] section", DPATH_SECTION);

        let section = conf.section(Some(DPATH_SECTION.to_owned()));
        let dpath = Datapath {
            listen: connection(section, LISTEN_KEY)?,
        };

        debug!("Got {:?}", dpath);
        Ok(dpath)
    }
}

/// Timing and sizing of every peer session
#[derive(Debug, Clone)]
pub struct Session {
    pub echo_interval: Duration,
    pub echo_timeout: Duration,
    pub reconnect_start: Duration,
    pub reconnect_max: Duration,
    pub xid_ring: usize,
    /// Messages per dispatch queue before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            echo_interval: Duration::from_secs(30),
            echo_timeout: Duration::from_secs(15),
            reconnect_start: Duration::from_secs(5),
            reconnect_max: Duration::from_secs(60),
            xid_ring: openflow::xid::DEFAULT_XID_RING,
            queue_capacity: 1024,
        }
    }
}

impl Section for Session {
    type S = Session;

    fn from_ini(conf: &Ini) -> Result<Self::S, Error> {
        debug!("Reading [{}] section", SESSION_SECTION);

        let section = conf.section(Some(SESSION_SECTION.to_owned()));
        let def = Session::default();
        let session = Session {
            echo_interval: seconds(section, ECHO_INTERVAL_KEY, def.echo_interval.as_secs())?,
            echo_timeout: seconds(section, ECHO_TIMEOUT_KEY, def.echo_timeout.as_secs())?,
            reconnect_start: seconds(section, RECONNECT_START_KEY, def.reconnect_start.as_secs())?,
            reconnect_max: seconds(section, RECONNECT_MAX_KEY, def.reconnect_max.as_secs())?,
            xid_ring: number(section, XID_RING_KEY, def.xid_ring)?,
            queue_capacity: number(section, QUEUE_CAPACITY_KEY, def.queue_capacity)?,
        };
        if session.reconnect_start > session.reconnect_max {
            return Err(Error::InvalidValue(
                SESSION_SECTION,
                RECONNECT_START_KEY,
                session.reconnect_start.as_secs().to_string(),
            ));
        }

        debug!("Got {:?}", session);
        Ok(session)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfPort {
    pub of_port: u32,
}

impl FromStr for OfPort {
    type Err = Error;

    fn from_str(port: &str) -> Result<OfPort, Self::Err> {
        let port_no: u32 = port.parse()?;
        if 0 == port_no || port_no > OFPP_MAX {
            return Err(Error::InvalidSwitchPortNo(port_no.to_string()));
        }

        Ok(OfPort { of_port: port_no })
    }
}

/// The ports of the emulated datapath, by port number
#[derive(Debug, Clone, Default)]
pub struct Ports {
    pub by_number: BTreeMap<u32, String>,
}

impl Section for Ports {
    type S = Ports;

    fn from_ini(conf: &Ini) -> Result<Self::S, Error> {
        debug!("Reading [{}] section", PORTS_SECTION);

        let mut ports = Ports::default();
        if let Some(section) = conf.section(Some(PORTS_SECTION.to_owned())) {
            for (name, port) in section.iter() {
                // the port values are trimmed, so try to parse directly
                let port = OfPort::from_str(port)?;
                if ports.by_number.insert(port.of_port, name.to_string()).is_some() {
                    return Err(Error::InvalidSwitchPortNo(port.of_port.to_string()));
                }
            }
        }

        debug!("Got {:?}", ports);
        Ok(ports)
    }
}

/// The whole configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub element: Element,
    pub controller: Controller,
    pub datapath: Datapath,
    pub session: Session,
    pub ports: Ports,
}

fn from_ini(conf: &Ini) -> Result<Config, Error> {
    Ok(Config {
        element: Element::from_ini(conf)?,
        controller: Controller::from_ini(conf)?,
        datapath: Datapath::from_ini(conf)?,
        session: Session::from_ini(conf)?,
        ports: Ports::from_ini(conf)?,
    })
}

pub fn parse_file(path: &str) -> Result<Config, Error> {
    info!("Reading INI file {}", path);

    let conf = match Ini::load_from_file(path) {
        Ok(i) => i,
        Err(e) => {
            return Err(Error::Ini(e));
        }
    };

    from_ini(&conf)
}

pub fn parse_str(content: &str) -> Result<Config, Error> {
    let conf = Ini::load_from_str(content).map_err(|e| Error::Ini(ini::Error::Parse(e)))?;
    from_ini(&conf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal() {
        let conf = parse_str("[Controller]\nconnect=tcp:192.0.2.1\n").unwrap();
        assert_eq!(
            "192.0.2.1:6653".parse::<SocketAddr>().unwrap(),
            conf.controller.connect.unwrap().socket
        );
        assert!(conf.controller.listen.is_none());
        assert!(conf.datapath.listen.is_none());
        assert_eq!(4, conf.element.n_tables);
        assert_eq!(Mode::Switch, conf.element.mode);
        assert_eq!(vec![OFP_VERSION_12, OFP_VERSION_13], conf.element.versions);
        assert_eq!(Duration::from_secs(30), conf.session.echo_interval);
        assert!(conf.ports.by_number.is_empty());
    }

    #[test]
    fn full() {
        let conf = parse_str(
            "[Element]\nname=edge\ndpid=0x1f\nn_tables=2\nmode=proxy\nversions=1.3\n\
             [Controller]\nlisten=tcp:0.0.0.0:6653\n\
             [Datapath]\nlisten=tcp:127.0.0.1:6633\n\
             [Session]\necho_interval=10\nreconnect_start=1\n\
             [Ports]\neth1=1\neth2=2\n",
        ).unwrap();
        assert_eq!("edge", conf.element.name);
        assert_eq!(0x1f, conf.element.datapath_id);
        assert_eq!(2, conf.element.n_tables);
        assert_eq!(Mode::Proxy, conf.element.mode);
        assert_eq!(vec![OFP_VERSION_13], conf.element.versions);
        assert_eq!(6633, conf.datapath.listen.unwrap().socket.port());
        assert_eq!(Duration::from_secs(10), conf.session.echo_interval);
        assert_eq!(Duration::from_secs(1), conf.session.reconnect_start);
        assert_eq!(Some(&"eth2".to_string()), conf.ports.by_number.get(&2));
    }

    #[test]
    fn missing_controller() {
        match parse_str("[Element]\nname=x\n").unwrap_err() {
            Error::MissingSection(s) => assert_eq!(CTRL_SECTION, s),
            e => panic!("unexpected {}", e),
        }
        match parse_str("[Controller]\n").unwrap_err() {
            Error::MissingEntry(..) => {}
            e => panic!("unexpected {}", e),
        }
    }

    #[test]
    fn invalid_values() {
        assert!(parse_str("[Controller]\nconnect=udp:127.0.0.1\n").is_err());
        assert!(parse_str("[Controller]\nconnect=tcp:127.0.0.1\n[Element]\nmode=hub\n").is_err());
        assert!(parse_str("[Controller]\nconnect=tcp:127.0.0.1\n[Element]\nversions=1.0\n").is_err());
        assert!(parse_str("[Controller]\nconnect=tcp:127.0.0.1\n[Ports]\np=0\n").is_err());
        assert!(parse_str("[Controller]\nconnect=tcp:127.0.0.1\n[Element]\nn_tables=0\n").is_err());
    }

    #[test]
    fn port_numbers() {
        assert_eq!(5, OfPort::from_str("5").unwrap().of_port);
        assert!(OfPort::from_str("0").is_err());
        assert!(OfPort::from_str(&(OFPP_MAX + 1).to_string()).is_err());
        assert!(OfPort::from_str("x").is_err());
    }
}
