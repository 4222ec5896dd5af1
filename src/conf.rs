//! Pool configuration.
//!
//! A [`Config`] holds the servers a pool starts out with and the options
//! that influence how queries are distributed over them. It can be built
//! programmatically or parsed from a configuration in the style of
//! `/etc/resolv.conf`. In addition, [`parse_servers`] reads the compact
//! comma separated server lists commonly used on command lines and in
//! environment variables.

use std::error;
use std::fmt;
use std::fs;
use std::io::{self, BufRead, Read};
use std::net::{IpAddr, SocketAddr};
use std::num::ParseIntError;
use std::path::Path;
use std::str::{FromStr, SplitWhitespace};
use std::vec::Vec;

/// The port used for servers given without one.
pub const DEFAULT_PORT: u16 = 53;

//------------ Config --------------------------------------------------------

/// Configuration of a server pool.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// The servers of the pool.
    servers: Vec<SocketAddr>,

    /// Use round-robin selection of servers.
    rotate: bool,

    /// The port for servers given without one.
    default_port: u16,
}

impl Config {
    /// Creates a new, empty configuration.
    pub fn new() -> Self {
        Config {
            servers: Vec::new(),
            rotate: false,
            default_port: DEFAULT_PORT,
        }
    }

    /// Returns the configured servers.
    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }

    /// Replaces the configured servers.
    pub fn set_servers(&mut self, servers: Vec<SocketAddr>) {
        self.servers = servers
    }

    /// Appends a server.
    pub fn add_server(&mut self, server: SocketAddr) {
        self.servers.push(server)
    }

    /// Return the value of the rotate configuration variable.
    pub fn rotate(&self) -> bool {
        self.rotate
    }

    /// Set the value of the rotate configuration variable.
    pub fn set_rotate(&mut self, value: bool) {
        self.rotate = value
    }

    /// Return the value of the default_port configuration variable.
    pub fn default_port(&self) -> u16 {
        self.default_port
    }

    /// Set the value of the default_port configuration variable.
    ///
    /// This only affects servers parsed afterwards.
    pub fn set_default_port(&mut self, value: u16) {
        self.default_port = value
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// # Parsing Configuration Files
///
impl Config {
    /// Parses the configuration from a file.
    pub fn parse_file<P: AsRef<Path>>(
        &mut self,
        path: P,
    ) -> Result<(), Error> {
        let mut file = fs::File::open(path)?;
        self.parse(&mut file)
    }

    /// Parses the configuration from a reader.
    ///
    /// The format is line based. Empty lines and lines starting with `#` or
    /// `;` are ignored. The following lines are understood:
    ///
    /// * `nameserver <addr>` appends a server. The address can be a bare
    ///   IP address or include a port, with IPv6 addresses in brackets.
    /// * `port <port>` sets the port for servers on later lines.
    /// * `options <option>...` sets options. Of these, only `rotate` is
    ///   supported. Unknown options are ignored.
    ///
    /// Keywords of `resolv.conf` that don’t concern the pool, such as
    /// `search` or `domain`, are skipped.
    pub fn parse<R: Read>(&mut self, reader: &mut R) -> Result<(), Error> {
        for line in io::BufReader::new(reader).lines() {
            let line = line?;
            let line = line.trim_end();

            if line.is_empty()
                || line.starts_with(';')
                || line.starts_with('#')
            {
                continue;
            }

            let mut words = line.split_whitespace();
            match words.next() {
                Some("nameserver") => self.parse_nameserver(words)?,
                Some("port") => self.parse_port(words)?,
                Some("options") => self.parse_options(words),
                Some("domain") | Some("search") | Some("sortlist") => {}
                _ => return Err(Error::ParseError),
            }
        }
        Ok(())
    }

    fn parse_nameserver(
        &mut self,
        mut words: SplitWhitespace,
    ) -> Result<(), Error> {
        let addr = parse_server(next_word(&mut words)?, self.default_port)?;
        self.servers.push(addr);
        no_more_words(words)
    }

    fn parse_port(
        &mut self,
        mut words: SplitWhitespace,
    ) -> Result<(), Error> {
        self.default_port = u16::from_str(next_word(&mut words)?)?;
        no_more_words(words)
    }

    fn parse_options(&mut self, words: SplitWhitespace) {
        for word in words {
            if word == "rotate" {
                self.rotate = true
            }
        }
    }
}

//--- Display

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.default_port != DEFAULT_PORT {
            writeln!(f, "port {}", self.default_port)?;
        }
        for server in &self.servers {
            if server.port() == self.default_port {
                writeln!(f, "nameserver {}", server.ip())?;
            } else {
                writeln!(f, "nameserver {}", server)?;
            }
        }
        if self.rotate {
            writeln!(f, "options rotate")?;
        }
        Ok(())
    }
}

//------------ Server Lists --------------------------------------------------

/// Parses a comma separated list of servers.
///
/// Each entry is an IP address, optionally with a port. IPv6 addresses
/// with a port need to be in brackets, e.g., `[2001:db8::1]:5353`. Entries
/// without a port get `default_port`. Whitespace around entries is
/// ignored, empty entries are not allowed.
pub fn parse_servers(
    list: &str,
    default_port: u16,
) -> Result<Vec<SocketAddr>, Error> {
    if list.trim().is_empty() {
        return Ok(Vec::new());
    }
    list.split(',')
        .map(|item| parse_server(item.trim(), default_port))
        .collect()
}

/// Parses a single server address.
fn parse_server(s: &str, default_port: u16) -> Result<SocketAddr, Error> {
    if let Ok(addr) = SocketAddr::from_str(s) {
        return Ok(addr);
    }
    let ip = s
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(s);
    let ip = IpAddr::from_str(ip).map_err(|_| Error::ParseError)?;
    Ok(SocketAddr::new(ip, default_port))
}

//------------ Private Helpers -----------------------------------------------

/// Returns a reference to the next word or an error.
fn next_word<'a>(words: &mut SplitWhitespace<'a>) -> Result<&'a str, Error> {
    words.next().ok_or(Error::ParseError)
}

/// Returns nothing but errors out if there are words left.
fn no_more_words(mut words: SplitWhitespace) -> Result<(), Error> {
    match words.next() {
        Some(..) => Err(Error::ParseError),
        None => Ok(()),
    }
}

//------------ Error ---------------------------------------------------------

/// The error that can happen when parsing a configuration.
#[derive(Debug)]
pub enum Error {
    /// The configuration is malformed.
    ParseError,

    /// Something happend while reading.
    IoError(io::Error),
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::ParseError => None,
            Error::IoError(err) => Some(err),
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Error {
        Error::IoError(error)
    }
}

impl From<ParseIntError> for Error {
    fn from(_: ParseIntError) -> Error {
        Error::ParseError
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ParseError => f.write_str("error parsing configuration"),
            Error::IoError(err) => write!(f, "{}", err),
        }
    }
}

//============ Testing =======================================================
