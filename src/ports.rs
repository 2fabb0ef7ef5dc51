//! Port-spec grammar (spec section 6, authoritative):
//!
//! ```text
//! portspec  := segment ('|' segment)*
//! segment   := range | single
//! range     := UINT ':' UINT ('/' proto)?
//! single    := UINT ('/' proto)?
//! proto     := 'tcp' | 'udp'
//! ```
//!
//! Absence of proto means both. Shared by blueprint validation (C3) and
//! the readiness watcher (C11), which only needs the first port.
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Proto {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u16,
    pub end: u16,
    pub tcp: bool,
    pub udp: bool,
}

impl Segment {
    pub fn contains(&self, port: u16, proto: Proto) -> bool {
        let proto_ok = match proto {
            Proto::Tcp => self.tcp,
            Proto::Udp => self.udp,
        };
        proto_ok && port >= self.start && port <= self.end
    }

    pub fn first_port(&self) -> u16 {
        self.start
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub segments: Vec<Segment>,
}

impl PortSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for part in raw.split('|') {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::invalid("ports", "empty port segment"));
            }
            segments.push(parse_segment(part)?);
        }
        if segments.is_empty() {
            return Err(Error::invalid("ports", "empty port spec"));
        }
        Ok(Self { segments })
    }

    /// The first port named by the spec, in textual order — used by the
    /// readiness watcher (spec section 4.6).
    pub fn first_port(&self) -> u16 {
        self.segments[0].first_port()
    }

    pub fn contains(&self, port: u16, proto: Proto) -> bool {
        self.segments.iter().any(|s| s.contains(port, proto))
    }
}

impl std::fmt::Display for PortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self
            .segments
            .iter()
            .map(|s| {
                let range = if s.start == s.end {
                    s.start.to_string()
                } else {
                    format!("{}:{}", s.start, s.end)
                };
                match (s.tcp, s.udp) {
                    (true, true) => range,
                    (true, false) => format!("{range}/tcp"),
                    (false, true) => format!("{range}/udp"),
                    (false, false) => range,
                }
            })
            .collect();
        write!(f, "{}", rendered.join("|"))
    }
}

fn parse_segment(part: &str) -> Result<Segment> {
    let (range_part, proto_part) = match part.split_once('/') {
        Some((r, p)) => (r, Some(p)),
        None => (part, None),
    };

    let (tcp, udp) = match proto_part {
        None => (true, true),
        Some("tcp") => (true, false),
        Some("udp") => (false, true),
        Some(other) => {
            return Err(Error::invalid(
                "ports",
                format!("unknown protocol '{other}'"),
            ))
        }
    };

    let (start, end) = if let Some((a, b)) = range_part.split_once(':') {
        let start = parse_uint(a)?;
        let end = parse_uint(b)?;
        if end < start {
            return Err(Error::invalid(
                "ports",
                format!("range end {end} is less than start {start}"),
            ));
        }
        (start, end)
    } else {
        let single = parse_uint(range_part)?;
        (single, single)
    };

    Ok(Segment {
        start,
        end,
        tcp,
        udp,
    })
}

fn parse_uint(raw: &str) -> Result<u16> {
    let value: i64 = raw
        .parse()
        .map_err(|_| Error::invalid("ports", format!("'{raw}' is not an integer")))?;
    if value <= 0 {
        return Err(Error::invalid(
            "ports",
            format!("port {value} must be positive"),
        ));
    }
    if value > 65535 {
        return Err(Error::invalid(
            "ports",
            format!("port {value} exceeds 65535"),
        ));
    }
    Ok(value as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_port_both_protocols() {
        let spec = PortSpec::parse("34197").unwrap();
        assert_eq!(spec.segments.len(), 1);
        assert!(spec.contains(34197, Proto::Tcp));
        assert!(spec.contains(34197, Proto::Udp));
        assert_eq!(spec.first_port(), 34197);
    }

    #[test]
    fn parses_single_port_with_protocol() {
        let spec = PortSpec::parse("7777/udp").unwrap();
        assert!(spec.contains(7777, Proto::Udp));
        assert!(!spec.contains(7777, Proto::Tcp));
    }

    #[test]
    fn parses_range_with_alternation() {
        let spec = PortSpec::parse("26900:26903/tcp|26900:26903/udp").unwrap();
        assert_eq!(spec.segments.len(), 2);
        assert!(spec.contains(26901, Proto::Tcp));
        assert!(spec.contains(26903, Proto::Udp));
        assert!(!spec.contains(26904, Proto::Tcp));
        assert_eq!(spec.first_port(), 26900);
    }

    #[test]
    fn rejects_zero_negative_and_overflow() {
        assert!(PortSpec::parse("0").is_err());
        assert!(PortSpec::parse("-1").is_err());
        assert!(PortSpec::parse("65536").is_err());
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(PortSpec::parse("100:50").is_err());
    }

    #[test]
    fn rejects_unknown_protocol() {
        assert!(PortSpec::parse("80/sctp").is_err());
    }

    #[test]
    fn display_round_trips_single_and_ranges() {
        let spec = PortSpec::parse("7777/udp").unwrap();
        assert_eq!(spec.to_string(), "7777/udp");
        let spec = PortSpec::parse("100:200").unwrap();
        assert_eq!(spec.to_string(), "100:200");
    }
}
