//! Sources attached by publishing clients

use super::{Source, SourceDescription};

/// Protocol a publisher connected with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherProtocol {
    /// RTSP session (ANNOUNCE + RECORD)
    Rtsp,
    /// RTMP connection (publish command)
    Rtmp,
}

/// A client publishing to a path
///
/// The session itself lives in the protocol handler; the path only keeps
/// enough to describe it.
#[derive(Debug, Clone)]
pub struct PublisherSource {
    protocol: PublisherProtocol,
    session_id: u64,
}

impl PublisherSource {
    /// Create a publisher source for a session
    pub fn new(protocol: PublisherProtocol, session_id: u64) -> Self {
        Self {
            protocol,
            session_id,
        }
    }

    /// Session identifier assigned by the protocol handler
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Protocol of the session
    pub fn protocol(&self) -> PublisherProtocol {
        self.protocol
    }
}

impl Source for PublisherSource {
    fn describe(&self) -> SourceDescription {
        let kind = match self.protocol {
            PublisherProtocol::Rtsp => "rtspSession",
            PublisherProtocol::Rtmp => "rtmpConn",
        };
        SourceDescription::with_id(kind, self.session_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let rtsp = PublisherSource::new(PublisherProtocol::Rtsp, 12);
        assert_eq!(rtsp.describe(), SourceDescription::with_id("rtspSession", "12"));
        assert_eq!(rtsp.session_id(), 12);

        let rtmp = PublisherSource::new(PublisherProtocol::Rtmp, 4);
        assert_eq!(rtmp.describe().kind, "rtmpConn");
        assert_eq!(rtmp.protocol(), PublisherProtocol::Rtmp);
    }
}
