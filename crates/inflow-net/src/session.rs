use std::net::SocketAddr;

use thiserror::Error;
use tracing::debug;

/// Session-level protocol failure (spec.md §7 "Protocol"). Closes the
/// session it occurred on; siblings are unaffected.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    #[error("octet count exceeds the configured maximum frame size")]
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramingMode {
    Auto,
    LfDelimited,
    OctetCounted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    ReadingFrameHeader,
    ReadingFrameBody,
    ReadingLfDelimited,
    Closing,
}

/// Per-listener framing policy (spec.md §4.3, §6 directives).
#[derive(Debug, Clone, Copy)]
pub struct FramingPolicy {
    pub octet_framing_supported: bool,
    pub addtl_frame_delimiter: Option<u8>,
    pub disable_lf_delimiter: bool,
    pub max_frame_size: usize,
}

impl Default for FramingPolicy {
    fn default() -> Self {
        Self {
            octet_framing_supported: true,
            addtl_frame_delimiter: None,
            disable_lf_delimiter: false,
            max_frame_size: 200 * 1024,
        }
    }
}

/// Max digits accepted in an octet-count header before it is treated as a
/// malformed/overflowing length (spec.md §4.3: "Digit overflow (>9
/// characters ...) fails the session").
const MAX_OCTET_DIGITS: usize = 9;

/// Per-connection buffer plus the LF/octet-counted framing decoder
/// (spec.md §3, §4.3).
pub struct Session {
    pub peer: SocketAddr,
    state: SessionState,
    mode: FramingMode,
    policy: FramingPolicy,
    buf: Vec<u8>,
    expected_len: Option<usize>,
}

/// What happened while feeding bytes into a session.
pub enum FeedOutcome {
    /// No complete frame yet; keep reading.
    NeedMore,
    /// A frame was completed.
    Frame(Vec<u8>),
    /// A protocol-level failure; the caller must close this session.
    Fail(FramingError),
}

impl Session {
    pub fn new(peer: SocketAddr, policy: FramingPolicy) -> Self {
        let mode = if policy.octet_framing_supported { FramingMode::Auto } else { FramingMode::LfDelimited };
        Self {
            peer,
            state: if mode == FramingMode::Auto {
                SessionState::ReadingFrameHeader
            } else {
                SessionState::ReadingLfDelimited
            },
            mode,
            policy,
            buf: Vec::new(),
            expected_len: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn is_delimiter(&self, b: u8) -> bool {
        if !self.policy.disable_lf_delimiter && b == b'\n' {
            return true;
        }
        self.policy.addtl_frame_delimiter == Some(b)
    }

    /// Feeds one byte into the decoder, returning at most one frame per
    /// call (callers loop until `NeedMore`).
    pub fn feed_byte(&mut self, b: u8) -> FeedOutcome {
        match self.mode {
            FramingMode::Auto => {
                // First non-space byte decides the mode for the rest of the
                // session (spec.md §4.3 "Auto").
                if b == b' ' {
                    return FeedOutcome::NeedMore;
                }
                self.mode = if b.is_ascii_digit() { FramingMode::OctetCounted } else { FramingMode::LfDelimited };
                self.state = if self.mode == FramingMode::OctetCounted {
                    SessionState::ReadingFrameHeader
                } else {
                    SessionState::ReadingLfDelimited
                };
                self.feed_byte(b)
            }
            FramingMode::LfDelimited => self.feed_lf(b),
            FramingMode::OctetCounted => self.feed_octet(b),
        }
    }

    fn feed_lf(&mut self, b: u8) -> FeedOutcome {
        if self.is_delimiter(b) {
            if self.buf.is_empty() {
                return FeedOutcome::NeedMore;
            }
            let frame = std::mem::take(&mut self.buf);
            return FeedOutcome::Frame(frame);
        }
        self.buf.push(b);
        FeedOutcome::NeedMore
    }

    fn feed_octet(&mut self, b: u8) -> FeedOutcome {
        match self.expected_len {
            None => {
                if b == b' ' {
                    if self.buf.is_empty() {
                        return FeedOutcome::Fail(FramingError::Overflow);
                    }
                    let digits = std::str::from_utf8(&self.buf).ok().and_then(|s| s.parse::<usize>().ok());
                    let Some(len) = digits else {
                        return FeedOutcome::Fail(FramingError::Overflow);
                    };
                    if len > self.policy.max_frame_size {
                        return FeedOutcome::Fail(FramingError::Overflow);
                    }
                    self.buf.clear();
                    if len == 0 {
                        // Zero-length octet-counted frame: emit immediately,
                        // without consuming a byte from the next frame
                        // (spec.md §4.3 "read N bytes; emit").
                        self.expected_len = None;
                        self.state = SessionState::ReadingFrameHeader;
                        return FeedOutcome::Frame(Vec::new());
                    }
                    self.expected_len = Some(len);
                    self.state = SessionState::ReadingFrameBody;
                    return FeedOutcome::NeedMore;
                }
                if !b.is_ascii_digit() || self.buf.len() >= MAX_OCTET_DIGITS {
                    return FeedOutcome::Fail(FramingError::Overflow);
                }
                self.buf.push(b);
                FeedOutcome::NeedMore
            }
            Some(0) => {
                // `expected_len` is never set to `Some(0)` by the header
                // parser above (a zero-length frame is emitted as soon as
                // the length is known), but guard the invariant here too:
                // `b` belongs to the *next* frame and must not be consumed.
                self.expected_len = None;
                self.state = SessionState::ReadingFrameHeader;
                self.feed_byte(b)
            }
            Some(len) => {
                self.buf.push(b);
                if self.buf.len() < len {
                    return FeedOutcome::NeedMore;
                }
                let frame = std::mem::take(&mut self.buf);
                self.expected_len = None;
                self.state = SessionState::ReadingFrameHeader;
                FeedOutcome::Frame(frame)
            }
        }
    }

    /// Feeds a chunk, invoking `emit` for each completed frame. Stops and
    /// returns `Err` on the first framing failure, leaving `self` in
    /// whatever partial state it had — the caller closes the session.
    pub fn feed(&mut self, bytes: &[u8], mut emit: impl FnMut(Vec<u8>)) -> Result<(), FramingError> {
        for &b in bytes {
            match self.feed_byte(b) {
                FeedOutcome::NeedMore => {}
                FeedOutcome::Frame(frame) => emit(frame),
                FeedOutcome::Fail(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Drains a trailing partial frame at regular EOF/close (spec.md §4.3
    /// `prepareClose`). LF mode accepts a frame without trailing delimiter
    /// only when `disable_lf_delimiter` is off; octet-counted partials are
    /// always discarded (the length contract was never satisfied).
    pub fn prepare_close(&mut self) -> Option<Vec<u8>> {
        self.state = SessionState::Closing;
        if self.mode == FramingMode::OctetCounted && self.expected_len.is_some() {
            debug!(peer = %self.peer, "discarding incomplete octet-counted frame at close");
            self.buf.clear();
            return None;
        }
        if self.buf.is_empty() {
            return None;
        }
        if self.policy.disable_lf_delimiter {
            debug!(peer = %self.peer, "discarding frame without trailing delimiter at close");
            self.buf.clear();
            return None;
        }
        Some(std::mem::take(&mut self.buf))
    }

    /// Unconditional discard on error-close (spec.md §4.3 "On errClose the
    /// partial buffer is dropped unconditionally").
    pub fn discard_on_error_close(&mut self) {
        self.state = SessionState::Closing;
        self.buf.clear();
        self.expected_len = None;
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use super::*;

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1)
    }

    #[test]
    fn lf_delimited_emits_two_frames() {
        let mut s = Session::new(peer(), FramingPolicy { octet_framing_supported: false, ..Default::default() });
        let mut frames = Vec::new();
        s.feed(b"a\nb\n", |f| frames.push(f)).unwrap();
        assert_eq!(frames, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn lf_delimited_ignores_empty_frame() {
        let mut s = Session::new(peer(), FramingPolicy { octet_framing_supported: false, ..Default::default() });
        let mut frames = Vec::new();
        s.feed(b"a\n\nb\n", |f| frames.push(f)).unwrap();
        assert_eq!(frames, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn octet_counted_frame_emits_exact_body() {
        let mut s = Session::new(peer(), FramingPolicy::default());
        let mut frames = Vec::new();
        s.feed(b"11 hello world", |f| frames.push(f)).unwrap();
        assert_eq!(frames, vec![b"hello world".to_vec()]);
    }

    #[test]
    fn octet_counted_blocks_instead_of_truncating() {
        let mut s = Session::new(peer(), FramingPolicy::default());
        let mut frames = Vec::new();
        s.feed(b"20 short", |f| frames.push(f)).unwrap();
        assert!(frames.is_empty());
    }

    #[test]
    fn octet_count_overflow_fails_session() {
        let mut s = Session::new(peer(), FramingPolicy::default());
        let mut frames = Vec::new();
        let err = s.feed(b"99999999999 body", |f| frames.push(f)).unwrap_err();
        assert_eq!(err, FramingError::Overflow);
        assert!(frames.is_empty());
    }

    #[test]
    fn zero_length_octet_counted_frame_emits_empty_without_consuming_next_frame() {
        let mut s = Session::new(peer(), FramingPolicy::default());
        let mut frames = Vec::new();
        s.feed(b"0 3 abc", |f| frames.push(f)).unwrap();
        assert_eq!(frames, vec![Vec::new(), b"abc".to_vec()]);
    }

    #[test]
    fn auto_mode_sticks_with_octet_counted_after_first_digit() {
        let mut s = Session::new(peer(), FramingPolicy::default());
        let mut frames = Vec::new();
        s.feed(b"3 abc", |f| frames.push(f)).unwrap();
        assert_eq!(frames, vec![b"abc".to_vec()]);
        assert_eq!(s.state(), SessionState::ReadingFrameHeader);
    }

    #[test]
    fn prepare_close_drains_partial_lf_frame_when_delimiter_not_required() {
        let mut s = Session::new(peer(), FramingPolicy { octet_framing_supported: false, ..Default::default() });
        let mut frames = Vec::new();
        s.feed(b"partial", |f| frames.push(f)).unwrap();
        assert_eq!(s.prepare_close(), Some(b"partial".to_vec()));
    }

    #[test]
    fn discard_on_error_close_drops_partial_buffer() {
        let mut s = Session::new(peer(), FramingPolicy { octet_framing_supported: false, ..Default::default() });
        let mut frames = Vec::new();
        s.feed(b"partial", |f| frames.push(f)).unwrap();
        s.discard_on_error_close();
        assert_eq!(s.prepare_close(), None);
    }
}
