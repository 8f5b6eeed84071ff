// Connection Matchers
//
// Classify a connection from the first bytes it sends. Matchers only look at
// the bytes they are given; the demultiplexer does the peeking.

use crate::protocol::rpc::RPC_VERSION;
use crate::rpc::record::{MAX_FRAGMENT_SIZE, fragment_size};

/// Fragment header plus xid, msg type, rpc version, program, version, procedure
pub const SUN_RPC_PEEK_SIZE: usize = 28;

/// Content type, major and minor version of a TLS record
pub const TLS_PEEK_SIZE: usize = 3;

/// Smallest fragment that can hold the fixed part of a call header
const MIN_CALL_FRAGMENT: usize = 24;

const MSG_TYPE_CALL: u32 = 0;
const TLS_HANDSHAKE: u8 = 22;
const TLS_MAJOR: u8 = 3;

pub trait Matcher: Send + Sync {
    /// Bytes needed before `matches` can decide
    fn peek_size(&self) -> usize;

    fn matches(&self, peeked: &[u8]) -> bool;
}

fn be_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Matches the first fragment of a Sun RPC call
#[derive(Debug, Clone, Copy)]
pub struct SunRpcMatcher {
    max_fragment_size: usize,
    program: Option<(u32, u32)>,
}

impl Default for SunRpcMatcher {
    fn default() -> Self {
        Self {
            max_fragment_size: MAX_FRAGMENT_SIZE,
            program: None,
        }
    }
}

impl SunRpcMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only match calls to this program and version
    pub fn for_program(program: u32, version: u32) -> Self {
        Self {
            program: Some((program, version)),
            ..Self::default()
        }
    }

    pub fn with_max_fragment_size(mut self, max: usize) -> Self {
        self.max_fragment_size = max;
        self
    }
}

impl Matcher for SunRpcMatcher {
    fn peek_size(&self) -> usize {
        SUN_RPC_PEEK_SIZE
    }

    fn matches(&self, peeked: &[u8]) -> bool {
        if peeked.len() < SUN_RPC_PEEK_SIZE {
            return false;
        }

        let size = fragment_size(be_u32(peeked, 0));
        if size < MIN_CALL_FRAGMENT || size > self.max_fragment_size {
            return false;
        }

        // xid at offset 4 can be anything
        let msg_type = be_u32(peeked, 8);
        let rpc_version = be_u32(peeked, 12);
        let program = be_u32(peeked, 16);
        let version = be_u32(peeked, 20);

        if msg_type != MSG_TYPE_CALL || rpc_version != RPC_VERSION || version == 0 {
            return false;
        }

        match self.program {
            Some(filter) => filter == (program, version),
            None => true,
        }
    }
}

/// Matches a TLS handshake record
#[derive(Debug, Clone)]
pub struct TlsMatcher {
    minor_versions: Vec<u8>,
}

impl TlsMatcher {
    /// TLS 1.0, 1.1 or 1.2 record versions
    pub fn any() -> Self {
        Self {
            minor_versions: vec![1, 2, 3],
        }
    }

    pub fn tls10() -> Self {
        Self {
            minor_versions: vec![1],
        }
    }

    pub fn tls11() -> Self {
        Self {
            minor_versions: vec![2],
        }
    }

    pub fn tls12() -> Self {
        Self {
            minor_versions: vec![3],
        }
    }
}

impl Matcher for TlsMatcher {
    fn peek_size(&self) -> usize {
        TLS_PEEK_SIZE
    }

    fn matches(&self, peeked: &[u8]) -> bool {
        match peeked {
            [TLS_HANDSHAKE, TLS_MAJOR, minor, ..] => self.minor_versions.contains(minor),
            _ => false,
        }
    }
}

/// Matches every connection; use as the last route
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyMatcher;

impl Matcher for AnyMatcher {
    fn peek_size(&self) -> usize {
        0
    }

    fn matches(&self, _peeked: &[u8]) -> bool {
        true
    }
}
