// RPC Message Envelope
//
// RFC 5531 section 9 message layout, encoded with xdr-codec primitives:
//
//   rpc_msg      = xid, msg_type, (call_body | reply_body)
//   call_body    = rpcvers, prog, vers, proc, cred, verf
//   reply_body   = reply_stat, (accepted_reply | rejected_reply)
//
// Procedure arguments and results follow the envelope in the same record and
// are not part of this type.

use std::io::{Read, Write};

use xdr_codec::{Pack, Unpack, pack_opaque_flex, unpack_opaque_flex};

use crate::rpc::error::{Result, RpcError};
use crate::rpc::registry::ProcedureID;

/// Only RPC protocol version in use
pub const RPC_VERSION: u32 = 2;

/// Upper bound on opaque_auth bodies
pub const MAX_AUTH_BYTES: usize = 400;

const MSG_CALL: i32 = 0;
const MSG_REPLY: i32 = 1;

const MSG_ACCEPTED: i32 = 0;
const MSG_DENIED: i32 = 1;

const SUCCESS: i32 = 0;
const PROG_UNAVAIL: i32 = 1;
const PROG_MISMATCH: i32 = 2;
const PROC_UNAVAIL: i32 = 3;
const GARBAGE_ARGS: i32 = 4;
const SYSTEM_ERR: i32 = 5;

const RPC_MISMATCH: i32 = 0;
const AUTH_ERROR: i32 = 1;

/// Authentication flavor of an opaque_auth
///
/// Flavors are carried through untouched, so unknown numbers are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlavor {
    AuthNone,
    AuthSys,
    AuthShort,
    AuthDh,
    AuthKerb,
    AuthRsa,
    RpcsecGss,
    Other(i32),
}

impl From<i32> for AuthFlavor {
    fn from(value: i32) -> Self {
        match value {
            0 => AuthFlavor::AuthNone,
            1 => AuthFlavor::AuthSys,
            2 => AuthFlavor::AuthShort,
            3 => AuthFlavor::AuthDh,
            4 => AuthFlavor::AuthKerb,
            5 => AuthFlavor::AuthRsa,
            6 => AuthFlavor::RpcsecGss,
            other => AuthFlavor::Other(other),
        }
    }
}

impl From<AuthFlavor> for i32 {
    fn from(flavor: AuthFlavor) -> Self {
        match flavor {
            AuthFlavor::AuthNone => 0,
            AuthFlavor::AuthSys => 1,
            AuthFlavor::AuthShort => 2,
            AuthFlavor::AuthDh => 3,
            AuthFlavor::AuthKerb => 4,
            AuthFlavor::AuthRsa => 5,
            AuthFlavor::RpcsecGss => 6,
            AuthFlavor::Other(value) => value,
        }
    }
}

/// Why authentication failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStat {
    Ok,
    BadCred,
    RejectedCred,
    BadVerf,
    RejectedVerf,
    TooWeak,
    InvalidResp,
    Failed,
    Other(i32),
}

impl From<i32> for AuthStat {
    fn from(value: i32) -> Self {
        match value {
            0 => AuthStat::Ok,
            1 => AuthStat::BadCred,
            2 => AuthStat::RejectedCred,
            3 => AuthStat::BadVerf,
            4 => AuthStat::RejectedVerf,
            5 => AuthStat::TooWeak,
            6 => AuthStat::InvalidResp,
            7 => AuthStat::Failed,
            other => AuthStat::Other(other),
        }
    }
}

impl From<AuthStat> for i32 {
    fn from(stat: AuthStat) -> Self {
        match stat {
            AuthStat::Ok => 0,
            AuthStat::BadCred => 1,
            AuthStat::RejectedCred => 2,
            AuthStat::BadVerf => 3,
            AuthStat::RejectedVerf => 4,
            AuthStat::TooWeak => 5,
            AuthStat::InvalidResp => 6,
            AuthStat::Failed => 7,
            AuthStat::Other(value) => value,
        }
    }
}

/// Credential or verifier: a flavor plus up to 400 uninterpreted bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueAuth {
    pub flavor: AuthFlavor,
    pub body: Vec<u8>,
}

impl Default for OpaqueAuth {
    fn default() -> Self {
        Self::none()
    }
}

impl OpaqueAuth {
    pub fn none() -> Self {
        Self {
            flavor: AuthFlavor::AuthNone,
            body: Vec::new(),
        }
    }

    fn encode<Out: Write>(&self, out: &mut Out) -> Result<usize> {
        let mut sz = i32::from(self.flavor).pack(out)?;
        sz += pack_opaque_flex(&self.body, Some(MAX_AUTH_BYTES), out)?;
        Ok(sz)
    }

    fn decode<In: Read>(input: &mut In) -> Result<(Self, usize)> {
        let (flavor, mut sz) = i32::unpack(input)?;
        let (body, body_sz) = unpack_opaque_flex(input, Some(MAX_AUTH_BYTES))?;
        sz += body_sz;
        Ok((
            Self {
                flavor: flavor.into(),
                body,
            },
            sz,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallBody {
    pub rpc_version: u32,
    pub program: u32,
    pub version: u32,
    pub procedure: u32,
    pub cred: OpaqueAuth,
    pub verf: OpaqueAuth,
}

impl CallBody {
    pub fn procedure_id(&self) -> ProcedureID {
        ProcedureID::new(self.program, self.version, self.procedure)
    }
}

/// Outcome of a call the server accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptStat {
    Success,
    ProgUnavail,
    ProgMismatch { low: u32, high: u32 },
    ProcUnavail,
    GarbageArgs,
    SystemErr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedReply {
    pub verf: OpaqueAuth,
    pub stat: AcceptStat,
}

/// Reason a call was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectedReply {
    RpcMismatch { low: u32, high: u32 },
    AuthError(AuthStat),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    Accepted(AcceptedReply),
    Denied(RejectedReply),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Call(CallBody),
    Reply(ReplyBody),
}

/// A complete RPC message envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcMessage {
    pub xid: u32,
    pub body: MessageBody,
}

impl RpcMessage {
    /// Call message for `id` with null credential and verifier
    pub fn call(xid: u32, id: ProcedureID) -> Self {
        Self {
            xid,
            body: MessageBody::Call(CallBody {
                rpc_version: RPC_VERSION,
                program: id.program,
                version: id.version,
                procedure: id.procedure,
                cred: OpaqueAuth::none(),
                verf: OpaqueAuth::none(),
            }),
        }
    }

    pub fn accepted_reply(xid: u32, stat: AcceptStat) -> Self {
        Self {
            xid,
            body: MessageBody::Reply(ReplyBody::Accepted(AcceptedReply {
                verf: OpaqueAuth::none(),
                stat,
            })),
        }
    }

    /// Accepted reply with SUCCESS status; results are appended by the caller
    pub fn success_reply(xid: u32) -> Self {
        Self::accepted_reply(xid, AcceptStat::Success)
    }

    pub fn denied_reply(xid: u32, rejected: RejectedReply) -> Self {
        Self {
            xid,
            body: MessageBody::Reply(ReplyBody::Denied(rejected)),
        }
    }

    pub fn as_call(&self) -> Option<&CallBody> {
        match &self.body {
            MessageBody::Call(call) => Some(call),
            MessageBody::Reply(_) => None,
        }
    }

    pub fn as_reply(&self) -> Option<&ReplyBody> {
        match &self.body {
            MessageBody::Reply(reply) => Some(reply),
            MessageBody::Call(_) => None,
        }
    }

    /// Serialize the envelope, returning the number of bytes written
    pub fn encode<Out: Write>(&self, out: &mut Out) -> Result<usize> {
        let mut sz = self.xid.pack(out)?;

        match &self.body {
            MessageBody::Call(call) => {
                sz += MSG_CALL.pack(out)?;
                sz += call.rpc_version.pack(out)?;
                sz += call.program.pack(out)?;
                sz += call.version.pack(out)?;
                sz += call.procedure.pack(out)?;
                sz += call.cred.encode(out)?;
                sz += call.verf.encode(out)?;
            }
            MessageBody::Reply(ReplyBody::Accepted(accepted)) => {
                sz += MSG_REPLY.pack(out)?;
                sz += MSG_ACCEPTED.pack(out)?;
                sz += accepted.verf.encode(out)?;
                match accepted.stat {
                    AcceptStat::Success => sz += SUCCESS.pack(out)?,
                    AcceptStat::ProgUnavail => sz += PROG_UNAVAIL.pack(out)?,
                    AcceptStat::ProgMismatch { low, high } => {
                        sz += PROG_MISMATCH.pack(out)?;
                        sz += low.pack(out)?;
                        sz += high.pack(out)?;
                    }
                    AcceptStat::ProcUnavail => sz += PROC_UNAVAIL.pack(out)?,
                    AcceptStat::GarbageArgs => sz += GARBAGE_ARGS.pack(out)?,
                    AcceptStat::SystemErr => sz += SYSTEM_ERR.pack(out)?,
                }
            }
            MessageBody::Reply(ReplyBody::Denied(rejected)) => {
                sz += MSG_REPLY.pack(out)?;
                sz += MSG_DENIED.pack(out)?;
                match *rejected {
                    RejectedReply::RpcMismatch { low, high } => {
                        sz += RPC_MISMATCH.pack(out)?;
                        sz += low.pack(out)?;
                        sz += high.pack(out)?;
                    }
                    RejectedReply::AuthError(stat) => {
                        sz += AUTH_ERROR.pack(out)?;
                        sz += i32::from(stat).pack(out)?;
                    }
                }
            }
        }

        Ok(sz)
    }

    /// Deserialize an envelope, returning it with the number of bytes read
    ///
    /// Unknown message type or status discriminants are rejected.
    pub fn decode<In: Read>(input: &mut In) -> Result<(Self, usize)> {
        let (xid, mut sz) = u32::unpack(input)?;
        let (msg_type, n) = i32::unpack(input)?;
        sz += n;

        let body = match msg_type {
            MSG_CALL => {
                let (rpc_version, n) = u32::unpack(input)?;
                sz += n;
                let (program, n) = u32::unpack(input)?;
                sz += n;
                let (version, n) = u32::unpack(input)?;
                sz += n;
                let (procedure, n) = u32::unpack(input)?;
                sz += n;
                let (cred, n) = OpaqueAuth::decode(input)?;
                sz += n;
                let (verf, n) = OpaqueAuth::decode(input)?;
                sz += n;
                MessageBody::Call(CallBody {
                    rpc_version,
                    program,
                    version,
                    procedure,
                    cred,
                    verf,
                })
            }
            MSG_REPLY => {
                let (reply, n) = decode_reply_body(input)?;
                sz += n;
                MessageBody::Reply(reply)
            }
            value => {
                return Err(RpcError::InvalidDiscriminant {
                    field: "msg_type",
                    value,
                });
            }
        };

        Ok((Self { xid, body }, sz))
    }

    /// Serialize into a fresh buffer
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }
}

fn decode_mismatch<In: Read>(input: &mut In) -> Result<(u32, u32, usize)> {
    let (low, a) = u32::unpack(input)?;
    let (high, b) = u32::unpack(input)?;
    Ok((low, high, a + b))
}

fn decode_reply_body<In: Read>(input: &mut In) -> Result<(ReplyBody, usize)> {
    let (reply_stat, mut sz) = i32::unpack(input)?;

    match reply_stat {
        MSG_ACCEPTED => {
            let (verf, n) = OpaqueAuth::decode(input)?;
            sz += n;
            let (accept_stat, n) = i32::unpack(input)?;
            sz += n;

            let stat = match accept_stat {
                SUCCESS => AcceptStat::Success,
                PROG_UNAVAIL => AcceptStat::ProgUnavail,
                PROG_MISMATCH => {
                    let (low, high, n) = decode_mismatch(input)?;
                    sz += n;
                    AcceptStat::ProgMismatch { low, high }
                }
                PROC_UNAVAIL => AcceptStat::ProcUnavail,
                GARBAGE_ARGS => AcceptStat::GarbageArgs,
                SYSTEM_ERR => AcceptStat::SystemErr,
                value => {
                    return Err(RpcError::InvalidDiscriminant {
                        field: "accept_stat",
                        value,
                    });
                }
            };

            Ok((ReplyBody::Accepted(AcceptedReply { verf, stat }), sz))
        }
        MSG_DENIED => {
            let (reject_stat, n) = i32::unpack(input)?;
            sz += n;

            let rejected = match reject_stat {
                RPC_MISMATCH => {
                    let (low, high, n) = decode_mismatch(input)?;
                    sz += n;
                    RejectedReply::RpcMismatch { low, high }
                }
                AUTH_ERROR => {
                    let (stat, n) = i32::unpack(input)?;
                    sz += n;
                    RejectedReply::AuthError(stat.into())
                }
                value => {
                    return Err(RpcError::InvalidDiscriminant {
                        field: "reject_stat",
                        value,
                    });
                }
            };

            Ok((ReplyBody::Denied(rejected), sz))
        }
        value => Err(RpcError::InvalidDiscriminant {
            field: "reply_stat",
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn words(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    fn decode(bytes: &[u8]) -> Result<(RpcMessage, usize)> {
        RpcMessage::decode(&mut Cursor::new(bytes))
    }

    #[test]
    fn test_call_layout() {
        let msg = RpcMessage::call(7, ProcedureID::new(100000, 2, 3));
        let bytes = msg.to_vec().unwrap();

        // xid, CALL, rpcvers, prog, vers, proc, cred(flavor, len), verf(flavor, len)
        assert_eq!(bytes, words(&[7, 0, 2, 100000, 2, 3, 0, 0, 0, 0]));

        let (decoded, n) = decode(&bytes).unwrap();
        assert_eq!(n, bytes.len());
        assert_eq!(decoded, msg);
        assert_eq!(
            decoded.as_call().unwrap().procedure_id(),
            ProcedureID::new(100000, 2, 3)
        );
    }

    #[test]
    fn test_call_with_credential_padding() {
        let mut msg = RpcMessage::call(1, ProcedureID::new(1, 1, 1));
        if let MessageBody::Call(call) = &mut msg.body {
            call.cred = OpaqueAuth {
                flavor: AuthFlavor::AuthSys,
                body: vec![1, 2, 3, 4, 5],
            };
        }
        let bytes = msg.to_vec().unwrap();
        // 5-byte body padded to 8
        assert_eq!(bytes.len(), 24 + 8 + 8 + 8);

        let (decoded, _) = decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_success_reply_layout() {
        let bytes = RpcMessage::success_reply(99).to_vec().unwrap();
        // xid, REPLY, MSG_ACCEPTED, verf(flavor, len), SUCCESS
        assert_eq!(bytes, words(&[99, 1, 0, 0, 0, 0]));
    }

    #[test]
    fn test_prog_mismatch_layout() {
        let msg = RpcMessage::accepted_reply(5, AcceptStat::ProgMismatch { low: 1, high: 3 });
        let bytes = msg.to_vec().unwrap();
        assert_eq!(bytes, words(&[5, 1, 0, 0, 0, 2, 1, 3]));
        assert_eq!(decode(&bytes).unwrap().0, msg);
    }

    #[test]
    fn test_denied_replies() {
        let mismatch = RpcMessage::denied_reply(8, RejectedReply::RpcMismatch { low: 2, high: 2 });
        let bytes = mismatch.to_vec().unwrap();
        assert_eq!(bytes, words(&[8, 1, 1, 0, 2, 2]));
        assert_eq!(decode(&bytes).unwrap().0, mismatch);

        let auth = RpcMessage::denied_reply(9, RejectedReply::AuthError(AuthStat::TooWeak));
        let bytes = auth.to_vec().unwrap();
        assert_eq!(bytes, words(&[9, 1, 1, 1, 5]));
        assert_eq!(decode(&bytes).unwrap().0, auth);
    }

    #[test]
    fn test_unknown_discriminants_rejected() {
        let cases: [(&[i32], &str); 4] = [
            (&[1, 2], "msg_type"),
            (&[1, 1, 2], "reply_stat"),
            (&[1, 1, 0, 0, 0, 6], "accept_stat"),
            (&[1, 1, 1, 2], "reject_stat"),
        ];

        for (input, expected) in cases {
            match decode(&words(input)) {
                Err(RpcError::InvalidDiscriminant { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected {expected} error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_truncated_message_is_error() {
        let bytes = RpcMessage::call(1, ProcedureID::new(1, 1, 1)).to_vec().unwrap();
        for cut in [0, 3, 12, 30] {
            assert!(decode(&bytes[..cut]).is_err(), "cut={cut}");
        }
    }

    #[test]
    fn test_oversize_auth_body_rejected() {
        let mut bytes = words(&[1, 0, 2, 1, 1, 1, 1, 404]);
        bytes.extend(std::iter::repeat_n(0u8, 404));
        bytes.extend(words(&[0, 0]));
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_unknown_flavor_preserved() {
        let bytes = words(&[3, 0, 2, 10, 1, 0, 390004, 0, 0, 0]);
        let (msg, _) = decode(&bytes).unwrap();
        assert_eq!(msg.as_call().unwrap().cred.flavor, AuthFlavor::Other(390004));
        assert_eq!(msg.to_vec().unwrap(), bytes);
    }
}
