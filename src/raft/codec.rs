//! C2: bit-exact little-endian wire framing for RPCs, entry batches, and the
//! persisted configuration (SPEC_FULL §4.2).
//!
//! Every integer is little-endian. This is hand-rolled rather than routed through a
//! generic serializer (`bincode`, `serde`) because the layout -- including the 8-byte
//! alignment padding on entry and configuration-record payloads -- is part of the
//! cross-implementation wire contract, not an implementation detail a derive macro is
//! free to change.

use std::rc::Rc;

use crate::error::{Error, Result};
use crate::raft::config::{Configuration, Server};
use crate::raft::entry::{EntryType, LogEntry, Payload};
use crate::raft::message::{AppendEntriesArgs, AppendEntriesResult, RequestVoteArgs, RequestVoteResult};
use crate::raft::types::{ServerId, Term};

/// Rounds `n` up to the next multiple of 8.
fn pad8(n: usize) -> usize {
    (n + 7) & !7
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn get_u64(buf: &[u8], at: usize) -> Result<u64> {
    let bytes = buf.get(at..at + 8).ok_or(Error::Malformed)?;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

fn get_u32(buf: &[u8], at: usize) -> Result<u32> {
    let bytes = buf.get(at..at + 4).ok_or(Error::Malformed)?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn get_u8(buf: &[u8], at: usize) -> Result<u8> {
    buf.get(at).copied().ok_or(Error::Malformed)
}

// ---- RequestVote ----

pub fn encode_request_vote_args(args: &RequestVoteArgs) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    put_u64(&mut buf, args.term);
    put_u32(&mut buf, args.candidate_id);
    put_u32(&mut buf, 0); // reserved
    put_u64(&mut buf, args.last_log_index);
    put_u64(&mut buf, args.last_log_term);
    buf
}

pub fn decode_request_vote_args(buf: &[u8]) -> Result<RequestVoteArgs> {
    if buf.len() < 32 {
        return Err(Error::Malformed);
    }
    Ok(RequestVoteArgs {
        term: get_u64(buf, 0)?,
        candidate_id: get_u32(buf, 8)?,
        last_log_index: get_u64(buf, 16)?,
        last_log_term: get_u64(buf, 24)?,
    })
}

pub fn encode_request_vote_result(res: &RequestVoteResult) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9);
    put_u64(&mut buf, res.term);
    buf.push(res.vote_granted as u8);
    buf
}

pub fn decode_request_vote_result(buf: &[u8]) -> Result<RequestVoteResult> {
    if buf.len() < 9 {
        return Err(Error::Malformed);
    }
    Ok(RequestVoteResult { term: get_u64(buf, 0)?, vote_granted: get_u8(buf, 8)? != 0 })
}

// ---- AppendEntries ----

pub fn encode_append_entries_args(args: &AppendEntriesArgs) -> Vec<u8> {
    let mut buf = Vec::with_capacity(36);
    put_u64(&mut buf, args.term);
    put_u32(&mut buf, args.leader_id);
    put_u64(&mut buf, args.prev_log_index);
    put_u64(&mut buf, args.prev_log_term);
    put_u64(&mut buf, args.leader_commit);
    buf.extend_from_slice(&encode_entries_batch(&args.entries));
    buf
}

pub fn decode_append_entries_args(buf: &[u8]) -> Result<AppendEntriesArgs> {
    if buf.len() < 36 {
        return Err(Error::Malformed);
    }
    let term = get_u64(buf, 0)?;
    let leader_id = get_u32(buf, 8)?;
    let prev_log_index = get_u64(buf, 16)?;
    let prev_log_term = get_u64(buf, 24)?;
    let leader_commit = get_u64(buf, 32)?;
    let entries = decode_entries_batch(&buf[36..])?;
    Ok(AppendEntriesArgs { term, leader_id, prev_log_index, prev_log_term, leader_commit, entries })
}

pub fn encode_append_entries_result(res: &AppendEntriesResult) -> Vec<u8> {
    let mut buf = Vec::with_capacity(24);
    put_u64(&mut buf, res.term);
    buf.push(res.success as u8);
    buf.extend_from_slice(&[0u8; 7]); // reserved
    put_u64(&mut buf, res.last_log_index);
    buf
}

pub fn decode_append_entries_result(buf: &[u8]) -> Result<AppendEntriesResult> {
    if buf.len() < 24 {
        return Err(Error::Malformed);
    }
    Ok(AppendEntriesResult {
        term: get_u64(buf, 0)?,
        success: get_u8(buf, 8)? != 0,
        last_log_index: get_u64(buf, 16)?,
    })
}

// ---- Entries batch ----
//
// n(8) | header_1 .. header_n | data_1 .. data_n
// header: term(8) | type(1) | reserved(3) | data_len(4)   (16 bytes)
// data_i: data_len bytes, zero-padded to an 8-byte boundary.

const ENTRY_HEADER_LEN: usize = 16;

pub fn encode_entries_batch(entries: &[Rc<LogEntry>]) -> Vec<u8> {
    let mut buf = Vec::new();
    put_u64(&mut buf, entries.len() as u64);
    for entry in entries {
        put_u64(&mut buf, entry.term);
        buf.push(match entry.entry_type {
            EntryType::Command => 0,
            EntryType::Configuration => 1,
        });
        buf.extend_from_slice(&[0u8; 3]); // reserved
        put_u32(&mut buf, entry.payload.len() as u32);
    }
    for entry in entries {
        let bytes = entry.payload.as_bytes();
        buf.extend_from_slice(bytes);
        buf.resize(pad8(buf.len()), 0);
    }
    buf
}

pub fn decode_entries_batch(buf: &[u8]) -> Result<Vec<Rc<LogEntry>>> {
    let n = get_u64(buf, 0)? as usize;
    let headers_end = 8usize.checked_add(n.checked_mul(ENTRY_HEADER_LEN).ok_or(Error::Malformed)?).ok_or(Error::Malformed)?;
    if buf.len() < headers_end {
        return Err(Error::Malformed);
    }

    struct Header {
        term: Term,
        entry_type: EntryType,
        data_len: usize,
    }
    let mut headers = Vec::with_capacity(n);
    for i in 0..n {
        let base = 8 + i * ENTRY_HEADER_LEN;
        let term = get_u64(buf, base)?;
        let entry_type = match get_u8(buf, base + 8)? {
            0 => EntryType::Command,
            1 => EntryType::Configuration,
            _ => return Err(Error::Malformed),
        };
        let data_len = get_u32(buf, base + 12)? as usize;
        headers.push(Header { term, entry_type, data_len });
    }

    // The batch block this decode produces is shared by every entry decoded from it,
    // and is only freed once the last one is dropped (SPEC_FULL §3.1).
    let block: Rc<[u8]> = Rc::from(buf.to_vec().into_boxed_slice());

    let mut entries = Vec::with_capacity(n);
    let mut offset = headers_end;
    for header in headers {
        let padded = pad8(header.data_len);
        let end = offset.checked_add(header.data_len).ok_or(Error::Malformed)?;
        if end > block.len() {
            return Err(Error::Malformed);
        }
        let payload = Payload::from_batch(block.clone(), offset as u32, header.data_len as u32);
        entries.push(LogEntry::new(header.term, header.entry_type, payload));
        offset = offset.checked_add(padded).ok_or(Error::Malformed)?;
        if offset > block.len() {
            return Err(Error::Malformed);
        }
    }
    Ok(entries)
}

// ---- Configuration ----
//
// version(1)=1 | reserved(7) | n(8)
// then n records: id(8) | voting(1) | reserved(7) | address bytes... \0, each record
// padded to an 8-byte boundary.

const CONFIGURATION_VERSION: u8 = 1;
const CONFIGURATION_HEADER_LEN: usize = 16;
const CONFIGURATION_RECORD_FIXED_LEN: usize = 16; // id(8) + voting(1) + reserved(7)

pub fn encode_configuration(config: &Configuration) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(CONFIGURATION_VERSION);
    buf.extend_from_slice(&[0u8; 7]); // reserved
    put_u64(&mut buf, config.servers.len() as u64);
    for server in &config.servers {
        put_u64(&mut buf, server.id as u64);
        buf.push(server.voting as u8);
        buf.extend_from_slice(&[0u8; 7]); // reserved
        buf.extend_from_slice(server.address.as_bytes());
        buf.push(0); // terminator
        buf.resize(pad8(buf.len()), 0);
    }
    buf
}

pub fn decode_configuration(buf: &[u8]) -> Result<Configuration> {
    if buf.len() < CONFIGURATION_HEADER_LEN {
        return Err(Error::Malformed);
    }
    if get_u8(buf, 0)? != CONFIGURATION_VERSION {
        return Err(Error::Malformed);
    }
    let n = get_u64(buf, 8)? as usize;

    let mut servers = Vec::with_capacity(n);
    let mut offset = CONFIGURATION_HEADER_LEN;
    for _ in 0..n {
        if offset + CONFIGURATION_RECORD_FIXED_LEN > buf.len() {
            return Err(Error::Malformed);
        }
        let wide_id = get_u64(buf, offset)?;
        if wide_id == 0 || wide_id > ServerId::MAX as u64 {
            return Err(Error::Malformed);
        }
        let id = wide_id as ServerId;
        let voting = get_u8(buf, offset + 8)? != 0;
        let addr_start = offset + CONFIGURATION_RECORD_FIXED_LEN;
        let terminator = buf[addr_start..].iter().position(|&b| b == 0).ok_or(Error::Malformed)?;
        let address = std::str::from_utf8(&buf[addr_start..addr_start + terminator])
            .map_err(|_| Error::Malformed)?
            .to_string();
        if address.is_empty() {
            return Err(Error::Malformed);
        }
        if servers.iter().any(|s: &Server| s.id == id) || id == 0 {
            return Err(Error::Malformed);
        }
        servers.push(Server { id, address, voting });
        let record_len = CONFIGURATION_RECORD_FIXED_LEN + terminator + 1;
        offset += pad8(record_len);
    }
    Ok(Configuration { servers })
}
