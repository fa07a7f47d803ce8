use std::collections::HashMap;

use super::opcodes::*;
use super::{HIGHEST_PROTOCOL, LOWEST_PROTOCOL, PickleError, Value};

/// Frames are flushed once they reach this size (protocol 4).
const FRAME_SIZE_TARGET: usize = 64 * 1024;
/// Frames smaller than this are written without a FRAME header.
const FRAME_SIZE_MIN: usize = 4;
/// Items per MARK ... APPENDS / SETITEMS group.
const BATCH_SIZE: usize = 1000;

/// Encode `value` as a pickle stream of the given protocol (2..=4).
pub fn to_vec(value: &Value, protocol: u8) -> Result<Vec<u8>, PickleError> {
    if !(LOWEST_PROTOCOL..=HIGHEST_PROTOCOL).contains(&protocol) {
        return Err(PickleError::UnsupportedProtocol(protocol));
    }
    let mut pickler = Pickler::new(protocol);
    pickler.dump(value)?;
    Ok(pickler.out)
}

struct Pickler {
    protocol: u8,
    out: Vec<u8>,
    // Pending bytes of the current frame; flushed straight to `out` below protocol 4.
    frame: Vec<u8>,
    strings: HashMap<String, u32>,
    memo_len: u32,
}

impl Pickler {
    fn new(protocol: u8) -> Self {
        Self {
            protocol,
            out: Vec::new(),
            frame: Vec::new(),
            strings: HashMap::new(),
            memo_len: 0,
        }
    }

    fn framed(&self) -> bool {
        self.protocol >= 4
    }

    fn dump(&mut self, value: &Value) -> Result<(), PickleError> {
        self.out.extend_from_slice(&[PROTO, self.protocol]);
        self.save(value)?;
        self.frame.push(STOP);
        self.commit_frame(true);
        Ok(())
    }

    fn commit_frame(&mut self, force: bool) {
        if self.frame.is_empty() {
            return;
        }
        if !self.framed() {
            self.out.append(&mut self.frame);
            return;
        }
        if self.frame.len() >= FRAME_SIZE_TARGET || force {
            if self.frame.len() >= FRAME_SIZE_MIN {
                self.out.push(FRAME);
                self.out
                    .extend_from_slice(&(self.frame.len() as u64).to_le_bytes());
            }
            self.out.append(&mut self.frame);
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        self.frame.extend_from_slice(bytes);
    }

    fn save(&mut self, value: &Value) -> Result<(), PickleError> {
        self.commit_frame(false);
        match value {
            Value::None => self.write(&[NONE]),
            Value::Bool(true) => self.write(&[NEWTRUE]),
            Value::Bool(false) => self.write(&[NEWFALSE]),
            Value::Int(i) => self.save_int(*i),
            Value::Float(f) => {
                self.write(&[BINFLOAT]);
                self.write(&f.to_be_bytes());
            }
            Value::Str(s) => self.save_str(s)?,
            Value::List(items) => {
                self.write(&[EMPTY_LIST]);
                self.memoize();
                self.save_appends(items)?;
            }
            Value::Dict(entries) => {
                self.write(&[EMPTY_DICT]);
                self.memoize();
                self.save_setitems(entries)?;
            }
        }
        Ok(())
    }

    fn save_int(&mut self, i: i64) {
        if (0..=0xff).contains(&i) {
            self.write(&[BININT1, i as u8]);
        } else if (0..=0xffff).contains(&i) {
            self.write(&[BININT2]);
            self.write(&(i as u16).to_le_bytes());
        } else if let Ok(small) = i32::try_from(i) {
            self.write(&[BININT]);
            self.write(&small.to_le_bytes());
        } else {
            let encoded = encode_long(i);
            self.write(&[LONG1, encoded.len() as u8]);
            self.write(&encoded);
        }
    }

    /// Equal strings are memoized by content, not identity.
    fn save_str(&mut self, s: &str) -> Result<(), PickleError> {
        if let Some(&idx) = self.strings.get(s) {
            self.write_get(idx);
            return Ok(());
        }

        let bytes = s.as_bytes();
        let len = bytes.len();
        if self.protocol >= 4 && len <= 0xff {
            self.write(&[SHORT_BINUNICODE, len as u8]);
            self.write(bytes);
        } else if let Ok(len32) = u32::try_from(len) {
            let mut header = vec![BINUNICODE];
            header.extend_from_slice(&len32.to_le_bytes());
            self.write_payload(&header, bytes);
        } else if self.protocol >= 4 {
            let mut header = vec![BINUNICODE8];
            header.extend_from_slice(&(len as u64).to_le_bytes());
            self.write_payload(&header, bytes);
        } else {
            return Err(PickleError::StringTooLong {
                len,
                protocol: self.protocol,
            });
        }

        let idx = self.memoize();
        self.strings.insert(s.to_string(), idx);
        Ok(())
    }

    /// Large payloads bypass framing, as CPython does.
    fn write_payload(&mut self, header: &[u8], payload: &[u8]) {
        if self.framed() && payload.len() >= FRAME_SIZE_TARGET {
            self.commit_frame(true);
            self.out.extend_from_slice(header);
            self.out.extend_from_slice(payload);
        } else {
            self.write(header);
            self.write(payload);
        }
    }

    fn memoize(&mut self) -> u32 {
        let idx = self.memo_len;
        if self.protocol >= 4 {
            self.write(&[MEMOIZE]);
        } else if let Ok(small) = u8::try_from(idx) {
            self.write(&[BINPUT, small]);
        } else {
            self.write(&[LONG_BINPUT]);
            self.write(&idx.to_le_bytes());
        }
        self.memo_len += 1;
        idx
    }

    fn write_get(&mut self, idx: u32) {
        if let Ok(small) = u8::try_from(idx) {
            self.write(&[BINGET, small]);
        } else {
            self.write(&[LONG_BINGET]);
            self.write(&idx.to_le_bytes());
        }
    }

    fn save_appends(&mut self, items: &[Value]) -> Result<(), PickleError> {
        for batch in items.chunks(BATCH_SIZE) {
            if let [single] = batch {
                self.save(single)?;
                self.write(&[APPEND]);
            } else {
                self.write(&[MARK]);
                for item in batch {
                    self.save(item)?;
                }
                self.write(&[APPENDS]);
            }
        }
        Ok(())
    }

    fn save_setitems(&mut self, entries: &[(Value, Value)]) -> Result<(), PickleError> {
        for batch in entries.chunks(BATCH_SIZE) {
            if let [(key, value)] = batch {
                self.save(key)?;
                self.save(value)?;
                self.write(&[SETITEM]);
            } else {
                self.write(&[MARK]);
                for (key, value) in batch {
                    self.save(key)?;
                    self.save(value)?;
                }
                self.write(&[SETITEMS]);
            }
        }
        Ok(())
    }
}

/// Minimal little-endian two's complement encoding, as used by LONG1.
fn encode_long(i: i64) -> Vec<u8> {
    let mut bytes = i.to_le_bytes().to_vec();
    while bytes.len() > 1 {
        let last = bytes[bytes.len() - 1];
        let sign_of_prev = bytes[bytes.len() - 2] & 0x80;
        let redundant = (last == 0x00 && sign_of_prev == 0) || (last == 0xff && sign_of_prev != 0);
        if !redundant {
            break;
        }
        bytes.pop();
    }
    bytes
}
