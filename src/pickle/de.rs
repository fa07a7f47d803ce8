use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::opcodes::*;
use super::{PickleError, Value};

/// Decode a plain-data pickle stream (protocols 2 through 5).
///
/// Tuples decode as [`Value::List`]. Containers referenced more than once
/// through the memo are copied into each position; a container that contains
/// itself is rejected with [`PickleError::RecursiveStructure`].
pub fn from_slice(data: &[u8]) -> Result<Value, PickleError> {
    let root = Unpickler::new(data).load()?;
    root.resolve(&mut HashSet::new())
}

type ListCell = Rc<RefCell<Vec<Node>>>;
type DictCell = Rc<RefCell<Vec<(Node, Node)>>>;

/// Stack and memo entry. Containers are shared so that a memo fetch sees
/// items appended after the container was memoized.
#[derive(Clone)]
enum Node {
    Leaf(Value),
    List(ListCell),
    Dict(DictCell),
}

impl Node {
    fn list(items: Vec<Node>) -> Self {
        Node::List(Rc::new(RefCell::new(items)))
    }

    fn resolve(&self, open: &mut HashSet<usize>) -> Result<Value, PickleError> {
        match self {
            Node::Leaf(value) => Ok(value.clone()),
            Node::List(cell) => {
                let id = Rc::as_ptr(cell) as usize;
                if !open.insert(id) {
                    return Err(PickleError::RecursiveStructure);
                }
                let items = cell
                    .borrow()
                    .iter()
                    .map(|item| item.resolve(open))
                    .collect::<Result<Vec<_>, _>>()?;
                open.remove(&id);
                Ok(Value::List(items))
            }
            Node::Dict(cell) => {
                let id = Rc::as_ptr(cell) as usize;
                if !open.insert(id) {
                    return Err(PickleError::RecursiveStructure);
                }
                let entries = cell
                    .borrow()
                    .iter()
                    .map(|(k, v)| Ok((k.resolve(open)?, v.resolve(open)?)))
                    .collect::<Result<Vec<_>, PickleError>>()?;
                open.remove(&id);
                Ok(Value::Dict(entries))
            }
        }
    }
}

struct Unpickler<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Node>,
    marks: Vec<Vec<Node>>,
    memo: HashMap<u32, Node>,
}

impl<'a> Unpickler<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn push(&mut self, value: Value) {
        self.stack.push(Node::Leaf(value));
    }

    fn load(mut self) -> Result<Node, PickleError> {
        loop {
            let offset = self.pos;
            let opcode = self.read_u8()?;
            match opcode {
                PROTO => {
                    let protocol = self.read_u8()?;
                    if protocol > 5 {
                        return Err(PickleError::UnsupportedProtocol(protocol));
                    }
                }
                // Frame boundaries are transparent to the opcode stream.
                FRAME => {
                    self.read_u64()?;
                }
                STOP => return self.pop(offset),
                MARK => {
                    let outer = std::mem::take(&mut self.stack);
                    self.marks.push(outer);
                }
                NONE => self.push(Value::None),
                NEWTRUE => self.push(Value::Bool(true)),
                NEWFALSE => self.push(Value::Bool(false)),
                BININT1 => {
                    let v = self.read_u8()?;
                    self.push(Value::Int(i64::from(v)));
                }
                BININT2 => {
                    let v = u16::from_le_bytes(self.read_array()?);
                    self.push(Value::Int(i64::from(v)));
                }
                BININT => {
                    let v = i32::from_le_bytes(self.read_array()?);
                    self.push(Value::Int(i64::from(v)));
                }
                LONG1 => {
                    let len = usize::from(self.read_u8()?);
                    let bytes = self.read_bytes(len)?;
                    self.push(Value::Int(decode_long(bytes)?));
                }
                LONG4 => {
                    let len = u32::from_le_bytes(self.read_array()?) as usize;
                    let bytes = self.read_bytes(len)?;
                    self.push(Value::Int(decode_long(bytes)?));
                }
                BINFLOAT => {
                    let v = f64::from_be_bytes(self.read_array()?);
                    self.push(Value::Float(v));
                }
                SHORT_BINUNICODE => {
                    let len = usize::from(self.read_u8()?);
                    self.push_str(len)?;
                }
                BINUNICODE => {
                    let len = u32::from_le_bytes(self.read_array()?) as usize;
                    self.push_str(len)?;
                }
                BINUNICODE8 => {
                    let len = self.read_u64()? as usize;
                    self.push_str(len)?;
                }
                EMPTY_LIST | EMPTY_TUPLE => self.stack.push(Node::list(Vec::new())),
                EMPTY_DICT => self
                    .stack
                    .push(Node::Dict(Rc::new(RefCell::new(Vec::new())))),
                TUPLE => {
                    let items = self.pop_mark(offset)?;
                    self.stack.push(Node::list(items));
                }
                TUPLE1 | TUPLE2 | TUPLE3 => {
                    let n = usize::from(opcode - TUPLE1 + 1);
                    if self.stack.len() < n {
                        return Err(PickleError::StackUnderflow { offset });
                    }
                    let items = self.stack.split_off(self.stack.len() - n);
                    self.stack.push(Node::list(items));
                }
                APPEND => {
                    let item = self.pop(offset)?;
                    self.top_list(opcode, offset)?.borrow_mut().push(item);
                }
                APPENDS => {
                    let items = self.pop_mark(offset)?;
                    self.top_list(opcode, offset)?.borrow_mut().extend(items);
                }
                SETITEM => {
                    let value = self.pop(offset)?;
                    let key = self.pop(offset)?;
                    self.top_dict(opcode, offset)?
                        .borrow_mut()
                        .push((key, value));
                }
                SETITEMS => {
                    let items = self.pop_mark(offset)?;
                    if items.len() % 2 != 0 {
                        return Err(PickleError::OddSetItems { offset });
                    }
                    let mut pairs = Vec::with_capacity(items.len() / 2);
                    let mut iter = items.into_iter();
                    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                        pairs.push((k, v));
                    }
                    self.top_dict(opcode, offset)?.borrow_mut().extend(pairs);
                }
                MEMOIZE => {
                    let idx = self.memo.len() as u32;
                    self.memo_put(idx, offset)?;
                }
                BINPUT => {
                    let idx = u32::from(self.read_u8()?);
                    self.memo_put(idx, offset)?;
                }
                LONG_BINPUT => {
                    let idx = u32::from_le_bytes(self.read_array()?);
                    self.memo_put(idx, offset)?;
                }
                BINGET => {
                    let idx = u32::from(self.read_u8()?);
                    self.memo_get(idx)?;
                }
                LONG_BINGET => {
                    let idx = u32::from_le_bytes(self.read_array()?);
                    self.memo_get(idx)?;
                }
                other => {
                    return Err(PickleError::UnknownOpcode {
                        opcode: other,
                        offset,
                    });
                }
            }
        }
    }

    fn read_u8(&mut self) -> Result<u8, PickleError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u64(&mut self) -> Result<u64, PickleError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], PickleError> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], PickleError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(PickleError::UnexpectedEof { offset: self.pos })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn push_str(&mut self, len: usize) -> Result<(), PickleError> {
        let bytes = self.read_bytes(len)?;
        let s = String::from_utf8(bytes.to_vec())?;
        self.push(Value::Str(s));
        Ok(())
    }

    fn pop(&mut self, offset: usize) -> Result<Node, PickleError> {
        self.stack
            .pop()
            .ok_or(PickleError::StackUnderflow { offset })
    }

    fn pop_mark(&mut self, offset: usize) -> Result<Vec<Node>, PickleError> {
        let outer = self
            .marks
            .pop()
            .ok_or(PickleError::MissingMark { offset })?;
        Ok(std::mem::replace(&mut self.stack, outer))
    }

    fn top_list(&self, opcode: u8, offset: usize) -> Result<ListCell, PickleError> {
        match self.stack.last() {
            Some(Node::List(cell)) => Ok(Rc::clone(cell)),
            _ => Err(PickleError::WrongTarget {
                opcode,
                offset,
                expected: "list",
            }),
        }
    }

    fn top_dict(&self, opcode: u8, offset: usize) -> Result<DictCell, PickleError> {
        match self.stack.last() {
            Some(Node::Dict(cell)) => Ok(Rc::clone(cell)),
            _ => Err(PickleError::WrongTarget {
                opcode,
                offset,
                expected: "dict",
            }),
        }
    }

    fn memo_put(&mut self, idx: u32, offset: usize) -> Result<(), PickleError> {
        let top = self
            .stack
            .last()
            .cloned()
            .ok_or(PickleError::StackUnderflow { offset })?;
        self.memo.insert(idx, top);
        Ok(())
    }

    fn memo_get(&mut self, idx: u32) -> Result<(), PickleError> {
        let node = self
            .memo
            .get(&idx)
            .cloned()
            .ok_or(PickleError::MissingMemo(idx))?;
        self.stack.push(node);
        Ok(())
    }
}

fn decode_long(bytes: &[u8]) -> Result<i64, PickleError> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.len() > 8 {
        return Err(PickleError::IntegerOverflow);
    }
    let fill = if bytes[bytes.len() - 1] & 0x80 != 0 {
        0xff
    } else {
        0x00
    };
    let mut buf = [fill; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(i64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pickle::to_vec;

    #[test]
    fn decodes_cpython_protocol_4_dict() {
        // pickle.dumps({'a': 1, 'b': [True, 2.5]}, protocol=4)
        let bytes: [u8; 40] = [
            0x80, 0x04, 0x95, 0x1d, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x7d, 0x94, 0x28,
            0x8c, 0x01, 0x61, 0x94, 0x4b, 0x01, 0x8c, 0x01, 0x62, 0x94, 0x5d, 0x94, 0x28, 0x88,
            0x47, 0x40, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x65, 0x75, 0x2e,
        ];
        let value = from_slice(&bytes).unwrap();
        assert_eq!(value.get("a"), Some(&Value::Int(1)));
        assert_eq!(
            value.get("b"),
            Some(&Value::List(vec![Value::Bool(true), Value::Float(2.5)]))
        );
    }

    #[test]
    fn decodes_memo_fetches_and_tuples() {
        // pickle.dumps(('Linear', 'Linear', None), protocol=3)
        let bytes = b"\x80\x03X\x06\x00\x00\x00Linearq\x00h\x00N\x87q\x01.";
        let value = from_slice(bytes).unwrap();
        assert_eq!(
            value,
            Value::List(vec![
                Value::from("Linear"),
                Value::from("Linear"),
                Value::None
            ])
        );
    }

    #[test]
    fn encoder_output_decodes_to_same_value() {
        let value = Value::dict([
            ("neg", Value::Int(-5_000_000_000)),
            ("big", Value::Int(i64::MAX)),
            ("empty", Value::List(Vec::new())),
            ("flag", Value::Bool(false)),
            ("nested", Value::dict([("x", Value::Float(-0.25))])),
        ]);
        for protocol in 2..=4 {
            let bytes = to_vec(&value, protocol).unwrap();
            assert_eq!(from_slice(&bytes).unwrap(), value, "protocol {protocol}");
        }
    }

    #[test]
    fn truncated_input_is_an_error() {
        let bytes = to_vec(&Value::from(vec!["a", "b"]), 4).unwrap();
        let err = from_slice(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, PickleError::UnexpectedEof { .. }), "{err}");
    }

    #[test]
    fn unknown_opcode_reports_offset() {
        let err = from_slice(b"\x80\x04c__builtin__\neval\n.").unwrap_err();
        assert!(matches!(
            err,
            PickleError::UnknownOpcode {
                opcode: b'c',
                offset: 2
            }
        ));
    }

    #[test]
    fn append_without_list_is_rejected() {
        let err = from_slice(b"\x80\x04}Na.").unwrap_err();
        assert!(matches!(
            err,
            PickleError::WrongTarget {
                expected: "list",
                ..
            }
        ));
    }

    #[test]
    fn shared_list_is_decoded_in_every_position() {
        // x = ['a']; pickle.dumps([x, x], protocol=4)
        let bytes = b"\x80\x04\x95\x0e\x00\x00\x00\x00\x00\x00\x00]\x94(]\x94\x8c\x01a\x94ah\x01e.";
        let x = Value::from(vec!["a"]);
        assert_eq!(from_slice(bytes).unwrap(), Value::List(vec![x.clone(), x]));
    }

    #[test]
    fn shared_list_under_dict_keys_protocol_3() {
        // x = ['a']; pickle.dumps({'k': x, 'j': x}, protocol=3)
        let bytes = b"\x80\x03}q\x00(X\x01\x00\x00\x00kq\x01]q\x02X\x01\x00\x00\x00aq\x03aX\x01\x00\x00\x00jq\x04h\x02u.";
        let x = Value::from(vec!["a"]);
        assert_eq!(
            from_slice(bytes).unwrap(),
            Value::dict([("k", x.clone()), ("j", x)])
        );
    }

    #[test]
    fn self_referencing_list_is_rejected() {
        // l = []; l.append(l); pickle.dumps(l, protocol=4)
        let bytes = b"\x80\x04\x95\x06\x00\x00\x00\x00\x00\x00\x00]\x94h\x00a.";
        assert!(matches!(
            from_slice(bytes),
            Err(PickleError::RecursiveStructure)
        ));
    }

    #[test]
    fn decode_long_handles_sign_extension() {
        assert_eq!(decode_long(&[]).unwrap(), 0);
        assert_eq!(decode_long(&[0xff]).unwrap(), -1);
        assert_eq!(decode_long(&[0x00, 0x00, 0x00, 0x80, 0x00]).unwrap(), 1 << 31);
        assert!(decode_long(&[0; 9]).is_err());
    }
}
