//! Stable `.icx` serialization for [`Image`].
//!
//! - Portable, explicit encoding (little-endian, fixed-width integers).
//! - Deterministic output so `encode -> decode -> encode` is byte-identical.
//! - Every decoded image is verified before it is handed to the runtime.

use std::collections::BTreeMap;

use crate::{
    CsetBits, GlobalInit, Image, Instruction, Keyword, Operator, ProcDecl, ProcId, RecordDecl,
    RecordId, StrConst,
};

const MAGIC: &[u8; 8] = b"ICONX\0\0\0";
const VERSION_MAJOR: u16 = 0;
const VERSION_MINOR: u16 = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("encode error: {message}")]
pub struct EncodeError {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("decode error at {offset}: {message}")]
pub struct DecodeError {
    pub message: String,
    pub offset: usize,
}

pub fn to_bytes(image: &Image) -> Result<Vec<u8>, EncodeError> {
    let mut enc = Encoder::new();
    enc.write_bytes(MAGIC);
    enc.write_u16(VERSION_MAJOR);
    enc.write_u16(VERSION_MINOR);
    enc.write_image(image)?;
    Ok(enc.finish())
}

pub fn from_bytes(bytes: &[u8]) -> Result<Image, DecodeError> {
    let mut dec = Decoder::new(bytes);
    dec.expect_bytes(MAGIC)?;
    let major = dec.read_u16()?;
    let minor = dec.read_u16()?;
    if major != VERSION_MAJOR || minor != VERSION_MINOR {
        return Err(dec.err(format!(
            "unsupported icx version {major}.{minor} (expected {VERSION_MAJOR}.{VERSION_MINOR})"
        )));
    }

    let image = dec.read_image()?;
    if dec.remaining() != 0 {
        return Err(dec.err("trailing bytes".to_string()));
    }
    crate::verify::verify_image(&image).map_err(|e| dec.err(e.message))?;
    Ok(image)
}

struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    fn write_len(&mut self, len: usize) -> Result<(), EncodeError> {
        let len_u32: u32 = len.try_into().map_err(|_| EncodeError {
            message: "length overflow".to_string(),
        })?;
        self.write_u32(len_u32);
        Ok(())
    }

    fn write_string(&mut self, s: &str) -> Result<(), EncodeError> {
        self.write_len(s.len())?;
        self.write_bytes(s.as_bytes());
        Ok(())
    }

    fn write_image(&mut self, image: &Image) -> Result<(), EncodeError> {
        self.write_i64(image.trace);

        // String pool.
        self.write_len(image.strings.len())?;
        self.write_bytes(&image.strings);

        // Cset literals.
        self.write_len(image.csets.len())?;
        for cset in &image.csets {
            for word in cset.0 {
                self.write_u64(word);
            }
        }

        // Field names.
        self.write_len(image.fields.len())?;
        for name in &image.fields {
            self.write_string(name)?;
        }

        // Record constructors.
        self.write_len(image.records.len())?;
        for rec in &image.records {
            self.write_string(&rec.name)?;
            self.write_len(rec.fields.len())?;
            for f in &rec.fields {
                self.write_u32(*f);
            }
        }

        // Procedures.
        self.write_len(image.procs.len())?;
        for proc in &image.procs {
            self.write_proc(proc)?;
        }
        self.write_u32(image.nstatics);

        // Globals (names are parallel to initialisers).
        if image.global_names.len() != image.globals.len() {
            return Err(EncodeError {
                message: "global name table does not match globals".to_string(),
            });
        }
        self.write_len(image.globals.len())?;
        for (name, init) in image.global_names.iter().zip(&image.globals) {
            self.write_string(name)?;
            match init {
                GlobalInit::Null => self.write_u8(0),
                GlobalInit::Proc(id) => {
                    self.write_u8(1);
                    self.write_u32(id.0);
                }
                GlobalInit::Record(id) => {
                    self.write_u8(2);
                    self.write_u32(id.0);
                }
                GlobalInit::Function(fname) => {
                    self.write_u8(3);
                    self.write_string(fname)?;
                }
            }
        }
        Ok(())
    }

    fn write_proc(&mut self, proc: &ProcDecl) -> Result<(), EncodeError> {
        self.write_string(&proc.name)?;
        self.write_string(&proc.file)?;
        self.write_u32(proc.nparams);
        self.write_u32(proc.nlocals);
        self.write_u32(proc.static_base);
        self.write_u32(proc.nstatics);
        self.write_len(proc.local_names.len())?;
        for name in &proc.local_names {
            self.write_string(name)?;
        }
        self.write_len(proc.code.len())?;
        for inst in &proc.code {
            self.write_instruction(inst);
        }
        Ok(())
    }

    fn write_instruction(&mut self, inst: &Instruction) {
        match inst {
            Instruction::Int(v) => {
                self.write_u8(1);
                self.write_i64(*v);
            }
            Instruction::Real(v) => {
                self.write_u8(2);
                self.write_f64(*v);
            }
            Instruction::Str(s) => {
                self.write_u8(3);
                self.write_u32(s.offset);
                self.write_u32(s.len);
            }
            Instruction::Cset(i) => {
                self.write_u8(4);
                self.write_u32(*i);
            }
            Instruction::Pnull => self.write_u8(5),
            Instruction::Push1 => self.write_u8(6),
            Instruction::Pushn1 => self.write_u8(7),
            Instruction::Global(i) => {
                self.write_u8(8);
                self.write_u32(*i);
            }
            Instruction::Static(i) => {
                self.write_u8(9);
                self.write_u32(*i);
            }
            Instruction::Local(i) => {
                self.write_u8(10);
                self.write_u32(*i);
            }
            Instruction::Arg(i) => {
                self.write_u8(11);
                self.write_u32(*i);
            }
            Instruction::Keywd(k) => {
                self.write_u8(12);
                self.write_u8(k.code());
            }
            Instruction::Mark(t) => {
                self.write_u8(13);
                self.write_u32(*t);
            }
            Instruction::Mark0 => self.write_u8(14),
            Instruction::Unmark => self.write_u8(15),
            Instruction::Eret => self.write_u8(16),
            Instruction::Efail => self.write_u8(17),
            Instruction::Esusp => self.write_u8(18),
            Instruction::Lsusp => self.write_u8(19),
            Instruction::Limit => self.write_u8(20),
            Instruction::Pret => self.write_u8(21),
            Instruction::Pfail => self.write_u8(22),
            Instruction::Psusp => self.write_u8(23),
            Instruction::Chfail(t) => {
                self.write_u8(24);
                self.write_u32(*t);
            }
            Instruction::Goto(t) => {
                self.write_u8(25);
                self.write_u32(*t);
            }
            Instruction::Init(t) => {
                self.write_u8(26);
                self.write_u32(*t);
            }
            Instruction::Line(n) => {
                self.write_u8(27);
                self.write_u32(*n);
            }
            Instruction::Dup => self.write_u8(28),
            Instruction::Sdup => self.write_u8(29),
            Instruction::Pop => self.write_u8(30),
            Instruction::Ccase => self.write_u8(31),
            Instruction::Quit => self.write_u8(32),
            Instruction::Invoke(n) => {
                self.write_u8(33);
                self.write_u32(*n);
            }
            Instruction::Llist(n) => {
                self.write_u8(34);
                self.write_u32(*n);
            }
            Instruction::Field(i) => {
                self.write_u8(35);
                self.write_u32(*i);
            }
            Instruction::Create(t) => {
                self.write_u8(36);
                self.write_u32(*t);
            }
            Instruction::Coact => self.write_u8(37),
            Instruction::Coret => self.write_u8(38),
            Instruction::Cofail => self.write_u8(39),
            Instruction::Op(op) => {
                self.write_u8(40);
                self.write_u8(op.code());
            }
        }
    }
}

struct Decoder<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.offset)
    }

    fn err(&self, message: String) -> DecodeError {
        DecodeError {
            message,
            offset: self.offset,
        }
    }

    fn expect_bytes(&mut self, expected: &[u8]) -> Result<(), DecodeError> {
        let got = self.read_exact(expected.len())?;
        if got != expected {
            return Err(self.err("bad magic".to_string()));
        }
        Ok(())
    }

    fn read_exact(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(self.err(format!(
                "unexpected end of input (need {n} bytes, have {})",
                self.remaining()
            )));
        }
        let start = self.offset;
        self.offset += n;
        Ok(&self.bytes[start..start + n])
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_exact(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.read_exact(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.read_exact(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.read_exact(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_le_bytes(a))
    }

    fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(self.read_u64()? as i64)
    }

    fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    fn read_len(&mut self) -> Result<usize, DecodeError> {
        let n = self.read_u32()? as usize;
        // Every encoded element takes at least one byte.
        if n > self.remaining() {
            return Err(self.err(format!("length {n} exceeds remaining input")));
        }
        Ok(n)
    }

    fn read_string(&mut self) -> Result<String, DecodeError> {
        let n = self.read_len()?;
        let bytes = self.read_exact(n)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| self.err("invalid utf-8".to_string()))
    }

    fn read_image(&mut self) -> Result<Image, DecodeError> {
        let mut image = Image {
            trace: self.read_i64()?,
            ..Image::default()
        };

        let n = self.read_len()?;
        image.strings = self.read_exact(n)?.to_vec();

        let n = self.read_len()?;
        for _ in 0..n {
            let mut words = [0u64; 4];
            for w in &mut words {
                *w = self.read_u64()?;
            }
            image.csets.push(CsetBits(words));
        }

        let n = self.read_len()?;
        for _ in 0..n {
            image.fields.push(self.read_string()?);
        }

        let n = self.read_len()?;
        for _ in 0..n {
            let name = self.read_string()?;
            let nf = self.read_len()?;
            let mut fields = Vec::with_capacity(nf);
            for _ in 0..nf {
                fields.push(self.read_u32()?);
            }
            image.records.push(RecordDecl { name, fields });
        }

        let n = self.read_len()?;
        for _ in 0..n {
            let proc = self.read_proc()?;
            image.procs.push(proc);
        }
        image.nstatics = self.read_u32()?;

        let n = self.read_len()?;
        let mut global_ids = BTreeMap::new();
        for idx in 0..n {
            let name = self.read_string()?;
            let init = match self.read_u8()? {
                0 => GlobalInit::Null,
                1 => GlobalInit::Proc(ProcId(self.read_u32()?)),
                2 => GlobalInit::Record(RecordId(self.read_u32()?)),
                3 => GlobalInit::Function(self.read_string()?),
                other => return Err(self.err(format!("invalid global tag {other}"))),
            };
            if global_ids.insert(name.clone(), idx as u32).is_some() {
                return Err(self.err(format!("duplicate global `{name}`")));
            }
            image.global_names.push(name);
            image.globals.push(init);
        }
        image.global_ids = global_ids;
        Ok(image)
    }

    fn read_proc(&mut self) -> Result<ProcDecl, DecodeError> {
        let name = self.read_string()?;
        let file = self.read_string()?;
        let nparams = self.read_u32()?;
        let nlocals = self.read_u32()?;
        let static_base = self.read_u32()?;
        let nstatics = self.read_u32()?;
        let n = self.read_len()?;
        let mut local_names = Vec::with_capacity(n);
        for _ in 0..n {
            local_names.push(self.read_string()?);
        }
        let n = self.read_len()?;
        let mut code = Vec::with_capacity(n);
        for _ in 0..n {
            code.push(self.read_instruction()?);
        }
        Ok(ProcDecl {
            name,
            file,
            nparams,
            nlocals,
            static_base,
            nstatics,
            local_names,
            code,
        })
    }

    fn read_instruction(&mut self) -> Result<Instruction, DecodeError> {
        let tag = self.read_u8()?;
        match tag {
            1 => Ok(Instruction::Int(self.read_i64()?)),
            2 => Ok(Instruction::Real(self.read_f64()?)),
            3 => Ok(Instruction::Str(StrConst {
                offset: self.read_u32()?,
                len: self.read_u32()?,
            })),
            4 => Ok(Instruction::Cset(self.read_u32()?)),
            5 => Ok(Instruction::Pnull),
            6 => Ok(Instruction::Push1),
            7 => Ok(Instruction::Pushn1),
            8 => Ok(Instruction::Global(self.read_u32()?)),
            9 => Ok(Instruction::Static(self.read_u32()?)),
            10 => Ok(Instruction::Local(self.read_u32()?)),
            11 => Ok(Instruction::Arg(self.read_u32()?)),
            12 => {
                let code = self.read_u8()?;
                Keyword::from_code(code)
                    .map(Instruction::Keywd)
                    .ok_or_else(|| self.err(format!("invalid keyword code {code}")))
            }
            13 => Ok(Instruction::Mark(self.read_u32()?)),
            14 => Ok(Instruction::Mark0),
            15 => Ok(Instruction::Unmark),
            16 => Ok(Instruction::Eret),
            17 => Ok(Instruction::Efail),
            18 => Ok(Instruction::Esusp),
            19 => Ok(Instruction::Lsusp),
            20 => Ok(Instruction::Limit),
            21 => Ok(Instruction::Pret),
            22 => Ok(Instruction::Pfail),
            23 => Ok(Instruction::Psusp),
            24 => Ok(Instruction::Chfail(self.read_u32()?)),
            25 => Ok(Instruction::Goto(self.read_u32()?)),
            26 => Ok(Instruction::Init(self.read_u32()?)),
            27 => Ok(Instruction::Line(self.read_u32()?)),
            28 => Ok(Instruction::Dup),
            29 => Ok(Instruction::Sdup),
            30 => Ok(Instruction::Pop),
            31 => Ok(Instruction::Ccase),
            32 => Ok(Instruction::Quit),
            33 => Ok(Instruction::Invoke(self.read_u32()?)),
            34 => Ok(Instruction::Llist(self.read_u32()?)),
            35 => Ok(Instruction::Field(self.read_u32()?)),
            36 => Ok(Instruction::Create(self.read_u32()?)),
            37 => Ok(Instruction::Coact),
            38 => Ok(Instruction::Coret),
            39 => Ok(Instruction::Cofail),
            40 => {
                let code = self.read_u8()?;
                Operator::from_code(code)
                    .map(Instruction::Op)
                    .ok_or_else(|| self.err(format!("invalid operator code {code}")))
            }
            other => Err(self.err(format!("invalid instruction opcode {other}"))),
        }
    }
}
