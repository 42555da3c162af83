#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

pub mod builder;
pub mod icx;
pub mod verify;

pub use builder::{BuildError, Label, ProcBuilder};
pub use icx::{DecodeError, EncodeError, from_bytes, to_bytes};
pub use verify::{VerifyError, verify_image};

/// A stable identifier for an Icon procedure within an [`Image`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProcId(pub u32);

/// A stable identifier for a record constructor within an [`Image`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RecordId(pub u32);

/// A slice of the image string pool.
///
/// String constants are never copied into the string arena; descriptors produced for them
/// point straight into the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct StrConst {
    pub offset: u32,
    pub len: u32,
}

impl StrConst {
    pub const EMPTY: StrConst = StrConst { offset: 0, len: 0 };

    pub fn end(self) -> usize {
        self.offset as usize + self.len as usize
    }
}

/// A 256-bit character set literal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct CsetBits(pub [u64; 4]);

impl CsetBits {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut bits = CsetBits::default();
        for &b in bytes {
            bits.insert(b);
        }
        bits
    }

    pub fn insert(&mut self, c: u8) {
        self.0[(c >> 6) as usize] |= 1u64 << (c & 63);
    }

    pub fn contains(&self, c: u8) -> bool {
        self.0[(c >> 6) as usize] & (1u64 << (c & 63)) != 0
    }

    pub fn size(&self) -> u32 {
        self.0.iter().map(|w| w.count_ones()).sum()
    }

    /// Iterates the members in ascending character order.
    pub fn chars(&self) -> impl Iterator<Item = u8> + '_ {
        (0u16..256).map(|c| c as u8).filter(move |&c| self.contains(c))
    }
}

/// Keywords addressable by the `Keywd` instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Keyword {
    Null,
    Fail,
    Ascii,
    Cset,
    Lcase,
    Ucase,
    Digits,
    Letters,
    Main,
    Current,
    Source,
    Level,
    Line,
    File,
    Version,
    Input,
    Output,
    Errout,
    Time,
    Collections,
    Pos,
    Subject,
    Random,
    Trace,
}

impl Keyword {
    pub const ALL: [Keyword; 24] = [
        Keyword::Null,
        Keyword::Fail,
        Keyword::Ascii,
        Keyword::Cset,
        Keyword::Lcase,
        Keyword::Ucase,
        Keyword::Digits,
        Keyword::Letters,
        Keyword::Main,
        Keyword::Current,
        Keyword::Source,
        Keyword::Level,
        Keyword::Line,
        Keyword::File,
        Keyword::Version,
        Keyword::Input,
        Keyword::Output,
        Keyword::Errout,
        Keyword::Time,
        Keyword::Collections,
        Keyword::Pos,
        Keyword::Subject,
        Keyword::Random,
        Keyword::Trace,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Keyword::Null => "&null",
            Keyword::Fail => "&fail",
            Keyword::Ascii => "&ascii",
            Keyword::Cset => "&cset",
            Keyword::Lcase => "&lcase",
            Keyword::Ucase => "&ucase",
            Keyword::Digits => "&digits",
            Keyword::Letters => "&letters",
            Keyword::Main => "&main",
            Keyword::Current => "&current",
            Keyword::Source => "&source",
            Keyword::Level => "&level",
            Keyword::Line => "&line",
            Keyword::File => "&file",
            Keyword::Version => "&version",
            Keyword::Input => "&input",
            Keyword::Output => "&output",
            Keyword::Errout => "&errout",
            Keyword::Time => "&time",
            Keyword::Collections => "&collections",
            Keyword::Pos => "&pos",
            Keyword::Subject => "&subject",
            Keyword::Random => "&random",
            Keyword::Trace => "&trace",
        }
    }

    fn code(self) -> u8 {
        Keyword::ALL
            .iter()
            .position(|k| *k == self)
            .map(|i| i as u8)
            .unwrap_or(u8::MAX)
    }

    fn from_code(code: u8) -> Option<Keyword> {
        Keyword::ALL.get(code as usize).copied()
    }
}

/// Operators dispatched through the operator table.
///
/// Every operator expects a null result slot below its operands, mirroring the calling
/// convention of builtin functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    // Unary.
    Compl,
    Neg,
    Number,
    Refresh,
    Size,
    Value,
    Nonnull,
    Null,
    Random,
    Bang,

    // Binary.
    Cat,
    Diff,
    Div,
    Inter,
    Lconcat,
    Minus,
    Mod,
    Mult,
    Power,
    Unions,
    Plus,
    Eqv,
    Neqv,
    Lexeq,
    Lexge,
    Lexgt,
    Lexle,
    Lexlt,
    Lexne,
    Numeq,
    Numge,
    Numgt,
    Numle,
    Numlt,
    Numne,
    Asgn,
    Swap,
    Rasgn,
    Rswap,
    Subsc,

    // Ternary.
    Sect,
    Toby,
}

impl Operator {
    pub const ALL: [Operator; 42] = [
        Operator::Compl,
        Operator::Neg,
        Operator::Number,
        Operator::Refresh,
        Operator::Size,
        Operator::Value,
        Operator::Nonnull,
        Operator::Null,
        Operator::Random,
        Operator::Bang,
        Operator::Cat,
        Operator::Diff,
        Operator::Div,
        Operator::Inter,
        Operator::Lconcat,
        Operator::Minus,
        Operator::Mod,
        Operator::Mult,
        Operator::Power,
        Operator::Unions,
        Operator::Plus,
        Operator::Eqv,
        Operator::Neqv,
        Operator::Lexeq,
        Operator::Lexge,
        Operator::Lexgt,
        Operator::Lexle,
        Operator::Lexlt,
        Operator::Lexne,
        Operator::Numeq,
        Operator::Numge,
        Operator::Numgt,
        Operator::Numle,
        Operator::Numlt,
        Operator::Numne,
        Operator::Asgn,
        Operator::Swap,
        Operator::Rasgn,
        Operator::Rswap,
        Operator::Subsc,
        Operator::Sect,
        Operator::Toby,
    ];

    /// Number of operands (not counting the result slot).
    pub fn arity(self) -> u32 {
        use Operator::*;
        match self {
            Compl | Neg | Number | Refresh | Size | Value | Nonnull | Null | Random | Bang => 1,
            Sect | Toby => 3,
            _ => 2,
        }
    }

    pub fn symbol(self) -> &'static str {
        use Operator::*;
        match self {
            Compl => "~",
            Neg => "-",
            Number => "+",
            Refresh => "^",
            Size => "*",
            Value => ".",
            Nonnull => "\\",
            Null => "/",
            Random => "?",
            Bang => "!",
            Cat => "||",
            Diff => "--",
            Div => "/",
            Inter => "**",
            Lconcat => "|||",
            Minus => "-",
            Mod => "%",
            Mult => "*",
            Power => "^",
            Unions => "++",
            Plus => "+",
            Eqv => "===",
            Neqv => "~===",
            Lexeq => "==",
            Lexge => ">>=",
            Lexgt => ">>",
            Lexle => "<<=",
            Lexlt => "<<",
            Lexne => "~==",
            Numeq => "=",
            Numge => ">=",
            Numgt => ">",
            Numle => "<=",
            Numlt => "<",
            Numne => "~=",
            Asgn => ":=",
            Swap => ":=:",
            Rasgn => "<-",
            Rswap => "<->",
            Subsc => "[]",
            Sect => "[:]",
            Toby => "...",
        }
    }

    fn code(self) -> u8 {
        Operator::ALL
            .iter()
            .position(|o| *o == self)
            .map(|i| i as u8)
            .unwrap_or(u8::MAX)
    }

    fn from_code(code: u8) -> Option<Operator> {
        Operator::ALL.get(code as usize).copied()
    }
}

/// One interpreter instruction.
///
/// Branch targets are instruction indices within the owning procedure's code.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    // Constants.
    Int(i64),
    Real(f64),
    Str(StrConst),
    Cset(u32),
    Pnull,
    Push1,
    Pushn1,

    // Variables.
    Global(u32),
    Static(u32),
    Local(u32),
    Arg(u32),
    Keywd(Keyword),

    // Expression, generator and procedure frames.
    Mark(u32),
    Mark0,
    Unmark,
    Eret,
    Efail,
    Esusp,
    Lsusp,
    Limit,
    Pret,
    Pfail,
    Psusp,
    Chfail(u32),

    // Odds and ends.
    Goto(u32),
    Init(u32),
    Line(u32),
    Dup,
    Sdup,
    Pop,
    Ccase,
    Quit,

    // Calls and structure construction.
    /// Calls the value below the top `n` arguments; the result replaces the callee.
    Invoke(u32),
    /// Builds a list from the top `n` values; the result goes in the null slot below them.
    Llist(u32),
    /// Selects a record field by field id; expects a null result slot below the record.
    Field(u32),

    // Co-expressions.
    Create(u32),
    Coact,
    Coret,
    Cofail,

    Op(Operator),
}

impl Instruction {
    /// Returns the branch target, if this instruction carries one.
    pub fn target(&self) -> Option<u32> {
        match self {
            Instruction::Mark(t)
            | Instruction::Chfail(t)
            | Instruction::Goto(t)
            | Instruction::Init(t)
            | Instruction::Create(t) => Some(*t),
            _ => None,
        }
    }

    /// True when control never falls through to the next instruction.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Instruction::Goto(_)
                | Instruction::Efail
                | Instruction::Pret
                | Instruction::Pfail
                | Instruction::Quit
                | Instruction::Cofail
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Int(v) => write!(f, "int {v}"),
            Instruction::Real(v) => write!(f, "real {v}"),
            Instruction::Str(s) => write!(f, "str {}+{}", s.offset, s.len),
            Instruction::Cset(i) => write!(f, "cset {i}"),
            Instruction::Pnull => write!(f, "pnull"),
            Instruction::Push1 => write!(f, "push1"),
            Instruction::Pushn1 => write!(f, "pushn1"),
            Instruction::Global(i) => write!(f, "global {i}"),
            Instruction::Static(i) => write!(f, "static {i}"),
            Instruction::Local(i) => write!(f, "local {i}"),
            Instruction::Arg(i) => write!(f, "arg {i}"),
            Instruction::Keywd(k) => write!(f, "keywd {}", k.name()),
            Instruction::Mark(t) => write!(f, "mark L{t}"),
            Instruction::Mark0 => write!(f, "mark0"),
            Instruction::Unmark => write!(f, "unmark"),
            Instruction::Eret => write!(f, "eret"),
            Instruction::Efail => write!(f, "efail"),
            Instruction::Esusp => write!(f, "esusp"),
            Instruction::Lsusp => write!(f, "lsusp"),
            Instruction::Limit => write!(f, "limit"),
            Instruction::Pret => write!(f, "pret"),
            Instruction::Pfail => write!(f, "pfail"),
            Instruction::Psusp => write!(f, "psusp"),
            Instruction::Chfail(t) => write!(f, "chfail L{t}"),
            Instruction::Goto(t) => write!(f, "goto L{t}"),
            Instruction::Init(t) => write!(f, "init L{t}"),
            Instruction::Line(n) => write!(f, "line {n}"),
            Instruction::Dup => write!(f, "dup"),
            Instruction::Sdup => write!(f, "sdup"),
            Instruction::Pop => write!(f, "pop"),
            Instruction::Ccase => write!(f, "ccase"),
            Instruction::Quit => write!(f, "quit"),
            Instruction::Invoke(n) => write!(f, "invoke {n}"),
            Instruction::Llist(n) => write!(f, "llist {n}"),
            Instruction::Field(i) => write!(f, "field {i}"),
            Instruction::Create(t) => write!(f, "create L{t}"),
            Instruction::Coact => write!(f, "coact"),
            Instruction::Coret => write!(f, "coret"),
            Instruction::Cofail => write!(f, "cofail"),
            Instruction::Op(op) => write!(f, "op {}", op.symbol()),
        }
    }
}

/// An Icon procedure.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcDecl {
    pub name: String,
    /// Source file name used by diagnostics and tracing.
    pub file: String,
    pub nparams: u32,
    pub nlocals: u32,
    /// First slot of this procedure's statics in the image static table.
    pub static_base: u32,
    pub nstatics: u32,
    /// Names of parameters followed by locals; may be empty.
    pub local_names: Vec<String>,
    pub code: Vec<Instruction>,
}

/// A record constructor: a procedure-like global that builds a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordDecl {
    pub name: String,
    /// Field ids into [`Image::fields`], in declaration order.
    pub fields: Vec<u32>,
}

/// Initial value of a global variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GlobalInit {
    Null,
    Proc(ProcId),
    Record(RecordId),
    /// A builtin function, resolved by name against the runtime function table at load time.
    Function(String),
}

/// A loaded, linked program.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Image {
    pub procs: Vec<ProcDecl>,
    pub records: Vec<RecordDecl>,
    pub globals: Vec<GlobalInit>,
    pub global_names: Vec<String>,
    pub global_ids: BTreeMap<String, u32>,
    /// Total number of static variable slots.
    pub nstatics: u32,
    /// Identifier and string constant pool.
    pub strings: Vec<u8>,
    pub csets: Vec<CsetBits>,
    /// Field names referenced by `Field` instructions and record declarations.
    pub fields: Vec<String>,
    /// Initial value of `&trace`.
    pub trace: i64,
}

impl Image {
    pub fn add_proc(&mut self, mut decl: ProcDecl) -> Result<ProcId, String> {
        let id: u32 = self
            .procs
            .len()
            .try_into()
            .map_err(|_| "procedure table overflow".to_string())?;
        decl.static_base = self.nstatics;
        self.nstatics = self
            .nstatics
            .checked_add(decl.nstatics)
            .ok_or_else(|| "static table overflow".to_string())?;
        self.procs.push(decl);
        Ok(ProcId(id))
    }

    pub fn add_record(&mut self, name: &str, fields: &[&str]) -> Result<RecordId, String> {
        let id: u32 = self
            .records
            .len()
            .try_into()
            .map_err(|_| "record table overflow".to_string())?;
        let fields = fields.iter().map(|f| self.field_id(f)).collect();
        self.records.push(RecordDecl {
            name: name.to_string(),
            fields,
        });
        Ok(RecordId(id))
    }

    pub fn add_global(&mut self, name: &str, init: GlobalInit) -> Result<u32, String> {
        if self.global_ids.contains_key(name) {
            return Err(format!("duplicate global `{name}`"));
        }
        let id: u32 = self
            .globals
            .len()
            .try_into()
            .map_err(|_| "global table overflow".to_string())?;
        self.globals.push(init);
        self.global_names.push(name.to_string());
        self.global_ids.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn global_id(&self, name: &str) -> Option<u32> {
        self.global_ids.get(name).copied()
    }

    /// Appends `s` to the string pool, reusing an existing occurrence when there is one.
    pub fn intern(&mut self, s: &str) -> StrConst {
        let bytes = s.as_bytes();
        if bytes.is_empty() {
            return StrConst::EMPTY;
        }
        if let Some(pos) = self
            .strings
            .windows(bytes.len())
            .position(|w| w == bytes)
        {
            return StrConst {
                offset: pos as u32,
                len: bytes.len() as u32,
            };
        }
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(bytes);
        StrConst {
            offset,
            len: bytes.len() as u32,
        }
    }

    pub fn add_cset(&mut self, bits: CsetBits) -> u32 {
        if let Some(pos) = self.csets.iter().position(|c| *c == bits) {
            return pos as u32;
        }
        self.csets.push(bits);
        (self.csets.len() - 1) as u32
    }

    pub fn field_id(&mut self, name: &str) -> u32 {
        if let Some(pos) = self.fields.iter().position(|f| f == name) {
            return pos as u32;
        }
        self.fields.push(name.to_string());
        (self.fields.len() - 1) as u32
    }

    pub fn proc(&self, id: ProcId) -> Option<&ProcDecl> {
        self.procs.get(id.0 as usize)
    }

    pub fn record(&self, id: RecordId) -> Option<&RecordDecl> {
        self.records.get(id.0 as usize)
    }

    pub fn str_bytes(&self, s: StrConst) -> &[u8] {
        self.strings
            .get(s.offset as usize..s.end())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_reuses_existing_pool_bytes() {
        let mut image = Image::default();
        let a = image.intern("hello");
        let b = image.intern("ell");
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 1);
        assert_eq!(image.strings.len(), 5);
        assert_eq!(image.str_bytes(b), b"ell");
    }

    #[test]
    fn statics_are_allocated_per_procedure() {
        let mut image = Image::default();
        let mk = |n| ProcDecl {
            name: "p".to_string(),
            file: "t.icn".to_string(),
            nparams: 0,
            nlocals: 0,
            static_base: 0,
            nstatics: n,
            local_names: vec![],
            code: vec![Instruction::Pfail],
        };
        let a = image.add_proc(mk(2)).unwrap();
        let b = image.add_proc(mk(3)).unwrap();
        assert_eq!(image.proc(a).unwrap().static_base, 0);
        assert_eq!(image.proc(b).unwrap().static_base, 2);
        assert_eq!(image.nstatics, 5);
    }

    #[test]
    fn cset_bits_count_members() {
        let bits = CsetBits::from_bytes(b"abca");
        assert_eq!(bits.size(), 3);
        assert!(bits.contains(b'c'));
        assert!(!bits.contains(b'd'));
        assert_eq!(bits.chars().collect::<Vec<_>>(), b"abc".to_vec());
    }

    #[test]
    fn opcode_tables_are_consistent() {
        for op in Operator::ALL {
            assert_eq!(Operator::from_code(op.code()), Some(op));
        }
        for kw in Keyword::ALL {
            assert_eq!(Keyword::from_code(kw.code()), Some(kw));
        }
    }
}
