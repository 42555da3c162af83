//! The [`Vm`] and the allocation entry points that may trigger a collection.

use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::time::Instant;

use iconx_gc::{
    BlockRef, GcStats, GrowthPolicy, Heap, Need, RegionKind, RegionUsage, Relocate, Relocation,
    Trace, Tracer,
};
use iconx_image::{CsetBits, GlobalInit, Image, ProcId};

use crate::block::{
    Block, CoexprBlock, FS_READ, FS_WRITE, FileBlock,
};
use crate::error::{Fault, error_message, runerr, runerr_bare, syserr};
use crate::generators::GenState;
use crate::structs::list_need;
use crate::{Desc, ProcRef, Qual, RunError, VmMetrics};

mod coexpr;
mod invoke;
mod stack;
mod step;
mod trace;
mod var;

pub(crate) use invoke::Signal;
pub(crate) use stack::{Code, ExprFrame, GenFrame, GenKind, Ipc, ProcFrame, Regs, Slot};

/// Memory sizes, stack ceilings and tracing for one interpreter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmConfig {
    /// Initial block region size, in bytes.
    pub block_region: usize,
    /// Initial string region size, in bytes.
    pub string_region: usize,
    /// Initial static region size, in bytes.
    pub static_region: usize,
    /// Ceiling of the main stack, in slots.
    pub main_stack_slots: u32,
    /// Ceiling of each co-expression stack, in slots.
    pub coexpr_stack_slots: u32,
    /// Initial `&trace`; `None` uses the value recorded in the image.
    pub trace: Option<i64>,
    /// Number of files opened by `open` that get buffered I/O.
    pub io_buffers: usize,
    pub growth: GrowthPolicy,
    /// Collect [`VmMetrics`] while running.
    pub metrics: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            block_region: 51200,
            string_region: 51200,
            static_region: 20480,
            main_stack_slots: 5000,
            coexpr_stack_slots: 1000,
            trace: None,
            io_buffers: 10,
            growth: GrowthPolicy {
                static_increment: 20480 / 4,
                ..GrowthPolicy::default()
            },
            metrics: false,
        }
    }
}

/// The standard streams a program sees as `&input`, `&output` and `&errout`.
pub struct VmIo {
    pub input: Box<dyn BufRead>,
    pub output: Box<dyn Write>,
    pub errout: Box<dyn Write>,
}

impl VmIo {
    /// The process's standard streams.
    pub fn stdio() -> Self {
        Self {
            input: Box::new(io::BufReader::new(io::stdin())),
            output: Box::new(io::BufWriter::new(io::stdout())),
            errout: Box::new(io::stderr()),
        }
    }

    /// Empty input and discarded output.
    pub fn null() -> Self {
        Self {
            input: Box::new(io::empty()),
            output: Box::new(io::sink()),
            errout: Box::new(io::sink()),
        }
    }
}

impl std::fmt::Debug for VmIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmIo").finish_non_exhaustive()
    }
}

/// How a run ended without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// `main` returned or failed, or the program executed `quit`.
    Normal,
    /// The program called `exit(n)` or `stop()`.
    Exit(i32),
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Normal => 0,
            Outcome::Exit(n) => n,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: Outcome,
    pub metrics: Option<VmMetrics>,
    pub gc: GcStats,
}

pub(crate) enum Stream {
    Reader(Box<dyn BufRead>),
    Writer(Box<dyn Write>),
    /// A file opened for both reading and writing; writes bypass the read buffer.
    Duplex(io::BufReader<std::fs::File>),
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct KeywordCsets {
    pub(crate) ascii: BlockRef,
    pub(crate) cset: BlockRef,
    pub(crate) lcase: BlockRef,
    pub(crate) ucase: BlockRef,
    pub(crate) digits: BlockRef,
    pub(crate) letters: BlockRef,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct StdFiles {
    pub(crate) input: BlockRef,
    pub(crate) output: BlockRef,
    pub(crate) errout: BlockRef,
}

/// An interpreter for one loaded image.
pub struct Vm {
    pub(crate) image: Image,
    pub(crate) heap: Heap<Block>,
    pub(crate) config: VmConfig,

    /// The active stack; the stacks of inactive co-expressions live in their blocks.
    pub(crate) stack: Vec<Slot>,
    pub(crate) regs: Regs,
    pub(crate) slot_limit: u32,

    pub(crate) globals: Vec<Desc>,
    pub(crate) statics: Vec<Desc>,
    /// Cset literals of the image, allocated at load time.
    pub(crate) csets: Vec<BlockRef>,
    pub(crate) kcsets: KeywordCsets,
    pub(crate) files: StdFiles,
    pub(crate) streams: Vec<Stream>,
    pub(crate) buffered_streams: usize,

    /// Descriptors held by in-flight operations across a possible collection.
    pub(crate) tended: Vec<Desc>,
    /// `Init` instructions already executed.
    pub(crate) inited: HashSet<(Code, u32)>,

    pub(crate) main: BlockRef,
    pub(crate) current: BlockRef,

    pub(crate) k_pos: i64,
    pub(crate) k_subject: Desc,
    pub(crate) k_random: i64,
    pub(crate) k_trace: i64,
    pub(crate) k_level: i64,

    pub(crate) metrics: Option<VmMetrics>,
    started: Instant,
}

fn startup(err: impl std::fmt::Display) -> RunError {
    RunError::Startup {
        message: err.to_string(),
    }
}

impl Vm {
    /// Brings up an interpreter for `image`: resolves builtin function names, allocates the cset
    /// literals and the standard files, and creates `&main`.
    pub fn new(image: Image, config: VmConfig, io: VmIo) -> Result<Self, RunError> {
        let mut heap = Heap::new(
            config.block_region,
            config.string_region,
            config.static_region,
            config.growth,
        );

        let mut globals = Vec::with_capacity(image.globals.len());
        for (i, init) in image.globals.iter().enumerate() {
            globals.push(match init {
                GlobalInit::Null => Desc::Null,
                GlobalInit::Proc(id) => {
                    if image.proc(*id).is_none() {
                        return Err(startup(format!("global {i} names a missing procedure")));
                    }
                    Desc::Proc(ProcRef::Icon(*id))
                }
                GlobalInit::Record(id) => {
                    if image.record(*id).is_none() {
                        return Err(startup(format!("global {i} names a missing record")));
                    }
                    Desc::Proc(ProcRef::Record(*id))
                }
                GlobalInit::Function(name) => {
                    match crate::builtins::FUNCTIONS.iter().position(|f| f.name == name) {
                        Some(idx) => Desc::Proc(ProcRef::Builtin(idx as u16)),
                        None => return Err(startup(format!("unresolved function {name}"))),
                    }
                }
            });
        }

        let mut alloc_cset = |bits: CsetBits| heap.alloc(Block::Cset(bits)).map_err(startup);
        let csets = image
            .csets
            .iter()
            .map(|bits| alloc_cset(*bits))
            .collect::<Result<Vec<_>, _>>()?;
        let range = |lo: u8, hi: u8| {
            let mut bits = CsetBits::default();
            for c in lo..=hi {
                bits.insert(c);
            }
            bits
        };
        let mut letters = range(b'a', b'z');
        for c in b'A'..=b'Z' {
            letters.insert(c);
        }
        let kcsets = KeywordCsets {
            ascii: alloc_cset(range(0, 127))?,
            cset: alloc_cset(range(0, 255))?,
            lcase: alloc_cset(range(b'a', b'z'))?,
            ucase: alloc_cset(range(b'A', b'Z'))?,
            digits: alloc_cset(range(b'0', b'9'))?,
            letters: alloc_cset(letters)?,
        };

        let mut alloc_file = |stream: u32, status: u8, name: &str| {
            heap.alloc(Block::File(FileBlock {
                stream,
                status,
                name: name.as_bytes().to_vec(),
            }))
            .map_err(startup)
        };
        let files = StdFiles {
            input: alloc_file(0, FS_READ, "&input")?,
            output: alloc_file(1, FS_WRITE, "&output")?,
            errout: alloc_file(2, FS_WRITE, "&errout")?,
        };

        let main = heap
            .alloc(Block::Coexpr(Box::new(CoexprBlock {
                stack: Vec::new(),
                regs: Regs::BOOT,
                activator: None,
                size: 0,
                refresh: None,
                tvalloc: None,
                slot_limit: config.main_stack_slots,
                stack_bytes: 0,
            })))
            .map_err(startup)?;

        log::debug!(
            "loaded image: {} procedures, {} records, {} globals, {} statics",
            image.procs.len(),
            image.records.len(),
            image.globals.len(),
            image.nstatics
        );

        Ok(Self {
            statics: vec![Desc::Null; image.nstatics as usize],
            k_trace: config.trace.unwrap_or(image.trace),
            metrics: config.metrics.then(VmMetrics::default),
            slot_limit: config.main_stack_slots,
            image,
            heap,
            stack: Vec::new(),
            regs: Regs::BOOT,
            globals,
            csets,
            kcsets,
            files,
            streams: vec![
                Stream::Reader(io.input),
                Stream::Writer(io.output),
                Stream::Writer(io.errout),
            ],
            buffered_streams: 0,
            tended: Vec::new(),
            inited: HashSet::new(),
            main,
            current: main,
            k_pos: 1,
            k_subject: Desc::Str(Qual::EMPTY),
            k_random: 0,
            k_level: 0,
            config,
            started: Instant::now(),
        })
    }

    /// Runs `main` with `args` as its argument list.
    pub fn run(&mut self, args: &[String]) -> Result<RunReport, RunError> {
        let result = self.boot(args).and_then(|()| self.interp());
        let outcome = match result {
            Ok(outcome) => Ok(outcome),
            Err(Fault::Exit(code)) => Ok(Outcome::Exit(code)),
            Err(fault) => Err(self.fault_to_error(fault)),
        };
        self.flush_streams();
        match &outcome {
            Ok(o) => log::debug!("run finished: {o:?}"),
            Err(e) => log::debug!("run aborted: {e}"),
        }
        let outcome = outcome?;
        Ok(RunReport {
            outcome,
            metrics: self.metrics.clone(),
            gc: self.heap.stats().clone(),
        })
    }

    fn boot(&mut self, args: &[String]) -> Result<(), Fault> {
        self.stack.clear();
        self.regs = Regs::BOOT;
        self.push_slot(Slot::Expr(ExprFrame {
            failure: Some(Ipc::BOOT),
            efp: None,
            gfp: None,
        }))?;
        self.regs.efp = Some(0);

        let main = match self.image.global_id("main") {
            Some(i) => self.globals.get(i as usize).copied().unwrap_or(Desc::Null),
            None => Desc::Null,
        };
        if !matches!(main, Desc::Proc(ProcRef::Icon(_))) {
            return runerr_bare(117);
        }
        self.push(main)?;

        let bytes: usize = args.iter().map(String::len).sum();
        let mut need = list_need(args.len());
        need.strings = bytes;
        self.reserve(need)?;
        let mut argv = Vec::with_capacity(args.len());
        for a in args {
            argv.push(self.mkstr(a.as_bytes())?);
        }
        let list = self.alc_list(&argv)?;
        self.push(Desc::List(list))?;
        self.invoke(1)
    }

    /// Turns a fault into the error reported to the caller of [`Vm::run`].
    fn fault_to_error(&self, fault: Fault) -> RunError {
        let file = self.current_file().to_string();
        let line = self.regs.line;
        match fault {
            Fault::Runtime { code, value } => {
                let offending = value.map(|v| self.outimage_string(v));
                log::warn!("run-time error {code} at line {line} in {file}");
                RunError::Runtime {
                    code,
                    message: error_message(code).to_string(),
                    line,
                    file,
                    offending,
                }
            }
            Fault::System(message) => {
                log::warn!("system error at line {line} in {file}: {message}");
                RunError::System {
                    message,
                    line,
                    file,
                }
            }
            Fault::Exit(code) => RunError::Startup {
                message: format!("unexpected exit({code})"),
            },
        }
    }

    pub(crate) fn current_proc(&self) -> Option<ProcId> {
        match self.regs.ipc.code {
            Code::Proc(id) => Some(id),
            Code::Boot => None,
        }
    }

    pub(crate) fn current_file(&self) -> &str {
        self.current_proc()
            .and_then(|id| self.image.proc(id))
            .map(|p| p.file.as_str())
            .unwrap_or("")
    }

    pub(crate) fn flush_streams(&mut self) {
        for s in &mut self.streams {
            let flushed = match s {
                Stream::Writer(w) => w.flush(),
                Stream::Duplex(f) => f.get_mut().flush(),
                Stream::Reader(_) | Stream::Closed => Ok(()),
            };
            if let Err(err) = flushed {
                log::warn!("flush failed: {err}");
            }
        }
    }

    /// Makes sure `need` fits, collecting first if it does not.
    pub(crate) fn reserve(&mut self, need: Need) -> Result<(), Fault> {
        self.reserve_with(need, &mut [])
    }

    /// Like [`Vm::reserve`], with `keep` treated as roots and rewritten in place if a collection
    /// moves what they refer to.
    pub(crate) fn reserve_with(&mut self, need: Need, keep: &mut [Desc]) -> Result<(), Fault> {
        if !self.heap.request(need) {
            return Ok(());
        }
        let base = self.tended.len();
        self.tended.extend_from_slice(keep);
        let result = self.collect();
        for (k, d) in keep.iter_mut().zip(&self.tended[base..]) {
            *k = *d;
        }
        self.tended.truncate(base);
        result
    }

    pub(crate) fn collect(&mut self) -> Result<(), Fault> {
        let placeholder = Heap::new(0, 0, 0, self.config.growth);
        let mut heap = std::mem::replace(&mut self.heap, placeholder);
        let report = heap.collect(self);
        self.heap = heap;
        let report = report?;
        if let Some(m) = self.metrics.as_mut() {
            m.collections += 1;
            m.block_bytes_reclaimed += report.block_bytes_reclaimed as u64;
            m.string_bytes_reclaimed += report.string_bytes_reclaimed as u64;
            m.static_bytes_reclaimed += report.static_bytes_reclaimed as u64;
        }
        Ok(())
    }

    /// Forces a full collection.
    pub fn collect_garbage_now(&mut self) -> Result<(), RunError> {
        self.collect().map_err(|f| self.fault_to_error(f))
    }

    pub fn region_usage(&self, kind: RegionKind) -> RegionUsage {
        self.heap.usage(kind)
    }

    pub fn gc_stats(&self) -> &GcStats {
        self.heap.stats()
    }

    /// Allocates `bytes` as a string; reserves (and may collect) first.
    pub(crate) fn mkstr(&mut self, bytes: &[u8]) -> Result<Desc, Fault> {
        if bytes.is_empty() {
            return Ok(Desc::Str(Qual::EMPTY));
        }
        self.reserve(Need::strings(bytes.len()))?;
        Ok(Desc::Str(Qual::Heap(self.heap.alloc_str(bytes)?)))
    }

    /// Checks that a string of `len` bytes could ever fit the string region; `None` means the
    /// length overflowed.
    pub(crate) fn string_len_fits(&self, len: Option<usize>) -> Result<usize, Fault> {
        match len {
            Some(n) if n <= self.config.growth.max_region => Ok(n),
            _ => {
                log::warn!(
                    "string of {len:?} bytes exceeds the {} byte region ceiling",
                    self.config.growth.max_region
                );
                runerr_bare(303)
            }
        }
    }

    pub(crate) fn block(&self, r: BlockRef) -> Result<&Block, Fault> {
        match self.heap.get(r) {
            Some(b) => Ok(b),
            None => syserr(format!("dangling block reference {}", r.index())),
        }
    }

    pub(crate) fn block_mut(&mut self, r: BlockRef) -> Result<&mut Block, Fault> {
        match self.heap.get_mut(r) {
            Some(b) => Ok(b),
            None => syserr(format!("dangling block reference {}", r.index())),
        }
    }

    pub(crate) fn coexpr(&self, r: BlockRef) -> Result<&CoexprBlock, Fault> {
        match self.heap.get(r) {
            Some(Block::Coexpr(c)) => Ok(c),
            _ => runerr(118, Desc::Null),
        }
    }

    pub(crate) fn coexpr_mut(&mut self, r: BlockRef) -> Result<&mut CoexprBlock, Fault> {
        match self.heap.get_mut(r) {
            Some(Block::Coexpr(c)) => Ok(c),
            _ => runerr(118, Desc::Null),
        }
    }

    pub(crate) fn elapsed_ms(&self) -> i64 {
        self.started.elapsed().as_millis() as i64
    }
}

impl Trace for Vm {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for slot in &self.stack {
            slot.trace(tracer);
        }
        for d in self.globals.iter().chain(&self.statics).chain(&self.tended) {
            d.trace(tracer);
        }
        self.k_subject.trace(tracer);
        let k = &self.kcsets;
        let f = &self.files;
        for r in self.csets.iter().chain(&[
            k.ascii, k.cset, k.lcase, k.ucase, k.digits, k.letters, f.input, f.output, f.errout,
            self.main, self.current,
        ]) {
            tracer.mark_block(*r);
        }
    }
}

impl Relocate for Vm {
    fn relocate(&mut self, map: &Relocation) {
        for slot in &mut self.stack {
            slot.relocate(map);
        }
        for d in self
            .globals
            .iter_mut()
            .chain(&mut self.statics)
            .chain(&mut self.tended)
        {
            d.relocate(map);
        }
        self.k_subject.relocate(map);
        let k = &mut self.kcsets;
        let f = &mut self.files;
        for r in self.csets.iter_mut().chain([
            &mut k.ascii,
            &mut k.cset,
            &mut k.lcase,
            &mut k.ucase,
            &mut k.digits,
            &mut k.letters,
            &mut f.input,
            &mut f.output,
            &mut f.errout,
            &mut self.main,
            &mut self.current,
        ]) {
            *r = map.block(*r);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_functions_fail_at_load() {
        let mut image = Image::default();
        image
            .add_global("frobnicate", GlobalInit::Function("frobnicate".to_string()))
            .unwrap();
        let Err(err) = Vm::new(image, VmConfig::default(), VmIo::null()) else {
            panic!("an unresolved function should not load");
        };
        assert_eq!(err.to_string(), "unresolved function frobnicate");
    }

    #[test]
    fn missing_main_is_error_117() {
        let mut vm = Vm::new(Image::default(), VmConfig::default(), VmIo::null()).unwrap();
        let err = vm.run(&[]).unwrap_err();
        assert!(matches!(err, RunError::Runtime { code: 117, line: 0, .. }));
    }

    #[test]
    fn held_descriptors_follow_a_collection() {
        let mut vm = Vm::new(Image::default(), VmConfig::default(), VmIo::null()).unwrap();
        for _ in 0..10 {
            vm.mkstr(b"garbage garbage garbage").unwrap();
        }
        let kept = vm.mkstr(b"kept").unwrap();
        let mut keep = [kept];
        let huge = vm.region_usage(RegionKind::String).capacity + 1;
        vm.reserve_with(Need::strings(huge), &mut keep).unwrap();
        let Desc::Str(q) = keep[0] else { panic!("not a string") };
        assert_eq!(vm.qual_bytes(q), b"kept");
        assert_eq!(vm.gc_stats().collections, 1);
    }
}
